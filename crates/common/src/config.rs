//! Tunable knobs for every component, deserializable from whatever
//! configuration source the embedding client uses (file, env, CLI —
//! all out of scope here). Every field has a default matching the
//! spec's stated defaults, so a caller can deserialize a partial
//! document and get sane values everywhere else, mirroring the
//! `#[serde(default)]` + per-field-default pattern used by `reth`'s
//! `StageConfig` and the teacher's own per-module `pub const ..._DEFAULT`
//! constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PARTITION_COUNT: usize = 16;
pub const DEFAULT_BANDWIDTH_WINDOW_SECS: u64 = 10;
pub const DEFAULT_PEER_MIN_SCORE: i64 = -100;
pub const DEFAULT_PEER_MAX_SCORE: i64 = 100;
pub const DEFAULT_PEER_RATE_LIMIT_WINDOW_SECS: u64 = 10;
pub const DEFAULT_PEER_RATE_LIMIT_MAX_REQUESTS: u32 = 32;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_SOFT_BYTE_LIMIT: u64 = 512 * 1024;
pub const DEFAULT_CODE_BATCH: usize = 128;
pub const DEFAULT_CHECKPOINT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_HEAL_WORKERS: usize = 16;
pub const DEFAULT_HEADER_STRIDE: u64 = 2048;
pub const DEFAULT_HEADER_BATCH_SIZE: usize = 192;
pub const DEFAULT_MAX_REORG_DEPTH: u32 = 64;
pub const DEFAULT_FUTURE_TIMESTAMP_TOLERANCE_SECS: u64 = 15;
pub const DEFAULT_BODY_BATCH_SIZE: usize = 128;
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 4096;
pub const DEFAULT_IMPORT_BATCH_SIZE: usize = 64;
pub const DEFAULT_MAX_UNCLE_DEPTH: u64 = 6;
pub const DEFAULT_MAX_UNCLES_PER_BLOCK: usize = 2;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub partition_count: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            partition_count: DEFAULT_PARTITION_COUNT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerRegistryConfig {
    pub min_score: i64,
    pub max_score: i64,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max_requests: u32,
}

impl Default for PeerRegistryConfig {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_PEER_MIN_SCORE,
            max_score: DEFAULT_PEER_MAX_SCORE,
            rate_limit_window_secs: DEFAULT_PEER_RATE_LIMIT_WINDOW_SECS,
            rate_limit_max_requests: DEFAULT_PEER_RATE_LIMIT_MAX_REQUESTS,
        }
    }
}

impl PeerRegistryConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapConfig {
    pub max_retries: u32,
    pub soft_byte_limit: u64,
    pub code_batch: usize,
    pub checkpoint_interval_secs: u64,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            soft_byte_limit: DEFAULT_SOFT_BYTE_LIMIT,
            code_batch: DEFAULT_CODE_BATCH,
            checkpoint_interval_secs: DEFAULT_CHECKPOINT_INTERVAL_SECS,
        }
    }
}

impl SnapConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealConfig {
    pub max_retries: u32,
    pub workers: usize,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            workers: DEFAULT_HEAL_WORKERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderPipelineConfig {
    pub stride: u64,
    pub batch_size: usize,
    pub max_reorg_depth: u32,
    pub future_timestamp_tolerance_secs: u64,
}

impl Default for HeaderPipelineConfig {
    fn default() -> Self {
        Self {
            stride: DEFAULT_HEADER_STRIDE,
            batch_size: DEFAULT_HEADER_BATCH_SIZE,
            max_reorg_depth: DEFAULT_MAX_REORG_DEPTH,
            future_timestamp_tolerance_secs: DEFAULT_FUTURE_TIMESTAMP_TOLERANCE_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyPipelineConfig {
    pub batch_size: usize,
    pub max_retries: u32,
}

impl Default for BodyPipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BODY_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    pub max_queue_size: usize,
    pub batch_size: usize,
    pub max_uncle_depth: u64,
    pub max_uncles_per_block: usize,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            batch_size: DEFAULT_IMPORT_BATCH_SIZE,
            max_uncle_depth: DEFAULT_MAX_UNCLE_DEPTH,
            max_uncles_per_block: DEFAULT_MAX_UNCLES_PER_BLOCK,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub partition: PartitionConfig,
    pub peer_registry: PeerRegistryConfig,
    pub bandwidth_window_secs: u64,
    pub snap: SnapConfig,
    pub heal: HealConfig,
    pub header_pipeline: HeaderPipelineConfig,
    pub body_pipeline: BodyPipelineConfig,
    pub importer: ImporterConfig,
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            partition: PartitionConfig::default(),
            peer_registry: PeerRegistryConfig::default(),
            bandwidth_window_secs: DEFAULT_BANDWIDTH_WINDOW_SECS,
            snap: SnapConfig::default(),
            heal: HealConfig::default(),
            header_pipeline: HeaderPipelineConfig::default(),
            body_pipeline: BodyPipelineConfig::default(),
            importer: ImporterConfig::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl SyncConfig {
    pub fn bandwidth_window(&self) -> Duration {
        Duration::from_secs(self.bandwidth_window_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_in_defaults() {
        let parsed: SyncConfig = serde_json::from_str(r#"{"snap": {"max_retries": 9}}"#).unwrap();
        assert_eq!(parsed.snap.max_retries, 9);
        assert_eq!(parsed.snap.code_batch, DEFAULT_CODE_BATCH);
        assert_eq!(parsed.partition.partition_count, DEFAULT_PARTITION_COUNT);
    }

    #[test]
    fn default_config_round_trips_through_json() {
        let config = SyncConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SyncConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }
}
