//! Skeleton-then-gap-fill header download with chain-continuity
//! validation (spec §4.G).
//!
//! Grounded on the teacher's `sync/full.rs` batch-validation loop and
//! `peer_handler.rs`'s rotate-by-failure-count peer selection.

use crate::error::SyncError;
use crate::traits::PeerTransport;
use chainsync_common::{Hash, Header, HeaderPipelineConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

struct PeerFailures {
    counts: HashMap<Hash, u32>,
}

impl PeerFailures {
    fn new() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }

    fn record_failure(&mut self, peer: Hash) {
        *self.counts.entry(peer).or_insert(0) += 1;
    }

    /// Rotates among the given candidates, preferring fewest recorded
    /// failures; a peer with 3+ failures is temporarily excluded.
    fn select<'a>(&self, candidates: &'a [Hash]) -> Option<&'a Hash> {
        candidates
            .iter()
            .filter(|p| self.counts.get(p).copied().unwrap_or(0) < 3)
            .min_by_key(|p| self.counts.get(p).copied().unwrap_or(0))
    }
}

pub struct HeaderPipeline<T: PeerTransport> {
    transport: Arc<T>,
    config: HeaderPipelineConfig,
    failures: Mutex<PeerFailures>,
    reorg_count: Mutex<u32>,
}

impl<T: PeerTransport> HeaderPipeline<T> {
    pub fn new(transport: Arc<T>, config: HeaderPipelineConfig) -> Self {
        Self {
            transport,
            config,
            failures: Mutex::new(PeerFailures::new()),
            reorg_count: Mutex::new(0),
        }
    }

    /// Phase 1: fetches anchor headers at `stride` intervals covering
    /// `[anchor, target]`.
    pub async fn fetch_skeleton(
        &self,
        peers: &[Hash],
        anchor: u64,
        target: u64,
    ) -> Result<Vec<Header>, SyncError> {
        let mut anchors = Vec::new();
        let mut number = anchor;
        loop {
            let peer = *self
                .failures
                .lock()
                .await
                .select(peers)
                .ok_or(SyncError::UnknownPeer(Hash::zero()))?;
            let headers = self
                .transport
                .fetch_headers(peer, number, 1)
                .await
                .map_err(|_| {
                    SyncError::Timeout(peer)
                })?;
            let header = headers.into_iter().next().ok_or(SyncError::Timeout(peer))?;
            anchors.push(header);
            if number >= target {
                break;
            }
            number = (number + self.config.stride).min(target);
        }
        Ok(anchors)
    }

    /// Phase 2: fills the gap between two adjacent anchors in
    /// `batch_size`-sized contiguous requests, validating each batch.
    pub async fn fill_gap(
        &self,
        peers: &[Hash],
        parent: &Header,
        next_anchor: &Header,
    ) -> Result<Vec<Header>, SyncError> {
        let mut filled = Vec::new();
        let mut prev = parent.clone();
        let mut number = parent.number + 1;
        while number < next_anchor.number {
            let count = self.config.batch_size as u64;
            let peer = *self
                .failures
                .lock()
                .await
                .select(peers)
                .ok_or(SyncError::UnknownPeer(Hash::zero()))?;
            let batch = match self.transport.fetch_headers(peer, number, count).await {
                Ok(batch) => batch,
                Err(_) => {
                    self.failures.lock().await.record_failure(peer);
                    return Err(SyncError::Timeout(peer));
                }
            };
            if let Err(e) = self.validate_batch(&prev, &batch).await {
                self.failures.lock().await.record_failure(peer);
                return Err(e);
            }
            if let Some(last) = batch.last() {
                prev = last.clone();
                number = last.number + 1;
            } else {
                break;
            }
            filled.extend(batch);
        }
        Ok(filled)
    }

    /// Validates a contiguous batch against its immediate parent (spec
    /// §4.G "Header-chain validation").
    async fn validate_batch(&self, parent: &Header, batch: &[Header]) -> Result<(), SyncError> {
        let mut prev = parent.clone();
        let now = now_unix_secs();
        for header in batch {
            if header.number != prev.number + 1 {
                return Err(SyncError::BadBlockNumber {
                    expected: prev.number + 1,
                    got: header.number,
                });
            }
            if header.parent_hash != prev.hash() {
                let mut reorgs = self.reorg_count.lock().await;
                *reorgs += 1;
                if *reorgs > self.config.max_reorg_depth {
                    return Err(SyncError::ReorgTooDeep);
                }
                return Err(SyncError::BadParentHash {
                    block: header.number,
                    expected: prev.hash(),
                    got: header.parent_hash,
                });
            }
            if header.time > now + self.config.future_timestamp_tolerance_secs {
                return Err(SyncError::FutureTimestamp(header.number));
            }
            if header.time < prev.time {
                return Err(SyncError::TimestampOrder(header.number));
            }
            prev = header.clone();
        }
        Ok(())
    }
}

fn now_unix_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs()
}
