//! Per-peer score, rate limiting, banning and selection (spec §4.D).
//!
//! Grounded on the teacher's `peer_score.rs` (integer-clamp score model),
//! `peer_table.rs` (peers kept in a stable-id-keyed map behind one lock,
//! referenced elsewhere by id rather than by value), and the sliding
//! rate-limit-window idea from its `scoring` module.

use chainsync_common::{Hash, PeerRegistryConfig};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

const GOOD_RESPONSE_DELTA: i64 = 1;
const BAD_RESPONSE_DELTA: i64 = -10;
const EMPTY_RESPONSE_DELTA: i64 = -5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Good,
    Bad,
    Empty,
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: Hash,
    pub score: i64,
    pub good_count: u64,
    pub bad_count: u64,
    pub active_jobs: u32,
    pub last_used: Option<Instant>,
    pub banned_until: Option<Instant>,
    /// Approximate latency of the peer's most recent completed request;
    /// used by selection, not by scoring.
    pub latency: Duration,
    request_timestamps: VecDeque<Instant>,
}

impl PeerRecord {
    fn new(id: Hash) -> Self {
        Self {
            id,
            score: 0,
            good_count: 0,
            bad_count: 0,
            active_jobs: 0,
            last_used: None,
            banned_until: None,
            latency: Duration::ZERO,
            request_timestamps: VecDeque::new(),
        }
    }

    fn is_banned(&self, now: Instant) -> bool {
        matches!(self.banned_until, Some(until) if until > now)
    }
}

pub struct PeerRegistry {
    config: PeerRegistryConfig,
    peers: RwLock<HashMap<Hash, PeerRecord>>,
}

impl PeerRegistry {
    pub fn new(config: PeerRegistryConfig) -> Self {
        Self {
            config,
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, id: Hash) {
        let mut peers = self.peers.write().await;
        peers.entry(id).or_insert_with(|| PeerRecord::new(id));
    }

    pub async fn record(&self, id: Hash, outcome: Outcome) {
        let mut peers = self.peers.write().await;
        let record = peers.entry(id).or_insert_with(|| PeerRecord::new(id));
        let delta = match outcome {
            Outcome::Good => {
                record.good_count += 1;
                GOOD_RESPONSE_DELTA
            }
            Outcome::Bad => {
                record.bad_count += 1;
                BAD_RESPONSE_DELTA
            }
            Outcome::Empty => EMPTY_RESPONSE_DELTA,
        };
        record.score = (record.score + delta).clamp(self.config.min_score, self.config.max_score);
        if record.score <= self.config.min_score && record.banned_until.is_none() {
            let cooldown = self.ban_duration(record.bad_count);
            warn!(peer = ?id, score = record.score, cooldown_secs = cooldown.as_secs(), "banning peer");
            record.banned_until = Some(Instant::now() + cooldown);
        }
    }

    fn ban_duration(&self, bad_count: u64) -> Duration {
        let exponent = bad_count.min(6) as u32;
        Duration::from_secs(10u64.saturating_mul(2u64.saturating_pow(exponent)))
    }

    /// Admits a request if the peer is under its rate limit, pruning
    /// timestamps older than the configured window first (spec I4: a
    /// peer's in-flight count never exceeds the window limit right after
    /// admission).
    pub async fn try_admit(&self, id: Hash) -> bool {
        let mut peers = self.peers.write().await;
        let record = peers.entry(id).or_insert_with(|| PeerRecord::new(id));
        let now = Instant::now();
        let window = self.config.rate_limit_window();
        while let Some(&ts) = record.request_timestamps.front() {
            if now.duration_since(ts) > window {
                record.request_timestamps.pop_front();
            } else {
                break;
            }
        }
        if record.request_timestamps.len() as u32 >= self.config.rate_limit_max_requests {
            return false;
        }
        record.request_timestamps.push_back(now);
        record.active_jobs += 1;
        record.last_used = Some(now);
        true
    }

    /// Releases an in-flight slot without touching the score — used both
    /// on normal completion (scoring happens separately via `record`) and
    /// on caller-initiated cancellation.
    pub async fn release(&self, id: Hash) {
        let mut peers = self.peers.write().await;
        if let Some(record) = peers.get_mut(&id) {
            record.active_jobs = record.active_jobs.saturating_sub(1);
        }
    }

    pub async fn set_latency(&self, id: Hash, latency: Duration) {
        let mut peers = self.peers.write().await;
        if let Some(record) = peers.get_mut(&id) {
            record.latency = latency;
        }
    }

    /// Among non-banned, non-rate-limited peers with the fewest active
    /// jobs, picks the lowest observed latency; ties broken by highest
    /// score, then least-recently-used.
    pub async fn select(&self) -> Option<Hash> {
        let peers = self.peers.read().await;
        let now = Instant::now();
        peers
            .values()
            .filter(|record| !record.is_banned(now))
            .filter(|record| {
                let window = self.config.rate_limit_window();
                let in_window = record
                    .request_timestamps
                    .iter()
                    .filter(|&&ts| now.duration_since(ts) <= window)
                    .count();
                (in_window as u32) < self.config.rate_limit_max_requests
            })
            .min_by(|a, b| {
                a.active_jobs
                    .cmp(&b.active_jobs)
                    .then(a.latency.cmp(&b.latency))
                    .then(b.score.cmp(&a.score))
                    .then_with(|| {
                        let a_used = a.last_used.unwrap_or(now - Duration::from_secs(u64::MAX / 2));
                        let b_used = b.last_used.unwrap_or(now - Duration::from_secs(u64::MAX / 2));
                        a_used.cmp(&b_used)
                    })
            })
            .map(|record| record.id)
    }

    pub async fn score(&self, id: Hash) -> i64 {
        self.peers.read().await.get(&id).map(|r| r.score).unwrap_or(0)
    }

    pub async fn is_banned(&self, id: Hash) -> bool {
        let now = Instant::now();
        self.peers
            .read()
            .await
            .get(&id)
            .is_some_and(|r| r.is_banned(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> Hash {
        Hash::repeat_byte(byte)
    }

    fn config() -> PeerRegistryConfig {
        PeerRegistryConfig {
            min_score: -20,
            max_score: 20,
            rate_limit_window_secs: 10,
            rate_limit_max_requests: 3,
        }
    }

    #[tokio::test]
    async fn score_is_clamped_both_directions() {
        let registry = PeerRegistry::new(config());
        for _ in 0..100 {
            registry.record(h(1), Outcome::Good).await;
        }
        assert_eq!(registry.score(h(1)).await, 20);
        for _ in 0..100 {
            registry.record(h(2), Outcome::Bad).await;
        }
        assert_eq!(registry.score(h(2)).await, -20);
    }

    #[tokio::test]
    async fn peer_is_banned_once_it_hits_min_score() {
        let registry = PeerRegistry::new(config());
        for _ in 0..2 {
            registry.record(h(1), Outcome::Bad).await;
        }
        assert!(registry.is_banned(h(1)).await);
    }

    #[tokio::test]
    async fn rate_limit_rejects_past_the_window_cap() {
        let registry = PeerRegistry::new(config());
        assert!(registry.try_admit(h(1)).await);
        assert!(registry.try_admit(h(1)).await);
        assert!(registry.try_admit(h(1)).await);
        assert!(!registry.try_admit(h(1)).await);
    }

    #[tokio::test]
    async fn cancellation_releases_slot_without_scoring() {
        let registry = PeerRegistry::new(config());
        registry.try_admit(h(1)).await;
        registry.release(h(1)).await;
        assert_eq!(registry.score(h(1)).await, 0);
    }

    #[tokio::test]
    async fn selection_prefers_fewest_active_jobs() {
        let registry = PeerRegistry::new(config());
        registry.register(h(1)).await;
        registry.register(h(2)).await;
        registry.try_admit(h(1)).await;
        let selected = registry.select().await;
        assert_eq!(selected, Some(h(2)));
    }

    #[tokio::test]
    async fn banned_peers_are_excluded_from_selection() {
        let registry = PeerRegistry::new(config());
        registry.register(h(1)).await;
        for _ in 0..2 {
            registry.record(h(1), Outcome::Bad).await;
        }
        assert_eq!(registry.select().await, None);
    }
}
