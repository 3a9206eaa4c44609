//! Top-level state machine: select snap vs. full, drive every stage,
//! own the checkpoint, enforce the at-most-one-running invariant
//! (spec §4.J).
//!
//! Grounded on the teacher's `sync.rs::Syncer` (snap/full fallback logic)
//! and `sync_manager.rs`/`sync_supervisor.rs` (the single
//! `Arc<AtomicBool>`/`Arc<Mutex<...>>` running-guard shape).

use crate::bandwidth::BandwidthEstimator;
use crate::block_importer::BlockImporter;
use crate::body_pipeline::BodyPipeline;
use crate::error::SyncError;
use crate::header_pipeline::HeaderPipeline;
use crate::heal::TrieHealer;
use crate::peer_registry::PeerRegistry;
use crate::snap_fetch::SnapFetchEngine;
use crate::traits::{ChainInserter, PeerTransport, StateExecutor, StateStore};
use chainsync_common::{Checkpoint, Hash, Phase, SyncConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Snap,
    Full,
}

pub struct SyncCoordinator<S: StateStore, T: PeerTransport, I: ChainInserter, E: StateExecutor> {
    running: Arc<AtomicBool>,
    config: SyncConfig,
    store: Arc<S>,
    transport: Arc<T>,
    registry: Arc<PeerRegistry>,
    bandwidth: Arc<BandwidthEstimator>,
    inserter: Arc<I>,
    executor: Arc<E>,
    checkpoint: Mutex<Option<Checkpoint>>,
}

impl<S: StateStore, T: PeerTransport, I: ChainInserter, E: StateExecutor> SyncCoordinator<S, T, I, E> {
    pub fn new(
        config: SyncConfig,
        store: Arc<S>,
        transport: Arc<T>,
        inserter: Arc<I>,
        executor: Arc<E>,
    ) -> Self {
        let registry = Arc::new(PeerRegistry::new(config.peer_registry.clone()));
        let bandwidth = Arc::new(BandwidthEstimator::new(config.bandwidth_window()));
        Self {
            running: Arc::new(AtomicBool::new(false)),
            config,
            store,
            transport,
            registry,
            bandwidth,
            inserter,
            executor,
            checkpoint: Mutex::new(None),
        }
    }

    pub fn bandwidth(&self) -> Arc<BandwidthEstimator> {
        self.bandwidth.clone()
    }

    pub fn peer_registry(&self) -> Arc<PeerRegistry> {
        self.registry.clone()
    }

    pub async fn checkpoint(&self) -> Option<Checkpoint> {
        *self.checkpoint.lock().await
    }

    /// Chooses snap vs. full based on distance from tip and peer
    /// availability (spec §4.J). Distance is approximated by the gap
    /// between the chain head and the pivot candidate's number.
    pub fn select_mode(&self, current_head_number: u64, pivot_number: u64, snap_peers_available: bool) -> SyncMode {
        const SNAP_DISTANCE_THRESHOLD: u64 = 64;
        if snap_peers_available && pivot_number.saturating_sub(current_head_number) > SNAP_DISTANCE_THRESHOLD {
            SyncMode::Snap
        } else {
            SyncMode::Full
        }
    }

    /// Runs one full sync cycle. Enforces the single-running invariant
    /// with a compare-and-swap on `running`.
    pub async fn run_cycle(
        &self,
        mode: SyncMode,
        pivot_block: u64,
        pivot_root: Hash,
        peers: &[Hash],
    ) -> Result<(), SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }
        let result = self.run_cycle_inner(mode, pivot_block, pivot_root, peers).await;
        self.running.store(false, Ordering::Release);
        result
    }

    async fn run_cycle_inner(
        &self,
        mode: SyncMode,
        pivot_block: u64,
        pivot_root: Hash,
        peers: &[Hash],
    ) -> Result<(), SyncError> {
        match mode {
            SyncMode::Snap => match self.run_snap(pivot_block, pivot_root, peers).await {
                Ok(()) => Ok(()),
                Err(e) if !e.is_recoverable() => {
                    warn!(%e, "snap sync failed, falling back to full sync");
                    self.run_full(peers).await
                }
                Err(e) => Err(e),
            },
            SyncMode::Full => self.run_full(peers).await,
        }
    }

    async fn run_snap(&self, pivot_block: u64, pivot_root: Hash, peers: &[Hash]) -> Result<(), SyncError> {
        for peer in peers {
            self.registry.register(*peer).await;
        }
        let healer = Arc::new(TrieHealer::new(
            self.store.clone(),
            self.transport.clone(),
            self.config.heal.max_retries,
            self.config.heal.workers,
        ));
        let mut engine = SnapFetchEngine::new(
            self.store.clone(),
            self.transport.clone(),
            self.registry.clone(),
            healer,
            self.config.snap.clone(),
            self.config.partition.partition_count,
        );
        let result = engine.run(pivot_root, peers).await;
        self.save_checkpoint(Checkpoint {
            phase: engine.phase(),
            pivot_block,
            pivot_root,
            last_account_key: Hash::zero(),
            accounts_done: engine.accounts_done(),
            storage_done: engine.storage_done(),
            codes_done: engine.codes_done(),
            heal_nodes_done: 0,
            bytes_total: 0,
            timestamp_unix_secs: unix_now(),
        })
        .await;
        match result {
            Ok(()) => {
                info!(pivot_block, "snap sync reached Done");
                Ok(())
            }
            Err(e) => {
                error!(%e, "snap sync phase failed");
                Err(e)
            }
        }
    }

    async fn run_full(&self, peers: &[Hash]) -> Result<(), SyncError> {
        let headers = HeaderPipeline::new(self.transport.clone(), self.config.header_pipeline.clone());
        let bodies = BodyPipeline::new(self.transport.clone(), self.config.body_pipeline.clone());
        let importer = BlockImporter::new(
            self.inserter.clone(),
            self.executor.clone(),
            self.config.importer.clone(),
            self.inserter.current_block().await.number() + 1,
        );

        let current = self.inserter.current_block().await;
        let target = current.number() + self.config.header_pipeline.stride;
        let skeleton = headers.fetch_skeleton(peers, current.number(), target).await?;
        let mut parent = current.header.clone();
        let mut all_headers = Vec::new();
        for anchor in &skeleton {
            let filled = headers.fill_gap(peers, &parent, anchor).await?;
            all_headers.extend(filled);
            all_headers.push(anchor.clone());
            parent = anchor.clone();
        }

        let fetched_bodies = bodies.fetch_bodies(peers, &all_headers).await?;
        for (header, body) in fetched_bodies {
            importer
                .enqueue(chainsync_common::Block { header, body })
                .await?;
        }
        loop {
            let imported = importer.process().await?;
            if imported == 0 {
                break;
            }
        }
        Ok(())
    }

    async fn save_checkpoint(&self, checkpoint: Checkpoint) {
        let mut slot = self.checkpoint.lock().await;
        // Checkpoint timestamps must be monotonically non-decreasing
        // across successive writes (spec I6).
        if let Some(previous) = *slot {
            if checkpoint.timestamp_unix_secs < previous.timestamp_unix_secs {
                return;
            }
        }
        *slot = Some(checkpoint);
    }

    /// On resume, partitions whose limit falls below the checkpointed
    /// last key are already done; the straddling partition resumes at
    /// `last_key + 1`. This crate's `SnapFetchEngine` recomputes
    /// partitions fresh each `run`, so resumption is expressed here as
    /// restoring the coordinator's own counters only — `engine.run`
    /// itself is always a clean restart against whatever the store
    /// already has committed.
    pub async fn resume_from(&self, checkpoint: Checkpoint) {
        *self.checkpoint.lock().await = Some(checkpoint);
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeChainInserter, FakeExecutor, FakeStore, FakeTransport};
    use chainsync_common::{empty_trie_root, none_hash, Body, Header};

    fn genesis() -> chainsync_common::Block {
        chainsync_common::Block {
            header: Header {
                number: 0,
                parent_hash: none_hash(),
                state_root: none_hash(),
                receipt_root: none_hash(),
                transactions_root: empty_trie_root(),
                withdrawals_root: None,
                ommers_hash: empty_trie_root(),
                time: 0,
                difficulty: 0u64.into(),
                extra: vec![],
            },
            body: Body::default(),
        }
    }

    async fn coordinator() -> SyncCoordinator<FakeStore, FakeTransport, FakeChainInserter, FakeExecutor> {
        let store = Arc::new(FakeStore::default());
        let transport = Arc::new(FakeTransport::default());
        let inserter = Arc::new(FakeChainInserter::default());
        inserter.insert(vec![genesis()]).await.unwrap();
        let executor = Arc::new(FakeExecutor { state_root: Hash::zero() });
        SyncCoordinator::new(SyncConfig::default(), store, transport, inserter, executor)
    }

    #[tokio::test]
    async fn select_mode_chooses_snap_when_far_behind_with_peers() {
        let coordinator = coordinator().await;
        assert_eq!(coordinator.select_mode(0, 1000, true), SyncMode::Snap);
        assert_eq!(coordinator.select_mode(990, 1000, true), SyncMode::Full);
        assert_eq!(coordinator.select_mode(0, 1000, false), SyncMode::Full);
    }

    #[tokio::test]
    async fn concurrent_run_cycle_is_rejected() {
        let coordinator = Arc::new(coordinator().await);
        coordinator.running.store(true, Ordering::Release);
        let err = coordinator
            .run_cycle(SyncMode::Full, 0, Hash::zero(), &[])
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::AlreadyRunning);
    }

    #[tokio::test]
    async fn checkpoint_timestamp_never_regresses() {
        let coordinator = coordinator().await;
        coordinator
            .save_checkpoint(Checkpoint {
                phase: Phase::Accounts,
                pivot_block: 1,
                pivot_root: Hash::zero(),
                last_account_key: Hash::zero(),
                accounts_done: 1,
                storage_done: 0,
                codes_done: 0,
                heal_nodes_done: 0,
                bytes_total: 0,
                timestamp_unix_secs: 1000,
            })
            .await;
        coordinator
            .save_checkpoint(Checkpoint {
                phase: Phase::Accounts,
                pivot_block: 1,
                pivot_root: Hash::zero(),
                last_account_key: Hash::zero(),
                accounts_done: 2,
                storage_done: 0,
                codes_done: 0,
                heal_nodes_done: 0,
                bytes_total: 0,
                timestamp_unix_secs: 500,
            })
            .await;
        assert_eq!(coordinator.checkpoint().await.unwrap().accounts_done, 1);
    }
}
