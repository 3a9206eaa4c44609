//! Parallel body download by header hash with per-batch validation
//! (spec §4.H).
//!
//! Grounded on the teacher's `sync/full.rs` body-fetch loop and
//! `peer_handler.rs`'s fewest-active-jobs peer preference.

use crate::error::SyncError;
use crate::traits::PeerTransport;
use chainsync_common::{empty_trie_root, BodyPipelineConfig, Hash, Header};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct BodyPipeline<T: PeerTransport> {
    transport: Arc<T>,
    config: BodyPipelineConfig,
    active_jobs: Mutex<HashMap<Hash, u32>>,
}

impl<T: PeerTransport> BodyPipeline<T> {
    pub fn new(transport: Arc<T>, config: BodyPipelineConfig) -> Self {
        Self {
            transport,
            config,
            active_jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Fetches and validates bodies for `headers` in `batch_size`-sized
    /// requests, retrying a failed batch with another peer up to
    /// `max_retries` times.
    pub async fn fetch_bodies(
        &self,
        peers: &[Hash],
        headers: &[Header],
    ) -> Result<Vec<(Header, chainsync_common::Body)>, SyncError> {
        let mut out = Vec::with_capacity(headers.len());
        for chunk in headers.chunks(self.config.batch_size) {
            let hashes: Vec<Hash> = chunk.iter().map(|h| h.hash()).collect();
            let bodies = self.fetch_chunk_with_retries(peers, &hashes).await?;
            for (header, body) in chunk.iter().zip(bodies) {
                self.validate(header, &body)?;
                out.push((header.clone(), body));
            }
        }
        Ok(out)
    }

    async fn fetch_chunk_with_retries(
        &self,
        peers: &[Hash],
        hashes: &[Hash],
    ) -> Result<Vec<chainsync_common::Body>, SyncError> {
        let mut last_err = SyncError::Timeout(Hash::zero());
        for attempt in 0..self.config.max_retries {
            let peer = *peers
                .get(attempt as usize % peers.len().max(1))
                .ok_or_else(|| SyncError::UnknownPeer(Hash::zero()))?;
            self.mark_active(peer).await;
            let result = self.transport.fetch_bodies(peer, hashes).await;
            self.mark_inactive(peer).await;
            match result {
                Ok(bodies) if bodies.len() == hashes.len() => return Ok(bodies),
                Ok(_) => last_err = SyncError::EmptyResponse(peer),
                Err(_) => last_err = SyncError::Timeout(peer),
            }
        }
        Err(last_err)
    }

    async fn mark_active(&self, peer: Hash) {
        *self.active_jobs.lock().await.entry(peer).or_insert(0) += 1;
    }

    async fn mark_inactive(&self, peer: Hash) {
        if let Some(count) = self.active_jobs.lock().await.get_mut(&peer) {
            *count = count.saturating_sub(1);
        }
    }

    /// Preferred peer among a candidate set: the one with fewest active
    /// jobs right now.
    pub async fn least_busy_peer(&self, candidates: &[Hash]) -> Option<Hash> {
        let active = self.active_jobs.lock().await;
        candidates
            .iter()
            .min_by_key(|p| active.get(*p).copied().unwrap_or(0))
            .copied()
    }

    fn validate(
        &self,
        header: &Header,
        body: &chainsync_common::Body,
    ) -> Result<(), SyncError> {
        // A general transaction-trie hasher is delegated to the
        // StateStore-provided hasher (spec §4.H); only the empty-body
        // shortcut is checked here directly.
        if body.transactions.is_empty() && header.transactions_root != empty_trie_root() {
            return Err(SyncError::HashMismatch {
                expected: empty_trie_root(),
                got: header.transactions_root,
            });
        }
        let withdrawals_consistent = match (&header.withdrawals_root, &body.withdrawals) {
            (None, None) => true,
            (Some(root), Some(withdrawals)) => {
                !withdrawals.is_empty() || *root == empty_trie_root()
            }
            (Some(_), None) | (None, Some(_)) => false,
        };
        if !withdrawals_consistent {
            return Err(SyncError::SlotMismatch(header.hash()));
        }
        Ok(())
    }
}
