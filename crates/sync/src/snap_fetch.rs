//! State download state machine: accounts -> storage -> code -> heal ->
//! verify (spec §4.E, "the hardest core").
//!
//! Grounded on the teacher's `sync.rs` (`Syncer`/`SyncMode` phase
//! sequencing) and `sync/snap_sync.rs` (the phase-by-phase
//! account/storage/code flow this engine generalizes onto the binary
//! trie's `RangeProver`).

use crate::error::SyncError;
use crate::heal::TrieHealer;
use crate::peer_registry::{Outcome, PeerRegistry};
use crate::traits::{PeerTransport, StateStore};
use chainsync_common::{empty_code_hash, empty_trie_root, Hash, Phase, SnapConfig};
use chainsync_trie::{partition, RangeProver};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

struct PartitionState {
    limit: Hash,
    cursor: Hash,
    done: bool,
}

pub struct SnapFetchEngine<S: StateStore, T: PeerTransport> {
    store: Arc<S>,
    transport: Arc<T>,
    registry: Arc<PeerRegistry>,
    healer: Arc<TrieHealer<S, T>>,
    config: SnapConfig,
    partition_count: usize,
    phase: Phase,
    partitions: Vec<PartitionState>,
    storage_groups: BTreeMap<Hash, Vec<Hash>>,
    code_pending: HashSet<Hash>,
    accounts_done: u64,
    storage_done: u64,
    codes_done: u64,
}

impl<S: StateStore, T: PeerTransport> SnapFetchEngine<S, T> {
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        registry: Arc<PeerRegistry>,
        healer: Arc<TrieHealer<S, T>>,
        config: SnapConfig,
        partition_count: usize,
    ) -> Self {
        Self {
            store,
            transport,
            registry,
            healer,
            config,
            partition_count,
            phase: Phase::Init,
            partitions: Vec::new(),
            storage_groups: BTreeMap::new(),
            code_pending: HashSet::new(),
            accounts_done: 0,
            storage_done: 0,
            codes_done: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn accounts_done(&self) -> u64 {
        self.accounts_done
    }

    pub fn storage_done(&self) -> u64 {
        self.storage_done
    }

    pub fn codes_done(&self) -> u64 {
        self.codes_done
    }

    /// Drives the whole state machine to completion against `pivot_root`,
    /// running each phase to exhaustion before advancing (spec §4.E).
    pub async fn run(&mut self, pivot_root: Hash, peers: &[Hash]) -> Result<(), SyncError> {
        self.phase = Phase::Accounts;
        let ranges = partition(Hash::zero(), chainsync_common::max_hash(), self.partition_count)
            .map_err(|_| SyncError::InvalidRange {
                origin: Hash::zero(),
                limit: chainsync_common::max_hash(),
            })?;
        self.partitions = ranges
            .into_iter()
            .map(|r| PartitionState {
                limit: r.limit,
                cursor: r.origin,
                done: false,
            })
            .collect();

        self.run_accounts_phase(pivot_root, peers).await?;
        self.phase = Phase::Storage;
        self.run_storage_phase(peers).await?;
        self.phase = Phase::Codes;
        self.run_codes_phase(peers).await?;
        self.phase = Phase::Heal;
        self.healer.detect_gaps(pivot_root, usize::MAX).await;
        let cancel = tokio_util::sync::CancellationToken::new();
        self.healer
            .clone()
            .run(peers.to_vec(), pivot_root, cancel)
            .await?;
        self.phase = Phase::Verify;
        let missing = self.store.missing_trie_nodes(pivot_root, 1).await;
        if !missing.is_empty() {
            self.phase = Phase::Failed;
            return Err(SyncError::VerificationFailed(pivot_root, missing.len()));
        }
        self.phase = Phase::Done;
        Ok(())
    }

    async fn run_accounts_phase(&mut self, pivot_root: Hash, peers: &[Hash]) -> Result<(), SyncError> {
        loop {
            let pending: Vec<usize> = self
                .partitions
                .iter()
                .enumerate()
                .filter(|(_, p)| !p.done)
                .map(|(i, _)| i)
                .collect();
            if pending.is_empty() {
                break;
            }
            for idx in pending {
                self.fetch_account_partition(idx, pivot_root, peers).await?;
            }
        }
        Ok(())
    }

    /// Picks a peer via the registry's selection policy and admits the
    /// request against its rate-limit window, retrying a different
    /// selection when the first candidate is over its window (spec I4:
    /// the in-flight/window count is enforced at the point a request is
    /// actually issued, not just considered at selection time).
    async fn admit_peer(&self, peers: &[Hash]) -> Result<Hash, SyncError> {
        for _ in 0..peers.len().max(1) {
            let candidate = self
                .registry
                .select()
                .await
                .or_else(|| peers.first().copied())
                .ok_or(SyncError::UnknownPeer(Hash::zero()))?;
            if self.registry.try_admit(candidate).await {
                return Ok(candidate);
            }
        }
        Err(SyncError::RateLimited(
            peers.first().copied().unwrap_or(Hash::zero()),
        ))
    }

    async fn fetch_account_partition(
        &mut self,
        idx: usize,
        pivot_root: Hash,
        peers: &[Hash],
    ) -> Result<(), SyncError> {
        let (origin, limit) = {
            let p = &self.partitions[idx];
            (p.cursor, p.limit)
        };
        let mut retries = 0;
        loop {
            let peer = self.admit_peer(peers).await?;
            let response = self
                .transport
                .request_account_range(peer, pivot_root, origin, limit, self.config.soft_byte_limit)
                .await;
            self.registry.release(peer).await;
            let response = match response {
                Ok(r) => r,
                Err(_) => {
                    retries += 1;
                    self.registry.record(peer, Outcome::Empty).await;
                    if retries >= self.config.max_retries {
                        return Err(SyncError::RetryLimitExhausted);
                    }
                    continue;
                }
            };
            if response.accounts.is_empty() {
                self.registry.record(peer, Outcome::Empty).await;
                self.partitions[idx].done = true;
                return Ok(());
            }
            let keys: Vec<Hash> = response.accounts.iter().map(|(k, _)| *k).collect();
            let values: Vec<Vec<u8>> = response.accounts.iter().map(|(_, a)| a.encode()).collect();
            let proof_valid = RangeProver::verify(pivot_root, &response.proof).is_ok();
            // `verify` checks the proof's own root claim; we additionally
            // require the returned account list to match what the proof
            // vouches for, since a peer could otherwise attach a valid
            // proof for a different key range than the accounts it sent.
            if !proof_valid || keys != response.proof.keys || values != response.proof.values {
                self.registry.record(peer, Outcome::Bad).await;
                retries += 1;
                if retries >= self.config.max_retries {
                    return Err(SyncError::RetryLimitExhausted);
                }
                continue;
            }

            for (address_hash, account) in &response.accounts {
                self.store
                    .write_account(*address_hash, account.clone())
                    .await
                    .map_err(|_| SyncError::Closed)?;
                self.accounts_done += 1;
                if account.storage_root != empty_trie_root() {
                    self.storage_groups
                        .entry(account.storage_root)
                        .or_default()
                        .push(*address_hash);
                }
                if account.code_hash != empty_code_hash() {
                    self.code_pending.insert(account.code_hash);
                }
            }
            self.registry.record(peer, Outcome::Good).await;

            let last_key = keys.last().copied().expect("non-empty accounts checked above");
            let partition = &mut self.partitions[idx];
            if !response.more || last_key == partition.limit {
                partition.done = true;
            } else if let Some(next) = chainsync_common::hash_increment(last_key) {
                partition.cursor = next;
            } else {
                partition.done = true;
            }
            return Ok(());
        }
    }

    async fn run_storage_phase(&mut self, peers: &[Hash]) -> Result<(), SyncError> {
        let mut groups: Vec<(Hash, Vec<Hash>)> = self.storage_groups.clone().into_iter().collect();
        groups.sort_by_key(|(_, accounts)| std::cmp::Reverse(accounts.len()));
        for (storage_root, accounts) in groups {
            let mut cursor = Hash::zero();
            let mut retries = 0;
            loop {
                let peer = self.admit_peer(peers).await?;
                let response = self
                    .transport
                    .request_storage_range(
                        peer,
                        storage_root,
                        &accounts,
                        cursor,
                        chainsync_common::max_hash(),
                        self.config.soft_byte_limit,
                    )
                    .await;
                self.registry.release(peer).await;
                let response = match response {
                    Ok(r) => r,
                    Err(_) => {
                        retries += 1;
                        self.registry.record(peer, Outcome::Empty).await;
                        if retries >= self.config.max_retries {
                            return Err(SyncError::RetryLimitExhausted);
                        }
                        continue;
                    }
                };
                if response.slots.is_empty() {
                    self.registry.record(peer, Outcome::Empty).await;
                    break;
                }

                let keys: Vec<Hash> = response.slots.iter().map(|(_, slot_hash, _)| *slot_hash).collect();
                let values: Vec<Vec<u8>> = response.slots.iter().map(|(_, _, v)| v.clone()).collect();
                let proof_valid = RangeProver::verify(storage_root, &response.proof).is_ok();
                if !proof_valid || keys != response.proof.keys || values != response.proof.values {
                    self.registry.record(peer, Outcome::Bad).await;
                    retries += 1;
                    if retries >= self.config.max_retries {
                        return Err(SyncError::RetryLimitExhausted);
                    }
                    continue;
                }

                for (account_hash, slot_hash, value) in &response.slots {
                    self.store
                        .write_storage(*account_hash, *slot_hash, value.clone())
                        .await
                        .map_err(|_| SyncError::Closed)?;
                    self.storage_done += 1;
                }
                self.registry.record(peer, Outcome::Good).await;
                if !response.more {
                    break;
                }
                let last = response
                    .slots
                    .last()
                    .map(|(_, slot_hash, _)| *slot_hash)
                    .expect("non-empty slots checked above");
                match chainsync_common::hash_increment(last) {
                    Some(next) => cursor = next,
                    None => break,
                }
            }
        }
        Ok(())
    }

    async fn run_codes_phase(&mut self, peers: &[Hash]) -> Result<(), SyncError> {
        let mut retries = 0;
        while !self.code_pending.is_empty() {
            let pending: Vec<Hash> = self.code_pending.iter().copied().collect();
            for batch in pending.chunks(self.config.code_batch) {
                let peer = self.admit_peer(peers).await?;
                let codes = self.transport.request_bytecodes(peer, batch).await;
                self.registry.release(peer).await;
                let codes = match codes {
                    Ok(c) => c,
                    Err(_) => {
                        retries += 1;
                        self.registry.record(peer, Outcome::Empty).await;
                        if retries >= self.config.max_retries {
                            return Err(SyncError::RetryLimitExhausted);
                        }
                        continue;
                    }
                };
                let mut any_bad = false;
                for (hash, code) in codes {
                    let computed = Hash::from(chainsync_crypto::keccak256(&code));
                    if computed != hash {
                        any_bad = true;
                        continue;
                    }
                    self.store
                        .write_bytecode(hash, code)
                        .await
                        .map_err(|_| SyncError::Closed)?;
                    self.code_pending.remove(&hash);
                    self.codes_done += 1;
                }
                if any_bad {
                    self.registry.record(peer, Outcome::Bad).await;
                } else {
                    self.registry.record(peer, Outcome::Good).await;
                }
            }
            if !self.code_pending.is_empty() {
                retries += 1;
                if retries >= self.config.max_retries {
                    return Err(SyncError::RetryLimitExhausted);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeStore, FakeTransport};
    use crate::traits::{AccountRangeResponse, TransportError};
    use async_trait::async_trait;
    use chainsync_common::{Account, PeerRegistryConfig, U256};
    use std::sync::Mutex as StdMutex;

    struct SingleBatchTransport {
        accounts: Vec<(Hash, Account)>,
        served: StdMutex<bool>,
    }

    #[async_trait]
    impl PeerTransport for SingleBatchTransport {
        async fn request_account_range(
            &self,
            _peer: Hash,
            root: Hash,
            _origin: Hash,
            _limit: Hash,
            _soft_byte_limit: u64,
        ) -> Result<AccountRangeResponse, TransportError> {
            let mut served = self.served.lock().unwrap();
            if *served {
                return Ok(AccountRangeResponse {
                    accounts: vec![],
                    more: false,
                    proof: Default::default(),
                });
            }
            *served = true;
            let keys: Vec<Hash> = self.accounts.iter().map(|(k, _)| *k).collect();
            let values: Vec<Vec<u8>> = self.accounts.iter().map(|(_, a)| a.encode()).collect();
            let mut trie = chainsync_trie::Trie::new();
            for (k, v) in keys.iter().zip(&values) {
                trie.insert(*k, v.clone());
            }
            assert_eq!(trie.root_hash(), root, "test fixture root must match pivot");
            let proof = RangeProver::build(&trie, &keys, &values);
            Ok(AccountRangeResponse {
                accounts: self.accounts.clone(),
                more: false,
                proof,
            })
        }

        async fn request_storage_range(
            &self,
            _peer: Hash,
            _root: Hash,
            _account_hashes: &[Hash],
            _origin: Hash,
            _limit: Hash,
            _soft_byte_limit: u64,
        ) -> Result<crate::traits::StorageRangeResponse, TransportError> {
            Ok(crate::traits::StorageRangeResponse {
                slots: vec![],
                more: false,
                proof: Default::default(),
            })
        }

        async fn request_bytecodes(
            &self,
            _peer: Hash,
            _hashes: &[Hash],
        ) -> Result<Vec<(Hash, Vec<u8>)>, TransportError> {
            Ok(vec![])
        }

        async fn request_trie_nodes(
            &self,
            _peer: Hash,
            _root: Hash,
            paths: &[Vec<u8>],
        ) -> Result<Vec<Vec<u8>>, TransportError> {
            Ok(vec![Vec::new(); paths.len()])
        }

        async fn fetch_headers(
            &self,
            _peer: Hash,
            _from_number: u64,
            _count: u64,
        ) -> Result<Vec<chainsync_common::Header>, TransportError> {
            Ok(vec![])
        }

        async fn fetch_bodies(
            &self,
            _peer: Hash,
            _hashes: &[Hash],
        ) -> Result<Vec<chainsync_common::Body>, TransportError> {
            Ok(vec![])
        }
    }

    fn account(byte: u8) -> (Hash, Account) {
        let address_hash = Hash::repeat_byte(byte);
        (
            address_hash,
            Account {
                address_hash,
                nonce: 0,
                balance: U256::zero(),
                storage_root: empty_trie_root(),
                code_hash: empty_code_hash(),
            },
        )
    }

    #[tokio::test]
    async fn snap_sync_happy_path_reaches_done() {
        let accounts: Vec<_> = (0..10u8).map(account).collect();
        let mut trie = chainsync_trie::Trie::new();
        for (k, v) in &accounts {
            trie.insert(*k, v.encode());
        }
        let root = trie.root_hash();

        let transport = Arc::new(SingleBatchTransport {
            accounts: accounts.clone(),
            served: StdMutex::new(false),
        });
        let store = Arc::new(FakeStore::default());
        let registry = Arc::new(PeerRegistry::new(PeerRegistryConfig::default()));
        let healer = Arc::new(TrieHealer::new(store.clone(), transport.clone(), 5, 1));
        let mut engine = SnapFetchEngine::new(
            store.clone(),
            transport,
            registry,
            healer,
            SnapConfig::default(),
            1,
        );
        engine.run(root, &[Hash::repeat_byte(1)]).await.unwrap();
        assert_eq!(engine.phase(), Phase::Done);
        assert_eq!(engine.accounts_done(), 10);
        assert_eq!(store.accounts.lock().unwrap().len(), 10);
    }
}
