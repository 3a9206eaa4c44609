//! Minimal in-memory collaborator fakes shared by this crate's unit
//! tests. Not part of the public API.

use crate::traits::{
    AccountRangeResponse, ChainInserter, PeerTransport, StateExecutor, StateStore,
    StorageRangeResponse, TransportError,
};
use async_trait::async_trait;
use chainsync_common::{Account, Block, Body, Hash, Header};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeTransport {
    pub headers: Mutex<BTreeMap<u64, Header>>,
    pub bodies: Mutex<BTreeMap<Hash, Body>>,
    pub trie_nodes: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn request_account_range(
        &self,
        _peer: Hash,
        _root: Hash,
        _origin: Hash,
        _limit: Hash,
        _soft_byte_limit: u64,
    ) -> Result<AccountRangeResponse, TransportError> {
        Err(TransportError::ProtocolError)
    }

    async fn request_storage_range(
        &self,
        _peer: Hash,
        _root: Hash,
        _account_hashes: &[Hash],
        _origin: Hash,
        _limit: Hash,
        _soft_byte_limit: u64,
    ) -> Result<StorageRangeResponse, TransportError> {
        Err(TransportError::ProtocolError)
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
        let nodes = self.trie_nodes.lock().unwrap();
        Ok(paths
            .iter()
            .map(|p| nodes.get(p).cloned().unwrap_or_default())
            .collect())
    }

    async fn fetch_headers(
        &self,
        _peer: Hash,
        from_number: u64,
        count: u64,
    ) -> Result<Vec<Header>, TransportError> {
        let headers = self.headers.lock().unwrap();
        Ok((from_number..from_number + count)
            .filter_map(|n| headers.get(&n).cloned())
            .collect())
    }

    async fn fetch_bodies(&self, _peer: Hash, hashes: &[Hash]) -> Result<Vec<Body>, TransportError> {
        let bodies = self.bodies.lock().unwrap();
        Ok(hashes
            .iter()
            .filter_map(|h| bodies.get(h).cloned())
            .collect())
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub accounts: Mutex<BTreeMap<Hash, Account>>,
    pub storage: Mutex<BTreeMap<(Hash, Hash), Vec<u8>>>,
    pub bytecodes: Mutex<BTreeMap<Hash, Vec<u8>>>,
    pub trie_nodes: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    pub missing: Mutex<BTreeSet<Vec<u8>>>,
}

#[async_trait]
impl StateStore for FakeStore {
    async fn write_account(&self, address_hash: Hash, account: Account) -> Result<(), String> {
        self.accounts.lock().unwrap().insert(address_hash, account);
        Ok(())
    }

    async fn write_storage(
        &self,
        account_hash: Hash,
        slot_hash: Hash,
        value: Vec<u8>,
    ) -> Result<(), String> {
        self.storage
            .lock()
            .unwrap()
            .insert((account_hash, slot_hash), value);
        Ok(())
    }

    async fn write_bytecode(&self, hash: Hash, code: Vec<u8>) -> Result<(), String> {
        self.bytecodes.lock().unwrap().insert(hash, code);
        Ok(())
    }

    async fn write_trie_node(&self, path: Vec<u8>, bytes: Vec<u8>) -> Result<(), String> {
        self.missing.lock().unwrap().remove(&path);
        self.trie_nodes.lock().unwrap().insert(path, bytes);
        Ok(())
    }

    async fn has_bytecode(&self, hash: Hash) -> bool {
        self.bytecodes.lock().unwrap().contains_key(&hash)
    }

    async fn has_trie_node(&self, path: &[u8]) -> bool {
        self.trie_nodes.lock().unwrap().contains_key(path)
    }

    async fn missing_trie_nodes(&self, _root: Hash, limit: usize) -> Vec<Vec<u8>> {
        self.missing.lock().unwrap().iter().take(limit).cloned().collect()
    }
}

#[derive(Default)]
pub struct FakeChainInserter {
    pub head: Mutex<Option<Block>>,
}

#[async_trait]
impl ChainInserter for FakeChainInserter {
    async fn insert(&self, blocks: Vec<Block>) -> Result<usize, String> {
        let count = blocks.len();
        if let Some(last) = blocks.into_iter().last() {
            *self.head.lock().unwrap() = Some(last);
        }
        Ok(count)
    }

    async fn current_block(&self) -> Block {
        self.head
            .lock()
            .unwrap()
            .clone()
            .expect("current_block called before any insert")
    }
}

pub struct FakeExecutor {
    pub state_root: Hash,
}

#[async_trait]
impl StateExecutor for FakeExecutor {
    async fn execute(&self, _block: &Block) -> Result<(Hash, Vec<Hash>), String> {
        Ok((self.state_root, vec![]))
    }
}
