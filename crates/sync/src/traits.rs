//! Collaborator traits (spec §6 "External interfaces"). The sync core
//! never talks to a wire protocol or a disk directly — it drives these
//! trait objects instead, the same way the teacher's `Syncer` drives
//! `PeerHandler`/`Store`/`Blockchain` without knowing their internals.

use async_trait::async_trait;
use chainsync_common::{Account, Block, Body, Hash};
use chainsync_trie::RangeProof;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRangeResponse {
    pub accounts: Vec<(Hash, Account)>,
    pub more: bool,
    pub proof: RangeProof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRangeResponse {
    pub slots: Vec<(Hash, Hash, Vec<u8>)>,
    pub more: bool,
    pub proof: RangeProof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    ProtocolError,
    Closed,
}

/// The untrusted peer-to-peer network (spec §6 "Peer transport").
#[async_trait]
pub trait PeerTransport: Send + Sync + 'static {
    async fn request_account_range(
        &self,
        peer: Hash,
        root: Hash,
        origin: Hash,
        limit: Hash,
        soft_byte_limit: u64,
    ) -> Result<AccountRangeResponse, TransportError>;

    async fn request_storage_range(
        &self,
        peer: Hash,
        root: Hash,
        account_hashes: &[Hash],
        origin: Hash,
        limit: Hash,
        soft_byte_limit: u64,
    ) -> Result<StorageRangeResponse, TransportError>;

    async fn request_bytecodes(
        &self,
        peer: Hash,
        hashes: &[Hash],
    ) -> Result<Vec<(Hash, Vec<u8>)>, TransportError>;

    /// Returns one entry per requested path, in order; an empty entry
    /// means the peer could not serve that particular node.
    async fn request_trie_nodes(
        &self,
        peer: Hash,
        root: Hash,
        paths: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, TransportError>;

    async fn fetch_headers(
        &self,
        peer: Hash,
        from_number: u64,
        count: u64,
    ) -> Result<Vec<chainsync_common::Header>, TransportError>;

    async fn fetch_bodies(
        &self,
        peer: Hash,
        hashes: &[Hash],
    ) -> Result<Vec<Body>, TransportError>;
}

/// The local, externally-synchronized state store (spec §6 "State
/// store"). The core never holds one of its own locks across a call into
/// this trait (spec §5 "Shared-resource policy").
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn write_account(&self, address_hash: Hash, account: Account) -> Result<(), String>;
    async fn write_storage(
        &self,
        account_hash: Hash,
        slot_hash: Hash,
        value: Vec<u8>,
    ) -> Result<(), String>;
    async fn write_bytecode(&self, hash: Hash, code: Vec<u8>) -> Result<(), String>;
    async fn write_trie_node(&self, path: Vec<u8>, bytes: Vec<u8>) -> Result<(), String>;
    async fn has_bytecode(&self, hash: Hash) -> bool;
    async fn has_trie_node(&self, path: &[u8]) -> bool;
    async fn missing_trie_nodes(&self, root: Hash, limit: usize) -> Vec<Vec<u8>>;
}

/// The local canonical-chain store (spec §6 "Chain inserter").
#[async_trait]
pub trait ChainInserter: Send + Sync {
    async fn insert(&self, blocks: Vec<Block>) -> Result<usize, String>;
    async fn current_block(&self) -> Block;
}

/// State-transition execution, deliberately out of this crate's scope
/// (EVM semantics are a non-goal) and modeled only as a collaborator.
#[async_trait]
pub trait StateExecutor: Send + Sync {
    async fn execute(&self, block: &Block) -> Result<(Hash, Vec<Hash>), String>;
}
