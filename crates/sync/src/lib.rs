//! Snap-sync engine, trie healer, and header-first block pipeline,
//! driven by a single coordinator that owns checkpointing and the
//! snap-vs-full decision.
//!
//! The core never touches a wire protocol or a disk directly: every
//! component here is generic over the [`traits::PeerTransport`],
//! [`traits::StateStore`], [`traits::ChainInserter`] and
//! [`traits::StateExecutor`] collaborator traits, the same way the
//! teacher's `Syncer` drives `PeerHandler`/`Store`/`Blockchain` without
//! knowing their wire or disk formats.

pub mod bandwidth;
pub mod block_importer;
pub mod body_pipeline;
pub mod coordinator;
pub mod error;
pub mod heal;
pub mod header_pipeline;
pub mod peer_registry;
pub mod snap_fetch;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use bandwidth::BandwidthEstimator;
pub use block_importer::BlockImporter;
pub use body_pipeline::BodyPipeline;
pub use coordinator::{SyncCoordinator, SyncMode};
pub use error::{ErrorKind, SyncError};
pub use heal::{HealTask, Priority, TrieHealer};
pub use header_pipeline::HeaderPipeline;
pub use peer_registry::{Outcome, PeerRegistry};
pub use snap_fetch::SnapFetchEngine;
pub use traits::{
    AccountRangeResponse, ChainInserter, PeerTransport, StateExecutor, StateStore,
    StorageRangeResponse, TransportError,
};
