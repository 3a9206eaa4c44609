//! Hash-space partitioning and Merkle range-proof verification used by
//! the snap-sync engine to split a fetch across peers and to check
//! that a peer's response is an honest, contiguous slice of the trie
//! it claims to come from.

pub mod bitpath;
pub mod node;
pub mod partition;
pub mod range_proof;

pub use bitpath::BitPath;
pub use partition::{partition, PartitionError};
pub use range_proof::{ExternalRef, RangeProof, RangeProofError, RangeProver, Trie};
