//! The sync core's error taxonomy (spec §7): every fallible operation in
//! this crate returns a variant of [`SyncError`], and every variant is
//! permanently assigned to one of five [`ErrorKind`]s that decide how the
//! caller reacts — retried locally, surfaced to the coordinator, or fatal.
//!
//! Mirrors the teacher's `SyncError` + `is_recoverable()` split in
//! `sync.rs`, generalized from one flat bool into the spec's five-kind
//! taxonomy since several call sites (the coordinator's fallback decision,
//! a worker's retry-vs-surface decision) need more than "is this fatal".

use chainsync_common::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retried with a different peer after a score penalty. Never fatal.
    TransientPeer,
    /// Score penalty, response discarded, retried elsewhere. Never fatal
    /// by itself.
    MalformedPeer,
    /// Returned to the caller; usually a programming error or a normal
    /// shutdown.
    ProtocolState,
    /// Returned synchronously without any state change.
    InputValidation,
    /// Fatal to the affected block/phase; for state sync this triggers a
    /// checkpoint-based restart with a new pivot.
    IntegrityFailure,
    /// Fatal to the affected task; the coordinator decides whether to
    /// restart the phase.
    ResourceExhaustion,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SyncError {
    // -- Transient-peer --
    #[error("request to peer {0:?} timed out")]
    Timeout(Hash),
    #[error("peer {0:?} returned an empty response")]
    EmptyResponse(Hash),
    #[error("peer {0:?} was rate-limited")]
    RateLimited(Hash),

    // -- Malformed-peer --
    #[error("hash mismatch: expected {expected:?}, got {got:?}")]
    HashMismatch { expected: Hash, got: Hash },
    #[error("invalid range proof from peer {0:?}")]
    InvalidProof(Hash),
    #[error("storage slot mismatch for account {0:?}")]
    SlotMismatch(Hash),
    #[error("peer {0:?} returned duplicate content")]
    DuplicateContent(Hash),
    #[error("block has more than the allowed number of uncles")]
    UncleOverflow,

    // -- Protocol-state --
    #[error("a sync cycle is already running")]
    AlreadyRunning,
    #[error("task {0:?} was never requested")]
    NotRequested(Hash),
    #[error("task {0:?} was already processed")]
    AlreadyProcessed(Hash),
    #[error("operation was cancelled")]
    Cancelled,
    #[error("peer transport is closed")]
    Closed,

    // -- Input-validation --
    #[error("invalid range: origin {origin:?} > limit {limit:?}")]
    InvalidRange { origin: Hash, limit: Hash },
    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("unknown peer {0:?}")]
    UnknownPeer(Hash),

    // -- Integrity-failure --
    #[error("verification failed under root {0:?}: {1} node(s) still missing")]
    VerificationFailed(Hash, usize),
    #[error("bad parent hash: block {block} expected parent {expected:?}, got {got:?}")]
    BadParentHash {
        block: u64,
        expected: Hash,
        got: Hash,
    },
    #[error("bad block number: expected {expected}, got {got}")]
    BadBlockNumber { expected: u64, got: u64 },
    #[error("header at block {0} has a timestamp too far in the future")]
    FutureTimestamp(u64),
    #[error("header at block {0} has a timestamp older than its parent")]
    TimestampOrder(u64),
    #[error("reorg depth exceeded the configured maximum")]
    ReorgTooDeep,

    // -- Resource-exhaustion --
    #[error("queue is full")]
    QueueFull,
    #[error("max retries exceeded for task {0:?}")]
    MaxRetriesExceeded(Hash),
    #[error("retry budget exhausted")]
    RetryLimitExhausted,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        use SyncError::*;
        match self {
            Timeout(_) | EmptyResponse(_) | RateLimited(_) => ErrorKind::TransientPeer,
            HashMismatch { .. }
            | InvalidProof(_)
            | SlotMismatch(_)
            | DuplicateContent(_)
            | UncleOverflow => ErrorKind::MalformedPeer,
            AlreadyRunning | NotRequested(_) | AlreadyProcessed(_) | Cancelled | Closed => {
                ErrorKind::ProtocolState
            }
            InvalidRange { .. } | IndexOutOfBounds { .. } | UnknownPeer(_) => {
                ErrorKind::InputValidation
            }
            VerificationFailed(_, _)
            | BadParentHash { .. }
            | BadBlockNumber { .. }
            | FutureTimestamp(_)
            | TimestampOrder(_)
            | ReorgTooDeep => ErrorKind::IntegrityFailure,
            QueueFull | MaxRetriesExceeded(_) | RetryLimitExhausted => {
                ErrorKind::ResourceExhaustion
            }
        }
    }

    /// Transient and malformed-peer errors are absorbed by the worker that
    /// hit them; everything else propagates to the coordinator (spec §7
    /// "Propagation policy").
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientPeer | ErrorKind::MalformedPeer)
    }
}
