pub use ethereum_types::U256;
use ethereum_types::{H160, H256};
use std::fmt;

/// A fixed 32-byte hash-addressed identifier. Comparable and totally
/// ordered by unsigned big-endian byte comparison, which is exactly
/// `H256`'s derived `Ord` impl.
pub type Hash = H256;

/// A fixed 20-byte account identifier.
pub type Address = H160;

/// The all-zero hash, meaning "none" wherever a `Hash` field is optional
/// but represented without an `Option` wrapper (mirrors the teacher's
/// convention of using `H256::zero()` as a sentinel for "unset").
pub fn none_hash() -> Hash {
    H256::zero()
}

/// Root of an empty Merkle-Patricia trie: `keccak256(rlp(""))`, i.e. the
/// hash of the single empty-string RLP byte `0x80`. Kept as a function
/// rather than a `const` because `H256` has no `const fn` constructor
/// from a byte array in this crate's dependency version.
pub fn empty_trie_root() -> Hash {
    H256(chainsync_crypto::keccak256([0x80u8]))
}

/// keccak256 of the empty byte string — the code hash of an account
/// with no deployed bytecode.
pub fn empty_code_hash() -> Hash {
    H256(chainsync_crypto::empty_keccak256())
}

/// Maximum value a `Hash` can take: all bytes set to `0xFF`.
pub fn max_hash() -> Hash {
    H256([0xFF; 32])
}

/// Increments a 32-byte unsigned big-endian integer by one.
///
/// Returns `None` on overflow (incrementing [`max_hash`]) rather than
/// wrapping silently, since every caller treats overflow as "the range is
/// exhausted", not as a value to keep computing with.
pub fn hash_increment(h: Hash) -> Option<Hash> {
    let v = U256::from_big_endian(h.as_bytes());
    let (next, overflowed) = v.overflowing_add(U256::one());
    if overflowed {
        None
    } else {
        let bytes = next.to_big_endian();
        Some(H256(bytes))
    }
}

/// An account record in the world state trie.
///
/// Invariants (checked by [`Account::validate`], not by the type
/// system — the teacher's own `AccountState` is likewise a plain
/// struct with invariants enforced at the point of use):
/// - `storage_root == empty_trie_root()` iff the account has no storage.
/// - `code_hash == empty_code_hash()` iff the account has no deployed code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub address_hash: Hash,
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: Hash,
    pub code_hash: Hash,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("account {0:?} claims empty storage root but is not flagged as empty-storage")]
    InconsistentStorageRoot(Hash),
    #[error("account {0:?} claims empty code hash but is not flagged as empty-code")]
    InconsistentCodeHash(Hash),
}

impl Account {
    pub fn has_storage(&self) -> bool {
        self.storage_root != empty_trie_root()
    }

    pub fn has_code(&self) -> bool {
        self.code_hash != empty_code_hash()
    }

    /// RLP-style canonical encoding used only to derive a stable byte
    /// representation for hashing (`[nonce, balance, storage_root,
    /// code_hash]`), matching the field order ethereum clients use for
    /// account-state encoding. A full general-purpose RLP codec is out
    /// of scope (networking transport encoding is a non-goal); this is
    /// a fixed-shape encoder for exactly this one record type.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 32 + 32 + 32);
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        let balance_bytes = self.balance.to_big_endian();
        buf.extend_from_slice(&balance_bytes);
        buf.extend_from_slice(self.storage_root.as_bytes());
        buf.extend_from_slice(self.code_hash.as_bytes());
        buf
    }
}

/// A single storage slot belonging to an account's storage trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSlot {
    pub account_hash: Hash,
    pub slot_hash: Hash,
    pub value: Vec<u8>,
}

/// Deployed contract bytecode, identified by its own hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bytecode {
    pub hash: Hash,
    pub code: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("bytecode hash mismatch: expected {expected:?}, computed {computed:?}")]
pub struct BytecodeHashMismatch {
    pub expected: Hash,
    pub computed: Hash,
}

impl Bytecode {
    pub fn new(code: Vec<u8>) -> Self {
        let hash = H256(chainsync_crypto::keccak256(&code));
        Self { hash, code }
    }

    /// Verifies the invariant `hash == keccak256(code)` (spec I1/§8).
    pub fn validate(&self) -> Result<(), BytecodeHashMismatch> {
        let computed = H256(chainsync_crypto::keccak256(&self.code));
        if computed == self.hash {
            Ok(())
        } else {
            Err(BytecodeHashMismatch {
                expected: self.hash,
                computed,
            })
        }
    }
}

/// A block header. Only the fields the sync core actually validates or
/// hashes are modeled; the full ~15-field Ethereum header also carries
/// fields (logs bloom, gas figures, base fee, blob gas...) this crate
/// never inspects, represented collectively by `extra`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub number: u64,
    pub parent_hash: Hash,
    pub state_root: Hash,
    pub receipt_root: Hash,
    pub transactions_root: Hash,
    pub withdrawals_root: Option<Hash>,
    pub ommers_hash: Hash,
    pub time: u64,
    pub difficulty: U256,
    pub extra: Vec<u8>,
}

impl Header {
    /// The header's own identifying hash, `keccak256(encoding)`. As with
    /// [`Account::encode`], this is a fixed-shape encoder for hashing,
    /// not a general RLP codec.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(128 + self.extra.len());
        buf.extend_from_slice(&self.number.to_be_bytes());
        buf.extend_from_slice(self.parent_hash.as_bytes());
        buf.extend_from_slice(self.state_root.as_bytes());
        buf.extend_from_slice(self.receipt_root.as_bytes());
        buf.extend_from_slice(self.transactions_root.as_bytes());
        buf.extend_from_slice(
            self.withdrawals_root
                .unwrap_or_else(none_hash)
                .as_bytes(),
        );
        buf.extend_from_slice(self.ommers_hash.as_bytes());
        buf.extend_from_slice(&self.time.to_be_bytes());
        let difficulty_bytes = self.difficulty.to_big_endian();
        buf.extend_from_slice(&difficulty_bytes);
        buf.extend_from_slice(&self.extra);
        H256(chainsync_crypto::keccak256(&buf))
    }
}

/// A block body: the ordered transaction and uncle lists, plus the
/// optional withdrawals list introduced by later protocol versions.
/// Transactions and withdrawals are kept as opaque pre-encoded blobs —
/// decoding and executing them is explicitly out of scope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Body {
    pub transactions: Vec<Vec<u8>>,
    pub uncles: Vec<Header>,
    pub withdrawals: Option<Vec<Vec<u8>>>,
}

/// A full block: header plus body. `number()` always agrees with
/// `header.number` by construction (there is no separate field to
/// drift out of sync).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub body: Body,
}

impl Block {
    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}

/// A contiguous, non-overlapping slice of the 256-bit hash space,
/// `[origin, limit]` inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashRange {
    pub origin: Hash,
    pub limit: Hash,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid hash range: origin {origin:?} > limit {limit:?}")]
pub struct InvalidHashRange {
    pub origin: Hash,
    pub limit: Hash,
}

impl HashRange {
    pub fn new(origin: Hash, limit: Hash) -> Result<Self, InvalidHashRange> {
        if origin > limit {
            return Err(InvalidHashRange { origin, limit });
        }
        Ok(Self { origin, limit })
    }

    pub fn contains(&self, h: &Hash) -> bool {
        *h >= self.origin && *h <= self.limit
    }
}

/// Announces a peer-observed block, used to drive the header pipeline's
/// choice of sync target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAnnouncement {
    pub hash: Hash,
    pub number: u64,
    pub peer_id: Hash,
    pub received_at_unix_secs: u64,
}

/// The top-level sync-cycle phase, shared by [`crate::Checkpoint`] and
/// the coordinator/engine state machines that drive through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Phase {
    Init = 0,
    Accounts = 1,
    Storage = 2,
    Codes = 3,
    Heal = 4,
    Verify = 5,
    Done = 6,
    Failed = 7,
    Cancelled = 8,
}

impl Phase {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Phase::Init,
            1 => Phase::Accounts,
            2 => Phase::Storage,
            3 => Phase::Codes,
            4 => Phase::Heal,
            5 => Phase::Verify,
            6 => Phase::Done,
            7 => Phase::Failed,
            8 => Phase::Cancelled,
            _ => return None,
        })
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Init => "init",
            Phase::Accounts => "accounts",
            Phase::Storage => "storage",
            Phase::Codes => "codes",
            Phase::Heal => "heal",
            Phase::Verify => "verify",
            Phase::Done => "done",
            Phase::Failed => "failed",
            Phase::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_storage_and_code_flags() {
        let account = Account {
            address_hash: H256::repeat_byte(0x42),
            nonce: 0,
            balance: U256::zero(),
            storage_root: empty_trie_root(),
            code_hash: empty_code_hash(),
        };
        assert!(!account.has_storage());
        assert!(!account.has_code());
    }

    #[test]
    fn bytecode_validates_matching_hash() {
        let bc = Bytecode::new(vec![0x60, 0x01]);
        assert!(bc.validate().is_ok());
    }

    #[test]
    fn bytecode_rejects_tampered_code() {
        let mut bc = Bytecode::new(vec![0x60, 0x01]);
        bc.code.push(0xFF);
        assert!(bc.validate().is_err());
    }

    #[test]
    fn hash_increment_wraps_detection() {
        assert_eq!(hash_increment(H256::zero()), Some(H256::from_low_u64_be(1)));
        assert_eq!(hash_increment(max_hash()), None);
    }

    #[test]
    fn hash_range_rejects_inverted_bounds() {
        let a = H256::from_low_u64_be(5);
        let b = H256::from_low_u64_be(1);
        assert!(HashRange::new(a, b).is_err());
        assert!(HashRange::new(b, a).is_ok());
    }

    #[test]
    fn header_hash_changes_with_any_field() {
        let h1 = Header {
            number: 1,
            parent_hash: none_hash(),
            state_root: none_hash(),
            receipt_root: none_hash(),
            transactions_root: empty_trie_root(),
            withdrawals_root: None,
            ommers_hash: empty_trie_root(),
            time: 1000,
            difficulty: U256::zero(),
            extra: vec![],
        };
        let mut h2 = h1.clone();
        h2.time = 1001;
        assert_ne!(h1.hash(), h2.hash());
    }
}
