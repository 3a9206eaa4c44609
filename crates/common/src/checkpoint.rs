//! Fixed-width binary checkpoint record (spec §6), suitable for an
//! atomic single-`write` persistence call by the coordinator.

use crate::types::{Hash, Phase};

/// Total encoded length in bytes:
/// `4 (phase) + 8 (pivot_block) + 32 (pivot_root) + 32 (last_account_key)
///  + 8*5 (counters + timestamp) = 124`.
pub const CHECKPOINT_LEN: usize = 124;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub phase: Phase,
    pub pivot_block: u64,
    pub pivot_root: Hash,
    pub last_account_key: Hash,
    pub accounts_done: u64,
    pub storage_done: u64,
    pub codes_done: u64,
    pub heal_nodes_done: u64,
    pub bytes_total: u64,
    pub timestamp_unix_secs: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CheckpointDecodeError {
    #[error("checkpoint buffer too short: got {0} bytes, need at least {CHECKPOINT_LEN}")]
    TooShort(usize),
    #[error("unknown phase discriminant: {0}")]
    UnknownPhase(u32),
}

impl Checkpoint {
    /// Encodes to exactly [`CHECKPOINT_LEN`] bytes, big-endian throughout.
    pub fn encode(&self) -> [u8; CHECKPOINT_LEN] {
        let mut buf = [0u8; CHECKPOINT_LEN];
        let mut at = 0;

        buf[at..at + 4].copy_from_slice(&(self.phase as u32).to_be_bytes());
        at += 4;
        buf[at..at + 8].copy_from_slice(&self.pivot_block.to_be_bytes());
        at += 8;
        buf[at..at + 32].copy_from_slice(self.pivot_root.as_bytes());
        at += 32;
        buf[at..at + 32].copy_from_slice(self.last_account_key.as_bytes());
        at += 32;
        for counter in [
            self.accounts_done,
            self.storage_done,
            self.codes_done,
            self.heal_nodes_done,
            self.bytes_total,
            self.timestamp_unix_secs,
        ] {
            buf[at..at + 8].copy_from_slice(&counter.to_be_bytes());
            at += 8;
        }
        debug_assert_eq!(at, CHECKPOINT_LEN);
        buf
    }

    /// Decodes a checkpoint from at least [`CHECKPOINT_LEN`] bytes.
    /// Trailing bytes beyond that are ignored for forward compatibility,
    /// but a short buffer is always an error — never zero-padded.
    pub fn decode(buf: &[u8]) -> Result<Self, CheckpointDecodeError> {
        if buf.len() < CHECKPOINT_LEN {
            return Err(CheckpointDecodeError::TooShort(buf.len()));
        }
        let mut at = 0;
        let read_u32 = |buf: &[u8], at: usize| {
            u32::from_be_bytes(buf[at..at + 4].try_into().expect("slice is 4 bytes"))
        };
        let read_u64 = |buf: &[u8], at: usize| {
            u64::from_be_bytes(buf[at..at + 8].try_into().expect("slice is 8 bytes"))
        };
        let read_hash = |buf: &[u8], at: usize| {
            Hash::from_slice(&buf[at..at + 32])
        };

        let phase_raw = read_u32(buf, at);
        let phase =
            Phase::from_u32(phase_raw).ok_or(CheckpointDecodeError::UnknownPhase(phase_raw))?;
        at += 4;

        let pivot_block = read_u64(buf, at);
        at += 8;

        let pivot_root = read_hash(buf, at);
        at += 32;

        let last_account_key = read_hash(buf, at);
        at += 32;

        let accounts_done = read_u64(buf, at);
        at += 8;
        let storage_done = read_u64(buf, at);
        at += 8;
        let codes_done = read_u64(buf, at);
        at += 8;
        let heal_nodes_done = read_u64(buf, at);
        at += 8;
        let bytes_total = read_u64(buf, at);
        at += 8;
        let timestamp_unix_secs = read_u64(buf, at);

        Ok(Self {
            phase,
            pivot_block,
            pivot_root,
            last_account_key,
            accounts_done,
            storage_done,
            codes_done,
            heal_nodes_done,
            bytes_total,
            timestamp_unix_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::H256;

    fn sample() -> Checkpoint {
        Checkpoint {
            phase: Phase::Storage,
            pivot_block: 12345,
            pivot_root: H256::repeat_byte(0xAB),
            last_account_key: H256::repeat_byte(0xCD),
            accounts_done: 1,
            storage_done: 2,
            codes_done: 3,
            heal_nodes_done: 4,
            bytes_total: 5,
            timestamp_unix_secs: 1_700_000_000,
        }
    }

    #[test]
    fn round_trip_is_identity() {
        let checkpoint = sample();
        let encoded = checkpoint.encode();
        assert_eq!(encoded.len(), CHECKPOINT_LEN);
        let decoded = Checkpoint::decode(&encoded).unwrap();
        assert_eq!(checkpoint, decoded);
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let checkpoint = sample();
        let mut encoded = checkpoint.encode().to_vec();
        encoded.extend_from_slice(b"future-use");
        let decoded = Checkpoint::decode(&encoded).unwrap();
        assert_eq!(checkpoint, decoded);
    }

    #[test]
    fn decode_fails_on_short_buffer() {
        let checkpoint = sample();
        let encoded = checkpoint.encode();
        let err = Checkpoint::decode(&encoded[..CHECKPOINT_LEN - 1]).unwrap_err();
        assert_eq!(err, CheckpointDecodeError::TooShort(CHECKPOINT_LEN - 1));
    }

    #[test]
    fn decode_fails_on_unknown_phase() {
        let mut encoded = sample().encode();
        encoded[0..4].copy_from_slice(&255u32.to_be_bytes());
        assert_eq!(
            Checkpoint::decode(&encoded).unwrap_err(),
            CheckpointDecodeError::UnknownPhase(255)
        );
    }
}
