//! Minimal hashing surface for the sync core.
//!
//! Only keccak256 is needed: accounts, bytecode, headers and trie nodes
//! are all identified by it. Signature schemes, KZG commitments and the
//! rest of a full client's crypto stack are out of scope here.

use tiny_keccak::{Hasher, Keccak};

/// keccak256 of `data`.
pub fn keccak256(data: impl AsRef<[u8]>) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut hasher = Keccak::v256();
    hasher.update(data.as_ref());
    hasher.finalize(&mut out);
    out
}

/// keccak256 of the empty byte string. The root of a trie with no entries,
/// and the code hash of an account with no deployed bytecode, both equal
/// this value by definition of the hash function rather than by a special
/// sentinel, so it is derived rather than hardcoded.
pub fn empty_keccak256() -> [u8; 32] {
    keccak256([])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_of_empty_matches_known_constant() {
        // Well-known keccak256("") value, used throughout Ethereum clients
        // as both EMPTY_TRIE_ROOT's preimage, scaled form, and EMPTY_CODE_HASH.
        let expected =
            hex_literal::hex!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");
        assert_eq!(empty_keccak256(), expected);
    }

    #[test]
    fn different_inputs_hash_differently() {
        assert_ne!(keccak256(b"a"), keccak256(b"b"));
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(keccak256(b"ethrex"), keccak256(b"ethrex"));
    }
}
