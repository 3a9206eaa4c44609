//! Node shapes and hashing for the binary Merkle trie.
//!
//! The tree is a full-depth (256 level) binary radix trie keyed by the
//! raw bits of a 32-byte hash: a `Leaf` always sits at depth 256, and
//! every other level is a `Branch` with exactly two children. Unlike
//! the teacher's nibble trie there is no path compression (no
//! extension nodes) — this keeps insertion and hashing branch-free and
//! easy to check by hand, at the cost of walking the full 256 levels
//! for every key. That tradeoff is fine at the scale this crate deals
//! with (proofs over at most a few thousand keys) and is called out in
//! the design notes rather than hidden.

use chainsync_crypto::keccak256;
use chainsync_common::Hash;
use std::sync::OnceLock;

pub const KEY_DEPTH: usize = 256;

/// Marker byte preceding every embedded 32-byte child-hash reference in
/// a branch's encoding. `TrieHealer` scans raw node bytes for this
/// marker to discover children without decoding the node's full shape.
pub const HASH_MARKER: u8 = 0xFE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf { value: Vec<u8> },
    Branch { left: Hash, right: Hash },
}

pub fn encode(node: &Node) -> Vec<u8> {
    match node {
        Node::Leaf { value } => {
            let mut buf = Vec::with_capacity(1 + 4 + value.len());
            buf.push(0u8);
            buf.extend((value.len() as u32).to_be_bytes());
            buf.extend(value);
            buf
        }
        Node::Branch { left, right } => {
            let mut buf = Vec::with_capacity(1 + 2 * (1 + 32));
            buf.push(1u8);
            buf.push(HASH_MARKER);
            buf.extend(left.as_bytes());
            buf.push(HASH_MARKER);
            buf.extend(right.as_bytes());
            buf
        }
    }
}

pub fn node_hash(node: &Node) -> Hash {
    Hash::from(keccak256(encode(node)))
}

/// `default_hash(d)` is the canonical hash of an entirely empty subtree
/// rooted at depth `d`. `default_hash(256)` is a fixed sentinel distinct
/// from any real leaf's encoding (no real leaf value is ever hashed
/// starting from that sentinel's preimage, since leaves always carry
/// the `0u8` leaf tag).
fn empty_leaf_sentinel() -> Hash {
    Hash::from(keccak256(b"chainsync-trie-empty-leaf"))
}

fn default_hash_table() -> &'static [Hash; KEY_DEPTH + 1] {
    static TABLE: OnceLock<[Hash; KEY_DEPTH + 1]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [Hash::zero(); KEY_DEPTH + 1];
        table[KEY_DEPTH] = empty_leaf_sentinel();
        for depth in (0..KEY_DEPTH).rev() {
            let child = table[depth + 1];
            table[depth] = node_hash(&Node::Branch {
                left: child,
                right: child,
            });
        }
        table
    })
}

pub fn default_hash(depth: usize) -> Hash {
    default_hash_table()[depth]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_hash_is_consistent_with_branch_of_defaults() {
        let d = default_hash(100);
        let parent = default_hash(99);
        assert_eq!(
            parent,
            node_hash(&Node::Branch {
                left: d,
                right: d
            })
        );
    }

    #[test]
    fn leaf_hash_differs_from_empty_sentinel() {
        let leaf = node_hash(&Node::Leaf { value: vec![] });
        assert_ne!(leaf, default_hash(KEY_DEPTH));
    }

    #[test]
    fn encode_embeds_hash_marker_for_branch_children() {
        let encoded = encode(&Node::Branch {
            left: Hash::repeat_byte(0x11),
            right: Hash::repeat_byte(0x22),
        });
        assert!(encoded.windows(33).any(|w| w[0] == HASH_MARKER && w[1..] == Hash::repeat_byte(0x11).as_bytes()[..]));
    }
}
