//! Range-proof construction and verification over the binary trie.
//!
//! Mirrors the teacher's `verify_range` two-edge-proof technique
//! (`crates/common/trie/verify_range.rs`): the verifier reconstructs
//! the claimed `[first_key, last_key]` slice itself from the supplied
//! `(key, value)` pairs, grafts in opaque hash references for whatever
//! lies outside that slice, and accepts the proof only if the result
//! hashes to the claimed root. Any tampering — a dropped key, a
//! swapped value, a forged external reference that actually overlaps
//! the claimed range — changes some hash along the way and the final
//! comparison fails.
//!
//! `build`'s signature differs from the sketch in the written spec
//! (`build(root, keys, values)`): turning a bare root hash back into a
//! proof requires the full trie content, which only the party serving
//! the data actually holds. `build` therefore takes a [`Trie`] (the
//! prover's materialized view) instead of a disembodied root hash; the
//! same information, just addressed by the structure that can actually
//! answer "what's under this subtree" rather than by its hash alone.

use crate::bitpath::BitPath;
use crate::node::{self, Node};
use chainsync_common::Hash;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RangeProof {
    pub keys: Vec<Hash>,
    pub values: Vec<Vec<u8>>,
    pub proof_nodes: Vec<Vec<u8>>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RangeProofError {
    #[error("proof keys are not strictly ascending")]
    UnsortedKeys,
    #[error("proof has {keys} keys but {values} values")]
    KeyValueLengthMismatch { keys: usize, values: usize },
    #[error("reconstructed root does not match the claimed root")]
    RootMismatch,
    #[error("a proof node could not be decoded")]
    MalformedProofNode,
}

/// A boundary reference to a subtree the prover did not materialize
/// because it lies entirely outside the claimed `[first, last]` range.
/// Encoded as `prefix_len(u16) | packed prefix bits | 32-byte hash`,
/// i.e. exactly [`BitPath::encode`] followed by the hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRef {
    pub prefix: BitPath,
    pub hash: Hash,
}

impl ExternalRef {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = self.prefix.encode();
        buf.extend(self.hash.as_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let (prefix, rest) = BitPath::decode(buf)?;
        if rest.len() != 32 {
            return None;
        }
        Some(Self {
            prefix,
            hash: Hash::from_slice(rest),
        })
    }
}

/// A fully materialized set of key/value pairs, as held by whichever
/// side of the wire actually has the data (a `StateStore` in practice).
/// Exists in this crate purely to let [`RangeProver::build`] and the
/// test suite construct realistic proofs against a known root.
#[derive(Debug, Clone, Default)]
pub struct Trie {
    entries: BTreeMap<Hash, Vec<u8>>,
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Hash, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    pub fn root_hash(&self) -> Hash {
        let entries: Vec<(Hash, &[u8])> = self.entries.iter().map(|(k, v)| (*k, v.as_slice())).collect();
        build_subtree_hash(&entries, 0)
    }
}

fn bit_at(key: Hash, depth: usize) -> bool {
    let byte = key.as_bytes()[depth / 8];
    (byte >> (7 - (depth % 8))) & 1 == 1
}

fn partition_by_bit<'a>(entries: &[(Hash, &'a [u8])], depth: usize) -> (Vec<(Hash, &'a [u8])>, Vec<(Hash, &'a [u8])>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for &(k, v) in entries {
        if bit_at(k, depth) {
            right.push((k, v));
        } else {
            left.push((k, v));
        }
    }
    (left, right)
}

fn build_subtree_hash(entries: &[(Hash, &[u8])], depth: usize) -> Hash {
    if entries.is_empty() {
        return node::default_hash(depth);
    }
    if depth == node::KEY_DEPTH {
        debug_assert_eq!(entries.len(), 1, "256 bits of key must uniquely determine a leaf");
        return node::node_hash(&Node::Leaf {
            value: entries[0].1.to_vec(),
        });
    }
    let (left, right) = partition_by_bit(entries, depth);
    let left_hash = build_subtree_hash(&left, depth + 1);
    let right_hash = build_subtree_hash(&right, depth + 1);
    node::node_hash(&Node::Branch {
        left: left_hash,
        right: right_hash,
    })
}

pub struct RangeProver;

impl RangeProver {
    /// Builds a proof for the contiguous slice `[keys[0], keys.last()]`
    /// of `trie`. `keys`/`values` must already be exactly that slice of
    /// `trie`'s contents, sorted ascending; this is the prover's own
    /// data, so it is trusted rather than re-validated here.
    pub fn build(trie: &Trie, keys: &[Hash], values: &[Vec<u8>]) -> RangeProof {
        if keys.is_empty() {
            return RangeProof::default();
        }
        let first = keys[0];
        let last = *keys.last().unwrap();
        let entries: Vec<(Hash, &[u8])> = trie.entries.iter().map(|(k, v)| (*k, v.as_slice())).collect();
        let mut refs = Vec::new();
        collect_external_refs(&entries, 0, &mut Vec::new(), first, last, &mut refs);
        RangeProof {
            keys: keys.to_vec(),
            values: values.to_vec(),
            proof_nodes: refs.iter().map(ExternalRef::encode).collect(),
        }
    }

    /// Verifies `proof` against `root`. On success, returns whether the
    /// verified data shows further keys exist beyond `proof.keys`'
    /// last entry (an external reference strictly to its right) — the
    /// engine combines this with the peer's own `more` flag to decide
    /// whether a sub-range is exhausted.
    pub fn verify(root: Hash, proof: &RangeProof) -> Result<bool, RangeProofError> {
        if proof.keys.len() != proof.values.len() {
            return Err(RangeProofError::KeyValueLengthMismatch {
                keys: proof.keys.len(),
                values: proof.values.len(),
            });
        }
        for pair in proof.keys.windows(2) {
            if pair[0] >= pair[1] {
                return Err(RangeProofError::UnsortedKeys);
            }
        }
        if proof.keys.is_empty() && proof.proof_nodes.is_empty() {
            return Ok(false);
        }

        let first = proof.keys.first().copied();
        let last = proof.keys.last().copied();

        let mut refs = BTreeMap::new();
        let mut more = false;
        for raw in &proof.proof_nodes {
            let r = ExternalRef::decode(raw).ok_or(RangeProofError::MalformedProofNode)?;
            let (min_key, max_key) = r.prefix.key_bounds();
            if let (Some(f), Some(l)) = (first, last) {
                let disjoint = max_key < f || min_key > l;
                if !disjoint {
                    // An honest proof never needs a reference inside the
                    // claimed range; one that does is hiding content.
                    return Err(RangeProofError::MalformedProofNode);
                }
                if min_key > l {
                    more = true;
                }
            }
            refs.insert(r.prefix.bits().to_vec(), r.hash);
        }

        let entries: Vec<(Hash, &[u8])> = proof.keys.iter().zip(proof.values.iter()).map(|(k, v)| (*k, v.as_slice())).collect();
        let computed = build_subtree_hash_with_refs(&entries, 0, &[], &refs);
        if computed != root {
            return Err(RangeProofError::RootMismatch);
        }
        Ok(more)
    }

    pub fn merge(proofs: &[RangeProof]) -> RangeProof {
        let mut combined: BTreeMap<Hash, Vec<u8>> = BTreeMap::new();
        for proof in proofs {
            for (key, value) in proof.keys.iter().zip(proof.values.iter()) {
                combined.insert(*key, value.clone());
            }
        }
        let mut proof_nodes = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for proof in proofs {
            for raw in &proof.proof_nodes {
                if seen.insert(raw.clone()) {
                    proof_nodes.push(raw.clone());
                }
            }
        }
        RangeProof {
            keys: combined.keys().copied().collect(),
            values: combined.values().cloned().collect(),
            proof_nodes,
        }
    }
}

/// Reconstructs a root hash from a claimed `(keys, values)` slice plus
/// a set of external references for whatever the prover left opaque,
/// without ever requiring the full key set. Every subtree not covered
/// by an entry or an external reference is treated as genuinely empty.
fn build_subtree_hash_with_refs(
    entries: &[(Hash, &[u8])],
    depth: usize,
    prefix_bits: &[bool],
    refs: &BTreeMap<Vec<bool>, Hash>,
) -> Hash {
    if entries.is_empty() {
        if let Some(hash) = refs.get(prefix_bits) {
            return *hash;
        }
        return node::default_hash(depth);
    }
    if depth == node::KEY_DEPTH {
        debug_assert_eq!(entries.len(), 1);
        return node::node_hash(&Node::Leaf {
            value: entries[0].1.to_vec(),
        });
    }
    let (left, right) = partition_by_bit(entries, depth);
    let mut left_prefix = prefix_bits.to_vec();
    left_prefix.push(false);
    let mut right_prefix = prefix_bits.to_vec();
    right_prefix.push(true);
    let left_hash = build_subtree_hash_with_refs(&left, depth + 1, &left_prefix, refs);
    let right_hash = build_subtree_hash_with_refs(&right, depth + 1, &right_prefix, refs);
    node::node_hash(&Node::Branch {
        left: left_hash,
        right: right_hash,
    })
}

fn collect_external_refs(
    entries: &[(Hash, &[u8])],
    depth: usize,
    prefix_bits: &mut Vec<bool>,
    first: Hash,
    last: Hash,
    out: &mut Vec<ExternalRef>,
) {
    if entries.is_empty() {
        return;
    }
    let subtree_min = entries.first().unwrap().0;
    let subtree_max = entries.last().unwrap().0;
    if subtree_max < first || subtree_min > last {
        let mut prefix = BitPath::empty();
        for &bit in prefix_bits.iter() {
            prefix = prefix.pushed(bit);
        }
        out.push(ExternalRef {
            prefix,
            hash: build_subtree_hash(entries, depth),
        });
        return;
    }
    if depth == node::KEY_DEPTH {
        return;
    }
    let (left, right) = partition_by_bit(entries, depth);
    prefix_bits.push(false);
    collect_external_refs(&left, depth + 1, prefix_bits, first, last, out);
    prefix_bits.pop();
    prefix_bits.push(true);
    collect_external_refs(&right, depth + 1, prefix_bits, first, last, out);
    prefix_bits.pop();
}
