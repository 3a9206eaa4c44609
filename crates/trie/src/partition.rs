//! Splits a `[origin, limit]` hash range into `n` contiguous,
//! non-overlapping sub-ranges of (as close to) equal size, so the snap
//! engine can hand one sub-range to each of several peers.

use chainsync_common::{Hash, HashRange};
use ethereum_types::U256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("origin {origin} is greater than limit {limit}")]
    InvalidRange { origin: Hash, limit: Hash },
}

fn to_u256(hash: Hash) -> U256 {
    U256::from_big_endian(hash.as_bytes())
}

fn to_hash(value: U256) -> Hash {
    let bytes = value.to_big_endian();
    Hash::from(bytes)
}

/// Produces exactly `n` (clamped to `[1, 256]`) contiguous ranges whose
/// union is exactly `[origin, limit]`. Equal-sized except for the last
/// partition, which absorbs whatever remainder doesn't divide evenly.
///
/// If the span is smaller than the requested partition count (only
/// possible with tiny test ranges — the real 256-bit space dwarfs any
/// `n <= 256`), `n` is silently reduced to the span so every partition
/// still covers at least one hash value.
pub fn partition(origin: Hash, limit: Hash, n: usize) -> Result<Vec<HashRange>, PartitionError> {
    if origin > limit {
        return Err(PartitionError::InvalidRange { origin, limit });
    }
    let n = n.clamp(1, 256);

    let origin_u = to_u256(origin);
    let limit_u = to_u256(limit);
    // `diff` never overflows (it's at most `U256::MAX`), but `diff + 1`
    // (the true number of values in the range) does when the range is
    // the entire hash space (origin zero, limit all-`0xFF`). Falling
    // back to dividing `diff` itself in that one case is fine: `n` is
    // at most 256, so the resulting step is still astronomically
    // larger than the rounding error of treating the span as one value
    // short of what it really is.
    let diff = limit_u - origin_u;
    let total_values = diff.checked_add(U256::one());
    let n_u = U256::from(n);
    let n = match total_values {
        Some(total) if total < n_u => total.as_usize().max(1),
        _ => n,
    };
    let step = match total_values {
        Some(total) => total / U256::from(n),
        None => diff / U256::from(n),
    };
    debug_assert!(step >= U256::one(), "shrinking n above must keep every partition non-empty");

    let mut ranges = Vec::with_capacity(n);
    let mut cursor = origin_u;
    for i in 0..n {
        let this_end = if i + 1 == n { limit_u } else { cursor + step - U256::one() };
        let range = HashRange::new(to_hash(cursor), to_hash(this_end))
            .expect("partition bounds are always ordered by construction");
        ranges.push(range);
        if i + 1 != n {
            cursor += step;
        }
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> Hash {
        Hash::repeat_byte(byte)
    }

    #[test]
    fn covers_the_whole_span_contiguously() {
        let ranges = partition(Hash::zero(), Hash::repeat_byte(0xFF), 16).unwrap();
        assert_eq!(ranges.len(), 16);
        assert_eq!(ranges[0].origin, Hash::zero());
        assert_eq!(ranges[15].limit, Hash::repeat_byte(0xFF));
        for pair in ranges.windows(2) {
            let next_origin = to_u256(pair[1].origin);
            let prev_limit = to_u256(pair[0].limit);
            assert_eq!(next_origin, prev_limit + U256::one());
        }
    }

    #[test]
    fn n_one_returns_the_whole_range_untouched() {
        let ranges = partition(h(0x10), h(0x20), 1).unwrap();
        assert_eq!(ranges, vec![HashRange::new(h(0x10), h(0x20)).unwrap()]);
    }

    #[test]
    fn n_above_256_is_clamped() {
        let ranges = partition(Hash::zero(), Hash::repeat_byte(0xFF), 1000).unwrap();
        assert_eq!(ranges.len(), 256);
    }

    #[test]
    fn n_zero_is_treated_as_one() {
        let ranges = partition(h(0x10), h(0x20), 0).unwrap();
        assert_eq!(ranges.len(), 1);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = partition(h(0x20), h(0x10), 4).unwrap_err();
        assert_eq!(
            err,
            PartitionError::InvalidRange {
                origin: h(0x20),
                limit: h(0x10)
            }
        );
    }

    #[test]
    fn last_partition_absorbs_the_remainder() {
        // span = 22 values split 16 ways: step = 1, remainder = 6, so
        // the last partition covers 7 values instead of 1.
        let ranges = partition(Hash::zero(), to_hash(U256::from(21)), 16).unwrap();
        assert_eq!(ranges.len(), 16);
        let last_span = to_u256(ranges[15].limit) - to_u256(ranges[15].origin) + U256::one();
        assert_eq!(last_span, U256::from(7));
        for r in &ranges[..15] {
            assert_eq!(to_u256(r.limit) - to_u256(r.origin) + U256::one(), U256::from(1));
        }
    }
}
