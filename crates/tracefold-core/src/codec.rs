//! Bit packing for statement identifiers and sub-sequence fingerprints.
//!
//! An encoded statement is a `u32` holding a class id in the high
//! [`CLASS_ID_BITS`] bits and a per-class counter id in the low
//! [`COUNTER_ID_BITS`] bits. Callers must keep `class_id < 2^12` and
//! `counter_id < 2^20`; larger values bleed into the neighbouring field and
//! are not detected.
//!
//! A [`fingerprint`] packs the first and last encoded statement of a
//! sub-sequence into a `u64`. It is a lossy dictionary key: two different
//! sequences can share one, so lookups must compare the full sequences.

/// Bits reserved for the class id.
pub const CLASS_ID_BITS: u32 = 12;
/// Bits reserved for the counter id.
pub const COUNTER_ID_BITS: u32 = 20;

const COUNTER_MASK: u32 = (1 << COUNTER_ID_BITS) - 1;
const LOW_WORD: u64 = 0xFFFF_FFFF;

/// Pack `(class_id, counter_id)` into one statement id.
#[inline]
#[must_use]
pub const fn encode(class_id: u32, counter_id: u32) -> u32 {
    (class_id << COUNTER_ID_BITS) | counter_id
}

/// Class id of an encoded statement.
#[inline]
#[must_use]
pub const fn decode_class_id(encoded: u32) -> u32 {
    encoded >> COUNTER_ID_BITS
}

/// Counter id of an encoded statement.
#[inline]
#[must_use]
pub const fn decode_counter_id(encoded: u32) -> u32 {
    encoded & COUNTER_MASK
}

/// Pack the boundary statements of a sub-sequence into a fingerprint.
#[inline]
#[must_use]
pub const fn fingerprint(first: u32, last: u32) -> u64 {
    ((first as u64) << 32) | (last as u64 & LOW_WORD)
}

/// Fingerprint of a whole sub-sequence.
///
/// Empty sequences map to `0`; a single element `x` maps to `x << 32`
/// (its last word is left empty rather than repeating `x`).
#[must_use]
pub fn fingerprint_of(seq: &[u32]) -> u64 {
    match seq {
        [] => 0,
        [only] => u64::from(*only) << 32,
        [first, .., last] => fingerprint(*first, *last),
    }
}

/// First encoded statement recorded in a fingerprint.
#[inline]
#[must_use]
pub const fn first_of(fp: u64) -> u32 {
    (fp >> 32) as u32
}

/// Last encoded statement recorded in a fingerprint.
#[inline]
#[must_use]
pub const fn last_of(fp: u64) -> u32 {
    (fp & LOW_WORD) as u32
}

/// Class id of the first statement in a fingerprint.
#[inline]
#[must_use]
pub const fn first_class_id(fp: u64) -> u32 {
    decode_class_id(first_of(fp))
}

/// Counter id of the first statement in a fingerprint.
#[inline]
#[must_use]
pub const fn first_counter_id(fp: u64) -> u32 {
    decode_counter_id(first_of(fp))
}

/// Class id of the last statement in a fingerprint.
#[inline]
#[must_use]
pub const fn last_class_id(fp: u64) -> u32 {
    decode_class_id(last_of(fp))
}

/// Counter id of the last statement in a fingerprint.
#[inline]
#[must_use]
pub const fn last_counter_id(fp: u64) -> u32 {
    decode_counter_id(last_of(fp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_decode_example() {
        let e = encode(7, 123_456);
        assert_eq!((decode_class_id(e), decode_counter_id(e)), (7, 123_456));
    }

    #[test]
    fn extreme_ids_fill_all_bits() {
        let e = encode((1 << CLASS_ID_BITS) - 1, (1 << COUNTER_ID_BITS) - 1);
        assert_eq!(e, u32::MAX);
        assert_eq!(encode(0, 0), 0);
    }

    #[test]
    fn fingerprint_accessors() {
        let a = encode(3, 9);
        let b = encode(4000, 1);
        let fp = fingerprint(a, b);
        assert_eq!(first_of(fp), a);
        assert_eq!(last_of(fp), b);
        assert_eq!(first_class_id(fp), 3);
        assert_eq!(first_counter_id(fp), 9);
        assert_eq!(last_class_id(fp), 4000);
        assert_eq!(last_counter_id(fp), 1);
    }

    #[test]
    fn fingerprint_of_edge_cases() {
        assert_eq!(fingerprint_of(&[]), 0);
        assert_eq!(fingerprint_of(&[5]), 5u64 << 32);
        assert_eq!(fingerprint_of(&[5, 1, 2, 6]), fingerprint(5, 6));
        // Lossy: interior elements do not participate.
        assert_eq!(fingerprint_of(&[5, 9, 6]), fingerprint_of(&[5, 6]));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn codec_inverts_within_contract(class in 0u32..(1 << CLASS_ID_BITS), counter in 0u32..(1 << COUNTER_ID_BITS)) {
            let e = encode(class, counter);
            prop_assert_eq!(decode_class_id(e), class);
            prop_assert_eq!(decode_counter_id(e), counter);
        }
    }
}
