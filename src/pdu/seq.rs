//! Modulo-128 sequence number arithmetic.
//!
//! N(S) and N(R) are 7-bit counters that wrap. All window checks are
//! circular: whether `x` lies between two endpoints depends on forward
//! distance, not numeric order.

use crate::core::constants::SEQ_MODULUS;

/// The successor of a sequence number.
pub fn next(v: u8) -> u8 {
    (v + 1) % SEQ_MODULUS
}

/// A sequence number advanced by `n`.
pub fn add(v: u8, n: u8) -> u8 {
    ((v as u16 + n as u16) % SEQ_MODULUS as u16) as u8
}

/// Forward distance from `from` to `to` (how many increments of `from`
/// reach `to`).
pub fn distance(from: u8, to: u8) -> u8 {
    ((to as i16 - from as i16).rem_euclid(SEQ_MODULUS as i16)) as u8
}

/// True if `x` lies in the circular closed interval `[lo, hi]`.
///
/// Degenerate case `lo == hi` contains exactly that one number. This is
/// the N(R) validity check: an acknowledgement is acceptable iff
/// `last_nr <= N(R) <= vS` in this circular sense.
pub fn in_range_incl(lo: u8, x: u8, hi: u8) -> bool {
    distance(lo, x) <= distance(lo, hi)
}
