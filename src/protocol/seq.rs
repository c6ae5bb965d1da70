//! Comparisons on 32-bit sequence numbers that survive wraparound.
//!
//! RFC 1323 (2.3)
//!
//! TCP determines if a data segment is "old" or "new" by testing whether its
//! sequence number is within 2**31 bytes of the left edge of the window, and
//! if it is not, discarding the data as "old".

/// Returns `true` if `lhs` precedes `rhs`.
#[inline]
pub fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    lhs.wrapping_sub(rhs) > (1 << 31)
}

/// Returns `true` if `lhs` precedes or equals `rhs`.
#[inline]
pub fn wrapping_le(lhs: u32, rhs: u32) -> bool {
    lhs == rhs || wrapping_lt(lhs, rhs)
}

/// Returns the signed distance from `from` to `to`.
#[inline]
pub fn distance(from: u32, to: u32) -> i64 {
    to.wrapping_sub(from) as i32 as i64
}

/// Returns `true` is the value `x` is in between the values `start` and `end`
/// (both exclusive), using wrapping arithmetic.
#[inline]
pub fn is_between_wrapped(start: u32, x: u32, end: u32) -> bool {
    wrapping_lt(start, x) && wrapping_lt(x, end)
}
