//! Bit and work-size arithmetic used to size dispatches.

/// Next power of two greater than or equal to `x`. Zero maps to zero.
#[inline]
pub fn nlpo2(x: usize) -> usize {
    if x == 0 {
        0
    } else {
        x.next_power_of_two()
    }
}

/// Largest power of two less than or equal to `x`. Zero maps to zero.
#[inline]
pub fn flpo2(x: usize) -> usize {
    if x == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - x.leading_zeros())
    }
}

/// Number of set bits in a 32-bit word.
#[inline]
pub fn ones32(x: u32) -> u32 {
    x.count_ones()
}

/// Trailing zero count of a 32-bit word (32 for zero).
#[inline]
pub fn tzc(x: u32) -> u32 {
    ones32((x & x.wrapping_neg()).wrapping_sub(1))
}

#[inline]
pub fn div_ceil(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

/// Rounds a global work size up to a multiple of the local work size.
#[inline]
pub fn gws_mult(gws: usize, lws: usize) -> usize {
    lws * div_ceil(gws, lws)
}

#[inline]
pub fn is_po2(x: usize) -> bool {
    x != 0 && x & (x - 1) == 0
}

/// Exact base-2 logarithm of a power of two.
#[inline]
pub fn log2_po2(x: usize) -> u32 {
    debug_assert!(is_po2(x));
    x.trailing_zeros()
}
