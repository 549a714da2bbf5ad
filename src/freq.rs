//! Fixed-point frequency arithmetic for the fractional (SSCG) PLL multiplier.
//!
//! The multiplier (`MD`) is a 33-bit value: 8 integer bits and 25 fraction
//! bits. All products are taken in one widening u64 multiply; splitting into
//! integer and fractional parts and recombining compounds the truncation
//! error, so don't.

/// Fraction width of the `MD` multiplier.
pub const FRAC_BITS: u32 = 25;

/// Largest encodable multiplier: 33 bits total.
pub const MD_MAX: u64 = (1 << 33) - 1;

/// Multiplier needed to synthesize `target` Hz from `input` Hz, in 2^25
/// fixed point. `None` when the input is absent.
///
/// The result is truncated, so the synthesized rate can land 1 Hz under the
/// target; callers that promise the target rate compensate (see the SSCG
/// PLL's snap rule).
pub fn frac_for_rate(target: u32, input: u32) -> Option<u64> {
    if input == 0 {
        return None;
    }
    Some(((target as u64) << FRAC_BITS) / input as u64)
}

/// `input` Hz scaled by a 2^25 fixed-point multiplier.
///
/// Single widening multiply; sound for any clock below 2 GHz with `md` in
/// the 33-bit range.
pub fn frac_mul(input: u32, md: u64) -> u32 {
    ((input as u64 * md) >> FRAC_BITS) as u32
}

/// Round-to-closest integer division. Divides by zero like `/` does.
pub const fn div_round_closest(n: u64, d: u64) -> u64 {
    (n + d / 2) / d
}
