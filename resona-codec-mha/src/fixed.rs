// Resona
// Copyright (c) 2026 The Project Resona Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Block-floating-point primitives.
//!
//! Spectral mantissas are `i32` fractions in Q31, nominally [-1, 1), valued under an exponent
//! carried separately per window or per band: `value = mantissa * 2^(exp - 31)`. Arithmetic that
//! could overflow 32 bits saturates silently; saturation must stay bit-exact across platforms,
//! so everything here is plain scalar integer math.

/// Number of redundant sign bits in `x`. Zero reports the full 31 bits of headroom.
#[inline(always)]
pub fn norm(x: i32) -> i32 {
    if x == 0 {
        31
    }
    else {
        (x ^ (x >> 31)).leading_zeros() as i32 - 1
    }
}

/// Fractional multiply-and-halve: `(a * b) / 2` in Q31, computed as a 64-bit product shifted
/// right by 32. Never overflows.
#[inline(always)]
pub fn fmult_div2(a: i32, b: i32) -> i32 {
    ((i64::from(a) * i64::from(b)) >> 32) as i32
}

/// Fractional multiply in Q31 with saturation on `-1 * -1`.
#[inline(always)]
pub fn fmult(a: i32, b: i32) -> i32 {
    let p = (i64::from(a) * i64::from(b)) >> 31;
    sat_i64(p)
}

/// Saturating add on spectral mantissas.
#[inline(always)]
pub fn sat_add(a: i32, b: i32) -> i32 {
    a.saturating_add(b)
}

/// Saturating subtract on spectral mantissas.
#[inline(always)]
pub fn sat_sub(a: i32, b: i32) -> i32 {
    a.saturating_sub(b)
}

/// Scales `value` by `2^shift` with saturation on the way up and arithmetic shift on the way
/// down. Shifts beyond the word width clamp to the sign.
#[inline(always)]
pub fn scale_value(value: i32, shift: i32) -> i32 {
    if shift >= 0 {
        if shift > 31 {
            return if value > 0 {
                i32::MAX
            }
            else if value < 0 {
                i32::MIN
            }
            else {
                0
            };
        }
        sat_i64(i64::from(value) << shift)
    }
    else {
        value >> (-shift).min(31)
    }
}

#[inline(always)]
fn sat_i64(p: i64) -> i32 {
    if p > i64::from(i32::MAX) {
        i32::MAX
    }
    else if p < i64::from(i32::MIN) {
        i32::MIN
    }
    else {
        p as i32
    }
}

/// Converts a unit-range `f64` to Q31, clamping at the representable bounds. Only used when
/// building lookup tables at init.
pub fn q31(x: f64) -> i32 {
    let scaled = x * f64::from(1u32 << 31);
    if scaled >= f64::from(i32::MAX) {
        i32::MAX
    }
    else if scaled <= f64::from(i32::MIN) {
        i32::MIN
    }
    else {
        scaled.round() as i32
    }
}
