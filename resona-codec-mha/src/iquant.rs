// Resona
// Copyright (c) 2026 The Project Resona Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inverse quantization: maps a signed code `q` and scale factor to
//! `sign(q) * |q|^(4/3) * 2^(sf/4)` in block-floating-point form.
//!
//! Codes below 1024 resolve through a precomputed mantissa/exponent table. Larger codes take the
//! interpolation path: the table is bracketed at `|q| >> 3` and the 8-step sub-range is linearly
//! interpolated, trading a bounded relative error for O(1) cost.

use resona_core::errors::Result;

use lazy_static::lazy_static;

use crate::common::{validate, MAX_QUANT_MAGNITUDE, MAX_SCALE_FACTOR};
use crate::fixed::{fmult, q31};

lazy_static! {
    /// Mantissa/exponent pairs for i^(4/3), i in 0..=1024. Mantissas are normalized to
    /// [0.5, 1) in Q31 so their leading-zero count is always one.
    static ref POW43_TABLE: [(i32, i32); 1025] = {
        let mut table = [(0i32, 0i32); 1025];
        for (i, entry) in table.iter_mut().enumerate().skip(1) {
            let v = (i as f64).powf(4.0 / 3.0);
            let e = v.log2().floor() as i32 + 1;
            *entry = (q31(v / f64::powi(2.0, e)), e);
        }
        table
    };

    /// The four fractional scale-factor multipliers 2^(lsb/4), pre-halved to Q31 with the
    /// exponent carried by the band.
    static ref SF_FRAC_MANTISSA: [i32; 4] = {
        let mut table = [0i32; 4];
        for (l, entry) in table.iter_mut().enumerate() {
            *entry = q31(f64::powf(2.0, l as f64 / 4.0) / 2.0);
        }
        table
    };
}

/// Q31 interpolation weights r/8 for the sub-range of the interpolation path.
const INTERP_WEIGHT: [i32; 8] = [
    0x0000_0000,
    0x1000_0000,
    0x2000_0000,
    0x3000_0000,
    0x4000_0000,
    0x5000_0000,
    0x6000_0000,
    0x7000_0000,
];

/// Looks up `q^(4/3)` for `q` in 0..=1024. Exact to table precision.
#[inline(always)]
pub fn table_pow43(q: u32) -> (i32, i32) {
    debug_assert!(q <= 1024);
    POW43_TABLE[q as usize]
}

/// Evaluates `q^(4/3)` for `q` in 1024..=8191 by bracketing the table at `q >> 3` and linearly
/// interpolating over the 8-step sub-range. `8^(4/3) = 16` folds into the exponent.
pub fn eval_pow43(q: u32) -> (i32, i32) {
    debug_assert!(q >= 1024 && q <= MAX_QUANT_MAGNITUDE as u32);

    let idx = (q >> 3) as usize;
    let t = INTERP_WEIGHT[(q & 7) as usize];

    let (m_lo, e_lo) = POW43_TABLE[idx];
    let (m_hi, e_hi) = POW43_TABLE[idx + 1];

    // Align both brackets to the larger exponent before interpolating.
    let e = e_lo.max(e_hi);
    let lo = m_lo >> (e - e_lo);
    let hi = m_hi >> (e - e_hi);

    (lo + fmult(t, hi - lo), e + 4)
}

/// Inverse-quantizes one scale-factor band in place.
///
/// `coeffs` holds the raw signed codes on entry and normalized mantissas on return. The returned
/// band exponent accounts for the power-4/3 law, the common normalization of the band, and the
/// scale factor's power-of-2 and fractional contributions. An all-zero band returns exponent 0.
///
/// A magnitude above the architectural ceiling or a scale factor outside 0..=255 is a parse
/// error; the band is left untouched and the frame must be discarded.
pub fn inverse_quantize_band(coeffs: &mut [i32], scale_factor: i32) -> Result<i32> {
    validate!(scale_factor >= 0 && scale_factor <= MAX_SCALE_FACTOR);

    let msb = scale_factor >> 2;
    let lsb = (scale_factor & 3) as usize;

    let mut max_mag = 0;
    for &q in coeffs.iter() {
        validate!(q.unsigned_abs() <= MAX_QUANT_MAGNITUDE as u32);
        max_mag = max_mag.max(q.unsigned_abs());
    }

    if max_mag == 0 {
        return Ok(0);
    }

    let (max_m, max_e) = dequant_magnitude(max_mag);

    // One guard bit on top of the largest line in the band.
    let band_exp = max_e - (max_m.leading_zeros() as i32 - 2);

    for q in coeffs.iter_mut() {
        let mag = q.unsigned_abs();

        if mag == 0 {
            *q = 0;
            continue;
        }

        let (m, e) = dequant_magnitude(mag);

        // Rescale the line to the band exponent, then fold in the fractional multiplier. The
        // shift is non-negative: no line exceeds the band's max.
        let aligned = m >> (band_exp - e);
        let scaled = fmult(aligned, SF_FRAC_MANTISSA[lsb]);

        *q = if *q < 0 { -scaled } else { scaled };
    }

    // +1 for the pre-halved fractional multiplier.
    Ok(band_exp + msb + 1)
}

#[inline(always)]
fn dequant_magnitude(mag: u32) -> (i32, i32) {
    if mag < 1024 {
        table_pow43(mag)
    }
    else {
        eval_pow43(mag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_f64(m: i32, e: i32) -> f64 {
        f64::from(m) * f64::powi(2.0, e - 31)
    }

    #[test]
    fn verify_table_pow43() {
        assert_eq!(table_pow43(0), (0, 0));

        // 1^(4/3) = 1 -> mantissa 0.5 at exponent 1.
        let (m, e) = table_pow43(1);
        assert_eq!(e, 1);
        assert_eq!(m, 1 << 30);

        // 8^(4/3) = 16 exactly.
        let (m, e) = table_pow43(8);
        assert_eq!(e, 5);
        assert_eq!(m, 1 << 30);

        // All mantissas are normalized: exactly one leading zero.
        for q in 1..=1024u32 {
            let (m, _) = table_pow43(q);
            assert_eq!(m.leading_zeros(), 1, "q = {}", q);
        }
    }

    #[test]
    fn verify_table_accuracy() {
        for q in 1..=1024u32 {
            let (m, e) = table_pow43(q);
            let exact = f64::from(q).powf(4.0 / 3.0);
            let err = (to_f64(m, e) - exact).abs() / exact;
            assert!(err < 1e-8, "q = {} err = {}", q, err);
        }
    }

    #[test]
    fn verify_eval_pow43_boundary() {
        // The interpolation path at q = 1024 brackets at idx = 128 with zero fraction, so it
        // must agree with the table path within 1 ULP at the table exponent.
        let (mt, et) = table_pow43(1024);
        let (mi, ei) = eval_pow43(1024);

        let aligned_t = mt >> (ei.max(et) - et);
        let aligned_i = mi >> (ei.max(et) - ei);
        assert!((aligned_t - aligned_i).abs() <= 1);
    }

    #[test]
    fn verify_eval_pow43_accuracy() {
        for q in (1024..=8191u32).step_by(7) {
            let (m, e) = eval_pow43(q);
            let exact = f64::from(q).powf(4.0 / 3.0);
            let err = (to_f64(m, e) - exact).abs() / exact;
            // Linear interpolation over an 8-step sub-range of a convex curve: the relative
            // error stays well below 1e-4 across the whole escape range.
            assert!(err < 1e-4, "q = {} err = {}", q, err);
        }
    }

    #[test]
    fn verify_band_dequant_single_line() {
        // One transmitted code q = 5 at line 0, scale factor 100 (msb = 25, lsb = 0).
        let mut band = [0i32; 128];
        band[0] = 5;

        let exp = inverse_quantize_band(&mut band, 100).unwrap();

        let (m5, e5) = table_pow43(5);

        // Normalization grants one guard bit and the pre-halved lsb multiplier one more.
        assert_eq!(exp, (e5 + 1) + 25 + 1);
        assert_eq!(band[0], m5 >> 2);

        for &c in &band[1..] {
            assert_eq!(c, 0);
        }

        // The reconstructed value is exactly 5^(4/3) * 2^25.
        let exact = 5f64.powf(4.0 / 3.0) * f64::powi(2.0, 25);
        let got = to_f64(band[0], exp);
        assert!((got - exact).abs() / exact < 1e-8);
    }

    #[test]
    fn verify_band_dequant_sign_and_lsb() {
        let mut band = [3, -3, 0, 17];

        let exp = inverse_quantize_band(&mut band, 7).unwrap();

        assert_eq!(band[0], -band[1]);
        assert_eq!(band[2], 0);
        assert!(band[3] > band[0]);

        // msb = 1, lsb = 3: value = |q|^(4/3) * 2^(3/4) * 2.
        let exact = 17f64.powf(4.0 / 3.0) * f64::powf(2.0, 0.75) * 2.0;
        let got = to_f64(band[3], exp);
        assert!((got - exact).abs() / exact < 1e-6);
    }

    #[test]
    fn verify_band_dequant_all_zero() {
        let mut band = [0i32; 16];
        assert_eq!(inverse_quantize_band(&mut band, 210).unwrap(), 0);
        assert!(band.iter().all(|&c| c == 0));
    }

    #[test]
    fn verify_band_dequant_rejects_overflow() {
        let mut band = [0i32; 4];
        band[2] = 8192;
        assert!(inverse_quantize_band(&mut band, 0).is_err());

        let mut band = [1i32; 4];
        assert!(inverse_quantize_band(&mut band, 256).is_err());
    }
}
