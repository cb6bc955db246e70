// Resona
// Copyright (c) 2026 The Project Resona Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The shared spectral buffer and its block-floating-point bookkeeping.
//!
//! Inverse quantization leaves every scale-factor band at its own exponent. Before TNS and
//! stereo processing the whole window is brought to one common exponent chosen so that no later
//! stage can overflow 32 bits; every mantissa shift happens here and nowhere else.

use crate::common::{FRAME_LEN, MAX_SFBS, MAX_WINDOWS, SHORT_WIN_LEN};
use crate::fixed::norm;
use crate::tns::TnsData;
use crate::window::WindowInfo;

/// Baseline exponents at or below this level get one extra bit of TNS headroom.
const TNS_HEADROOM_BIAS_LIMIT: i32 = 17;

/// One channel's spectrum for one frame: up to 1024 Q31 mantissas partitioned into windows,
/// with one exponent per window and a finer one per scale-factor band.
///
/// Invariant: after [`SpectralData::normalize_windows`], every band exponent equals its window
/// exponent and every mantissa fits 32 bits through the rest of the pipeline.
#[derive(Clone)]
pub struct SpectralData {
    pub coeffs: [i32; FRAME_LEN],
    pub window_exp: [i32; MAX_WINDOWS],
    pub band_exp: [[i32; MAX_SFBS]; MAX_WINDOWS],
}

impl SpectralData {
    pub fn new() -> Self {
        Self {
            coeffs: [0; FRAME_LEN],
            window_exp: [0; MAX_WINDOWS],
            band_exp: [[0; MAX_SFBS]; MAX_WINDOWS],
        }
    }

    /// Clears the buffer for the next frame.
    pub fn reset(&mut self) {
        self.coeffs = [0; FRAME_LEN];
        self.window_exp = [0; MAX_WINDOWS];
        self.band_exp = [[0; MAX_SFBS]; MAX_WINDOWS];
    }

    /// Absolute line range of band `sfb` within window `w`.
    #[inline(always)]
    pub fn band_range(w: usize, bands: &[usize], sfb: usize, long_win: bool) -> (usize, usize) {
        let base = if long_win { 0 } else { w * SHORT_WIN_LEN };
        (base + bands[sfb], base + bands[sfb + 1])
    }

    /// Right-shifts every mantissa in `start..end` by `shift`, clamped to 31. A zero shift is a
    /// no-op. The caller guarantees the shift is non-negative: band exponents never exceed the
    /// window exponent chosen from them.
    pub fn rescale_band(&mut self, start: usize, end: usize, shift: i32) {
        debug_assert!(shift >= 0);

        let shift = shift.min(31);

        if shift == 0 {
            return;
        }

        for c in self.coeffs[start..end].iter_mut() {
            *c >>= shift;
        }
    }

    /// The common exponent for window `w`: the maximum of its band exponents.
    pub fn window_exponent(&self, w: usize, max_sfb: usize) -> i32 {
        self.band_exp[w][..max_sfb].iter().copied().max().unwrap_or(0)
    }

    /// Extra exponent needed so the TNS synthesis filters of window `w` cannot saturate: for
    /// each filter, its logarithmic gain estimate less the headroom already present across the
    /// filter's band range.
    #[allow(clippy::too_many_arguments)]
    pub fn tns_extra_exponent(
        &self,
        w: usize,
        base_exp: i32,
        tns: &TnsData,
        info: &WindowInfo,
        bands: &[usize],
        rate_idx: usize,
        igf_after_tns: bool,
    ) -> i32 {
        if !tns.is_active(w) {
            return 0;
        }

        let (ranges, n) = tns.resolve(w, info, bands, rate_idx, igf_after_tns);

        let mut extra = 0;

        for &(start, end, f) in &ranges[..n] {
            let mut max_abs = 0i32;

            // Scan the range at the window exponent. Bands still sit at their own exponents, so
            // align each line down by the band's deficit first.
            for sfb in 0..info.max_sfb {
                let (b_start, b_end) = Self::band_range(w, bands, sfb, info.long_win);

                let lo = start.max(b_start);
                let hi = end.min(b_end);

                if lo >= hi {
                    continue;
                }

                let shift = (base_exp - self.band_exp[w][sfb]).min(31);

                for &c in &self.coeffs[lo..hi] {
                    max_abs = max_abs.max((c >> shift).saturating_abs());
                }
            }

            let headroom = norm(max_abs);
            extra = extra.max((tns.filter(w, f).gain_log2() - headroom).max(0));
        }

        if base_exp <= TNS_HEADROOM_BIAS_LIMIT {
            extra += 1;
        }

        extra
    }

    /// Brings every window to its common exponent: computes the window exponent (folding in TNS
    /// headroom when filters are active), rescales each band to it, and records it.
    pub fn normalize_windows(
        &mut self,
        info: &WindowInfo,
        bands: &[usize],
        tns: Option<&TnsData>,
        rate_idx: usize,
        igf_after_tns: bool,
    ) {
        for w in 0..info.num_windows {
            let mut exp = self.window_exponent(w, info.max_sfb);

            if let Some(tns) = tns {
                exp += self.tns_extra_exponent(w, exp, tns, info, bands, rate_idx, igf_after_tns);
            }

            for sfb in 0..info.max_sfb {
                let (start, end) = Self::band_range(w, bands, sfb, info.long_win);
                let shift = exp - self.band_exp[w][sfb];

                self.rescale_band(start, end, shift);
                self.band_exp[w][sfb] = exp;
            }

            self.window_exp[w] = exp;
        }
    }
}

impl Default for SpectralData {
    fn default() -> Self {
        Self::new()
    }
}
