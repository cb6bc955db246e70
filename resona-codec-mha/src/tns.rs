// Resona
// Copyright (c) 2026 The Project Resona Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Temporal noise shaping: an all-pole synthesis filter run over contiguous spectral-line
//! ranges, causal along frequency.
//!
//! Coefficients are transmitted as quantized lattice (PARCOR) values and converted to
//! direct-form LPC here, as a mantissa array with one shared exponent. Each filter application
//! starts from a zero delay line; there is no cross-window history.

use resona_core::errors::Result;
use resona_core::io::ReadBitsLtr;

use lazy_static::lazy_static;

use crate::common::{validate, MAX_WINDOWS, SHORT_WIN_LEN, TNS_MAX_LONG_BANDS, TNS_MAX_SHORT_BANDS};
use crate::fixed::{q31, sat_sub};
use crate::window::WindowInfo;

/// Architectural maximum filter order.
pub const TNS_MAX_ORDER: usize = 12;

/// Maximum number of filters per window.
pub const TNS_MAX_FILT: usize = 4;

lazy_static! {
    /// Inverse-quantized PARCOR values for 3-bit resolution, indexed by the signed code + 4.
    static ref PARCOR_3BIT: [i32; 8] = build_parcor_table(3);

    /// Inverse-quantized PARCOR values for 4-bit resolution, indexed by the signed code + 8.
    static ref PARCOR_4BIT: [i32; 16] = build_parcor_table(4);
}

fn build_parcor_table<const N: usize>(res_bits: u32) -> [i32; N] {
    let fac_base = f64::from(1 << (res_bits - 1));
    let iqfac = (fac_base - 0.5) / std::f64::consts::FRAC_PI_2;
    let iqfac_m = (fac_base + 0.5) / std::f64::consts::FRAC_PI_2;

    let mut table = [0i32; N];
    for (i, entry) in table.iter_mut().enumerate() {
        let c = i as f64 - fac_base;
        *entry = q31((if c >= 0.0 { c / iqfac } else { c / iqfac_m }).sin());
    }
    table
}

/// One TNS filter: a band range counted down from the top, an order, a traversal direction, and
/// direct-form LPC coefficients as Q31 mantissas under a shared exponent.
#[derive(Copy, Clone)]
pub struct TnsFilter {
    pub length: usize,
    pub order: usize,
    pub direction: bool,
    lpc: [i32; TNS_MAX_ORDER],
    lpc_exp: i32,
}

impl TnsFilter {
    fn new() -> Self {
        Self { length: 0, order: 0, direction: false, lpc: [0; TNS_MAX_ORDER], lpc_exp: 0 }
    }

    fn read<B: ReadBitsLtr>(&mut self, bs: &mut B, long_win: bool, coef_res: bool) -> Result<()> {
        self.length = bs.read_bits_leq32(if long_win { 6 } else { 4 })? as usize;
        self.order = bs.read_bits_leq32(if long_win { 5 } else { 3 })? as usize;

        // The legacy syntax can transmit orders the architecture does not support; newer syntax
        // variants cannot encode more than the maximum.
        validate!(self.order <= TNS_MAX_ORDER);

        if self.order > 0 {
            self.direction = bs.read_bool()?;

            let coef_compress = bs.read_bool()?;

            // With compression the most significant bit of each coefficient is not transmitted.
            let mut coef_res_bits = if coef_res { 4u32 } else { 3 };
            if coef_compress {
                coef_res_bits -= 1;
            }

            let sign_mask = 1u32 << (coef_res_bits - 1);
            let neg_mask = !((1u32 << coef_res_bits) - 1);

            let mut parcor = [0i32; TNS_MAX_ORDER];

            for el in parcor[..self.order].iter_mut() {
                let val = bs.read_bits_leq32(coef_res_bits)?;

                let signed = if (val & sign_mask) != 0 { (val | neg_mask) as i32 } else { val as i32 };

                *el = if coef_res {
                    PARCOR_4BIT[(signed + 8) as usize]
                }
                else {
                    PARCOR_3BIT[(signed + 4) as usize]
                };
            }

            self.convert_parcor(&parcor);
        }

        Ok(())
    }

    /// Lattice to direct-form conversion. The recursion runs in 64-bit Q31 so intermediate
    /// coefficients above unity survive; the result is renormalized to a shared exponent.
    fn convert_parcor(&mut self, parcor: &[i32; TNS_MAX_ORDER]) {
        let mut a = [0i64; TNS_MAX_ORDER];
        let mut b = [0i64; TNS_MAX_ORDER];

        for m in 0..self.order {
            let k = i64::from(parcor[m]);

            for i in 0..m {
                b[i] = a[i] + ((k * a[m - 1 - i]) >> 31);
            }
            a[..m].copy_from_slice(&b[..m]);
            a[m] = k;
        }

        // Direct-form coefficients can exceed unity. Find the exponent that renormalizes the
        // largest one back into Q31.
        let max_mag = a[..self.order].iter().map(|c| c.unsigned_abs()).max().unwrap_or(0);

        let headroom = if max_mag == 0 { 32 } else { max_mag.leading_zeros() as i32 - 32 };
        let exp = if headroom < 0 { -headroom } else { 0 };

        for (dst, src) in self.lpc[..self.order].iter_mut().zip(&a[..self.order]) {
            *dst = (src >> exp) as i32;
        }
        self.lpc_exp = exp;
    }

    /// Conservative log2 estimate of the filter's gain, used for saturation headroom: the
    /// ceiling of log2(1 + sum(|lpc|)).
    pub fn gain_log2(&self) -> i32 {
        let sum: i64 = self.lpc[..self.order].iter().map(|&c| i64::from(c.unsigned_abs())).sum();

        // Unity plus the coefficient sum, in Q(31 - lpc_exp).
        let total = sum + (1i64 << (31 - self.lpc_exp));

        let bits = 63 - total.leading_zeros() as i32 - (31 - self.lpc_exp);

        if total & (total - 1) == 0 {
            bits.max(0)
        }
        else {
            (bits + 1).max(0)
        }
    }

    /// Runs the all-pole recursion over `coeffs[start..end]`. The delay line starts zeroed for
    /// every application.
    fn synth_range(&self, coeffs: &mut [i32], start: usize, end: usize) {
        if self.order == 0 || start >= end {
            return;
        }

        let mut state = [0i64; TNS_MAX_ORDER];

        let mut filter = |i: usize| {
            let mut acc = 0i64;
            for j in 0..self.order {
                acc += (i64::from(self.lpc[j]) * state[j]) >> 31;
            }

            // Undo the LPC normalization and subtract the prediction.
            let pred = sat_shl_i64(acc, self.lpc_exp);
            let out = sat_sub(coeffs[i], pred);

            coeffs[i] = out;

            for j in (1..self.order).rev() {
                state[j] = state[j - 1];
            }
            state[0] = i64::from(out);
        };

        if !self.direction {
            for i in start..end {
                filter(i);
            }
        }
        else {
            for i in (start..end).rev() {
                filter(i);
            }
        }
    }
}

#[inline(always)]
fn sat_shl_i64(v: i64, shift: i32) -> i32 {
    let shifted = v.checked_shl(shift as u32).filter(|s| (s >> shift) == v);

    let shifted = match shifted {
        Some(s) => s,
        None if v > 0 => i64::MAX,
        None if v < 0 => i64::MIN,
        None => 0,
    };

    if shifted > i64::from(i32::MAX) {
        i32::MAX
    }
    else if shifted < i64::from(i32::MIN) {
        i32::MIN
    }
    else {
        shifted as i32
    }
}

/// All TNS filters for one frame of a channel.
#[derive(Copy, Clone)]
pub struct TnsData {
    n_filt: [usize; MAX_WINDOWS],
    filters: [[TnsFilter; TNS_MAX_FILT]; MAX_WINDOWS],
}

impl TnsData {
    pub fn read<B: ReadBitsLtr>(bs: &mut B, info: &WindowInfo) -> Result<Option<Self>> {
        let tns_data_present = bs.read_bool()?;

        if !tns_data_present {
            return Ok(None);
        }

        let mut n_filt = [0usize; MAX_WINDOWS];
        let mut filters = [[TnsFilter::new(); TNS_MAX_FILT]; MAX_WINDOWS];

        for w in 0..info.num_windows {
            n_filt[w] = bs.read_bits_leq32(if info.long_win { 2 } else { 1 })? as usize;

            let coef_res = if n_filt[w] != 0 { bs.read_bool()? } else { false };

            for filt in 0..n_filt[w] {
                filters[w][filt].read(bs, info.long_win, coef_res)?;
            }
        }

        Ok(Some(TnsData { n_filt, filters }))
    }

    /// True when any filter with a non-zero order targets window `w`.
    pub fn is_active(&self, w: usize) -> bool {
        self.filters[w][..self.n_filt[w]].iter().any(|f| f.order > 0)
    }

    /// Resolves the filters of window `w` to absolute line ranges.
    ///
    /// Filters partition the band axis from the top down; each range clamps against the
    /// per-rate TNS band limit and the transmitted band count. When gap filling runs after TNS
    /// the stop bound extends to the full transmitted band count instead.
    pub fn resolve(
        &self,
        w: usize,
        info: &WindowInfo,
        bands: &[usize],
        rate_idx: usize,
        igf_after_tns: bool,
    ) -> ([(usize, usize, usize); TNS_MAX_FILT], usize) {
        let rate_limit =
            if info.long_win { TNS_MAX_LONG_BANDS[rate_idx] } else { TNS_MAX_SHORT_BANDS[rate_idx] };

        let max_bands = rate_limit.min(info.max_sfb);
        let stop_limit = if igf_after_tns { info.max_sfb } else { max_bands };

        let win_base = w * SHORT_WIN_LEN;

        let mut out = [(0usize, 0usize, 0usize); TNS_MAX_FILT];
        let mut n = 0;

        let mut bottom = bands.len() - 1;

        for f in 0..self.n_filt[w] {
            let top = bottom;
            let filt = &self.filters[w][f];

            bottom = top.saturating_sub(filt.length);

            if filt.order == 0 {
                continue;
            }

            let start = win_base + bands[bottom.min(max_bands)];
            let end = win_base + bands[top.min(stop_limit)];

            if start < end {
                out[n] = (start, end, f);
                n += 1;
            }
        }

        (out, n)
    }

    pub fn filter(&self, w: usize, f: usize) -> &TnsFilter {
        &self.filters[w][f]
    }

    /// Builds a `TnsData` carrying one filter in window 0. Test scaffolding.
    #[cfg(test)]
    pub fn from_filter(filt: TnsFilter) -> Self {
        let mut data = TnsData {
            n_filt: [0; MAX_WINDOWS],
            filters: [[TnsFilter::new(); TNS_MAX_FILT]; MAX_WINDOWS],
        };
        data.n_filt[0] = 1;
        data.filters[0][0] = filt;
        data
    }

    /// Applies every filter of every window in transmitted order.
    pub fn synth(
        &self,
        info: &WindowInfo,
        bands: &[usize],
        rate_idx: usize,
        igf_after_tns: bool,
        coeffs: &mut [i32],
    ) {
        for w in 0..info.num_windows {
            let (ranges, n) = self.resolve(w, info, bands, rate_idx, igf_after_tns);

            for &(start, end, f) in &ranges[..n] {
                self.filters[w][f].synth_range(coeffs, start, end);
            }
        }
    }
}

/// Builds a filter directly from PARCOR Q31 values. Test scaffolding for the conversion and the
/// recursion without a bitstream.
#[cfg(test)]
pub fn filter_from_parcor(parcor: &[i32], direction: bool) -> TnsFilter {
    let mut filt = TnsFilter::new();
    filt.order = parcor.len();
    filt.direction = direction;

    let mut full = [0i32; TNS_MAX_ORDER];
    full[..parcor.len()].copy_from_slice(parcor);
    filt.convert_parcor(&full);
    filt
}
