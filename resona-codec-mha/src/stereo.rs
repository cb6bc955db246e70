// Resona
// Copyright (c) 2026 The Project Resona Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Joint-stereo reconstruction for one channel pair.
//!
//! Three modes per band and window group, selected by the mid-side mask: pass-through, the
//! simple mid-side fold, and complex stereo prediction. Prediction estimates the missing
//! imaginary (MDST) companion of the downmix by filtering its MDCT with a short kernel chosen
//! by window shape, optionally blended with the previous frame's downmix. That blend is the
//! only cross-frame spectral state in the pipeline.
//!
//! Hard invariant: both channels are brought to one common exponent per window before any fold
//! or prediction runs.

use resona_core::errors::{decode_error, Result};
use resona_core::io::ReadBitsLtr;

use lazy_static::lazy_static;

use crate::common::{validate, FRAME_LEN, MAX_SFBS, MAX_WINDOWS, SHORT_WIN_LEN};
use crate::fixed::{fmult, fmult_div2, q31, sat_add, sat_sub, scale_value};
use crate::pipeline::TileSpectra;
use crate::scale::SpectralData;
use crate::state::ChannelPersistentState;
use crate::window::WindowInfo;

/// Largest magnitude of a decoded prediction coefficient: |alpha| <= 4.0 in steps of 0.1.
const ALPHA_Q_MAX: i16 = 40;

/// Q31 representation of the 0.1 prediction coefficient step.
const ALPHA_STEP: i32 = 214_748_365;

lazy_static! {
    /// Seven-tap MDST estimation kernels over the current frame's downmix, indexed by
    /// (previous shape, current shape). Antisymmetric about the center tap.
    static ref MDST_FILT_CURR: [[i32; 7]; 4] = {
        const COEF: [[f64; 7]; 4] = [
            [0.000000, 0.094497, -0.691151, 0.0, 0.691151, -0.094497, 0.000000],
            [0.022875, 0.075867, -0.663437, 0.0, 0.663437, -0.075867, -0.022875],
            [0.022875, 0.075867, -0.663437, 0.0, 0.663437, -0.075867, -0.022875],
            [0.045748, 0.057238, -0.635722, 0.0, 0.635722, -0.057238, -0.045748],
        ];
        let mut table = [[0i32; 7]; 4];
        for (row, coefs) in table.iter_mut().zip(&COEF) {
            for (dst, &c) in row.iter_mut().zip(coefs) {
                *dst = q31(c);
            }
        }
        table
    };

    /// Three-tap kernels over the previous frame's downmix, symmetric about the center tap.
    static ref MDST_FILT_PREV: [[i32; 3]; 4] = {
        const COEF: [[f64; 3]; 4] = [
            [0.354909, 0.191690, 0.354909],
            [0.347884, 0.204394, 0.347884],
            [0.347884, 0.204394, 0.347884],
            [0.340859, 0.217099, 0.340859],
        ];
        let mut table = [[0i32; 3]; 4];
        for (row, coefs) in table.iter_mut().zip(&COEF) {
            for (dst, &c) in row.iter_mut().zip(coefs) {
                *dst = q31(c);
            }
        }
        table
    };
}

/// Complex stereo prediction side information for one frame, signalled once per element.
///
/// The quantized coefficients are delta-coded at a two-band granularity, either along frequency
/// or against the previous frame's coefficients; the decoded values persist on the channel pair
/// for next-frame deltas.
#[derive(Clone)]
pub struct ComplexPredictionData {
    pub pred_all: bool,
    pub pred_used: [[bool; MAX_SFBS]; MAX_WINDOWS],
    pub pred_dir: bool,
    pub complex_coef: bool,
    pub use_prev_frame: bool,
    pub delta_code_time: bool,
    pub alpha_q_re: [[i16; MAX_SFBS]; MAX_WINDOWS],
    pub alpha_q_im: [[i16; MAX_SFBS]; MAX_WINDOWS],
}

impl ComplexPredictionData {
    pub fn read<B: ReadBitsLtr>(bs: &mut B, info: &WindowInfo) -> Result<Self> {
        let mut data = ComplexPredictionData {
            pred_all: bs.read_bool()?,
            pred_used: [[false; MAX_SFBS]; MAX_WINDOWS],
            pred_dir: false,
            complex_coef: false,
            use_prev_frame: false,
            delta_code_time: false,
            alpha_q_re: [[0; MAX_SFBS]; MAX_WINDOWS],
            alpha_q_im: [[0; MAX_SFBS]; MAX_WINDOWS],
        };

        if data.pred_all {
            for g in 0..info.window_groups {
                for sfb in 0..info.max_sfb {
                    data.pred_used[g][sfb] = true;
                }
            }
        }
        else {
            // One flag per two-band group, replicated to both bands.
            for g in 0..info.window_groups {
                let mut sfb = 0;
                while sfb < info.max_sfb {
                    let used = bs.read_bool()?;
                    data.pred_used[g][sfb] = used;
                    if sfb + 1 < info.max_sfb {
                        data.pred_used[g][sfb + 1] = used;
                    }
                    sfb += 2;
                }
            }
        }

        data.pred_dir = bs.read_bool()?;
        data.complex_coef = bs.read_bool()?;

        if data.complex_coef {
            data.use_prev_frame = bs.read_bool()?;
        }

        data.delta_code_time = bs.read_bool()?;

        Ok(data)
    }

    /// Applies delta decoding to the externally entropy-decoded coefficient deltas.
    ///
    /// Deltas arrive in (group, two-band) order, real then imaginary per group when imaginary
    /// parts are transmitted. Frequency-direction deltas accumulate down the band axis;
    /// time-direction deltas accumulate against the previous frame's persisted coefficients.
    pub fn decode_alphas(
        &mut self,
        deltas: &[i16],
        prev: &ChannelPersistentState,
        info: &WindowInfo,
    ) -> Result<()> {
        let mut pos = 0;

        for g in 0..info.window_groups {
            let mut last_re = 0i16;
            let mut last_im = 0i16;

            let mut sfb = 0;
            while sfb < info.max_sfb {
                if self.pred_used[g][sfb] {
                    validate!(pos < deltas.len());
                    let d_re = deltas[pos];
                    pos += 1;

                    let base_re =
                        if self.delta_code_time { prev.alpha_q_re[g][sfb] } else { last_re };
                    // Widen before summing: an extreme delta would wrap i16 ahead of the
                    // range check.
                    let wide_re = i32::from(base_re) + i32::from(d_re);
                    validate!(wide_re.abs() <= i32::from(ALPHA_Q_MAX));
                    let alpha_re = wide_re as i16;

                    let mut alpha_im = 0i16;
                    if self.complex_coef {
                        validate!(pos < deltas.len());
                        let d_im = deltas[pos];
                        pos += 1;

                        let base_im =
                            if self.delta_code_time { prev.alpha_q_im[g][sfb] } else { last_im };
                        let wide_im = i32::from(base_im) + i32::from(d_im);
                        validate!(wide_im.abs() <= i32::from(ALPHA_Q_MAX));
                        alpha_im = wide_im as i16;
                    }

                    for b in sfb..(sfb + 2).min(info.max_sfb) {
                        self.alpha_q_re[g][b] = alpha_re;
                        self.alpha_q_im[g][b] = alpha_im;
                    }

                    last_re = alpha_re;
                    last_im = alpha_im;
                }
                else {
                    // Untransmitted groups reset the frequency-direction predictor.
                    last_re = 0;
                    last_im = 0;
                }

                sfb += 2;
            }
        }

        Ok(())
    }
}

/// Joint-stereo side information for one frame of a channel pair.
#[derive(Clone)]
pub struct StereoInfo {
    pub ms_mask_present: u8,
    pub ms_used: [[bool; MAX_SFBS]; MAX_WINDOWS],
    pub cplx: Option<ComplexPredictionData>,
}

impl StereoInfo {
    /// Parses the mid-side mask, and the complex-prediction signalling when the mask selects
    /// it. Complex prediction on anything but a valid channel pair is rejected upstream; the
    /// `is_pair` invariant is asserted here.
    pub fn read<B: ReadBitsLtr>(bs: &mut B, info: &WindowInfo, is_pair: bool) -> Result<Self> {
        let ms_mask_present = bs.read_bits_leq32(2)? as u8;

        let mut ms_used = [[false; MAX_SFBS]; MAX_WINDOWS];
        let mut cplx = None;

        match ms_mask_present {
            0 => (),
            1 => {
                for g in 0..info.window_groups {
                    for sfb in 0..info.max_sfb {
                        ms_used[g][sfb] = bs.read_bool()?;
                    }
                }
            }
            2 => {
                for g in 0..info.window_groups {
                    for sfb in 0..info.max_sfb {
                        ms_used[g][sfb] = true;
                    }
                }
            }
            3 => {
                if !is_pair {
                    return decode_error("mha: complex prediction without channel pair");
                }
                cplx = Some(ComplexPredictionData::read(bs, info)?);
            }
            _ => unreachable!(),
        }

        Ok(StereoInfo { ms_mask_present, ms_used, cplx })
    }
}

/// Kernel row for the (previous shape, current shape) combination.
#[inline(always)]
fn shape_index(prev_shape: bool, shape: bool) -> usize {
    (usize::from(prev_shape) << 1) | usize::from(shape)
}

/// Multiplies a spectral mantissa by a quantized prediction coefficient `alpha_q * 0.1`.
#[inline(always)]
fn mul_alpha(alpha_q: i16, x: i32) -> i64 {
    i64::from(fmult(x, ALPHA_STEP)) * i64::from(alpha_q)
}

#[inline(always)]
fn sat_i64(v: i64) -> i32 {
    if v > i64::from(i32::MAX) {
        i32::MAX
    }
    else if v < i64::from(i32::MIN) {
        i32::MIN
    }
    else {
        v as i32
    }
}

/// Reconstructs the output channel pair in place; `left` enters as mid/downmix and `right` as
/// side/residual wherever joint coding is active.
pub struct StereoReconstructor;

impl StereoReconstructor {
    /// Aligns both channels of every window to one common exponent with one bit of headroom.
    /// Must run before any fold or prediction.
    pub fn align_exponents(
        left: &mut SpectralData,
        right: &mut SpectralData,
        info: &WindowInfo,
        bands: &[usize],
    ) {
        for w in 0..info.num_windows {
            let target = left.window_exp[w].max(right.window_exp[w]) + 1;

            for ch in [&mut *left, &mut *right] {
                let shift = target - ch.window_exp[w];

                let (start, _) = SpectralData::band_range(w, bands, 0, info.long_win);
                let (_, end) = SpectralData::band_range(w, bands, info.max_sfb - 1, info.long_win);

                ch.rescale_band(start, end, shift);
                ch.window_exp[w] = target;

                for sfb in 0..info.max_sfb {
                    ch.band_exp[w][sfb] = target;
                }
            }
        }
    }

    /// Runs the full joint-stereo reconstruction for one frame.
    ///
    /// The estimated downmix imaginary part and the downmix saved for the next frame go through
    /// `persistent`; the caller commits that state only after the whole frame decodes cleanly.
    pub fn process(
        left: &mut SpectralData,
        right: &mut SpectralData,
        stereo: &StereoInfo,
        info: &WindowInfo,
        bands: &[usize],
        persistent: &mut ChannelPersistentState,
    ) {
        Self::align_exponents(left, right, info, bands);

        if let Some(cplx) = &stereo.cplx {
            let mut dmx_im = [0i32; FRAME_LEN];

            if cplx.complex_coef {
                let filt_idx = shape_index(info.prev_window_shape, info.window_shape);

                let prev = if cplx.use_prev_frame && persistent.downmix_valid() {
                    Some((&persistent.prev_dmx, &persistent.prev_dmx_exp))
                }
                else {
                    None
                };

                Self::estimate_mdst(
                    &left.coeffs,
                    &left.window_exp,
                    prev,
                    info,
                    filt_idx,
                    &mut dmx_im,
                );
            }

            Self::predict_lines(&mut left.coeffs, &mut right.coeffs, &dmx_im, cplx, info, bands);
        }
        else {
            Self::fold_lines(&mut left.coeffs, &mut right.coeffs, &stereo.ms_used, info, bands);
        }

        // Stage the current downmix for the next frame's MDST estimation. The staged copy is
        // promoted to history by the pipeline's commit step.
        let mut dmx = [0i32; FRAME_LEN];
        for ((d, &l), &r) in dmx.iter_mut().zip(left.coeffs.iter()).zip(right.coeffs.iter()) {
            *d = (l >> 1) + (r >> 1);
        }
        persistent.stage_downmix(&dmx, &left.window_exp);
    }

    /// Repeats the frame's per-band fold decisions across each gap-filling tile pair. Tiles
    /// carry no history, so their MDST estimates never blend a previous frame. Must run after
    /// [`StereoReconstructor::process`]: the main band is reconstructed before any tile.
    pub fn process_tiles(
        left: &mut dyn TileSpectra,
        right: &mut dyn TileSpectra,
        stereo: &StereoInfo,
        info: &WindowInfo,
        bands: &[usize],
    ) {
        let n = left.num_tiles().min(right.num_tiles());

        for t in 0..n {
            let (l_coeffs, l_exp) = left.tile_mut(t);
            let (r_coeffs, r_exp) = right.tile_mut(t);

            for w in 0..info.num_windows {
                let target = l_exp[w].max(r_exp[w]) + 1;

                let (start, end) = Self::window_range(w, info);

                for (coeffs, exp) in [(&mut *l_coeffs, &mut *l_exp), (&mut *r_coeffs, &mut *r_exp)]
                {
                    let shift = (target - exp[w]).min(31);

                    for c in coeffs[start..end].iter_mut() {
                        *c >>= shift;
                    }
                    exp[w] = target;
                }
            }

            if let Some(cplx) = &stereo.cplx {
                let mut dmx_im = [0i32; FRAME_LEN];

                if cplx.complex_coef {
                    let filt_idx = shape_index(info.prev_window_shape, info.window_shape);
                    Self::estimate_mdst(l_coeffs, l_exp, None, info, filt_idx, &mut dmx_im);
                }

                Self::predict_lines(l_coeffs, r_coeffs, &dmx_im, cplx, info, bands);
            }
            else {
                Self::fold_lines(l_coeffs, r_coeffs, &stereo.ms_used, info, bands);
            }
        }
    }

    #[inline(always)]
    fn window_range(w: usize, info: &WindowInfo) -> (usize, usize) {
        if info.long_win {
            (0, FRAME_LEN)
        }
        else {
            (w * SHORT_WIN_LEN, (w + 1) * SHORT_WIN_LEN)
        }
    }

    /// The simple mid-side fold over every masked band.
    fn fold_lines(
        left: &mut [i32; FRAME_LEN],
        right: &mut [i32; FRAME_LEN],
        ms_used: &[[bool; MAX_SFBS]; MAX_WINDOWS],
        info: &WindowInfo,
        bands: &[usize],
    ) {
        for g in 0..info.window_groups {
            let cur_w = info.get_group_start(g);
            let next_w = info.get_group_start(g + 1);

            for sfb in 0..info.max_sfb {
                if !ms_used[g][sfb] {
                    continue;
                }

                for w in cur_w..next_w {
                    let (start, end) = SpectralData::band_range(w, bands, sfb, info.long_win);

                    for i in start..end {
                        let m = left[i];
                        let s = right[i];

                        left[i] = sat_add(m, s);
                        right[i] = sat_sub(m, s);
                    }
                }
            }
        }
    }

    /// Complex prediction over every transmitted band: `side = res - alpha_re * dmx_re -
    /// alpha_im * dmx_im`, then the fold, with the residual sign following the prediction
    /// direction.
    fn predict_lines(
        left: &mut [i32; FRAME_LEN],
        right: &mut [i32; FRAME_LEN],
        dmx_im: &[i32; FRAME_LEN],
        cplx: &ComplexPredictionData,
        info: &WindowInfo,
        bands: &[usize],
    ) {
        let dir_neg = cplx.pred_dir;

        for g in 0..info.window_groups {
            let cur_w = info.get_group_start(g);
            let next_w = info.get_group_start(g + 1);

            for sfb in 0..info.max_sfb {
                if !cplx.pred_used[g][sfb] {
                    continue;
                }

                let alpha_re = cplx.alpha_q_re[g][sfb];
                let alpha_im = cplx.alpha_q_im[g][sfb];

                for w in cur_w..next_w {
                    let (start, end) = SpectralData::band_range(w, bands, sfb, info.long_win);

                    for i in start..end {
                        let dmx = left[i];
                        let res = right[i];

                        let mut pred = mul_alpha(alpha_re, dmx);
                        if cplx.complex_coef {
                            // dmx_im sits at exponent + 1.
                            pred += mul_alpha(alpha_im, dmx_im[i]) << 1;
                        }

                        let side = sat_sub(res, sat_i64(pred));

                        let l = sat_add(dmx, side);
                        let r = sat_sub(dmx, side);

                        left[i] = l;
                        right[i] = if dir_neg { -r } else { r };
                    }
                }
            }
        }
    }

    /// Estimates the downmix MDST by convolving the downmix MDCT with the shape-selected
    /// seven-tap kernel, blending in the previous frame's downmix through the three-tap kernel
    /// when `prev` carries one. Lines outside the window contribute zero. The estimate lives
    /// one exponent above the downmix: the kernel products are multiply-and-halve and the taps
    /// sum above unity.
    fn estimate_mdst(
        coeffs: &[i32; FRAME_LEN],
        window_exp: &[i32; MAX_WINDOWS],
        prev: Option<(&[i32; FRAME_LEN], &[i32; MAX_WINDOWS])>,
        info: &WindowInfo,
        filt_idx: usize,
        dmx_im: &mut [i32; FRAME_LEN],
    ) {
        let curr_filt = &MDST_FILT_CURR[filt_idx];
        let prev_filt = &MDST_FILT_PREV[filt_idx];

        let win_len = if info.long_win { FRAME_LEN } else { SHORT_WIN_LEN };

        for w in 0..info.num_windows {
            let base = w * SHORT_WIN_LEN;

            // Previous-frame mantissas align to the estimate's exponent.
            let prev_shift = prev.map(|(_, pe)| pe[w] - (window_exp[w] + 1)).unwrap_or(0);

            for i in 0..win_len {
                let mut acc = 0i64;

                for (k, &tap) in curr_filt.iter().enumerate() {
                    if tap == 0 {
                        continue;
                    }

                    let j = i as isize + k as isize - 3;
                    if j < 0 || j >= win_len as isize {
                        continue;
                    }

                    acc += i64::from(fmult_div2(tap, coeffs[base + j as usize]));
                }

                if let Some((prev_dmx, _)) = prev {
                    for (k, &tap) in prev_filt.iter().enumerate() {
                        let j = i as isize + k as isize - 1;
                        if j < 0 || j >= win_len as isize {
                            continue;
                        }

                        let p = scale_value(prev_dmx[base + j as usize], prev_shift);
                        acc += i64::from(fmult_div2(tap, p)) << 1;
                    }
                }

                dmx_im[base + i] = sat_i64(acc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::SWB_OFFSET_48K_LONG;
    use resona_core::io::BitReaderLtr;

    fn long_info(max_sfb: usize) -> WindowInfo {
        let mut info = WindowInfo::new();
        info.max_sfb = max_sfb;
        info
    }

    fn ms_all(info: &WindowInfo) -> StereoInfo {
        let mut ms_used = [[false; MAX_SFBS]; MAX_WINDOWS];
        for g in 0..info.window_groups {
            for sfb in 0..info.max_sfb {
                ms_used[g][sfb] = true;
            }
        }
        StereoInfo { ms_mask_present: 2, ms_used, cplx: None }
    }

    fn spec_with(exp: i32, fill: impl Fn(usize) -> i32) -> SpectralData {
        let mut spec = SpectralData::new();
        spec.window_exp = [exp; MAX_WINDOWS];
        spec.band_exp = [[exp; MAX_SFBS]; MAX_WINDOWS];
        for (i, c) in spec.coeffs.iter_mut().enumerate() {
            *c = fill(i);
        }
        spec
    }

    #[test]
    fn verify_align_exponents() {
        let bands = SWB_OFFSET_48K_LONG;
        let info = long_info(40);

        let mut l = spec_with(10, |i| if i < 8 { 1 << 20 } else { 0 });
        let mut r = spec_with(14, |i| if i < 8 { 1 << 20 } else { 0 });

        StereoReconstructor::align_exponents(&mut l, &mut r, &info, &bands);

        assert_eq!(l.window_exp[0], 15);
        assert_eq!(r.window_exp[0], 15);
        assert_eq!(l.coeffs[0], 1 << 15);
        assert_eq!(r.coeffs[0], 1 << 19);
    }

    #[test]
    fn verify_ms_identical_channels() {
        // Scenario: identical L/R with M/S set across the band: L' ~ 2 * L at matched
        // exponent, R' ~ 0.
        let bands = SWB_OFFSET_48K_LONG;
        let info = long_info(40);

        let fill = |i: usize| if i < bands[40] { (i as i32 % 17) * 65536 - 400_000 } else { 0 };
        let mut l = spec_with(12, fill);
        let mut r = spec_with(12, fill);

        let mut persistent = ChannelPersistentState::new(0);
        StereoReconstructor::process(&mut l, &mut r, &ms_all(&info), &info, &bands, &mut persistent);

        for i in 0..bands[40] {
            // At exponent 13, L' equals the original mantissa: (L >> 1) + (L >> 1).
            let expect = 2 * (fill(i) >> 1);
            assert!((l.coeffs[i] - expect).abs() <= 1, "line {}", i);
            assert_eq!(r.coeffs[i], 0);
        }
    }

    #[test]
    fn verify_ms_round_trip() {
        // Forward fold with headroom, then reconstruction, reproduces L and R within 1 ULP at
        // the matched exponent.
        let bands = SWB_OFFSET_48K_LONG;
        let info = long_info(40);

        let l_in = |i: usize| if i < bands[40] { (i as i32 * 2731) % 1_000_000 } else { 0 };
        let r_in = |i: usize| if i < bands[40] { (i as i32 * 7919) % 800_000 - 300_000 } else { 0 };

        // mid = (L + R) / 2, side = (L - R) / 2, transmitted at the source exponent + 1.
        let mut mid = spec_with(13, |i| (l_in(i) >> 2) + (r_in(i) >> 2));
        let mut side = spec_with(13, |i| (l_in(i) >> 2) - (r_in(i) >> 2));

        let mut persistent = ChannelPersistentState::new(0);
        StereoReconstructor::process(
            &mut mid,
            &mut side,
            &ms_all(&info),
            &info,
            &bands,
            &mut persistent,
        );

        // Output exponent is 14: two halvings total.
        for i in 0..bands[40] {
            assert!((mid.coeffs[i] - (l_in(i) >> 2)).abs() <= 2, "L line {}", i);
            assert!((side.coeffs[i] - (r_in(i) >> 2)).abs() <= 2, "R line {}", i);
        }
    }

    #[test]
    fn verify_pass_through_only_realigns() {
        let bands = SWB_OFFSET_48K_LONG;
        let info = long_info(40);

        let mut l = spec_with(10, |i| if i < 64 { 1 << 16 } else { 0 });
        let mut r = spec_with(10, |i| if i < 64 { -(1 << 16) } else { 0 });

        let stereo =
            StereoInfo { ms_mask_present: 0, ms_used: [[false; MAX_SFBS]; MAX_WINDOWS], cplx: None };

        let mut persistent = ChannelPersistentState::new(0);
        StereoReconstructor::process(&mut l, &mut r, &stereo, &info, &bands, &mut persistent);

        assert_eq!(l.window_exp[0], 11);
        assert_eq!(l.coeffs[0], 1 << 15);
        assert_eq!(r.coeffs[0], -(1 << 15));
    }

    #[test]
    fn verify_prediction_zero_alpha_is_ms() {
        // alpha = 0: side = residual, so prediction degenerates to the plain fold.
        let bands = SWB_OFFSET_48K_LONG;
        let info = long_info(40);

        let fill_m = |i: usize| if i < bands[40] { (i as i32 * 1009) % 500_000 } else { 0 };
        let fill_s = |i: usize| if i < bands[40] { (i as i32 * 3571) % 300_000 } else { 0 };

        let mut cplx_l = spec_with(12, fill_m);
        let mut cplx_r = spec_with(12, fill_s);

        let cplx = ComplexPredictionData {
            pred_all: true,
            pred_used: [[true; MAX_SFBS]; MAX_WINDOWS],
            pred_dir: false,
            complex_coef: false,
            use_prev_frame: false,
            delta_code_time: false,
            alpha_q_re: [[0; MAX_SFBS]; MAX_WINDOWS],
            alpha_q_im: [[0; MAX_SFBS]; MAX_WINDOWS],
        };

        let stereo = StereoInfo {
            ms_mask_present: 3,
            ms_used: [[false; MAX_SFBS]; MAX_WINDOWS],
            cplx: Some(cplx),
        };

        let mut ms_l = spec_with(12, fill_m);
        let mut ms_r = spec_with(12, fill_s);

        let mut p0 = ChannelPersistentState::new(0);
        let mut p1 = ChannelPersistentState::new(0);

        StereoReconstructor::process(&mut cplx_l, &mut cplx_r, &stereo, &info, &bands, &mut p0);
        StereoReconstructor::process(&mut ms_l, &mut ms_r, &ms_all(&info), &info, &bands, &mut p1);

        assert_eq!(&cplx_l.coeffs[..], &ms_l.coeffs[..]);
        assert_eq!(&cplx_r.coeffs[..], &ms_r.coeffs[..]);
    }

    #[test]
    fn verify_prediction_direction_sign() {
        let bands = SWB_OFFSET_48K_LONG;
        let info = long_info(40);

        let fill = |i: usize| if i < 32 { 1 << 18 } else { 0 };

        let base = ComplexPredictionData {
            pred_all: true,
            pred_used: [[true; MAX_SFBS]; MAX_WINDOWS],
            pred_dir: false,
            complex_coef: false,
            use_prev_frame: false,
            delta_code_time: false,
            alpha_q_re: [[0; MAX_SFBS]; MAX_WINDOWS],
            alpha_q_im: [[0; MAX_SFBS]; MAX_WINDOWS],
        };

        let run = |dir: bool| {
            let mut cplx = base.clone();
            cplx.pred_dir = dir;
            let stereo = StereoInfo {
                ms_mask_present: 3,
                ms_used: [[false; MAX_SFBS]; MAX_WINDOWS],
                cplx: Some(cplx),
            };
            let mut l = spec_with(12, fill);
            let mut r = spec_with(12, |_| 0);
            let mut p = ChannelPersistentState::new(0);
            StereoReconstructor::process(&mut l, &mut r, &stereo, &info, &bands, &mut p);
            (l.coeffs[0], r.coeffs[0])
        };

        let (l_pos, r_pos) = run(false);
        let (l_neg, r_neg) = run(true);

        assert_eq!(l_pos, l_neg);
        assert_eq!(r_pos, -r_neg);
    }

    #[test]
    fn verify_mdst_estimate_antisymmetric_kernel() {
        // An impulse in the downmix spreads antisymmetrically into the estimate.
        let bands = SWB_OFFSET_48K_LONG;
        let info = long_info(40);

        let l = spec_with(12, |i| if i == 100 { 1 << 24 } else { 0 });

        let mut dmx_im = [0i32; FRAME_LEN];

        StereoReconstructor::estimate_mdst(&l.coeffs, &l.window_exp, None, &info, 0, &mut dmx_im);

        assert_eq!(dmx_im[100], 0);
        assert!((dmx_im[99] + dmx_im[101]).abs() <= 1);
        assert!((dmx_im[98] + dmx_im[102]).abs() <= 1);
        assert!(dmx_im[99] != 0);
    }

    #[test]
    fn verify_tile_path_mirrors_ms_fold() {
        struct OneTile {
            coeffs: [i32; FRAME_LEN],
            exps: [i32; MAX_WINDOWS],
        }

        impl TileSpectra for OneTile {
            fn num_tiles(&self) -> usize {
                1
            }
            fn tile_mut(&mut self, _idx: usize) -> (&mut [i32; FRAME_LEN], &mut [i32; MAX_WINDOWS]) {
                (&mut self.coeffs, &mut self.exps)
            }
        }

        let bands = SWB_OFFSET_48K_LONG;
        let info = long_info(40);

        let fill = |i: usize| if i < bands[40] { (i as i32 * 101) % 40_000 } else { 0 };

        let mut lt = OneTile { coeffs: [0; FRAME_LEN], exps: [12; MAX_WINDOWS] };
        let mut rt = OneTile { coeffs: [0; FRAME_LEN], exps: [12; MAX_WINDOWS] };
        for i in 0..FRAME_LEN {
            lt.coeffs[i] = fill(i);
            rt.coeffs[i] = fill(i);
        }

        StereoReconstructor::process_tiles(&mut lt, &mut rt, &ms_all(&info), &info, &bands);

        // Identical tile mid/side collapses the right tile, same as the primary fold.
        assert_eq!(lt.exps[0], 13);
        for i in 0..bands[40] {
            assert_eq!(lt.coeffs[i], 2 * (fill(i) >> 1));
            assert_eq!(rt.coeffs[i], 0);
        }
    }

    #[test]
    fn verify_cplx_signalling_read() {
        let info = long_info(4);

        // pred_all = 1, pred_dir = 1, complex_coef = 1, use_prev_frame = 0, delta_code_time = 1.
        let buf = [0b1_1_1_0_1_000];
        let mut bs = BitReaderLtr::new(&buf);

        let cplx = ComplexPredictionData::read(&mut bs, &info).unwrap();
        assert!(cplx.pred_all);
        assert!(cplx.pred_used[0][..4].iter().all(|&u| u));
        assert!(cplx.pred_dir);
        assert!(cplx.complex_coef);
        assert!(!cplx.use_prev_frame);
        assert!(cplx.delta_code_time);
    }

    #[test]
    fn verify_stereo_info_rejects_cplx_without_pair() {
        let info = long_info(4);
        // ms_mask_present = 3.
        let buf = [0b11_000000];
        let mut bs = BitReaderLtr::new(&buf);
        assert!(StereoInfo::read(&mut bs, &info, false).is_err());
    }

    #[test]
    fn verify_alpha_delta_decode_frequency() {
        let info = long_info(8);
        let prev = ChannelPersistentState::new(0);

        let mut cplx = ComplexPredictionData {
            pred_all: true,
            pred_used: [[true; MAX_SFBS]; MAX_WINDOWS],
            pred_dir: false,
            complex_coef: false,
            use_prev_frame: false,
            delta_code_time: false,
            alpha_q_re: [[0; MAX_SFBS]; MAX_WINDOWS],
            alpha_q_im: [[0; MAX_SFBS]; MAX_WINDOWS],
        };

        // Four two-band groups: deltas accumulate along frequency.
        cplx.decode_alphas(&[3, -1, 2, 0], &prev, &info).unwrap();

        assert_eq!(cplx.alpha_q_re[0][0], 3);
        assert_eq!(cplx.alpha_q_re[0][1], 3);
        assert_eq!(cplx.alpha_q_re[0][2], 2);
        assert_eq!(cplx.alpha_q_re[0][4], 4);
        assert_eq!(cplx.alpha_q_re[0][6], 4);
    }

    #[test]
    fn verify_alpha_delta_decode_time() {
        let info = long_info(4);

        let mut prev = ChannelPersistentState::new(0);
        prev.alpha_q_re[0][0] = 10;
        prev.alpha_q_re[0][1] = 10;
        prev.alpha_q_re[0][2] = -5;
        prev.alpha_q_re[0][3] = -5;

        let mut cplx = ComplexPredictionData {
            pred_all: true,
            pred_used: [[true; MAX_SFBS]; MAX_WINDOWS],
            pred_dir: false,
            complex_coef: false,
            use_prev_frame: false,
            delta_code_time: true,
            alpha_q_re: [[0; MAX_SFBS]; MAX_WINDOWS],
            alpha_q_im: [[0; MAX_SFBS]; MAX_WINDOWS],
        };

        cplx.decode_alphas(&[-2, 7], &prev, &info).unwrap();

        assert_eq!(cplx.alpha_q_re[0][0], 8);
        assert_eq!(cplx.alpha_q_re[0][2], 2);
    }

    #[test]
    fn verify_alpha_delta_rejects_out_of_range() {
        let info = long_info(2);
        let prev = ChannelPersistentState::new(0);

        let mut cplx = ComplexPredictionData {
            pred_all: true,
            pred_used: [[true; MAX_SFBS]; MAX_WINDOWS],
            pred_dir: false,
            complex_coef: false,
            use_prev_frame: false,
            delta_code_time: false,
            alpha_q_re: [[0; MAX_SFBS]; MAX_WINDOWS],
            alpha_q_im: [[0; MAX_SFBS]; MAX_WINDOWS],
        };

        assert!(cplx.decode_alphas(&[41], &prev, &info).is_err());
    }

    #[test]
    fn verify_alpha_delta_rejects_extreme_delta() {
        // Deltas at the i16 extremes must fail the range check, not wrap the accumulator.
        let info = long_info(2);

        let mut prev = ChannelPersistentState::new(0);
        prev.alpha_q_re[0][0] = ALPHA_Q_MAX;
        prev.alpha_q_im[0][0] = ALPHA_Q_MAX;

        let base = ComplexPredictionData {
            pred_all: true,
            pred_used: [[true; MAX_SFBS]; MAX_WINDOWS],
            pred_dir: false,
            complex_coef: true,
            use_prev_frame: false,
            delta_code_time: false,
            alpha_q_re: [[0; MAX_SFBS]; MAX_WINDOWS],
            alpha_q_im: [[0; MAX_SFBS]; MAX_WINDOWS],
        };

        let mut cplx = base.clone();
        assert!(cplx.decode_alphas(&[i16::MIN, 0], &prev, &info).is_err());

        let mut cplx = base.clone();
        assert!(cplx.decode_alphas(&[0, i16::MAX], &prev, &info).is_err());

        // Time-direction base at the positive bound plus a maximal delta.
        let mut cplx = base;
        cplx.delta_code_time = true;
        assert!(cplx.decode_alphas(&[i16::MAX, 0], &prev, &info).is_err());
    }

    #[test]
    fn verify_mdst_prev_frame_blend() {
        // With an empty current downmix the estimate comes entirely from the previous frame's
        // three-tap kernel.
        let info = long_info(40);

        let cur = spec_with(12, |_| 0);

        let mut prev_dmx = [0i32; FRAME_LEN];
        prev_dmx[100] = 1 << 20;

        // History at the estimate's own exponent (12 + 1).
        let prev_exp = [13i32; MAX_WINDOWS];

        let mut dmx_im = [0i32; FRAME_LEN];
        StereoReconstructor::estimate_mdst(
            &cur.coeffs,
            &cur.window_exp,
            Some((&prev_dmx, &prev_exp)),
            &info,
            0,
            &mut dmx_im,
        );

        // The impulse spreads symmetrically, center tap included.
        assert!(dmx_im[100] != 0);
        assert_eq!(dmx_im[99], dmx_im[101]);
        assert!(dmx_im[99] != 0);
        assert_eq!(dmx_im[98], 0);
        assert_eq!(dmx_im[102], 0);

        // Without history the estimate of an empty downmix is silence.
        let mut no_prev = [0i32; FRAME_LEN];
        StereoReconstructor::estimate_mdst(
            &cur.coeffs,
            &cur.window_exp,
            None,
            &info,
            0,
            &mut no_prev,
        );
        assert_eq!(&no_prev[..], &[0i32; FRAME_LEN][..]);

        // History one exponent above the estimate doubles the blended mantissas.
        let high_exp = [14i32; MAX_WINDOWS];
        let mut dmx_im2 = [0i32; FRAME_LEN];
        StereoReconstructor::estimate_mdst(
            &cur.coeffs,
            &cur.window_exp,
            Some((&prev_dmx, &high_exp)),
            &info,
            0,
            &mut dmx_im2,
        );
        assert!((dmx_im2[100] - 2 * dmx_im[100]).abs() <= 2);
        assert!((dmx_im2[99] - 2 * dmx_im[99]).abs() <= 2);
    }

    #[test]
    fn verify_prediction_uses_committed_downmix() {
        // A silent pair with a nonzero imaginary coefficient reconstructs to silence unless a
        // committed downmix feeds the MDST blend.
        let bands = SWB_OFFSET_48K_LONG;
        let info = long_info(40);

        let cplx = ComplexPredictionData {
            pred_all: true,
            pred_used: [[true; MAX_SFBS]; MAX_WINDOWS],
            pred_dir: false,
            complex_coef: true,
            use_prev_frame: true,
            delta_code_time: false,
            alpha_q_re: [[0; MAX_SFBS]; MAX_WINDOWS],
            alpha_q_im: [[20; MAX_SFBS]; MAX_WINDOWS],
        };

        let stereo = StereoInfo {
            ms_mask_present: 3,
            ms_used: [[false; MAX_SFBS]; MAX_WINDOWS],
            cplx: Some(cplx),
        };

        let run = |with_history: bool| {
            let mut p = ChannelPersistentState::new(0);
            if with_history {
                let mut dmx = [0i32; FRAME_LEN];
                for (i, d) in dmx.iter_mut().enumerate().take(256) {
                    *d = (i as i32 + 1) << 14;
                }
                p.stage_downmix(&dmx, &[13i32; MAX_WINDOWS]);
                p.commit_frame(&info);
                assert!(p.downmix_valid());
            }

            let mut l = spec_with(12, |_| 0);
            let mut r = spec_with(12, |_| 0);
            StereoReconstructor::process(&mut l, &mut r, &stereo, &info, &bands, &mut p);
            (l, r)
        };

        let (l_cold, r_cold) = run(false);
        assert!(l_cold.coeffs.iter().all(|&c| c == 0));
        assert!(r_cold.coeffs.iter().all(|&c| c == 0));

        let (l_hist, r_hist) = run(true);
        assert!(l_hist.coeffs[..256].iter().any(|&c| c != 0));
        assert!(r_hist.coeffs[..256].iter().any(|&c| c != 0));
    }
}
