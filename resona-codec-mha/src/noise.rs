// Resona
// Copyright (c) 2026 The Project Resona Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Noise filling for untransmitted spectral content.
//!
//! Runs last in the frame pipeline: emptiness decisions must see real decoded content, and
//! injected samples stay stereo-independent. The sign of every injected line comes from the
//! per-channel LCG, so identical input produces bit-identical noise across runs.

use resona_core::errors::Result;
use resona_core::io::ReadBitsLtr;

use lazy_static::lazy_static;

use crate::common::{
    Lcg, MAX_SCALE_FACTOR, MAX_SFBS, MAX_WINDOWS, NOISE_FILL_START_LONG, NOISE_FILL_START_SHORT,
};
use crate::fixed::{fmult, q31, scale_value};
use crate::pipeline::TileSpectra;
use crate::scale::SpectralData;
use crate::window::WindowInfo;

/// Widest scale-factor band in any supported layout.
const MAX_BAND_WIDTH: usize = 128;

lazy_static! {
    /// Noise magnitudes 2^((level - 14) / 3) for the eight transmitted levels, as
    /// mantissa/exponent pairs with the mantissa normalized to [0.5, 1) in Q31.
    static ref NOISE_LEVEL_TABLE: [(i32, i32); 8] = {
        let mut table = [(0i32, 0i32); 8];
        for (level, entry) in table.iter_mut().enumerate() {
            let v = f64::powf(2.0, (level as f64 - 14.0) / 3.0);
            let e = v.log2().floor() as i32 + 1;
            *entry = (q31(v / f64::powi(2.0, e)), e);
        }
        table
    };

    /// The four fractional scale-factor multipliers 2^(lsb/4), pre-halved to Q31.
    static ref SF_FRAC_MANTISSA: [i32; 4] = {
        let mut table = [0i32; 4];
        for (l, entry) in table.iter_mut().enumerate() {
            *entry = q31(f64::powf(2.0, l as f64 / 4.0) / 2.0);
        }
        table
    };
}

/// Per-frame noise-filling side information: a 3-bit level and a signed scale-factor offset
/// applied to bands that decoded to silence.
#[derive(Copy, Clone)]
pub struct NoiseFillData {
    pub level: u8,
    pub offset: i32,
}

impl NoiseFillData {
    pub fn read<B: ReadBitsLtr>(bs: &mut B) -> Result<Option<Self>> {
        let noise_fill = bs.read_bool()?;

        if !noise_fill {
            return Ok(None);
        }

        let level = bs.read_bits_leq32(3)? as u8;
        let offset = bs.read_bits_leq32(5)? as i32 - 16;

        Ok(Some(NoiseFillData { level, offset }))
    }

    /// Injects noise into every qualifying band of the spectrum, and replicates the identical
    /// sign-draw sequence into each gap-filling tile so tile/primary energy ratios stay stable.
    ///
    /// Bands starting below the block-length-dependent offset never fill. A band that decoded
    /// to all zeros fills every line with its scale factor shifted by `offset`; otherwise only
    /// the individual zero lines fill. Always succeeds; a frame with no qualifying band is a
    /// no-op.
    #[allow(clippy::too_many_arguments)]
    pub fn apply(
        &self,
        spec: &mut SpectralData,
        info: &WindowInfo,
        bands: &[usize],
        scale_factors: &[[i32; MAX_SFBS]; MAX_WINDOWS],
        max_noise_sfb: usize,
        lcg: &mut Lcg,
        mut tiles: Option<&mut dyn TileSpectra>,
    ) {
        let start_line =
            if info.long_win { NOISE_FILL_START_LONG } else { NOISE_FILL_START_SHORT };

        let max_noise_sfb = max_noise_sfb.min(info.max_sfb).min(bands.len() - 1);

        for g in 0..info.window_groups {
            let cur_w = info.get_group_start(g);
            let next_w = info.get_group_start(g + 1);

            for sfb in 0..max_noise_sfb {
                if bands[sfb] < start_line {
                    continue;
                }

                for w in cur_w..next_w {
                    self.fill_band(spec, info, bands, scale_factors[g][sfb], w, sfb, lcg, &mut tiles);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_band(
        &self,
        spec: &mut SpectralData,
        info: &WindowInfo,
        bands: &[usize],
        scale_factor: i32,
        w: usize,
        sfb: usize,
        lcg: &mut Lcg,
        tiles: &mut Option<&mut dyn TileSpectra>,
    ) {
        let (start, end) = SpectralData::band_range(w, bands, sfb, info.long_win);

        let all_zero = spec.coeffs[start..end].iter().all(|&c| c == 0);

        // An empty band takes the signalled scale-factor shift; it marks the band as
        // noise-substituted for the rest of the frame.
        let sf = if all_zero { scale_factor + self.offset } else { scale_factor };
        let sf = sf.clamp(0, MAX_SCALE_FACTOR);

        let msb = sf >> 2;
        let lsb = (sf & 3) as usize;

        let (nl_m, nl_e) = NOISE_LEVEL_TABLE[self.level as usize & 7];
        let mantissa = fmult(nl_m, SF_FRAC_MANTISSA[lsb]);

        // Scale the noise magnitude to the band's exponent.
        let shift = (nl_e + 1 + msb) - spec.band_exp[w][sfb];
        let magnitude = scale_value(mantissa, shift);

        let mut injected = [0i32; MAX_BAND_WIDTH];
        let mut any = false;

        for (i, c) in spec.coeffs[start..end].iter_mut().enumerate() {
            if all_zero || *c == 0 {
                // One sign draw per filled line.
                let sign = lcg.next() < 0;
                let value = if sign { -magnitude } else { magnitude };

                *c = value;
                injected[i] = value;
                any = true;
            }
        }

        if !any {
            return;
        }

        // Replicate the identical sign sequence across the auxiliary tile spectra, rescaled to
        // each tile's window exponent.
        if let Some(tiles) = tiles.as_deref_mut() {
            for t in 0..tiles.num_tiles() {
                let (tile_coeffs, tile_exp) = tiles.tile_mut(t);
                let tile_shift = spec.band_exp[w][sfb] - tile_exp[w];

                for (i, c) in tile_coeffs[start..end].iter_mut().enumerate() {
                    if injected[i] != 0 {
                        *c = scale_value(injected[i], tile_shift);
                    }
                }
            }
        }
    }
}
