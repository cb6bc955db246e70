// Resona
// Copyright (c) 2026 The Project Resona Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-frame spectral reconstruction pipeline.
//!
//! Stage order is fixed and load-bearing: inverse quantization, then temporal noise shaping,
//! then joint stereo, then noise filling. Noise filling must see the fully reconstructed
//! spectrum so its emptiness decisions reflect real content, and stereo must run on the shaped
//! spectrum the encoder folded.
//!
//! Any parse error inside a frame abandons the whole frame: cross-frame state is staged during
//! decode and promoted only when every stage has succeeded.

use resona_core::errors::Result;

use crate::common::{validate, SubbandInfo, FRAME_LEN, MAX_SFBS, MAX_WINDOWS, SHORT_WIN_LEN};
use crate::iquant::inverse_quantize_band;
use crate::noise::NoiseFillData;
use crate::scale::SpectralData;
use crate::state::ChannelPersistentState;
use crate::stereo::{StereoInfo, StereoReconstructor};
use crate::tns::TnsData;
use crate::window::WindowInfo;

/// Auxiliary spectra for gap-filling tiles, mirroring the primary spectrum's layout. Each tile
/// carries its own per-window exponents.
pub trait TileSpectra {
    fn num_tiles(&self) -> usize;
    fn tile_mut(&mut self, idx: usize) -> (&mut [i32; FRAME_LEN], &mut [i32; MAX_WINDOWS]);
}

/// Joint-coding mode of a channel pair for one frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StereoMode {
    Independent,
    MidSide,
    ComplexPrediction,
}

impl StereoMode {
    pub fn of(stereo: &StereoInfo) -> StereoMode {
        if stereo.cplx.is_some() {
            StereoMode::ComplexPrediction
        }
        else if stereo.ms_mask_present == 0 {
            StereoMode::Independent
        }
        else {
            StereoMode::MidSide
        }
    }
}

/// One channel's parsed frame data, ready for reconstruction.
///
/// The entropy-decoding front-end fills `quant` with the raw signed codes and the side
/// information; the pipeline turns it into a normalized [`SpectralData`] in `spec`.
pub struct ChannelStream {
    pub info: WindowInfo,
    pub quant: [i32; FRAME_LEN],
    pub scale_factors: [[i32; MAX_SFBS]; MAX_WINDOWS],
    pub tns: Option<TnsData>,
    pub noise: Option<NoiseFillData>,
    /// Highest band noise filling may touch; bands above it belong to gap filling.
    pub max_noise_sfb: usize,
    pub spec: SpectralData,
}

impl ChannelStream {
    pub fn new() -> Self {
        Self {
            info: WindowInfo::new(),
            quant: [0; FRAME_LEN],
            scale_factors: [[0; MAX_SFBS]; MAX_WINDOWS],
            tns: None,
            noise: None,
            max_noise_sfb: MAX_SFBS,
            spec: SpectralData::new(),
        }
    }
}

impl Default for ChannelStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconstruction pipeline for one channel pair (or two independent channels).
///
/// Persistent state index 0 additionally carries the pair's joint-stereo history: the previous
/// downmix and the prediction-coefficient base.
pub struct BlockPipeline {
    sbi: SubbandInfo,
    rate_idx: usize,
    igf_after_tns: bool,
    seeds: [u32; 2],
    state: [ChannelPersistentState; 2],
}

impl BlockPipeline {
    pub fn new(sample_rate: u32, igf_after_tns: bool, seeds: [u32; 2]) -> Self {
        Self {
            sbi: SubbandInfo::find(sample_rate),
            rate_idx: SubbandInfo::find_idx(sample_rate),
            igf_after_tns,
            seeds,
            state: [ChannelPersistentState::new(seeds[0]), ChannelPersistentState::new(seeds[1])],
        }
    }

    /// Returns the pipeline to its initial state, including the noise generators.
    pub fn reset(&mut self) {
        self.state =
            [ChannelPersistentState::new(self.seeds[0]), ChannelPersistentState::new(self.seeds[1])];
    }

    pub fn channel_state(&self, ch: usize) -> &ChannelPersistentState {
        &self.state[ch]
    }

    fn bands(&self, long_win: bool) -> &'static [usize] {
        if long_win {
            self.sbi.long_bands
        }
        else {
            self.sbi.short_bands
        }
    }

    /// Reconstructs a single independent channel. A single-channel frame breaks any joint-stereo
    /// history the slot carried.
    pub fn decode_channel(
        &mut self,
        ch: usize,
        stream: &mut ChannelStream,
        tiles: Option<&mut dyn TileSpectra>,
    ) -> Result<()> {
        let res = self.decode_channel_inner(ch, stream, tiles);

        if res.is_err() {
            self.state[ch].discard_frame();
        }

        res
    }

    fn decode_channel_inner(
        &mut self,
        ch: usize,
        stream: &mut ChannelStream,
        tiles: Option<&mut dyn TileSpectra>,
    ) -> Result<()> {
        let bands = self.bands(stream.info.long_win);

        Self::dequantize(stream, bands)?;

        stream.spec.normalize_windows(
            &stream.info,
            bands,
            stream.tns.as_ref(),
            self.rate_idx,
            self.igf_after_tns,
        );

        if let Some(tns) = &stream.tns {
            tns.synth(
                &stream.info,
                bands,
                self.rate_idx,
                self.igf_after_tns,
                &mut stream.spec.coeffs,
            );
        }

        if let Some(noise) = stream.noise {
            noise.apply(
                &mut stream.spec,
                &stream.info,
                bands,
                &stream.scale_factors,
                stream.max_noise_sfb,
                &mut self.state[ch].lcg,
                tiles,
            );
        }

        self.state[ch].commit_frame(&stream.info);
        Ok(())
    }

    /// Reconstructs a channel pair with joint-stereo processing. The pair shares `left`'s
    /// window info; `alpha_deltas` holds the entropy-decoded prediction-coefficient deltas in
    /// transmission order when complex prediction is signalled.
    pub fn decode_pair(
        &mut self,
        left: &mut ChannelStream,
        right: &mut ChannelStream,
        stereo: &mut StereoInfo,
        alpha_deltas: &[i16],
        tiles_left: Option<&mut dyn TileSpectra>,
        tiles_right: Option<&mut dyn TileSpectra>,
    ) -> Result<()> {
        let res = self.decode_pair_inner(left, right, stereo, alpha_deltas, tiles_left, tiles_right);

        if res.is_err() {
            self.state[0].discard_frame();
            self.state[1].discard_frame();
        }

        res
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_pair_inner(
        &mut self,
        left: &mut ChannelStream,
        right: &mut ChannelStream,
        stereo: &mut StereoInfo,
        alpha_deltas: &[i16],
        mut tiles_left: Option<&mut dyn TileSpectra>,
        mut tiles_right: Option<&mut dyn TileSpectra>,
    ) -> Result<()> {
        let info = left.info.clone();
        let bands = self.bands(info.long_win);

        Self::dequantize(left, bands)?;
        Self::dequantize(right, bands)?;

        // Coefficient deltas resolve against the committed history of the previous frame.
        if let Some(cplx) = stereo.cplx.as_mut() {
            cplx.decode_alphas(alpha_deltas, &self.state[0], &info)?;
        }

        for stream in [&mut *left, &mut *right] {
            stream.spec.normalize_windows(
                &info,
                bands,
                stream.tns.as_ref(),
                self.rate_idx,
                self.igf_after_tns,
            );

            if let Some(tns) = &stream.tns {
                tns.synth(&info, bands, self.rate_idx, self.igf_after_tns, &mut stream.spec.coeffs);
            }
        }

        StereoReconstructor::process(
            &mut left.spec,
            &mut right.spec,
            stereo,
            &info,
            bands,
            &mut self.state[0],
        );

        // The main band is reconstructed before any gap-filling tile.
        if let (Some(tl), Some(tr)) = (&mut tiles_left, &mut tiles_right) {
            StereoReconstructor::process_tiles(&mut **tl, &mut **tr, stereo, &info, bands);
        }

        if let Some(cplx) = &stereo.cplx {
            self.state[0].stage_alphas(&cplx.alpha_q_re, &cplx.alpha_q_im);
        }

        if let Some(noise) = left.noise {
            noise.apply(
                &mut left.spec,
                &info,
                bands,
                &left.scale_factors,
                left.max_noise_sfb,
                &mut self.state[0].lcg,
                tiles_left,
            );
        }

        if let Some(noise) = right.noise {
            noise.apply(
                &mut right.spec,
                &info,
                bands,
                &right.scale_factors,
                right.max_noise_sfb,
                &mut self.state[1].lcg,
                tiles_right,
            );
        }

        self.state[0].commit_frame(&info);
        self.state[1].commit_frame(&info);
        Ok(())
    }

    /// Inverse-quantizes every transmitted band in place and zeroes the untransmitted tail of
    /// each window.
    fn dequantize(stream: &mut ChannelStream, bands: &[usize]) -> Result<()> {
        let info = &stream.info;

        validate!(info.max_sfb >= 1 && info.max_sfb < bands.len());

        stream.spec.reset();
        stream.spec.coeffs = stream.quant;

        for g in 0..info.window_groups {
            let cur_w = info.get_group_start(g);
            let next_w = info.get_group_start(g + 1);

            for sfb in 0..info.max_sfb {
                for w in cur_w..next_w {
                    let (start, end) = SpectralData::band_range(w, bands, sfb, info.long_win);

                    let exp = inverse_quantize_band(
                        &mut stream.spec.coeffs[start..end],
                        stream.scale_factors[g][sfb],
                    )?;

                    stream.spec.band_exp[w][sfb] = exp;
                }
            }
        }

        for w in 0..info.num_windows {
            let (_, end) = SpectralData::band_range(w, bands, info.max_sfb - 1, info.long_win);
            let win_end = if info.long_win { FRAME_LEN } else { (w + 1) * SHORT_WIN_LEN };

            for c in stream.spec.coeffs[end..win_end].iter_mut() {
                *c = 0;
            }
        }

        Ok(())
    }
}
