// Resona
// Copyright (c) 2026 The Project Resona Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cross-frame decoder state for one channel pair.
//!
//! Three things survive a frame boundary: the noise-fill LCG, the previous frame's downmix
//! spectrum used by MDST estimation, and the quantized prediction coefficients used as the base
//! for time-direction deltas. All of it moves through a two-phase scheme: the current frame
//! stages its outgoing state while it decodes, and the stage is promoted to history only once
//! the whole frame has parsed cleanly. A frame abandoned on a parse error leaves history exactly
//! as the last good frame left it.

use crate::common::{Lcg, FRAME_LEN, MAX_SFBS, MAX_WINDOWS};
use crate::scale::SpectralData;
use crate::window::WindowInfo;

/// A concealment snapshot of one channel's reconstructed spectrum and exponents.
///
/// The caller stores the last good frame here and restores it over the working buffer when the
/// transport layer flags a frame bad.
#[derive(Clone)]
pub struct FrameSnapshot {
    spec: SpectralData,
    valid: bool,
}

impl FrameSnapshot {
    pub fn new() -> Self {
        Self { spec: SpectralData::new(), valid: false }
    }

    pub fn store_frame(&mut self, spec: &SpectralData) {
        self.spec = spec.clone();
        self.valid = true;
    }

    /// Overwrites `spec` with the stored frame. Returns false, leaving `spec` untouched, when
    /// nothing has been stored yet.
    pub fn restore_frame(&self, spec: &mut SpectralData) -> bool {
        if !self.valid {
            return false;
        }

        *spec = self.spec.clone();
        true
    }
}

impl Default for FrameSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// State produced by the current frame, pending promotion to history.
#[derive(Clone)]
struct StagedState {
    dmx: [i32; FRAME_LEN],
    dmx_exp: [i32; MAX_WINDOWS],
    alpha_q_re: [[i16; MAX_SFBS]; MAX_WINDOWS],
    alpha_q_im: [[i16; MAX_SFBS]; MAX_WINDOWS],
    has_dmx: bool,
    has_alphas: bool,
}

impl StagedState {
    fn new() -> Self {
        Self {
            dmx: [0; FRAME_LEN],
            dmx_exp: [0; MAX_WINDOWS],
            alpha_q_re: [[0; MAX_SFBS]; MAX_WINDOWS],
            alpha_q_im: [[0; MAX_SFBS]; MAX_WINDOWS],
            has_dmx: false,
            has_alphas: false,
        }
    }

    fn clear(&mut self) {
        self.has_dmx = false;
        self.has_alphas = false;
    }
}

/// Everything one channel of a pair carries across frames.
///
/// The fields are read directly by the stereo stage; writes for the next frame go through the
/// `stage_*` methods and land only on [`ChannelPersistentState::commit_frame`].
pub struct ChannelPersistentState {
    /// Noise-fill sign generator. Advances only during the processing phase, after all parsing
    /// has succeeded, so it needs no staging.
    pub lcg: Lcg,
    pub prev_dmx: [i32; FRAME_LEN],
    pub prev_dmx_exp: [i32; MAX_WINDOWS],
    pub alpha_q_re: [[i16; MAX_SFBS]; MAX_WINDOWS],
    pub alpha_q_im: [[i16; MAX_SFBS]; MAX_WINDOWS],
    dmx_valid: bool,
    staged: StagedState,
}

impl ChannelPersistentState {
    pub fn new(seed: u32) -> Self {
        Self {
            lcg: Lcg::new(seed),
            prev_dmx: [0; FRAME_LEN],
            prev_dmx_exp: [0; MAX_WINDOWS],
            alpha_q_re: [[0; MAX_SFBS]; MAX_WINDOWS],
            alpha_q_im: [[0; MAX_SFBS]; MAX_WINDOWS],
            dmx_valid: false,
            staged: StagedState::new(),
        }
    }

    /// Drops all prediction history. Called on decoder reset and on frames where the history is
    /// unusable: a window-sequence transition, or a frame that did not signal prediction.
    pub fn reset_prediction(&mut self) {
        self.prev_dmx = [0; FRAME_LEN];
        self.prev_dmx_exp = [0; MAX_WINDOWS];
        self.alpha_q_re = [[0; MAX_SFBS]; MAX_WINDOWS];
        self.alpha_q_im = [[0; MAX_SFBS]; MAX_WINDOWS];
        self.dmx_valid = false;
        self.staged.clear();
    }

    /// True when a previous-frame downmix exists and may feed MDST estimation.
    pub fn downmix_valid(&self) -> bool {
        self.dmx_valid
    }

    /// Stages this frame's downmix spectrum for the next frame.
    pub fn stage_downmix(&mut self, dmx: &[i32; FRAME_LEN], dmx_exp: &[i32; MAX_WINDOWS]) {
        self.staged.dmx = *dmx;
        self.staged.dmx_exp = *dmx_exp;
        self.staged.has_dmx = true;
    }

    /// Stages this frame's decoded prediction coefficients for next-frame time deltas.
    pub fn stage_alphas(
        &mut self,
        alpha_q_re: &[[i16; MAX_SFBS]; MAX_WINDOWS],
        alpha_q_im: &[[i16; MAX_SFBS]; MAX_WINDOWS],
    ) {
        self.staged.alpha_q_re = *alpha_q_re;
        self.staged.alpha_q_im = *alpha_q_im;
        self.staged.has_alphas = true;
    }

    /// Promotes the staged state to history. The frame history becomes invalid for prediction
    /// if the frame staged no downmix, and the coefficient base resets to zero if the frame
    /// staged no coefficients.
    pub fn commit_frame(&mut self, info: &WindowInfo) {
        if self.staged.has_dmx && !info.is_window_transition() {
            self.prev_dmx = self.staged.dmx;
            self.prev_dmx_exp = self.staged.dmx_exp;
            self.dmx_valid = true;
        }
        else {
            self.dmx_valid = false;
        }

        if self.staged.has_alphas {
            self.alpha_q_re = self.staged.alpha_q_re;
            self.alpha_q_im = self.staged.alpha_q_im;
        }
        else {
            self.alpha_q_re = [[0; MAX_SFBS]; MAX_WINDOWS];
            self.alpha_q_im = [[0; MAX_SFBS]; MAX_WINDOWS];
        }

        self.staged.clear();
    }

    /// Discards the staged state after a failed frame, leaving history untouched.
    pub fn discard_frame(&mut self) {
        self.staged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::EIGHT_SHORT_SEQUENCE;

    #[test]
    fn verify_commit_promotes_staged_downmix() {
        let mut state = ChannelPersistentState::new(3);
        assert!(!state.downmix_valid());

        let dmx = [7i32; FRAME_LEN];
        let exps = [12i32; MAX_WINDOWS];
        state.stage_downmix(&dmx, &exps);

        // Not visible until commit.
        assert!(!state.downmix_valid());
        assert_eq!(state.prev_dmx[0], 0);

        state.commit_frame(&WindowInfo::new());
        assert!(state.downmix_valid());
        assert_eq!(state.prev_dmx[0], 7);
        assert_eq!(state.prev_dmx_exp[0], 12);
    }

    #[test]
    fn verify_discard_keeps_history() {
        let mut state = ChannelPersistentState::new(3);

        state.stage_downmix(&[1i32; FRAME_LEN], &[5i32; MAX_WINDOWS]);
        state.commit_frame(&WindowInfo::new());

        state.stage_downmix(&[9i32; FRAME_LEN], &[8i32; MAX_WINDOWS]);
        state.discard_frame();

        assert!(state.downmix_valid());
        assert_eq!(state.prev_dmx[0], 1);
        assert_eq!(state.prev_dmx_exp[0], 5);

        // A later commit with nothing staged invalidates the downmix.
        state.commit_frame(&WindowInfo::new());
        assert!(!state.downmix_valid());
    }

    #[test]
    fn verify_commit_across_window_transition_invalidates() {
        let mut state = ChannelPersistentState::new(3);
        state.stage_downmix(&[1i32; FRAME_LEN], &[5i32; MAX_WINDOWS]);

        let mut info = WindowInfo::new();
        info.window_sequence = EIGHT_SHORT_SEQUENCE;

        state.commit_frame(&info);
        assert!(!state.downmix_valid());
    }

    #[test]
    fn verify_alpha_staging() {
        let mut state = ChannelPersistentState::new(3);

        let mut re = [[0i16; MAX_SFBS]; MAX_WINDOWS];
        re[0][4] = -7;
        state.stage_alphas(&re, &[[0; MAX_SFBS]; MAX_WINDOWS]);
        state.commit_frame(&WindowInfo::new());
        assert_eq!(state.alpha_q_re[0][4], -7);

        // A frame without prediction resets the coefficient base.
        state.commit_frame(&WindowInfo::new());
        assert_eq!(state.alpha_q_re[0][4], 0);
    }

    #[test]
    fn verify_frame_snapshot_roundtrip() {
        let mut snapshot = FrameSnapshot::new();

        let mut good = SpectralData::new();
        good.coeffs[17] = -12345;
        good.window_exp[0] = 9;

        // Restore before any store leaves the target alone.
        let mut work = SpectralData::new();
        work.coeffs[0] = 1;
        assert!(!snapshot.restore_frame(&mut work));
        assert_eq!(work.coeffs[0], 1);

        snapshot.store_frame(&good);

        assert!(snapshot.restore_frame(&mut work));
        assert_eq!(work.coeffs[17], -12345);
        assert_eq!(work.window_exp[0], 9);
        assert_eq!(work.coeffs[0], 0);
    }

    #[test]
    fn verify_reset_prediction() {
        let mut state = ChannelPersistentState::new(3);
        state.stage_downmix(&[1i32; FRAME_LEN], &[5i32; MAX_WINDOWS]);
        state.commit_frame(&WindowInfo::new());

        state.reset_prediction();
        assert!(!state.downmix_valid());
        assert_eq!(state.prev_dmx[0], 0);
    }
}
