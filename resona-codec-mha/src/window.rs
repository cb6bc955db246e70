// Resona
// Copyright (c) 2026 The Project Resona Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Window-sequence and scale-factor-grouping bookkeeping for one channel.

use resona_core::errors::{decode_error, Result};
use resona_core::io::ReadBitsLtr;

use crate::common::{validate, MAX_WINDOWS};

pub const ONLY_LONG_SEQUENCE: u8 = 0;
pub const LONG_START_SEQUENCE: u8 = 1;
pub const EIGHT_SHORT_SEQUENCE: u8 = 2;
pub const LONG_STOP_SEQUENCE: u8 = 3;

/// Per-channel window sequence, shape, and scale-factor grouping for one frame.
///
/// The previous frame's sequence and shape are retained: the MDST estimation kernel choice and
/// the joint-stereo history reset rule both depend on them.
#[derive(Clone)]
pub struct WindowInfo {
    pub window_sequence: u8,
    pub prev_window_sequence: u8,
    pub window_shape: bool,
    pub prev_window_shape: bool,
    pub scale_factor_grouping: [bool; MAX_WINDOWS],
    pub group_start: [usize; MAX_WINDOWS],
    pub window_groups: usize,
    pub num_windows: usize,
    pub max_sfb: usize,
    pub long_win: bool,
}

impl WindowInfo {
    pub fn new() -> Self {
        Self {
            window_sequence: 0,
            prev_window_sequence: 0,
            window_shape: false,
            prev_window_shape: false,
            scale_factor_grouping: [false; MAX_WINDOWS],
            group_start: [0; MAX_WINDOWS],
            window_groups: 1,
            num_windows: 1,
            max_sfb: 0,
            long_win: true,
        }
    }

    pub fn decode<B: ReadBitsLtr>(&mut self, bs: &mut B) -> Result<()> {
        self.prev_window_sequence = self.window_sequence;
        self.prev_window_shape = self.window_shape;

        self.window_sequence = bs.read_bits_leq32(2)? as u8;
        self.window_shape = bs.read_bool()?;
        self.window_groups = 1;

        if self.window_sequence == EIGHT_SHORT_SEQUENCE {
            self.long_win = false;
            self.num_windows = 8;
            self.max_sfb = bs.read_bits_leq32(4)? as usize;

            for i in 0..MAX_WINDOWS - 1 {
                self.scale_factor_grouping[i] = bs.read_bool()?;

                if !self.scale_factor_grouping[i] {
                    self.group_start[self.window_groups] = i + 1;
                    self.window_groups += 1;
                }
            }
        }
        else {
            self.long_win = true;
            self.num_windows = 1;
            self.max_sfb = bs.read_bits_leq32(6)? as usize;
        }

        validate!(self.max_sfb > 0);
        Ok(())
    }

    /// Copies a channel pair's common window info, keeping this channel's own history.
    pub fn copy_from_common(&mut self, other: &WindowInfo) {
        let prev_window_sequence = self.window_sequence;
        let prev_window_shape = self.window_shape;

        *self = other.clone();

        self.prev_window_sequence = prev_window_sequence;
        self.prev_window_shape = prev_window_shape;
    }

    /// Index of the first window belonging to group `g`.
    pub fn get_group_start(&self, g: usize) -> usize {
        if g == 0 {
            0
        }
        else if g >= self.window_groups {
            if self.long_win {
                1
            }
            else {
                8
            }
        }
        else {
            self.group_start[g]
        }
    }

    /// True when the frame transitions into or out of a short-window sequence. Joint-stereo
    /// cross-frame history is unusable across such a boundary.
    pub fn is_window_transition(&self) -> bool {
        let was_short = self.prev_window_sequence == EIGHT_SHORT_SEQUENCE;
        let is_short = self.window_sequence == EIGHT_SHORT_SEQUENCE;
        was_short != is_short
    }
}

impl Default for WindowInfo {
    fn default() -> Self {
        Self::new()
    }
}
