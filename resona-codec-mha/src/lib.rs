// Resona
// Copyright (c) 2026 The Project Resona Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Spectral-domain reconstruction core for an MPEG-H style 3D-audio decoder.
//!
//! Given the entropy-decoded quantized coefficients, scale factors, and side information for one
//! frame of a channel pair, this crate rebuilds the normalized fixed-point spectrum that the
//! inverse transform consumes: inverse quantization with a power-4/3 law, temporal noise shaping
//! synthesis, joint-stereo reconstruction (M/S and complex prediction with MDST estimation), and
//! noise filling for untransmitted bands.
//!
//! Entropy decoding, the IMDCT, high-frequency gap filling, and concealment decisions live in the
//! caller; this crate only exposes the interfaces they plug into.

mod common;
mod fixed;
mod iquant;
mod noise;
mod pipeline;
mod scale;
mod state;
mod stereo;
mod tns;
mod window;

pub use common::{Lcg, SubbandInfo, MAX_SFBS, MAX_WINDOWS};
pub use noise::NoiseFillData;
pub use pipeline::{BlockPipeline, ChannelStream, StereoMode, TileSpectra};
pub use scale::SpectralData;
pub use state::{ChannelPersistentState, FrameSnapshot};
pub use stereo::{ComplexPredictionData, StereoInfo, StereoReconstructor};
pub use tns::TnsData;
pub use window::WindowInfo;
