// Resona
// Copyright (c) 2026 The Project Resona Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements the bit-level reader consumed by the codec crates.
//!
//! All multi-bit reads are most-significant-bit first, matching the transport syntax of the
//! supported codecs.

use crate::errors::{end_of_bitstream_error, Result};

/// A `FiniteBitStream` is a bit stream that has a known length in bits.
pub trait FiniteBitStream {
    /// Gets the number of bits left unread.
    fn bits_left(&self) -> u64;
}

/// `ReadBitsLtr` reads bits from most-significant to least-significant.
pub trait ReadBitsLtr {
    /// Reads a single bit or returns an error.
    fn read_bit(&mut self) -> Result<u32>;

    /// Reads up to 32 bits or returns an error.
    fn read_bits_leq32(&mut self, bit_width: u32) -> Result<u32>;

    /// Ignores the specified number of bits or returns an error.
    fn ignore_bits(&mut self, num_bits: u32) -> Result<()>;

    /// Discards bits up-to the next byte-aligned read position.
    fn realign(&mut self);

    /// Reads a single bit as a boolean value or returns an error.
    #[inline(always)]
    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_bit()? != 0)
    }

    /// Reads a variable-length integer with up-to three escape tiers.
    ///
    /// A word of `n1` bits is read first. If it is all-ones, a word of `n2` bits is read and
    /// added. If that word is also all-ones, a final word of `n3` bits is read and added. The
    /// accumulated value saturates at `u32::MAX` rather than wrapping.
    fn read_escaped_value(&mut self, n1: u32, n2: u32, n3: u32) -> Result<u32> {
        let mut value = u64::from(self.read_bits_leq32(n1)?);

        if value == (1 << n1) - 1 {
            let escape = u64::from(self.read_bits_leq32(n2)?);
            value += escape;

            if escape == (1 << n2) - 1 {
                value += u64::from(self.read_bits_leq32(n3)?);
            }
        }

        // Saturate instead of wrapping on overflow, by design.
        Ok(value.min(u64::from(u32::MAX)) as u32)
    }
}

/// `BitReaderLtr` reads bits from most-significant to least-significant from a byte slice.
///
/// Stated another way, if N bits are read from a `BitReaderLtr` then bit 0, the first bit read,
/// is the most-significant bit, and bit N-1, the last bit read, is the least-significant.
///
/// The reader is `Clone`, and cloning is how lookahead works: clone the reader, read ahead
/// through the clone, and drop it to return to the saved position. The clone shares the
/// underlying slice, so this costs three words.
#[derive(Clone)]
pub struct BitReaderLtr<'a> {
    buf: &'a [u8],
    bits: u64,
    n_bits_left: u32,
}

impl<'a> BitReaderLtr<'a> {
    /// Instantiate a new `BitReaderLtr` with the given buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        BitReaderLtr { buf, bits: 0, n_bits_left: 0 }
    }

    fn fetch_bits(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return end_of_bitstream_error();
        }

        let take = self.buf.len().min(8);

        let mut bits = 0u64;
        for &byte in &self.buf[..take] {
            bits = (bits << 8) | u64::from(byte);
        }

        self.bits = bits << (64 - 8 * take);
        self.n_bits_left = 8 * take as u32;
        self.buf = &self.buf[take..];

        Ok(())
    }
}

impl<'a> ReadBitsLtr for BitReaderLtr<'a> {
    #[inline(always)]
    fn read_bit(&mut self) -> Result<u32> {
        if self.n_bits_left == 0 {
            self.fetch_bits()?;
        }

        let bit = (self.bits >> 63) as u32;

        self.bits <<= 1;
        self.n_bits_left -= 1;

        Ok(bit)
    }

    #[inline(always)]
    fn read_bits_leq32(&mut self, bit_width: u32) -> Result<u32> {
        debug_assert!(bit_width <= u32::BITS);

        let mut out = 0u64;
        let mut width = bit_width;

        while width > 0 {
            if self.n_bits_left == 0 {
                self.fetch_bits()?;
            }

            // The cache is left-aligned, so the wanted bits are the top ones.
            let take = width.min(self.n_bits_left);

            out = (out << take) | (self.bits >> (64 - take));

            self.bits <<= take;
            self.n_bits_left -= take;
            width -= take;
        }

        Ok(out as u32)
    }

    #[inline(always)]
    fn ignore_bits(&mut self, mut num_bits: u32) -> Result<()> {
        while num_bits > self.n_bits_left {
            num_bits -= self.n_bits_left;
            self.bits = 0;
            self.n_bits_left = 0;
            self.fetch_bits()?;
        }

        if num_bits > 0 {
            // Shift in two parts to prevent panicing when num_bits == 64.
            self.bits <<= num_bits - 1;
            self.bits <<= 1;
            self.n_bits_left -= num_bits;
        }
        Ok(())
    }

    #[inline(always)]
    fn realign(&mut self) {
        let skip = self.n_bits_left & 0x7;
        self.bits <<= skip;
        self.n_bits_left -= skip;
    }
}

impl<'a> FiniteBitStream for BitReaderLtr<'a> {
    fn bits_left(&self) -> u64 {
        u64::from(self.n_bits_left) + 8 * self.buf.len() as u64
    }
}
