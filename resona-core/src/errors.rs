// Resona
// Copyright (c) 2026 The Project Resona Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by Resona.
#[derive(Debug)]
pub enum Error {
    /// An IO error occured while reading the stream.
    IoError(std::io::Error),
    /// The stream contained malformed data and could not be decoded. A decode error is always
    /// frame-fatal: no partial output is produced and the caller should substitute concealment
    /// data for the frame.
    DecodeError(&'static str),
    /// An unsupported codec feature was encountered.
    Unsupported(&'static str),
    /// A default or user-defined limit was reached while decoding. Limits are used to prevent
    /// denial-of-service attacks from malicious streams.
    LimitError(&'static str),
    /// The decoder needs to be reset before continuing.
    ResetRequired,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IoError(ref err) => err.fmt(f),
            Error::DecodeError(msg) => {
                f.write_str("malformed stream: ")?;
                f.write_str(msg)
            }
            Error::Unsupported(feature) => {
                f.write_str("unsupported feature: ")?;
                f.write_str(feature)
            }
            Error::LimitError(constraint) => {
                f.write_str("limit reached: ")?;
                f.write_str(constraint)
            }
            Error::ResetRequired => f.write_str("decoder needs to be reset"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a decode error.
pub fn decode_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::DecodeError(desc))
}

/// Convenience function to create an unsupported feature error.
pub fn unsupported_error<T>(feature: &'static str) -> Result<T> {
    Err(Error::Unsupported(feature))
}

/// Convenience function to create a limit error.
pub fn limit_error<T>(constraint: &'static str) -> Result<T> {
    Err(Error::LimitError(constraint))
}

/// Convenience function to create an end-of-bitstream error.
pub fn end_of_bitstream_error<T>() -> Result<T> {
    Err(Error::IoError(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "unexpected end of bitstream",
    )))
}
