// Teletext
// Copyright (c) 2025 The Project Teletext Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error::Error as StdError;
use std::fmt;
use std::result;

/// `Error` provides an enumeration of all possible errors reported by the toolkit.
///
/// The DSP and coding layers never construct an `Error`: corrupt broadcast data is represented by
/// error counts attached to decoded values, or by a rejected line or dropped packet that is
/// accounted for by a statistics tap. An `Error` always means the pipeline itself cannot make
/// progress.
#[derive(Debug)]
pub enum Error {
    /// An IO error occurred while reading the input stream.
    IoError(std::io::Error),
    /// The capture or pipeline configuration is invalid. Fatal at startup.
    ConfigInvalid(&'static str),
    /// An optional collaborator or feature is not available.
    Unsupported(&'static str),
    /// An output sink could not be written. Fatal to the pipeline.
    SinkError(std::io::Error),
    /// The end of the input stream was reached. This is how a pipeline run normally ends.
    EndOfStream,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IoError(ref err) => {
                write!(f, "io error: {}", err)
            }
            Error::ConfigInvalid(msg) => {
                write!(f, "invalid configuration: {}", msg)
            }
            Error::Unsupported(feature) => {
                write!(f, "unsupported feature: {}", feature)
            }
            Error::SinkError(ref err) => {
                write!(f, "sink write failed: {}", err)
            }
            Error::EndOfStream => {
                write!(f, "end of stream")
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            Error::SinkError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::EndOfStream,
            _ => Error::IoError(err),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a configuration error.
pub fn config_error<T>(msg: &'static str) -> Result<T> {
    Err(Error::ConfigInvalid(msg))
}

/// Convenience function to create an unsupported feature error.
pub fn unsupported_error<T>(feature: &'static str) -> Result<T> {
    Err(Error::Unsupported(feature))
}

/// Convenience function to create a sink write error.
pub fn sink_error<T>(err: std::io::Error) -> Result<T> {
    Err(Error::SinkError(err))
}

/// Convenience function to create an end-of-stream error.
pub fn end_of_stream_error<T>() -> Result<T> {
    Err(Error::EndOfStream)
}
