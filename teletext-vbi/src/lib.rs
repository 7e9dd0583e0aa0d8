// Teletext
// Copyright (c) 2025 The Project Teletext Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Teletext packet recovery from raw VBI sample captures.
//!
//! A [`config::CaptureConfig`] describes the capture card geometry and derives the shared
//! sampling state; a [`line::VbiLine`] consumes one line of samples and recovers at most one
//! packet through either slicing or deconvolution.

pub mod config;
pub mod line;

pub use config::{CaptureConfig, CaptureOptions, Card};
pub use line::VbiLine;
