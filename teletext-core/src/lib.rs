// Teletext
// Copyright (c) 2025 The Project Teletext Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared structures and pipeline stages for recovering World System Teletext from broadcast
//! captures.
//!
//! This crate is signal-agnostic: it begins at the byte level. Chunked t42 packet streams enter
//! through [`chunk`], are modelled by [`packet`] and [`subpage`], and flow through the lazy
//! stages of [`pipeline`] with [`stats`] taps observing along the way. Recovery of packets from
//! raw VBI samples lives in the companion `teletext-vbi` crate.

pub mod celp;
pub mod chunk;
pub mod coding;
pub mod errors;
pub mod packet;
pub mod pipeline;
pub mod stats;
pub mod subpage;
