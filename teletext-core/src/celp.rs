// Teletext
// Copyright (c) 2026 The Project Teletext Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `celp` module recognises the in-band CELP audio service carried on magazine 4 data
//! packets and exposes its framing and raw parameter fields.
//!
//! Only recognition and field extraction are implemented. The parameter layout below 152 bits is
//! only partially understood upstream, so no audio synthesis is attempted here.

use crate::coding::{hamming8_decode, Errors};
use crate::packet::{Packet, RowSet};

/// The magazine carrying CELP data channels.
pub const CELP_MAGAZINE: u8 = 4;

/// The length in bytes of one CELP audio frame: 152 bits.
pub const CELP_FRAME_LEN: usize = 19;

/// Audio level steps in dB indexed by the low three control bits of data channel 4.
pub const CELP_DB_LEVELS: [u8; 8] = [0, 4, 8, 12, 18, 24, 30, 0];

/// Service types of data channel 12, indexed by the decoded service nibble.
pub const CELP_SERVICE_TYPES: [&str; 8] = [
    "Single-channel mode using 1 VBI line per frame",
    "Single-channel mode using 2 VBI lines per frame",
    "Single-channel mode using 3 VBI lines per frame",
    "Single-channel mode using 4 VBI lines per frame",
    "Mute Channel 1",
    "Two-channel Mode using 2 VBI lines per frame",
    "Mute Channel 2",
    "Two-channel Mode using 4 VBI lines per frame",
];

/// One recognised CELP packet: two audio frames plus the channel's control and service bytes.
#[derive(Debug, Clone, Copy)]
pub struct CelpPacket {
    /// The data channel number, `magazine + ((row & 1) << 3)`.
    pub dcn: u8,
    /// The packet row the channel was carried on.
    pub row: u8,
    /// The decoded control nibble.
    pub control: (u8, Errors),
    /// The decoded service nibble.
    pub service: (u8, Errors),
    /// The first audio frame.
    pub frame0: [u8; CELP_FRAME_LEN],
    /// The second audio frame.
    pub frame1: [u8; CELP_FRAME_LEN],
}

impl CelpPacket {
    /// Recognise a CELP packet. Returns `None` unless the packet is on magazine 4 with a row in
    /// `rows`.
    pub fn from_packet(packet: &Packet, rows: &RowSet) -> Option<CelpPacket> {
        let mrag = packet.mrag();

        if mrag.errors.is_uncorrectable() {
            return None;
        }
        if mrag.magazine != CELP_MAGAZINE || !rows.contains(mrag.row) {
            return None;
        }

        let data = packet.bytes();

        let mut frame0 = [0u8; CELP_FRAME_LEN];
        let mut frame1 = [0u8; CELP_FRAME_LEN];
        frame0.copy_from_slice(&data[4..23]);
        frame1.copy_from_slice(&data[23..42]);

        Some(CelpPacket {
            dcn: mrag.magazine + ((mrag.row & 1) << 3),
            row: mrag.row,
            control: hamming8_decode(data[2]),
            service: hamming8_decode(data[3]),
            frame0,
            frame1,
        })
    }
}

/// A stream hook yielding the CELP packets of a packet sequence.
pub struct CelpStream<I> {
    inner: I,
    rows: RowSet,
}

impl<I> CelpStream<I> {
    pub fn new(inner: I, rows: RowSet) -> CelpStream<I> {
        CelpStream { inner, rows }
    }
}

impl<I: Iterator<Item = Packet>> Iterator for CelpStream<I> {
    type Item = CelpPacket;

    fn next(&mut self) -> Option<CelpPacket> {
        for packet in self.inner.by_ref() {
            if let Some(celp) = CelpPacket::from_packet(&packet, &self.rows) {
                return Some(celp);
            }
        }
        None
    }
}

/// The field widths of the ten line spectral frequency parameters, in transmission order.
pub const CELP_LSF_WIDTHS: [u32; 10] = [3, 4, 4, 4, 4, 4, 4, 4, 3, 3];

/// The raw parameter fields of one 152-bit CELP audio frame.
///
/// Fields are packed little-endian: the first transmitted bit is the least significant bit of the
/// first field. The exact meaning of the LSF ordering is marked experimental upstream, so values
/// are exposed exactly as transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CelpFrameFields {
    /// Ten line spectral frequency parameters of 3 or 4 bits each.
    pub lsf: [u8; 10],
    /// Four 5-bit pitch gains (long-term predictor gain).
    pub pitch_gain: [u8; 4],
    /// Four 5-bit vector gains.
    pub vector_gain: [u8; 4],
    /// Four 7-bit pitch indices (long-term predictor lag).
    pub pitch_index: [u8; 4],
    /// Four 8-bit vector indices.
    pub vector_index: [u8; 4],
    /// Four 3-bit error-correction nibbles for the vector gains.
    pub gain_check: [u8; 4],
    /// Three padding bits, zero except after recovery errors.
    pub padding: u8,
}

struct BitCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitCursor<'a> {
    fn new(bytes: &'a [u8]) -> BitCursor<'a> {
        BitCursor { bytes, pos: 0 }
    }

    fn take(&mut self, width: u32) -> u8 {
        let mut value = 0;
        for out in 0..width {
            let bit = (self.bytes[self.pos >> 3] >> (self.pos & 0x7)) & 1;
            value |= bit << out;
            self.pos += 1;
        }
        value
    }
}

impl CelpFrameFields {
    /// Unpack the raw fields of one audio frame.
    pub fn unpack(frame: &[u8; CELP_FRAME_LEN]) -> CelpFrameFields {
        let mut bits = BitCursor::new(frame);

        let mut lsf = [0u8; 10];
        for (value, &width) in lsf.iter_mut().zip(&CELP_LSF_WIDTHS) {
            *value = bits.take(width);
        }

        let pitch_gain = std::array::from_fn(|_| bits.take(5));
        let vector_gain = std::array::from_fn(|_| bits.take(5));
        let pitch_index = std::array::from_fn(|_| bits.take(7));
        let vector_index = std::array::from_fn(|_| bits.take(8));
        let gain_check = std::array::from_fn(|_| bits.take(3));
        let padding = bits.take(3);

        CelpFrameFields {
            lsf,
            pitch_gain,
            vector_gain,
            pitch_index,
            vector_index,
            gain_check,
            padding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coding::hamming8_encode;
    use crate::packet::PACKET_LEN;

    fn celp_packet(row: u8, control: u8, service: u8) -> Packet {
        let mut data = [0u8; PACKET_LEN];
        data[0] = hamming8_encode(0x4 | ((row & 1) << 3));
        data[1] = hamming8_encode(row >> 1);
        data[2] = hamming8_encode(control);
        data[3] = hamming8_encode(service);
        for (i, byte) in data[4..].iter_mut().enumerate() {
            *byte = i as u8;
        }
        Packet::new(data, 0)
    }

    #[test]
    fn verify_recognition_and_dcn() {
        let packet = celp_packet(0, 0x3, 0x0);
        let celp = CelpPacket::from_packet(&packet, &RowSet::ALL).unwrap();
        assert_eq!(celp.dcn, 4);
        assert_eq!(celp.control, (0x3, Errors::None));
        assert_eq!(celp.frame0[0], 0);
        assert_eq!(celp.frame1[0], 19);

        let packet = celp_packet(1, 0x0, 0x2);
        let celp = CelpPacket::from_packet(&packet, &RowSet::ALL).unwrap();
        assert_eq!(celp.dcn, 12);
        assert_eq!(celp.service, (0x2, Errors::None));
    }

    #[test]
    fn verify_foreign_magazines_are_ignored() {
        let mut data = [0u8; PACKET_LEN];
        data[0] = hamming8_encode(0x1);
        data[1] = hamming8_encode(0);
        let packet = Packet::new(data, 0);
        assert!(CelpPacket::from_packet(&packet, &RowSet::ALL).is_none());
    }

    #[test]
    fn verify_field_widths_cover_the_frame() {
        let widths: u32 = CELP_LSF_WIDTHS.iter().sum::<u32>() + 4 * 5 + 4 * 5 + 4 * 7 + 4 * 8 + 4 * 3 + 3;
        assert_eq!(widths as usize, CELP_FRAME_LEN * 8);
    }

    #[test]
    fn verify_unpack_field_positions() {
        // The first LSF parameter occupies the three least significant bits of byte 0.
        let mut frame = [0u8; CELP_FRAME_LEN];
        frame[0] = 0b0000_0101;
        let fields = CelpFrameFields::unpack(&frame);
        assert_eq!(fields.lsf[0], 0b101);
        assert_eq!(fields.lsf[1], 0);

        // An all-ones frame saturates every field at its width.
        let frame = [0xffu8; CELP_FRAME_LEN];
        let fields = CelpFrameFields::unpack(&frame);
        assert_eq!(fields.lsf, [7, 15, 15, 15, 15, 15, 15, 15, 7, 7]);
        assert_eq!(fields.pitch_gain, [31; 4]);
        assert_eq!(fields.vector_gain, [31; 4]);
        assert_eq!(fields.pitch_index, [127; 4]);
        assert_eq!(fields.vector_index, [255; 4]);
        assert_eq!(fields.gain_check, [7; 4]);
        assert_eq!(fields.padding, 7);
    }
}
