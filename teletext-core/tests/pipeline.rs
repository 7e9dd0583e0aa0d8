// Teletext
// Copyright (c) 2026 The Project Teletext Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end tests of the byte-level pipeline: chunking, framing, filtering, pagination, and
//! squashing over in-memory t42 streams.

use std::io::Cursor;

use teletext_core::chunk::{ChunkerOptions, ErrorLatch, FileChunker, WstChunker};
use teletext_core::coding::{hamming8_encode, parity_encode};
use teletext_core::packet::{MagSet, Packet, RowSet, PACKET_LEN};
use teletext_core::pipeline::{filter_packets, paginate, subpage_squash, PageSet};
use teletext_core::stats::{Counted, MagHistogram};
use teletext_core::subpage::Subpage;

fn header_packet(magazine: u8, page: u8, subpage: u16) -> [u8; PACKET_LEN] {
    let mut data = [parity_encode(0x20); PACKET_LEN];
    data[0] = hamming8_encode(magazine & 0x7);
    data[1] = hamming8_encode(0);
    data[2] = hamming8_encode(page & 0xf);
    data[3] = hamming8_encode(page >> 4);
    data[4] = hamming8_encode((subpage & 0xf) as u8);
    data[5] = hamming8_encode(((subpage >> 4) & 0x7) as u8);
    data[6] = hamming8_encode(((subpage >> 8) & 0xf) as u8);
    data[7] = hamming8_encode(((subpage >> 12) & 0x3) as u8);
    data[8] = hamming8_encode(0);
    data[9] = hamming8_encode(0);
    data
}

fn row_packet(magazine: u8, row: u8, text: &[u8]) -> [u8; PACKET_LEN] {
    let mut data = [parity_encode(0x20); PACKET_LEN];
    data[0] = hamming8_encode((magazine & 0x7) | ((row & 1) << 3));
    data[1] = hamming8_encode(row >> 1);
    for (out, &byte) in data[2..].iter_mut().zip(text) {
        *out = parity_encode(byte);
    }
    data
}

fn t42_stream(packets: &[[u8; PACKET_LEN]]) -> Vec<u8> {
    packets.iter().flatten().copied().collect()
}

#[test]
fn verify_t42_stream_to_subpages() {
    let stream = t42_stream(&[
        header_packet(1, 0x00, 0x0001),
        row_packet(1, 1, b"top of the hour"),
        row_packet(1, 2, b"weather to follow"),
        header_packet(1, 0x00, 0x0002),
        row_packet(1, 1, b"second rotation"),
    ]);

    let latch = ErrorLatch::new();
    let chunks = FileChunker::new(Cursor::new(stream), PACKET_LEN);
    let packets =
        latch.guard(chunks).filter_map(|(number, chunk)| Packet::from_slice(&chunk, number));

    let subpages: Vec<Subpage> = paginate(
        filter_packets(packets, MagSet::ALL, RowSet::ALL),
        PageSet::all(),
        PageSet::all(),
    )
    .collect();

    assert!(latch.take().is_ok());
    assert_eq!(subpages.len(), 2);
    assert_eq!(subpages[0].key().subpage, 1);
    assert_eq!(subpages[0].len(), 3);
    assert_eq!(subpages[1].key().subpage, 2);
    assert_eq!(subpages[1].len(), 2);
}

#[test]
fn verify_t42_stream_squash_votes_out_an_error() {
    // Three transmissions of one subpage. The second transmission carries a corrupted byte in
    // row 1; squashing votes it back out.
    let clean_row = row_packet(1, 1, b"all sorts of trouble");
    let mut dirty_row = clean_row;
    dirty_row[10] ^= 0x81;

    let stream = t42_stream(&[
        header_packet(1, 0x00, 0x0001),
        clean_row,
        header_packet(1, 0x00, 0x0001),
        dirty_row,
        header_packet(1, 0x00, 0x0001),
        clean_row,
    ]);

    let latch = ErrorLatch::new();
    let chunks = FileChunker::new(Cursor::new(stream), PACKET_LEN);
    let packets =
        latch.guard(chunks).filter_map(|(number, chunk)| Packet::from_slice(&chunk, number));

    let squashed: Vec<Subpage> =
        subpage_squash(paginate(packets, PageSet::all(), PageSet::all()), 3).collect();

    assert!(latch.take().is_ok());
    assert_eq!(squashed.len(), 1);
    assert_eq!(squashed[0].row(1), Some(&clean_row));

    let packets: Vec<Packet> = squashed.into_iter().next().unwrap().into_packets().collect();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[1].bytes(), &clean_row);
}

#[test]
fn verify_wst_stream_with_taps() {
    // Three WST frames of 43 bytes each; the taps observe without disturbing the stream.
    let padded: Vec<u8> = t42_stream(&[
        row_packet(3, 1, b"forty two bytes"),
        row_packet(3, 2, b"and one to spare"),
        row_packet(4, 1, b"other magazine"),
    ])
    .chunks(PACKET_LEN)
    .flat_map(|packet| packet.iter().copied().chain(std::iter::once(0xa5)))
    .collect();

    assert_eq!(padded.len(), 129);

    let latch = ErrorLatch::new();
    let chunks = WstChunker::new(Cursor::new(padded), ChunkerOptions::default());

    let counted = Counted::new(latch.guard(chunks));
    let count = Counted::count(&counted);

    let packets = counted.filter_map(|(number, chunk)| Packet::from_slice(&chunk, number));
    let tap = MagHistogram::new(packets);
    let mags = tap.counters();

    let mag_three: MagSet = [3u8].into_iter().collect();
    let kept: Vec<Packet> = filter_packets(tap, mag_three, RowSet::ALL).collect();

    assert!(latch.take().is_ok());
    assert_eq!(count.snapshot(), 3);
    assert_eq!(kept.len(), 2);
    assert_eq!(mags.snapshot()[2], 2);
    assert_eq!(mags.snapshot()[3], 1);

    for packet in &kept {
        assert_eq!(packet.bytes().len(), PACKET_LEN);
    }
}

#[test]
fn verify_stream_slicing_controls() {
    let stream = t42_stream(&[
        row_packet(1, 1, b"zero"),
        row_packet(1, 2, b"one"),
        row_packet(1, 3, b"two"),
        row_packet(1, 4, b"three"),
        row_packet(1, 5, b"four"),
        row_packet(1, 6, b"five"),
    ]);

    let options = ChunkerOptions { start: 1, stop: Some(6), step: 2, limit: Some(2) };
    let chunks = FileChunker::with_options(Cursor::new(stream), PACKET_LEN, options);

    let rows: Vec<u8> = chunks
        .map(|chunk| chunk.unwrap())
        .filter_map(|(number, chunk)| Packet::from_slice(&chunk, number))
        .map(|packet| packet.mrag().row)
        .collect();

    assert_eq!(rows, vec![2, 4]);
}
