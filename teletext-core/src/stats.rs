// Teletext
// Copyright (c) 2025 The Project Teletext Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `stats` module implements non-consuming statistics taps.
//!
//! A tap wraps a lazy stage and passes every element through unchanged while bumping shared
//! counters. The counters live behind an `Arc` handle with a snapshot accessor, so a progress
//! reporter on another thread can consult them at its own cadence without touching the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::packet::Packet;

/// The number of bins in an [`ErrorHistogram`]. The last bin collects everything at or above its
/// weight.
pub const ERROR_BINS: usize = 16;

/// An element that may be rejected by an upstream recovery stage. Implemented by VBI lines whose
/// clock run-in search failed.
pub trait Reject {
    fn is_rejected(&self) -> bool;
}

/// Shared counter for a plain element count.
#[derive(Debug, Default)]
pub struct Count {
    total: AtomicU64,
}

impl Count {
    pub fn snapshot(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// A tap that counts elements of any type.
pub struct Counted<I> {
    inner: I,
    count: Arc<Count>,
}

impl<I> Counted<I> {
    pub fn new(inner: I) -> Counted<I> {
        Counted { inner, count: Arc::new(Count::default()) }
    }

    pub fn count(&self) -> Arc<Count> {
        Arc::clone(&self.count)
    }
}

impl<T, I: Iterator<Item = T>> Iterator for Counted<I> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.inner.next()?;
        self.count.total.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }
}

/// Shared counters for [`Rejects`].
#[derive(Debug, Default)]
pub struct RejectCounters {
    total: AtomicU64,
    rejected: AtomicU64,
}

impl RejectCounters {
    /// A `(rejected, total)` snapshot.
    pub fn snapshot(&self) -> (u64, u64) {
        (self.rejected.load(Ordering::Relaxed), self.total.load(Ordering::Relaxed))
    }
}

/// A tap counting rejected elements against the total.
pub struct Rejects<I> {
    inner: I,
    counters: Arc<RejectCounters>,
}

impl<I> Rejects<I> {
    pub fn new(inner: I) -> Rejects<I> {
        Rejects { inner, counters: Arc::new(RejectCounters::default()) }
    }

    pub fn counters(&self) -> Arc<RejectCounters> {
        Arc::clone(&self.counters)
    }
}

impl<T: Reject, I: Iterator<Item = T>> Iterator for Rejects<I> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.inner.next()?;
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        if item.is_rejected() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        }
        Some(item)
    }
}

/// Shared counters for [`MagHistogram`].
#[derive(Debug, Default)]
pub struct MagCounters {
    counts: [AtomicU64; 8],
}

impl MagCounters {
    /// Per-magazine counts, indexed by magazine minus one.
    pub fn snapshot(&self) -> [u64; 8] {
        std::array::from_fn(|i| self.counts[i].load(Ordering::Relaxed))
    }
}

/// A tap counting packets by magazine.
pub struct MagHistogram<I> {
    inner: I,
    counters: Arc<MagCounters>,
}

impl<I> MagHistogram<I> {
    pub fn new(inner: I) -> MagHistogram<I> {
        MagHistogram { inner, counters: Arc::new(MagCounters::default()) }
    }

    pub fn counters(&self) -> Arc<MagCounters> {
        Arc::clone(&self.counters)
    }
}

impl<I: Iterator<Item = Packet>> Iterator for MagHistogram<I> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        let packet = self.inner.next()?;
        let mrag = packet.mrag();
        if !mrag.errors.is_uncorrectable() {
            self.counters.counts[usize::from(mrag.magazine - 1)].fetch_add(1, Ordering::Relaxed);
        }
        Some(packet)
    }
}

/// Shared counters for [`RowHistogram`].
#[derive(Debug, Default)]
pub struct RowCounters {
    counts: [AtomicU64; 32],
}

impl RowCounters {
    /// Per-row counts.
    pub fn snapshot(&self) -> [u64; 32] {
        std::array::from_fn(|i| self.counts[i].load(Ordering::Relaxed))
    }
}

/// A tap counting packets by row.
pub struct RowHistogram<I> {
    inner: I,
    counters: Arc<RowCounters>,
}

impl<I> RowHistogram<I> {
    pub fn new(inner: I) -> RowHistogram<I> {
        RowHistogram { inner, counters: Arc::new(RowCounters::default()) }
    }

    pub fn counters(&self) -> Arc<RowCounters> {
        Arc::clone(&self.counters)
    }
}

impl<I: Iterator<Item = Packet>> Iterator for RowHistogram<I> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        let packet = self.inner.next()?;
        let mrag = packet.mrag();
        if !mrag.errors.is_uncorrectable() {
            self.counters.counts[usize::from(mrag.row & 0x1f)].fetch_add(1, Ordering::Relaxed);
        }
        Some(packet)
    }
}

/// Shared counters for [`ErrorHistogram`].
#[derive(Debug, Default)]
pub struct ErrorCounters {
    bins: [AtomicU64; ERROR_BINS],
}

impl ErrorCounters {
    /// Counts per error weight bin.
    pub fn snapshot(&self) -> [u64; ERROR_BINS] {
        std::array::from_fn(|i| self.bins[i].load(Ordering::Relaxed))
    }
}

/// A tap binning packets by their aggregated error weight.
pub struct ErrorHistogram<I> {
    inner: I,
    counters: Arc<ErrorCounters>,
}

impl<I> ErrorHistogram<I> {
    pub fn new(inner: I) -> ErrorHistogram<I> {
        ErrorHistogram { inner, counters: Arc::new(ErrorCounters::default()) }
    }

    pub fn counters(&self) -> Arc<ErrorCounters> {
        Arc::clone(&self.counters)
    }
}

impl<I: Iterator<Item = Packet>> Iterator for ErrorHistogram<I> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        let packet = self.inner.next()?;
        let bin = (packet.errors().weight() as usize).min(ERROR_BINS - 1);
        self.counters.bins[bin].fetch_add(1, Ordering::Relaxed);
        Some(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coding::{hamming8_encode, parity_encode};
    use crate::packet::PACKET_LEN;

    fn row_packet(magazine: u8, row: u8, number: u64) -> Packet {
        let mut data = [parity_encode(0x20); PACKET_LEN];
        data[0] = hamming8_encode((magazine & 0x7) | ((row & 1) << 3));
        data[1] = hamming8_encode(row >> 1);
        Packet::new(data, number)
    }

    #[test]
    fn verify_taps_are_transparent() {
        let packets = vec![
            row_packet(1, 1, 0),
            row_packet(2, 5, 1),
            row_packet(1, 1, 2),
        ];

        let tap = MagHistogram::new(packets.clone().into_iter());
        let tap = RowHistogram::new(tap);
        let tap = ErrorHistogram::new(tap);

        let seen: Vec<Packet> = tap.collect();
        assert_eq!(seen, packets);
    }

    #[test]
    fn verify_mag_histogram_counts() {
        let packets = vec![
            row_packet(1, 1, 0),
            row_packet(2, 5, 1),
            row_packet(1, 1, 2),
        ];

        let tap = MagHistogram::new(packets.into_iter());
        let counters = tap.counters();
        tap.for_each(drop);

        let counts = counters.snapshot();
        assert_eq!(counts[0], 2);
        assert_eq!(counts[1], 1);
        assert_eq!(counts[2..].iter().sum::<u64>(), 0);
    }

    #[test]
    fn verify_error_histogram_bins_clean_packets() {
        let packets = vec![row_packet(1, 1, 0); 4];

        let tap = ErrorHistogram::new(packets.into_iter());
        let counters = tap.counters();
        tap.for_each(drop);

        assert_eq!(counters.snapshot()[0], 4);
    }

    #[test]
    fn verify_counted() {
        let tap = Counted::new(0..5u32);
        let count = Counted::count(&tap);
        assert_eq!(tap.sum::<u32>(), 10);
        assert_eq!(count.snapshot(), 5);
    }
}
