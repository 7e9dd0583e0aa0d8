// Teletext
// Copyright (c) 2025-2026 The Project Teletext Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `pipeline` module implements the lazy packet-stream transformations: address filtering,
//! pagination, and subpage squashing.
//!
//! Every stage is a pull-based iterator that requests at most one upstream element per downstream
//! request and buffers nothing beyond what its state machine requires. Dropping a stage drops the
//! whole upstream chain, so a consumer that stops iterating releases the input promptly.

use std::collections::{HashMap, VecDeque};

use smallvec::SmallVec;

use crate::packet::{MagSet, Packet, RowSet, PACKET_LEN};
use crate::subpage::{Subpage, SubpageKey, SUBPAGE_ROWS};

/// An optionally-constrained set of page or subpage numbers. The default set admits everything.
#[derive(Debug, Clone, Default)]
pub struct PageSet(Option<std::collections::HashSet<u16>>);

impl PageSet {
    /// The unconstrained set.
    pub fn all() -> PageSet {
        PageSet(None)
    }

    /// Returns true if the set admits `value`.
    #[inline]
    pub fn contains(&self, value: u16) -> bool {
        self.0.as_ref().map_or(true, |set| set.contains(&value))
    }

    /// Returns true if the set was built from explicit members.
    pub fn is_constrained(&self) -> bool {
        self.0.is_some()
    }
}

impl FromIterator<u16> for PageSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> PageSet {
        PageSet(Some(iter.into_iter().collect()))
    }
}

/// Filter packets by magazine and row. Packets whose address group is damaged beyond repair are
/// dropped here, since they cannot be attributed to any magazine.
pub struct MagRowFilter<I> {
    inner: I,
    mags: MagSet,
    rows: RowSet,
}

impl<I> MagRowFilter<I> {
    pub fn new(inner: I, mags: MagSet, rows: RowSet) -> MagRowFilter<I> {
        MagRowFilter { inner, mags, rows }
    }
}

impl<I: Iterator<Item = Packet>> Iterator for MagRowFilter<I> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        for packet in self.inner.by_ref() {
            let mrag = packet.mrag();
            if mrag.errors.is_uncorrectable() {
                continue;
            }
            if self.mags.contains(mrag.magazine) && self.rows.contains(mrag.row) {
                return Some(packet);
            }
        }
        None
    }
}

/// Convenience constructor for [`MagRowFilter`].
pub fn filter_packets<I>(packets: I, mags: MagSet, rows: RowSet) -> MagRowFilter<I>
where
    I: Iterator<Item = Packet>,
{
    MagRowFilter::new(packets, mags, rows)
}

/// Sort a packet stream into contiguous subpages.
///
/// Eight magazines transmit interleaved, so a collection buffer is kept per magazine. A header
/// packet closes the magazine's open buffer, emits it regardless of completeness, and opens a new
/// buffer when the header passes the page and subpage filters. Display rows are appended to their
/// magazine's open buffer; rows seen while no buffer is open are discarded. At the end of the
/// stream all open buffers are flushed.
///
/// Within one magazine, subpages are emitted in the order their headers were seen.
pub struct Paginate<I> {
    inner: I,
    pages: PageSet,
    subpages: PageSet,
    open: [Option<Subpage>; 9],
    pending: VecDeque<Subpage>,
    done: bool,
}

impl<I> Paginate<I> {
    pub fn new(inner: I, pages: PageSet, subpages: PageSet) -> Paginate<I> {
        Paginate {
            inner,
            pages,
            subpages,
            open: std::array::from_fn(|_| None),
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn flush(&mut self) {
        for open in self.open.iter_mut() {
            if let Some(subpage) = open.take() {
                self.pending.push_back(subpage);
            }
        }
    }
}

impl<I: Iterator<Item = Packet>> Iterator for Paginate<I> {
    type Item = Subpage;

    fn next(&mut self) -> Option<Subpage> {
        loop {
            if let Some(subpage) = self.pending.pop_front() {
                return Some(subpage);
            }

            if self.done {
                return None;
            }

            let packet = match self.inner.next() {
                Some(packet) => packet,
                None => {
                    self.done = true;
                    self.flush();
                    continue;
                }
            };

            let mrag = packet.mrag();
            if mrag.errors.is_uncorrectable() {
                continue;
            }

            let slot = usize::from(mrag.magazine & 0x7);

            if mrag.row == 0 {
                if let Some(subpage) = self.open[slot].take() {
                    self.pending.push_back(subpage);
                }

                let header = packet.header();
                if header.errors.uncorrectable > 0 {
                    // The key cannot be trusted; stay idle until the next header.
                    continue;
                }

                let key = SubpageKey {
                    magazine: mrag.magazine,
                    page: header.page,
                    subpage: header.subpage,
                };

                if self.pages.contains(key.page_address()) && self.subpages.contains(key.subpage) {
                    let mut subpage = Subpage::new(key);
                    subpage.insert_row(0, *packet.bytes());
                    self.open[slot] = Some(subpage);
                }
            }
            else if usize::from(mrag.row) < SUBPAGE_ROWS {
                if let Some(subpage) = self.open[slot].as_mut() {
                    subpage.insert_row(mrag.row, *packet.bytes());
                }
            }
        }
    }
}

/// Convenience constructor for [`Paginate`].
pub fn paginate<I>(packets: I, pages: PageSet, subpages: PageSet) -> Paginate<I>
where
    I: Iterator<Item = Packet>,
{
    Paginate::new(packets, pages, subpages)
}

#[derive(Debug, Clone, Copy)]
struct Vote {
    value: u8,
    count: u32,
    /// Arrival sequence of the most recent contributor of this value.
    last: u64,
    /// The lowest error weight among contributors of this value.
    errors: u32,
}

struct RowVotes {
    cols: [SmallVec<[Vote; 2]>; PACKET_LEN],
}

impl RowVotes {
    fn new() -> RowVotes {
        RowVotes { cols: std::array::from_fn(|_| SmallVec::new()) }
    }

    fn add(&mut self, data: &[u8; PACKET_LEN], seq: u64, errors: u32) {
        for (votes, &value) in self.cols.iter_mut().zip(data) {
            match votes.iter_mut().find(|vote| vote.value == value) {
                Some(vote) => {
                    vote.count += 1;
                    vote.last = seq;
                    vote.errors = vote.errors.min(errors);
                }
                None => votes.push(Vote { value, count: 1, last: seq, errors }),
            }
        }
    }

    /// The per-column winner: highest frequency, ties to the most recent value, then to the value
    /// contributed by the least damaged row.
    fn merged(&self) -> [u8; PACKET_LEN] {
        let mut data = [0u8; PACKET_LEN];

        for (out, votes) in data.iter_mut().zip(&self.cols) {
            let winner = votes.iter().max_by(|a, b| {
                a.count
                    .cmp(&b.count)
                    .then(a.last.cmp(&b.last))
                    .then(b.errors.cmp(&a.errors))
            });
            if let Some(winner) = winner {
                *out = winner.value;
            }
        }

        data
    }
}

struct SquashGroup {
    key: SubpageKey,
    duplicates: u32,
    rows: [Option<RowVotes>; SUBPAGE_ROWS],
}

impl SquashGroup {
    fn new(key: SubpageKey) -> SquashGroup {
        SquashGroup { key, duplicates: 0, rows: std::array::from_fn(|_| None) }
    }

    fn add(&mut self, subpage: &Subpage, seq: u64) {
        self.duplicates += 1;

        for (row, data) in subpage.rows() {
            let errors = Packet::new(*data, 0).errors().weight();
            self.rows[usize::from(row)]
                .get_or_insert_with(RowVotes::new)
                .add(data, seq, errors);
        }
    }

    /// Merge the accumulated votes. A row is present only if at least one contributor supplied it.
    fn merged(&self) -> Subpage {
        let mut subpage = Subpage::new(self.key);

        for (row, votes) in self.rows.iter().enumerate() {
            if let Some(votes) = votes {
                subpage.insert_row(row as u8, votes.merged());
            }
        }

        subpage
    }
}

/// Reduce transmission errors by frequency analysis over repeated transmissions of each subpage.
///
/// Groups are cached by `(magazine, page)` so that a subpage rotation displaces the previous
/// subpage of the same page. A displaced group is emitted merged if it accumulated at least
/// `min_duplicates` transmissions, and silently dropped otherwise. At the end of the stream every
/// cached group that met the threshold is emitted, ordered by key.
pub struct SubpageSquash<I> {
    inner: I,
    min_duplicates: u32,
    cache: HashMap<(u8, u8), SquashGroup>,
    pending: VecDeque<Subpage>,
    seq: u64,
    done: bool,
}

impl<I> SubpageSquash<I> {
    pub fn new(inner: I, min_duplicates: u32) -> SubpageSquash<I> {
        SubpageSquash {
            inner,
            min_duplicates: min_duplicates.max(1),
            cache: HashMap::new(),
            pending: VecDeque::new(),
            seq: 0,
            done: false,
        }
    }

    fn flush(&mut self) {
        let mut groups: Vec<SquashGroup> = self.cache.drain().map(|(_, group)| group).collect();
        groups.sort_by_key(|group| group.key);

        for group in groups {
            if group.duplicates >= self.min_duplicates {
                self.pending.push_back(group.merged());
            }
        }
    }
}

impl<I: Iterator<Item = Subpage>> Iterator for SubpageSquash<I> {
    type Item = Subpage;

    fn next(&mut self) -> Option<Subpage> {
        loop {
            if let Some(subpage) = self.pending.pop_front() {
                return Some(subpage);
            }

            if self.done {
                return None;
            }

            let subpage = match self.inner.next() {
                Some(subpage) => subpage,
                None => {
                    self.done = true;
                    self.flush();
                    continue;
                }
            };

            let key = subpage.key();
            let slot = (key.magazine, key.page);
            self.seq += 1;

            match self.cache.get_mut(&slot) {
                Some(group) if group.key == key => {
                    group.add(&subpage, self.seq);
                }
                Some(group) => {
                    // A different subpage of the same page displaces the cached group.
                    let displaced = std::mem::replace(&mut *group, SquashGroup::new(key));
                    group.add(&subpage, self.seq);

                    if displaced.duplicates >= self.min_duplicates {
                        self.pending.push_back(displaced.merged());
                    }
                }
                None => {
                    let group = self.cache.entry(slot).or_insert_with(|| SquashGroup::new(key));
                    group.add(&subpage, self.seq);
                }
            }
        }
    }
}

/// Convenience constructor for [`SubpageSquash`].
pub fn subpage_squash<I>(subpages: I, min_duplicates: u32) -> SubpageSquash<I>
where
    I: Iterator<Item = Subpage>,
{
    SubpageSquash::new(subpages, min_duplicates)
}
