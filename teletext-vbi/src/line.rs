// Teletext
// Copyright (c) 2025-2026 The Project Teletext Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `line` module recovers teletext packets from single lines of raw VBI samples.
//!
//! Construction normalizes the line and locks onto the clock run-in. Two recovery methods are
//! offered: [`VbiLine::slice`] thresholds each bit centre and suits clean over-the-air captures,
//! while [`VbiLine::deconvolve`] classifies each bit against modelled inter-symbol-interference
//! waveforms and suits soft, unclamped sources such as VHS playback. Both are pure functions of
//! the samples and configuration.

use log::trace;

use teletext_core::packet::{MagSet, Packet, RowSet};
use teletext_core::stats::Reject;

use crate::config::{CaptureConfig, CRI_BITS, CRI_THRESHOLD, LINE_BITS, LINE_BYTES};

/// The framing code as assembled from the wire, least significant bit first. In transmission
/// order the code is 11100100.
const FRAMING_CODE: u8 = 0x27;

/// The minimum raw peak-to-baseline swing, in sample units, for a line to be worth searching.
const MIN_AMPLITUDE: f64 = 16.0;

/// Bit-level realignment attempts after a framing mismatch. The clock run-in is self-similar at
/// even bit shifts, so the lock may land a whole bit or two away from the framing code.
const REALIGN_BITS: [i32; 5] = [0, -1, 1, -2, 2];

/// One line of raw VBI samples and its recovery state.
pub struct VbiLine<'a> {
    config: &'a CaptureConfig,
    number: u64,
    /// Normalized samples of the trimmed line: baseline at 0.0, peak white at 1.0.
    samples: Vec<f32>,
    /// Fractional sample index of the first clock run-in bit, after `extra_roll`.
    start: f64,
    is_teletext: bool,
}

impl<'a> VbiLine<'a> {
    /// Normalize one captured line and search for the clock run-in.
    pub fn new(config: &'a CaptureConfig, raw: &[u8], number: u64, extra_roll: i32) -> VbiLine<'a> {
        let mut line =
            VbiLine { config, number, samples: Vec::new(), start: 0.0, is_teletext: false };

        if raw.len() < config.line_length() {
            trace!("line {}: short read ({} samples)", number, raw.len());
            return line;
        }

        let trimmed = &raw[config.line_trim()..config.line_length()];
        let (lo, hi) = config.line_start_range();

        // The window ahead of the clock run-in search range carries no signal; it provides the
        // baseline. The line peak provides the white level.
        let baseline =
            trimmed[..lo].iter().map(|&s| f64::from(s)).sum::<f64>() / lo as f64;
        let peak = trimmed.iter().copied().max().map_or(0.0, f64::from);

        if peak - baseline < MIN_AMPLITUDE {
            return line;
        }

        let scale = 1.0 / (peak - baseline);
        line.samples =
            trimmed.iter().map(|&s| ((f64::from(s) - baseline) * scale) as f32).collect();

        // Slide the clock run-in matched filter across the search range.
        let scores: Vec<f64> = (lo..hi).map(|p| line.cri_correlation(p as f64)).collect();

        let (best, &score) = match scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
        {
            Some(found) => found,
            None => return line,
        };

        if (score / CRI_BITS as f64) < f64::from(CRI_THRESHOLD) {
            trace!("line {}: no clock run-in (score {:.3})", number, score / CRI_BITS as f64);
            return line;
        }

        // Parabolic refinement recovers the fractional part of the lock position.
        let mut position = (lo + best) as f64;
        if best > 0 && best + 1 < scores.len() {
            let prev = scores[best - 1];
            let next = scores[best + 1];
            let denom = prev - 2.0 * score + next;
            if denom.abs() > f64::EPSILON {
                position += 0.5 * (prev - next) / denom;
            }
        }

        line.start = position + f64::from(extra_roll);
        line.is_teletext = true;
        line
    }

    /// The sequence number of this line.
    #[inline]
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Returns true if the clock run-in search succeeded.
    #[inline]
    pub fn is_teletext(&self) -> bool {
        self.is_teletext
    }

    /// The lock position of the first clock run-in bit within the trimmed line.
    #[inline]
    pub fn start(&self) -> f64 {
        self.start
    }

    /// The normalized samples of the trimmed line. Empty if the line was rejected before
    /// normalization.
    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// The sample value at a fractional index, by linear interpolation.
    fn sample_at(&self, pos: f64) -> f32 {
        let last = self.samples.len() - 1;
        let pos = pos.clamp(0.0, last as f64);
        let index = pos as usize;

        if index >= last {
            self.samples[last]
        }
        else {
            let frac = (pos - index as f64) as f32;
            self.samples[index] * (1.0 - frac) + self.samples[index + 1] * frac
        }
    }

    /// The mean level of the bit cell starting at `pos`.
    fn cell_level(&self, pos: f64) -> f64 {
        let filter = self.config.bit_filter();
        filter
            .iter()
            .enumerate()
            .map(|(t, &tap)| f64::from(tap) * f64::from(self.sample_at(pos + t as f64)))
            .sum()
    }

    /// Correlation of the alternating clock run-in pattern against the line at `pos`.
    fn cri_correlation(&self, pos: f64) -> f64 {
        let spb = self.config.samples_per_bit();
        let mut correlation = 0.0;

        for bit in 0..CRI_BITS {
            let level = self.cell_level(pos + bit as f64 * spb);
            // The run-in transmits 1, 0, 1, 0, ...
            if bit & 1 == 0 {
                correlation += level;
            }
            else {
                correlation -= level;
            }
        }

        correlation
    }

    /// Recover a packet by thresholding each bit centre against the line midpoint.
    ///
    /// The midpoint is the mean of eight samples around every bit centre, averaged over the
    /// whole line, which lands halfway between the black and white levels for any realistic mix
    /// of bits.
    pub fn slice(&self, mags: &MagSet, rows: &RowSet) -> Option<Packet> {
        if !self.is_teletext {
            return None;
        }

        let mut midpoint = 0.0f64;
        for &offset in self.config.bit_offsets().iter() {
            let centre = self.start + offset;
            for sub in 0..8 {
                midpoint += f64::from(self.sample_at(centre - 3.5 + sub as f64));
            }
        }
        let midpoint = (midpoint / (LINE_BITS * 8) as f64) as f32;

        self.recover(mags, rows, |centre| self.sample_at(centre) > midpoint)
    }

    /// Recover a packet by classifying each bit against the modelled waveforms of its 5-bit
    /// neighbourhood.
    ///
    /// This is the CPU reference path; it defines the output for any accelerated implementation.
    pub fn deconvolve(&self, mags: &MagSet, rows: &RowSet) -> Option<Packet> {
        if !self.is_teletext {
            return None;
        }

        self.recover(mags, rows, |centre| self.classify_bit(centre))
    }

    /// Pick the nearest neighbourhood waveform, in the least-squares sense, to the window of
    /// samples around a bit centre, and return that waveform's centre bit.
    fn classify_bit(&self, centre: f64) -> bool {
        let spb = self.config.samples_per_bit();
        let len = self.config.template_len();
        let window_start = centre - 2.5 * spb;

        let mut window = [0.0f32; 64];
        for (s, value) in window[..len].iter_mut().enumerate() {
            *value = self.sample_at(window_start + s as f64);
        }

        let mut best_score = f32::NEG_INFINITY;
        let mut best_pattern = 0;

        for pattern in 0..32 {
            let template = self.config.template(pattern);

            let mut score = 0.0f32;
            for (w, t) in window[..len].iter().zip(template) {
                score += w * t;
            }
            score -= self.config.template_bias(pattern);

            if score > best_score {
                best_score = score;
                best_pattern = pattern;
            }
        }

        best_pattern & 0x4 != 0
    }

    /// Assemble the line into bytes, validate the run-in and framing code, and apply the cheap
    /// address filter. Retries at small bit offsets to absorb a lock that slipped whole bits.
    fn recover(
        &self,
        mags: &MagSet,
        rows: &RowSet,
        bit_at: impl Fn(f64) -> bool,
    ) -> Option<Packet> {
        let spb = self.config.samples_per_bit();
        let offsets = self.config.bit_offsets();

        for &realign in REALIGN_BITS.iter() {
            let roll = self.start + f64::from(realign) * spb;

            let mut bytes = [0u8; LINE_BYTES];
            for (bit, &offset) in offsets.iter().enumerate() {
                if bit_at(roll + offset) {
                    bytes[bit >> 3] |= 1 << (bit & 0x7);
                }
            }

            if bytes[2] != FRAMING_CODE {
                continue;
            }
            // A one-bit slip reads the run-in with inverted phase.
            if bytes[1] != 0x55 && bytes[1] != 0xaa {
                continue;
            }

            let packet = Packet::from_slice(&bytes[3..], self.number)?;

            let mrag = packet.mrag();
            if mrag.errors.is_uncorrectable() {
                return None;
            }
            if !mags.contains(mrag.magazine) || !rows.contains(mrag.row) {
                return None;
            }

            return Some(packet);
        }

        None
    }
}

impl Reject for VbiLine<'_> {
    fn is_rejected(&self) -> bool {
        !self.is_teletext
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use teletext_core::coding::{hamming8_encode, parity_encode};
    use teletext_core::packet::PACKET_LEN;
    use teletext_core::stats::Rejects;

    use crate::config::{bit_pulse, CaptureOptions, Card};

    fn test_payload() -> [u8; PACKET_LEN] {
        // Magazine 3, row 7, with display bytes chosen to include long same-bit runs across byte
        // boundaries (0x78 followed by 0x1f transmits ten consecutive ones).
        let mut payload = [0u8; PACKET_LEN];
        payload[0] = hamming8_encode(0x3 | ((7 & 1) << 3));
        payload[1] = hamming8_encode(7 >> 1);

        let text = b"Pg 100 TELETEXT SERVICE x\x1f Mon 01 Jan";
        let padded = text.iter().copied().chain(std::iter::repeat(b' '));
        for (out, byte) in payload[2..].iter_mut().zip(padded) {
            *out = parity_encode(byte);
        }
        payload
    }

    fn wire_frame(payload: &[u8; PACKET_LEN]) -> [u8; LINE_BYTES] {
        let mut frame = [0u8; LINE_BYTES];
        frame[0] = 0x55;
        frame[1] = 0x55;
        frame[2] = FRAMING_CODE;
        frame[3..].copy_from_slice(payload);
        frame
    }

    /// Render a wire frame into raw samples through the modelled capture chain: each one bit
    /// contributes a pulse, the baseline sits at 40, and peak white reaches roughly 200.
    fn synthesize(config: &CaptureConfig, frame: &[u8; LINE_BYTES], start: f64) -> Vec<u8> {
        let spb = config.samples_per_bit();
        let origin = config.line_trim() as f64 + start;

        let mut raw = vec![0u8; config.line_length()];
        for (x, out) in raw.iter_mut().enumerate() {
            let t = x as f64 - origin;

            let nearest = (t / spb).floor() as i64;
            let mut level = 0.0;
            for bit in nearest - 4..=nearest + 4 {
                if bit < 0 || bit >= LINE_BITS as i64 {
                    continue;
                }
                if frame[(bit >> 3) as usize] & (1u8 << (bit & 0x7)) != 0 {
                    let centre = (bit as f64 + 0.5) * spb;
                    level += bit_pulse(t - centre, spb);
                }
            }

            *out = (40.0 + 160.0 * level).round().clamp(0.0, 255.0) as u8;
        }

        raw
    }

    #[test]
    fn verify_slice_recovers_clean_line() {
        let config = CaptureConfig::for_card(Card::Bt8x8).unwrap();
        let payload = test_payload();
        let raw = synthesize(&config, &wire_frame(&payload), 85.3);

        let line = VbiLine::new(&config, &raw, 11, 0);
        assert!(line.is_teletext());

        let packet = line.slice(&MagSet::ALL, &RowSet::ALL).expect("packet");
        assert_eq!(packet.bytes(), &payload);
        assert_eq!(packet.number(), 11);

        let mrag = packet.mrag();
        assert_eq!(mrag.magazine, 3);
        assert_eq!(mrag.row, 7);
    }

    #[test]
    fn verify_deconvolve_recovers_clean_line() {
        let config = CaptureConfig::for_card(Card::Bt8x8).unwrap();
        let payload = test_payload();
        let raw = synthesize(&config, &wire_frame(&payload), 97.6);

        let line = VbiLine::new(&config, &raw, 0, 0);
        assert!(line.is_teletext());

        let packet = line.deconvolve(&MagSet::ALL, &RowSet::ALL).expect("packet");
        assert_eq!(packet.bytes(), &payload);
    }

    #[test]
    fn verify_slice_survives_noise() {
        let config = CaptureConfig::for_card(Card::Bt8x8).unwrap();
        let payload = test_payload();
        let mut raw = synthesize(&config, &wire_frame(&payload), 72.0);

        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for sample in raw.iter_mut() {
            let noisy = i16::from(*sample) + rng.random_range(-6i16..=6);
            *sample = noisy.clamp(0, 255) as u8;
        }

        let line = VbiLine::new(&config, &raw, 0, 0);
        assert!(line.is_teletext());

        let packet = line.slice(&MagSet::ALL, &RowSet::ALL).expect("packet");
        assert_eq!(packet.bytes(), &payload);
    }

    #[test]
    fn verify_recovery_is_deterministic() {
        let config = CaptureConfig::for_card(Card::Saa7131).unwrap();
        let payload = test_payload();
        let raw = synthesize(&config, &wire_frame(&payload), 64.25);

        let a = VbiLine::new(&config, &raw, 0, 0);
        let b = VbiLine::new(&config, &raw, 0, 0);

        assert_eq!(a.start(), b.start());
        assert_eq!(
            a.deconvolve(&MagSet::ALL, &RowSet::ALL).map(|p| *p.bytes()),
            b.deconvolve(&MagSet::ALL, &RowSet::ALL).map(|p| *p.bytes()),
        );
    }

    #[test]
    fn verify_mrag_filter_rejects_cheaply() {
        let config = CaptureConfig::for_card(Card::Bt8x8).unwrap();
        let payload = test_payload();
        let raw = synthesize(&config, &wire_frame(&payload), 85.0);

        let line = VbiLine::new(&config, &raw, 0, 0);

        let other_mags: MagSet = [1u8].into_iter().collect();
        assert!(line.slice(&other_mags, &RowSet::ALL).is_none());

        let other_rows: RowSet = [0u8].into_iter().collect();
        assert!(line.slice(&MagSet::ALL, &other_rows).is_none());
    }

    #[test]
    fn verify_flat_line_is_rejected() {
        let config = CaptureConfig::for_card(Card::Bt8x8).unwrap();
        let raw = vec![0x80u8; config.line_length()];

        let line = VbiLine::new(&config, &raw, 0, 0);
        assert!(!line.is_teletext());
        assert!(line.slice(&MagSet::ALL, &RowSet::ALL).is_none());
        assert!(line.deconvolve(&MagSet::ALL, &RowSet::ALL).is_none());

        // The rejects tap counts the line while passing it through.
        let line = VbiLine::new(&config, &raw, 0, 0);
        let tap = Rejects::new(std::iter::once(line));
        let counters = tap.counters();
        assert_eq!(tap.count(), 1);
        assert_eq!(counters.snapshot(), (1, 1));
    }

    #[test]
    fn verify_extra_roll_shifts_the_lock() {
        let config = CaptureConfig::for_card(Card::Bt8x8).unwrap();
        let payload = test_payload();
        let raw = synthesize(&config, &wire_frame(&payload), 85.0);

        let neutral = VbiLine::new(&config, &raw, 0, 0);
        let rolled = VbiLine::new(&config, &raw, 0, -3);
        assert!((neutral.start() - rolled.start() - 3.0).abs() < 1e-9);
    }
}
