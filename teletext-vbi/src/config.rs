// Teletext
// Copyright (c) 2025-2026 The Project Teletext Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `config` module describes capture card geometry and derives the sampling state shared by
//! every line of a capture: per-bit sampling offsets, the clock run-in matched filter, and the
//! inter-symbol-interference templates used by deconvolution.

use teletext_core::errors::{config_error, Result};

/// The World System Teletext bit rate in bits per second.
pub const WST_BIT_RATE: f64 = 6_937_500.0;

/// The number of bytes in one transmitted teletext line: clock run-in, framing code, and payload.
pub const LINE_BYTES: usize = 45;

/// The number of bits in one transmitted teletext line.
pub const LINE_BITS: usize = LINE_BYTES * 8;

/// The number of clock run-in bits preceding the framing code.
pub const CRI_BITS: usize = 16;

/// The width of the modelled bit pulse, as a fraction of the bit period. The capture chain low
/// pass smears each transmitted bit into roughly this Gaussian.
pub(crate) const PULSE_SIGMA_BITS: f64 = 0.4;

/// The span of the deconvolution classifier window in bits: the decided bit plus two neighbours
/// on each side.
pub(crate) const TEMPLATE_SPAN_BITS: usize = 5;

/// Minimum mean clock run-in correlation per filter tap for a line to be considered teletext.
pub(crate) const CRI_THRESHOLD: f32 = 0.18;

/// A supported capture card profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Card {
    /// Brooktree Bt848/Bt878 frame grabbers: 2048 samples per line at 35.468950 MHz.
    Bt8x8,
    /// Philips SAA7131 based grabbers: 1728 samples per line at 27 MHz.
    Saa7131,
    /// Conexant CX2388x based grabbers.
    Cx88,
}

impl Card {
    /// All supported profiles.
    pub const ALL: [Card; 3] = [Card::Bt8x8, Card::Saa7131, Card::Cx88];

    /// The profile name used on the command line.
    pub fn name(&self) -> &'static str {
        match *self {
            Card::Bt8x8 => "bt8x8",
            Card::Saa7131 => "saa7131",
            Card::Cx88 => "cx88",
        }
    }

    /// Look up a profile by name.
    pub fn from_name(name: &str) -> Option<Card> {
        Card::ALL.iter().copied().find(|card| card.name() == name)
    }

    fn geometry(&self) -> (usize, f64, usize, (usize, usize)) {
        // (line_length, sample_rate, line_trim, line_start_range)
        match *self {
            Card::Bt8x8 => (2048, 35_468_950.0, 12, (60, 130)),
            Card::Saa7131 => (1728, 27_000_000.0, 0, (30, 120)),
            Card::Cx88 => (2048, 35_468_950.0, 0, (60, 130)),
        }
    }
}

/// Capture configuration overrides layered over a card profile.
#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    /// The card profile supplying the defaults.
    pub card: Card,
    /// Override the number of samples per line.
    pub line_length: Option<usize>,
    /// Override the sample rate in Hz.
    pub sample_rate: Option<f64>,
    /// Override the number of leading samples to discard.
    pub line_trim: Option<usize>,
    /// Override the clock run-in search window, as sample indices into the trimmed line.
    pub line_start_range: Option<(usize, usize)>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        CaptureOptions {
            card: Card::Bt8x8,
            line_length: None,
            sample_rate: None,
            line_trim: None,
            line_start_range: None,
        }
    }
}

/// The immutable per-capture geometry and derived sampling state.
///
/// A `CaptureConfig` is built once at startup and shared by reference between every line of the
/// capture.
pub struct CaptureConfig {
    line_length: usize,
    sample_rate: f64,
    line_trim: usize,
    line_start_range: (usize, usize),
    bit_rate: f64,
    samples_per_bit: f64,
    /// Sampling offset of each bit centre relative to the clock run-in lock position.
    bit_offsets: [f64; LINE_BITS],
    /// Boxcar matched filter covering one bit cell, used by the clock run-in search.
    bit_filter: Vec<f32>,
    /// Modelled waveforms of every 5-bit neighbourhood, flattened, in normalized signal units.
    templates: Vec<f32>,
    /// Half the energy of each template, the bias term of nearest-waveform classification.
    template_bias: [f32; 32],
    template_len: usize,
}

impl CaptureConfig {
    /// Build the configuration for a card profile with optional overrides.
    pub fn new(options: &CaptureOptions) -> Result<CaptureConfig> {
        let (line_length, sample_rate, line_trim, line_start_range) = options.card.geometry();

        let line_length = options.line_length.unwrap_or(line_length);
        let sample_rate = options.sample_rate.unwrap_or(sample_rate);
        let line_trim = options.line_trim.unwrap_or(line_trim);
        let line_start_range = options.line_start_range.unwrap_or(line_start_range);

        let bit_rate = WST_BIT_RATE;

        if !(sample_rate > bit_rate) {
            return config_error("sample rate must exceed the teletext bit rate");
        }

        let samples_per_bit = sample_rate / bit_rate;

        if samples_per_bit > 12.0 {
            return config_error("sample rate too high for the deconvolution window");
        }

        let (lo, hi) = line_start_range;
        if lo < 4 || lo >= hi {
            return config_error("line start range must be ascending and leave a quiet window");
        }

        // The last bit cell, plus the classifier window overhang, must fit inside the trimmed
        // line even when the clock run-in is found at the top of the search window.
        let span = hi as f64 + samples_per_bit * (LINE_BITS as f64 + 2.5);
        if line_trim >= line_length || span > (line_length - line_trim) as f64 {
            return config_error("teletext line does not fit the sample window");
        }

        let mut bit_offsets = [0.0; LINE_BITS];
        for (bit, offset) in bit_offsets.iter_mut().enumerate() {
            *offset = (bit as f64 + 0.5) * samples_per_bit;
        }

        let filter_len = samples_per_bit.round().max(1.0) as usize;
        let bit_filter = vec![1.0 / filter_len as f32; filter_len];

        let (templates, template_bias, template_len) = build_templates(samples_per_bit);

        Ok(CaptureConfig {
            line_length,
            sample_rate,
            line_trim,
            line_start_range,
            bit_rate,
            samples_per_bit,
            bit_offsets,
            bit_filter,
            templates,
            template_bias,
            template_len,
        })
    }

    /// The configuration of a card profile without overrides.
    pub fn for_card(card: Card) -> Result<CaptureConfig> {
        CaptureConfig::new(&CaptureOptions { card, ..Default::default() })
    }

    /// The number of samples per captured line.
    #[inline]
    pub fn line_length(&self) -> usize {
        self.line_length
    }

    /// The capture sample rate in Hz.
    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// The number of leading samples discarded from every line.
    #[inline]
    pub fn line_trim(&self) -> usize {
        self.line_trim
    }

    /// The clock run-in search window, in sample indices into the trimmed line.
    #[inline]
    pub fn line_start_range(&self) -> (usize, usize) {
        self.line_start_range
    }

    /// The teletext bit rate in bits per second.
    #[inline]
    pub fn bit_rate(&self) -> f64 {
        self.bit_rate
    }

    /// The number of samples per transmitted bit.
    #[inline]
    pub fn samples_per_bit(&self) -> f64 {
        self.samples_per_bit
    }

    /// Sampling offsets of all 360 bit centres relative to the lock position.
    #[inline]
    pub fn bit_offsets(&self) -> &[f64; LINE_BITS] {
        &self.bit_offsets
    }

    /// The bit-cell matched filter taps.
    #[inline]
    pub fn bit_filter(&self) -> &[f32] {
        &self.bit_filter
    }

    /// The length in samples of one deconvolution template.
    #[inline]
    pub fn template_len(&self) -> usize {
        self.template_len
    }

    /// The modelled waveform of one 5-bit neighbourhood pattern. Bit 0 of `pattern` is the
    /// earliest bit.
    #[inline]
    pub fn template(&self, pattern: usize) -> &[f32] {
        let base = pattern * self.template_len;
        &self.templates[base..base + self.template_len]
    }

    /// Half the energy of one template. Subtracting this from the correlation score makes the
    /// highest score the nearest waveform in the least-squares sense.
    #[inline]
    pub fn template_bias(&self, pattern: usize) -> f32 {
        self.template_bias[pattern]
    }
}

impl std::fmt::Debug for CaptureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureConfig")
            .field("line_length", &self.line_length)
            .field("sample_rate", &self.sample_rate)
            .field("line_trim", &self.line_trim)
            .field("line_start_range", &self.line_start_range)
            .field("samples_per_bit", &self.samples_per_bit)
            .finish()
    }
}

/// The modelled capture-chain response to a single transmitted bit.
pub(crate) fn bit_pulse(x: f64, samples_per_bit: f64) -> f64 {
    let sigma = PULSE_SIGMA_BITS * samples_per_bit;
    (-0.5 * (x / sigma) * (x / sigma)).exp()
}

/// Build the bank of 32 classifier templates. Each template is the modelled waveform of one
/// 5-bit neighbourhood in normalized signal units, kept raw so that a window can be matched
/// against it in the least-squares sense: `score = window . template - energy / 2`.
fn build_templates(samples_per_bit: f64) -> (Vec<f32>, [f32; 32], usize) {
    let template_len = (TEMPLATE_SPAN_BITS as f64 * samples_per_bit).ceil() as usize;
    let mut templates = vec![0.0f32; 32 * template_len];
    let mut template_bias = [0.0f32; 32];

    for pattern in 0..32usize {
        let template = &mut templates[pattern * template_len..(pattern + 1) * template_len];

        for (s, value) in template.iter_mut().enumerate() {
            let mut level = 0.0;
            for bit in 0..TEMPLATE_SPAN_BITS {
                if pattern & (1 << bit) != 0 {
                    let centre = (bit as f64 + 0.5) * samples_per_bit;
                    level += bit_pulse(s as f64 - centre, samples_per_bit);
                }
            }
            *value = level as f32;
        }

        template_bias[pattern] = template.iter().map(|v| v * v).sum::<f32>() / 2.0;
    }

    (templates, template_bias, template_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_card_profiles_are_valid() {
        for card in Card::ALL {
            let config = CaptureConfig::for_card(card).unwrap();
            assert!(config.samples_per_bit() > 1.0);
            assert_eq!(config.bit_offsets().len(), LINE_BITS);
            assert_eq!(Card::from_name(card.name()), Some(card));
        }
    }

    #[test]
    fn verify_overrides_replace_profile_fields() {
        let options = CaptureOptions {
            card: Card::Bt8x8,
            line_length: Some(4096),
            ..Default::default()
        };
        let config = CaptureConfig::new(&options).unwrap();
        assert_eq!(config.line_length(), 4096);
        assert_eq!(config.line_trim(), 12);
    }

    #[test]
    fn verify_invalid_geometry_is_rejected() {
        let options = CaptureOptions {
            card: Card::Bt8x8,
            line_length: Some(1000),
            ..Default::default()
        };
        assert!(CaptureConfig::new(&options).is_err());

        let options = CaptureOptions {
            card: Card::Bt8x8,
            sample_rate: Some(1_000_000.0),
            ..Default::default()
        };
        assert!(CaptureConfig::new(&options).is_err());
    }

    #[test]
    fn verify_template_bank() {
        let config = CaptureConfig::for_card(Card::Bt8x8).unwrap();

        // The all-zeros neighbourhood is silence; every other pattern carries energy, and the
        // bias term is consistent with the stored waveform.
        assert_eq!(config.template_bias(0), 0.0);

        for pattern in 0..32 {
            let template = config.template(pattern);
            assert_eq!(template.len(), config.template_len());

            let energy: f32 = template.iter().map(|v| v * v).sum();
            assert!((energy / 2.0 - config.template_bias(pattern)).abs() < 1e-5);

            if pattern != 0 {
                assert!(energy > 0.5);
            }
        }
    }
}
