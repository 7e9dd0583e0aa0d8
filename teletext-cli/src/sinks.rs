// Teletext
// Copyright (c) 2025-2026 The Project Teletext Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Output sinks. Each sink owns one writer and consumes packets from the terminal stage of a
//! pipeline; a write failure is fatal and aborts the run.

use std::fs::File;
use std::io::{self, IsTerminal, Write};

use teletext_core::coding::{hamming8_decode, parity_decode};
use teletext_core::errors::{Error, Result};
use teletext_core::packet::{Packet, PACKET_LEN};

/// The kinds of output sink selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// Resolve to `Ansi` on a terminal and `Bytes` otherwise.
    Auto,
    /// Plain UTF-8 text with control characters stripped.
    Text,
    /// Colored text driven by the teletext spacing attributes.
    Ansi,
    /// One human-readable line per packet with address and error counts.
    Debug,
    /// A per-byte error density plot.
    Bar,
    /// The raw 42-byte payloads.
    Bytes,
}

impl SinkKind {
    pub const NAMES: [&'static str; 6] = ["auto", "text", "ansi", "debug", "bar", "bytes"];

    pub fn from_name(name: &str) -> Option<SinkKind> {
        match name {
            "auto" => Some(SinkKind::Auto),
            "text" => Some(SinkKind::Text),
            "ansi" => Some(SinkKind::Ansi),
            "debug" => Some(SinkKind::Debug),
            "bar" => Some(SinkKind::Bar),
            "bytes" => Some(SinkKind::Bytes),
            _ => None,
        }
    }
}

/// A terminal pipeline stage writing packets somewhere.
pub trait PacketSink {
    fn put(&mut self, packet: &Packet) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Open a sink of the given kind over `path`, with `-` standing for standard output.
pub fn open_sink(kind: SinkKind, path: &str) -> Result<Box<dyn PacketSink>> {
    let to_stdout = path == "-";

    let kind = match kind {
        SinkKind::Auto => {
            if to_stdout && io::stdout().is_terminal() {
                SinkKind::Ansi
            }
            else {
                SinkKind::Bytes
            }
        }
        kind => kind,
    };

    let writer: Box<dyn Write> = if to_stdout {
        Box::new(io::stdout())
    }
    else {
        Box::new(File::create(path).map_err(Error::IoError)?)
    };

    Ok(match kind {
        SinkKind::Text => Box::new(TextSink { writer }),
        SinkKind::Ansi => Box::new(AnsiSink { writer }),
        SinkKind::Debug => Box::new(DebugSink { writer }),
        SinkKind::Bar => Box::new(BarSink { writer }),
        SinkKind::Bytes | SinkKind::Auto => Box::new(BytesSink { writer }),
    })
}

fn sink_io(err: io::Error) -> Error {
    Error::SinkError(err)
}

/// Map a 7-bit display byte to the G0 Latin character set. Control codes map to a space.
fn g0_char(byte: u8) -> char {
    match byte {
        0x23 => '£',
        0x24 => '¤',
        0x5c => '½',
        0x5e => '↑',
        0x5f => '#',
        0x60 => '–',
        0x7b => '¼',
        0x7c => '‖',
        0x7d => '¾',
        0x7e => '÷',
        0x7f => '█',
        0x20..=0x7e => byte as char,
        _ => ' ',
    }
}

struct BytesSink {
    writer: Box<dyn Write>,
}

impl PacketSink for BytesSink {
    fn put(&mut self, packet: &Packet) -> Result<()> {
        self.writer.write_all(packet.bytes()).map_err(sink_io)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(sink_io)
    }
}

struct TextSink {
    writer: Box<dyn Write>,
}

impl PacketSink for TextSink {
    fn put(&mut self, packet: &Packet) -> Result<()> {
        let mrag = packet.mrag();

        let line: String = match mrag.row {
            0 => {
                let header = packet.header();
                let text: String =
                    packet.header_display().bytes().iter().map(|&b| g0_char(b)).collect();
                format!("P{:X}{:02X}:{:04X} {}", mrag.magazine, header.page, header.subpage, text)
            }
            1..=25 => packet.displayable().bytes().iter().map(|&b| g0_char(b)).collect(),
            _ => return Ok(()),
        };

        writeln!(self.writer, "{}", line).map_err(sink_io)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(sink_io)
    }
}

struct AnsiSink {
    writer: Box<dyn Write>,
}

impl AnsiSink {
    /// Render one display row, interpreting the spacing attributes that affect color. Every
    /// attribute occupies a character cell, rendered as a space.
    fn put_row(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut fg = 7u8;

        write!(self.writer, "\x1b[37;40m")?;

        for &byte in bytes {
            match byte {
                // Alpha and mosaic color codes set the foreground.
                0x00..=0x07 | 0x10..=0x17 => {
                    fg = byte & 0x7;
                    write!(self.writer, "\x1b[3{}m ", fg)?;
                }
                // Flash and steady.
                0x08 => write!(self.writer, "\x1b[5m ")?,
                0x09 => write!(self.writer, "\x1b[25m ")?,
                // Black background and new background.
                0x1c => write!(self.writer, "\x1b[40m ")?,
                0x1d => write!(self.writer, "\x1b[4{}m ", fg)?,
                _ => write!(self.writer, "{}", g0_char(byte))?,
            }
        }

        writeln!(self.writer, "\x1b[0m")
    }
}

impl PacketSink for AnsiSink {
    fn put(&mut self, packet: &Packet) -> Result<()> {
        let mrag = packet.mrag();

        match mrag.row {
            0 => {
                let header = packet.header();
                write!(self.writer, "P{:X}{:02X}:{:04X} ", mrag.magazine, header.page, header.subpage)
                    .map_err(sink_io)?;
                let text = packet.header_display();
                self.put_row(text.bytes()).map_err(sink_io)
            }
            1..=25 => {
                let text = packet.displayable();
                self.put_row(text.bytes()).map_err(sink_io)
            }
            _ => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(sink_io)
    }
}

struct DebugSink {
    writer: Box<dyn Write>,
}

impl PacketSink for DebugSink {
    fn put(&mut self, packet: &Packet) -> Result<()> {
        let mrag = packet.mrag();
        let errors = packet.errors();

        let preview: String = match mrag.row {
            0 => packet.header_display().bytes().iter().map(|&b| g0_char(b)).collect(),
            1..=25 => packet.displayable().bytes().iter().map(|&b| g0_char(b)).collect(),
            _ => String::new(),
        };

        writeln!(
            self.writer,
            "{:>10} {}/{:<2} c={:<2} u={:<2} {}",
            packet.number(),
            mrag.magazine,
            mrag.row,
            errors.corrected,
            errors.uncorrectable,
            preview,
        )
        .map_err(sink_io)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(sink_io)
    }
}

struct BarSink {
    writer: Box<dyn Write>,
}

impl BarSink {
    /// Judge each payload byte by the protection that applies to it in this row type.
    fn byte_errors(packet: &Packet) -> [bool; PACKET_LEN] {
        let mrag = packet.mrag();
        let mut bad = [false; PACKET_LEN];

        for (index, (&byte, bad)) in packet.bytes().iter().zip(bad.iter_mut()).enumerate() {
            let hammed = match mrag.row {
                0 => index < 10,
                _ => index < 2,
            };

            *bad = if hammed {
                hamming8_decode(byte).1.is_uncorrectable()
            }
            else if mrag.row <= 25 {
                parity_decode(byte).1.is_uncorrectable()
            }
            else {
                false
            };
        }

        bad
    }
}

impl PacketSink for BarSink {
    fn put(&mut self, packet: &Packet) -> Result<()> {
        let bar: String =
            BarSink::byte_errors(packet).iter().map(|&bad| if bad { '█' } else { '·' }).collect();
        writeln!(self.writer, "{}", bar).map_err(sink_io)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(sink_io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_sink_kind_names() {
        for name in SinkKind::NAMES {
            assert!(SinkKind::from_name(name).is_some());
        }
        assert!(SinkKind::from_name("postscript").is_none());
    }

    #[test]
    fn verify_g0_mapping() {
        assert_eq!(g0_char(b'A'), 'A');
        assert_eq!(g0_char(0x23), '£');
        assert_eq!(g0_char(0x07), ' ');
    }
}
