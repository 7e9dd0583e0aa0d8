// Teletext
// Copyright (c) 2025-2026 The Project Teletext Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod report;
mod sinks;

use std::fs::File;
use std::io::{self, IsTerminal, Read, Write};
use std::process;

use clap::{App, AppSettings, Arg, ArgMatches};
use log::{debug, error, warn};

use teletext_core::celp::{CelpStream, CELP_DB_LEVELS, CELP_SERVICE_TYPES};
use teletext_core::chunk::{ChunkerOptions, ErrorLatch, FileChunker, WstChunker};
use teletext_core::errors::{unsupported_error, Error, Result};
use teletext_core::packet::{MagSet, Packet, RowSet, PACKET_LEN};
use teletext_core::pipeline::{self, PageSet};
use teletext_core::stats::{Counted, ErrorHistogram, MagHistogram, Rejects, RowHistogram};
use teletext_core::subpage::Subpage;
use teletext_vbi::{CaptureConfig, CaptureOptions, Card, VbiLine};

use report::{Reporter, TapSet};
use sinks::{open_sink, PacketSink, SinkKind};

fn main() {
    pretty_env_logger::init();

    let matches = build_app().get_matches();

    let result = match matches.subcommand() {
        Some(("filter", sub)) => cmd_filter(sub),
        Some(("squash", sub)) => cmd_squash(sub),
        Some(("slice", sub)) => cmd_recover(sub, Recovery::Slice),
        Some(("deconvolve", sub)) => cmd_recover(sub, Recovery::Deconvolve),
        Some(("record", sub)) => cmd_record(sub),
        Some(("celp", sub)) => cmd_celp(sub),
        Some(("spellcheck", _)) => {
            unsupported_error("spell checking requires an external dictionary collaborator")
        }
        Some(("service", _)) => {
            unsupported_error("service carousel rendering is not part of the core toolkit")
        }
        Some(("interactive", _)) => {
            unsupported_error("the interactive emulator is not part of the core toolkit")
        }
        Some(("urls", _)) => {
            unsupported_error("editor URL generation is not part of the core toolkit")
        }
        Some(("html", _)) => {
            unsupported_error("HTML generation is not part of the core toolkit")
        }
        Some(("vbiview", _)) => {
            unsupported_error("the OpenGL sample viewer is not part of the core toolkit")
        }
        _ => Ok(()),
    };

    match result {
        // A clean end of input is the normal way a run finishes.
        Ok(()) | Err(Error::EndOfStream) => (),
        Err(err) => {
            error!("{}", err);
            process::exit(1);
        }
    }
}

fn build_app() -> App<'static> {
    App::new("teletext")
        .version("0.3.0")
        .about("Teletext stream processing toolkit")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(output_arg(progress_args(filter_args(chunk_args(
            App::new("filter")
                .about("Demultiplex and display t42 packet streams")
                .arg(wst_arg())
                .arg(pages_arg())
                .arg(subpages_arg())
                .arg(
                    Arg::new("paginate")
                        .short('P')
                        .long("paginate")
                        .help("Sort rows into contiguous pages"),
                ),
        )))))
        .subcommand(output_arg(progress_args(filter_args(chunk_args(
            App::new("squash")
                .about("Reduce errors in a t42 stream by frequency analysis")
                .arg(wst_arg())
                .arg(pages_arg())
                .arg(subpages_arg())
                .arg(
                    Arg::new("min-duplicates")
                        .short('d')
                        .long("min-duplicates")
                        .takes_value(true)
                        .value_name("N")
                        .default_value("3")
                        .help("Only squash and output subpages with at least N duplicates"),
                ),
        )))))
        .subcommand(output_arg(progress_args(filter_args(card_args(
            chunk_args(App::new("slice").about("Decode OTA-recorded VBI samples by threshold"))
                .arg(extra_roll_arg("-2"))
                .arg(no_rejects_arg()),
            true,
        )))))
        .subcommand(output_arg(progress_args(filter_args(card_args(
            chunk_args(
                App::new("deconvolve").about("Deconvolve raw VBI samples into teletext packets"),
            )
            .arg(extra_roll_arg("-4"))
            .arg(no_rejects_arg())
            .arg(
                Arg::new("force-cpu")
                    .short('C')
                    .long("force-cpu")
                    .help("Disable acceleration even if it is available"),
            ),
            true,
        )))))
        .subcommand(card_args(
            App::new("record")
                .about("Record VBI samples from a capture device")
                .arg(
                    Arg::new("OUTPUT")
                        .help("The output file path, or - for standard output")
                        .default_value("-")
                        .index(1),
                )
                .arg(
                    Arg::new("device")
                        .short('d')
                        .long("device")
                        .takes_value(true)
                        .value_name("PATH")
                        .default_value("/dev/vbi0")
                        .help("Capture device"),
                ),
            true,
        ))
        .subcommand(
            filter_args(chunk_args(
                App::new("celp").about("Dump CELP audio frames from data channels 4 and 12"),
            ))
            .arg(wst_arg())
            .arg(
                Arg::new("output")
                    .short('o')
                    .long("output")
                    .takes_value(true)
                    .value_name("PATH")
                    .help("Write framed audio bytes instead of describing each packet"),
            ),
        )
        .subcommand(App::new("spellcheck").about("Spell check a t42 stream"))
        .subcommand(App::new("service").about("Build a service carousel from a t42 stream"))
        .subcommand(App::new("interactive").about("Interactive teletext emulator"))
        .subcommand(App::new("urls").about("Paginate a t42 stream and print editor URLs"))
        .subcommand(App::new("html").about("Generate HTML files from the input stream"))
        .subcommand(App::new("vbiview").about("Display raw VBI samples"))
}

fn chunk_args(app: App<'static>) -> App<'static> {
    app.arg(
        Arg::new("INPUT")
            .help("The input file path, or - for standard input")
            .default_value("-")
            .index(1),
    )
    .arg(
        Arg::new("start")
            .long("start")
            .takes_value(true)
            .value_name("N")
            .help("Start at the Nth chunk of the input file"),
    )
    .arg(
        Arg::new("stop")
            .long("stop")
            .takes_value(true)
            .value_name("N")
            .help("Stop before the Nth chunk of the input file"),
    )
    .arg(
        Arg::new("step")
            .long("step")
            .takes_value(true)
            .value_name("N")
            .help("Process every Nth chunk of the input file"),
    )
    .arg(
        Arg::new("limit")
            .long("limit")
            .takes_value(true)
            .value_name("N")
            .help("Stop after processing N chunks from the input file"),
    )
}

fn filter_args(app: App<'static>) -> App<'static> {
    app.arg(
        Arg::new("mags")
            .short('m')
            .long("mags")
            .takes_value(true)
            .multiple_occurrences(true)
            .value_name("M")
            .help("Limit output to specific magazines"),
    )
    .arg(
        Arg::new("rows")
            .short('r')
            .long("rows")
            .takes_value(true)
            .multiple_occurrences(true)
            .value_name("R")
            .help("Limit output to specific rows"),
    )
}

fn progress_args(app: App<'static>) -> App<'static> {
    app.arg(Arg::new("progress").long("progress").help("Display the progress line"))
        .arg(
            Arg::new("no-progress")
                .long("no-progress")
                .conflicts_with("progress")
                .help("Never display the progress line"),
        )
        .arg(Arg::new("mag-hist").long("mag-hist").help("Display a magazine histogram"))
        .arg(Arg::new("row-hist").long("row-hist").help("Display a row histogram"))
        .arg(Arg::new("err-hist").long("err-hist").help("Display an error distribution"))
}

fn card_args(app: App<'static>, extended: bool) -> App<'static> {
    let app = app
        .arg(
            Arg::new("card")
                .short('c')
                .long("card")
                .takes_value(true)
                .possible_values(["bt8x8", "saa7131", "cx88"])
                .default_value("bt8x8")
                .help("Capture device type"),
        )
        .arg(
            Arg::new("line-length")
                .long("line-length")
                .takes_value(true)
                .value_name("N")
                .help("Override capture card samples per line"),
        );

    if extended {
        app.arg(
            Arg::new("sample-rate")
                .long("sample-rate")
                .takes_value(true)
                .value_name("HZ")
                .help("Override capture card sample rate"),
        )
        .arg(
            Arg::new("line-trim")
                .long("line-trim")
                .takes_value(true)
                .value_name("N")
                .help("Override capture card line trim"),
        )
        .arg(
            Arg::new("line-start-range")
                .long("line-start-range")
                .takes_value(true)
                .number_of_values(2)
                .value_names(&["LO", "HI"])
                .help("Override the clock run-in search window"),
        )
    }
    else {
        app
    }
}

fn output_arg(app: App<'static>) -> App<'static> {
    app.arg(
        Arg::new("output")
            .short('o')
            .long("output")
            .takes_value(true)
            .multiple_occurrences(true)
            .value_name("KIND:PATH")
            .default_value("auto:-")
            .help("Output sink: one of auto, text, ansi, debug, bar, bytes, and a path"),
    )
}

fn wst_arg() -> Arg<'static> {
    Arg::new("wst").long("wst").help("Input is 43 bytes per packet (WST capture card format)")
}

fn pages_arg() -> Arg<'static> {
    Arg::new("pages")
        .short('p')
        .long("pages")
        .takes_value(true)
        .multiple_occurrences(true)
        .value_name("PAGE")
        .help("Limit output to specific pages; implies pagination")
}

fn subpages_arg() -> Arg<'static> {
    Arg::new("subpages")
        .short('s')
        .long("subpages")
        .takes_value(true)
        .multiple_occurrences(true)
        .value_name("SUBPAGE")
        .help("Limit output to specific subpages; implies pagination")
}

fn extra_roll_arg(default: &'static str) -> Arg<'static> {
    Arg::new("extra-roll")
        .short('e')
        .long("extra-roll")
        .takes_value(true)
        .allow_hyphen_values(true)
        .value_name("SAMPLES")
        .default_value(default)
        .help("Shift the lock position by a fixed number of samples")
}

fn no_rejects_arg() -> Arg<'static> {
    Arg::new("no-rejects").long("no-rejects").help("Do not display the rejected line percentage")
}

fn open_input(matches: &ArgMatches) -> Result<Box<dyn Read>> {
    match matches.value_of("INPUT") {
        None | Some("-") => Ok(Box::new(io::stdin())),
        Some(path) => Ok(Box::new(File::open(path).map_err(Error::IoError)?)),
    }
}

fn parse_value<T: std::str::FromStr>(
    matches: &ArgMatches,
    name: &str,
    message: &'static str,
) -> Result<Option<T>> {
    matches
        .value_of(name)
        .map(|value| value.parse::<T>().map_err(|_| Error::ConfigInvalid(message)))
        .transpose()
}

fn chunker_options(matches: &ArgMatches) -> Result<ChunkerOptions> {
    Ok(ChunkerOptions {
        start: parse_value(matches, "start", "invalid --start value")?.unwrap_or(0),
        stop: parse_value(matches, "stop", "invalid --stop value")?,
        step: parse_value(matches, "step", "invalid --step value")?.unwrap_or(1),
        limit: parse_value(matches, "limit", "invalid --limit value")?,
    })
}

fn numeric_set(matches: &ArgMatches, name: &str, message: &'static str) -> Result<Option<Vec<u8>>> {
    let values = match matches.values_of(name) {
        Some(values) => values,
        None => return Ok(None),
    };

    let mut numbers = Vec::new();
    for value in values.flat_map(|v| v.split(',')) {
        numbers.push(value.trim().parse::<u8>().map_err(|_| Error::ConfigInvalid(message))?);
    }

    Ok(Some(numbers))
}

fn mag_set(matches: &ArgMatches) -> Result<MagSet> {
    Ok(match numeric_set(matches, "mags", "invalid magazine number")? {
        Some(mags) => mags.into_iter().collect(),
        None => MagSet::ALL,
    })
}

fn row_set(matches: &ArgMatches) -> Result<RowSet> {
    Ok(match numeric_set(matches, "rows", "invalid row number")? {
        Some(rows) => rows.into_iter().collect(),
        None => RowSet::ALL,
    })
}

fn page_set(matches: &ArgMatches, name: &str, message: &'static str) -> Result<PageSet> {
    let values = match matches.values_of(name) {
        Some(values) => values,
        None => return Ok(PageSet::all()),
    };

    let mut pages = Vec::new();
    for value in values.flat_map(|v| v.split(',')) {
        let page =
            u16::from_str_radix(value.trim(), 16).map_err(|_| Error::ConfigInvalid(message))?;
        pages.push(page);
    }

    Ok(pages.into_iter().collect())
}

fn capture_config(matches: &ArgMatches) -> Result<CaptureConfig> {
    let card = match matches.value_of("card") {
        Some(name) => {
            Card::from_name(name).ok_or(Error::ConfigInvalid("unknown capture card profile"))?
        }
        None => Card::Bt8x8,
    };

    let line_start_range = match matches.values_of("line-start-range") {
        Some(values) => {
            let bounds: Vec<usize> = values
                .map(|v| v.parse().map_err(|_| Error::ConfigInvalid("invalid line start range")))
                .collect::<Result<_>>()?;
            match bounds[..] {
                [lo, hi] => Some((lo, hi)),
                _ => return Err(Error::ConfigInvalid("invalid line start range")),
            }
        }
        None => None,
    };

    CaptureConfig::new(&CaptureOptions {
        card,
        line_length: parse_value(matches, "line-length", "invalid --line-length value")?,
        sample_rate: parse_value(matches, "sample-rate", "invalid --sample-rate value")?,
        line_trim: parse_value(matches, "line-trim", "invalid --line-trim value")?,
        line_start_range,
    })
}

fn progress_enabled(matches: &ArgMatches) -> bool {
    if matches.is_present("no-progress") {
        false
    }
    else if matches.is_present("progress") {
        true
    }
    else {
        io::stderr().is_terminal()
    }
}

fn open_sinks(matches: &ArgMatches) -> Result<Vec<Box<dyn PacketSink>>> {
    let mut sinks = Vec::new();

    if let Some(outputs) = matches.values_of("output") {
        for output in outputs {
            let (kind, path) = match output.split_once(':') {
                Some((kind, path)) => (kind, path),
                None => (output, "-"),
            };

            let kind =
                SinkKind::from_name(kind).ok_or(Error::ConfigInvalid("unknown output sink kind"))?;
            sinks.push(open_sink(kind, path)?);
        }
    }

    Ok(sinks)
}

/// Build the t42 packet source of a pipeline: chunker, element counter, packet framing.
fn t42_packets(
    matches: &ArgMatches,
    latch: &ErrorLatch,
    taps: &mut TapSet,
) -> Result<Box<dyn Iterator<Item = Packet>>> {
    let input = open_input(matches)?;
    let options = chunker_options(matches)?;

    let chunks: Box<dyn Iterator<Item = Result<(u64, Box<[u8]>)>>> = if matches.is_present("wst") {
        Box::new(WstChunker::new(input, options))
    }
    else {
        Box::new(FileChunker::with_options(input, PACKET_LEN, options))
    };

    let counted = Counted::new(latch.guard(chunks));
    taps.unit = "pkts";
    taps.count = Some(Counted::count(&counted));

    Ok(Box::new(counted.filter_map(|(number, chunk)| Packet::from_slice(&chunk, number))))
}

/// Wrap the requested histogram taps around a packet stream.
fn apply_histograms<'a>(
    packets: Box<dyn Iterator<Item = Packet> + 'a>,
    matches: &ArgMatches,
    taps: &mut TapSet,
) -> Box<dyn Iterator<Item = Packet> + 'a> {
    let mut packets = packets;

    if matches.is_present("mag-hist") {
        let tap = MagHistogram::new(packets);
        taps.mags = Some(tap.counters());
        packets = Box::new(tap);
    }
    if matches.is_present("row-hist") {
        let tap = RowHistogram::new(packets);
        taps.rows = Some(tap.counters());
        packets = Box::new(tap);
    }
    if matches.is_present("err-hist") {
        let tap = ErrorHistogram::new(packets);
        taps.errors = Some(tap.counters());
        packets = Box::new(tap);
    }

    packets
}

/// Terminal half of every packet command: open the sinks, run the reporter, drain the stream.
fn run_to_sinks(
    matches: &ArgMatches,
    packets: Box<dyn Iterator<Item = Packet> + '_>,
    taps: TapSet,
    latch: &ErrorLatch,
) -> Result<()> {
    let mut sinks = open_sinks(matches)?;

    let reporter =
        if progress_enabled(matches) { Reporter::start(taps) } else { Reporter::disabled() };

    let mut result = Ok(());
    for packet in packets {
        for sink in sinks.iter_mut() {
            if let Err(err) = sink.put(&packet) {
                result = Err(err);
                break;
            }
        }
        if result.is_err() {
            break;
        }
    }

    if result.is_ok() {
        for sink in sinks.iter_mut() {
            if let Err(err) = sink.flush() {
                result = Err(err);
                break;
            }
        }
    }

    reporter.finish();

    result.and(latch.take())
}

fn cmd_filter(matches: &ArgMatches) -> Result<()> {
    let latch = ErrorLatch::new();
    let mut taps = TapSet::default();

    let packets = t42_packets(matches, &latch, &mut taps)?;
    let mut packets: Box<dyn Iterator<Item = Packet>> =
        Box::new(pipeline::filter_packets(packets, mag_set(matches)?, row_set(matches)?));

    packets = apply_histograms(packets, matches, &mut taps);

    let pages = page_set(matches, "pages", "invalid page number")?;
    let subpages = page_set(matches, "subpages", "invalid subpage number")?;

    let paginate =
        matches.is_present("paginate") || pages.is_constrained() || subpages.is_constrained();

    if paginate {
        packets =
            Box::new(pipeline::paginate(packets, pages, subpages).flat_map(Subpage::into_packets));
    }

    run_to_sinks(matches, packets, taps, &latch)
}

fn cmd_squash(matches: &ArgMatches) -> Result<()> {
    let latch = ErrorLatch::new();
    let mut taps = TapSet::default();

    let packets = t42_packets(matches, &latch, &mut taps)?;
    let mut packets: Box<dyn Iterator<Item = Packet>> =
        Box::new(pipeline::filter_packets(packets, mag_set(matches)?, row_set(matches)?));

    packets = apply_histograms(packets, matches, &mut taps);

    let pages = page_set(matches, "pages", "invalid page number")?;
    let subpages = page_set(matches, "subpages", "invalid subpage number")?;
    let min_duplicates =
        parse_value(matches, "min-duplicates", "invalid --min-duplicates value")?.unwrap_or(3);

    let squashed = pipeline::subpage_squash(
        pipeline::paginate(packets, pages, subpages),
        min_duplicates,
    );

    run_to_sinks(matches, Box::new(squashed.flat_map(Subpage::into_packets)), taps, &latch)
}

#[derive(Clone, Copy)]
enum Recovery {
    Slice,
    Deconvolve,
}

fn cmd_recover(matches: &ArgMatches, recovery: Recovery) -> Result<()> {
    let config = capture_config(matches)?;

    if let Recovery::Deconvolve = recovery {
        if matches.is_present("force-cpu") {
            debug!("acceleration disabled by --force-cpu");
        }
        else {
            debug!("no acceleration available, using the CPU deconvolution path");
        }
    }

    let extra_roll =
        parse_value::<i32>(matches, "extra-roll", "invalid --extra-roll value")?.unwrap_or(0);

    let latch = ErrorLatch::new();
    let mut taps = TapSet::default();

    let input = open_input(matches)?;
    let chunker = FileChunker::with_options(input, config.line_length(), chunker_options(matches)?);

    let counted = Counted::new(latch.guard(chunker));
    taps.unit = "lines";
    taps.count = Some(Counted::count(&counted));

    let lines = counted.map(|(number, chunk)| VbiLine::new(&config, &chunk, number, extra_roll));

    let rejects = Rejects::new(lines);
    if !matches.is_present("no-rejects") {
        taps.rejects = Some(rejects.counters());
    }

    let mags = mag_set(matches)?;
    let rows = row_set(matches)?;

    let mut packets: Box<dyn Iterator<Item = Packet> + '_> =
        Box::new(rejects.filter(|line| line.is_teletext()).filter_map(move |line| {
            match recovery {
                Recovery::Slice => line.slice(&mags, &rows),
                Recovery::Deconvolve => line.deconvolve(&mags, &rows),
            }
        }));

    packets = apply_histograms(packets, matches, &mut taps);

    run_to_sinks(matches, packets, taps, &latch)
}

fn cmd_record(matches: &ArgMatches) -> Result<()> {
    let config = capture_config(matches)?;

    let device = matches.value_of("device").unwrap_or("/dev/vbi0");
    let input: Box<dyn Read> = if device == "-" {
        Box::new(io::stdin())
    }
    else {
        Box::new(File::open(device).map_err(Error::IoError)?)
    };

    let mut output: Box<dyn Write> = match matches.value_of("OUTPUT") {
        None | Some("-") => Box::new(io::stdout()),
        Some(path) => Box::new(File::create(path).map_err(Error::IoError)?),
    };

    // A capture frame is 32 lines; its final four bytes are a little-endian frame counter.
    let chunker = FileChunker::new(input, config.line_length() * 32);

    let mut previous: Option<u32> = None;
    let mut dropped = 0u64;

    for frame in chunker {
        let (_, frame) = frame?;
        output.write_all(&frame).map_err(Error::SinkError)?;

        let mut tail = [0u8; 4];
        tail.copy_from_slice(&frame[frame.len() - 4..]);
        let sequence = u32::from_le_bytes(tail);

        if let Some(previous) = previous {
            if sequence != previous.wrapping_add(1) {
                dropped += 1;
                warn!("frame drop? {} missed so far", dropped);
            }
        }
        previous = Some(sequence);
    }

    output.flush().map_err(Error::SinkError)
}

fn cmd_celp(matches: &ArgMatches) -> Result<()> {
    let latch = ErrorLatch::new();
    let mut taps = TapSet::default();

    let packets = t42_packets(matches, &latch, &mut taps)?;
    let celp = CelpStream::new(packets, row_set(matches)?);

    match matches.value_of("output") {
        Some(path) => {
            let mut output: Box<dyn Write> = if path == "-" {
                Box::new(io::stdout())
            }
            else {
                Box::new(File::create(path).map_err(Error::IoError)?)
            };

            for packet in celp {
                output.write_all(&packet.frame0).map_err(Error::SinkError)?;
                output.write_all(&packet.frame1).map_err(Error::SinkError)?;
            }
            output.flush().map_err(Error::SinkError)?;
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();

            for packet in celp {
                describe_celp(&mut out, &packet).map_err(Error::SinkError)?;
            }
        }
    }

    latch.take()
}

fn describe_celp(out: &mut impl Write, packet: &teletext_core::celp::CelpPacket) -> io::Result<()> {
    let (control, _) = packet.control;
    let (service, _) = packet.service;

    write!(out, "DCN: {} (4/{})", packet.dcn, packet.row)?;

    match packet.dcn {
        4 => {
            write!(out, " Programme-related audio.")?;
            if service == 0 {
                write!(out, " Service: AUDETEL")?;
            }
            else {
                write!(out, " Service: {:#x}", service)?;
            }
            write!(
                out,
                " Control: {:#x} {} dB{}",
                control,
                CELP_DB_LEVELS[usize::from(control & 0x7)],
                if control & 0x8 != 0 { " (muted)" } else { "" },
            )?;
        }
        12 => {
            write!(out, " Programme-independent audio.")?;
            if service & 0x8 != 0 {
                write!(out, " User-defined service {:#x}", service & 0x7)?;
            }
            else {
                write!(out, " {}", CELP_SERVICE_TYPES[usize::from(service & 0x7)])?;
                if control != 0 {
                    write!(out, " Control: {:#x}", control)?;
                }
            }
        }
        _ => (),
    }

    write!(out, " ")?;
    for byte in packet.frame0 {
        write!(out, "{:02x}", byte)?;
    }
    write!(out, " ")?;
    for byte in packet.frame1 {
        write!(out, "{:02x}", byte)?;
    }
    writeln!(out)
}
