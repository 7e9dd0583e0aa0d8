// Teletext
// Copyright (c) 2025 The Project Teletext Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A progress reporter rendering pipeline statistics to standard error.
//!
//! The reporter runs on its own thread and consults the statistics tap snapshots at its own
//! cadence; the pipeline itself never blocks on it.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use teletext_core::stats::{Count, ErrorCounters, MagCounters, RejectCounters, RowCounters};

/// The tap handles a command wants rendered.
#[derive(Default)]
pub struct TapSet {
    /// Label for the element count, e.g. `"packets"` or `"lines"`.
    pub unit: &'static str,
    pub count: Option<Arc<Count>>,
    pub rejects: Option<Arc<RejectCounters>>,
    pub mags: Option<Arc<MagCounters>>,
    pub rows: Option<Arc<RowCounters>>,
    pub errors: Option<Arc<ErrorCounters>>,
}

/// A running (or disabled) status-line reporter.
pub struct Reporter {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    /// Spawn the reporter thread.
    pub fn start(taps: TapSet) -> Reporter {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            loop {
                let stopping = flag.load(Ordering::Relaxed);

                eprint!("\r\x1b[K{}", render(&taps));
                let _ = std::io::stderr().flush();

                if stopping {
                    break;
                }
                std::thread::sleep(Duration::from_millis(250));
            }
            eprintln!();
        });

        Reporter { stop, handle: Some(handle) }
    }

    /// A reporter that renders nothing, for non-interactive runs.
    pub fn disabled() -> Reporter {
        Reporter { stop: Arc::new(AtomicBool::new(false)), handle: None }
    }

    /// Render a final snapshot and join the thread.
    pub fn finish(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Render counts as a compact sparkline, one character per bucket.
fn spark(counts: &[u64]) -> String {
    const LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

    let max = counts.iter().copied().max().unwrap_or(0);

    counts
        .iter()
        .map(|&count| {
            if count == 0 {
                ' '
            }
            else {
                LEVELS[((count * 7 + max / 2) / max).min(7) as usize]
            }
        })
        .collect()
}

fn render(taps: &TapSet) -> String {
    let mut line = String::new();

    if let Some(count) = &taps.count {
        line.push_str(&format!("{} {}", count.snapshot(), taps.unit));
    }

    if let Some(rejects) = &taps.rejects {
        let (rejected, total) = rejects.snapshot();
        let percent = if total == 0 { 0.0 } else { 100.0 * rejected as f64 / total as f64 };
        line.push_str(&format!(" | rej {:5.1}%", percent));
    }

    if let Some(mags) = &taps.mags {
        line.push_str(&format!(" | M {}", spark(&mags.snapshot())));
    }

    if let Some(rows) = &taps.rows {
        line.push_str(&format!(" | R {}", spark(&rows.snapshot())));
    }

    if let Some(errors) = &taps.errors {
        line.push_str(&format!(" | E {}", spark(&errors.snapshot())));
    }

    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_spark_scaling() {
        assert_eq!(spark(&[0, 0, 0]), "   ");

        let bars = spark(&[1, 4, 8]);
        let chars: Vec<char> = bars.chars().collect();
        assert_eq!(chars.len(), 3);
        assert_eq!(chars[2], '█');
        assert!(chars[0] < chars[2]);
    }
}
