// Teletext
// Copyright (c) 2025 The Project Teletext Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `chunk` module splits a byte stream into numbered fixed-size chunks.
//!
//! A [`FileChunker`] is the head of every pipeline: it reads VBI lines, t42 packets, or whole
//! capture frames depending on the chunk size it is given, and it implements the common
//! start/stop/step/limit stream controls.

use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;

use crate::errors::{Error, Result};
use crate::packet::PACKET_LEN;

/// The chunk size of a t42 packet stream produced by a WST capture card: 42 payload bytes plus
/// one trailing byte of padding.
pub const WST_CHUNK_LEN: usize = PACKET_LEN + 1;

/// Stream slicing controls for a [`FileChunker`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkerOptions {
    /// The absolute index of the first chunk to emit. Default: 0.
    pub start: u64,
    /// Stop before this absolute chunk index. Default: no stop.
    pub stop: Option<u64>,
    /// Emit every `step`-th chunk. Default: 1.
    pub step: u64,
    /// Stop after emitting this many chunks. Default: no limit.
    pub limit: Option<u64>,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        ChunkerOptions { start: 0, stop: None, step: 1, limit: None }
    }
}

/// `FileChunker` produces numbered fixed-size chunks from a readable byte stream.
///
/// Chunks are numbered by their absolute position in the stream. Chunks skipped by `start` and
/// `step` are read and discarded so that the source does not need to be seekable. A short chunk
/// at the end of the stream is discarded.
pub struct FileChunker<R: Read> {
    inner: R,
    chunk_size: usize,
    /// Absolute index of the next chunk to be read from the stream.
    pos: u64,
    /// Absolute index of the next chunk to emit.
    next: u64,
    stop: Option<u64>,
    step: u64,
    remaining: Option<u64>,
    done: bool,
}

impl<R: Read> FileChunker<R> {
    /// Create a chunker over the whole stream.
    pub fn new(inner: R, chunk_size: usize) -> FileChunker<R> {
        FileChunker::with_options(inner, chunk_size, ChunkerOptions::default())
    }

    /// Create a chunker with stream slicing controls.
    pub fn with_options(inner: R, chunk_size: usize, options: ChunkerOptions) -> FileChunker<R> {
        FileChunker {
            inner,
            chunk_size,
            pos: 0,
            next: options.start,
            stop: options.stop,
            step: options.step.max(1),
            remaining: options.limit,
            done: false,
        }
    }

    /// Read exactly one chunk. Returns `None` at the end of the stream, including when only a
    /// short chunk remains.
    fn read_chunk(&mut self) -> Option<Result<Box<[u8]>>> {
        let mut chunk = vec![0u8; self.chunk_size];

        match self.inner.read_exact(&mut chunk) {
            Ok(()) => {
                self.pos += 1;
                Some(Ok(chunk.into_boxed_slice()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => None,
            Err(err) => Some(Err(Error::IoError(err))),
        }
    }
}

impl<R: Read> Iterator for FileChunker<R> {
    type Item = Result<(u64, Box<[u8]>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.remaining == Some(0) {
            self.done = true;
            return None;
        }

        if let Some(stop) = self.stop {
            if self.next >= stop {
                self.done = true;
                return None;
            }
        }

        // Discard everything in front of the next chunk of interest.
        while self.pos < self.next {
            match self.read_chunk() {
                Some(Ok(_)) => (),
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                None => {
                    self.done = true;
                    return None;
                }
            }
        }

        match self.read_chunk() {
            Some(Ok(chunk)) => {
                let index = self.next;
                self.next += self.step;
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                Some(Ok((index, chunk)))
            }
            Some(Err(err)) => {
                self.done = true;
                Some(Err(err))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// A chunker over the 43-byte t42 variant written by WST capture cards. Reads whole 43-byte
/// frames but exposes only the 42 payload bytes of each.
pub struct WstChunker<R: Read> {
    inner: FileChunker<R>,
}

impl<R: Read> WstChunker<R> {
    pub fn new(inner: R, options: ChunkerOptions) -> WstChunker<R> {
        WstChunker { inner: FileChunker::with_options(inner, WST_CHUNK_LEN, options) }
    }
}

impl<R: Read> Iterator for WstChunker<R> {
    type Item = Result<(u64, Box<[u8]>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, chunk) = match self.inner.next()? {
            Ok(item) => item,
            Err(err) => return Some(Err(err)),
        };

        let mut chunk = chunk.into_vec();
        chunk.truncate(PACKET_LEN);
        Some(Ok((index, chunk.into_boxed_slice())))
    }
}

/// `ErrorLatch` converts a fallible source into an infallible one for the lazy pipeline stages.
///
/// The pipeline stages operate on plain items; mid-stream IO failures are rare and always fatal,
/// so the latch ends the stream and parks the error for the pipeline driver to surface once the
/// run has wound down.
#[derive(Default)]
pub struct ErrorLatch {
    slot: Rc<RefCell<Option<Error>>>,
}

impl ErrorLatch {
    pub fn new() -> ErrorLatch {
        ErrorLatch::default()
    }

    /// Wrap a fallible iterator. The returned iterator ends at the first error.
    pub fn guard<T, I>(&self, inner: I) -> Latched<I>
    where
        I: Iterator<Item = Result<T>>,
    {
        Latched { inner, slot: Rc::clone(&self.slot) }
    }

    /// Take the parked error, if any. Call after the pipeline has been driven to completion.
    pub fn take(&self) -> Result<()> {
        match self.slot.borrow_mut().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// The infallible view of a guarded iterator. See [`ErrorLatch`].
pub struct Latched<I> {
    inner: I,
    slot: Rc<RefCell<Option<Error>>>,
}

impl<T, I> Iterator for Latched<I>
where
    I: Iterator<Item = Result<T>>,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.inner.next() {
            Some(Ok(item)) => Some(item),
            Some(Err(err)) => {
                *self.slot.borrow_mut() = Some(err);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn verify_whole_stream() {
        let data: Vec<u8> = (0..20).collect();
        let chunks: Vec<_> = FileChunker::new(Cursor::new(data), 4)
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].0, 0);
        assert_eq!(chunks[4].0, 4);
        assert_eq!(&chunks[2].1[..], &[8, 9, 10, 11]);
    }

    #[test]
    fn verify_short_tail_discarded() {
        let data = vec![0u8; 10];
        let chunks: Vec<_> = FileChunker::new(Cursor::new(data), 4).collect();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn verify_start_stop_step() {
        let data = vec![0u8; 100];
        let options = ChunkerOptions { start: 2, stop: Some(8), step: 3, limit: None };
        let indices: Vec<u64> = FileChunker::with_options(Cursor::new(data), 10, options)
            .map(|r| r.unwrap().0)
            .collect();

        assert_eq!(indices, vec![2, 5]);
    }

    #[test]
    fn verify_chunk_count_law() {
        // With the stream long enough, exactly min(limit, (stop - start) / step) chunks.
        let data = vec![0u8; 1000];
        let options = ChunkerOptions { start: 0, stop: Some(12), step: 4, limit: Some(100) };
        let count = FileChunker::with_options(Cursor::new(&data[..]), 10, options).count();
        assert_eq!(count, 3);

        let options = ChunkerOptions { start: 0, stop: Some(12), step: 4, limit: Some(2) };
        let count = FileChunker::with_options(Cursor::new(&data[..]), 10, options).count();
        assert_eq!(count, 2);
    }

    #[test]
    fn verify_wst_trim() {
        // 129 bytes is exactly three 43-byte WST frames.
        let data: Vec<u8> = (0..129u8).collect();
        let chunks: Vec<_> = WstChunker::new(Cursor::new(data), ChunkerOptions::default())
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(chunks.len(), 3);
        for (n, chunk) in &chunks {
            assert_eq!(chunk.len(), PACKET_LEN);
            assert_eq!(chunk[0], (n * 43) as u8);
            // The 43rd byte of each frame is dropped.
            assert_eq!(chunk[41], (n * 43) as u8 + 41);
        }
    }

    #[test]
    fn verify_latch_passes_items_through() {
        let items: Vec<Result<u32>> = vec![Ok(1), Ok(2), Ok(3)];
        let latch = ErrorLatch::new();
        let seen: Vec<u32> = latch.guard(items.into_iter()).collect();
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(latch.take().is_ok());
    }

    #[test]
    fn verify_latch_parks_first_error() {
        let items: Vec<Result<u32>> = vec![
            Ok(1),
            Err(Error::IoError(std::io::Error::new(std::io::ErrorKind::Other, "boom"))),
            Ok(2),
        ];
        let latch = ErrorLatch::new();
        let seen: Vec<u32> = latch.guard(items.into_iter()).collect();
        assert_eq!(seen, vec![1]);
        assert!(latch.take().is_err());
    }
}
