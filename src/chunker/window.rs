//! Sliding-window sources.
//!
//! A [`WindowSource`] yields successive overlapping windows of the input to
//! the chunking engine. Two implementations exist behind the one trait:
//!
//! - [`BufferSource`] - over an in-memory [`Bytes`] buffer, zero-copy
//! - [`StreamSource`] - over a sequential [`std::io::Read`] of known length
//!
//! The engine is the only consumer; the trait and both sources are crate
//! private.

use std::io::Read;

use bytes::Bytes;

use crate::error::DedupError;

/// One step of the sliding window.
///
/// Carries the current window contents, the absolute offset of its first
/// byte, the bytes that entered the window on this step (the whole window
/// when freshly opened), and whether the window touches the end of input
/// (fewer than one shift of bytes remains past it).
#[derive(Debug, Clone)]
pub(crate) struct Window {
    /// Current window contents; always one full window length.
    pub data: Bytes,

    /// Absolute offset of the window's first byte.
    pub start: u64,

    /// Bytes that entered on this step. The engine hashes the full window
    /// (MD5 is not rolling), so this exists for observation and tests.
    #[allow(dead_code)]
    pub entered: Bytes,

    /// True when fewer than `shift_count` bytes remain past the window.
    pub eof: bool,
}

impl Window {
    /// Absolute offset of the first byte just past the window.
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }
}

/// Source of sliding windows over an input of known length.
///
/// Contract, in the order the engine drives it: [`open`](Self::open) a
/// window at a chunk start (the caller guarantees at least one window
/// length of input remains there), [`shift`](Self::shift) it forward while
/// the previous window's `eof` flag is clear, fetch emitted chunk bytes
/// with [`range`](Self::range), and release retained bytes with
/// [`discard_before`](Self::discard_before) once a chunk boundary is final.
pub(crate) trait WindowSource {
    /// Total input length in bytes.
    fn content_length(&self) -> u64;

    /// Opens a full window at `offset`.
    fn open(&mut self, offset: u64) -> Result<Window, DedupError>;

    /// Advances the current window by the shift count. Must only be called
    /// when the previous window's `eof` flag was false.
    fn shift(&mut self) -> Result<Window, DedupError>;

    /// Returns the bytes `[start, end)`. `start` is never before the most
    /// recent `discard_before` offset and `end` never past the input.
    fn range(&mut self, start: u64, end: u64) -> Result<Bytes, DedupError>;

    /// Tells the source that bytes before `offset` will not be requested
    /// again.
    fn discard_before(&mut self, offset: u64);
}

/// Window source over an in-memory buffer.
///
/// All windows and ranges are zero-copy slices of the input `Bytes`.
pub(crate) struct BufferSource {
    data: Bytes,
    window_start: usize,
    window_len: usize,
    shift: usize,
}

impl BufferSource {
    pub fn new(data: Bytes, window_len: usize, shift: usize) -> Self {
        Self {
            data,
            window_start: 0,
            window_len,
            shift,
        }
    }

    fn window_at(&self, start: usize, entered: Bytes) -> Window {
        let end = start + self.window_len;
        Window {
            data: self.data.slice(start..end),
            start: start as u64,
            entered,
            eof: self.data.len() - end < self.shift,
        }
    }
}

impl WindowSource for BufferSource {
    fn content_length(&self) -> u64 {
        self.data.len() as u64
    }

    fn open(&mut self, offset: u64) -> Result<Window, DedupError> {
        let start = offset as usize;
        debug_assert!(start + self.window_len <= self.data.len());
        self.window_start = start;
        let entered = self.data.slice(start..start + self.window_len);
        Ok(self.window_at(start, entered))
    }

    fn shift(&mut self) -> Result<Window, DedupError> {
        let end = self.window_start + self.window_len;
        debug_assert!(self.data.len() - end >= self.shift);
        self.window_start += self.shift;
        let new_end = self.window_start + self.window_len;
        let entered = self.data.slice(new_end - self.shift..new_end);
        Ok(self.window_at(self.window_start, entered))
    }

    fn range(&mut self, start: u64, end: u64) -> Result<Bytes, DedupError> {
        Ok(self.data.slice(start as usize..end as usize))
    }

    fn discard_before(&mut self, _offset: u64) {
        // Nothing retained beyond the input Bytes itself.
    }
}

/// Window source over a sequential reader of known length.
///
/// Bytes are retained from the current chunk start forward so that emitted
/// chunk ranges can be produced without seeking; `discard_before` drops
/// them once the engine finalizes a boundary, which bounds retention to one
/// maximum chunk plus one window.
pub(crate) struct StreamSource<R> {
    reader: R,
    content_length: u64,
    retained: Vec<u8>,
    retained_start: u64,
    window_start: u64,
    window_len: usize,
    shift: usize,
}

impl<R: Read> StreamSource<R> {
    pub fn new(reader: R, content_length: u64, window_len: usize, shift: usize) -> Self {
        Self {
            reader,
            content_length,
            retained: Vec::with_capacity(window_len + shift),
            retained_start: 0,
            window_start: 0,
            window_len,
            shift,
        }
    }

    /// Reads forward until all bytes before `upto` are retained.
    ///
    /// A reader that ends before the declared content length surfaces as an
    /// `UnexpectedEof` I/O error.
    fn ensure(&mut self, upto: u64) -> Result<(), DedupError> {
        debug_assert!(upto <= self.content_length);
        let have = self.retained_start + self.retained.len() as u64;
        if upto > have {
            let need = (upto - have) as usize;
            let old_len = self.retained.len();
            self.retained.resize(old_len + need, 0);
            self.reader.read_exact(&mut self.retained[old_len..])?;
        }
        Ok(())
    }

    fn copy_range(&self, start: u64, end: u64) -> Bytes {
        let lo = (start - self.retained_start) as usize;
        let hi = (end - self.retained_start) as usize;
        Bytes::copy_from_slice(&self.retained[lo..hi])
    }
}

impl<R: Read> WindowSource for StreamSource<R> {
    fn content_length(&self) -> u64 {
        self.content_length
    }

    fn open(&mut self, offset: u64) -> Result<Window, DedupError> {
        debug_assert!(offset >= self.retained_start);
        let end = offset + self.window_len as u64;
        self.ensure(end)?;
        self.window_start = offset;
        let data = self.copy_range(offset, end);
        Ok(Window {
            data: data.clone(),
            start: offset,
            entered: data,
            eof: self.content_length - end < self.shift as u64,
        })
    }

    fn shift(&mut self) -> Result<Window, DedupError> {
        let end = self.window_start + self.window_len as u64;
        debug_assert!(self.content_length - end >= self.shift as u64);
        self.window_start += self.shift as u64;
        let new_end = self.window_start + self.window_len as u64;
        self.ensure(new_end)?;
        Ok(Window {
            data: self.copy_range(self.window_start, new_end),
            start: self.window_start,
            entered: self.copy_range(new_end - self.shift as u64, new_end),
            eof: self.content_length - new_end < self.shift as u64,
        })
    }

    fn range(&mut self, start: u64, end: u64) -> Result<Bytes, DedupError> {
        self.ensure(end)?;
        Ok(self.copy_range(start, end))
    }

    fn discard_before(&mut self, offset: u64) {
        if offset > self.retained_start {
            let n = (offset - self.retained_start) as usize;
            debug_assert!(n <= self.retained.len());
            self.retained.drain(..n);
            self.retained_start = offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn input(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_buffer_open_and_shift() {
        let data = input(300);
        let mut source = BufferSource::new(Bytes::from(data.clone()), 128, 64);

        let w = source.open(0).unwrap();
        assert_eq!(w.start, 0);
        assert_eq!(w.data.as_ref(), &data[0..128]);
        assert_eq!(w.entered.as_ref(), &data[0..128]);
        assert!(!w.eof);

        let w = source.shift().unwrap();
        assert_eq!(w.start, 64);
        assert_eq!(w.data.as_ref(), &data[64..192]);
        assert_eq!(w.entered.as_ref(), &data[128..192]);
        assert!(!w.eof);

        // Next shift ends at 256; 300 - 256 = 44 < 64, so it flags EOF.
        let w = source.shift().unwrap();
        assert_eq!(w.start, 128);
        assert!(w.eof);
    }

    #[test]
    fn test_buffer_range_is_zero_copy() {
        let data = Bytes::from(input(300));
        let mut source = BufferSource::new(data.clone(), 128, 64);
        let range = source.range(10, 50).unwrap();
        assert_eq!(range.as_ref(), &data[10..50]);
        assert!(range.as_ptr() >= data.as_ptr());
    }

    #[test]
    fn test_stream_matches_buffer() {
        let data = input(1000);
        let mut buffered = BufferSource::new(Bytes::from(data.clone()), 128, 64);
        let mut streamed = StreamSource::new(Cursor::new(data.clone()), 1000, 128, 64);

        let mut wb = buffered.open(0).unwrap();
        let mut ws = streamed.open(0).unwrap();
        loop {
            assert_eq!(wb.data, ws.data);
            assert_eq!(wb.start, ws.start);
            assert_eq!(wb.entered, ws.entered);
            assert_eq!(wb.eof, ws.eof);
            if wb.eof {
                break;
            }
            wb = buffered.shift().unwrap();
            ws = streamed.shift().unwrap();
        }
    }

    #[test]
    fn test_stream_range_after_discard() {
        let data = input(600);
        let mut source = StreamSource::new(Cursor::new(data.clone()), 600, 128, 64);

        source.open(0).unwrap();
        let w = source.shift().unwrap();
        let end = w.end();

        let range = source.range(0, end).unwrap();
        assert_eq!(range.as_ref(), &data[0..end as usize]);

        source.discard_before(end);
        let tail = source.range(end, 600).unwrap();
        assert_eq!(tail.as_ref(), &data[end as usize..600]);
    }

    #[test]
    fn test_stream_short_reader_is_an_error() {
        // Declared length exceeds what the reader can deliver.
        let mut source = StreamSource::new(Cursor::new(vec![0u8; 100]), 500, 128, 64);
        assert!(source.open(0).is_err());
    }

    #[test]
    fn test_window_end() {
        let mut source = BufferSource::new(Bytes::from(input(300)), 128, 64);
        let w = source.open(64).unwrap();
        assert_eq!(w.end(), 192);
    }
}
