//! Core chunking engine.
//!
//! One algorithm, parameterized by a [`WindowSource`](super::window::WindowSource):
//! the buffer and stream entry points differ only in how the window is
//! filled and when chunks are handed to the consumer.
//!
//! # Example
//!
//! ```
//! use deduprs::{ChunkConfig, Chunker};
//!
//! let chunker = Chunker::new(ChunkConfig::new(128, 1024, 64, 2)?);
//! let chunks = chunker.chunk_bytes(vec![0u8; 4096])?;
//!
//! let total: usize = chunks.iter().map(|c| c.len()).sum();
//! assert_eq!(total, 4096);
//! # Ok::<(), deduprs::DedupError>(())
//! ```

use std::io::Read;

use bytes::Bytes;

use crate::chunk::Chunk;
use crate::config::ChunkConfig;
use crate::error::DedupError;
use crate::hash::{is_boundary, window_hash};

use super::window::{BufferSource, StreamSource, WindowSource};

/// Splits byte sequences into content-defined chunks.
///
/// The walk is deterministic for a given input and configuration: the same
/// bytes produce the same `(key, position, length)` sequence on every run
/// and every machine. Boundaries fall where the MD5 of the sliding window
/// starts with the configured number of zero bytes, or at the maximum chunk
/// size when no such position appears; a boundary found on the same step as
/// the cap wins.
///
/// # Example
///
/// ```
/// use deduprs::{ChunkConfig, Chunker};
///
/// let chunker = Chunker::new(ChunkConfig::default());
/// let chunks = chunker.chunk_bytes(&b"short input"[..])?;
/// assert_eq!(chunks.len(), 1);
/// # Ok::<(), deduprs::DedupError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    /// Creates a new chunker with the given configuration.
    ///
    /// The configuration is assumed valid; [`ChunkConfig::new`] is the
    /// validating constructor.
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration used by this chunker.
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Chunks an in-memory buffer.
    ///
    /// Chunk data is zero-copy sliced from the input `Bytes`. The emitted
    /// chunks partition the input exactly; zero-length input produces zero
    /// chunks.
    pub fn chunk_bytes(&self, data: impl Into<Bytes>) -> Result<Vec<Chunk>, DedupError> {
        let data = data.into();
        let mut source = BufferSource::new(
            data,
            self.config.min_chunk_size(),
            self.config.shift_count(),
        );
        let mut chunks = Vec::new();
        self.run(&mut source, &mut |chunk| {
            chunks.push(chunk);
            true
        })?;
        Ok(chunks)
    }

    /// Chunks a sequential reader of known length, handing each chunk to
    /// `process_chunk` as it is emitted.
    ///
    /// Memory stays bounded by one maximum chunk plus one window regardless
    /// of input size. Returning `false` from `process_chunk` stops the walk;
    /// the overall result is then `Ok(false)`.
    ///
    /// A reader that ends before `content_length` surfaces as an I/O error.
    pub fn chunk_stream<R, F>(
        &self,
        reader: R,
        content_length: u64,
        mut process_chunk: F,
    ) -> Result<bool, DedupError>
    where
        R: Read,
        F: FnMut(Chunk) -> bool,
    {
        let mut source = StreamSource::new(
            reader,
            content_length,
            self.config.min_chunk_size(),
            self.config.shift_count(),
        );
        self.run(&mut source, &mut process_chunk)
    }

    /// Walks the window source and emits chunks into `process_chunk`.
    ///
    /// Returns `Ok(false)` when the consumer stopped the walk, `Ok(true)`
    /// when the input was fully consumed.
    fn run<S, F>(&self, source: &mut S, process_chunk: &mut F) -> Result<bool, DedupError>
    where
        S: WindowSource,
        F: FnMut(Chunk) -> bool,
    {
        let content_length = source.content_length();
        let min = self.config.min_chunk_size() as u64;
        let max = self.config.max_chunk_size() as u64;
        let check = self.config.boundary_check_bytes();

        if content_length == 0 {
            return Ok(true);
        }

        // Inputs no longer than the window become a single chunk.
        if content_length <= min {
            let data = source.range(0, content_length)?;
            return Ok(process_chunk(Chunk::new(data, 0, 0)));
        }

        let mut ordinal: u32 = 0;
        let mut chunk_start: u64 = 0;
        let mut window = source.open(0)?;

        loop {
            let curr = window.end();
            let digest = window_hash(&window.data);
            if is_boundary(&digest, check) || curr - chunk_start >= max {
                // A forced cut never exceeds the cap, even when the final
                // shift overshot it.
                let cut = curr.min(chunk_start + max);
                let data = source.range(chunk_start, cut)?;
                if !process_chunk(Chunk::new(data, chunk_start, ordinal)) {
                    return Ok(false);
                }
                ordinal += 1;
                chunk_start = cut;
                source.discard_before(chunk_start);
                if content_length - chunk_start >= min {
                    window = source.open(chunk_start)?;
                } else {
                    break;
                }
            } else if window.eof {
                break;
            } else {
                window = source.shift()?;
            }
        }

        // Tail: whatever remains past the last boundary.
        if chunk_start < content_length {
            let data = source.range(chunk_start, content_length)?;
            if !process_chunk(Chunk::new(data, chunk_start, ordinal)) {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkConfig::default())
    }
}
