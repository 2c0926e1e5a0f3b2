//! Configuration for chunking and index behavior.
//!
//! This module provides types to configure how the store operates:
//!
//! - [`ChunkConfig`] - Controls the content-defined chunking parameters
//! - [`StoreOptions`] - Chunking parameters plus the index shape flag
//!
//! # Example
//!
//! ```
//! use deduprs::{ChunkConfig, StoreOptions};
//!
//! // Custom chunking parameters
//! let config = ChunkConfig::new(4096, 65536, 64, 1)?;
//!
//! // A pooled (per-container) index with default chunking
//! let options = StoreOptions::default().with_index_per_object(true);
//!
//! # Ok::<(), deduprs::DedupError>(())
//! ```

use tracing::warn;

use crate::error::DedupError;

/// Default minimum chunk size (4 KiB).
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Default maximum chunk size (64 KiB).
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Default window shift per step (64 bytes).
pub const DEFAULT_SHIFT_COUNT: usize = 64;

/// Default number of leading zero digest bytes that define a boundary.
pub const DEFAULT_BOUNDARY_CHECK_BYTES: usize = 1;

/// Sizes must be multiples of this to keep windows cheaply alignable.
const SIZE_ALIGN: usize = 64;

/// Configuration for content-defined chunking behavior.
///
/// `ChunkConfig` controls the four parameters of the sliding-window
/// boundary detector:
///
/// - Minimum chunk size (`min_chunk_size`) - Window length; no boundary is
///   tested before this many bytes
/// - Maximum chunk size (`max_chunk_size`) - Hard cap; a chunk is forced at
///   this length when no boundary was found
/// - Shift count (`shift_count`) - Bytes the window advances per step
/// - Boundary check bytes (`boundary_check_bytes`) - Leading zero bytes of
///   the window digest that declare a boundary
///
/// # Constraints
///
/// - `min_chunk_size` is a multiple of 64 and at least 128
/// - `max_chunk_size` is a multiple of 64 and at least `8 * min_chunk_size`
/// - `1 <= shift_count <= min_chunk_size`
/// - `1 <= boundary_check_bytes <= 8`
///
/// These parameters are part of the on-disk format: they are persisted at
/// index creation and immutable afterwards. The expected chunk size is
/// roughly `2^(8 * boundary_check_bytes)` bytes clamped to `[min, max]`.
///
/// # Example
///
/// ```
/// use deduprs::ChunkConfig;
///
/// let config = ChunkConfig::new(128, 1024, 64, 2)?;
/// assert_eq!(config.min_chunk_size(), 128);
///
/// // Builder pattern
/// let config = ChunkConfig::default()
///     .with_shift_count(128)
///     .with_boundary_check_bytes(2);
/// assert!(config.validate().is_ok());
/// # Ok::<(), deduprs::DedupError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkConfig {
    /// Minimum chunk size in bytes; also the sliding window length.
    min_chunk_size: usize,

    /// Maximum chunk size in bytes.
    max_chunk_size: usize,

    /// Bytes the window advances per step.
    shift_count: usize,

    /// Leading zero digest bytes that define a boundary.
    boundary_check_bytes: usize,
}

impl ChunkConfig {
    /// Creates a new configuration with the specified parameters.
    ///
    /// # Errors
    ///
    /// Returns [`DedupError::InvalidArgument`] if any constraint listed on
    /// [`ChunkConfig`] is violated.
    pub fn new(
        min_chunk_size: usize,
        max_chunk_size: usize,
        shift_count: usize,
        boundary_check_bytes: usize,
    ) -> Result<Self, DedupError> {
        let config = Self {
            min_chunk_size,
            max_chunk_size,
            shift_count,
            boundary_check_bytes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the minimum chunk size.
    ///
    /// Note: This does not validate the configuration. Use
    /// [`ChunkConfig::validate`] to check if the configuration is valid.
    pub fn with_min_chunk_size(mut self, size: usize) -> Self {
        self.min_chunk_size = size;
        self
    }

    /// Sets the maximum chunk size.
    ///
    /// Note: This does not validate the configuration. Use
    /// [`ChunkConfig::validate`] to check if the configuration is valid.
    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = size;
        self
    }

    /// Sets the window shift per step.
    ///
    /// Note: This does not validate the configuration. Use
    /// [`ChunkConfig::validate`] to check if the configuration is valid.
    pub fn with_shift_count(mut self, count: usize) -> Self {
        self.shift_count = count;
        self
    }

    /// Sets the number of leading zero digest bytes that define a boundary.
    ///
    /// Note: This does not validate the configuration. Use
    /// [`ChunkConfig::validate`] to check if the configuration is valid.
    pub fn with_boundary_check_bytes(mut self, bytes: usize) -> Self {
        self.boundary_check_bytes = bytes;
        self
    }

    /// Returns the minimum chunk size (window length).
    pub fn min_chunk_size(&self) -> usize {
        self.min_chunk_size
    }

    /// Returns the maximum chunk size.
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Returns the window shift per step.
    pub fn shift_count(&self) -> usize {
        self.shift_count
    }

    /// Returns the boundary check width in digest bytes.
    pub fn boundary_check_bytes(&self) -> usize {
        self.boundary_check_bytes
    }

    /// Validates the current configuration.
    ///
    /// Returns an error if the configuration is invalid. A width of 8
    /// boundary check bytes is accepted for compatibility but logged as a
    /// warning: the expected chunk size at that width is astronomically
    /// larger than any usable maximum, so every chunk is cut by the cap.
    pub fn validate(&self) -> Result<(), DedupError> {
        if self.min_chunk_size < 128 || self.min_chunk_size % SIZE_ALIGN != 0 {
            return Err(DedupError::InvalidArgument(format!(
                "min_chunk_size must be a multiple of 64 and at least 128, got {}",
                self.min_chunk_size
            )));
        }

        if self.max_chunk_size % SIZE_ALIGN != 0 {
            return Err(DedupError::InvalidArgument(format!(
                "max_chunk_size must be a multiple of 64, got {}",
                self.max_chunk_size
            )));
        }

        if self.max_chunk_size < 8 * self.min_chunk_size {
            return Err(DedupError::InvalidArgument(format!(
                "max_chunk_size must be at least 8 * min_chunk_size ({}), got {}",
                8 * self.min_chunk_size,
                self.max_chunk_size
            )));
        }

        if self.shift_count == 0 || self.shift_count > self.min_chunk_size {
            return Err(DedupError::InvalidArgument(format!(
                "shift_count must be in 1..={}, got {}",
                self.min_chunk_size, self.shift_count
            )));
        }

        if self.boundary_check_bytes == 0 || self.boundary_check_bytes > 8 {
            return Err(DedupError::InvalidArgument(format!(
                "boundary_check_bytes must be in 1..=8, got {}",
                self.boundary_check_bytes
            )));
        }

        if self.boundary_check_bytes == 8 {
            warn!(
                "boundary_check_bytes = 8: expected chunk size ~2^64, \
                 every chunk will be cut at max_chunk_size"
            );
        }

        Ok(())
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: DEFAULT_MIN_CHUNK_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            shift_count: DEFAULT_SHIFT_COUNT,
            boundary_check_bytes: DEFAULT_BOUNDARY_CHECK_BYTES,
        }
    }
}

/// Options supplied when creating a store.
///
/// Combines the chunking parameters with the index shape flag. Like
/// [`ChunkConfig`], the whole of `StoreOptions` is persisted at index
/// creation and read back verbatim on open.
///
/// # Example
///
/// ```
/// use deduprs::{ChunkConfig, StoreOptions};
///
/// let options = StoreOptions::new(ChunkConfig::new(128, 1024, 64, 2)?)
///     .with_index_per_object(true);
/// assert!(options.index_per_object());
/// # Ok::<(), deduprs::DedupError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreOptions {
    /// Chunking parameters.
    chunking: ChunkConfig,

    /// `false` = one flat index; `true` = pool index with one sub-index per
    /// container.
    index_per_object: bool,
}

impl StoreOptions {
    /// Creates store options with the given chunking parameters and a flat
    /// index.
    pub fn new(chunking: ChunkConfig) -> Self {
        Self {
            chunking,
            index_per_object: false,
        }
    }

    /// Selects between the flat index (`false`) and the pool-plus-container
    /// index (`true`).
    pub fn with_index_per_object(mut self, pooled: bool) -> Self {
        self.index_per_object = pooled;
        self
    }

    /// Returns the chunking parameters.
    pub fn chunking(&self) -> &ChunkConfig {
        &self.chunking
    }

    /// Returns whether the store uses one sub-index per container.
    pub fn index_per_object(&self) -> bool {
        self.index_per_object
    }
}
