//! Chunk data representation.

use std::fmt;

use bytes::Bytes;

use super::ChunkKey;

/// A content-defined chunk of an object.
///
/// Contains:
/// - Data ([`Bytes`]) - owned or zero-copy sliced from the input
/// - Key ([`ChunkKey`]) - base64 of the SHA-256 of the data
/// - Position (`u64`) - byte offset within the source object
/// - Ordinal (`u32`) - 0-based sequence number within the object
///
/// Chunks emitted for one object partition it exactly: positions are the
/// running sums of preceding lengths and ordinals count up from zero.
///
/// # Example
///
/// ```
/// use deduprs::Chunk;
///
/// let chunk = Chunk::new(&b"hello world"[..], 0, 0);
/// assert_eq!(chunk.len(), 11);
/// assert_eq!(chunk.key(), &deduprs::ChunkKey::of(b"hello world"));
/// ```
#[derive(Debug, Clone)]
pub struct Chunk {
    /// The chunk data.
    data: Bytes,

    /// The content-derived key of the data.
    key: ChunkKey,

    /// The offset of the first byte within the source object.
    position: u64,

    /// The 0-based sequence number within the source object.
    ordinal: u32,
}

impl Chunk {
    /// Creates a new chunk, computing its key from the data.
    pub fn new(data: impl Into<Bytes>, position: u64, ordinal: u32) -> Self {
        let data = data.into();
        let key = ChunkKey::of(&data);
        Self {
            data,
            key,
            position,
            ordinal,
        }
    }

    /// Returns the length of the chunk data.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the chunk contains no data.
    ///
    /// The chunker never emits empty chunks; this exists for completeness.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns a reference to the chunk data.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns the content key of this chunk.
    pub fn key(&self) -> &ChunkKey {
        &self.key
    }

    /// Returns the byte offset of this chunk within the source object.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the 0-based sequence number within the source object.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Returns the end offset of the chunk (exclusive).
    pub fn end(&self) -> u64 {
        self.position + self.data.len() as u64
    }

    /// Returns the chunk as a range `[position, end)` within the object.
    pub fn range(&self) -> std::ops::Range<u64> {
        self.position..self.end()
    }

    /// Consumes the chunk and returns the underlying data.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Splits the chunk into its key and data.
    pub fn into_parts(self) -> (ChunkKey, Bytes) {
        (self.key, self.data)
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Chunk(#{} {} bytes @ {}, key={})",
            self.ordinal,
            self.data.len(),
            self.position,
            self.key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_creation() {
        let chunk = Chunk::new(&b"hello"[..], 0, 0);
        assert_eq!(chunk.len(), 5);
        assert!(!chunk.is_empty());
        assert_eq!(chunk.position(), 0);
        assert_eq!(chunk.ordinal(), 0);
        assert_eq!(chunk.key(), &ChunkKey::of(b"hello"));
    }

    #[test]
    fn test_chunk_range() {
        let chunk = Chunk::new(&b"hello world"[..], 10, 3);
        assert_eq!(chunk.end(), 21);
        assert_eq!(chunk.range(), 10..21);
        assert_eq!(chunk.ordinal(), 3);
    }

    #[test]
    fn test_identical_data_identical_keys() {
        // Position and ordinal do not influence the key.
        let a = Chunk::new(&b"same bytes"[..], 0, 0);
        let b = Chunk::new(&b"same bytes"[..], 4096, 7);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_chunk_into_parts() {
        let chunk = Chunk::new(&b"data"[..], 100, 1);
        let expected_key = chunk.key().clone();
        let (key, data) = chunk.into_parts();
        assert_eq!(key, expected_key);
        assert_eq!(data.as_ref(), b"data");
    }

    #[test]
    fn test_chunk_display() {
        let chunk = Chunk::new(&b"data"[..], 100, 2);
        let s = format!("{}", chunk);
        assert!(s.contains("4 bytes"));
        assert!(s.contains("@ 100"));
        assert!(s.contains("#2"));
    }
}
