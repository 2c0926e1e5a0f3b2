//! Chunk key type.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::hash::content_hash;

/// The content-derived identity of a chunk.
///
/// A `ChunkKey` is the standard (padded) base64 encoding of the SHA-256
/// digest of the chunk's bytes. The encoded string - not the raw digest -
/// is the stable identifier: it is what the index stores, what callbacks
/// receive, and what survives backups and container imports. The encoding
/// is therefore part of the on-disk format and must not change.
///
/// # Example
///
/// ```
/// use deduprs::ChunkKey;
///
/// let key = ChunkKey::of(b"hello world");
/// assert_eq!(key.as_str().len(), 44); // base64 of 32 bytes, padded
/// assert_eq!(key, ChunkKey::of(b"hello world"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkKey(String);

impl ChunkKey {
    /// Length of an encoded key in characters.
    pub const ENCODED_LEN: usize = 44;

    /// Computes the key of the given chunk bytes.
    pub fn of(data: &[u8]) -> Self {
        Self(STANDARD.encode(content_hash(data)))
    }

    /// Wraps an already-encoded key string.
    ///
    /// Returns `None` if the string is not a base64 encoding of a 32-byte
    /// digest. Used when reading keys back from the index or from caller
    /// input; keys produced by [`ChunkKey::of`] always round-trip.
    pub fn parse(encoded: &str) -> Option<Self> {
        if encoded.len() != Self::ENCODED_LEN {
            return None;
        }
        let decoded = STANDARD.decode(encoded).ok()?;
        if decoded.len() != 32 {
            return None;
        }
        Some(Self(encoded.to_string()))
    }

    /// Returns the encoded key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the key and returns the encoded string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for ChunkKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_determinism() {
        let a = ChunkKey::of(b"some chunk bytes");
        let b = ChunkKey::of(b"some chunk bytes");
        assert_eq!(a, b);

        let c = ChunkKey::of(b"other chunk bytes");
        assert_ne!(a, c);
    }

    #[test]
    fn test_encoded_length() {
        let key = ChunkKey::of(b"");
        assert_eq!(key.as_str().len(), ChunkKey::ENCODED_LEN);
    }

    #[test]
    fn test_known_key() {
        // base64(SHA-256("")) - a fixed reference value guarding the
        // on-disk encoding.
        let key = ChunkKey::of(b"");
        assert_eq!(key.as_str(), "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");
    }

    #[test]
    fn test_parse() {
        let key = ChunkKey::of(b"data");
        let reparsed = ChunkKey::parse(key.as_str()).unwrap();
        assert_eq!(key, reparsed);

        assert!(ChunkKey::parse("").is_none());
        assert!(ChunkKey::parse("not base64 at all, and the wrong length!!!!").is_none());
    }

    #[test]
    fn test_display() {
        let key = ChunkKey::of(b"data");
        assert_eq!(format!("{}", key), key.as_str());
    }
}
