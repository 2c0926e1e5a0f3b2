//! SHA-256 content hashing.
//!
//! The content hash identifies a chunk: two chunks with equal bytes hash to
//! the same digest and therefore to the same key, which is what makes
//! deduplication work. The base64 encoding of this digest (see
//! [`crate::chunk::ChunkKey`]) is the stable on-disk identity.

use sha2::{Digest, Sha256};

/// Size of the content digest in bytes.
pub(crate) const CONTENT_HASH_SIZE: usize = 32;

/// Computes the SHA-256 digest of `data`.
pub(crate) fn content_hash(data: &[u8]) -> [u8; CONTENT_HASH_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
