//! MD5 window hashing and the boundary test.
//!
//! The boundary detector hashes the current window and declares a boundary
//! when the digest starts with a run of zero bytes. MD5 is used here purely
//! as a fast, well-distributed function; it plays no security role.

use md5::{Digest, Md5};

/// Size of the window digest in bytes.
pub(crate) const WINDOW_HASH_SIZE: usize = 16;

/// Computes the MD5 digest of the current window.
pub(crate) fn window_hash(window: &[u8]) -> [u8; WINDOW_HASH_SIZE] {
    let mut hasher = Md5::new();
    hasher.update(window);
    hasher.finalize().into()
}

/// Returns true iff the first `check_bytes` bytes of `digest` are all zero.
///
/// `check_bytes` is the configured boundary width in `1..=8`; the expected
/// distance between boundaries is ~`2^(8 * check_bytes)` tested positions.
pub(crate) fn is_boundary(digest: &[u8; WINDOW_HASH_SIZE], check_bytes: usize) -> bool {
    digest[..check_bytes].iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_hash_determinism() {
        let a = window_hash(&[0xAA; 128]);
        let b = window_hash(&[0xAA; 128]);
        assert_eq!(a, b);

        let c = window_hash(&[0xAB; 128]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_known_digest() {
        // MD5 of the empty input, a fixed reference value.
        let digest = window_hash(b"");
        assert_eq!(digest[..4], [0xd4, 0x1d, 0x8c, 0xd9]);
    }

    #[test]
    fn test_is_boundary() {
        let mut digest = [0u8; WINDOW_HASH_SIZE];
        assert!(is_boundary(&digest, 1));
        assert!(is_boundary(&digest, 8));

        digest[0] = 1;
        assert!(!is_boundary(&digest, 1));

        digest[0] = 0;
        digest[2] = 7;
        assert!(is_boundary(&digest, 2));
        assert!(!is_boundary(&digest, 3));
    }

    #[test]
    fn test_boundary_width_narrows_matches() {
        // A digest that matches at width 1 need not match at width 2.
        let mut digest = [0u8; WINDOW_HASH_SIZE];
        digest[1] = 0xFF;
        assert!(is_boundary(&digest, 1));
        assert!(!is_boundary(&digest, 2));
    }
}
