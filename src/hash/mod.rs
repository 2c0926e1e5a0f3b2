//! Hashing primitives.
//!
//! Two hashes with different jobs:
//!
//! - [`content`] - SHA-256 of chunk bytes; its base64 encoding is the
//!   chunk's identity and part of the on-disk format
//! - [`window`] - MD5 of the sliding window, used only for boundary
//!   detection (chosen for speed, not security)

pub(crate) mod content;
pub(crate) mod window;

pub(crate) use content::content_hash;
pub(crate) use window::{is_boundary, window_hash};
