//! # deduprs
//!
//! Embedded content-addressed deduplication for Rust.
//!
//! `deduprs` splits caller-named byte objects into variable-size chunks at
//! content-defined boundaries, keys each chunk by the base64 of its SHA-256
//! digest, and records the object-to-chunk mapping with per-chunk reference
//! counts in a persistent SQLite index. Identical chunks share one physical
//! copy; the chunk bytes themselves are delegated to caller-supplied
//! callbacks, so any byte store - a directory, an object store, a cache -
//! can sit underneath.
//!
//! ## Design Philosophy
//!
//! The library owns exactly two things: the chunking algorithm and the
//! index. It deliberately does not:
//!
//! - Store chunk bytes (the caller plugs in a [`ChunkBackend`])
//! - Encrypt or compress (layer it in the backend if needed)
//! - Speak any network protocol (it is an embedded library)
//! - Promise crash atomicity for the external byte store (the index is
//!   authoritative; a compensation path cleans up failed writes)
//!
//! ## Chunking
//!
//! Boundaries are found with a sliding window: the window (one minimum
//! chunk size wide) advances by a fixed shift, and a boundary is declared
//! where the MD5 of the window starts with a configured number of zero
//! bytes, or at the maximum chunk size when content never obliges. The walk
//! is deterministic: the same bytes and parameters produce the same chunks
//! on every run and every machine, which is what makes identical data
//! deduplicate.
//!
//! ## Index shapes
//!
//! A store is created either **flat** - one namespace of objects in one
//! index file - or **pooled** (`index_per_object`), where objects live in
//! named containers, each container holding its own sub-index and its own
//! reference counts. Containers of a pool deduplicate internally but not
//! against each other.
//!
//! # Examples
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Mutex;
//!
//! use bytes::Bytes;
//! use deduprs::{Chunk, ChunkBackend, ChunkKey, DedupStore, StoreOptions};
//!
//! // A toy backend: chunk bytes in a HashMap.
//! #[derive(Default)]
//! struct MemStore(Mutex<HashMap<String, Bytes>>);
//!
//! impl ChunkBackend for MemStore {
//!     fn write(&self, chunk: &Chunk) -> bool {
//!         self.0.lock().unwrap().insert(chunk.key().to_string(), chunk.data().clone());
//!         true
//!     }
//!     fn read(&self, key: &ChunkKey) -> Option<Bytes> {
//!         self.0.lock().unwrap().get(key.as_str()).cloned()
//!     }
//!     fn delete(&self, key: &ChunkKey) -> bool {
//!         self.0.lock().unwrap().remove(key.as_str()).is_some()
//!     }
//! }
//!
//! fn main() -> Result<(), deduprs::DedupError> {
//!     let store = DedupStore::create("index.db".as_ref(), StoreOptions::default())?;
//!     let backend = MemStore::default();
//!
//!     store.store_object("greeting", &b"hello world"[..], &backend)?;
//!     let restored = store.retrieve_object("greeting", &backend)?;
//!     assert_eq!(restored.as_ref(), b"hello world");
//!
//!     let stats = store.stats()?;
//!     println!("{} objects, {} chunks", stats.entry_count, stats.chunk_count);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

// Public modules
mod chunk;
mod chunker;
mod config;
mod error;
mod store;

// Internal modules (implementation details)
mod hash; // SHA-256 content hash, MD5 window hash
mod index; // SQLite index backends (flat and pool)

//
// Public API surface
//
// The public API is intentionally minimal. Only essential types are
// exported to keep the surface area small and the API stable.
//

/// Chunk types and related utilities.
pub use chunk::{Chunk, ChunkKey};

/// Chunking engine for splitting byte inputs.
pub use chunker::Chunker;

/// Configuration for chunking and index shape.
pub use config::{
    ChunkConfig, StoreOptions, DEFAULT_BOUNDARY_CHECK_BYTES, DEFAULT_MAX_CHUNK_SIZE,
    DEFAULT_MIN_CHUNK_SIZE, DEFAULT_SHIFT_COUNT,
};

/// Error type for store operations.
pub use error::DedupError;

/// Index record types and statistics.
pub use index::{ChunkRef, IndexStats, ObjectMeta};

/// The store façade and the callback capability it drives.
pub use store::{ChunkBackend, DedupStore};
