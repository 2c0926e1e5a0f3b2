//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use deduprs::{Chunk, ChunkBackend, ChunkKey};

/// In-memory chunk backend with an optional programmable write failure.
#[derive(Default)]
pub struct MemoryBackend {
    chunks: Mutex<HashMap<String, Bytes>>,
    fail_write_at: Option<usize>,
    writes: Mutex<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose n-th `write` call (1-based) returns failure.
    pub fn failing_on_write(n: usize) -> Self {
        Self {
            fail_write_at: Some(n),
            ..Self::default()
        }
    }

    /// Number of chunks currently held.
    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    /// Total bytes currently held.
    pub fn total_bytes(&self) -> usize {
        self.chunks.lock().unwrap().values().map(Bytes::len).sum()
    }
}

impl ChunkBackend for MemoryBackend {
    fn write(&self, chunk: &Chunk) -> bool {
        let mut writes = self.writes.lock().unwrap();
        *writes += 1;
        if self.fail_write_at == Some(*writes) {
            return false;
        }
        self.chunks
            .lock()
            .unwrap()
            .insert(chunk.key().to_string(), chunk.data().clone());
        true
    }

    fn read(&self, key: &ChunkKey) -> Option<Bytes> {
        self.chunks.lock().unwrap().get(key.as_str()).cloned()
    }

    fn delete(&self, key: &ChunkKey) -> bool {
        self.chunks.lock().unwrap().remove(key.as_str()).is_some()
    }
}

/// Deterministic pseudo-random bytes (xorshift-free LCG, stable across
/// platforms).
pub fn pseudo_random(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 56) as u8
        })
        .collect()
}
