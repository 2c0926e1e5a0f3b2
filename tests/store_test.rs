// Integration tests for the flat store façade.
// Tests cover: round-trips, deduplication accounting, conflict and replace
// semantics, the write-failure compensation path, delete and release.

mod common;

use common::{pseudo_random, MemoryBackend};
use deduprs::{ChunkConfig, DedupError, DedupStore, StoreOptions};
use tempfile::TempDir;

fn new_store(dir: &TempDir) -> DedupStore {
    let chunking = ChunkConfig::new(128, 1024, 64, 1).unwrap();
    DedupStore::create(&dir.path().join("index.db"), StoreOptions::new(chunking)).unwrap()
}

// ============================================================================
// Round-trips
// ============================================================================

#[test]
fn test_roundtrip_various_sizes() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    let backend = MemoryBackend::new();

    for (i, size) in [0usize, 1, 63, 128, 1024, 10_000, 100_000].iter().enumerate() {
        let name = format!("object-{i}");
        let data = pseudo_random(*size, i as u64 + 1);
        store.store_object(&name, data.clone(), &backend).unwrap();

        let restored = store.retrieve_object(&name, &backend).unwrap();
        assert_eq!(restored.as_ref(), data.as_slice(), "size {size} round-trip");
    }
}

#[test]
fn test_metadata_partitions_object() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    let backend = MemoryBackend::new();

    let data = pseudo_random(30_000, 5);
    store.store_object("obj", data.clone(), &backend).unwrap();

    let meta = store.retrieve_object_metadata("obj").unwrap().unwrap();
    assert_eq!(meta.content_length, data.len() as u64);

    let mut position = 0u64;
    for (i, edge) in meta.chunks.iter().enumerate() {
        assert_eq!(edge.ordinal, i as u32);
        assert_eq!(edge.position, position);
        position += edge.length;
    }
    assert_eq!(position, meta.content_length);

    assert!(store.retrieve_object_metadata("missing").unwrap().is_none());
}

#[test]
fn test_streaming_roundtrip() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    let backend = MemoryBackend::new();

    let data = pseudo_random(50_000, 17);
    store
        .store_object_stream(
            "obj",
            std::io::Cursor::new(data.clone()),
            data.len() as u64,
            &backend,
        )
        .unwrap();

    let mut out = std::io::Cursor::new(Vec::new());
    store
        .retrieve_object_stream("obj", &backend, &mut out)
        .unwrap();
    assert_eq!(out.position(), 0);
    assert_eq!(out.into_inner(), data);
}

// ============================================================================
// Deduplication Accounting
// ============================================================================

#[test]
fn test_identical_objects_share_physical_bytes() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    let backend = MemoryBackend::new();

    let data = pseudo_random(10_000, 3);
    store.store_object("x", data.clone(), &backend).unwrap();
    let after_first = store.stats().unwrap();

    store.store_object("y", data, &backend).unwrap();
    let after_second = store.stats().unwrap();

    // Full dedup: the second copy adds no physical bytes.
    assert_eq!(after_second.physical_bytes, after_first.physical_bytes);
    assert_eq!(after_second.chunk_count, after_first.chunk_count);
    assert_eq!(after_second.logical_bytes, 2 * after_first.logical_bytes);
    assert_eq!(after_second.entry_count, 2);
    assert!((after_second.ratio() - 2.0).abs() < 1e-9);

    // The backend holds each chunk once.
    assert_eq!(backend.chunk_count() as u64, after_second.chunk_count);
}

#[test]
fn test_partial_overlap_shares_prefix_chunks() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    let backend = MemoryBackend::new();

    let prefix = vec![0u8; 4096];
    let mut extended = prefix.clone();
    extended.extend_from_slice(&pseudo_random(2048, 23));

    store.store_object("a", prefix, &backend).unwrap();
    let after_a = store.stats().unwrap();
    store.store_object("b", extended, &backend).unwrap();
    let after_b = store.stats().unwrap();

    // The shared 4 KiB prefix must not be stored twice.
    assert!(after_b.physical_bytes < after_a.physical_bytes + 2048 + 1024);
}

// ============================================================================
// Conflicts and Replacement
// ============================================================================

#[test]
fn test_store_conflict_and_replace() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    let backend = MemoryBackend::new();

    let first = pseudo_random(5_000, 1);
    let second = pseudo_random(6_000, 2);

    store.store_object("obj", first.clone(), &backend).unwrap();
    assert!(matches!(
        store.store_object("obj", second.clone(), &backend),
        Err(DedupError::ObjectExists(_))
    ));
    // The failed store must not have disturbed the object.
    assert_eq!(
        store.retrieve_object("obj", &backend).unwrap().as_ref(),
        first.as_slice()
    );

    store
        .store_or_replace_object("obj", second.clone(), &backend)
        .unwrap();
    assert_eq!(
        store.retrieve_object("obj", &backend).unwrap().as_ref(),
        second.as_slice()
    );

    // The replaced object's chunks are gone from index and backend alike.
    let stats = store.stats().unwrap();
    assert_eq!(stats.entry_count, 1);
    assert_eq!(backend.chunk_count() as u64, stats.chunk_count);
}

// ============================================================================
// Compensation
// ============================================================================

#[test]
fn test_failed_write_restores_index() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);

    // Seed an object so some chunks of the doomed store are shared and
    // carry prior refcounts.
    let seed_backend = MemoryBackend::new();
    let data = pseudo_random(10_000, 8);
    store.store_object("seed", data.clone(), &seed_backend).unwrap();
    let before = store.stats().unwrap();

    // The 3rd write of the new object fails.
    let backend = MemoryBackend::failing_on_write(3);
    let result = store.store_object("doomed", data, &backend);
    assert!(matches!(
        result,
        Err(DedupError::Backend { op: "write", .. })
    ));

    // The index state equals the state before the call.
    assert!(!store.object_exists("doomed").unwrap());
    let after = store.stats().unwrap();
    assert_eq!(after.entry_count, before.entry_count);
    assert_eq!(after.chunk_count, before.chunk_count);
    assert_eq!(after.physical_bytes, before.physical_bytes);
    assert_eq!(after.logical_bytes, before.logical_bytes);

    // The seed object is still fully retrievable.
    assert!(store.retrieve_object("seed", &seed_backend).is_ok());
}

#[test]
fn test_failed_first_write_leaves_empty_index() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);

    let backend = MemoryBackend::failing_on_write(1);
    assert!(store
        .store_object("obj", pseudo_random(5_000, 4), &backend)
        .is_err());

    let stats = store.stats().unwrap();
    assert_eq!(stats.entry_count, 0);
    assert_eq!(stats.chunk_count, 0);
    assert_eq!(backend.chunk_count(), 0);
}

// ============================================================================
// Delete
// ============================================================================

#[test]
fn test_delete_releases_only_unshared_chunks() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    let backend = MemoryBackend::new();

    let data = pseudo_random(10_000, 6);
    store.store_object("x", data.clone(), &backend).unwrap();
    store.store_object("y", data.clone(), &backend).unwrap();

    // Deleting one of two identical objects must keep every chunk alive.
    assert!(store.delete_object("x", &backend).unwrap());
    let stats = store.stats().unwrap();
    assert!(stats.chunk_count > 0);
    assert_eq!(
        store.retrieve_object("y", &backend).unwrap().as_ref(),
        data.as_slice()
    );

    // Deleting the last reference releases everything.
    assert!(store.delete_object("y", &backend).unwrap());
    assert_eq!(store.stats().unwrap().chunk_count, 0);
    assert_eq!(backend.chunk_count(), 0);
}

// ============================================================================
// Persistence and Backup
// ============================================================================

#[test]
fn test_objects_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index.db");
    let backend = MemoryBackend::new();
    let data = pseudo_random(10_000, 9);

    {
        let chunking = ChunkConfig::new(128, 1024, 64, 1).unwrap();
        let store = DedupStore::create(&path, StoreOptions::new(chunking)).unwrap();
        store.store_object("obj", data.clone(), &backend).unwrap();
    }

    let store = DedupStore::open(&path).unwrap();
    assert_eq!(
        store.retrieve_object("obj", &backend).unwrap().as_ref(),
        data.as_slice()
    );
}

#[test]
fn test_backup_index_is_openable() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    let backend = MemoryBackend::new();
    let data = pseudo_random(5_000, 10);
    store.store_object("obj", data.clone(), &backend).unwrap();

    let dest = dir.path().join("backup.db");
    store.backup_index(&dest).unwrap();

    let copy = DedupStore::open(&dest).unwrap();
    assert!(copy.object_exists("obj").unwrap());
    assert_eq!(
        copy.retrieve_object("obj", &backend).unwrap().as_ref(),
        data.as_slice()
    );
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_name_sanitization_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    let backend = MemoryBackend::new();

    store
        .store_object("dir/with:odd*chars", vec![1u8; 300], &backend)
        .unwrap();

    // The same raw name resolves to the same stored object.
    assert!(store.object_exists("dir/with:odd*chars").unwrap());
    assert!(store.object_exists("dir_with_odd_chars").unwrap());
    assert_eq!(store.list_objects().unwrap(), ["dir_with_odd_chars"]);
}

#[test]
fn test_empty_name_rejected() {
    let dir = TempDir::new().unwrap();
    let store = new_store(&dir);
    let backend = MemoryBackend::new();

    assert!(matches!(
        store.store_object("   ", vec![1u8; 10], &backend),
        Err(DedupError::InvalidArgument(_))
    ));
}
