//! Persistent chunk index.
//!
//! The index records three things: the immutable store configuration, the
//! mapping from each object to its ordered chunk references, and the
//! per-chunk reference counts. It comes in two shapes behind one trait:
//!
//! - [`SqliteIndex`] - the flat shape: one SQLite file holding config,
//!   objects, edges, and chunks
//! - [`PoolIndex`] - the pool shape: a pool file holding config plus a
//!   container registry, with one flat sub-index file per container
//!
//! The index is the source of truth for the store: a chunk key is expected
//! to be present in external storage iff its refcount here is positive.

mod pool;
mod sqlite;

pub(crate) use pool::PoolIndex;
pub(crate) use sqlite::SqliteIndex;

use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::chunk::ChunkKey;
use crate::error::DedupError;

/// Persisted configuration keys. Written once at creation, read-only after.
pub(crate) const CONFIG_MIN_CHUNK_SIZE: &str = "min_chunk_size";
pub(crate) const CONFIG_MAX_CHUNK_SIZE: &str = "max_chunk_size";
pub(crate) const CONFIG_SHIFT_COUNT: &str = "shift_count";
pub(crate) const CONFIG_BOUNDARY_CHECK_BYTES: &str = "boundary_check_bytes";
pub(crate) const CONFIG_INDEX_PER_OBJECT: &str = "index_per_object";

/// Reads one persisted configuration value without committing to an index
/// shape.
///
/// Both shapes share the `config` table, and which backend to construct is
/// itself recorded there (`index_per_object`), so opening a store starts
/// with this raw read. Any failure - unreadable file, missing table,
/// missing row - is index corruption.
pub(crate) fn read_raw_config(path: &Path, key: &str) -> Result<String, DedupError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| DedupError::Corrupt(format!("cannot open index {}: {e}", path.display())))?;

    let value: Option<String> = conn
        .query_row("SELECT value FROM config WHERE name = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| DedupError::Corrupt(format!("cannot read config from {}: {e}", path.display())))?;

    value.ok_or_else(|| {
        DedupError::Corrupt(format!(
            "index {} is missing config '{key}'",
            path.display()
        ))
    })
}

/// One object-to-chunk edge: which chunk, where, in what order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRef {
    /// Content key of the referenced chunk.
    pub key: ChunkKey,
    /// 0-based sequence number within the object.
    pub ordinal: u32,
    /// Byte offset of the chunk within the object.
    pub position: u64,
    /// Chunk length in bytes.
    pub length: u64,
}

/// Object metadata: total length plus the ordered chunk references.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// The object's (sanitized) name.
    pub name: String,
    /// Total bytes of the reconstructed object.
    pub content_length: u64,
    /// Chunk references in ordinal order.
    pub chunks: Vec<ChunkRef>,
}

/// Aggregate counters over an index.
///
/// `entry_count` counts objects in a flat index and containers in a pool
/// index; the byte counters aggregate across all containers either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexStats {
    /// Objects (flat shape) or containers (pool shape).
    pub entry_count: u64,
    /// Distinct chunk keys with a positive refcount.
    pub chunk_count: u64,
    /// Sum of object content lengths.
    pub logical_bytes: u64,
    /// Sum of stored chunk lengths.
    pub physical_bytes: u64,
}

impl IndexStats {
    /// Deduplication ratio: logical bytes per physical byte stored.
    ///
    /// Zero when nothing is stored.
    pub fn ratio(&self) -> f64 {
        if self.physical_bytes == 0 {
            0.0
        } else {
            self.logical_bytes as f64 / self.physical_bytes as f64
        }
    }
}

/// Operations a persistent chunk index must expose.
///
/// Object-level operations take an optional container name: `None`
/// addresses the flat shape, `Some` a container of the pool shape; the
/// wrong combination is an [`DedupError::Unsupported`] error. Mutating
/// operations are transactional at the row level per object.
pub(crate) trait ChunkIndex: Send {
    /// Reads a configuration value.
    fn get_config(&mut self, key: &str) -> Result<Option<String>, DedupError>;

    /// Writes a configuration value. Called only at index creation.
    fn put_config(&mut self, key: &str, value: &str) -> Result<(), DedupError>;

    /// Returns whether an object with this name exists.
    fn object_exists(&mut self, container: Option<&str>, name: &str) -> Result<bool, DedupError>;

    /// Returns whether a chunk with this key is referenced.
    fn chunk_exists(&mut self, container: Option<&str>, key: &ChunkKey)
        -> Result<bool, DedupError>;

    /// Inserts an object row and all of its edges in one transaction,
    /// incrementing (or creating) the refcount of every referenced chunk.
    fn add_object_chunks(
        &mut self,
        container: Option<&str>,
        name: &str,
        content_length: u64,
        chunks: &[ChunkRef],
    ) -> Result<(), DedupError>;

    /// Streaming form of [`add_object_chunks`](Self::add_object_chunks):
    /// appends one edge; the object row is created on the first call.
    fn add_object_chunk(
        &mut self,
        container: Option<&str>,
        name: &str,
        content_length: u64,
        chunk: &ChunkRef,
    ) -> Result<(), DedupError>;

    /// Loads an object's metadata, or `None` if it does not exist.
    fn object_metadata(
        &mut self,
        container: Option<&str>,
        name: &str,
    ) -> Result<Option<ObjectMeta>, DedupError>;

    /// Removes an object and its edges, decrementing referenced chunks.
    ///
    /// Returns the keys whose refcount reached zero (their rows are deleted
    /// and their external bytes are now unaccounted for), or `None` if the
    /// object did not exist.
    fn remove_object(
        &mut self,
        container: Option<&str>,
        name: &str,
    ) -> Result<Option<Vec<ChunkKey>>, DedupError>;

    /// Lists object names in ascending order.
    fn list_objects(&mut self, container: Option<&str>) -> Result<Vec<String>, DedupError>;

    /// Aggregate counters for the whole index.
    fn stats(&mut self) -> Result<IndexStats, DedupError>;

    /// Copies the index to `dest` using SQLite's online backup. For the
    /// pool shape this covers the pool file only; containers are backed up
    /// individually.
    fn backup(&mut self, dest: &Path) -> Result<(), DedupError>;

    /// Registers a new container and creates its sub-index.
    fn add_container(&mut self, name: &str) -> Result<(), DedupError>;

    /// Drops a container row and its sub-index file. The caller is
    /// responsible for having deleted the container's objects first.
    fn remove_container(&mut self, name: &str) -> Result<(), DedupError>;

    /// Returns whether a container with this name is registered.
    fn container_exists(&mut self, name: &str) -> Result<bool, DedupError>;

    /// Lists container names in ascending order.
    fn list_containers(&mut self) -> Result<Vec<String>, DedupError>;

    /// Merges a foreign flat index file into the named container, creating
    /// the container if absent. Duplicate object names are a conflict.
    /// When `increment_refcount` is set, chunk keys already present in the
    /// target gain the source's refcount; otherwise existing rows are left
    /// untouched. Absent keys are inserted with the source's refcount
    /// either way.
    fn import_container_index(
        &mut self,
        name: &str,
        path: &Path,
        increment_refcount: bool,
    ) -> Result<(), DedupError>;

    /// Clones the named container's index into a fresh file at `dest`
    /// (through the same merge path as an import) and, when `new_name` is
    /// given, registers the copy as a container of this pool.
    fn backup_container_index(
        &mut self,
        src: &str,
        dest: &Path,
        new_name: Option<&str>,
        increment_refcount: bool,
    ) -> Result<(), DedupError>;
}
