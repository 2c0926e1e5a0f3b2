//! Store façade.
//!
//! [`DedupStore`] ties the pieces together: it owns the persistent index
//! and the serialization lock, runs the chunker, and drives the
//! caller-supplied [`ChunkBackend`] callbacks. The index is the source of
//! truth; the external chunk store is best-effort, and the write protocol's
//! compensation path keeps the two from drifting apart in the dangerous
//! direction (an index edge whose bytes were never written).

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::chunk::{Chunk, ChunkKey};
use crate::chunker::Chunker;
use crate::config::{ChunkConfig, StoreOptions};
use crate::error::DedupError;
use crate::index::{
    read_raw_config, ChunkIndex, ChunkRef, IndexStats, ObjectMeta, PoolIndex, SqliteIndex,
    CONFIG_BOUNDARY_CHECK_BYTES, CONFIG_INDEX_PER_OBJECT, CONFIG_MAX_CHUNK_SIZE,
    CONFIG_MIN_CHUNK_SIZE, CONFIG_SHIFT_COUNT,
};

/// The caller-supplied chunk I/O capability.
///
/// The library never touches chunk bytes at rest; it hands them to `write`,
/// asks for them back through `read`, and requests best-effort removal with
/// `delete`. Implementations signal failure by returning `false` (or `None`
/// from `read`); the library reacts per operation (compensation on writes,
/// abort on reads, a logged warning on deletes).
///
/// `write` must be idempotent for identical keys: the same key always
/// carries the same bytes, so overwriting is harmless.
///
/// Callbacks are invoked with the store's serialization lock held and must
/// not call back into the store on the same thread; doing so would
/// deadlock.
pub trait ChunkBackend {
    /// Durably persists the chunk's bytes under its key.
    fn write(&self, chunk: &Chunk) -> bool;

    /// Returns the bytes previously written under `key`, or `None` when
    /// missing or unreadable.
    fn read(&self, key: &ChunkKey) -> Option<Bytes>;

    /// Best-effort removal of the bytes under `key`.
    fn delete(&self, key: &ChunkKey) -> bool;
}

/// Makes a caller-supplied object or container name safe to use as a
/// storage key.
///
/// Deterministic: surrounding whitespace is trimmed, ASCII alphanumerics
/// and `.`, `_`, `-` pass through, every other character becomes `_`. A
/// name that trims to nothing is invalid.
fn sanitize_name(name: &str) -> Result<String, DedupError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DedupError::InvalidArgument("name is empty".to_string()));
    }
    Ok(trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect())
}

/// An embedded content-addressed deduplication store.
///
/// A `DedupStore` chunks caller-named byte objects, records the
/// object-to-chunk mapping and per-chunk reference counts in a persistent
/// index, and delegates the chunk bytes themselves to a [`ChunkBackend`].
/// Identical chunks - within one index - share a single physical copy.
///
/// Two index shapes exist, chosen at creation and immutable after:
/// flat (one namespace of objects) and pooled (`index_per_object`), where
/// objects live in named containers, each with its own sub-index and its
/// own reference counts. Object-level methods come in unscoped and `_in`
/// pairs; use the pair matching the store's shape.
///
/// Every operation serializes on one per-instance lock, held across both
/// the index mutation and the callback invocations it implies. Independent
/// stores in one process do not contend.
///
/// # Example
///
/// ```no_run
/// use deduprs::{DedupStore, StoreOptions};
///
/// let store = DedupStore::create("index.db".as_ref(), StoreOptions::default())?;
/// # Ok::<(), deduprs::DedupError>(())
/// ```
pub struct DedupStore {
    index: Mutex<Box<dyn ChunkIndex>>,
    chunker: Chunker,
    pooled: bool,
}

impl DedupStore {
    /// Creates a new store at `path`, persisting the configuration.
    ///
    /// Fails if the chunking parameters are invalid or a file already
    /// exists at `path`. For the pooled shape, container sub-indexes are
    /// created next to the pool file.
    pub fn create(path: &Path, options: StoreOptions) -> Result<Self, DedupError> {
        options.chunking().validate()?;
        if path.exists() {
            return Err(DedupError::InvalidArgument(format!(
                "index {} already exists",
                path.display()
            )));
        }

        let mut index: Box<dyn ChunkIndex> = if options.index_per_object() {
            Box::new(PoolIndex::create(path)?)
        } else {
            Box::new(SqliteIndex::create(path)?)
        };

        let chunking = *options.chunking();
        index.put_config(CONFIG_MIN_CHUNK_SIZE, &chunking.min_chunk_size().to_string())?;
        index.put_config(CONFIG_MAX_CHUNK_SIZE, &chunking.max_chunk_size().to_string())?;
        index.put_config(CONFIG_SHIFT_COUNT, &chunking.shift_count().to_string())?;
        index.put_config(
            CONFIG_BOUNDARY_CHECK_BYTES,
            &chunking.boundary_check_bytes().to_string(),
        )?;
        index.put_config(
            CONFIG_INDEX_PER_OBJECT,
            if options.index_per_object() { "true" } else { "false" },
        )?;

        debug!(path = %path.display(), pooled = options.index_per_object(), "created store");
        Ok(Self {
            index: Mutex::new(index),
            chunker: Chunker::new(chunking),
            pooled: options.index_per_object(),
        })
    }

    /// Opens an existing store, reading the persisted configuration.
    ///
    /// A missing or unparsable configuration is index corruption and fails
    /// the open.
    pub fn open(path: &Path) -> Result<Self, DedupError> {
        let parse = |key: &str| -> Result<usize, DedupError> {
            let raw = read_raw_config(path, key)?;
            raw.parse().map_err(|_| {
                DedupError::Corrupt(format!("config '{key}' is not a number: {raw}"))
            })
        };

        let chunking = ChunkConfig::new(
            parse(CONFIG_MIN_CHUNK_SIZE)?,
            parse(CONFIG_MAX_CHUNK_SIZE)?,
            parse(CONFIG_SHIFT_COUNT)?,
            parse(CONFIG_BOUNDARY_CHECK_BYTES)?,
        )
        .map_err(|e| DedupError::Corrupt(format!("persisted chunking config is invalid: {e}")))?;

        let pooled = match read_raw_config(path, CONFIG_INDEX_PER_OBJECT)?.as_str() {
            "true" => true,
            "false" => false,
            other => {
                return Err(DedupError::Corrupt(format!(
                    "config 'index_per_object' is not a boolean: {other}"
                )))
            }
        };

        let index: Box<dyn ChunkIndex> = if pooled {
            Box::new(PoolIndex::open(path)?)
        } else {
            Box::new(SqliteIndex::open(path)?)
        };

        debug!(path = %path.display(), pooled, "opened store");
        Ok(Self {
            index: Mutex::new(index),
            chunker: Chunker::new(chunking),
            pooled,
        })
    }

    /// Returns the chunking configuration this store was created with.
    pub fn config(&self) -> &ChunkConfig {
        self.chunker.config()
    }

    /// Returns whether this store uses one sub-index per container.
    pub fn index_per_object(&self) -> bool {
        self.pooled
    }

    // ------------------------------------------------------------------
    // Store
    // ------------------------------------------------------------------

    /// Stores `data` under `name`, writing each chunk through `backend`.
    ///
    /// Fails with [`DedupError::ObjectExists`] if the name is taken. On any
    /// failure past that point the compensation path restores the index to
    /// its prior state and best-effort deletes whatever chunk bytes became
    /// unreferenced. Returns the emitted chunk list on success.
    pub fn store_object(
        &self,
        name: &str,
        data: impl Into<Bytes>,
        backend: &dyn ChunkBackend,
    ) -> Result<Vec<ChunkRef>, DedupError> {
        self.store_scoped(None, name, data.into(), backend, false)
    }

    /// Container-scoped form of [`store_object`](Self::store_object).
    pub fn store_object_in(
        &self,
        container: &str,
        name: &str,
        data: impl Into<Bytes>,
        backend: &dyn ChunkBackend,
    ) -> Result<Vec<ChunkRef>, DedupError> {
        self.store_scoped(Some(container), name, data.into(), backend, false)
    }

    /// Like [`store_object`](Self::store_object), but an existing object
    /// under this name is deleted first.
    pub fn store_or_replace_object(
        &self,
        name: &str,
        data: impl Into<Bytes>,
        backend: &dyn ChunkBackend,
    ) -> Result<Vec<ChunkRef>, DedupError> {
        self.store_scoped(None, name, data.into(), backend, true)
    }

    /// Container-scoped form of
    /// [`store_or_replace_object`](Self::store_or_replace_object).
    pub fn store_or_replace_object_in(
        &self,
        container: &str,
        name: &str,
        data: impl Into<Bytes>,
        backend: &dyn ChunkBackend,
    ) -> Result<Vec<ChunkRef>, DedupError> {
        self.store_scoped(Some(container), name, data.into(), backend, true)
    }

    /// Stores an object from a sequential reader of known length.
    ///
    /// Edges and chunk bytes are written one chunk at a time, so memory
    /// stays bounded by one maximum chunk plus one window regardless of
    /// object size. Failure semantics match
    /// [`store_object`](Self::store_object).
    pub fn store_object_stream<R: Read>(
        &self,
        name: &str,
        reader: R,
        content_length: u64,
        backend: &dyn ChunkBackend,
    ) -> Result<Vec<ChunkRef>, DedupError> {
        self.store_stream_scoped(None, name, reader, content_length, backend)
    }

    /// Container-scoped form of
    /// [`store_object_stream`](Self::store_object_stream).
    pub fn store_object_stream_in<R: Read>(
        &self,
        container: &str,
        name: &str,
        reader: R,
        content_length: u64,
        backend: &dyn ChunkBackend,
    ) -> Result<Vec<ChunkRef>, DedupError> {
        self.store_stream_scoped(Some(container), name, reader, content_length, backend)
    }

    // ------------------------------------------------------------------
    // Retrieve
    // ------------------------------------------------------------------

    /// Reassembles an object by reading its chunks back through `backend`.
    ///
    /// A missing object is [`DedupError::ObjectNotFound`]; a chunk the
    /// backend cannot produce, or produces at the wrong size, aborts the
    /// read with the index left untouched.
    pub fn retrieve_object(
        &self,
        name: &str,
        backend: &dyn ChunkBackend,
    ) -> Result<Bytes, DedupError> {
        self.retrieve_scoped(None, name, backend)
    }

    /// Container-scoped form of [`retrieve_object`](Self::retrieve_object).
    pub fn retrieve_object_in(
        &self,
        container: &str,
        name: &str,
        backend: &dyn ChunkBackend,
    ) -> Result<Bytes, DedupError> {
        self.retrieve_scoped(Some(container), name, backend)
    }

    /// Streams an object into `out` chunk by chunk, then seeks `out` back
    /// to its origin.
    pub fn retrieve_object_stream<W: Write + Seek>(
        &self,
        name: &str,
        backend: &dyn ChunkBackend,
        out: &mut W,
    ) -> Result<(), DedupError> {
        self.retrieve_stream_scoped(None, name, backend, out)
    }

    /// Container-scoped form of
    /// [`retrieve_object_stream`](Self::retrieve_object_stream).
    pub fn retrieve_object_stream_in<W: Write + Seek>(
        &self,
        container: &str,
        name: &str,
        backend: &dyn ChunkBackend,
        out: &mut W,
    ) -> Result<(), DedupError> {
        self.retrieve_stream_scoped(Some(container), name, backend, out)
    }

    /// Loads an object's metadata (content length plus ordered chunk
    /// references), or `None` if it does not exist.
    pub fn retrieve_object_metadata(&self, name: &str) -> Result<Option<ObjectMeta>, DedupError> {
        self.metadata_scoped(None, name)
    }

    /// Container-scoped form of
    /// [`retrieve_object_metadata`](Self::retrieve_object_metadata).
    pub fn retrieve_object_metadata_in(
        &self,
        container: &str,
        name: &str,
    ) -> Result<Option<ObjectMeta>, DedupError> {
        self.metadata_scoped(Some(container), name)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Deletes an object, releasing its chunks.
    ///
    /// Chunk keys whose refcount reaches zero are handed to the backend's
    /// `delete`; a failing delete callback is logged and otherwise ignored,
    /// leaving orphaned external bytes the caller may reconcile
    /// out-of-band. Returns `false` if the object did not exist.
    pub fn delete_object(
        &self,
        name: &str,
        backend: &dyn ChunkBackend,
    ) -> Result<bool, DedupError> {
        self.delete_scoped(None, name, backend)
    }

    /// Container-scoped form of [`delete_object`](Self::delete_object).
    pub fn delete_object_in(
        &self,
        container: &str,
        name: &str,
        backend: &dyn ChunkBackend,
    ) -> Result<bool, DedupError> {
        self.delete_scoped(Some(container), name, backend)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Returns whether an object with this name exists.
    pub fn object_exists(&self, name: &str) -> Result<bool, DedupError> {
        self.exists_scoped(None, name)
    }

    /// Returns whether `name` exists within the given container.
    pub fn object_exists_in(&self, container: &str, name: &str) -> Result<bool, DedupError> {
        self.exists_scoped(Some(container), name)
    }

    /// Returns whether a chunk with this key is referenced by the index.
    pub fn chunk_exists(&self, key: &ChunkKey) -> Result<bool, DedupError> {
        self.check_scope(None)?;
        self.index.lock().chunk_exists(None, key)
    }

    /// Returns whether a chunk with this key is referenced within the given
    /// container.
    pub fn chunk_exists_in(&self, container: &str, key: &ChunkKey) -> Result<bool, DedupError> {
        self.check_scope(Some(container))?;
        let container = sanitize_name(container)?;
        self.index.lock().chunk_exists(Some(&container), key)
    }

    /// Lists object names in ascending order.
    pub fn list_objects(&self) -> Result<Vec<String>, DedupError> {
        self.check_scope(None)?;
        self.index.lock().list_objects(None)
    }

    /// Lists a container's object names in ascending order.
    pub fn list_objects_in(&self, container: &str) -> Result<Vec<String>, DedupError> {
        self.check_scope(Some(container))?;
        let container = sanitize_name(container)?;
        self.index.lock().list_objects(Some(&container))
    }

    /// Aggregate counters: objects or containers, chunks, logical and
    /// physical bytes.
    pub fn stats(&self) -> Result<IndexStats, DedupError> {
        self.index.lock().stats()
    }

    /// Copies the index to `dest` using SQLite's online backup. For a
    /// pooled store this covers the pool file only; containers are backed
    /// up individually via
    /// [`backup_container_index`](Self::backup_container_index).
    pub fn backup_index(&self, dest: &Path) -> Result<(), DedupError> {
        self.index.lock().backup(dest)
    }

    // ------------------------------------------------------------------
    // Containers (pooled shape only)
    // ------------------------------------------------------------------

    /// Registers a new container with its own empty sub-index.
    pub fn add_container(&self, name: &str) -> Result<(), DedupError> {
        self.require_pooled()?;
        let name = sanitize_name(name)?;
        self.index.lock().add_container(&name)
    }

    /// Deletes a container: every object it holds is deleted through
    /// `backend` (re-listing until the listing is stably empty), then the
    /// container row and sub-index are dropped.
    pub fn delete_container(
        &self,
        name: &str,
        backend: &dyn ChunkBackend,
    ) -> Result<(), DedupError> {
        self.require_pooled()?;
        let name = sanitize_name(name)?;
        let mut index = self.index.lock();
        if !index.container_exists(&name)? {
            return Err(DedupError::ContainerNotFound(name));
        }
        loop {
            let objects = index.list_objects(Some(&name))?;
            if objects.is_empty() {
                break;
            }
            for object in objects {
                Self::delete_locked(index.as_mut(), Some(&name), &object, backend)?;
            }
        }
        index.remove_container(&name)
    }

    /// Returns whether a container with this name is registered.
    pub fn container_exists(&self, name: &str) -> Result<bool, DedupError> {
        self.require_pooled()?;
        let name = sanitize_name(name)?;
        self.index.lock().container_exists(&name)
    }

    /// Lists container names in ascending order.
    pub fn list_containers(&self) -> Result<Vec<String>, DedupError> {
        self.require_pooled()?;
        self.index.lock().list_containers()
    }

    /// Merges a foreign flat index file into the named container, creating
    /// the container if absent. See the index documentation for the
    /// `increment_refcount` semantics.
    pub fn import_container_index(
        &self,
        name: &str,
        path: &Path,
        increment_refcount: bool,
    ) -> Result<(), DedupError> {
        self.require_pooled()?;
        let name = sanitize_name(name)?;
        self.index
            .lock()
            .import_container_index(&name, path, increment_refcount)
    }

    /// Clones a container's index into a fresh file at `dest`, optionally
    /// registering the copy under `new_name`.
    pub fn backup_container_index(
        &self,
        src: &str,
        dest: &Path,
        new_name: Option<&str>,
        increment_refcount: bool,
    ) -> Result<(), DedupError> {
        self.require_pooled()?;
        let src = sanitize_name(src)?;
        let new_name = new_name.map(sanitize_name).transpose()?;
        self.index.lock().backup_container_index(
            &src,
            dest,
            new_name.as_deref(),
            increment_refcount,
        )
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Rejects container arguments that do not match the index shape.
    fn check_scope(&self, container: Option<&str>) -> Result<(), DedupError> {
        match (self.pooled, container) {
            (false, Some(_)) => Err(DedupError::InvalidArgument(
                "this store has a flat index; use the unscoped methods".to_string(),
            )),
            (true, None) => Err(DedupError::InvalidArgument(
                "this store is pooled; use the container-scoped methods".to_string(),
            )),
            _ => Ok(()),
        }
    }

    fn require_pooled(&self) -> Result<(), DedupError> {
        if self.pooled {
            Ok(())
        } else {
            Err(DedupError::Unsupported("flat index has no containers"))
        }
    }

    /// Sanitizes the scope pair and returns them ready for the index.
    fn sanitize_scope(
        &self,
        container: Option<&str>,
        name: &str,
    ) -> Result<(Option<String>, String), DedupError> {
        self.check_scope(container)?;
        let container = container.map(sanitize_name).transpose()?;
        Ok((container, sanitize_name(name)?))
    }

    fn store_scoped(
        &self,
        container: Option<&str>,
        name: &str,
        data: Bytes,
        backend: &dyn ChunkBackend,
        replace: bool,
    ) -> Result<Vec<ChunkRef>, DedupError> {
        let (container, name) = self.sanitize_scope(container, name)?;
        let container = container.as_deref();

        // Chunking is pure computation; only index and callback work holds
        // the lock.
        let chunks = self.chunker.chunk_bytes(data)?;
        let refs: Vec<ChunkRef> = chunks.iter().map(chunk_ref).collect();
        let content_length: u64 = chunks.iter().map(|c| c.len() as u64).sum();

        let mut index = self.index.lock();
        if index.object_exists(container, &name)? {
            if replace {
                Self::delete_locked(index.as_mut(), container, &name, backend)?;
            } else {
                return Err(DedupError::ObjectExists(name));
            }
        }

        // All edges first, then the bytes: a surviving object row implies
        // every referenced chunk's bytes are believed present.
        index.add_object_chunks(container, &name, content_length, &refs)?;
        for chunk in &chunks {
            if !backend.write(chunk) {
                Self::compensate(index.as_mut(), container, &name, backend);
                return Err(DedupError::Backend {
                    op: "write",
                    key: chunk.key().to_string(),
                });
            }
        }

        debug!(object = %name, chunks = refs.len(), bytes = content_length, "stored object");
        Ok(refs)
    }

    fn store_stream_scoped<R: Read>(
        &self,
        container: Option<&str>,
        name: &str,
        reader: R,
        content_length: u64,
        backend: &dyn ChunkBackend,
    ) -> Result<Vec<ChunkRef>, DedupError> {
        let (container, name) = self.sanitize_scope(container, name)?;
        let container = container.as_deref();

        let mut index = self.index.lock();
        if index.object_exists(container, &name)? {
            return Err(DedupError::ObjectExists(name));
        }

        let mut refs: Vec<ChunkRef> = Vec::new();
        let mut failure: Option<DedupError> = None;
        let result = self
            .chunker
            .chunk_stream(reader, content_length, |chunk| {
                let edge = chunk_ref(&chunk);
                if let Err(e) = index.add_object_chunk(container, &name, content_length, &edge) {
                    failure = Some(e);
                    return false;
                }
                if !backend.write(&chunk) {
                    failure = Some(DedupError::Backend {
                        op: "write",
                        key: chunk.key().to_string(),
                    });
                    return false;
                }
                refs.push(edge);
                true
            });

        match (result, failure) {
            (Ok(true), None) => {
                // A zero-length object emits no chunks; the row still has
                // to exist.
                if refs.is_empty() {
                    index.add_object_chunks(container, &name, content_length, &[])?;
                }
                debug!(object = %name, chunks = refs.len(), bytes = content_length, "stored object");
                Ok(refs)
            }
            (Err(e), _) | (_, Some(e)) => {
                Self::compensate(index.as_mut(), container, &name, backend);
                Err(e)
            }
            (Ok(false), None) => {
                // The sink only stops after recording a failure.
                Self::compensate(index.as_mut(), container, &name, backend);
                Err(DedupError::Backend {
                    op: "write",
                    key: String::new(),
                })
            }
        }
    }

    fn retrieve_scoped(
        &self,
        container: Option<&str>,
        name: &str,
        backend: &dyn ChunkBackend,
    ) -> Result<Bytes, DedupError> {
        let (container, name) = self.sanitize_scope(container, name)?;

        let mut index = self.index.lock();
        let meta = index
            .object_metadata(container.as_deref(), &name)?
            .ok_or_else(|| DedupError::ObjectNotFound(name.clone()))?;

        let mut out = vec![0u8; meta.content_length as usize];
        for edge in &meta.chunks {
            let data = Self::read_chunk(backend, edge)?;
            let start = edge.position as usize;
            out[start..start + data.len()].copy_from_slice(&data);
        }
        Ok(Bytes::from(out))
    }

    fn retrieve_stream_scoped<W: Write + Seek>(
        &self,
        container: Option<&str>,
        name: &str,
        backend: &dyn ChunkBackend,
        out: &mut W,
    ) -> Result<(), DedupError> {
        let (container, name) = self.sanitize_scope(container, name)?;

        let mut index = self.index.lock();
        let meta = index
            .object_metadata(container.as_deref(), &name)?
            .ok_or_else(|| DedupError::ObjectNotFound(name.clone()))?;

        for edge in &meta.chunks {
            let data = Self::read_chunk(backend, edge)?;
            out.write_all(&data)?;
        }
        out.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Reads one chunk through the backend, verifying the recorded length.
    fn read_chunk(backend: &dyn ChunkBackend, edge: &ChunkRef) -> Result<Bytes, DedupError> {
        let data = backend.read(&edge.key).ok_or_else(|| DedupError::Backend {
            op: "read",
            key: edge.key.to_string(),
        })?;
        if data.len() as u64 != edge.length {
            return Err(DedupError::ChunkSizeMismatch {
                key: edge.key.to_string(),
                expected: edge.length,
                actual: data.len() as u64,
            });
        }
        Ok(data)
    }

    fn metadata_scoped(
        &self,
        container: Option<&str>,
        name: &str,
    ) -> Result<Option<ObjectMeta>, DedupError> {
        let (container, name) = self.sanitize_scope(container, name)?;
        self.index.lock().object_metadata(container.as_deref(), &name)
    }

    fn exists_scoped(&self, container: Option<&str>, name: &str) -> Result<bool, DedupError> {
        let (container, name) = self.sanitize_scope(container, name)?;
        self.index.lock().object_exists(container.as_deref(), &name)
    }

    fn delete_scoped(
        &self,
        container: Option<&str>,
        name: &str,
        backend: &dyn ChunkBackend,
    ) -> Result<bool, DedupError> {
        let (container, name) = self.sanitize_scope(container, name)?;
        let mut index = self.index.lock();
        Self::delete_locked(index.as_mut(), container.as_deref(), &name, backend)
    }

    /// Removes an object's index state, then best-effort deletes the
    /// external bytes of every key that dropped to zero references.
    fn delete_locked(
        index: &mut dyn ChunkIndex,
        container: Option<&str>,
        name: &str,
        backend: &dyn ChunkBackend,
    ) -> Result<bool, DedupError> {
        match index.remove_object(container, name)? {
            None => Ok(false),
            Some(zeroed) => {
                for key in &zeroed {
                    if !backend.delete(key) {
                        warn!(key = %key, "delete callback failed; external bytes orphaned");
                    }
                }
                debug!(object = name, released = zeroed.len(), "deleted object");
                Ok(true)
            }
        }
    }

    /// The garbage-collect compensation path for a failed store: roll the
    /// object's edges back out of the index and best-effort delete whatever
    /// external bytes that left unreferenced. The index state is
    /// authoritative, so failures here are logged, never propagated.
    fn compensate(
        index: &mut dyn ChunkIndex,
        container: Option<&str>,
        name: &str,
        backend: &dyn ChunkBackend,
    ) {
        match index.remove_object(container, name) {
            Ok(Some(zeroed)) => {
                for key in zeroed {
                    if !backend.delete(&key) {
                        warn!(key = %key, "cleanup delete failed; external bytes orphaned");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(object = name, error = %e, "failed to roll back index after store failure");
            }
        }
    }
}

fn chunk_ref(chunk: &Chunk) -> ChunkRef {
    ChunkRef {
        key: chunk.key().clone(),
        ordinal: chunk.ordinal(),
        position: chunk.position(),
        length: chunk.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// In-memory chunk backend with programmable write failures.
    #[derive(Default)]
    struct MemoryBackend {
        chunks: RefCell<HashMap<String, Bytes>>,
        fail_write_at: RefCell<Option<usize>>,
        writes: RefCell<usize>,
    }

    impl MemoryBackend {
        fn fail_on_write(n: usize) -> Self {
            Self {
                fail_write_at: RefCell::new(Some(n)),
                ..Self::default()
            }
        }

        fn len(&self) -> usize {
            self.chunks.borrow().len()
        }
    }

    impl ChunkBackend for MemoryBackend {
        fn write(&self, chunk: &Chunk) -> bool {
            *self.writes.borrow_mut() += 1;
            if let Some(n) = *self.fail_write_at.borrow() {
                if *self.writes.borrow() == n {
                    return false;
                }
            }
            self.chunks
                .borrow_mut()
                .insert(chunk.key().to_string(), chunk.data().clone());
            true
        }

        fn read(&self, key: &ChunkKey) -> Option<Bytes> {
            self.chunks.borrow().get(key.as_str()).cloned()
        }

        fn delete(&self, key: &ChunkKey) -> bool {
            self.chunks.borrow_mut().remove(key.as_str()).is_some()
        }
    }

    fn options() -> StoreOptions {
        StoreOptions::new(ChunkConfig::new(128, 1024, 64, 1).unwrap())
    }

    fn pseudo_random(len: usize) -> Vec<u8> {
        let mut state: u64 = 0x243f6a8885a308d3;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                (state >> 56) as u8
            })
            .collect()
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("plain-name_1.bin").unwrap(), "plain-name_1.bin");
        assert_eq!(sanitize_name("  padded  ").unwrap(), "padded");
        assert_eq!(sanitize_name("a/b:c*d").unwrap(), "a_b_c_d");
        assert!(sanitize_name("   ").is_err());
    }

    #[test]
    fn test_create_rejects_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        DedupStore::create(&path, options()).unwrap();
        assert!(matches!(
            DedupStore::create(&path, options()),
            Err(DedupError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_open_missing_is_corrupt() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            DedupStore::open(&dir.path().join("missing.db")),
            Err(DedupError::Corrupt(_))
        ));
    }

    #[test]
    fn test_config_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        DedupStore::create(&path, options()).unwrap();

        let store = DedupStore::open(&path).unwrap();
        assert_eq!(store.config().min_chunk_size(), 128);
        assert_eq!(store.config().max_chunk_size(), 1024);
        assert!(!store.index_per_object());
    }

    #[test]
    fn test_store_retrieve_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = DedupStore::create(&dir.path().join("index.db"), options()).unwrap();
        let backend = MemoryBackend::default();

        let data = pseudo_random(10_000);
        let refs = store.store_object("obj", data.clone(), &backend).unwrap();
        assert!(!refs.is_empty());

        let restored = store.retrieve_object("obj", &backend).unwrap();
        assert_eq!(restored.as_ref(), data.as_slice());
    }

    #[test]
    fn test_store_conflict() {
        let dir = TempDir::new().unwrap();
        let store = DedupStore::create(&dir.path().join("index.db"), options()).unwrap();
        let backend = MemoryBackend::default();

        store.store_object("obj", vec![1u8; 500], &backend).unwrap();
        assert!(matches!(
            store.store_object("obj", vec![2u8; 500], &backend),
            Err(DedupError::ObjectExists(_))
        ));

        // Replace succeeds and wins.
        store
            .store_or_replace_object("obj", vec![2u8; 500], &backend)
            .unwrap();
        let restored = store.retrieve_object("obj", &backend).unwrap();
        assert_eq!(restored.as_ref(), &[2u8; 500][..]);
    }

    #[test]
    fn test_empty_object() {
        let dir = TempDir::new().unwrap();
        let store = DedupStore::create(&dir.path().join("index.db"), options()).unwrap();
        let backend = MemoryBackend::default();

        let refs = store.store_object("empty", Vec::new(), &backend).unwrap();
        assert!(refs.is_empty());
        assert!(store.object_exists("empty").unwrap());

        let restored = store.retrieve_object("empty", &backend).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_write_failure_compensates() {
        let dir = TempDir::new().unwrap();
        let store = DedupStore::create(&dir.path().join("index.db"), options()).unwrap();

        // Seed a first object so shared chunks have prior refcounts.
        let seed_backend = MemoryBackend::default();
        let data = pseudo_random(10_000);
        store.store_object("seed", data.clone(), &seed_backend).unwrap();
        let stats_before = store.stats().unwrap();

        // Store the same bytes under another name, failing the 3rd write.
        let backend = MemoryBackend::fail_on_write(3);
        let result = store.store_object("doomed", data, &backend);
        assert!(matches!(result, Err(DedupError::Backend { op: "write", .. })));

        assert!(!store.object_exists("doomed").unwrap());
        let stats_after = store.stats().unwrap();
        assert_eq!(stats_after.chunk_count, stats_before.chunk_count);
        assert_eq!(stats_after.physical_bytes, stats_before.physical_bytes);
        assert_eq!(stats_after.entry_count, stats_before.entry_count);
    }

    #[test]
    fn test_streaming_store_matches_buffered() {
        let dir = TempDir::new().unwrap();
        let store = DedupStore::create(&dir.path().join("index.db"), options()).unwrap();
        let backend = MemoryBackend::default();

        let data = pseudo_random(20_000);
        let buffered = store.store_object("a", data.clone(), &backend).unwrap();
        let streamed = store
            .store_object_stream(
                "b",
                std::io::Cursor::new(data.clone()),
                data.len() as u64,
                &backend,
            )
            .unwrap();

        let buffered_keys: Vec<_> = buffered.iter().map(|r| &r.key).collect();
        let streamed_keys: Vec<_> = streamed.iter().map(|r| &r.key).collect();
        assert_eq!(buffered_keys, streamed_keys);

        let restored = store.retrieve_object("b", &backend).unwrap();
        assert_eq!(restored.as_ref(), data.as_slice());
    }

    #[test]
    fn test_streaming_write_failure_compensates() {
        let dir = TempDir::new().unwrap();
        let store = DedupStore::create(&dir.path().join("index.db"), options()).unwrap();

        let backend = MemoryBackend::fail_on_write(2);
        let data = pseudo_random(20_000);
        let result = store.store_object_stream(
            "obj",
            std::io::Cursor::new(data.clone()),
            data.len() as u64,
            &backend,
        );
        assert!(result.is_err());
        assert!(!store.object_exists("obj").unwrap());
        assert_eq!(store.stats().unwrap().chunk_count, 0);
    }

    #[test]
    fn test_delete_releases_chunks() {
        let dir = TempDir::new().unwrap();
        let store = DedupStore::create(&dir.path().join("index.db"), options()).unwrap();
        let backend = MemoryBackend::default();

        let data = pseudo_random(10_000);
        store.store_object("obj", data, &backend).unwrap();
        assert!(backend.len() > 0);

        assert!(store.delete_object("obj", &backend).unwrap());
        assert!(!store.object_exists("obj").unwrap());
        assert_eq!(backend.len(), 0, "all external bytes must be released");

        assert!(!store.delete_object("obj", &backend).unwrap());
    }

    #[test]
    fn test_retrieve_missing_chunk_fails() {
        let dir = TempDir::new().unwrap();
        let store = DedupStore::create(&dir.path().join("index.db"), options()).unwrap();
        let backend = MemoryBackend::default();

        store
            .store_object("obj", pseudo_random(5_000), &backend)
            .unwrap();
        backend.chunks.borrow_mut().clear();

        assert!(matches!(
            store.retrieve_object("obj", &backend),
            Err(DedupError::Backend { op: "read", .. })
        ));
    }

    #[test]
    fn test_scope_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = DedupStore::create(&dir.path().join("index.db"), options()).unwrap();
        let backend = MemoryBackend::default();

        assert!(matches!(
            store.store_object_in("c", "obj", vec![0u8; 10], &backend),
            Err(DedupError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.list_containers(),
            Err(DedupError::Unsupported(_))
        ));
    }

    #[test]
    fn test_retrieve_stream_seeks_to_origin() {
        let dir = TempDir::new().unwrap();
        let store = DedupStore::create(&dir.path().join("index.db"), options()).unwrap();
        let backend = MemoryBackend::default();

        let data = pseudo_random(5_000);
        store.store_object("obj", data.clone(), &backend).unwrap();

        let mut out = std::io::Cursor::new(Vec::new());
        store
            .retrieve_object_stream("obj", &backend, &mut out)
            .unwrap();
        assert_eq!(out.position(), 0, "sink must be rewound to its origin");
        assert_eq!(out.into_inner(), data);
    }
}
