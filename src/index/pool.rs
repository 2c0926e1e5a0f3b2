//! Pool-plus-container index backend.
//!
//! The pool file holds the store configuration and the container registry;
//! every container owns a flat sub-index file (see
//! [`SqliteIndex`](super::SqliteIndex)) holding its objects, edges, and
//! chunks. Reference counts are scoped per container: the same chunk key
//! stored in two containers is two physical copies.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, warn};

use crate::chunk::ChunkKey;
use crate::error::DedupError;

use super::{ChunkIndex, ChunkRef, IndexStats, ObjectMeta, SqliteIndex};

const POOL_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS config (
    name  TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS containers (
    name           TEXT PRIMARY KEY,
    index_location TEXT NOT NULL
);
";

/// Pool chunk index: a registry of containers, each with its own sub-index.
pub(crate) struct PoolIndex {
    conn: Connection,
    /// Directory of the pool file; container sub-indexes are created here.
    dir: PathBuf,
    /// Sub-indexes opened so far, by container name.
    open_containers: HashMap<String, SqliteIndex>,
}

impl PoolIndex {
    /// Creates a new pool index file.
    pub fn create(path: &Path) -> Result<Self, DedupError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(POOL_SCHEMA)?;
        debug!(path = %path.display(), "created pool index");
        Ok(Self {
            conn,
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            open_containers: HashMap::new(),
        })
    }

    /// Opens an existing pool index file, verifying the schema.
    pub fn open(path: &Path) -> Result<Self, DedupError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DedupError::Corrupt(format!("cannot open index {}: {e}", path.display())))?;

        for table in ["config", "containers"] {
            let found: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .optional()?;
            if found.is_none() {
                return Err(DedupError::Corrupt(format!(
                    "pool index {} is missing table '{table}'",
                    path.display()
                )));
            }
        }

        Ok(Self {
            conn,
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            open_containers: HashMap::new(),
        })
    }

    fn location_of(&self, name: &str) -> Result<Option<PathBuf>, DedupError> {
        let location: Option<String> = self
            .conn
            .query_row(
                "SELECT index_location FROM containers WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(location.map(PathBuf::from))
    }

    /// Returns the sub-index of a registered container, opening it on first
    /// use.
    fn container(&mut self, name: &str) -> Result<&mut SqliteIndex, DedupError> {
        match self.open_containers.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let location: Option<String> = self
                    .conn
                    .query_row(
                        "SELECT index_location FROM containers WHERE name = ?1",
                        [name],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(location) = location else {
                    return Err(DedupError::ContainerNotFound(name.to_string()));
                };
                Ok(entry.insert(SqliteIndex::open(Path::new(&location))?))
            }
        }
    }

    /// Resolves the container argument; the pool shape has no unscoped
    /// objects.
    fn scoped(&mut self, container: Option<&str>) -> Result<&mut SqliteIndex, DedupError> {
        match container {
            Some(name) => self.container(name),
            None => Err(DedupError::Unsupported("pool index requires a container")),
        }
    }
}

impl ChunkIndex for PoolIndex {
    fn get_config(&mut self, key: &str) -> Result<Option<String>, DedupError> {
        let value = self
            .conn
            .query_row("SELECT value FROM config WHERE name = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put_config(&mut self, key: &str, value: &str) -> Result<(), DedupError> {
        self.conn.execute(
            "INSERT INTO config (name, value) VALUES (?1, ?2)
             ON CONFLICT (name) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn object_exists(&mut self, container: Option<&str>, name: &str) -> Result<bool, DedupError> {
        self.scoped(container)?.object_exists(None, name)
    }

    fn chunk_exists(
        &mut self,
        container: Option<&str>,
        key: &ChunkKey,
    ) -> Result<bool, DedupError> {
        self.scoped(container)?.chunk_exists(None, key)
    }

    fn add_object_chunks(
        &mut self,
        container: Option<&str>,
        name: &str,
        content_length: u64,
        chunks: &[ChunkRef],
    ) -> Result<(), DedupError> {
        self.scoped(container)?
            .add_object_chunks(None, name, content_length, chunks)
    }

    fn add_object_chunk(
        &mut self,
        container: Option<&str>,
        name: &str,
        content_length: u64,
        chunk: &ChunkRef,
    ) -> Result<(), DedupError> {
        self.scoped(container)?
            .add_object_chunk(None, name, content_length, chunk)
    }

    fn object_metadata(
        &mut self,
        container: Option<&str>,
        name: &str,
    ) -> Result<Option<ObjectMeta>, DedupError> {
        self.scoped(container)?.object_metadata(None, name)
    }

    fn remove_object(
        &mut self,
        container: Option<&str>,
        name: &str,
    ) -> Result<Option<Vec<ChunkKey>>, DedupError> {
        self.scoped(container)?.remove_object(None, name)
    }

    fn list_objects(&mut self, container: Option<&str>) -> Result<Vec<String>, DedupError> {
        self.scoped(container)?.list_objects(None)
    }

    fn stats(&mut self) -> Result<IndexStats, DedupError> {
        let names = self.list_containers()?;
        let mut total = IndexStats {
            entry_count: names.len() as u64,
            ..IndexStats::default()
        };
        for name in names {
            let stats = self.container(&name)?.stats()?;
            total.chunk_count += stats.chunk_count;
            total.logical_bytes += stats.logical_bytes;
            total.physical_bytes += stats.physical_bytes;
        }
        Ok(total)
    }

    fn backup(&mut self, dest: &Path) -> Result<(), DedupError> {
        // The pool file only; containers are backed up individually through
        // backup_container_index.
        let mut dst = Connection::open(dest)?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dst)?;
        backup.run_to_completion(128, Duration::from_millis(0), None)?;
        debug!(dest = %dest.display(), "backed up pool index");
        Ok(())
    }

    fn add_container(&mut self, name: &str) -> Result<(), DedupError> {
        if self.location_of(name)?.is_some() {
            return Err(DedupError::ContainerExists(name.to_string()));
        }
        let location = self.dir.join(format!("{name}.container.db"));
        let index = SqliteIndex::create(&location)?;
        self.conn.execute(
            "INSERT INTO containers (name, index_location) VALUES (?1, ?2)",
            params![name, location.to_string_lossy()],
        )?;
        self.open_containers.insert(name.to_string(), index);
        debug!(container = name, location = %location.display(), "added container");
        Ok(())
    }

    fn remove_container(&mut self, name: &str) -> Result<(), DedupError> {
        let Some(location) = self.location_of(name)? else {
            return Err(DedupError::ContainerNotFound(name.to_string()));
        };
        self.open_containers.remove(name);
        self.conn
            .execute("DELETE FROM containers WHERE name = ?1", [name])?;
        if let Err(e) = std::fs::remove_file(&location) {
            warn!(
                container = name,
                location = %location.display(),
                error = %e,
                "failed to remove container index file"
            );
        }
        debug!(container = name, "removed container");
        Ok(())
    }

    fn container_exists(&mut self, name: &str) -> Result<bool, DedupError> {
        Ok(self.location_of(name)?.is_some())
    }

    fn list_containers(&mut self) -> Result<Vec<String>, DedupError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name FROM containers ORDER BY name")?;
        let mut rows = stmt.query([])?;
        let mut names = Vec::new();
        while let Some(row) = rows.next()? {
            names.push(row.get(0)?);
        }
        Ok(names)
    }

    fn import_container_index(
        &mut self,
        name: &str,
        path: &Path,
        increment_refcount: bool,
    ) -> Result<(), DedupError> {
        if self.location_of(name)?.is_none() {
            self.add_container(name)?;
        }
        self.container(name)?.merge_from(path, increment_refcount)
    }

    fn backup_container_index(
        &mut self,
        src: &str,
        dest: &Path,
        new_name: Option<&str>,
        increment_refcount: bool,
    ) -> Result<(), DedupError> {
        let Some(src_location) = self.location_of(src)? else {
            return Err(DedupError::ContainerNotFound(src.to_string()));
        };
        if let Some(new_name) = new_name {
            if self.location_of(new_name)?.is_some() {
                return Err(DedupError::ContainerExists(new_name.to_string()));
            }
        }

        let mut copy = SqliteIndex::create(dest)?;
        copy.merge_from(&src_location, increment_refcount)?;

        if let Some(new_name) = new_name {
            self.conn.execute(
                "INSERT INTO containers (name, index_location) VALUES (?1, ?2)",
                params![new_name, dest.to_string_lossy()],
            )?;
            self.open_containers.insert(new_name.to_string(), copy);
            debug!(src, new_name, "registered container clone");
        }
        Ok(())
    }
}
