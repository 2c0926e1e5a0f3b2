//! Flat SQLite index backend.
//!
//! One database file holds the whole index: `config`, `objects`,
//! `object_map` (the object-to-chunk edges), and `chunks` (key, length,
//! refcount). The same schema backs the per-container sub-indexes of the
//! pool shape; a container's `config` table is simply left empty.

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::debug;

use crate::chunk::ChunkKey;
use crate::error::DedupError;

use super::{ChunkIndex, ChunkRef, IndexStats, ObjectMeta};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS config (
    name  TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS objects (
    name           TEXT PRIMARY KEY,
    content_length INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS object_map (
    object_name TEXT    NOT NULL,
    chunk_key   TEXT    NOT NULL,
    ordinal     INTEGER NOT NULL,
    position    INTEGER NOT NULL,
    length      INTEGER NOT NULL,
    PRIMARY KEY (object_name, ordinal)
);
CREATE TABLE IF NOT EXISTS chunks (
    key      TEXT PRIMARY KEY,
    length   INTEGER NOT NULL,
    refcount INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_object_map_chunk ON object_map (chunk_key);
";

/// Tables every index file must carry; their absence at open time means
/// the file is not an index.
const REQUIRED_TABLES: [&str; 4] = ["config", "objects", "object_map", "chunks"];

/// Flat chunk index backed by a single SQLite file.
pub(crate) struct SqliteIndex {
    conn: Connection,
}

impl SqliteIndex {
    /// Creates a new index file (or initializes an empty existing file).
    pub fn create(path: &Path) -> Result<Self, DedupError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "created index");
        Ok(Self { conn })
    }

    /// Opens an existing index file, verifying the schema.
    pub fn open(path: &Path) -> Result<Self, DedupError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DedupError::Corrupt(format!("cannot open index {}: {e}", path.display())))?;

        for table in REQUIRED_TABLES {
            let found: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .optional()?;
            if found.is_none() {
                return Err(DedupError::Corrupt(format!(
                    "index {} is missing table '{table}'",
                    path.display()
                )));
            }
        }

        Ok(Self { conn })
    }

    /// Merges another flat index file into this one.
    ///
    /// Object rows and edges are copied verbatim; a duplicate object name
    /// is a conflict and rolls the merge back. Chunk rows already present
    /// gain the source's refcount when `increment_refcount` is set and are
    /// left untouched otherwise; absent chunk rows are inserted with the
    /// source's refcount either way.
    pub fn merge_from(&mut self, source: &Path, increment_refcount: bool) -> Result<(), DedupError> {
        let src = Connection::open_with_flags(source, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| DedupError::Corrupt(format!("cannot open index {}: {e}", source.display())))?;

        let tx = self.conn.transaction()?;
        {
            let mut read_objects = src.prepare("SELECT name, content_length FROM objects")?;
            let mut rows = read_objects.query([])?;
            let mut insert_object =
                tx.prepare("INSERT INTO objects (name, content_length) VALUES (?1, ?2)")?;
            while let Some(row) = rows.next()? {
                let name: String = row.get(0)?;
                let length: i64 = row.get(1)?;
                let clash: Option<i64> = tx
                    .query_row("SELECT 1 FROM objects WHERE name = ?1", [&name], |r| r.get(0))
                    .optional()?;
                if clash.is_some() {
                    return Err(DedupError::ObjectExists(name));
                }
                insert_object.execute(params![name, length])?;
            }

            let mut read_edges = src.prepare(
                "SELECT object_name, chunk_key, ordinal, position, length FROM object_map",
            )?;
            let mut rows = read_edges.query([])?;
            let mut insert_edge = tx.prepare(
                "INSERT INTO object_map (object_name, chunk_key, ordinal, position, length)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            while let Some(row) = rows.next()? {
                insert_edge.execute(params![
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ])?;
            }

            let mut read_chunks = src.prepare("SELECT key, length, refcount FROM chunks")?;
            let mut rows = read_chunks.query([])?;
            let mut upsert_chunk = if increment_refcount {
                tx.prepare(
                    "INSERT INTO chunks (key, length, refcount) VALUES (?1, ?2, ?3)
                     ON CONFLICT (key) DO UPDATE SET refcount = refcount + excluded.refcount",
                )?
            } else {
                tx.prepare("INSERT OR IGNORE INTO chunks (key, length, refcount) VALUES (?1, ?2, ?3)")?
            };
            while let Some(row) = rows.next()? {
                upsert_chunk.execute(params![
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ])?;
            }
        }
        tx.commit()?;

        debug!(source = %source.display(), increment_refcount, "merged index");
        Ok(())
    }

    fn parse_key(encoded: &str) -> Result<ChunkKey, DedupError> {
        ChunkKey::parse(encoded)
            .ok_or_else(|| DedupError::Corrupt(format!("malformed chunk key in index: {encoded}")))
    }
}

/// The flat shape has no containers; any scoped call is a usage error.
fn no_container(container: Option<&str>) -> Result<(), DedupError> {
    match container {
        None => Ok(()),
        Some(_) => Err(DedupError::Unsupported("flat index has no containers")),
    }
}

impl ChunkIndex for SqliteIndex {
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
        no_container(container)?;
        let found: Option<i64> = self
            .conn
            .query_row("SELECT 1 FROM objects WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    fn chunk_exists(
        &mut self,
        container: Option<&str>,
        key: &ChunkKey,
    ) -> Result<bool, DedupError> {
        no_container(container)?;
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM chunks WHERE key = ?1",
                [key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn add_object_chunks(
        &mut self,
        container: Option<&str>,
        name: &str,
        content_length: u64,
        chunks: &[ChunkRef],
    ) -> Result<(), DedupError> {
        no_container(container)?;
        let tx = self.conn.transaction()?;
        {
            tx.execute(
                "INSERT INTO objects (name, content_length) VALUES (?1, ?2)",
                params![name, content_length as i64],
            )?;
            let mut insert_edge = tx.prepare_cached(
                "INSERT INTO object_map (object_name, chunk_key, ordinal, position, length)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut upsert_chunk = tx.prepare_cached(
                "INSERT INTO chunks (key, length, refcount) VALUES (?1, ?2, 1)
                 ON CONFLICT (key) DO UPDATE SET refcount = refcount + 1",
            )?;
            for chunk in chunks {
                insert_edge.execute(params![
                    name,
                    chunk.key.as_str(),
                    chunk.ordinal as i64,
                    chunk.position as i64,
                    chunk.length as i64,
                ])?;
                upsert_chunk.execute(params![chunk.key.as_str(), chunk.length as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn add_object_chunk(
        &mut self,
        container: Option<&str>,
        name: &str,
        content_length: u64,
        chunk: &ChunkRef,
    ) -> Result<(), DedupError> {
        no_container(container)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO objects (name, content_length) VALUES (?1, ?2)
             ON CONFLICT (name) DO NOTHING",
            params![name, content_length as i64],
        )?;
        tx.execute(
            "INSERT INTO object_map (object_name, chunk_key, ordinal, position, length)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                name,
                chunk.key.as_str(),
                chunk.ordinal as i64,
                chunk.position as i64,
                chunk.length as i64,
            ],
        )?;
        tx.execute(
            "INSERT INTO chunks (key, length, refcount) VALUES (?1, ?2, 1)
             ON CONFLICT (key) DO UPDATE SET refcount = refcount + 1",
            params![chunk.key.as_str(), chunk.length as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn object_metadata(
        &mut self,
        container: Option<&str>,
        name: &str,
    ) -> Result<Option<ObjectMeta>, DedupError> {
        no_container(container)?;
        let content_length: Option<i64> = self
            .conn
            .query_row(
                "SELECT content_length FROM objects WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        let Some(content_length) = content_length else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare_cached(
            "SELECT chunk_key, ordinal, position, length FROM object_map
             WHERE object_name = ?1 ORDER BY ordinal",
        )?;
        let mut rows = stmt.query([name])?;
        let mut chunks = Vec::new();
        while let Some(row) = rows.next()? {
            chunks.push(ChunkRef {
                key: Self::parse_key(&row.get::<_, String>(0)?)?,
                ordinal: row.get::<_, i64>(1)? as u32,
                position: row.get::<_, i64>(2)? as u64,
                length: row.get::<_, i64>(3)? as u64,
            });
        }

        Ok(Some(ObjectMeta {
            name: name.to_string(),
            content_length: content_length as u64,
            chunks,
        }))
    }

    fn remove_object(
        &mut self,
        container: Option<&str>,
        name: &str,
    ) -> Result<Option<Vec<ChunkKey>>, DedupError> {
        no_container(container)?;
        let tx = self.conn.transaction()?;

        let found: Option<i64> = tx
            .query_row("SELECT 1 FROM objects WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        if found.is_none() {
            return Ok(None);
        }

        // Decrement each referenced chunk once per edge; an object that
        // references the same key at several ordinals releases it that many
        // times.
        tx.execute(
            "UPDATE chunks SET refcount = refcount -
                 (SELECT COUNT(*) FROM object_map m
                  WHERE m.object_name = ?1 AND m.chunk_key = chunks.key)
             WHERE key IN (SELECT chunk_key FROM object_map WHERE object_name = ?1)",
            [name],
        )?;

        let mut zeroed = Vec::new();
        {
            let mut stmt = tx.prepare("SELECT key FROM chunks WHERE refcount <= 0")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                zeroed.push(Self::parse_key(&row.get::<_, String>(0)?)?);
            }
        }
        tx.execute("DELETE FROM chunks WHERE refcount <= 0", [])?;
        tx.execute("DELETE FROM object_map WHERE object_name = ?1", [name])?;
        tx.execute("DELETE FROM objects WHERE name = ?1", [name])?;
        tx.commit()?;

        debug!(object = name, zeroed = zeroed.len(), "removed object from index");
        Ok(Some(zeroed))
    }

    fn list_objects(&mut self, container: Option<&str>) -> Result<Vec<String>, DedupError> {
        no_container(container)?;
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name FROM objects ORDER BY name")?;
        let mut rows = stmt.query([])?;
        let mut names = Vec::new();
        while let Some(row) = rows.next()? {
            names.push(row.get(0)?);
        }
        Ok(names)
    }

    fn stats(&mut self) -> Result<IndexStats, DedupError> {
        let (entry_count, logical_bytes): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(content_length), 0) FROM objects",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let (chunk_count, physical_bytes): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(length), 0) FROM chunks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(IndexStats {
            entry_count: entry_count as u64,
            chunk_count: chunk_count as u64,
            logical_bytes: logical_bytes as u64,
            physical_bytes: physical_bytes as u64,
        })
    }

    fn backup(&mut self, dest: &Path) -> Result<(), DedupError> {
        let mut dst = Connection::open(dest)?;
        let backup = rusqlite::backup::Backup::new(&self.conn, &mut dst)?;
        backup.run_to_completion(128, Duration::from_millis(0), None)?;
        debug!(dest = %dest.display(), "backed up index");
        Ok(())
    }

    fn add_container(&mut self, _name: &str) -> Result<(), DedupError> {
        Err(DedupError::Unsupported("flat index has no containers"))
    }

    fn remove_container(&mut self, _name: &str) -> Result<(), DedupError> {
        Err(DedupError::Unsupported("flat index has no containers"))
    }

    fn container_exists(&mut self, _name: &str) -> Result<bool, DedupError> {
        Err(DedupError::Unsupported("flat index has no containers"))
    }

    fn list_containers(&mut self) -> Result<Vec<String>, DedupError> {
        Err(DedupError::Unsupported("flat index has no containers"))
    }

    fn import_container_index(
        &mut self,
        _name: &str,
        _path: &Path,
        _increment_refcount: bool,
    ) -> Result<(), DedupError> {
        Err(DedupError::Unsupported("flat index has no containers"))
    }

    fn backup_container_index(
        &mut self,
        _src: &str,
        _dest: &Path,
        _new_name: Option<&str>,
        _increment_refcount: bool,
    ) -> Result<(), DedupError> {
        Err(DedupError::Unsupported("flat index has no containers"))
    }
}
