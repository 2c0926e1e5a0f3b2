//! deduprs CLI - thin command-line wrapper around the library.
//!
//! Provides commands for:
//! - Creating and inspecting an index
//! - Storing, retrieving, and deleting objects
//! - Listing objects and containers
//!
//! Chunk bytes live in a plain filesystem directory selected with
//! `--chunks`; the index is a SQLite file selected with `--index`. Exit
//! code is 0 on success and non-zero on failure.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use deduprs::{Chunk, ChunkBackend, ChunkConfig, ChunkKey, DedupStore, StoreOptions};
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Content-addressed deduplication store CLI.
#[derive(Parser)]
#[command(name = "deduprs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Index file path
    #[arg(short, long, default_value = "dedup-index.db")]
    index: PathBuf,

    /// Directory holding chunk bytes
    #[arg(short, long, default_value = "chunks")]
    chunks: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new index
    Create {
        /// Minimum chunk size in bytes (multiple of 64, at least 128)
        #[arg(long, default_value_t = deduprs::DEFAULT_MIN_CHUNK_SIZE)]
        min_chunk_size: usize,

        /// Maximum chunk size in bytes (multiple of 64, at least 8x min)
        #[arg(long, default_value_t = deduprs::DEFAULT_MAX_CHUNK_SIZE)]
        max_chunk_size: usize,

        /// Window shift per step
        #[arg(long, default_value_t = deduprs::DEFAULT_SHIFT_COUNT)]
        shift_count: usize,

        /// Leading zero digest bytes that define a boundary (1-8)
        #[arg(long, default_value_t = deduprs::DEFAULT_BOUNDARY_CHECK_BYTES)]
        boundary_check_bytes: usize,

        /// Use one sub-index per container (pool mode)
        #[arg(long)]
        index_per_object: bool,
    },

    /// Store a file as an object
    Store {
        /// Object name
        name: String,

        /// File to store
        file: PathBuf,

        /// Container name (pool mode; created if absent)
        #[arg(long)]
        container: Option<String>,

        /// Replace the object if it already exists
        #[arg(long)]
        replace: bool,
    },

    /// Retrieve an object
    Retrieve {
        /// Object name
        name: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Container name (pool mode)
        #[arg(long)]
        container: Option<String>,
    },

    /// Delete an object
    Delete {
        /// Object name
        name: String,

        /// Container name (pool mode)
        #[arg(long)]
        container: Option<String>,
    },

    /// List objects (or containers)
    List {
        /// Container name (pool mode)
        #[arg(long)]
        container: Option<String>,

        /// List containers instead of objects
        #[arg(long)]
        containers: bool,
    },

    /// Check whether an object exists (exit code 1 when absent)
    Exists {
        /// Object name
        name: String,

        /// Container name (pool mode)
        #[arg(long)]
        container: Option<String>,
    },

    /// Show index statistics
    Stats,
}

/// Filesystem chunk store: one file per chunk, named by its key.
///
/// Standard base64 contains `/` and `+`, which are hostile to file names;
/// they map to `_` and `-`. The mapping is deterministic and collision-free
/// within the base64 alphabet.
struct DirBackend {
    dir: PathBuf,
}

impl DirBackend {
    fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create chunk directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, key: &ChunkKey) -> PathBuf {
        let file_name: String = key
            .as_str()
            .chars()
            .map(|c| match c {
                '/' => '_',
                '+' => '-',
                other => other,
            })
            .collect();
        self.dir.join(file_name)
    }
}

impl ChunkBackend for DirBackend {
    fn write(&self, chunk: &Chunk) -> bool {
        match fs::write(self.path_for(chunk.key()), chunk.data()) {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %chunk.key(), error = %e, "chunk write failed");
                false
            }
        }
    }

    fn read(&self, key: &ChunkKey) -> Option<Bytes> {
        fs::read(self.path_for(key)).ok().map(Bytes::from)
    }

    fn delete(&self, key: &ChunkKey) -> bool {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "chunk delete failed");
                false
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")?;

    match cli.command {
        Commands::Create {
            min_chunk_size,
            max_chunk_size,
            shift_count,
            boundary_check_bytes,
            index_per_object,
        } => {
            let chunking = ChunkConfig::new(
                min_chunk_size,
                max_chunk_size,
                shift_count,
                boundary_check_bytes,
            )?;
            let options = StoreOptions::new(chunking).with_index_per_object(index_per_object);
            DedupStore::create(&cli.index, options)?;
            println!("Created index at {}", cli.index.display());
            Ok(())
        }

        Commands::Store {
            name,
            file,
            container,
            replace,
        } => {
            let store = DedupStore::open(&cli.index)?;
            let backend = DirBackend::new(&cli.chunks)?;
            let data =
                fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let size = data.len();

            if let Some(c) = container.as_deref() {
                if !store.container_exists(c)? {
                    store.add_container(c)?;
                }
            }

            let refs = match (container.as_deref(), replace) {
                (None, false) => store.store_object(&name, data, &backend)?,
                (None, true) => store.store_or_replace_object(&name, data, &backend)?,
                (Some(c), false) => store.store_object_in(c, &name, data, &backend)?,
                (Some(c), true) => store.store_or_replace_object_in(c, &name, data, &backend)?,
            };
            println!("Stored {} ({} bytes, {} chunks)", name, size, refs.len());
            Ok(())
        }

        Commands::Retrieve {
            name,
            output,
            container,
        } => {
            let store = DedupStore::open(&cli.index)?;
            let backend = DirBackend::new(&cli.chunks)?;
            let data = match container.as_deref() {
                None => store.retrieve_object(&name, &backend)?,
                Some(c) => store.retrieve_object_in(c, &name, &backend)?,
            };
            match output {
                Some(path) => {
                    fs::write(&path, &data)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Retrieved {} ({} bytes) to {}", name, data.len(), path.display());
                }
                None => std::io::stdout().write_all(&data)?,
            }
            Ok(())
        }

        Commands::Delete { name, container } => {
            let store = DedupStore::open(&cli.index)?;
            let backend = DirBackend::new(&cli.chunks)?;
            let deleted = match container.as_deref() {
                None => store.delete_object(&name, &backend)?,
                Some(c) => store.delete_object_in(c, &name, &backend)?,
            };
            if !deleted {
                bail!("object not found: {name}");
            }
            println!("Deleted {name}");
            Ok(())
        }

        Commands::List {
            container,
            containers,
        } => {
            let store = DedupStore::open(&cli.index)?;
            let names = if containers {
                store.list_containers()?
            } else {
                match container.as_deref() {
                    None => store.list_objects()?,
                    Some(c) => store.list_objects_in(c)?,
                }
            };
            for name in names {
                println!("{name}");
            }
            Ok(())
        }

        Commands::Exists { name, container } => {
            let store = DedupStore::open(&cli.index)?;
            let exists = match container.as_deref() {
                None => store.object_exists(&name)?,
                Some(c) => store.object_exists_in(c, &name)?,
            };
            println!("{exists}");
            if !exists {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Stats => {
            let store = DedupStore::open(&cli.index)?;
            let stats = store.stats()?;
            let entries = if store.index_per_object() {
                "Containers"
            } else {
                "Objects"
            };
            println!("{entries}: {}", stats.entry_count);
            println!("Chunks: {}", stats.chunk_count);
            println!("Logical bytes: {}", stats.logical_bytes);
            println!("Physical bytes: {}", stats.physical_bytes);
            println!("Dedup ratio: {:.2}", stats.ratio());
            Ok(())
        }
    }
}
