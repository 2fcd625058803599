//! Database handle types for RocksDB storage.
//!
//! - `DatabaseHandle`: the open DB tagged with the mode it was opened in
//! - `StorageMode`: how the database should be opened
//! - `StorageOptions`: default RocksDB options per access mode

use std::path::PathBuf;

use rocksdb::{Options, DB};

/// An open database tagged with its access mode.
pub enum DatabaseHandle {
    ReadOnly(DB),
    /// Writes go through `WriteBatch`; cell appends are idempotent so no transactions are needed.
    ReadWrite(DB),
    /// Follows a primary; refresh with `try_catch_up_with_primary`.
    Secondary(DB),
}

impl DatabaseHandle {
    pub fn db(&self) -> &DB {
        match self {
            DatabaseHandle::ReadOnly(db)
            | DatabaseHandle::ReadWrite(db)
            | DatabaseHandle::Secondary(db) => db,
        }
    }

    pub fn is_read_write(&self) -> bool {
        matches!(self, DatabaseHandle::ReadWrite(_))
    }

    pub fn is_secondary(&self) -> bool {
        matches!(self, DatabaseHandle::Secondary(_))
    }
}

/// Storage access mode configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    /// Multiple instances can open simultaneously.
    ReadOnly,
    /// Exclusive writer.
    ReadWrite,
    Secondary {
        /// Path for the secondary's MANIFEST (must differ from primary).
        secondary_path: PathBuf,
    },
}

/// Default RocksDB options factory for each storage mode.
pub struct StorageOptions;

impl StorageOptions {
    /// Creates the DB and missing column families; background jobs sized to the CPU count.
    pub fn default_for_readwrite() -> Options {
        let mut options = Options::default();
        options.set_error_if_exists(false);
        options.create_if_missing(true);
        options.create_missing_column_families(true);

        let num_cpus = std::thread::available_parallelism()
            .map(|p| p.get() as i32)
            .unwrap_or(4);
        options.increase_parallelism(num_cpus);
        options.set_max_background_jobs(num_cpus.min(8));

        options.set_write_buffer_size(64 * 1024 * 1024);
        options.set_max_write_buffer_number(4);
        options
    }

    /// DB and column families must already exist.
    pub fn default_for_readonly() -> Options {
        let mut options = Options::default();
        options.set_error_if_exists(false);
        options.create_if_missing(false);
        options.create_missing_column_families(false);
        options
    }

    /// Secondary instances must keep all file descriptors open.
    pub fn default_for_secondary() -> Options {
        let mut options = Self::default_for_readonly();
        options.set_max_open_files(-1);
        options
    }
}
