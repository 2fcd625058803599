//! RocksDB storage: database opening, access modes and the shared block cache.

use std::path::{Path, PathBuf};

use anyhow::Result;
use rocksdb::{Options, DB};

use super::cf::{cf_descriptors, ALL_COLUMN_FAMILIES};
use super::config::BlockCacheConfig;
use super::handle::{DatabaseHandle, StorageMode, StorageOptions};

/// An on-disk cell database with the `cells` and `meta` column families.
///
/// ```ignore
/// let mut storage = Storage::readwrite(path);
/// storage.ready()?;
/// let db = storage.db()?;
/// ```
pub struct Storage {
    db_path: PathBuf,
    db_options: Options,
    db: Option<DatabaseHandle>,
    mode: StorageMode,
    block_cache: Option<rocksdb::Cache>,
    block_cache_config: BlockCacheConfig,
}

impl Storage {
    fn with_mode(db_path: &Path, db_options: Options, mode: StorageMode) -> Self {
        Self {
            db_path: PathBuf::from(db_path),
            db_options,
            db: None,
            mode,
            block_cache: None,
            block_cache_config: BlockCacheConfig::default(),
        }
    }

    /// Multiple read-only instances can open the same database.
    pub fn readonly(db_path: &Path) -> Self {
        Self::with_mode(db_path, StorageOptions::default_for_readonly(), StorageMode::ReadOnly)
    }

    /// Only one read-write instance can open a database at a time.
    pub fn readwrite(db_path: &Path) -> Self {
        Self::with_mode(db_path, StorageOptions::default_for_readwrite(), StorageMode::ReadWrite)
    }

    pub fn readwrite_with_options(db_path: &Path, db_options: Options) -> Self {
        Self::with_mode(db_path, db_options, StorageMode::ReadWrite)
    }

    /// Read replica of `primary_path`; `secondary_path` holds its own MANIFEST.
    pub fn secondary(primary_path: &Path, secondary_path: &Path) -> Self {
        Self::with_mode(
            primary_path,
            StorageOptions::default_for_secondary(),
            StorageMode::Secondary {
                secondary_path: PathBuf::from(secondary_path),
            },
        )
    }

    pub fn open(db_path: &Path, mode: StorageMode) -> Self {
        match mode {
            StorageMode::ReadOnly => Self::readonly(db_path),
            StorageMode::ReadWrite => Self::readwrite(db_path),
            StorageMode::Secondary { secondary_path } => Self::secondary(db_path, &secondary_path),
        }
    }

    /// Must be called before `ready()` to take effect.
    pub fn with_block_cache_config(mut self, config: BlockCacheConfig) -> Self {
        self.block_cache_config = config;
        self
    }

    /// Validate the path, create the block cache and open the database.
    #[tracing::instrument(skip(self), fields(path = ?self.db_path))]
    pub fn ready(&mut self) -> Result<()> {
        if self.db.is_some() {
            return Ok(());
        }

        match self.db_path.try_exists() {
            Err(e) => return Err(e.into()),
            Ok(true) => {
                if self.db_path.is_file() {
                    return Err(anyhow::anyhow!("Path is a file: {}", self.db_path.display()));
                }
                if self.db_path.is_symlink() {
                    return Err(anyhow::anyhow!("Path is a symlink: {}", self.db_path.display()));
                }
            }
            Ok(false) => {}
        }

        let cache = rocksdb::Cache::new_lru_cache(self.block_cache_config.cache_size_bytes);
        tracing::info!(
            cache_mb = self.block_cache_config.cache_size_bytes / (1024 * 1024),
            "[storage] Created block cache"
        );
        let descriptors = cf_descriptors(&cache, &self.block_cache_config);
        self.block_cache = Some(cache);

        let handle = match &self.mode {
            StorageMode::ReadOnly => DatabaseHandle::ReadOnly(DB::open_cf_descriptors_read_only(
                &self.db_options,
                &self.db_path,
                descriptors,
                false,
            )?),
            StorageMode::ReadWrite => DatabaseHandle::ReadWrite(DB::open_cf_descriptors(
                &self.db_options,
                &self.db_path,
                descriptors,
            )?),
            StorageMode::Secondary { secondary_path } => {
                DatabaseHandle::Secondary(DB::open_cf_descriptors_as_secondary(
                    &self.db_options,
                    &self.db_path,
                    secondary_path,
                    descriptors,
                )?)
            }
        };
        self.db = Some(handle);

        tracing::info!(mode = ?self.mode, "[storage] Ready");
        Ok(())
    }

    pub fn db(&self) -> Result<&DB> {
        self.db
            .as_ref()
            .map(DatabaseHandle::db)
            .ok_or_else(|| anyhow::anyhow!("[storage] Not ready"))
    }

    pub fn is_read_write(&self) -> bool {
        self.db.as_ref().map(|h| h.is_read_write()).unwrap_or(false)
    }

    pub fn is_secondary(&self) -> bool {
        matches!(self.mode, StorageMode::Secondary { .. })
    }

    /// Sync a secondary with the primary's MANIFEST and WAL.
    pub fn try_catch_up_with_primary(&self) -> Result<()> {
        match &self.db {
            Some(handle) if handle.is_secondary() => {
                handle.db().try_catch_up_with_primary()?;
                Ok(())
            }
            _ => Err(anyhow::anyhow!(
                "[storage] try_catch_up_with_primary only works for secondary instances"
            )),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn mode(&self) -> &StorageMode {
        &self.mode
    }

    pub fn column_families(&self) -> &'static [&'static str] {
        ALL_COLUMN_FAMILIES
    }

    pub fn close(&mut self) -> Result<()> {
        if self.db.take().is_none() {
            return Err(anyhow::anyhow!("[storage] Storage is not ready"));
        }
        self.block_cache = None;
        Ok(())
    }
}
