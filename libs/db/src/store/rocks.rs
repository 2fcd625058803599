use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rocksdb::{Direction, IteratorMode, WriteBatch, DB};

use super::key::{decode_row, partial_row_prefix, row_prefix, row_upper_bound, Cell, CellKey};
use super::CellStore;
use crate::rocksdb::{BlockCacheConfig, Cells, ColumnFamily, Meta, Storage, StorageMode};

/// RocksDB-backed cell store: cells in the `cells` column family, metadata in `meta`.
pub struct RocksCellStore {
    storage: Storage,
}

impl RocksCellStore {
    pub fn open(path: &Path, mode: StorageMode, block_cache: BlockCacheConfig) -> Result<Self> {
        let mut storage = Storage::open(path, mode).with_block_cache_config(block_cache);
        storage.ready()?;
        Ok(Self { storage })
    }

    pub fn open_readwrite(path: &Path) -> Result<Self> {
        Self::open(path, StorageMode::ReadWrite, BlockCacheConfig::default())
    }

    pub fn open_readonly(path: &Path) -> Result<Self> {
        Self::open(path, StorageMode::ReadOnly, BlockCacheConfig::default())
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn db(&self) -> Result<&DB> {
        self.storage.db()
    }

    fn cf<C: ColumnFamily>(db: &DB) -> Result<&rocksdb::ColumnFamily> {
        db.cf_handle(C::CF_NAME)
            .ok_or_else(|| anyhow!("column family {} not found", C::CF_NAME))
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.storage.is_read_write() {
            Ok(())
        } else {
            Err(anyhow!("cell store opened without write access: {:?}", self.storage.mode()))
        }
    }

    fn scan_encoded(&self, prefix: &[u8], limit: usize) -> Result<Vec<Cell>> {
        let db = self.db()?;
        let cf = Self::cf::<Cells>(db)?;
        let mut out = Vec::new();
        for item in db.iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(prefix) || out.len() >= limit {
                break;
            }
            out.push(Cell {
                key: CellKey::decode(&key)?,
                value: value.into_vec(),
            });
        }
        Ok(out)
    }
}

impl CellStore for RocksCellStore {
    fn put_cells(&self, cells: &[Cell]) -> Result<()> {
        self.ensure_writable()?;
        let db = self.db()?;
        let cf = Self::cf::<Cells>(db)?;
        let mut batch = WriteBatch::default();
        for cell in cells {
            batch.put_cf(cf, cell.key.encode(), &cell.value);
        }
        db.write(batch).context("writing cell batch")
    }

    fn scan_row(&self, row: &[u8]) -> Result<Vec<Cell>> {
        self.scan_encoded(&row_prefix(row), usize::MAX)
    }

    /// One raw iterator re-seeked per row.
    fn batch_scan(&self, rows: &[Vec<u8>]) -> Result<Vec<Vec<Cell>>> {
        let db = self.db()?;
        let cf = Self::cf::<Cells>(db)?;
        let mut iter = db.raw_iterator_cf(cf);
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let prefix = row_prefix(row);
            let mut cells = Vec::new();
            iter.seek(&prefix);
            while let (Some(key), Some(value)) = (iter.key(), iter.value()) {
                if !key.starts_with(&prefix) {
                    break;
                }
                cells.push(Cell {
                    key: CellKey::decode(key)?,
                    value: value.to_vec(),
                });
                iter.next();
            }
            iter.status()?;
            out.push(cells);
        }
        Ok(out)
    }

    fn scan_prefix(&self, partial_row: &[u8], limit: usize) -> Result<Vec<Cell>> {
        self.scan_encoded(&partial_row_prefix(partial_row), limit)
    }

    fn row_keys_with_prefix(&self, partial_row: &[u8]) -> Result<Vec<Vec<u8>>> {
        let db = self.db()?;
        let cf = Self::cf::<Cells>(db)?;
        let prefix = partial_row_prefix(partial_row);
        let mut iter = db.raw_iterator_cf(cf);
        let mut rows = Vec::new();
        iter.seek(&prefix);
        while let Some(key) = iter.key() {
            if !key.starts_with(&prefix) {
                break;
            }
            let row = decode_row(key)?;
            iter.seek(row_upper_bound(&row));
            rows.push(row);
        }
        iter.status()?;
        Ok(rows)
    }

    fn delete_row(&self, row: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let db = self.db()?;
        let cf = Self::cf::<Cells>(db)?;
        let mut batch = WriteBatch::default();
        batch.delete_range_cf(cf, row_prefix(row), row_upper_bound(row));
        db.write(batch).context("deleting row")
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let db = self.db()?;
        let cf = Self::cf::<Meta>(db)?;
        Ok(db.get_cf(cf, key.as_bytes())?)
    }

    fn put_meta(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        self.ensure_writable()?;
        let db = self.db()?;
        let cf = Self::cf::<Meta>(db)?;
        let mut batch = WriteBatch::default();
        for (key, value) in entries {
            batch.put_cf(cf, key.as_bytes(), value);
        }
        db.write(batch).context("writing metadata")
    }

    fn meta_entries(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let db = self.db()?;
        let cf = Self::cf::<Meta>(db)?;
        let mut out = Vec::new();
        let mode = IteratorMode::From(prefix.as_bytes(), Direction::Forward);
        for item in db.iterator_cf(cf, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let key = String::from_utf8(key.into_vec()).context("metadata key is not utf-8")?;
            out.push((key, value.into_vec()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rocks_cell_store_contract() {
        let dir = TempDir::new().unwrap();
        let store = RocksCellStore::open_readwrite(dir.path()).unwrap();
        crate::store::contract::check(&store);
    }

    #[test]
    fn test_readonly_store_rejects_writes() {
        let dir = TempDir::new().unwrap();
        {
            let store = RocksCellStore::open_readwrite(dir.path()).unwrap();
            store.put_meta(&[("k".into(), b"v".to_vec())]).unwrap();
        }
        let store = RocksCellStore::open_readonly(dir.path()).unwrap();
        assert_eq!(store.get_meta("k").unwrap(), Some(b"v".to_vec()));
        assert!(store.put_meta(&[("k".into(), b"w".to_vec())]).is_err());
        assert!(store.delete_row(b"Vv1").is_err());
    }
}
