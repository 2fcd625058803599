use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use anyhow::{anyhow, Result};

use super::key::{decode_row, partial_row_prefix, row_prefix, row_upper_bound, Cell, CellKey};
use super::CellStore;

/// Process-local cell store ordered exactly like the RocksDB one.
#[derive(Default)]
pub struct MemoryCellStore {
    cells: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    meta: RwLock<BTreeMap<String, Vec<u8>>>,
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("memory cell store lock poisoned")
}

impl MemoryCellStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.read().map(|c| c.len()).unwrap_or(0)
    }

    fn collect_from(
        cells: &BTreeMap<Vec<u8>, Vec<u8>>,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<Cell>> {
        cells
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| {
                Ok(Cell {
                    key: CellKey::decode(k)?,
                    value: v.clone(),
                })
            })
            .collect()
    }
}

impl CellStore for MemoryCellStore {
    fn put_cells(&self, cells: &[Cell]) -> Result<()> {
        let mut map = self.cells.write().map_err(poisoned)?;
        for cell in cells {
            map.insert(cell.key.encode(), cell.value.clone());
        }
        Ok(())
    }

    fn scan_row(&self, row: &[u8]) -> Result<Vec<Cell>> {
        let map = self.cells.read().map_err(poisoned)?;
        Self::collect_from(&map, &row_prefix(row), usize::MAX)
    }

    fn scan_prefix(&self, partial_row: &[u8], limit: usize) -> Result<Vec<Cell>> {
        let map = self.cells.read().map_err(poisoned)?;
        Self::collect_from(&map, &partial_row_prefix(partial_row), limit)
    }

    fn row_keys_with_prefix(&self, partial_row: &[u8]) -> Result<Vec<Vec<u8>>> {
        let map = self.cells.read().map_err(poisoned)?;
        let prefix = partial_row_prefix(partial_row);
        let mut rows = Vec::new();
        let mut from = prefix.clone();
        loop {
            let next = map
                .range::<[u8], _>((Bound::Included(from.as_slice()), Bound::Unbounded))
                .next()
                .map(|(key, _)| key);
            let Some(key) = next.filter(|key| key.starts_with(&prefix)) else {
                break;
            };
            let row = decode_row(key)?;
            from = row_upper_bound(&row);
            rows.push(row);
        }
        Ok(rows)
    }

    fn delete_row(&self, row: &[u8]) -> Result<()> {
        let mut map = self.cells.write().map_err(poisoned)?;
        let prefix = row_prefix(row);
        let doomed: Vec<Vec<u8>> = map
            .range::<[u8], _>((Bound::Included(prefix.as_slice()), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            map.remove(&key);
        }
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.meta.read().map_err(poisoned)?.get(key).cloned())
    }

    fn put_meta(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        let mut meta = self.meta.write().map_err(poisoned)?;
        for (key, value) in entries {
            meta.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn meta_entries(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let meta = self.meta.read().map_err(poisoned)?;
        Ok(meta
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
