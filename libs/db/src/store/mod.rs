//! Sorted cell stores.
//!
//! A [`CellStore`] is the thin adapter between the codec and a sorted key/value
//! substrate. Implementations hold cells under [`CellKey::encode`] order and a
//! small metadata namespace beside them.

mod key;
mod memory;
mod rocks;

pub use key::{decode_row, partial_row_prefix, row_prefix, row_upper_bound, Cell, CellKey};
pub use memory::MemoryCellStore;
pub use rocks::RocksCellStore;

use anyhow::Result;

pub trait CellStore: Send + Sync {
    /// Write cells atomically. A cell at an existing coordinate and timestamp replaces it.
    fn put_cells(&self, cells: &[Cell]) -> Result<()>;

    /// Every cell of `row` in key order.
    fn scan_row(&self, row: &[u8]) -> Result<Vec<Cell>>;

    /// `scan_row` for several rows; results are positional.
    fn batch_scan(&self, rows: &[Vec<u8>]) -> Result<Vec<Vec<Cell>>> {
        rows.iter().map(|row| self.scan_row(row)).collect()
    }

    /// Every cell of every row starting with `partial_row`, at most `limit` cells.
    fn scan_prefix(&self, partial_row: &[u8], limit: usize) -> Result<Vec<Cell>>;

    /// Distinct rows starting with `partial_row`, in order.
    fn row_keys_with_prefix(&self, partial_row: &[u8]) -> Result<Vec<Vec<u8>>>;

    fn delete_row(&self, row: &[u8]) -> Result<()>;

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put_meta(&self, entries: &[(String, Vec<u8>)]) -> Result<()>;

    /// Metadata entries whose key starts with `prefix`, ordered by key.
    fn meta_entries(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}

impl<S: CellStore + ?Sized> CellStore for std::sync::Arc<S> {
    fn put_cells(&self, cells: &[Cell]) -> Result<()> {
        (**self).put_cells(cells)
    }

    fn scan_row(&self, row: &[u8]) -> Result<Vec<Cell>> {
        (**self).scan_row(row)
    }

    fn batch_scan(&self, rows: &[Vec<u8>]) -> Result<Vec<Vec<Cell>>> {
        (**self).batch_scan(rows)
    }

    fn scan_prefix(&self, partial_row: &[u8], limit: usize) -> Result<Vec<Cell>> {
        (**self).scan_prefix(partial_row, limit)
    }

    fn row_keys_with_prefix(&self, partial_row: &[u8]) -> Result<Vec<Vec<u8>>> {
        (**self).row_keys_with_prefix(partial_row)
    }

    fn delete_row(&self, row: &[u8]) -> Result<()> {
        (**self).delete_row(row)
    }

    fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get_meta(key)
    }

    fn put_meta(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        (**self).put_meta(entries)
    }

    fn meta_entries(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        (**self).meta_entries(prefix)
    }
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every `CellStore` must share.

    use super::*;
    use crate::clock::Timestamp;

    fn cell(row: &[u8], qualifier: &[u8], ts: u64, value: &[u8]) -> Cell {
        Cell {
            key: CellKey {
                row: row.to_vec(),
                family: b"P".to_vec(),
                qualifier: qualifier.to_vec(),
                visibility: Vec::new(),
                timestamp: Timestamp(ts),
            },
            value: value.to_vec(),
        }
    }

    pub(crate) fn check(store: &dyn CellStore) {
        store
            .put_cells(&[
                cell(b"Vv1", b"a", 1, b"old"),
                cell(b"Vv1", b"a", 2, b"new"),
                cell(b"Vv1\x00x", b"a", 1, b"nul"),
                cell(b"Vv10", b"b", 1, b"ten"),
                cell(b"Ee1", b"a", 1, b"edge"),
            ])
            .unwrap();

        let row = store.scan_row(b"Vv1").unwrap();
        assert_eq!(row.len(), 2);
        assert_eq!(row[0].value, b"new");
        assert_eq!(row[1].value, b"old");

        // Same coordinate and timestamp: last write wins.
        store.put_cells(&[cell(b"Vv1", b"a", 2, b"newer")]).unwrap();
        assert_eq!(store.scan_row(b"Vv1").unwrap()[0].value, b"newer");

        assert_eq!(
            store.row_keys_with_prefix(b"V").unwrap(),
            vec![b"Vv1".to_vec(), b"Vv1\x00x".to_vec(), b"Vv10".to_vec()]
        );
        assert_eq!(store.row_keys_with_prefix(b"E").unwrap(), vec![b"Ee1".to_vec()]);
        assert_eq!(store.scan_prefix(b"V", 3).unwrap().len(), 3);

        let batch = store
            .batch_scan(&[b"Ee1".to_vec(), b"missing".to_vec()])
            .unwrap();
        assert_eq!(batch[0].len(), 1);
        assert!(batch[1].is_empty());

        store.delete_row(b"Vv1").unwrap();
        assert!(store.scan_row(b"Vv1").unwrap().is_empty());
        assert_eq!(store.scan_row(b"Vv1\x00x").unwrap().len(), 1);
        assert_eq!(store.scan_row(b"Vv10").unwrap().len(), 1);

        assert_eq!(store.get_meta("version").unwrap(), None);
        store
            .put_meta(&[
                ("version".into(), b"1".to_vec()),
                ("names/02".into(), b"b".to_vec()),
                ("names/01".into(), b"a".to_vec()),
            ])
            .unwrap();
        assert_eq!(store.get_meta("version").unwrap(), Some(b"1".to_vec()));
        let names = store.meta_entries("names/").unwrap();
        assert_eq!(
            names,
            vec![
                ("names/01".to_string(), b"a".to_vec()),
                ("names/02".to_string(), b"b".to_vec()),
            ]
        );
    }
}
