//! RocksDB storage infrastructure for the cell store.
//!
//! ```text
//! Storage ── DatabaseHandle(DB) ── cf "cells"  (encoded CellKey -> value)
//!                               └─ cf "meta"   (graph metadata, name dictionary)
//! ```
//!
//! Both column families share one LRU block cache sized by [`BlockCacheConfig`].

mod cf;
mod config;
mod handle;
mod storage;

pub use cf::{Cells, ColumnFamily, ColumnFamilyConfig, Meta, ALL_COLUMN_FAMILIES};
pub use config::BlockCacheConfig;
pub use handle::{DatabaseHandle, StorageMode, StorageOptions};
pub use storage::Storage;
