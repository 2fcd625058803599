//! Configuration types for RocksDB storage.

use serde::{Deserialize, Serialize};

/// Configuration for the RocksDB block cache shared by all column families.
///
/// See [RocksDB Block Cache Wiki](https://github.com/facebook/rocksdb/wiki/Block-Cache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockCacheConfig {
    /// Total block cache size in bytes. Default: 256MB.
    pub cache_size_bytes: usize,

    /// Block size for the `cells` column family. Default: 4KB.
    pub cells_block_size: usize,

    /// Block size for the `meta` column family. Default: 4KB.
    pub meta_block_size: usize,

    /// Whether to cache index and filter blocks in the block cache.
    pub cache_index_and_filter_blocks: bool,

    /// Whether to pin L0 filter and index blocks in cache.
    pub pin_l0_filter_and_index: bool,
}

impl Default for BlockCacheConfig {
    fn default() -> Self {
        Self {
            cache_size_bytes: 256 * 1024 * 1024,
            cells_block_size: 4 * 1024,
            meta_block_size: 4 * 1024,
            cache_index_and_filter_blocks: true,
            pin_l0_filter_and_index: true,
        }
    }
}

impl BlockCacheConfig {
    /// Create config with specified cache size, using defaults for other settings.
    pub fn with_cache_size(cache_size_bytes: usize) -> Self {
        Self {
            cache_size_bytes,
            ..Default::default()
        }
    }

    pub(crate) fn block_options(&self, cache: &rocksdb::Cache, block_size: usize) -> rocksdb::BlockBasedOptions {
        let mut options = rocksdb::BlockBasedOptions::default();
        options.set_block_cache(cache);
        options.set_block_size(block_size);
        options.set_cache_index_and_filter_blocks(self.cache_index_and_filter_blocks);
        options.set_pin_l0_filter_and_index_blocks_in_cache(self.pin_l0_filter_and_index);
        options
    }
}
