//! Column family definitions.
//!
//! `cells` holds every graph cell under its order-preserving key; `meta` holds
//! graph metadata (schema version, serializer and substitution ids, the name
//! dictionary).

use rocksdb::{Cache, ColumnFamilyDescriptor, Options};

use super::config::BlockCacheConfig;

/// Base marker trait: single source of truth for the CF name.
pub trait ColumnFamily {
    const CF_NAME: &'static str;
}

/// RocksDB options for a column family, sharing the block cache.
pub trait ColumnFamilyConfig: ColumnFamily {
    fn cf_options(cache: &Cache, config: &BlockCacheConfig) -> Options;

    fn descriptor(cache: &Cache, config: &BlockCacheConfig) -> ColumnFamilyDescriptor {
        ColumnFamilyDescriptor::new(Self::CF_NAME, Self::cf_options(cache, config))
    }
}

pub struct Cells;

impl ColumnFamily for Cells {
    const CF_NAME: &'static str = "cells";
}

impl ColumnFamilyConfig for Cells {
    fn cf_options(cache: &Cache, config: &BlockCacheConfig) -> Options {
        let mut options = Options::default();
        options.set_block_based_table_factory(&config.block_options(cache, config.cells_block_size));
        options.set_compression_type(rocksdb::DBCompressionType::Lz4);
        options
    }
}

pub struct Meta;

impl ColumnFamily for Meta {
    const CF_NAME: &'static str = "meta";
}

impl ColumnFamilyConfig for Meta {
    fn cf_options(cache: &Cache, config: &BlockCacheConfig) -> Options {
        let mut options = Options::default();
        options.set_block_based_table_factory(&config.block_options(cache, config.meta_block_size));
        options
    }
}

pub const ALL_COLUMN_FAMILIES: &[&str] = &[Cells::CF_NAME, Meta::CF_NAME];

pub fn cf_descriptors(cache: &Cache, config: &BlockCacheConfig) -> Vec<ColumnFamilyDescriptor> {
    vec![
        Cells::descriptor(cache, config),
        Meta::descriptor(cache, config),
    ]
}
