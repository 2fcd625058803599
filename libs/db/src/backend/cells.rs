use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;

use super::{with_retry, Backend};
use crate::codec::names::{NameEntry, NAMES_METADATA_PREFIX};
use crate::codec::{Codec, EncodedBatch};
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::id::{ElementId, ElementKey, ElementType, ExtendedRowKey};
use crate::mutation::{ExtendedDataMutation, Mutation};
use crate::graph::metadata::{NAME_SUBSTITUTION_KEY, SERIALIZER_KEY, WRITE_SEQUENCE_KEY};
use crate::store::{Cell, CellStore};
use crate::timeline::Timeline;

/// Sequences reserved per metadata write.
const SEQUENCE_BLOCK: u64 = 1024;

/// Arrival sequences handed out from a persisted reservation.
#[derive(Debug)]
struct SequenceBlock {
    next: u64,
    limit: u64,
}

/// Backend that encodes timelines into sorted cells of a [`CellStore`].
pub struct CellBackend<S: CellStore> {
    store: S,
    codec: Codec,
    retry: RetryConfig,
    /// Dictionary entries whose persistence failed; written with the next append.
    pending_names: DashMap<String, Vec<u8>>,
    sequence: Mutex<SequenceBlock>,
}

impl<S: CellStore> CellBackend<S> {
    /// Wraps `store` and prewarms the name dictionary from its metadata.
    pub fn new(store: S, codec: Codec, retry: RetryConfig) -> Result<Self> {
        let reserved = match store.get_meta(WRITE_SEQUENCE_KEY).map_err(Error::BackendIo)? {
            None => 0,
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| Error::integrity("malformed write sequence metadata"))?,
        };
        let backend = Self {
            store,
            codec,
            retry,
            pending_names: DashMap::new(),
            sequence: Mutex::new(SequenceBlock {
                next: reserved,
                limit: reserved,
            }),
        };
        backend.refresh_names()?;
        Ok(backend)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Reload the persisted name dictionary, e.g. after a writer added names.
    pub fn refresh_names(&self) -> Result<()> {
        let entries = self
            .store
            .meta_entries(NAMES_METADATA_PREFIX)
            .map_err(Error::BackendIo)?;
        self.codec.names().load_entries(&entries)
    }

    fn scan(&self, row: &[u8]) -> Result<Vec<Cell>> {
        self.store.scan_row(row).map_err(Error::BackendIo)
    }

    /// Decode, refreshing the dictionary once if a token is not known yet.
    fn decode_with_refresh<T>(&self, decode: impl Fn() -> Result<T>) -> Result<T> {
        match decode() {
            Err(Error::Integrity(reason)) if reason.starts_with("unknown name hash") => {
                tracing::debug!(reason = %reason, "[backend] Refreshing name dictionary");
                self.refresh_names()?;
                decode()
            }
            other => other,
        }
    }

    /// Reserve `count` consecutive arrival sequences; returns the first.
    ///
    /// Sequences only grow, across reopen too: a new block is persisted
    /// before any sequence from it is used.
    fn next_sequences(&self, count: usize) -> Result<u64> {
        let mut block = self.sequence.lock().unwrap_or_else(PoisonError::into_inner);
        let count = count as u64;
        if block.next + count > block.limit {
            let limit = block.next + count + SEQUENCE_BLOCK;
            let entry = [(WRITE_SEQUENCE_KEY.to_string(), limit.to_string().into_bytes())];
            with_retry(&self.retry, "put_meta", || self.store.put_meta(&entry))?;
            tracing::debug!(limit, "[backend] Reserved write sequences");
            block.limit = limit;
        }
        let first = block.next;
        block.next += count;
        Ok(first)
    }

    fn write(&self, batch: EncodedBatch) -> Result<()> {
        let mut names: Vec<NameEntry> = self
            .pending_names
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        names.extend(batch.name_entries);
        if !names.is_empty() {
            if let Err(e) = with_retry(&self.retry, "put_meta", || self.store.put_meta(&names)) {
                for (key, value) in names {
                    self.pending_names.insert(key, value);
                }
                return Err(e);
            }
            for (key, _) in &names {
                self.pending_names.remove(key);
            }
        }
        with_retry(&self.retry, "put_cells", || self.store.put_cells(&batch.cells))
    }
}

impl<S: CellStore + 'static> Backend for CellBackend<S> {
    fn name(&self) -> &'static str {
        "cells"
    }

    fn identity(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            (SERIALIZER_KEY, self.codec.serializer().id()),
            (NAME_SUBSTITUTION_KEY, self.codec.names().id()),
        ]
    }

    fn append(&self, key: &ElementKey, mutations: Vec<Mutation>) -> Result<()> {
        let first_seq = self.next_sequences(mutations.len())?;
        let mut batch = EncodedBatch::default();
        self.codec.encode_element(key, first_seq, &mutations, &mut batch)?;
        tracing::debug!(
            element = %key,
            mutations = mutations.len(),
            cells = batch.cells.len(),
            new_names = batch.name_entries.len(),
            "[backend] Writing element cells"
        );
        self.write(batch)
    }

    fn load(&self, key: &ElementKey) -> Result<Option<Timeline<Mutation>>> {
        let cells = self.scan(&Codec::element_row(key))?;
        if cells.is_empty() {
            return Ok(None);
        }
        self.decode_with_refresh(|| self.codec.decode_element(&cells))
            .map(Some)
    }

    fn load_many(&self, keys: &[ElementKey]) -> Result<Vec<Option<Timeline<Mutation>>>> {
        let rows: Vec<Vec<u8>> = keys.iter().map(Codec::element_row).collect();
        let scanned = self.store.batch_scan(&rows).map_err(Error::BackendIo)?;
        scanned
            .into_iter()
            .map(|cells| {
                if cells.is_empty() {
                    Ok(None)
                } else {
                    self.decode_with_refresh(|| self.codec.decode_element(&cells))
                        .map(Some)
                }
            })
            .collect()
    }

    fn purge(&self, key: &ElementKey) -> Result<()> {
        let extended = self
            .store
            .row_keys_with_prefix(&Codec::extended_row_prefix(key, None))
            .map_err(Error::BackendIo)?;
        for row in extended {
            with_retry(&self.retry, "delete_row", || self.store.delete_row(&row))?;
        }
        let row = Codec::element_row(key);
        with_retry(&self.retry, "delete_row", || self.store.delete_row(&row))
    }

    fn element_ids(&self, element_type: ElementType) -> Result<Vec<ElementId>> {
        self.store
            .row_keys_with_prefix(&[element_type.row_prefix()])
            .map_err(Error::BackendIo)?
            .iter()
            .map(|row| Codec::parse_element_row(row).map(|key| key.id))
            .collect()
    }

    fn append_row(&self, key: &ExtendedRowKey, mutations: Vec<ExtendedDataMutation>) -> Result<()> {
        let first_seq = self.next_sequences(mutations.len())?;
        let mut batch = EncodedBatch::default();
        self.codec.encode_extended(key, first_seq, &mutations, &mut batch)?;
        tracing::debug!(row = %key, cells = batch.cells.len(), "[backend] Writing extended data cells");
        self.write(batch)
    }

    fn load_row(&self, key: &ExtendedRowKey) -> Result<Option<Timeline<ExtendedDataMutation>>> {
        let cells = self.scan(&Codec::extended_row(key))?;
        if cells.is_empty() {
            return Ok(None);
        }
        self.decode_with_refresh(|| self.codec.decode_extended(&cells))
            .map(Some)
    }

    fn row_ids(&self, element: &ElementKey, table: &str) -> Result<Vec<String>> {
        self.store
            .row_keys_with_prefix(&Codec::extended_row_prefix(element, Some(table)))
            .map_err(Error::BackendIo)?
            .iter()
            .map(|row| Codec::parse_extended_row(row).map(|key| key.row_id))
            .collect()
    }

    fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.store.get_meta(key).map_err(Error::BackendIo)
    }

    fn put_metadata(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        with_retry(&self.retry, "put_meta", || self.store.put_meta(entries))
    }

    fn metadata_entries(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.store.meta_entries(prefix).map_err(Error::BackendIo)
    }
}
