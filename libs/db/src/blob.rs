//! Large-object store collaborator.
//!
//! String and byte values above the inline threshold are handed to a
//! [`LargeObjectStore`]; the property then holds a [`StreamingRef`].

use std::sync::Arc;

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use uuid::Uuid;

use crate::clock::Timestamp;
use crate::error::{Error, Result as CoreResult};
use crate::value::{StreamingRef, Value};

pub trait LargeObjectStore: Send + Sync {
    fn store(&self, bytes: &[u8], timestamp: Timestamp) -> Result<StreamingRef>;

    fn load(&self, reference: &StreamingRef) -> Result<Vec<u8>>;
}

#[derive(Debug, Default)]
pub struct InMemoryLargeObjectStore {
    objects: DashMap<String, Arc<[u8]>>,
}

impl InMemoryLargeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Replace stored bytes without touching the reference.
    #[cfg(test)]
    pub(crate) fn overwrite(&self, id: &str, bytes: &[u8]) {
        self.objects.insert(id.to_string(), Arc::from(bytes));
    }
}

impl LargeObjectStore for InMemoryLargeObjectStore {
    fn store(&self, bytes: &[u8], timestamp: Timestamp) -> Result<StreamingRef> {
        let id = Uuid::new_v4().to_string();
        self.objects.insert(id.clone(), Arc::from(bytes));
        Ok(StreamingRef {
            id,
            length: bytes.len() as u64,
            timestamp,
        })
    }

    fn load(&self, reference: &StreamingRef) -> Result<Vec<u8>> {
        self.objects
            .get(&reference.id)
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| anyhow!("large object {} not found", reference.id))
    }
}

/// Replace an oversized value with a reference to the large-object store.
pub(crate) fn spill(
    value: Value,
    threshold: usize,
    store: &dyn LargeObjectStore,
    timestamp: Timestamp,
) -> CoreResult<Value> {
    match value.spillable_len() {
        Some(len) if len > threshold => {}
        _ => return Ok(value),
    }
    let bytes = value.into_spill_bytes().unwrap_or_default();
    let reference = store.store(&bytes, timestamp).map_err(Error::BackendIo)?;
    tracing::debug!(id = %reference.id, length = reference.length, "[blob] Stored large value");
    Ok(Value::Stream(reference))
}

/// Load a referenced value, checking its declared length.
pub(crate) fn load_verified(
    store: &dyn LargeObjectStore,
    reference: &StreamingRef,
) -> CoreResult<Vec<u8>> {
    let bytes = store.load(reference).map_err(Error::BackendIo)?;
    if bytes.len() as u64 != reference.length {
        return Err(Error::integrity(format!(
            "large object {} declares {} bytes but {} were read",
            reference.id,
            reference.length,
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_and_non_spillable_values_stay_inline() {
        let store = InMemoryLargeObjectStore::new();
        let small = spill(Value::from("tiny"), 8, &store, Timestamp(1)).unwrap();
        assert_eq!(small, Value::from("tiny"));
        let int = spill(Value::Int(1 << 40), 0, &store, Timestamp(1)).unwrap();
        assert_eq!(int, Value::Int(1 << 40));
        assert!(store.is_empty());
    }

    #[test]
    fn test_large_value_spills_and_loads() {
        let store = InMemoryLargeObjectStore::new();
        let value = spill(Value::from("x".repeat(100)), 8, &store, Timestamp(7)).unwrap();
        let reference = value.as_stream().unwrap();
        assert_eq!(reference.length, 100);
        assert_eq!(reference.timestamp, Timestamp(7));
        assert_eq!(load_verified(&store, reference).unwrap(), "x".repeat(100).into_bytes());
    }

    #[test]
    fn test_length_mismatch_is_integrity_error() {
        let store = InMemoryLargeObjectStore::new();
        let value = spill(Value::Bytes(vec![1; 32]), 8, &store, Timestamp(1)).unwrap();
        let reference = value.as_stream().unwrap();
        store.overwrite(&reference.id, &[1; 31]);
        assert!(matches!(load_verified(&store, reference), Err(Error::Integrity(_))));
    }
}
