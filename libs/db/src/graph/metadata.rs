//! Graph metadata: schema version and encoding identities, checked on open.

use crate::backend::Backend;
use crate::codec::names::NAMES_METADATA_PREFIX;
use crate::error::{Error, Result};

pub const SCHEMA_VERSION: &str = "1";

pub const SCHEMA_VERSION_KEY: &str = "schema_version";
pub const SERIALIZER_KEY: &str = "serializer";
pub const NAME_SUBSTITUTION_KEY: &str = "name_substitution";
/// Upper bound of the arrival sequences reserved by cell writers.
pub const WRITE_SEQUENCE_KEY: &str = "write_sequence";

/// Human-readable summary of a graph's metadata namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphMetadata {
    /// Every non-dictionary entry, ordered by key.
    pub entries: Vec<(String, String)>,
    /// Number of persisted name dictionary entries.
    pub name_count: usize,
}

impl GraphMetadata {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Write the expected entries into an empty namespace, or verify existing ones.
///
/// A disagreement is fatal: decoding cells with the wrong serializer or
/// dictionary would silently misread them.
pub(crate) fn validate_or_initialize<B: Backend>(backend: &B) -> Result<()> {
    let mut expected = vec![(SCHEMA_VERSION_KEY, SCHEMA_VERSION)];
    expected.extend(backend.identity());

    let mut missing = Vec::new();
    for (key, value) in expected {
        match backend.get_metadata(key)? {
            Some(stored) if stored == value.as_bytes() => {}
            Some(stored) => {
                return Err(Error::VersionMismatch {
                    key: key.to_string(),
                    stored: String::from_utf8_lossy(&stored).into_owned(),
                    expected: value.to_string(),
                })
            }
            None => missing.push((key.to_string(), value.as_bytes().to_vec())),
        }
    }

    if !missing.is_empty() {
        tracing::info!(
            backend = backend.name(),
            entries = missing.len(),
            "[graph] Initialising graph metadata"
        );
        backend.put_metadata(&missing)?;
    }
    Ok(())
}

pub(crate) fn read<B: Backend>(backend: &B) -> Result<GraphMetadata> {
    let mut entries = Vec::new();
    let mut name_count = 0;
    for (key, value) in backend.metadata_entries("")? {
        if key.starts_with(NAMES_METADATA_PREFIX) {
            name_count += 1;
        } else {
            entries.push((key, String::from_utf8_lossy(&value).into_owned()));
        }
    }
    Ok(GraphMetadata {
        entries,
        name_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn test_initialise_then_validate() {
        let backend = MemoryBackend::new();
        validate_or_initialize(&backend).unwrap();
        validate_or_initialize(&backend).unwrap();
        let meta = read(&backend).unwrap();
        assert_eq!(meta.get(SCHEMA_VERSION_KEY), Some(SCHEMA_VERSION));
        assert_eq!(meta.name_count, 0);
    }

    #[test]
    fn test_schema_version_mismatch() {
        let backend = MemoryBackend::new();
        backend
            .put_metadata(&[(SCHEMA_VERSION_KEY.to_string(), b"0".to_vec())])
            .unwrap();
        match validate_or_initialize(&backend) {
            Err(Error::VersionMismatch { key, stored, expected }) => {
                assert_eq!(key, SCHEMA_VERSION_KEY);
                assert_eq!(stored, "0");
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }
}
