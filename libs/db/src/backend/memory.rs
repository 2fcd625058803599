use dashmap::DashMap;

use super::Backend;
use crate::error::Result;
use crate::id::{ElementId, ElementKey, ElementType, ExtendedRowKey};
use crate::mutation::{ExtendedDataMutation, Mutation};
use crate::timeline::Timeline;

/// Process-local backend holding timelines directly.
///
/// Appends happen under the map's entry guard and copy the entry list only
/// while a reader still holds the previous snapshot.
#[derive(Default)]
pub struct MemoryBackend {
    elements: DashMap<ElementKey, Timeline<Mutation>>,
    rows: DashMap<ExtendedRowKey, Timeline<ExtendedDataMutation>>,
    metadata: DashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn append(&self, key: &ElementKey, mutations: Vec<Mutation>) -> Result<()> {
        self.elements.entry(key.clone()).or_default().extend(mutations);
        Ok(())
    }

    fn load(&self, key: &ElementKey) -> Result<Option<Timeline<Mutation>>> {
        Ok(self.elements.get(key).map(|t| t.value().clone()))
    }

    fn purge(&self, key: &ElementKey) -> Result<()> {
        self.elements.remove(key);
        self.rows.retain(|row, _| &row.element != key);
        Ok(())
    }

    fn element_ids(&self, element_type: ElementType) -> Result<Vec<ElementId>> {
        let mut ids: Vec<ElementId> = self
            .elements
            .iter()
            .filter(|e| e.key().element_type == element_type)
            .map(|e| e.key().id.clone())
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    fn append_row(&self, key: &ExtendedRowKey, mutations: Vec<ExtendedDataMutation>) -> Result<()> {
        self.rows.entry(key.clone()).or_default().extend(mutations);
        Ok(())
    }

    fn load_row(&self, key: &ExtendedRowKey) -> Result<Option<Timeline<ExtendedDataMutation>>> {
        Ok(self.rows.get(key).map(|t| t.value().clone()))
    }

    fn row_ids(&self, element: &ElementKey, table: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .rows
            .iter()
            .filter(|r| &r.key().element == element && r.key().table == table)
            .map(|r| r.key().row_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.metadata.get(key).map(|v| v.value().clone()))
    }

    fn put_metadata(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        for (key, value) in entries {
            self.metadata.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn metadata_entries(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut entries: Vec<(String, Vec<u8>)> = self
            .metadata
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::mutation::{AlterVisibility, ElementTimestamp};
    use crate::visibility::Visibility;

    fn touch(ts: u64) -> Mutation {
        Mutation::ElementTimestamp(ElementTimestamp {
            timestamp: Timestamp(ts),
            visibility: Visibility::empty(),
        })
    }

    #[test]
    fn test_snapshots_are_stable_across_appends() {
        let backend = MemoryBackend::new();
        let key = ElementKey::vertex("v1");
        backend
            .append(
                &key,
                vec![Mutation::AlterVisibility(AlterVisibility {
                    timestamp: Timestamp(1),
                    visibility: Visibility::empty(),
                    data: None,
                })],
            )
            .unwrap();
        let before = backend.load(&key).unwrap().unwrap();
        backend.append(&key, vec![touch(2)]).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(backend.load(&key).unwrap().unwrap().len(), 2);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let backend = std::sync::Arc::new(MemoryBackend::new());
        let key = ElementKey::vertex("v1");
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let backend = backend.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        backend.append(&key, vec![touch(t * 100 + i)]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(backend.load(&key).unwrap().unwrap().len(), 400);
    }

    #[test]
    fn test_purge_drops_extended_rows() {
        let backend = MemoryBackend::new();
        let v1 = ElementKey::vertex("v1");
        let v2 = ElementKey::vertex("v2");
        backend.append(&v1, vec![touch(1)]).unwrap();
        backend.append(&v2, vec![touch(1)]).unwrap();
        for element in [&v1, &v2] {
            let row = ExtendedRowKey::new(element.clone(), "t", "r1");
            backend.append_row(&row, vec![]).unwrap();
        }
        backend.purge(&v1).unwrap();
        assert!(backend.load(&v1).unwrap().is_none());
        assert!(backend.row_ids(&v1, "t").unwrap().is_empty());
        assert_eq!(backend.row_ids(&v2, "t").unwrap(), vec!["r1".to_string()]);
        assert_eq!(backend.element_ids(ElementType::Vertex).unwrap(), vec![ElementId::new("v2")]);
    }
}
