//! Parse-once cache for visibility strings read back from storage.
//!
//! Decoding a row parses the same handful of column visibilities over and over.
//! The cache is read-mostly; concurrent misses may both parse and insert, which is
//! harmless because parsing is pure.

use dashmap::DashMap;

use super::Visibility;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct VisibilityCache {
    parsed: DashMap<Box<[u8]>, Visibility>,
}

impl VisibilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve raw column-visibility bytes, parsing on first sight.
    pub fn get_or_parse(&self, raw: &[u8]) -> Result<Visibility> {
        if raw.is_empty() {
            return Ok(Visibility::empty());
        }
        if let Some(hit) = self.parsed.get(raw) {
            return Ok(hit.value().clone());
        }
        let text = std::str::from_utf8(raw).map_err(|e| {
            crate::error::Error::integrity(format!("column visibility is not UTF-8: {}", e))
        })?;
        let visibility = Visibility::new(text)?;
        self.parsed.insert(raw.into(), visibility.clone());
        Ok(visibility)
    }

    pub fn len(&self) -> usize {
        self.parsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_cache_hits_after_first_parse() {
        let cache = VisibilityCache::new();
        let first = cache.get_or_parse(b"b&a").unwrap();
        assert_eq!(first.as_str(), "a&b");
        assert_eq!(cache.len(), 1);
        let second = cache.get_or_parse(b"b&a").unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_empty_bypasses_cache() {
        let cache = VisibilityCache::new();
        assert!(cache.get_or_parse(b"").unwrap().is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_deeply_nested_stored_visibility_is_rejected() {
        let cache = VisibilityCache::new();
        let raw = format!("{}a{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(matches!(
            cache.get_or_parse(raw.as_bytes()).unwrap_err(),
            Error::VisibilityParse { .. }
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_malformed_not_cached() {
        let cache = VisibilityCache::new();
        assert!(matches!(
            cache.get_or_parse(b"a&(").unwrap_err(),
            Error::VisibilityParse { .. }
        ));
        assert!(matches!(
            cache.get_or_parse(&[0xff, 0xfe]).unwrap_err(),
            Error::Integrity(_)
        ));
        assert!(cache.is_empty());
    }
}
