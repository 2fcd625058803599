//! Name substitution for qualifier tokens.
//!
//! Property keys/names, metadata keys, edge labels and extended table names
//! pass through a [`NameSubstitution`] before they land in a column qualifier.
//! `deflate` must be injective and `inflate` its exact left inverse.
//!
//! [`InterningSubstitution`] replaces long names with a 9-byte token
//! (`MARK` + 8-byte xxHash64), resolved through a [`NameCache`] that is
//! persisted in the graph metadata namespace under `names/<hex>`.
//!
//! Token layout:
//! - `MARK` + hash: interned name
//! - `ESC` + bytes: literal whose first byte would otherwise be ambiguous, or a
//!   name whose hash collides with an already interned name
//! - anything else: literal

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use xxhash_rust::xxh64::xxh64;

use crate::error::{Error, Result};

const MARK: u8 = 0x01;
const ESC: u8 = 0x02;

/// Metadata key prefix for persisted dictionary entries.
pub const NAMES_METADATA_PREFIX: &str = "names/";

/// A dictionary entry to persist: (metadata key, name bytes).
pub type NameEntry = (String, Vec<u8>);

pub trait NameSubstitution: Send + Sync {
    /// Stable identity persisted in graph metadata.
    fn id(&self) -> &'static str;

    /// Encode `name`. Newly created dictionary entries are pushed to `new_entries`
    /// and must be persisted before cells using the token.
    fn deflate(&self, name: &str, new_entries: &mut Vec<NameEntry>) -> Vec<u8>;

    fn inflate(&self, token: &[u8]) -> Result<String>;

    /// Load persisted dictionary entries (metadata keys already filtered by prefix).
    fn load_entries(&self, _entries: &[NameEntry]) -> Result<()> {
        Ok(())
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::integrity(format!("name token is not UTF-8: {}", e)))
}

fn literal(name: &str) -> Vec<u8> {
    let bytes = name.as_bytes();
    match bytes.first() {
        Some(&MARK) | Some(&ESC) => escaped(name),
        _ => bytes.to_vec(),
    }
}

fn escaped(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 1);
    out.push(ESC);
    out.extend_from_slice(name.as_bytes());
    out
}

/// Names are stored verbatim (with the escape rule).
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentitySubstitution;

impl NameSubstitution for IdentitySubstitution {
    fn id(&self) -> &'static str {
        "identity"
    }

    fn deflate(&self, name: &str, _new_entries: &mut Vec<NameEntry>) -> Vec<u8> {
        literal(name)
    }

    fn inflate(&self, token: &[u8]) -> Result<String> {
        match token.first() {
            Some(&ESC) => utf8(&token[1..]),
            Some(&MARK) => Err(Error::integrity(
                "interned name token found but identity substitution is configured",
            )),
            _ => utf8(token),
        }
    }
}

/// 8-byte xxHash64 of a name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameHash([u8; 8]);

impl NameHash {
    pub const SIZE: usize = 8;

    pub fn from_name(name: &str) -> Self {
        NameHash(xxh64(name.as_bytes(), 0).to_be_bytes())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        NameHash(bytes)
    }

    fn metadata_key(&self) -> String {
        format!("{}{}", NAMES_METADATA_PREFIX, self)
    }

    fn from_metadata_key(key: &str) -> Option<Self> {
        let hex = key.strip_prefix(NAMES_METADATA_PREFIX)?;
        let value = u64::from_str_radix(hex, 16).ok()?;
        Some(NameHash(value.to_be_bytes()))
    }
}

impl fmt::Debug for NameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameHash({:016x})", u64::from_be_bytes(self.0))
    }
}

impl fmt::Display for NameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", u64::from_be_bytes(self.0))
    }
}

/// Concurrent two-way hash/name cache. Never evicts.
#[derive(Debug, Default)]
pub struct NameCache {
    hash_to_name: DashMap<NameHash, Arc<str>>,
    name_to_hash: DashMap<String, NameHash>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`. Returns `(hash, is_new)`, or `None` if the hash is already
    /// owned by a different name.
    pub fn intern_if_new(&self, name: &str) -> Option<(NameHash, bool)> {
        if let Some(hash) = self.name_to_hash.get(name) {
            return Some((*hash, false));
        }
        let hash = NameHash::from_name(name);
        match self.hash_to_name.entry(hash) {
            Entry::Occupied(existing) => {
                if &**existing.get() != name {
                    return None;
                }
                Some((hash, false))
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::from(name));
                self.name_to_hash.insert(name.to_string(), hash);
                Some((hash, true))
            }
        }
    }

    /// Insert a persisted mapping. A conflicting mapping is an integrity error.
    pub fn insert(&self, hash: NameHash, name: String) -> Result<()> {
        match self.hash_to_name.entry(hash) {
            Entry::Occupied(existing) if &**existing.get() != name.as_str() => {
                Err(Error::integrity(format!(
                    "name hash {} maps to both {:?} and {:?}",
                    hash,
                    existing.get(),
                    name
                )))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(Arc::from(name.as_str()));
                self.name_to_hash.insert(name, hash);
                Ok(())
            }
        }
    }

    pub fn get(&self, hash: &NameHash) -> Option<Arc<str>> {
        self.hash_to_name.get(hash).map(|r| r.value().clone())
    }

    pub fn get_hash(&self, name: &str) -> Option<NameHash> {
        self.name_to_hash.get(name).map(|r| *r)
    }

    pub fn len(&self) -> usize {
        self.hash_to_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hash_to_name.is_empty()
    }
}

/// Interns names longer than a token; shorter names stay literal.
#[derive(Debug, Default)]
pub struct InterningSubstitution {
    cache: NameCache,
}

impl InterningSubstitution {
    const TOKEN_LEN: usize = 1 + NameHash::SIZE;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &NameCache {
        &self.cache
    }
}

impl NameSubstitution for InterningSubstitution {
    fn id(&self) -> &'static str {
        "interning/xxh64"
    }

    fn deflate(&self, name: &str, new_entries: &mut Vec<NameEntry>) -> Vec<u8> {
        if name.len() <= Self::TOKEN_LEN {
            return literal(name);
        }
        match self.cache.intern_if_new(name) {
            Some((hash, is_new)) => {
                if is_new {
                    new_entries.push((hash.metadata_key(), name.as_bytes().to_vec()));
                }
                let mut token = Vec::with_capacity(Self::TOKEN_LEN);
                token.push(MARK);
                token.extend_from_slice(hash.as_bytes());
                token
            }
            None => {
                tracing::debug!(name, "name hash collision, storing literal");
                escaped(name)
            }
        }
    }

    fn inflate(&self, token: &[u8]) -> Result<String> {
        match token.first() {
            Some(&MARK) => {
                let bytes: [u8; 8] = token[1..].try_into().map_err(|_| {
                    Error::integrity(format!("interned token has {} bytes", token.len()))
                })?;
                let hash = NameHash::from_bytes(bytes);
                self.cache
                    .get(&hash)
                    .map(|name| name.to_string())
                    .ok_or_else(|| Error::integrity(format!("unknown name hash {}", hash)))
            }
            Some(&ESC) => utf8(&token[1..]),
            _ => utf8(token),
        }
    }

    fn load_entries(&self, entries: &[NameEntry]) -> Result<()> {
        for (key, value) in entries {
            let hash = NameHash::from_metadata_key(key)
                .ok_or_else(|| Error::integrity(format!("malformed name entry key {:?}", key)))?;
            self.cache.insert(hash, utf8(value)?)?;
        }
        tracing::debug!(count = entries.len(), "Prewarmed name cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(subst: &dyn NameSubstitution, name: &str) -> String {
        let mut entries = Vec::new();
        let token = subst.deflate(name, &mut entries);
        subst.inflate(&token).unwrap()
    }

    #[test]
    fn test_identity_roundtrip_including_marker_bytes() {
        for name in ["", "name", "\u{1}looks-interned", "\u{2}escaped", "a\u{0}b|c"] {
            assert_eq!(roundtrip(&IdentitySubstitution, name), name);
        }
    }

    #[test]
    fn test_interning_shrinks_long_names() {
        let subst = InterningSubstitution::new();
        let mut entries = Vec::new();
        let long = "http://example.org/ontology#displayName";
        let token = subst.deflate(long, &mut entries);
        assert_eq!(token.len(), 9);
        assert_eq!(entries.len(), 1);
        assert_eq!(subst.inflate(&token).unwrap(), long);

        entries.clear();
        assert_eq!(subst.deflate(long, &mut entries), token);
        assert!(entries.is_empty());
        assert_eq!(subst.deflate("short", &mut entries), b"short".to_vec());
    }

    #[test]
    fn test_interning_roundtrip_edge_cases() {
        let subst = InterningSubstitution::new();
        for name in [
            "",
            "\u{1}",
            "\u{1}0123456789abcdef",
            "\u{2}0123456789abcdef",
            "名前の長いプロパティ",
            "tokens\u{0}with\u{0}nul",
        ] {
            assert_eq!(roundtrip(&subst, name), name);
        }
    }

    #[test]
    fn test_persisted_entries_prewarm_fresh_cache() {
        let writer = InterningSubstitution::new();
        let mut entries = Vec::new();
        let token = writer.deflate("a-rather-long-property-name", &mut entries);

        let reader = InterningSubstitution::new();
        assert!(matches!(reader.inflate(&token), Err(Error::Integrity(_))));
        reader.load_entries(&entries).unwrap();
        assert_eq!(reader.inflate(&token).unwrap(), "a-rather-long-property-name");
    }

    #[test]
    fn test_collision_falls_back_to_escaped_literal() {
        let subst = InterningSubstitution::new();
        let victim = "the-name-that-collides";
        // Plant a different name under the victim's hash.
        subst
            .cache()
            .insert(NameHash::from_name(victim), "someone-else".to_string())
            .unwrap();
        let mut entries = Vec::new();
        let token = subst.deflate(victim, &mut entries);
        assert_eq!(token[0], ESC);
        assert!(entries.is_empty());
        assert_eq!(subst.inflate(&token).unwrap(), victim);
    }

    #[test]
    fn test_conflicting_persisted_entry_is_integrity_error() {
        let cache = NameCache::new();
        let hash = NameHash::from_name("x");
        cache.insert(hash, "x".into()).unwrap();
        cache.insert(hash, "x".into()).unwrap();
        assert!(cache.insert(hash, "y".into()).is_err());
    }

    #[test]
    fn test_concurrent_interning() {
        use std::thread;
        let subst = Arc::new(InterningSubstitution::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let subst = subst.clone();
                thread::spawn(move || {
                    let mut entries = Vec::new();
                    for j in 0..50 {
                        subst.deflate(&format!("property_name_{}_{}", i % 4, j), &mut entries);
                    }
                    entries.len()
                })
            })
            .collect();
        let created: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(subst.cache().len(), 200);
        assert_eq!(created, 200);
    }
}
