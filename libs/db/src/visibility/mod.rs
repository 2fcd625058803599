//! Cell visibility labels and the evaluator that gates every read.
//!
//! A [`Visibility`] is parsed once at construction and carries its normalized
//! expression plus the parsed tree, so evaluation on the read path never
//! re-parses. Two visibilities are equal iff their normalized strings are equal.
//!
//! ```rust,ignore
//! let vis = Visibility::new("admin|(ops&oncall)")?;
//! let auths = Authorizations::new(["ops", "oncall"]);
//! assert!(auths.can_read(&vis));
//! ```

mod cache;
mod parser;

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;

pub use cache::VisibilityCache;
use parser::Node;

/// Immutable boolean expression over authorization labels.
#[derive(Clone)]
pub struct Visibility {
    expression: Arc<str>,
    root: Option<Arc<Node>>,
}

impl Visibility {
    /// Parse `expression`. Malformed input is a `VisibilityParse` error.
    pub fn new(expression: &str) -> Result<Self> {
        let root = parser::parse(expression)?;
        let mut normalized = String::with_capacity(expression.len());
        if let Some(node) = &root {
            node.render(&mut normalized);
        }
        Ok(Self {
            expression: Arc::from(normalized.as_str()),
            root: root.map(Arc::new),
        })
    }

    /// The always-visible expression.
    pub fn empty() -> Self {
        Self {
            expression: Arc::from(""),
            root: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Normalized expression string.
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// Distinct labels referenced by the expression, sorted.
    pub fn labels(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            root.labels(&mut out);
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    fn evaluate_with(&self, has: &dyn Fn(&str) -> bool) -> bool {
        match &self.root {
            None => true,
            Some(root) => root.evaluate(has),
        }
    }
}

impl Default for Visibility {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Visibility {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for Visibility {}

impl Hash for Visibility {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.expression.hash(state);
    }
}

impl PartialOrd for Visibility {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Visibility {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.expression.cmp(&other.expression)
    }
}

impl fmt::Debug for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Visibility({:?})", &*self.expression)
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl TryFrom<&str> for Visibility {
    type Error = crate::error::Error;

    fn try_from(value: &str) -> Result<Self> {
        Visibility::new(value)
    }
}

impl Serialize for Visibility {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.expression)
    }
}

impl<'de> Deserialize<'de> for Visibility {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let expression = String::deserialize(deserializer)?;
        Visibility::new(&expression).map_err(serde::de::Error::custom)
    }
}

/// The label set held by a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorizations {
    labels: Arc<BTreeSet<String>>,
}

impl Authorizations {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: Arc::new(labels.into_iter().map(Into::into).collect()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a comma separated label list; blank entries are skipped.
    pub fn from_csv(csv: &str) -> Self {
        Self::new(
            csv.split(',')
                .map(str::trim)
                .filter(|label| !label.is_empty()),
        )
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Evaluate an already parsed visibility. Pure and lock free.
    pub fn can_read(&self, visibility: &Visibility) -> bool {
        visibility.evaluate_with(&|label| self.labels.contains(label))
    }

    /// True if the caller holds any of `labels`.
    pub fn holds_any<'a>(&self, mut labels: impl Iterator<Item = &'a str>) -> bool {
        labels.any(|label| self.labels.contains(label))
    }
}

impl fmt::Display for Authorizations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.labels().collect();
        write!(f, "[{}]", joined.join(","))
    }
}

/// Evaluate a raw expression string against `authorizations`.
///
/// The empty expression is always readable. A malformed expression is an error,
/// never a silent allow or deny.
pub fn evaluate(expression: &str, authorizations: &Authorizations) -> Result<bool> {
    if expression.trim().is_empty() {
        return Ok(true);
    }
    let visibility = Visibility::new(expression)?;
    Ok(authorizations.can_read(&visibility))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_empty_always_readable() {
        assert!(evaluate("", &Authorizations::empty()).unwrap());
        assert!(evaluate("", &Authorizations::new(["a"])).unwrap());
        assert!(Authorizations::empty().can_read(&Visibility::empty()));
    }

    #[test]
    fn test_label_membership() {
        let auths = Authorizations::new(["admin", "ops"]);
        assert!(evaluate("admin", &auths).unwrap());
        assert!(!evaluate("secret", &auths).unwrap());
        assert!(evaluate("admin&ops", &auths).unwrap());
        assert!(!evaluate("admin&secret", &auths).unwrap());
        assert!(evaluate("secret|ops", &auths).unwrap());
        assert!(evaluate("!secret", &auths).unwrap());
        assert!(!evaluate("!admin", &auths).unwrap());
        assert!(evaluate("(secret|admin)&!(x&y)", &auths).unwrap());
    }

    #[test]
    fn test_parse_error_is_surfaced() {
        let auths = Authorizations::new(["a"]);
        assert!(matches!(
            evaluate("a&(b", &auths),
            Err(Error::VisibilityParse { .. })
        ));
        assert!(matches!(
            evaluate("a$", &auths),
            Err(Error::VisibilityParse { .. })
        ));
    }

    #[test]
    fn test_deterministic_repeated_evaluation() {
        let auths = Authorizations::new(["a", "c"]);
        let vis = Visibility::new("(a|b)&c").unwrap();
        let first = auths.can_read(&vis);
        for _ in 0..100 {
            assert_eq!(auths.can_read(&vis), first);
        }
        assert_eq!(vis.as_str(), "c&(a|b)");
    }

    #[test]
    fn test_equality_is_on_normalized_form() {
        let a = Visibility::new("b & a").unwrap();
        let b = Visibility::new("a&b").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Visibility::new("a|b").unwrap());
        assert_eq!(Visibility::new("").unwrap(), Visibility::empty());
    }

    #[test]
    fn test_labels() {
        let vis = Visibility::new("b&(a|b)&!c").unwrap();
        assert_eq!(vis.labels(), vec!["a", "b", "c"]);
        assert!(Visibility::empty().labels().is_empty());
    }

    #[test]
    fn test_serde_roundtrip_through_string() {
        let vis = Visibility::new("x|y").unwrap();
        let json = serde_json::to_string(&vis).unwrap();
        assert_eq!(json, "\"x|y\"");
        let back: Visibility = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vis);
        assert!(serde_json::from_str::<Visibility>("\"x|(\"").is_err());
    }

    #[test]
    fn test_authorizations_from_csv() {
        let auths = Authorizations::from_csv("a, b,,c ");
        assert_eq!(auths.labels().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert!(Authorizations::from_csv("").is_empty());
    }

    #[test]
    fn test_concurrent_evaluation() {
        use std::thread;
        let vis = Visibility::new("a&b").unwrap();
        let auths = Authorizations::new(["a", "b"]);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let vis = vis.clone();
                let auths = auths.clone();
                thread::spawn(move || (0..1000).all(|_| auths.can_read(&vis)))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }
}
