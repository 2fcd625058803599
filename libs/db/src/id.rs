//! Identifiers for elements and extended data rows.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque element id, unique within its element type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        ElementId(id.into())
    }

    /// Generate a fresh random id (UUID v4, hyphenated).
    pub fn generate() -> Self {
        ElementId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        ElementId(value.to_string())
    }
}

impl From<String> for ElementId {
    fn from(value: String) -> Self {
        ElementId(value)
    }
}

impl AsRef<str> for ElementId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Vertex,
    Edge,
}

impl ElementType {
    /// Row key prefix byte in the sorted store.
    pub const fn row_prefix(self) -> u8 {
        match self {
            ElementType::Vertex => b'V',
            ElementType::Edge => b'E',
        }
    }

    pub fn from_row_prefix(byte: u8) -> Option<Self> {
        match byte {
            b'V' => Some(ElementType::Vertex),
            b'E' => Some(ElementType::Edge),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Vertex => f.write_str("vertex"),
            ElementType::Edge => f.write_str("edge"),
        }
    }
}

/// Edge direction relative to a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Out,
    In,
    Both,
}

impl Direction {
    pub fn includes(self, other: Direction) -> bool {
        self == Direction::Both || self == other
    }
}

/// Fully qualified element key: type namespace plus id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementKey {
    pub element_type: ElementType,
    pub id: ElementId,
}

impl ElementKey {
    pub fn vertex(id: impl Into<ElementId>) -> Self {
        Self {
            element_type: ElementType::Vertex,
            id: id.into(),
        }
    }

    pub fn edge(id: impl Into<ElementId>) -> Self {
        Self {
            element_type: ElementType::Edge,
            id: id.into(),
        }
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.element_type, self.id)
    }
}

/// Key of one extended data row: (element type, element id, table, row id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExtendedRowKey {
    pub element: ElementKey,
    pub table: String,
    pub row_id: String,
}

impl ExtendedRowKey {
    pub fn new(element: ElementKey, table: impl Into<String>, row_id: impl Into<String>) -> Self {
        Self {
            element,
            table: table.into(),
            row_id: row_id.into(),
        }
    }
}

impl fmt::Display for ExtendedRowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.element, self.table, self.row_id)
    }
}
