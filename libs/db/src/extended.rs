//! Extended data: per-element side tables of loosely typed rows.

use std::collections::BTreeSet;

use crate::clock::Timestamp;
use crate::error::Result;
use crate::id::ExtendedRowKey;
use crate::value::{PropertyValue, Value};
use crate::visibility::Visibility;

/// One current column value of an extended data row.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedColumn {
    pub name: String,
    pub key: String,
    pub value: PropertyValue,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
}

impl ExtendedColumn {
    pub fn value(&self) -> Result<&Value> {
        self.value.resolve()
    }
}

/// Materialized extended data row, columns ordered by (name, key, visibility).
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedDataRow {
    pub key: ExtendedRowKey,
    pub columns: Vec<ExtendedColumn>,
    pub additional_visibilities: BTreeSet<String>,
}

impl ExtendedDataRow {
    pub fn row_id(&self) -> &str {
        &self.key.row_id
    }

    pub fn table(&self) -> &str {
        &self.key.table
    }

    pub fn column(&self, name: &str) -> Option<&ExtendedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_value(&self, name: &str) -> Result<Option<&Value>> {
        self.column(name).map(ExtendedColumn::value).transpose()
    }

    /// Latest timestamp across current columns.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.columns.iter().map(|c| c.timestamp).max()
    }
}

/// A column write queued on an element mutation builder.
#[derive(Debug, Clone)]
pub struct ExtendedDataWrite {
    pub table: String,
    pub row_id: String,
    pub column: String,
    pub key: String,
    pub value: Value,
    pub visibility: Visibility,
}

/// A column delete queued on an element mutation builder.
#[derive(Debug, Clone)]
pub struct ExtendedDataDelete {
    pub table: String,
    pub row_id: String,
    pub column: String,
    pub key: String,
    pub visibility: Visibility,
}
