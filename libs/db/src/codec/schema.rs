//! Row and column-family layout of the cell store.
//!
//! | Row | Contents |
//! |-----|----------|
//! | `V` + vertex id | vertex cells |
//! | `E` + edge id | edge cells |
//! | `X` + join(type, element id, table, row id) | extended data row cells |
//!
//! Column families select the mutation category; see [`Family`].

use crate::error::{Error, Result};

pub const EXTENDED_ROW_PREFIX: u8 = b'X';

/// Signal-family qualifiers.
pub mod signal {
    pub const VISIBILITY: &[u8] = b"v";
    pub const TIMESTAMP: &[u8] = b"t";
    pub const LABEL: &[u8] = b"l";
    pub const SETUP: &[u8] = b"s";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// Element existence: visibility, touch timestamp, edge label, edge endpoints.
    Signal,
    Property,
    PropertyMetadata,
    PropertyHidden,
    PropertySoftDelete,
    OutEdgeRef,
    InEdgeRef,
    OutEdgeHidden,
    InEdgeHidden,
    OutEdgeSoftDelete,
    InEdgeSoftDelete,
    ElementHidden,
    ElementSoftDelete,
    AdditionalVisibility,
    ExtendedDataMarker,
    ExtendedColumn,
    ExtendedColumnDelete,
}

impl Family {
    pub const ALL: [Family; 17] = [
        Family::Signal,
        Family::Property,
        Family::PropertyMetadata,
        Family::PropertyHidden,
        Family::PropertySoftDelete,
        Family::OutEdgeRef,
        Family::InEdgeRef,
        Family::OutEdgeHidden,
        Family::InEdgeHidden,
        Family::OutEdgeSoftDelete,
        Family::InEdgeSoftDelete,
        Family::ElementHidden,
        Family::ElementSoftDelete,
        Family::AdditionalVisibility,
        Family::ExtendedDataMarker,
        Family::ExtendedColumn,
        Family::ExtendedColumnDelete,
    ];

    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Family::Signal => b"S",
            Family::Property => b"P",
            Family::PropertyMetadata => b"PM",
            Family::PropertyHidden => b"PH",
            Family::PropertySoftDelete => b"PD",
            Family::OutEdgeRef => b"EO",
            Family::InEdgeRef => b"EI",
            Family::OutEdgeHidden => b"EOH",
            Family::InEdgeHidden => b"EIH",
            Family::OutEdgeSoftDelete => b"EOD",
            Family::InEdgeSoftDelete => b"EID",
            Family::ElementHidden => b"H",
            Family::ElementSoftDelete => b"D",
            Family::AdditionalVisibility => b"AV",
            Family::ExtendedDataMarker => b"XD",
            Family::ExtendedColumn => b"XC",
            Family::ExtendedColumnDelete => b"XCD",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Family> {
        Family::ALL
            .into_iter()
            .find(|f| f.as_bytes() == bytes)
            .ok_or_else(|| {
                Error::integrity(format!(
                    "unknown column family {:?}",
                    String::from_utf8_lossy(bytes)
                ))
            })
    }

    pub fn name(self) -> &'static str {
        match self {
            Family::Signal => "signal",
            Family::Property => "property",
            Family::PropertyMetadata => "property-metadata",
            Family::PropertyHidden => "property-hidden",
            Family::PropertySoftDelete => "property-soft-delete",
            Family::OutEdgeRef => "out-edge-ref",
            Family::InEdgeRef => "in-edge-ref",
            Family::OutEdgeHidden => "out-edge-hidden",
            Family::InEdgeHidden => "in-edge-hidden",
            Family::OutEdgeSoftDelete => "out-edge-soft-delete",
            Family::InEdgeSoftDelete => "in-edge-soft-delete",
            Family::ElementHidden => "element-hidden",
            Family::ElementSoftDelete => "element-soft-delete",
            Family::AdditionalVisibility => "additional-visibility",
            Family::ExtendedDataMarker => "extended-data-marker",
            Family::ExtendedColumn => "extended-column",
            Family::ExtendedColumnDelete => "extended-column-delete",
        }
    }
}
