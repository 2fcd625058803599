//! Mutation types.
//!
//! A mutation is one timestamped fact about an element (or an extended data row).
//! Mutations are never edited: every change of state is a new mutation appended
//! to the owning [`Timeline`](crate::timeline::Timeline).

use std::fmt;

use crate::clock::Timestamp;
use crate::id::{Direction, ElementId};
use crate::value::{PropertyValue, Value};
use crate::visibility::Visibility;

/// Anything ordered on a timeline.
pub trait Timestamped {
    fn timestamp(&self) -> Timestamp;
}

/// (key, name, visibility): at most one current value exists per identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyIdentity {
    pub key: String,
    pub name: String,
    pub visibility: Visibility,
}

impl PropertyIdentity {
    pub fn new(key: impl Into<String>, name: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            visibility,
        }
    }
}

impl fmt::Display for PropertyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}[{}]", self.key, self.name, self.visibility)
    }
}

/// One metadata entry attached to a property value; carries its own visibility.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    pub key: String,
    pub value: PropertyValue,
    pub visibility: Visibility,
}

impl MetadataEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Value>, visibility: Visibility) -> Self {
        Self {
            key: key.into(),
            value: PropertyValue::eager(value.into()),
            visibility,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddPropertyValue {
    pub key: String,
    pub name: String,
    pub value: PropertyValue,
    pub metadata: Vec<MetadataEntry>,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftDeleteProperty {
    pub key: String,
    pub name: String,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
    pub data: Option<Value>,
}

/// Shared shape of MarkPropertyHidden / MarkPropertyVisible.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyHiddenToggle {
    pub key: String,
    pub name: String,
    /// Visibility of the property being toggled (part of its identity).
    pub property_visibility: Visibility,
    pub timestamp: Timestamp,
    /// Visibility under which the property is hidden.
    pub visibility: Visibility,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterVisibility {
    pub timestamp: Timestamp,
    pub visibility: Visibility,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterEdgeLabel {
    pub timestamp: Timestamp,
    pub label: String,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSetup {
    pub timestamp: Timestamp,
    pub out_vertex_id: ElementId,
    pub in_vertex_id: ElementId,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementTimestamp {
    pub timestamp: Timestamp,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftDelete {
    pub timestamp: Timestamp,
    pub visibility: Visibility,
    pub data: Option<Value>,
}

/// Shared shape of element-level MarkHidden / MarkVisible.
#[derive(Debug, Clone, PartialEq)]
pub struct HiddenToggle {
    pub timestamp: Timestamp,
    pub visibility: Visibility,
    pub data: Option<Value>,
}

/// Shared shape of AddAdditionalVisibility / DeleteAdditionalVisibility.
#[derive(Debug, Clone, PartialEq)]
pub struct AdditionalVisibilityChange {
    pub timestamp: Timestamp,
    pub label: String,
    pub data: Option<Value>,
}

/// Vertex-side pointer to an incident edge.
#[derive(Debug, Clone, PartialEq)]
pub struct AddEdgeRef {
    pub direction: Direction,
    pub edge_id: ElementId,
    pub label: String,
    pub other_vertex_id: ElementId,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftDeleteEdgeRef {
    pub direction: Direction,
    pub edge_id: ElementId,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
    pub data: Option<Value>,
}

/// Shared shape of MarkEdgeRefHidden / MarkEdgeRefVisible.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRefHiddenToggle {
    pub direction: Direction,
    pub edge_id: ElementId,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedDataMarker {
    pub table: String,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
}

/// Element timeline entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    AddPropertyValue(AddPropertyValue),
    SoftDeleteProperty(SoftDeleteProperty),
    MarkPropertyHidden(PropertyHiddenToggle),
    MarkPropertyVisible(PropertyHiddenToggle),
    AlterVisibility(AlterVisibility),
    AlterEdgeLabel(AlterEdgeLabel),
    EdgeSetup(EdgeSetup),
    ElementTimestamp(ElementTimestamp),
    SoftDelete(SoftDelete),
    MarkHidden(HiddenToggle),
    MarkVisible(HiddenToggle),
    AddAdditionalVisibility(AdditionalVisibilityChange),
    DeleteAdditionalVisibility(AdditionalVisibilityChange),
    AddEdgeRef(AddEdgeRef),
    SoftDeleteEdgeRef(SoftDeleteEdgeRef),
    MarkEdgeRefHidden(EdgeRefHiddenToggle),
    MarkEdgeRefVisible(EdgeRefHiddenToggle),
    ExtendedDataMarker(ExtendedDataMarker),
}

/// Variant tag used by `Timeline::find_last` / `find_all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    AddPropertyValue,
    SoftDeleteProperty,
    MarkPropertyHidden,
    MarkPropertyVisible,
    AlterVisibility,
    AlterEdgeLabel,
    EdgeSetup,
    ElementTimestamp,
    SoftDelete,
    MarkHidden,
    MarkVisible,
    AddAdditionalVisibility,
    DeleteAdditionalVisibility,
    AddEdgeRef,
    SoftDeleteEdgeRef,
    MarkEdgeRefHidden,
    MarkEdgeRefVisible,
    ExtendedDataMarker,
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::AddPropertyValue(_) => MutationKind::AddPropertyValue,
            Mutation::SoftDeleteProperty(_) => MutationKind::SoftDeleteProperty,
            Mutation::MarkPropertyHidden(_) => MutationKind::MarkPropertyHidden,
            Mutation::MarkPropertyVisible(_) => MutationKind::MarkPropertyVisible,
            Mutation::AlterVisibility(_) => MutationKind::AlterVisibility,
            Mutation::AlterEdgeLabel(_) => MutationKind::AlterEdgeLabel,
            Mutation::EdgeSetup(_) => MutationKind::EdgeSetup,
            Mutation::ElementTimestamp(_) => MutationKind::ElementTimestamp,
            Mutation::SoftDelete(_) => MutationKind::SoftDelete,
            Mutation::MarkHidden(_) => MutationKind::MarkHidden,
            Mutation::MarkVisible(_) => MutationKind::MarkVisible,
            Mutation::AddAdditionalVisibility(_) => MutationKind::AddAdditionalVisibility,
            Mutation::DeleteAdditionalVisibility(_) => MutationKind::DeleteAdditionalVisibility,
            Mutation::AddEdgeRef(_) => MutationKind::AddEdgeRef,
            Mutation::SoftDeleteEdgeRef(_) => MutationKind::SoftDeleteEdgeRef,
            Mutation::MarkEdgeRefHidden(_) => MutationKind::MarkEdgeRefHidden,
            Mutation::MarkEdgeRefVisible(_) => MutationKind::MarkEdgeRefVisible,
            Mutation::ExtendedDataMarker(_) => MutationKind::ExtendedDataMarker,
        }
    }

    /// Visibility the mutation's cell is written under.
    pub fn visibility(&self) -> &Visibility {
        static EMPTY: std::sync::OnceLock<Visibility> = std::sync::OnceLock::new();
        match self {
            Mutation::AddPropertyValue(m) => &m.visibility,
            Mutation::SoftDeleteProperty(m) => &m.visibility,
            Mutation::MarkPropertyHidden(m) | Mutation::MarkPropertyVisible(m) => &m.visibility,
            Mutation::AlterVisibility(m) => &m.visibility,
            Mutation::AlterEdgeLabel(m) => &m.visibility,
            Mutation::EdgeSetup(m) => &m.visibility,
            Mutation::ElementTimestamp(m) => &m.visibility,
            Mutation::SoftDelete(m) => &m.visibility,
            Mutation::MarkHidden(m) | Mutation::MarkVisible(m) => &m.visibility,
            // Additional-visibility grants are readable by everyone.
            Mutation::AddAdditionalVisibility(_) | Mutation::DeleteAdditionalVisibility(_) => {
                EMPTY.get_or_init(Visibility::empty)
            }
            Mutation::AddEdgeRef(m) => &m.visibility,
            Mutation::SoftDeleteEdgeRef(m) => &m.visibility,
            Mutation::MarkEdgeRefHidden(m) | Mutation::MarkEdgeRefVisible(m) => &m.visibility,
            Mutation::ExtendedDataMarker(m) => &m.visibility,
        }
    }

    /// Property identity for property-scoped mutations.
    pub fn property_identity(&self) -> Option<PropertyIdentity> {
        match self {
            Mutation::AddPropertyValue(m) => Some(PropertyIdentity::new(
                m.key.clone(),
                m.name.clone(),
                m.visibility.clone(),
            )),
            Mutation::SoftDeleteProperty(m) => Some(PropertyIdentity::new(
                m.key.clone(),
                m.name.clone(),
                m.visibility.clone(),
            )),
            Mutation::MarkPropertyHidden(m) | Mutation::MarkPropertyVisible(m) => {
                Some(PropertyIdentity::new(
                    m.key.clone(),
                    m.name.clone(),
                    m.property_visibility.clone(),
                ))
            }
            _ => None,
        }
    }
}

impl Timestamped for Mutation {
    fn timestamp(&self) -> Timestamp {
        match self {
            Mutation::AddPropertyValue(m) => m.timestamp,
            Mutation::SoftDeleteProperty(m) => m.timestamp,
            Mutation::MarkPropertyHidden(m) | Mutation::MarkPropertyVisible(m) => m.timestamp,
            Mutation::AlterVisibility(m) => m.timestamp,
            Mutation::AlterEdgeLabel(m) => m.timestamp,
            Mutation::EdgeSetup(m) => m.timestamp,
            Mutation::ElementTimestamp(m) => m.timestamp,
            Mutation::SoftDelete(m) => m.timestamp,
            Mutation::MarkHidden(m) | Mutation::MarkVisible(m) => m.timestamp,
            Mutation::AddAdditionalVisibility(m) | Mutation::DeleteAdditionalVisibility(m) => {
                m.timestamp
            }
            Mutation::AddEdgeRef(m) => m.timestamp,
            Mutation::SoftDeleteEdgeRef(m) => m.timestamp,
            Mutation::MarkEdgeRefHidden(m) | Mutation::MarkEdgeRefVisible(m) => m.timestamp,
            Mutation::ExtendedDataMarker(m) => m.timestamp,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddColumn {
    pub column: String,
    pub key: String,
    pub value: PropertyValue,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteColumn {
    pub column: String,
    pub key: String,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
}

/// Extended data row timeline entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtendedDataMutation {
    AddColumn(AddColumn),
    DeleteColumn(DeleteColumn),
    AddAdditionalVisibility(AdditionalVisibilityChange),
    DeleteAdditionalVisibility(AdditionalVisibilityChange),
}

impl Timestamped for ExtendedDataMutation {
    fn timestamp(&self) -> Timestamp {
        match self {
            ExtendedDataMutation::AddColumn(m) => m.timestamp,
            ExtendedDataMutation::DeleteColumn(m) => m.timestamp,
            ExtendedDataMutation::AddAdditionalVisibility(m)
            | ExtendedDataMutation::DeleteAdditionalVisibility(m) => m.timestamp,
        }
    }
}
