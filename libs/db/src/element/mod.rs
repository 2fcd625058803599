//! Materialized element views.
//!
//! Values here are derived from a timeline by [`crate::materialize`] and never
//! written back; all writes go through mutations.

mod hints;

use std::collections::BTreeSet;

use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::id::{Direction, ElementId, ElementKey, ElementType};
use crate::mutation::MetadataEntry;
use crate::value::{PropertyValue, Value};
use crate::visibility::Visibility;

pub use hints::FetchHints;

/// A current property value as seen by one reader.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: String,
    pub name: String,
    pub value: PropertyValue,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
    /// Metadata entries readable by the caller.
    pub metadata: Vec<MetadataEntry>,
    /// Hidden visibilities readable by the caller (non-empty only with `include_hidden`).
    pub hidden_visibilities: Vec<Visibility>,
}

impl Property {
    pub fn value(&self) -> Result<&Value> {
        self.value.resolve()
    }

    pub fn metadata_value(&self, key: &str) -> Result<Option<&Value>> {
        self.metadata
            .iter()
            .find(|m| m.key == key)
            .map(|m| m.value.resolve())
            .transpose()
    }

    pub fn is_hidden(&self) -> bool {
        !self.hidden_visibilities.is_empty()
    }
}

/// Vertex-side pointer to an incident edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeInfo {
    pub edge_id: ElementId,
    pub direction: Direction,
    pub label: String,
    pub other_vertex_id: ElementId,
    pub visibility: Visibility,
    pub timestamp: Timestamp,
}

/// State shared by vertices and edges.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementCore {
    pub(crate) id: ElementId,
    pub(crate) visibility: Visibility,
    pub(crate) timestamp: Timestamp,
    pub(crate) properties: Option<Vec<Property>>,
    pub(crate) hidden_visibilities: Vec<Visibility>,
    pub(crate) additional_visibilities: BTreeSet<String>,
    pub(crate) extended_table_names: Option<BTreeSet<String>>,
    pub(crate) fetch_hints: FetchHints,
}

impl ElementCore {
    pub fn id(&self) -> &ElementId {
        &self.id
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn fetch_hints(&self) -> &FetchHints {
        &self.fetch_hints
    }

    pub fn hidden_visibilities(&self) -> &[Visibility] {
        &self.hidden_visibilities
    }

    pub fn additional_visibilities(&self) -> &BTreeSet<String> {
        &self.additional_visibilities
    }

    pub fn properties(&self) -> Result<&[Property]> {
        self.properties
            .as_deref()
            .ok_or(Error::MissingFetchHint("properties"))
    }

    /// All current values of `name` (any key, any visibility).
    pub fn properties_named<'a>(&'a self, name: &'a str) -> Result<impl Iterator<Item = &'a Property>> {
        Ok(self.properties()?.iter().filter(move |p| p.name == name))
    }

    /// First property named `name`, in (key, name, visibility) order.
    pub fn property(&self, name: &str) -> Result<Option<&Property>> {
        Ok(self.properties()?.iter().find(|p| p.name == name))
    }

    pub fn property_by_identity(
        &self,
        key: &str,
        name: &str,
        visibility: &Visibility,
    ) -> Result<Option<&Property>> {
        Ok(self
            .properties()?
            .iter()
            .find(|p| p.key == key && p.name == name && &p.visibility == visibility))
    }

    /// Resolved value of the first property named `name`.
    pub fn property_value(&self, name: &str) -> Result<Option<&Value>> {
        self.property(name)?.map(Property::value).transpose()
    }

    pub fn extended_table_names(&self) -> Result<&BTreeSet<String>> {
        self.extended_table_names
            .as_ref()
            .ok_or(Error::MissingFetchHint("extended_table_names"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub(crate) core: ElementCore,
    pub(crate) edge_infos: Option<Vec<EdgeInfo>>,
}

impl Vertex {
    fn edge_infos_loaded(&self) -> Result<&[EdgeInfo]> {
        self.edge_infos
            .as_deref()
            .ok_or(Error::MissingFetchHint("edge_refs"))
    }

    pub fn edge_infos(&self, direction: Direction) -> Result<Vec<&EdgeInfo>> {
        Ok(self
            .edge_infos_loaded()?
            .iter()
            .filter(|info| direction.includes(info.direction))
            .collect())
    }

    fn matching<'a>(
        &'a self,
        direction: Direction,
        labels: &'a [&'a str],
    ) -> Result<impl Iterator<Item = &'a EdgeInfo>> {
        Ok(self
            .edge_infos_loaded()?
            .iter()
            .filter(move |info| direction.includes(info.direction))
            .filter(move |info| labels.is_empty() || labels.contains(&info.label.as_str())))
    }

    /// Ids of incident edges, sorted; an empty `labels` slice matches every label.
    pub fn edge_ids(&self, direction: Direction, labels: &[&str]) -> Result<Vec<ElementId>> {
        let ids: BTreeSet<ElementId> = self
            .matching(direction, labels)?
            .map(|info| info.edge_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Ids of adjacent vertices, deduplicated and sorted.
    pub fn vertex_ids(&self, direction: Direction, labels: &[&str]) -> Result<Vec<ElementId>> {
        let ids: BTreeSet<ElementId> = self
            .matching(direction, labels)?
            .map(|info| info.other_vertex_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }
}

impl std::ops::Deref for Vertex {
    type Target = ElementCore;

    fn deref(&self) -> &ElementCore {
        &self.core
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub(crate) core: ElementCore,
    pub(crate) out_vertex_id: ElementId,
    pub(crate) in_vertex_id: ElementId,
    pub(crate) label: String,
}

impl Edge {
    pub fn out_vertex_id(&self) -> &ElementId {
        &self.out_vertex_id
    }

    pub fn in_vertex_id(&self) -> &ElementId {
        &self.in_vertex_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The endpoint opposite `vertex_id`, if `vertex_id` is an endpoint.
    pub fn other_vertex_id(&self, vertex_id: &ElementId) -> Option<&ElementId> {
        if &self.out_vertex_id == vertex_id {
            Some(&self.in_vertex_id)
        } else if &self.in_vertex_id == vertex_id {
            Some(&self.out_vertex_id)
        } else {
            None
        }
    }
}

impl std::ops::Deref for Edge {
    type Target = ElementCore;

    fn deref(&self) -> &ElementCore {
        &self.core
    }
}

/// Closed union over element kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Vertex(Vertex),
    Edge(Edge),
}

impl Element {
    pub fn core(&self) -> &ElementCore {
        match self {
            Element::Vertex(v) => &v.core,
            Element::Edge(e) => &e.core,
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            Element::Vertex(_) => ElementType::Vertex,
            Element::Edge(_) => ElementType::Edge,
        }
    }

    pub fn key(&self) -> ElementKey {
        ElementKey {
            element_type: self.element_type(),
            id: self.core().id.clone(),
        }
    }

    pub fn into_vertex(self) -> Option<Vertex> {
        match self {
            Element::Vertex(v) => Some(v),
            Element::Edge(_) => None,
        }
    }

    pub fn into_edge(self) -> Option<Edge> {
        match self {
            Element::Edge(e) => Some(e),
            Element::Vertex(_) => None,
        }
    }
}

impl std::ops::Deref for Element {
    type Target = ElementCore;

    fn deref(&self) -> &ElementCore {
        self.core()
    }
}
