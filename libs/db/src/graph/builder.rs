//! Element mutation builder.
//!
//! Operations are queued in call order on an [`ElementWrite`] and turned into
//! mutations by [`Graph::apply`], which stamps each one from the graph clock while
//! holding the element's lock. Edge changes that affect the vertex-side edge
//! references are applied to each endpoint afterwards, one lock at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::PoisonError;

use super::Graph;
use crate::backend::Backend;
use crate::blob;
use crate::clock::Timestamp;
use crate::element::{Element, FetchHints};
use crate::error::{Error, Result};
use crate::extended::{ExtendedDataDelete, ExtendedDataWrite};
use crate::id::{Direction, ElementId, ElementKey, ElementType, ExtendedRowKey};
use crate::materialize::{materialize, ReadOptions};
use crate::mutation::{
    AddColumn, AddEdgeRef, AddPropertyValue, AdditionalVisibilityChange, AlterEdgeLabel,
    AlterVisibility, DeleteColumn, EdgeRefHiddenToggle, EdgeSetup, ElementTimestamp,
    ExtendedDataMarker, ExtendedDataMutation, HiddenToggle, MetadataEntry, Mutation,
    MutationKind, PropertyHiddenToggle, PropertyIdentity, SoftDeleteEdgeRef, SoftDeleteProperty,
};
use crate::timeline::{self, Timeline};
use crate::value::{PropertyValue, Value};
use crate::visibility::{Authorizations, Visibility};

/// Outcome of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub element: ElementKey,
    /// The write is durable even when the search index rejected it.
    pub index_error: Option<String>,
}

#[derive(Debug, Clone)]
enum Creation {
    Existing,
    Vertex {
        visibility: Visibility,
    },
    Edge {
        out_vertex_id: ElementId,
        in_vertex_id: ElementId,
        label: String,
        visibility: Visibility,
    },
}

#[derive(Debug, Clone)]
enum Op {
    SetProperty {
        key: String,
        name: String,
        value: Value,
        metadata: Vec<MetadataEntry>,
        visibility: Visibility,
    },
    SoftDeleteProperty(PropertyIdentity),
    AlterPropertyVisibility {
        property: PropertyIdentity,
        visibility: Visibility,
    },
    PropertyHidden {
        property: PropertyIdentity,
        visibility: Visibility,
        hidden: bool,
    },
    AlterVisibility(Visibility),
    AlterEdgeLabel(String),
    Hidden {
        visibility: Visibility,
        hidden: bool,
    },
    AdditionalVisibility {
        label: String,
        granted: bool,
    },
}

#[derive(Debug, Clone)]
enum ExtendedOp {
    Write(ExtendedDataWrite),
    Delete(ExtendedDataDelete),
    AdditionalVisibility {
        table: String,
        row_id: String,
        label: String,
        granted: bool,
    },
}

/// Queued changes to one vertex or edge, independent of any graph.
///
/// Saved through [`Graph::apply`], an [`ElementMutation`], or the async
/// [`Writer`](crate::writer::Writer).
#[derive(Debug, Clone)]
pub struct ElementWrite {
    key: ElementKey,
    creation: Creation,
    ops: Vec<Op>,
    extended: Vec<ExtendedOp>,
}

impl ElementWrite {
    /// Create (or re-assert) a vertex.
    pub fn vertex(id: impl Into<ElementId>, visibility: Visibility) -> Self {
        Self::with_creation(ElementKey::vertex(id), Creation::Vertex { visibility })
    }

    /// Create an edge between two existing vertices.
    pub fn edge(
        id: impl Into<ElementId>,
        out_vertex_id: impl Into<ElementId>,
        in_vertex_id: impl Into<ElementId>,
        label: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        let (out_vertex_id, in_vertex_id, label) =
            (out_vertex_id.into(), in_vertex_id.into(), label.into());
        Self::with_creation(
            ElementKey::edge(id),
            Creation::Edge {
                out_vertex_id,
                in_vertex_id,
                label,
                visibility,
            },
        )
    }

    /// Change an element that must already exist.
    pub fn existing(key: ElementKey) -> Self {
        Self::with_creation(key, Creation::Existing)
    }

    fn with_creation(key: ElementKey, creation: Creation) -> Self {
        Self {
            key,
            creation,
            ops: Vec::new(),
            extended: Vec::new(),
        }
    }

    pub fn key(&self) -> &ElementKey {
        &self.key
    }

    /// Set the current value of the (key, name, visibility) property.
    pub fn set_property(
        self,
        key: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Value>,
        visibility: Visibility,
    ) -> Self {
        self.set_property_with_metadata(key, name, value, visibility, Vec::new())
    }

    /// Like `set_property`; metadata entries with the same (key, visibility)
    /// collapse to the last one given.
    pub fn set_property_with_metadata(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Value>,
        visibility: Visibility,
        metadata: Vec<MetadataEntry>,
    ) -> Self {
        self.ops.push(Op::SetProperty {
            key: key.into(),
            name: name.into(),
            value: value.into(),
            metadata,
            visibility,
        });
        self
    }

    pub fn soft_delete_property(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        self.ops
            .push(Op::SoftDeleteProperty(PropertyIdentity::new(key, name, visibility)));
        self
    }

    /// Move a property to a new visibility, keeping its value and the metadata
    /// the saving caller can read.
    pub fn alter_property_visibility(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        from: Visibility,
        to: Visibility,
    ) -> Self {
        self.ops.push(Op::AlterPropertyVisibility {
            property: PropertyIdentity::new(key, name, from),
            visibility: to,
        });
        self
    }

    pub fn mark_property_hidden(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        property_visibility: Visibility,
        visibility: Visibility,
    ) -> Self {
        self.ops.push(Op::PropertyHidden {
            property: PropertyIdentity::new(key, name, property_visibility),
            visibility,
            hidden: true,
        });
        self
    }

    pub fn mark_property_visible(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        property_visibility: Visibility,
        visibility: Visibility,
    ) -> Self {
        self.ops.push(Op::PropertyHidden {
            property: PropertyIdentity::new(key, name, property_visibility),
            visibility,
            hidden: false,
        });
        self
    }

    pub fn alter_element_visibility(mut self, visibility: Visibility) -> Self {
        self.ops.push(Op::AlterVisibility(visibility));
        self
    }

    /// Edges only; `save` rejects a relabel on a vertex.
    pub fn alter_edge_label(mut self, label: impl Into<String>) -> Self {
        self.ops.push(Op::AlterEdgeLabel(label.into()));
        self
    }

    pub fn mark_hidden(mut self, visibility: Visibility) -> Self {
        self.ops.push(Op::Hidden {
            visibility,
            hidden: true,
        });
        self
    }

    pub fn mark_visible(mut self, visibility: Visibility) -> Self {
        self.ops.push(Op::Hidden {
            visibility,
            hidden: false,
        });
        self
    }

    pub fn add_additional_visibility(mut self, label: impl Into<String>) -> Self {
        self.ops.push(Op::AdditionalVisibility {
            label: label.into(),
            granted: true,
        });
        self
    }

    pub fn delete_additional_visibility(mut self, label: impl Into<String>) -> Self {
        self.ops.push(Op::AdditionalVisibility {
            label: label.into(),
            granted: false,
        });
        self
    }

    pub fn add_extended_data(
        mut self,
        table: impl Into<String>,
        row_id: impl Into<String>,
        column: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
        visibility: Visibility,
    ) -> Self {
        self.extended.push(ExtendedOp::Write(ExtendedDataWrite {
            table: table.into(),
            row_id: row_id.into(),
            column: column.into(),
            key: key.into(),
            value: value.into(),
            visibility,
        }));
        self
    }

    pub fn delete_extended_data(
        mut self,
        table: impl Into<String>,
        row_id: impl Into<String>,
        column: impl Into<String>,
        key: impl Into<String>,
        visibility: Visibility,
    ) -> Self {
        self.extended.push(ExtendedOp::Delete(ExtendedDataDelete {
            table: table.into(),
            row_id: row_id.into(),
            column: column.into(),
            key: key.into(),
            visibility,
        }));
        self
    }

    pub fn add_extended_data_additional_visibility(
        mut self,
        table: impl Into<String>,
        row_id: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        self.extended.push(ExtendedOp::AdditionalVisibility {
            table: table.into(),
            row_id: row_id.into(),
            label: label.into(),
            granted: true,
        });
        self
    }

    pub fn delete_extended_data_additional_visibility(
        mut self,
        table: impl Into<String>,
        row_id: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        self.extended.push(ExtendedOp::AdditionalVisibility {
            table: table.into(),
            row_id: row_id.into(),
            label: label.into(),
            granted: false,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.creation, Creation::Existing) && self.ops.is_empty() && self.extended.is_empty()
    }
}

/// Forward builder calls to the wrapped [`ElementWrite`].
macro_rules! forward_builder {
    ($( $(#[$meta:meta])* fn $name:ident($($arg:ident: $ty:ty),*); )*) => {
        $(
            $(#[$meta])*
            pub fn $name(mut self, $($arg: $ty),*) -> Self {
                self.write = self.write.$name($($arg),*);
                self
            }
        )*
    };
}

/// An [`ElementWrite`] bound to the graph it will be saved to.
pub struct ElementMutation<'g, B: Backend> {
    graph: &'g Graph<B>,
    write: ElementWrite,
}

impl<'g, B: Backend> ElementMutation<'g, B> {
    pub(crate) fn new(graph: &'g Graph<B>, write: ElementWrite) -> Self {
        Self { graph, write }
    }

    pub fn key(&self) -> &ElementKey {
        self.write.key()
    }

    /// Detach from the graph, e.g. to send through a [`Writer`](crate::writer::Writer).
    pub fn into_write(self) -> ElementWrite {
        self.write
    }

    forward_builder! {
        fn set_property(key: impl Into<String>, name: impl Into<String>, value: impl Into<Value>, visibility: Visibility);
        fn set_property_with_metadata(key: impl Into<String>, name: impl Into<String>, value: impl Into<Value>, visibility: Visibility, metadata: Vec<MetadataEntry>);
        fn soft_delete_property(key: impl Into<String>, name: impl Into<String>, visibility: Visibility);
        fn alter_property_visibility(key: impl Into<String>, name: impl Into<String>, from: Visibility, to: Visibility);
        fn mark_property_hidden(key: impl Into<String>, name: impl Into<String>, property_visibility: Visibility, visibility: Visibility);
        fn mark_property_visible(key: impl Into<String>, name: impl Into<String>, property_visibility: Visibility, visibility: Visibility);
        fn alter_element_visibility(visibility: Visibility);
        fn alter_edge_label(label: impl Into<String>);
        fn mark_hidden(visibility: Visibility);
        fn mark_visible(visibility: Visibility);
        fn add_additional_visibility(label: impl Into<String>);
        fn delete_additional_visibility(label: impl Into<String>);
        fn add_extended_data(table: impl Into<String>, row_id: impl Into<String>, column: impl Into<String>, key: impl Into<String>, value: impl Into<Value>, visibility: Visibility);
        fn delete_extended_data(table: impl Into<String>, row_id: impl Into<String>, column: impl Into<String>, key: impl Into<String>, visibility: Visibility);
        fn add_extended_data_additional_visibility(table: impl Into<String>, row_id: impl Into<String>, label: impl Into<String>);
        fn delete_extended_data_additional_visibility(table: impl Into<String>, row_id: impl Into<String>, label: impl Into<String>);
    }

    /// Stamp, append and reindex.
    pub fn save(self, authorizations: &Authorizations) -> Result<SaveReport> {
        self.graph.apply(self.write, authorizations)
    }
}

impl<B: Backend> Graph<B> {
    /// Stamp, append and reindex one element write.
    ///
    /// A new edge's endpoints must be visible to `authorizations`. The
    /// element's mutations are stamped and appended under its lock; the
    /// endpoints' edge references are updated afterwards.
    #[tracing::instrument(skip_all, fields(element = %write.key, ops = write.ops.len()))]
    pub fn apply(&self, write: ElementWrite, authorizations: &Authorizations) -> Result<SaveReport> {
        let graph = self;
        let ElementWrite {
            key,
            creation,
            ops,
            extended,
        } = write;

        if let Creation::Edge {
            out_vertex_id,
            in_vertex_id,
            ..
        } = &creation
        {
            let endpoint_read = ReadOptions::new(authorizations.clone())
                .with_fetch_hints(FetchHints::NONE.with_hidden(true));
            for endpoint in [out_vertex_id, in_vertex_id] {
                if graph.get_vertex(endpoint, &endpoint_read)?.is_none() {
                    return Err(Error::invalid(format!(
                        "edge {} references missing vertex {}",
                        key.id, endpoint
                    )));
                }
            }
        }

        let staged = {
            let lock = graph.element_lock(&key);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let existing = graph.backend().load(&key)?;
            let staged = Stager::new(graph, &key, authorizations, existing.as_ref())
                .stage(creation, ops, extended)?;
            graph.backend().append(&key, staged.mutations.clone())?;
            for (row, mutations) in &staged.rows {
                graph.backend().append_row(row, mutations.clone())?;
            }
            staged
        };
        tracing::debug!(
            mutations = staged.mutations.len(),
            rows = staged.rows.len(),
            "[graph] Saved element"
        );

        if let Some(cascade) = &staged.edge {
            cascade_edge_refs(graph, &key.id, cascade)?;
        }

        let index_error = reindex(graph, &key, authorizations, &staged.deleted_properties)?;
        Ok(SaveReport {
            element: key,
            index_error,
        })
    }
}

/// Edge state the endpoints' references must reflect after a save.
struct EdgeCascade {
    out_vertex_id: ElementId,
    in_vertex_id: ElementId,
    label: String,
    visibility: Visibility,
    /// Set when the references must be (re)written.
    rewrite: bool,
    /// Visibility the references were previously written under, when it changed.
    moved_from: Option<Visibility>,
    hidden: Vec<(Visibility, bool)>,
}

struct Staged {
    mutations: Vec<Mutation>,
    rows: BTreeMap<ExtendedRowKey, Vec<ExtendedDataMutation>>,
    deleted_properties: Vec<PropertyIdentity>,
    edge: Option<EdgeCascade>,
}

/// Turns queued operations into stamped mutations against one loaded timeline.
struct Stager<'a, B: Backend> {
    graph: &'a Graph<B>,
    key: &'a ElementKey,
    existing: Option<&'a Timeline<Mutation>>,
    /// The element as the saving caller sees it, hidden parts included.
    view: Option<Element>,
    mutations: Vec<Mutation>,
}

impl<'a, B: Backend> Stager<'a, B> {
    fn new(
        graph: &'a Graph<B>,
        key: &'a ElementKey,
        authorizations: &Authorizations,
        existing: Option<&'a Timeline<Mutation>>,
    ) -> Self {
        let options = ReadOptions::new(authorizations.clone())
            .with_fetch_hints(FetchHints::ALL_INCLUDING_HIDDEN);
        let view = existing.and_then(|timeline| materialize(key, timeline, &options));
        Self {
            graph,
            key,
            existing,
            view,
            mutations: Vec::new(),
        }
    }

    fn tick(&self) -> Timestamp {
        self.graph.clock().now()
    }

    fn last_of(&self, kind: MutationKind) -> Option<&'a Mutation> {
        self.existing.and_then(|timeline| timeline.find_last(kind))
    }

    fn stored_visibility(&self) -> Option<Visibility> {
        match self.last_of(MutationKind::AlterVisibility)? {
            Mutation::AlterVisibility(m) => Some(m.visibility.clone()),
            _ => None,
        }
    }

    /// Soft deleted as of now, whoever deleted it.
    fn stored_deleted(&self) -> bool {
        self.existing
            .is_some_and(|history| timeline::is_deleted(history.iter(), |_| true))
    }

    fn stored_setup(&self) -> Option<&'a EdgeSetup> {
        match self.last_of(MutationKind::EdgeSetup)? {
            Mutation::EdgeSetup(m) => Some(m),
            _ => None,
        }
    }

    fn stored_label(&self) -> Option<String> {
        match self.last_of(MutationKind::AlterEdgeLabel)? {
            Mutation::AlterEdgeLabel(m) => Some(m.label.clone()),
            _ => None,
        }
    }

    /// Current value of `property`: staged in this save, else as the caller reads it.
    fn current_value(&self, property: &PropertyIdentity) -> Option<(PropertyValue, Vec<MetadataEntry>)> {
        for mutation in self.mutations.iter().rev() {
            if mutation.property_identity().as_ref() != Some(property) {
                continue;
            }
            match mutation {
                Mutation::AddPropertyValue(add) => {
                    return Some((add.value.clone(), add.metadata.clone()))
                }
                Mutation::SoftDeleteProperty(_) => return None,
                _ => {}
            }
        }
        let view = self.view.as_ref()?;
        let found = view
            .property_by_identity(&property.key, &property.name, &property.visibility)
            .ok()??;
        Some((found.value.clone(), found.metadata.clone()))
    }

    fn stage(
        mut self,
        creation: Creation,
        ops: Vec<Op>,
        extended: Vec<ExtendedOp>,
    ) -> Result<Staged> {
        let stored_visibility = self.stored_visibility();
        let mut visibility = match (&creation, &stored_visibility) {
            (Creation::Existing, Some(current)) => current.clone(),
            (Creation::Existing, None) => {
                return Err(Error::invalid(format!("{} does not exist", self.key)))
            }
            (Creation::Vertex { visibility } | Creation::Edge { visibility, .. }, _) => {
                visibility.clone()
            }
        };
        if stored_visibility.as_ref() != Some(&visibility) {
            self.mutations.push(Mutation::AlterVisibility(AlterVisibility {
                timestamp: self.tick(),
                visibility: visibility.clone(),
                data: None,
            }));
        }

        let mut edge = match (&creation, self.key.element_type) {
            (
                Creation::Edge {
                    out_vertex_id,
                    in_vertex_id,
                    label,
                    ..
                },
                _,
            ) => Some(self.stage_edge_creation(out_vertex_id, in_vertex_id, label, &visibility)?),
            (Creation::Existing, ElementType::Edge) => {
                let setup = self
                    .stored_setup()
                    .ok_or_else(|| Error::integrity(format!("{} has no edge setup", self.key)))?;
                Some(EdgeCascade {
                    out_vertex_id: setup.out_vertex_id.clone(),
                    in_vertex_id: setup.in_vertex_id.clone(),
                    label: self.stored_label().unwrap_or_default(),
                    visibility: visibility.clone(),
                    rewrite: false,
                    moved_from: None,
                    hidden: Vec::new(),
                })
            }
            _ => None,
        };
        if let (Some(cascade), Some(stored)) = (edge.as_mut(), &stored_visibility) {
            if stored != &visibility {
                cascade.moved_from = Some(stored.clone());
            }
        }

        let mut deleted_properties = Vec::new();
        for op in ops {
            match op {
                Op::SetProperty {
                    key,
                    name,
                    value,
                    metadata,
                    visibility,
                } => {
                    let timestamp = self.tick();
                    let value = blob::spill(
                        value,
                        self.graph.config().max_inline_value_bytes,
                        self.graph.blobs(),
                        timestamp,
                    )?;
                    self.mutations.push(Mutation::AddPropertyValue(AddPropertyValue {
                        key,
                        name,
                        value: PropertyValue::eager(value),
                        metadata: normalize_metadata(metadata),
                        visibility,
                        timestamp,
                    }));
                }
                Op::SoftDeleteProperty(property) => {
                    self.mutations
                        .push(Mutation::SoftDeleteProperty(SoftDeleteProperty {
                            key: property.key.clone(),
                            name: property.name.clone(),
                            visibility: property.visibility.clone(),
                            timestamp: self.tick(),
                            data: None,
                        }));
                    deleted_properties.push(property);
                }
                Op::AlterPropertyVisibility {
                    property,
                    visibility: to,
                } => {
                    if property.visibility == to {
                        continue;
                    }
                    let (value, metadata) = self.current_value(&property).ok_or_else(|| {
                        Error::invalid(format!("{} has no property {}", self.key, property))
                    })?;
                    self.mutations
                        .push(Mutation::SoftDeleteProperty(SoftDeleteProperty {
                            key: property.key.clone(),
                            name: property.name.clone(),
                            visibility: property.visibility.clone(),
                            timestamp: self.tick(),
                            data: None,
                        }));
                    self.mutations.push(Mutation::AddPropertyValue(AddPropertyValue {
                        key: property.key.clone(),
                        name: property.name.clone(),
                        value,
                        metadata,
                        visibility: to,
                        timestamp: self.tick(),
                    }));
                    deleted_properties.push(property);
                }
                Op::PropertyHidden {
                    property,
                    visibility,
                    hidden,
                } => {
                    let toggle = PropertyHiddenToggle {
                        key: property.key,
                        name: property.name,
                        property_visibility: property.visibility,
                        timestamp: self.tick(),
                        visibility,
                        data: None,
                    };
                    self.mutations.push(if hidden {
                        Mutation::MarkPropertyHidden(toggle)
                    } else {
                        Mutation::MarkPropertyVisible(toggle)
                    });
                }
                Op::AlterVisibility(to) => {
                    if to == visibility {
                        continue;
                    }
                    self.mutations.push(Mutation::AlterVisibility(AlterVisibility {
                        timestamp: self.tick(),
                        visibility: to.clone(),
                        data: None,
                    }));
                    if let Some(cascade) = edge.as_mut() {
                        cascade.moved_from.get_or_insert_with(|| visibility.clone());
                        cascade.visibility = to.clone();
                        // The label must stay readable under the new visibility.
                        self.mutations.push(Mutation::AlterEdgeLabel(AlterEdgeLabel {
                            timestamp: self.tick(),
                            label: cascade.label.clone(),
                            visibility: to.clone(),
                        }));
                    }
                    visibility = to;
                }
                Op::AlterEdgeLabel(label) => {
                    let cascade = edge.as_mut().ok_or_else(|| {
                        Error::invalid(format!("{} is not an edge and has no label", self.key))
                    })?;
                    if cascade.label == label {
                        continue;
                    }
                    cascade.label = label.clone();
                    cascade.rewrite = true;
                    self.mutations.push(Mutation::AlterEdgeLabel(AlterEdgeLabel {
                        timestamp: self.tick(),
                        label,
                        visibility: visibility.clone(),
                    }));
                }
                Op::Hidden {
                    visibility: marker,
                    hidden,
                } => {
                    let toggle = HiddenToggle {
                        timestamp: self.tick(),
                        visibility: marker.clone(),
                        data: None,
                    };
                    self.mutations.push(if hidden {
                        Mutation::MarkHidden(toggle)
                    } else {
                        Mutation::MarkVisible(toggle)
                    });
                    if let Some(cascade) = edge.as_mut() {
                        cascade.hidden.push((marker, hidden));
                    }
                }
                Op::AdditionalVisibility { label, granted } => {
                    let change = AdditionalVisibilityChange {
                        timestamp: self.tick(),
                        label,
                        data: None,
                    };
                    self.mutations.push(if granted {
                        Mutation::AddAdditionalVisibility(change)
                    } else {
                        Mutation::DeleteAdditionalVisibility(change)
                    });
                }
            }
        }

        if let Some(cascade) = edge.as_mut() {
            if cascade.moved_from.as_ref() == Some(&cascade.visibility) {
                cascade.moved_from = None;
            }
            if cascade.moved_from.is_some() {
                cascade.rewrite = true;
            }
        }

        let rows = self.stage_extended(extended)?;

        self.mutations.push(Mutation::ElementTimestamp(ElementTimestamp {
            timestamp: self.tick(),
            visibility,
        }));

        Ok(Staged {
            mutations: self.mutations,
            rows,
            deleted_properties,
            edge,
        })
    }

    fn stage_edge_creation(
        &mut self,
        out_vertex_id: &ElementId,
        in_vertex_id: &ElementId,
        label: &str,
        visibility: &Visibility,
    ) -> Result<EdgeCascade> {
        let created = match self.stored_setup() {
            Some(setup) => {
                if &setup.out_vertex_id != out_vertex_id || &setup.in_vertex_id != in_vertex_id {
                    return Err(Error::invalid(format!(
                        "{} already connects {} -> {}",
                        self.key, setup.out_vertex_id, setup.in_vertex_id
                    )));
                }
                false
            }
            None => {
                self.mutations.push(Mutation::EdgeSetup(EdgeSetup {
                    timestamp: self.tick(),
                    out_vertex_id: out_vertex_id.clone(),
                    in_vertex_id: in_vertex_id.clone(),
                    visibility: visibility.clone(),
                }));
                true
            }
        };
        let relabeled = self.stored_label().as_deref() != Some(label)
            || self.stored_visibility().as_ref() != Some(visibility);
        // Soft deleting the edge dropped its endpoint refs; recreating restores them.
        let revived = self.stored_deleted();
        if created || relabeled {
            self.mutations.push(Mutation::AlterEdgeLabel(AlterEdgeLabel {
                timestamp: self.tick(),
                label: label.to_string(),
                visibility: visibility.clone(),
            }));
        }
        Ok(EdgeCascade {
            out_vertex_id: out_vertex_id.clone(),
            in_vertex_id: in_vertex_id.clone(),
            label: label.to_string(),
            visibility: visibility.clone(),
            rewrite: created || relabeled || revived,
            moved_from: None,
            hidden: Vec::new(),
        })
    }

    fn stage_extended(
        &mut self,
        extended: Vec<ExtendedOp>,
    ) -> Result<BTreeMap<ExtendedRowKey, Vec<ExtendedDataMutation>>> {
        let mut rows: BTreeMap<ExtendedRowKey, Vec<ExtendedDataMutation>> = BTreeMap::new();
        let mut markers: BTreeSet<(String, Visibility)> = BTreeSet::new();
        for op in extended {
            let timestamp = self.tick();
            let (row, mutation) = match op {
                ExtendedOp::Write(write) => {
                    let value = blob::spill(
                        write.value,
                        self.graph.config().max_inline_value_bytes,
                        self.graph.blobs(),
                        timestamp,
                    )?;
                    markers.insert((write.table.clone(), write.visibility.clone()));
                    (
                        ExtendedRowKey::new(self.key.clone(), write.table, write.row_id),
                        ExtendedDataMutation::AddColumn(AddColumn {
                            column: write.column,
                            key: write.key,
                            value: PropertyValue::eager(value),
                            visibility: write.visibility,
                            timestamp,
                        }),
                    )
                }
                ExtendedOp::Delete(delete) => (
                    ExtendedRowKey::new(self.key.clone(), delete.table, delete.row_id),
                    ExtendedDataMutation::DeleteColumn(DeleteColumn {
                        column: delete.column,
                        key: delete.key,
                        visibility: delete.visibility,
                        timestamp,
                    }),
                ),
                ExtendedOp::AdditionalVisibility {
                    table,
                    row_id,
                    label,
                    granted,
                } => {
                    let change = AdditionalVisibilityChange {
                        timestamp,
                        label,
                        data: None,
                    };
                    (
                        ExtendedRowKey::new(self.key.clone(), table, row_id),
                        if granted {
                            ExtendedDataMutation::AddAdditionalVisibility(change)
                        } else {
                            ExtendedDataMutation::DeleteAdditionalVisibility(change)
                        },
                    )
                }
            };
            rows.entry(row).or_default().push(mutation);
        }
        for (table, visibility) in markers {
            self.mutations
                .push(Mutation::ExtendedDataMarker(ExtendedDataMarker {
                    table,
                    visibility,
                    timestamp: self.tick(),
                }));
        }
        Ok(rows)
    }
}

/// Sort by (key, visibility); a repeated coordinate keeps the last entry.
fn normalize_metadata(entries: Vec<MetadataEntry>) -> Vec<MetadataEntry> {
    let mut by_coordinate: BTreeMap<(String, Visibility), MetadataEntry> = BTreeMap::new();
    for entry in entries {
        by_coordinate.insert((entry.key.clone(), entry.visibility.clone()), entry);
    }
    by_coordinate.into_values().collect()
}

fn cascade_edge_refs<B: Backend>(graph: &Graph<B>, edge_id: &ElementId, cascade: &EdgeCascade) -> Result<()> {
    if !cascade.rewrite && cascade.hidden.is_empty() {
        return Ok(());
    }
    for (vertex_id, other_vertex_id, direction) in [
        (&cascade.out_vertex_id, &cascade.in_vertex_id, Direction::Out),
        (&cascade.in_vertex_id, &cascade.out_vertex_id, Direction::In),
    ] {
        graph.append_locked(&ElementKey::vertex(vertex_id.clone()), |clock, existing| {
            let mut mutations = Vec::new();
            if existing.is_none() {
                return Ok(mutations);
            }
            if let Some(previous) = &cascade.moved_from {
                mutations.push(Mutation::SoftDeleteEdgeRef(SoftDeleteEdgeRef {
                    direction,
                    edge_id: edge_id.clone(),
                    visibility: previous.clone(),
                    timestamp: clock.now(),
                    data: None,
                }));
            }
            if cascade.rewrite {
                mutations.push(Mutation::AddEdgeRef(AddEdgeRef {
                    direction,
                    edge_id: edge_id.clone(),
                    label: cascade.label.clone(),
                    other_vertex_id: other_vertex_id.clone(),
                    visibility: cascade.visibility.clone(),
                    timestamp: clock.now(),
                }));
            }
            for (marker, hidden) in &cascade.hidden {
                let toggle = EdgeRefHiddenToggle {
                    direction,
                    edge_id: edge_id.clone(),
                    visibility: marker.clone(),
                    timestamp: clock.now(),
                    data: None,
                };
                mutations.push(if *hidden {
                    Mutation::MarkEdgeRefHidden(toggle)
                } else {
                    Mutation::MarkEdgeRefVisible(toggle)
                });
            }
            Ok(mutations)
        })?;
    }
    Ok(())
}

/// Push the saved element to the search index. Failures are reported, not raised.
fn reindex<B: Backend>(
    graph: &Graph<B>,
    key: &ElementKey,
    authorizations: &Authorizations,
    deleted_properties: &[PropertyIdentity],
) -> Result<Option<String>> {
    let mut first_error = None;
    if let Some(element) = graph.get_element(key, &ReadOptions::new(authorizations.clone()))? {
        first_error = graph.report_index(graph.index().add_element(&element, authorizations), key);
    }
    for property in deleted_properties {
        let error = graph.report_index(
            graph.index().delete_property(key, property, authorizations),
            key,
        );
        first_error = first_error.or(error);
    }
    Ok(first_error)
}
