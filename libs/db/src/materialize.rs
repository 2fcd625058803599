//! Element reconstruction: collapse a timeline into what one reader sees.
//!
//! Both backends feed this module the same `Timeline<Mutation>`, so every
//! read-side rule (supersession, hidden toggles, soft deletes, grants) lives here
//! exactly once.

use std::collections::{BTreeMap, BTreeSet};

use crate::clock::Timestamp;
use crate::element::{Edge, EdgeInfo, ElementCore, Element, FetchHints, Property, Vertex};
use crate::extended::{ExtendedColumn, ExtendedDataRow};
use crate::id::{Direction, ElementId, ElementKey, ElementType, ExtendedRowKey};
use crate::mutation::{AddEdgeRef, AddPropertyValue, ExtendedDataMutation, Mutation, PropertyIdentity};
use crate::timeline::{self, Timeline};
use crate::visibility::{Authorizations, Visibility};

/// Read parameters for one materialization.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub authorizations: Authorizations,
    pub as_of: Option<Timestamp>,
    pub fetch_hints: FetchHints,
}

impl ReadOptions {
    pub fn new(authorizations: Authorizations) -> Self {
        Self {
            authorizations,
            as_of: None,
            fetch_hints: FetchHints::ALL,
        }
    }

    pub fn as_of(mut self, as_of: Timestamp) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn with_fetch_hints(mut self, fetch_hints: FetchHints) -> Self {
        self.fetch_hints = fetch_hints;
        self
    }

    pub fn include_hidden(mut self, include_hidden: bool) -> Self {
        self.fetch_hints.include_hidden = include_hidden;
        self
    }
}

/// Cell readability for one element: the expression, or any held grant.
struct Access<'a> {
    authorizations: &'a Authorizations,
    granted: bool,
}

impl Access<'_> {
    fn new<'a>(authorizations: &'a Authorizations, grants: &BTreeSet<String>) -> Access<'a> {
        Access {
            authorizations,
            granted: authorizations.holds_any(grants.iter().map(String::as_str)),
        }
    }

    fn can_read(&self, visibility: &Visibility) -> bool {
        self.authorizations.can_read(visibility) || self.granted
    }

    /// Shown iff there are no hidden markers, or hidden reads were requested
    /// and the caller can read at least one marker.
    ///
    /// A marker the caller cannot read still hides the item, even with
    /// `include_hidden`: a property hidden under "secret" stays invisible to
    /// a caller without "secret" (see `hidden_property_needs_marker_visibility`
    /// in the visibility scenario tests).
    fn passes_hidden(&self, hidden: &BTreeSet<Visibility>, include_hidden: bool) -> bool {
        hidden.is_empty() || (include_hidden && hidden.iter().any(|v| self.can_read(v)))
    }

    fn readable_markers(&self, hidden: &BTreeSet<Visibility>) -> Vec<Visibility> {
        hidden.iter().filter(|v| self.can_read(v)).cloned().collect()
    }
}

/// Toggle a hidden-visibility set.
fn toggle(set: &mut BTreeSet<Visibility>, visibility: &Visibility, hidden: bool) {
    if hidden {
        set.insert(visibility.clone());
    } else {
        set.remove(visibility);
    }
}

pub fn materialize(
    key: &ElementKey,
    timeline: &Timeline<Mutation>,
    options: &ReadOptions,
) -> Option<Element> {
    match key.element_type {
        ElementType::Vertex => materialize_vertex(&key.id, timeline, options).map(Element::Vertex),
        ElementType::Edge => materialize_edge(&key.id, timeline, options).map(Element::Edge),
    }
}

pub fn materialize_vertex(
    id: &ElementId,
    timeline: &Timeline<Mutation>,
    options: &ReadOptions,
) -> Option<Vertex> {
    let view = ElementView::build(timeline, options)?;
    let core = view.core(id, options);
    let edge_infos = options
        .fetch_hints
        .edge_refs
        .then(|| view.edge_infos(options.fetch_hints.include_hidden));
    Some(Vertex { core, edge_infos })
}

pub fn materialize_edge(
    id: &ElementId,
    timeline: &Timeline<Mutation>,
    options: &ReadOptions,
) -> Option<Edge> {
    let view = ElementView::build(timeline, options)?;
    let setup = view.mutations.iter().rev().find_map(|m| match m {
        Mutation::EdgeSetup(setup) => Some(setup),
        _ => None,
    })?;
    let label = view
        .mutations
        .iter()
        .rev()
        .find_map(|m| match m {
            Mutation::AlterEdgeLabel(l) if view.access.can_read(&l.visibility) => {
                Some(l.label.clone())
            }
            _ => None,
        })?;
    Some(Edge {
        out_vertex_id: setup.out_vertex_id.clone(),
        in_vertex_id: setup.in_vertex_id.clone(),
        label,
        core: view.core(id, options),
    })
}

/// Mutations up to the cutoff plus the element-level decisions already made.
struct ElementView<'t> {
    mutations: Vec<&'t Mutation>,
    access: Access<'t>,
    grants: BTreeSet<String>,
    visibility: Visibility,
    hidden: BTreeSet<Visibility>,
    timestamp: Timestamp,
}

impl<'t> ElementView<'t> {
    fn build(timeline: &'t Timeline<Mutation>, options: &'t ReadOptions) -> Option<Self> {
        let first = timeline.first_timestamp()?;
        if matches!(options.as_of, Some(cutoff) if cutoff < first) {
            return None;
        }
        let mutations: Vec<&Mutation> = timeline.as_of(options.as_of).collect();
        let grants = timeline::additional_visibilities(mutations.iter().copied());
        let access = Access::new(&options.authorizations, &grants);

        if timeline::is_deleted(mutations.iter().copied(), |v| access.can_read(v)) {
            return None;
        }

        // Only the latest AlterVisibility is live; superseded ones are unreadable.
        let current = mutations.iter().rev().find_map(|m| match m {
            Mutation::AlterVisibility(a) => Some(a),
            _ => None,
        })?;
        if !access.can_read(&current.visibility) {
            return None;
        }

        let mut hidden = BTreeSet::new();
        let mut timestamp = current.timestamp;
        for mutation in &mutations {
            match mutation {
                Mutation::MarkHidden(m) => toggle(&mut hidden, &m.visibility, true),
                Mutation::MarkVisible(m) => toggle(&mut hidden, &m.visibility, false),
                Mutation::ElementTimestamp(m) if access.can_read(&m.visibility) => {
                    timestamp = timestamp.max(m.timestamp)
                }
                _ => {}
            }
        }
        if !access.passes_hidden(&hidden, options.fetch_hints.include_hidden) {
            return None;
        }

        Some(ElementView {
            visibility: current.visibility.clone(),
            mutations,
            access,
            grants,
            hidden,
            timestamp,
        })
    }

    fn core(&self, id: &ElementId, options: &ReadOptions) -> ElementCore {
        let hints = options.fetch_hints;
        ElementCore {
            id: id.clone(),
            visibility: self.visibility.clone(),
            timestamp: self.timestamp,
            properties: hints.properties.then(|| self.properties(hints.include_hidden)),
            hidden_visibilities: self.access.readable_markers(&self.hidden),
            additional_visibilities: self.grants.clone(),
            extended_table_names: hints.extended_table_names.then(|| self.extended_table_names()),
            fetch_hints: hints,
        }
    }

    fn properties(&self, include_hidden: bool) -> Vec<Property> {
        #[derive(Default)]
        struct State<'m> {
            current: Option<&'m AddPropertyValue>,
            hidden: BTreeSet<Visibility>,
        }

        let mut states: BTreeMap<PropertyIdentity, State> = BTreeMap::new();
        for mutation in &self.mutations {
            let Some(identity) = mutation.property_identity() else {
                continue;
            };
            let state = states.entry(identity).or_default();
            match mutation {
                Mutation::AddPropertyValue(add) => state.current = Some(add),
                Mutation::SoftDeleteProperty(_) => state.current = None,
                Mutation::MarkPropertyHidden(m) => toggle(&mut state.hidden, &m.visibility, true),
                Mutation::MarkPropertyVisible(m) => toggle(&mut state.hidden, &m.visibility, false),
                _ => {}
            }
        }

        states
            .into_values()
            .filter_map(|state| {
                let add = state.current?;
                if !self.access.can_read(&add.visibility)
                    || !self.access.passes_hidden(&state.hidden, include_hidden)
                {
                    return None;
                }
                Some(Property {
                    key: add.key.clone(),
                    name: add.name.clone(),
                    value: add.value.clone(),
                    visibility: add.visibility.clone(),
                    timestamp: add.timestamp,
                    metadata: add
                        .metadata
                        .iter()
                        .filter(|m| self.access.can_read(&m.visibility))
                        .cloned()
                        .collect(),
                    hidden_visibilities: self.access.readable_markers(&state.hidden),
                })
            })
            .collect()
    }

    fn edge_infos(&self, include_hidden: bool) -> Vec<EdgeInfo> {
        let mut refs: BTreeMap<(Direction, ElementId, Visibility), Option<&AddEdgeRef>> =
            BTreeMap::new();
        let mut hidden: BTreeMap<(Direction, ElementId), BTreeSet<Visibility>> = BTreeMap::new();
        for mutation in &self.mutations {
            match mutation {
                Mutation::AddEdgeRef(add) => {
                    refs.insert(
                        (add.direction, add.edge_id.clone(), add.visibility.clone()),
                        Some(add),
                    );
                }
                Mutation::SoftDeleteEdgeRef(del) => {
                    refs.insert(
                        (del.direction, del.edge_id.clone(), del.visibility.clone()),
                        None,
                    );
                }
                Mutation::MarkEdgeRefHidden(m) | Mutation::MarkEdgeRefVisible(m) => {
                    let set = hidden.entry((m.direction, m.edge_id.clone())).or_default();
                    toggle(set, &m.visibility, matches!(mutation, Mutation::MarkEdgeRefHidden(_)));
                }
                _ => {}
            }
        }

        let no_markers = BTreeSet::new();
        refs.into_values()
            .flatten()
            .filter(|add| self.access.can_read(&add.visibility))
            .filter(|add| {
                let markers = hidden
                    .get(&(add.direction, add.edge_id.clone()))
                    .unwrap_or(&no_markers);
                self.access.passes_hidden(markers, include_hidden)
            })
            .map(|add| EdgeInfo {
                edge_id: add.edge_id.clone(),
                direction: add.direction,
                label: add.label.clone(),
                other_vertex_id: add.other_vertex_id.clone(),
                visibility: add.visibility.clone(),
                timestamp: add.timestamp,
            })
            .collect()
    }

    fn extended_table_names(&self) -> BTreeSet<String> {
        self.mutations
            .iter()
            .filter_map(|m| match m {
                Mutation::ExtendedDataMarker(x) if self.access.can_read(&x.visibility) => {
                    Some(x.table.clone())
                }
                _ => None,
            })
            .collect()
    }
}

/// Collapse an extended data row. `None` when no column is current and readable.
pub fn materialize_extended_row(
    key: &ExtendedRowKey,
    timeline: &Timeline<ExtendedDataMutation>,
    authorizations: &Authorizations,
    as_of: Option<Timestamp>,
) -> Option<ExtendedDataRow> {
    let mutations: Vec<&ExtendedDataMutation> = timeline.as_of(as_of).collect();
    let mut grants = BTreeSet::new();
    for mutation in &mutations {
        match mutation {
            ExtendedDataMutation::AddAdditionalVisibility(m) => {
                grants.insert(m.label.clone());
            }
            ExtendedDataMutation::DeleteAdditionalVisibility(m) => {
                grants.remove(&m.label);
            }
            _ => {}
        }
    }
    let access = Access::new(authorizations, &grants);

    let mut columns: BTreeMap<(&str, &str, &Visibility), Option<ExtendedColumn>> = BTreeMap::new();
    for mutation in &mutations {
        match mutation {
            ExtendedDataMutation::AddColumn(add) => {
                columns.insert(
                    (add.column.as_str(), add.key.as_str(), &add.visibility),
                    Some(ExtendedColumn {
                        name: add.column.clone(),
                        key: add.key.clone(),
                        value: add.value.clone(),
                        visibility: add.visibility.clone(),
                        timestamp: add.timestamp,
                    }),
                );
            }
            ExtendedDataMutation::DeleteColumn(del) => {
                columns.insert((del.column.as_str(), del.key.as_str(), &del.visibility), None);
            }
            _ => {}
        }
    }

    let columns: Vec<ExtendedColumn> = columns
        .into_values()
        .flatten()
        .filter(|c| access.can_read(&c.visibility))
        .collect();
    if columns.is_empty() {
        return None;
    }
    Some(ExtendedDataRow {
        key: key.clone(),
        columns,
        additional_visibilities: grants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{
        AlterEdgeLabel, AlterVisibility, EdgeSetup, ElementTimestamp, HiddenToggle,
        MetadataEntry, PropertyHiddenToggle, SoftDelete, SoftDeleteProperty,
    };
    use crate::value::{PropertyValue, Value};

    fn vis(expr: &str) -> Visibility {
        Visibility::new(expr).unwrap()
    }

    fn created(ts: u64, visibility: &str) -> Vec<Mutation> {
        vec![
            Mutation::AlterVisibility(AlterVisibility {
                timestamp: Timestamp(ts),
                visibility: vis(visibility),
                data: None,
            }),
            Mutation::ElementTimestamp(ElementTimestamp {
                timestamp: Timestamp(ts),
                visibility: vis(visibility),
            }),
        ]
    }

    fn add(ts: u64, name: &str, value: &str, visibility: &str) -> Mutation {
        Mutation::AddPropertyValue(AddPropertyValue {
            key: "k".into(),
            name: name.into(),
            value: PropertyValue::eager(Value::from(value)),
            metadata: vec![],
            visibility: vis(visibility),
            timestamp: Timestamp(ts),
        })
    }

    fn read(timeline: &Timeline<Mutation>, auths: &[&str]) -> Option<Vertex> {
        let options = ReadOptions::new(Authorizations::new(auths.iter().copied()));
        materialize_vertex(&ElementId::new("v1"), timeline, &options)
    }

    #[test]
    fn test_soft_delete_then_readd_property() {
        let mut timeline = Timeline::from_mutations(created(1, ""));
        timeline.append(add(2, "name", "Alice", ""));
        timeline.append(Mutation::SoftDeleteProperty(SoftDeleteProperty {
            key: "k".into(),
            name: "name".into(),
            visibility: Visibility::empty(),
            timestamp: Timestamp(3),
            data: None,
        }));
        assert_eq!(read(&timeline, &[]).unwrap().property("name").unwrap(), None);
        timeline.append(add(4, "name", "Bob", ""));
        let vertex = read(&timeline, &[]).unwrap();
        assert_eq!(
            vertex.property_value("name").unwrap(),
            Some(&Value::from("Bob"))
        );
    }

    #[test]
    fn test_as_of_before_creation_is_none() {
        let timeline = Timeline::from_mutations(created(5, ""));
        let options = ReadOptions::new(Authorizations::empty()).as_of(Timestamp(4));
        assert!(materialize_vertex(&ElementId::new("v1"), &timeline, &options).is_none());
        let options = ReadOptions::new(Authorizations::empty()).as_of(Timestamp(5));
        assert!(materialize_vertex(&ElementId::new("v1"), &timeline, &options).is_some());
    }

    #[test]
    fn test_superseded_visibility_is_not_readable() {
        let mut timeline = Timeline::from_mutations(created(1, "a"));
        timeline.append(Mutation::AlterVisibility(AlterVisibility {
            timestamp: Timestamp(2),
            visibility: vis("b"),
            data: None,
        }));
        assert!(read(&timeline, &["a"]).is_none());
        assert_eq!(read(&timeline, &["b"]).unwrap().visibility(), &vis("b"));
        let options = ReadOptions::new(Authorizations::new(["a"])).as_of(Timestamp(1));
        assert!(materialize_vertex(&ElementId::new("v1"), &timeline, &options).is_some());
    }

    #[test]
    fn test_property_hidden_under_secret() {
        let mut timeline = Timeline::from_mutations(created(1, ""));
        timeline.append(add(2, "p", "x", ""));
        timeline.append(Mutation::MarkPropertyHidden(PropertyHiddenToggle {
            key: "k".into(),
            name: "p".into(),
            property_visibility: Visibility::empty(),
            timestamp: Timestamp(3),
            visibility: vis("secret"),
            data: None,
        }));
        let id = ElementId::new("v1");
        let with = |auths: &[&str], hidden: bool| {
            let options =
                ReadOptions::new(Authorizations::new(auths.iter().copied())).include_hidden(hidden);
            materialize_vertex(&id, &timeline, &options)
                .unwrap()
                .property("p")
                .unwrap()
                .cloned()
        };
        assert!(with(&["secret"], false).is_none());
        let shown = with(&["secret"], true).unwrap();
        assert_eq!(shown.hidden_visibilities, vec![vis("secret")]);
        assert!(with(&[], false).is_none());
        assert!(with(&[], true).is_none());
    }

    #[test]
    fn test_hidden_element_requires_include_hidden() {
        let mut timeline = Timeline::from_mutations(created(1, ""));
        timeline.append(Mutation::MarkHidden(HiddenToggle {
            timestamp: Timestamp(2),
            visibility: Visibility::empty(),
            data: None,
        }));
        assert!(read(&timeline, &[]).is_none());
        let options = ReadOptions::new(Authorizations::empty()).include_hidden(true);
        let vertex = materialize_vertex(&ElementId::new("v1"), &timeline, &options).unwrap();
        assert_eq!(vertex.hidden_visibilities(), &[Visibility::empty()]);
        timeline.append(Mutation::MarkVisible(HiddenToggle {
            timestamp: Timestamp(3),
            visibility: Visibility::empty(),
            data: None,
        }));
        assert!(read(&timeline, &[]).is_some());
    }

    #[test]
    fn test_soft_deleted_element_and_touch() {
        let mut timeline = Timeline::from_mutations(created(1, ""));
        timeline.append(Mutation::SoftDelete(SoftDelete {
            timestamp: Timestamp(2),
            visibility: Visibility::empty(),
            data: None,
        }));
        assert!(read(&timeline, &[]).is_none());
        timeline.append(Mutation::ElementTimestamp(ElementTimestamp {
            timestamp: Timestamp(3),
            visibility: Visibility::empty(),
        }));
        assert_eq!(read(&timeline, &[]).unwrap().timestamp(), Timestamp(3));
    }

    #[test]
    fn test_metadata_filtered_by_visibility() {
        let mut timeline = Timeline::from_mutations(created(1, ""));
        timeline.append(Mutation::AddPropertyValue(AddPropertyValue {
            key: "k".into(),
            name: "name".into(),
            value: PropertyValue::eager(Value::from("Alice")),
            metadata: vec![
                MetadataEntry::new("source", "hr", Visibility::empty()),
                MetadataEntry::new("ssn", "123", vis("pii")),
            ],
            visibility: Visibility::empty(),
            timestamp: Timestamp(2),
        }));
        let vertex = read(&timeline, &[]).unwrap();
        let property = vertex.property("name").unwrap().unwrap();
        assert_eq!(property.metadata.len(), 1);
        assert_eq!(property.metadata_value("ssn").unwrap(), None);
        let vertex = read(&timeline, &["pii"]).unwrap();
        assert_eq!(vertex.property("name").unwrap().unwrap().metadata.len(), 2);
    }

    #[test]
    fn test_edge_requires_setup_and_label() {
        let mut timeline = Timeline::from_mutations(created(1, ""));
        let id = ElementId::new("e1");
        let options = ReadOptions::new(Authorizations::empty());
        assert!(materialize_edge(&id, &timeline, &options).is_none());
        timeline.append(Mutation::EdgeSetup(EdgeSetup {
            timestamp: Timestamp(1),
            out_vertex_id: ElementId::new("v1"),
            in_vertex_id: ElementId::new("v2"),
            visibility: Visibility::empty(),
        }));
        timeline.append(Mutation::AlterEdgeLabel(AlterEdgeLabel {
            timestamp: Timestamp(1),
            label: "knows".into(),
            visibility: Visibility::empty(),
        }));
        let edge = materialize_edge(&id, &timeline, &options).unwrap();
        assert_eq!(edge.label(), "knows");
        assert_eq!(edge.other_vertex_id(&ElementId::new("v2")), Some(&ElementId::new("v1")));
    }

    #[test]
    fn test_include_hidden_is_superset() {
        let mut timeline = Timeline::from_mutations(created(1, ""));
        timeline.append(add(2, "a", "1", ""));
        timeline.append(add(3, "b", "2", ""));
        timeline.append(Mutation::MarkPropertyHidden(PropertyHiddenToggle {
            key: "k".into(),
            name: "b".into(),
            property_visibility: Visibility::empty(),
            timestamp: Timestamp(4),
            visibility: Visibility::empty(),
            data: None,
        }));
        let id = ElementId::new("v1");
        let plain = materialize_vertex(&id, &timeline, &ReadOptions::new(Authorizations::empty()))
            .unwrap();
        let all = materialize_vertex(
            &id,
            &timeline,
            &ReadOptions::new(Authorizations::empty()).include_hidden(true),
        )
        .unwrap();
        let names = |v: &Vertex| -> Vec<String> {
            v.properties().unwrap().iter().map(|p| p.name.clone()).collect()
        };
        assert_eq!(names(&plain), vec!["a"]);
        assert_eq!(names(&all), vec!["a", "b"]);
    }
}
