// End-to-end visibility scenarios, run on both backends.

mod support;

use cellgraph_db::clock::Timestamp;
use cellgraph_db::id::ExtendedRowKey;
use cellgraph_db::mutation::{AddPropertyValue, Mutation, SoftDeleteProperty};
use cellgraph_db::value::PropertyValue;
use cellgraph_db::{Backend, Direction, ElementId, ElementKey, Graph, Value};

use support::{auths, cell_graph, memory_graph, read, vis};

fn element_visibility_is_checked_before_properties<B: Backend>(graph: &Graph<B>) {
    graph
        .prepare_vertex("v1", vis("admin"))
        .set_property("k", "name", "Alice", vis(""))
        .save(&auths(&["admin"]))
        .unwrap();

    let vertex = graph
        .get_vertex(&"v1".into(), &read(&["admin"]))
        .unwrap()
        .expect("admin reads v1");
    assert_eq!(
        vertex.property_value("name").unwrap(),
        Some(&Value::from("Alice"))
    );

    assert!(graph.get_vertex(&"v1".into(), &read(&[])).unwrap().is_none());
    assert!(graph
        .get_vertex(&"v1".into(), &read(&["guest"]))
        .unwrap()
        .is_none());
}

fn soft_deleted_edge_leaves_adjacency<B: Backend>(graph: &Graph<B>) {
    let a = auths(&[]);
    graph.prepare_vertex("v1", vis("")).save(&a).unwrap();
    graph.prepare_vertex("v2", vis("")).save(&a).unwrap();
    graph
        .prepare_edge("e1", "v1", "v2", "knows", vis(""))
        .save(&a)
        .unwrap();

    let out = |include_hidden: bool| {
        graph
            .get_vertex(&"v1".into(), &read(&[]).include_hidden(include_hidden))
            .unwrap()
            .unwrap()
            .edge_ids(Direction::Out, &[])
            .unwrap()
    };
    assert_eq!(out(false), vec![ElementId::new("e1")]);

    assert!(graph.soft_delete_edge(&"e1".into(), &a).unwrap());
    assert!(out(false).is_empty());
    assert!(out(true).is_empty());
    assert!(graph.get_edge(&"e1".into(), &read(&[]).include_hidden(true)).unwrap().is_none());
}

fn hidden_property_needs_marker_visibility<B: Backend>(graph: &Graph<B>) {
    let a = auths(&["secret"]);
    graph
        .prepare_vertex("v1", vis(""))
        .set_property("k", "p", 42i64, vis(""))
        .save(&a)
        .unwrap();
    graph
        .vertex_mutation("v1")
        .mark_property_hidden("k", "p", vis(""), vis("secret"))
        .save(&a)
        .unwrap();

    let p = |labels: &[&str], include_hidden: bool| {
        graph
            .get_vertex(&"v1".into(), &read(labels).include_hidden(include_hidden))
            .unwrap()
            .unwrap()
            .property("p")
            .unwrap()
            .cloned()
    };
    assert!(p(&["secret"], false).is_none());
    let shown = p(&["secret"], true).unwrap();
    assert!(shown.is_hidden());
    assert!(p(&[], false).is_none());
    assert!(p(&[], true).is_none());

    graph
        .vertex_mutation("v1")
        .mark_property_visible("k", "p", vis(""), vis("secret"))
        .save(&a)
        .unwrap();
    assert!(p(&[], false).is_some());
}

fn identical_timestamps_resolve_to_arrival_order<B: Backend>(graph: &Graph<B>) {
    graph.prepare_vertex("v1", vis("")).save(&auths(&[])).unwrap();

    let key = ElementKey::vertex("v1");
    let at = Timestamp(5_000);
    for value in ["first", "second"] {
        graph
            .backend()
            .append(
                &key,
                vec![Mutation::AddPropertyValue(AddPropertyValue {
                    key: "k".into(),
                    name: "p".into(),
                    value: PropertyValue::eager(Value::from(value)),
                    metadata: Vec::new(),
                    visibility: vis(""),
                    timestamp: at,
                })],
            )
            .unwrap();
    }

    for _ in 0..3 {
        let vertex = graph.get_vertex(&"v1".into(), &read(&[])).unwrap().unwrap();
        assert_eq!(
            vertex.property_value("p").unwrap(),
            Some(&Value::from("second"))
        );
        assert_eq!(vertex.properties().unwrap().len(), 1);
    }
}

fn ties_across_families_resolve_to_arrival_order<B: Backend>(graph: &Graph<B>) {
    graph.prepare_vertex("v1", vis("")).save(&auths(&[])).unwrap();

    let key = ElementKey::vertex("v1");
    let at = Timestamp(5_000);
    let append = |mutation: Mutation| graph.backend().append(&key, vec![mutation]).unwrap();
    let delete = || {
        Mutation::SoftDeleteProperty(SoftDeleteProperty {
            key: "k".into(),
            name: "p".into(),
            visibility: vis(""),
            timestamp: at,
            data: None,
        })
    };
    let add = || {
        Mutation::AddPropertyValue(AddPropertyValue {
            key: "k".into(),
            name: "p".into(),
            value: PropertyValue::eager(Value::from("x")),
            metadata: Vec::new(),
            visibility: vis(""),
            timestamp: at,
        })
    };
    let value = || {
        graph
            .get_vertex(&"v1".into(), &read(&[]))
            .unwrap()
            .unwrap()
            .property_value("p")
            .unwrap()
            .cloned()
    };

    append(delete());
    append(add());
    assert_eq!(value(), Some(Value::from("x")));

    append(delete());
    assert_eq!(value(), None);
}

fn recreated_edge_restores_adjacency<B: Backend>(graph: &Graph<B>) {
    let a = auths(&[]);
    graph.prepare_vertex("v1", vis("")).save(&a).unwrap();
    graph.prepare_vertex("v2", vis("")).save(&a).unwrap();
    let create = || {
        graph
            .prepare_edge("e1", "v1", "v2", "knows", vis(""))
            .save(&a)
            .unwrap();
    };
    let edges = |id: &str, direction| {
        graph
            .get_vertex(&id.into(), &read(&[]))
            .unwrap()
            .unwrap()
            .edge_ids(direction, &[])
            .unwrap()
    };

    create();
    assert!(graph.soft_delete_edge(&"e1".into(), &a).unwrap());
    assert!(edges("v1", Direction::Out).is_empty());

    create();
    assert!(graph.get_edge(&"e1".into(), &read(&[])).unwrap().is_some());
    assert_eq!(edges("v1", Direction::Out), vec![ElementId::new("e1")]);
    assert_eq!(edges("v2", Direction::In), vec![ElementId::new("e1")]);
    let adjacent = graph
        .get_adjacent_vertices(&"v1".into(), Direction::Out, &[], &read(&[]))
        .unwrap();
    assert_eq!(adjacent.len(), 1);
}

fn extended_rows_follow_owner_access<B: Backend>(graph: &Graph<B>) {
    let admin = auths(&["admin"]);
    graph
        .prepare_vertex("v1", vis("admin"))
        .add_extended_data("logins", "r1", "ip", "", "10.0.0.1", vis(""))
        .save(&admin)
        .unwrap();
    let row = ExtendedRowKey::new(ElementKey::vertex("v1"), "logins", "r1");

    assert!(graph.get_extended_row(&row, &read(&["admin"])).unwrap().is_some());
    assert!(graph.get_extended_row(&row, &read(&[])).unwrap().is_none());
    assert!(graph
        .get_extended_data(&row.element, "logins", &read(&[]))
        .unwrap()
        .is_empty());

    assert!(graph.soft_delete_vertex(&"v1".into(), &admin).unwrap());
    assert!(graph.get_extended_row(&row, &read(&["admin"])).unwrap().is_none());
}

#[test]
fn test_element_visibility_memory() {
    element_visibility_is_checked_before_properties(&memory_graph());
}

#[test]
fn test_element_visibility_cells() {
    element_visibility_is_checked_before_properties(&cell_graph());
}

#[test]
fn test_soft_deleted_edge_memory() {
    soft_deleted_edge_leaves_adjacency(&memory_graph());
}

#[test]
fn test_soft_deleted_edge_cells() {
    soft_deleted_edge_leaves_adjacency(&cell_graph());
}

#[test]
fn test_hidden_property_memory() {
    hidden_property_needs_marker_visibility(&memory_graph());
}

#[test]
fn test_hidden_property_cells() {
    hidden_property_needs_marker_visibility(&cell_graph());
}

#[test]
fn test_timestamp_tie_memory() {
    identical_timestamps_resolve_to_arrival_order(&memory_graph());
}

#[test]
fn test_timestamp_tie_cells() {
    identical_timestamps_resolve_to_arrival_order(&cell_graph());
}

#[test]
fn test_tie_across_families_memory() {
    ties_across_families_resolve_to_arrival_order(&memory_graph());
}

#[test]
fn test_tie_across_families_cells() {
    ties_across_families_resolve_to_arrival_order(&cell_graph());
}

#[test]
fn test_recreated_edge_memory() {
    recreated_edge_restores_adjacency(&memory_graph());
}

#[test]
fn test_recreated_edge_cells() {
    recreated_edge_restores_adjacency(&cell_graph());
}

#[test]
fn test_extended_rows_follow_owner_memory() {
    extended_rows_follow_owner_access(&memory_graph());
}

#[test]
fn test_extended_rows_follow_owner_cells() {
    extended_rows_follow_owner_access(&cell_graph());
}
