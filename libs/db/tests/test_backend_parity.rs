// The memory backend and the cell backend must materialize identical elements
// from the same sequence of writes.

mod support;

use cellgraph_db::clock::Timestamp;
use cellgraph_db::mutation::MetadataEntry;
use cellgraph_db::{Backend, ElementKey, ElementWrite, Graph, ReadOptions};

use support::{auths, cell_graph, memory_graph, read, vis};

fn writes() -> Vec<(ElementWrite, &'static [&'static str])> {
    vec![
        (
            ElementWrite::vertex("v1", vis(""))
                .set_property_with_metadata(
                    "k",
                    "name",
                    "Alice",
                    vis(""),
                    vec![
                        MetadataEntry::new("source", "hr", vis("")),
                        MetadataEntry::new("confidence", 0.9, vis("audit")),
                    ],
                )
                .set_property("k", "salary", 100i64, vis("hr"))
                .set_property("k2", "name", "Al", vis("")),
            &["hr", "audit"],
        ),
        (
            ElementWrite::vertex("v2", vis("a|b"))
                .set_property("k", "name", "Bob", vis("")),
            &["a"],
        ),
        (
            ElementWrite::vertex("v3", vis("")).add_additional_visibility("team"),
            &[],
        ),
        (
            ElementWrite::edge("e12", "v1", "v2", "knows", vis("")),
            &["a"],
        ),
        (
            ElementWrite::edge("e13", "v1", "v3", "likes", vis("x")),
            &["x"],
        ),
        (
            ElementWrite::existing(ElementKey::vertex("v1"))
                .set_property("k", "name", "Alicia", vis(""))
                .soft_delete_property("k2", "name", vis(""))
                .mark_property_hidden("k", "salary", vis("hr"), vis("hr"))
                .add_extended_data("logins", "r1", "ip", "", "10.0.0.1", vis(""))
                .add_extended_data("logins", "r1", "ip", "v6", "::1", vis("net"))
                .add_extended_data("logins", "r2", "ip", "", "10.0.0.2", vis("")),
            &["hr"],
        ),
        (
            ElementWrite::existing(ElementKey::edge("e12")).alter_edge_label("met"),
            &["a"],
        ),
        (
            ElementWrite::existing(ElementKey::edge("e13")).mark_hidden(vis("x")),
            &["x"],
        ),
        (
            ElementWrite::existing(ElementKey::vertex("v1"))
                .delete_extended_data("logins", "r2", "ip", "", vis(""))
                .add_extended_data_additional_visibility("logins", "r1", "ops"),
            &[],
        ),
    ]
}

fn load<B: Backend>(graph: &Graph<B>) {
    for (write, labels) in writes() {
        graph.apply(write, &auths(labels)).unwrap();
    }
}

fn assert_same_view<A: Backend, B: Backend>(
    left: &Graph<A>,
    right: &Graph<B>,
    options: &ReadOptions,
) {
    for id in ["v1", "v2", "v3"] {
        assert_eq!(
            left.get_vertex(&id.into(), options).unwrap(),
            right.get_vertex(&id.into(), options).unwrap(),
            "vertex {} differs under {:?}",
            id,
            options
        );
    }
    for id in ["e12", "e13"] {
        assert_eq!(
            left.get_edge(&id.into(), options).unwrap(),
            right.get_edge(&id.into(), options).unwrap(),
            "edge {} differs under {:?}",
            id,
            options
        );
    }
    let element = ElementKey::vertex("v1");
    assert_eq!(
        left.get_extended_data(&element, "logins", options).unwrap(),
        right.get_extended_data(&element, "logins", options).unwrap()
    );
    assert_eq!(
        left.vertex_ids(options).unwrap(),
        right.vertex_ids(options).unwrap()
    );
    assert_eq!(left.edge_ids(options).unwrap(), right.edge_ids(options).unwrap());
}

#[test]
fn test_backends_materialize_identically() {
    let memory = memory_graph();
    let cells = cell_graph();
    load(&memory);
    load(&cells);

    let label_sets: [&[&str]; 6] = [
        &[],
        &["a"],
        &["hr"],
        &["hr", "audit", "net"],
        &["x", "team", "ops"],
        &["a", "b", "x", "hr", "audit", "net", "team", "ops"],
    ];
    for labels in label_sets {
        assert_same_view(&memory, &cells, &read(labels));
        assert_same_view(&memory, &cells, &read(labels).include_hidden(true));
        assert_same_view(&memory, &cells, &read(labels).as_of(Timestamp(1_004)));
    }
}

#[test]
fn test_parity_survives_deletes() {
    let memory = memory_graph();
    let cells = cell_graph();
    load(&memory);
    load(&cells);

    let a = auths(&["a", "x"]);
    assert!(memory.soft_delete_vertex(&"v2".into(), &a).unwrap());
    assert!(cells.soft_delete_vertex(&"v2".into(), &a).unwrap());
    assert!(memory.delete_edge(&"e13".into(), &a).unwrap());
    assert!(cells.delete_edge(&"e13".into(), &a).unwrap());

    for labels in [&["a", "x"][..], &["hr", "x"][..]] {
        assert_same_view(&memory, &cells, &read(labels));
        assert_same_view(&memory, &cells, &read(labels).include_hidden(true));
    }
    assert!(cells.get_edge(&"e12".into(), &read(&["a"])).unwrap().is_none());
}
