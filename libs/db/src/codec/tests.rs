use super::*;
use crate::codec::names::{IdentitySubstitution, InterningSubstitution};
use crate::materialize::{materialize, materialize_extended_row, ReadOptions};
use crate::value::MessagePackSerializer;
use crate::visibility::Authorizations;

fn vis(expr: &str) -> Visibility {
    Visibility::new(expr).unwrap()
}

fn codec(interning: bool) -> Codec {
    let names: Arc<dyn NameSubstitution> = if interning {
        Arc::new(InterningSubstitution::new())
    } else {
        Arc::new(IdentitySubstitution)
    };
    Codec::new(Arc::new(MessagePackSerializer), names)
}

/// Encode, sort cells the way a store would, decode.
fn roundtrip(codec: &Codec, key: &ElementKey, mutations: &[Mutation]) -> Timeline<Mutation> {
    let mut batch = EncodedBatch::default();
    codec.encode_element(key, 0, mutations, &mut batch).unwrap();
    let mut cells = batch.cells;
    cells.sort_by(|a, b| a.key.encode().cmp(&b.key.encode()));
    codec.decode_element(&cells).unwrap()
}

fn vertex_history() -> Vec<Mutation> {
    let t = |n| Timestamp(n);
    vec![
        Mutation::AlterVisibility(AlterVisibility {
            timestamp: t(1),
            visibility: vis("admin"),
            data: None,
        }),
        Mutation::ElementTimestamp(ElementTimestamp {
            timestamp: t(2),
            visibility: vis("admin"),
        }),
        Mutation::AddPropertyValue(AddPropertyValue {
            key: "k1".into(),
            name: "a property name longer than a token".into(),
            value: PropertyValue::eager(Value::from("Alice")),
            metadata: vec![
                MetadataEntry::new("confidence", 0.5, Visibility::empty()),
                MetadataEntry::new("source", "hr", vis("pii")),
            ],
            visibility: Visibility::empty(),
            timestamp: t(3),
        }),
        Mutation::AddPropertyValue(AddPropertyValue {
            key: "k1".into(),
            name: "age".into(),
            value: PropertyValue::eager(Value::Int(41)),
            metadata: vec![],
            visibility: vis("a|b"),
            timestamp: t(4),
        }),
        Mutation::MarkPropertyHidden(PropertyHiddenToggle {
            key: "k1".into(),
            name: "age".into(),
            property_visibility: vis("a|b"),
            timestamp: t(5),
            visibility: vis("secret"),
            data: Some(Value::from("reason")),
        }),
        Mutation::SoftDeleteProperty(SoftDeleteProperty {
            key: "k2".into(),
            name: "gone".into(),
            visibility: Visibility::empty(),
            timestamp: t(6),
            data: None,
        }),
        Mutation::AddEdgeRef(AddEdgeRef {
            direction: Direction::Out,
            edge_id: ElementId::new("e1"),
            label: "knows".into(),
            other_vertex_id: ElementId::new("v2"),
            visibility: Visibility::empty(),
            timestamp: t(7),
        }),
        Mutation::AddEdgeRef(AddEdgeRef {
            direction: Direction::In,
            edge_id: ElementId::new("e2"),
            label: "likes".into(),
            other_vertex_id: ElementId::new("v3"),
            visibility: Visibility::empty(),
            timestamp: t(8),
        }),
        Mutation::MarkEdgeRefHidden(EdgeRefHiddenToggle {
            direction: Direction::In,
            edge_id: ElementId::new("e2"),
            visibility: Visibility::empty(),
            timestamp: t(9),
            data: None,
        }),
        Mutation::ExtendedDataMarker(ExtendedDataMarker {
            table: "logins".into(),
            visibility: Visibility::empty(),
            timestamp: t(10),
        }),
        Mutation::AddAdditionalVisibility(AdditionalVisibilityChange {
            timestamp: t(11),
            label: "auditor".into(),
            data: None,
        }),
        Mutation::MarkHidden(HiddenToggle {
            timestamp: t(12),
            visibility: vis("ops"),
            data: None,
        }),
        Mutation::MarkVisible(HiddenToggle {
            timestamp: t(13),
            visibility: vis("ops"),
            data: None,
        }),
    ]
}

#[test]
fn test_roundtrip_preserves_every_mutation() {
    for interning in [false, true] {
        let codec = codec(interning);
        let key = ElementKey::vertex("v1");
        let original = vertex_history();
        let decoded = roundtrip(&codec, &key, &original);
        let decoded: Vec<Mutation> = decoded.iter().cloned().collect();
        assert_eq!(decoded, original, "interning={}", interning);
    }
}

#[test]
fn test_roundtrip_materializes_equal_element() {
    let codec = codec(true);
    let key = ElementKey::vertex("v1");
    let original = Timeline::from_mutations(vertex_history());
    let decoded = roundtrip(&codec, &key, &vertex_history());
    for auths in [vec!["admin"], vec!["admin", "a", "pii", "secret"], vec![]] {
        for hidden in [false, true] {
            let options = ReadOptions::new(Authorizations::new(auths.clone())).include_hidden(hidden);
            assert_eq!(
                materialize(&key, &decoded, &options),
                materialize(&key, &original, &options)
            );
        }
    }
}

#[test]
fn test_edge_signal_roundtrip() {
    let codec = codec(false);
    let key = ElementKey::edge("e1");
    let original = vec![
        Mutation::AlterVisibility(AlterVisibility {
            timestamp: Timestamp(1),
            visibility: Visibility::empty(),
            data: Some(Value::Int(3)),
        }),
        Mutation::EdgeSetup(EdgeSetup {
            timestamp: Timestamp(2),
            out_vertex_id: ElementId::new("v\u{0}1"),
            in_vertex_id: ElementId::new("v2"),
            visibility: Visibility::empty(),
        }),
        Mutation::AlterEdgeLabel(AlterEdgeLabel {
            timestamp: Timestamp(3),
            label: "knows".into(),
            visibility: Visibility::empty(),
        }),
        Mutation::SoftDelete(SoftDelete {
            timestamp: Timestamp(4),
            visibility: Visibility::empty(),
            data: None,
        }),
        Mutation::SoftDeleteEdgeRef(SoftDeleteEdgeRef {
            direction: Direction::Out,
            edge_id: ElementId::new("e9"),
            visibility: Visibility::empty(),
            timestamp: Timestamp(5),
            data: None,
        }),
    ];
    let decoded: Vec<Mutation> = roundtrip(&codec, &key, &original).iter().cloned().collect();
    assert_eq!(decoded, original);
}

#[test]
fn test_same_coordinate_same_timestamp_keeps_last_write() {
    let codec = codec(false);
    let key = ElementKey::vertex("v1");
    let write = |seq: u64, value: &str| {
        let mut batch = EncodedBatch::default();
        codec
            .encode_element(
                &key,
                seq,
                &[Mutation::AddPropertyValue(AddPropertyValue {
                    key: "k".into(),
                    name: "p".into(),
                    value: PropertyValue::eager(Value::from(value)),
                    metadata: vec![],
                    visibility: Visibility::empty(),
                    timestamp: Timestamp(7),
                })],
                &mut batch,
            )
            .unwrap();
        batch.cells
    };
    let first = write(0, "first");
    let second = write(1, "second");
    assert_eq!(first[0].key, second[0].key);
}

#[test]
fn test_extended_row_roundtrip() {
    let codec = codec(true);
    let key = ExtendedRowKey {
        element: ElementKey::vertex("v1"),
        table: "login-history".into(),
        row_id: "r1".into(),
    };
    let row = Codec::extended_row(&key);
    assert_eq!(Codec::parse_extended_row(&row).unwrap(), key);
    assert!(row.starts_with(&Codec::extended_row_prefix(&key.element, None)));
    assert!(row.starts_with(&Codec::extended_row_prefix(&key.element, Some("login-history"))));

    let mutations = vec![
        ExtendedDataMutation::AddColumn(AddColumn {
            column: "ip".into(),
            key: "".into(),
            value: PropertyValue::eager(Value::from("10.0.0.1")),
            visibility: Visibility::empty(),
            timestamp: Timestamp(1),
        }),
        ExtendedDataMutation::AddColumn(AddColumn {
            column: "device".into(),
            key: "".into(),
            value: PropertyValue::eager(Value::from("laptop")),
            visibility: vis("ops"),
            timestamp: Timestamp(2),
        }),
        ExtendedDataMutation::DeleteColumn(DeleteColumn {
            column: "ip".into(),
            key: "".into(),
            visibility: Visibility::empty(),
            timestamp: Timestamp(3),
        }),
    ];
    let mut batch = EncodedBatch::default();
    codec.encode_extended(&key, 0, &mutations, &mut batch).unwrap();
    let decoded = codec.decode_extended(&batch.cells).unwrap();
    assert_eq!(decoded.iter().cloned().collect::<Vec<_>>(), mutations);

    let row = materialize_extended_row(&key, &decoded, &Authorizations::new(["ops"]), None).unwrap();
    assert_eq!(row.columns.len(), 1);
    assert_eq!(row.column_value("device").unwrap(), Some(&Value::from("laptop")));
    assert!(materialize_extended_row(&key, &decoded, &Authorizations::empty(), None).is_none());
}

#[test]
fn test_malformed_cells_are_integrity_errors() {
    let codec = codec(false);
    let cell = |family: &[u8], qualifier: &[u8], visibility: &[u8], value: &[u8]| Cell {
        key: CellKey {
            row: b"Vv1".to_vec(),
            family: family.to_vec(),
            qualifier: qualifier.to_vec(),
            visibility: visibility.to_vec(),
            timestamp: Timestamp(1),
        },
        value: value.to_vec(),
    };
    let bad = [
        cell(b"ZZ", b"", b"", b""),
        cell(b"S", b"?", b"", b""),
        cell(b"P", b"\x00\x00\x00\x09k", b"", b""),
        cell(b"H", b"", b"", b""),
        cell(b"XC", &qualifier::join(&["c", "k"]), b"", b""),
        cell(b"PM", &qualifier::join(&["k", "n", "", "m"]), b"", b"x"),
    ];
    for c in bad {
        assert!(
            matches!(codec.decode_element(&[c.clone()]), Err(Error::Integrity(_))),
            "{:?}",
            c
        );
    }
    assert!(matches!(
        codec.decode_element(&[cell(b"P", &qualifier::join(&["k", "n"]), b"a&(", b"")]),
        Err(Error::VisibilityParse { .. })
    ));
}

#[test]
fn test_lazy_values_are_not_decoded_until_read() {
    let codec = codec(false);
    let key = ElementKey::vertex("v1");
    let decoded = roundtrip(&codec, &key, &vertex_history());
    let add = decoded
        .iter()
        .find_map(|m| match m {
            Mutation::AddPropertyValue(a) => Some(a),
            _ => None,
        })
        .unwrap();
    assert!(!add.value.is_resolved());
    assert_eq!(add.value.resolve().unwrap(), &Value::from("Alice"));
}

#[test]
fn test_element_row_parse() {
    let key = ElementKey::edge("e/1");
    assert_eq!(Codec::parse_element_row(&Codec::element_row(&key)).unwrap(), key);
    assert!(Codec::parse_element_row(b"Qx").is_err());
    assert!(Codec::parse_element_row(b"").is_err());
}

#[test]
fn test_metadata_decodes_in_key_order() {
    let codec = codec(true);
    let key = ElementKey::vertex("v1");
    let add = Mutation::AddPropertyValue(AddPropertyValue {
        key: "k".into(),
        name: "n".into(),
        value: PropertyValue::eager(Value::Int(1)),
        metadata: vec![
            MetadataEntry::new("confidence", 0.9, Visibility::empty()),
            MetadataEntry::new("source", "hr", Visibility::empty()),
            MetadataEntry::new("source", "audit", vis("pii")),
        ],
        visibility: Visibility::empty(),
        timestamp: Timestamp(1),
    });
    let decoded = roundtrip(&codec, &key, &[add]);
    let Some(Mutation::AddPropertyValue(add)) = decoded.iter().next() else {
        panic!("expected a property value");
    };
    let keys: Vec<(&str, &str)> = add
        .metadata
        .iter()
        .map(|m| (m.key.as_str(), m.visibility.as_str()))
        .collect();
    assert_eq!(keys, vec![("confidence", ""), ("source", ""), ("source", "pii")]);
}

#[test]
fn test_ties_across_families_decode_in_arrival_order() {
    let codec = codec(false);
    let key = ElementKey::vertex("v1");
    let delete = Mutation::SoftDeleteProperty(SoftDeleteProperty {
        key: "k".into(),
        name: "n".into(),
        visibility: Visibility::empty(),
        timestamp: Timestamp(5),
        data: None,
    });
    let add = Mutation::AddPropertyValue(AddPropertyValue {
        key: "k".into(),
        name: "n".into(),
        value: PropertyValue::eager(Value::from("x")),
        metadata: vec![],
        visibility: Visibility::empty(),
        timestamp: Timestamp(5),
    });

    // Two separate appends; "PD" sorts after "P" in the store.
    let mut batch = EncodedBatch::default();
    codec.encode_element(&key, 10, &[delete.clone()], &mut batch).unwrap();
    codec.encode_element(&key, 11, &[add.clone()], &mut batch).unwrap();
    let mut cells = batch.cells;
    cells.sort_by(|a, b| a.key.encode().cmp(&b.key.encode()));
    let decoded: Vec<Mutation> = codec.decode_element(&cells).unwrap().iter().cloned().collect();
    assert_eq!(decoded, vec![delete.clone(), add.clone()]);

    let options = ReadOptions::new(Authorizations::empty());
    let element = materialize(&key, &Timeline::from_mutations(decoded), &options).unwrap();
    assert!(element.property_value("n").unwrap().is_some());

    // Reversed arrival flips the outcome.
    let mut batch = EncodedBatch::default();
    codec.encode_element(&key, 10, &[add.clone(), delete.clone()], &mut batch).unwrap();
    let decoded: Vec<Mutation> = codec.decode_element(&batch.cells).unwrap().iter().cloned().collect();
    assert_eq!(decoded, vec![add, delete]);
}

#[test]
fn test_cell_without_sequence_is_integrity_error() {
    let codec = codec(false);
    let cell = Cell {
        key: CellKey {
            row: b"Vv1".to_vec(),
            family: b"S".to_vec(),
            qualifier: signal::TIMESTAMP.to_vec(),
            visibility: Vec::new(),
            timestamp: Timestamp(1),
        },
        value: vec![0, 1, 2],
    };
    assert!(matches!(codec.decode_element(&[cell]), Err(Error::Integrity(_))));
}
