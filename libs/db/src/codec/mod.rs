//! Key/value codec: timelines to sorted cells and back.
//!
//! Encoding is per mutation; decoding walks one row's cells (already in
//! family/qualifier/visibility/time order) and rebuilds the equivalent
//! timeline, which then goes through the same reconstruction as the
//! in-memory backend.
//!
//! Every cell value starts with the big-endian arrival sequence of the
//! mutation it encodes, so timestamp ties decode in arrival order whatever
//! families the tied cells live in.

pub mod names;
pub mod qualifier;
pub mod schema;

use std::collections::HashMap;
use std::sync::Arc;

use crate::clock::Timestamp;
use crate::error::{Error, Result};
use crate::id::{Direction, ElementId, ElementKey, ElementType, ExtendedRowKey};
use crate::mutation::{
    AddColumn, AddEdgeRef, AddPropertyValue, AdditionalVisibilityChange, AlterEdgeLabel,
    AlterVisibility, DeleteColumn, EdgeRefHiddenToggle, EdgeSetup, ElementTimestamp,
    ExtendedDataMarker, ExtendedDataMutation, HiddenToggle, MetadataEntry, Mutation,
    PropertyHiddenToggle, SoftDelete, SoftDeleteEdgeRef, SoftDeleteProperty, Timestamped,
};
use crate::store::{Cell, CellKey};
use crate::timeline::Timeline;
use crate::value::{PropertyValue, Value, ValueSerializer};
use crate::visibility::{Visibility, VisibilityCache};

use names::{NameEntry, NameSubstitution};
use schema::{signal, Family, EXTENDED_ROW_PREFIX};

const FLAG_OFF: u8 = 0;
const FLAG_ON: u8 = 1;

const SEQ_LEN: usize = 8;

fn stamp_sequence(cells: &mut [Cell], seq: u64) {
    for cell in cells {
        cell.value.splice(0..0, seq.to_be_bytes());
    }
}

/// Split a cell value into its arrival sequence and payload.
pub fn split_sequence(value: &[u8]) -> Result<(u64, &[u8])> {
    if value.len() < SEQ_LEN {
        return Err(Error::integrity("cell value is shorter than its arrival sequence"));
    }
    let (seq, rest) = value.split_at(SEQ_LEN);
    let seq: [u8; SEQ_LEN] = seq
        .try_into()
        .map_err(|_| Error::integrity("malformed arrival sequence"))?;
    Ok((u64::from_be_bytes(seq), rest))
}

/// Cells for one write plus dictionary entries that must be persisted first.
#[derive(Debug, Default)]
pub struct EncodedBatch {
    pub cells: Vec<Cell>,
    pub name_entries: Vec<NameEntry>,
}

pub struct Codec {
    serializer: Arc<dyn ValueSerializer>,
    names: Arc<dyn NameSubstitution>,
    visibilities: VisibilityCache,
}

impl Codec {
    pub fn new(serializer: Arc<dyn ValueSerializer>, names: Arc<dyn NameSubstitution>) -> Self {
        Self {
            serializer,
            names,
            visibilities: VisibilityCache::new(),
        }
    }

    pub fn serializer(&self) -> &Arc<dyn ValueSerializer> {
        &self.serializer
    }

    pub fn names(&self) -> &Arc<dyn NameSubstitution> {
        &self.names
    }

    // ------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------

    pub fn element_row(key: &ElementKey) -> Vec<u8> {
        let id = key.id.as_str().as_bytes();
        let mut row = Vec::with_capacity(id.len() + 1);
        row.push(key.element_type.row_prefix());
        row.extend_from_slice(id);
        row
    }

    pub fn parse_element_row(row: &[u8]) -> Result<ElementKey> {
        let (&prefix, id) = row
            .split_first()
            .ok_or_else(|| Error::integrity("empty element row"))?;
        let element_type = ElementType::from_row_prefix(prefix)
            .ok_or_else(|| Error::integrity(format!("unknown row prefix {:#04x}", prefix)))?;
        let id = std::str::from_utf8(id)
            .map_err(|e| Error::integrity(format!("element id is not UTF-8: {}", e)))?;
        Ok(ElementKey {
            element_type,
            id: ElementId::new(id),
        })
    }

    pub fn extended_row(key: &ExtendedRowKey) -> Vec<u8> {
        let mut row = Self::extended_row_prefix(&key.element, Some(&key.table));
        row.extend_from_slice(&qualifier::join(&[key.row_id.as_bytes()]));
        row
    }

    /// Row prefix of every extended row of `element` (optionally one table).
    pub fn extended_row_prefix(element: &ElementKey, table: Option<&str>) -> Vec<u8> {
        let prefix = [element.element_type.row_prefix()];
        let mut tokens: Vec<&[u8]> = vec![&prefix[..], element.id.as_str().as_bytes()];
        if let Some(table) = table {
            tokens.push(table.as_bytes());
        }
        let mut row = vec![EXTENDED_ROW_PREFIX];
        row.extend_from_slice(&qualifier::join(&tokens));
        row
    }

    pub fn parse_extended_row(row: &[u8]) -> Result<ExtendedRowKey> {
        let body = match row.split_first() {
            Some((&EXTENDED_ROW_PREFIX, body)) => body,
            _ => return Err(Error::integrity("not an extended data row")),
        };
        let [prefix, id, table, row_id] = qualifier::split_exact::<4>(body)?;
        let element = Self::parse_element_row(&[prefix, id].concat())?;
        Ok(ExtendedRowKey {
            element,
            table: utf8(table)?,
            row_id: utf8(row_id)?,
        })
    }

    // ------------------------------------------------------------------
    // Encoding
    // ------------------------------------------------------------------

    fn deflate(&self, name: &str, batch: &mut EncodedBatch) -> Vec<u8> {
        self.names.deflate(name, &mut batch.name_entries)
    }

    fn value_bytes(&self, value: &PropertyValue) -> Result<Vec<u8>> {
        self.serializer.serialize(value.resolve()?)
    }

    fn data_bytes(&self, data: &Option<Value>) -> Result<Vec<u8>> {
        match data {
            None => Ok(Vec::new()),
            Some(value) => self.serializer.serialize(value),
        }
    }

    fn flagged(&self, on: bool, data: &Option<Value>) -> Result<Vec<u8>> {
        let mut out = vec![if on { FLAG_ON } else { FLAG_OFF }];
        out.extend(self.data_bytes(data)?);
        Ok(out)
    }

    fn push(
        batch: &mut EncodedBatch,
        row: &[u8],
        family: Family,
        qualifier: Vec<u8>,
        visibility: &Visibility,
        timestamp: Timestamp,
        value: Vec<u8>,
    ) {
        batch.cells.push(Cell {
            key: CellKey {
                row: row.to_vec(),
                family: family.as_bytes().to_vec(),
                qualifier,
                visibility: visibility.as_str().as_bytes().to_vec(),
                timestamp,
            },
            value,
        });
    }

    /// Encode `mutations`, numbering them from `first_seq` in slice order.
    pub fn encode_element(
        &self,
        key: &ElementKey,
        first_seq: u64,
        mutations: &[Mutation],
        batch: &mut EncodedBatch,
    ) -> Result<()> {
        let row = Self::element_row(key);
        for (seq, mutation) in (first_seq..).zip(mutations) {
            let start = batch.cells.len();
            self.encode_mutation(&row, mutation, batch)?;
            stamp_sequence(&mut batch.cells[start..], seq);
        }
        Ok(())
    }

    fn encode_mutation(&self, row: &[u8], mutation: &Mutation, batch: &mut EncodedBatch) -> Result<()> {
        let empty = Visibility::empty();
        match mutation {
            Mutation::AddPropertyValue(m) => {
                let key = self.deflate(&m.key, batch);
                let name = self.deflate(&m.name, batch);
                let value = self.value_bytes(&m.value)?;
                Self::push(batch, row, Family::Property, qualifier::join(&[&key[..], &name[..]]), &m.visibility, m.timestamp, value);
                for entry in &m.metadata {
                    let meta_key = self.deflate(&entry.key, batch);
                    let q = qualifier::join(&[&key[..], &name[..], m.visibility.as_str().as_bytes(), &meta_key[..]]);
                    let value = self.value_bytes(&entry.value)?;
                    Self::push(batch, row, Family::PropertyMetadata, q, &entry.visibility, m.timestamp, value);
                }
            }
            Mutation::SoftDeleteProperty(m) => {
                let q = qualifier::join(&[self.deflate(&m.key, batch), self.deflate(&m.name, batch)]);
                let value = self.data_bytes(&m.data)?;
                Self::push(batch, row, Family::PropertySoftDelete, q, &m.visibility, m.timestamp, value);
            }
            Mutation::MarkPropertyHidden(m) | Mutation::MarkPropertyVisible(m) => {
                let q = qualifier::join(&[
                    self.deflate(&m.key, batch),
                    self.deflate(&m.name, batch),
                    m.property_visibility.as_str().as_bytes().to_vec(),
                ]);
                let hidden = matches!(mutation, Mutation::MarkPropertyHidden(_));
                let value = self.flagged(hidden, &m.data)?;
                Self::push(batch, row, Family::PropertyHidden, q, &m.visibility, m.timestamp, value);
            }
            Mutation::AlterVisibility(m) => {
                let value = self.data_bytes(&m.data)?;
                Self::push(batch, row, Family::Signal, signal::VISIBILITY.to_vec(), &m.visibility, m.timestamp, value);
            }
            Mutation::ElementTimestamp(m) => {
                Self::push(batch, row, Family::Signal, signal::TIMESTAMP.to_vec(), &m.visibility, m.timestamp, Vec::new());
            }
            Mutation::AlterEdgeLabel(m) => {
                let label = self.deflate(&m.label, batch);
                Self::push(batch, row, Family::Signal, signal::LABEL.to_vec(), &m.visibility, m.timestamp, label);
            }
            Mutation::EdgeSetup(m) => {
                let value = qualifier::join(&[m.out_vertex_id.as_str(), m.in_vertex_id.as_str()]);
                Self::push(batch, row, Family::Signal, signal::SETUP.to_vec(), &m.visibility, m.timestamp, value);
            }
            Mutation::SoftDelete(m) => {
                let value = self.data_bytes(&m.data)?;
                Self::push(batch, row, Family::ElementSoftDelete, Vec::new(), &m.visibility, m.timestamp, value);
            }
            Mutation::MarkHidden(m) | Mutation::MarkVisible(m) => {
                let value = self.flagged(matches!(mutation, Mutation::MarkHidden(_)), &m.data)?;
                Self::push(batch, row, Family::ElementHidden, Vec::new(), &m.visibility, m.timestamp, value);
            }
            Mutation::AddAdditionalVisibility(m) | Mutation::DeleteAdditionalVisibility(m) => {
                let added = matches!(mutation, Mutation::AddAdditionalVisibility(_));
                let value = self.flagged(added, &m.data)?;
                Self::push(batch, row, Family::AdditionalVisibility, m.label.as_bytes().to_vec(), &empty, m.timestamp, value);
            }
            Mutation::AddEdgeRef(m) => {
                let family = edge_family(m.direction, Family::OutEdgeRef, Family::InEdgeRef)?;
                let value = qualifier::join(&[self.deflate(&m.label, batch), m.other_vertex_id.as_str().as_bytes().to_vec()]);
                Self::push(batch, row, family, m.edge_id.as_str().as_bytes().to_vec(), &m.visibility, m.timestamp, value);
            }
            Mutation::SoftDeleteEdgeRef(m) => {
                let family = edge_family(m.direction, Family::OutEdgeSoftDelete, Family::InEdgeSoftDelete)?;
                let value = self.data_bytes(&m.data)?;
                Self::push(batch, row, family, m.edge_id.as_str().as_bytes().to_vec(), &m.visibility, m.timestamp, value);
            }
            Mutation::MarkEdgeRefHidden(m) | Mutation::MarkEdgeRefVisible(m) => {
                let family = edge_family(m.direction, Family::OutEdgeHidden, Family::InEdgeHidden)?;
                let value = self.flagged(matches!(mutation, Mutation::MarkEdgeRefHidden(_)), &m.data)?;
                Self::push(batch, row, family, m.edge_id.as_str().as_bytes().to_vec(), &m.visibility, m.timestamp, value);
            }
            Mutation::ExtendedDataMarker(m) => {
                let table = self.deflate(&m.table, batch);
                Self::push(batch, row, Family::ExtendedDataMarker, table, &m.visibility, m.timestamp, Vec::new());
            }
        }
        Ok(())
    }

    pub fn encode_extended(
        &self,
        key: &ExtendedRowKey,
        first_seq: u64,
        mutations: &[ExtendedDataMutation],
        batch: &mut EncodedBatch,
    ) -> Result<()> {
        let row = Self::extended_row(key);
        let empty = Visibility::empty();
        for (seq, mutation) in (first_seq..).zip(mutations) {
            let start = batch.cells.len();
            match mutation {
                ExtendedDataMutation::AddColumn(m) => {
                    let q = qualifier::join(&[self.deflate(&m.column, batch), self.deflate(&m.key, batch)]);
                    let value = self.value_bytes(&m.value)?;
                    Self::push(batch, &row, Family::ExtendedColumn, q, &m.visibility, m.timestamp, value);
                }
                ExtendedDataMutation::DeleteColumn(m) => {
                    let q = qualifier::join(&[self.deflate(&m.column, batch), self.deflate(&m.key, batch)]);
                    Self::push(batch, &row, Family::ExtendedColumnDelete, q, &m.visibility, m.timestamp, Vec::new());
                }
                ExtendedDataMutation::AddAdditionalVisibility(m)
                | ExtendedDataMutation::DeleteAdditionalVisibility(m) => {
                    let added = matches!(mutation, ExtendedDataMutation::AddAdditionalVisibility(_));
                    let value = self.flagged(added, &m.data)?;
                    Self::push(batch, &row, Family::AdditionalVisibility, m.label.as_bytes().to_vec(), &empty, m.timestamp, value);
                }
            }
            stamp_sequence(&mut batch.cells[start..], seq);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Decoding
    // ------------------------------------------------------------------

    fn inflate(&self, token: &[u8]) -> Result<String> {
        self.names.inflate(token)
    }

    fn lazy(&self, bytes: &[u8]) -> PropertyValue {
        PropertyValue::lazy(bytes.to_vec(), self.serializer.clone())
    }

    fn data(&self, bytes: &[u8]) -> Result<Option<Value>> {
        if bytes.is_empty() {
            return Ok(None);
        }
        self.serializer.deserialize(bytes).map(Some)
    }

    fn flag(&self, bytes: &[u8]) -> Result<(bool, Option<Value>)> {
        match bytes.split_first() {
            Some((&FLAG_ON, rest)) => Ok((true, self.data(rest)?)),
            Some((&FLAG_OFF, rest)) => Ok((false, self.data(rest)?)),
            _ => Err(Error::integrity("malformed toggle cell value")),
        }
    }

    /// Rebuild an element timeline from one row's cells.
    pub fn decode_element(&self, cells: &[Cell]) -> Result<Timeline<Mutation>> {
        let mut mutations = Vec::with_capacity(cells.len());
        // Metadata cells are keyed by the raw (key, name, visibility) tokens of their property.
        let mut metadata: HashMap<(Vec<u8>, Timestamp), Vec<MetadataEntry>> = HashMap::new();
        let mut owners: Vec<(usize, Vec<u8>)> = Vec::new();

        for cell in cells {
            let key = &cell.key;
            let family = Family::from_bytes(&key.family)?;
            let visibility = self.visibilities.get_or_parse(&key.visibility)?;
            let ts = key.timestamp;
            let (seq, value) = split_sequence(&cell.value)?;
            let mutation = match family {
                Family::Signal => match &key.qualifier[..] {
                    signal::VISIBILITY => Mutation::AlterVisibility(AlterVisibility {
                        timestamp: ts,
                        visibility,
                        data: self.data(value)?,
                    }),
                    signal::TIMESTAMP => Mutation::ElementTimestamp(ElementTimestamp {
                        timestamp: ts,
                        visibility,
                    }),
                    signal::LABEL => Mutation::AlterEdgeLabel(AlterEdgeLabel {
                        timestamp: ts,
                        label: self.inflate(value)?,
                        visibility,
                    }),
                    signal::SETUP => {
                        let [out_id, in_id] = qualifier::split_exact::<2>(value)?;
                        Mutation::EdgeSetup(EdgeSetup {
                            timestamp: ts,
                            out_vertex_id: ElementId::new(utf8(out_id)?),
                            in_vertex_id: ElementId::new(utf8(in_id)?),
                            visibility,
                        })
                    }
                    other => {
                        return Err(Error::integrity(format!(
                            "unknown signal qualifier {:?}",
                            String::from_utf8_lossy(other)
                        )))
                    }
                },
                Family::Property => {
                    let [k, n] = qualifier::split_exact::<2>(&key.qualifier)?;
                    owners.push((mutations.len(), qualifier::join(&[k, n, &key.visibility[..]])));
                    Mutation::AddPropertyValue(AddPropertyValue {
                        key: self.inflate(k)?,
                        name: self.inflate(n)?,
                        value: self.lazy(value),
                        metadata: Vec::new(),
                        visibility,
                        timestamp: ts,
                    })
                }
                Family::PropertyMetadata => {
                    let [k, n, prop_vis, meta_key] = qualifier::split_exact::<4>(&key.qualifier)?;
                    let owner = qualifier::join(&[k, n, prop_vis]);
                    metadata.entry((owner, ts)).or_default().push(MetadataEntry {
                        key: self.inflate(meta_key)?,
                        value: self.lazy(value),
                        visibility,
                    });
                    continue;
                }
                Family::PropertySoftDelete => {
                    let [k, n] = qualifier::split_exact::<2>(&key.qualifier)?;
                    Mutation::SoftDeleteProperty(SoftDeleteProperty {
                        key: self.inflate(k)?,
                        name: self.inflate(n)?,
                        visibility,
                        timestamp: ts,
                        data: self.data(value)?,
                    })
                }
                Family::PropertyHidden => {
                    let [k, n, prop_vis] = qualifier::split_exact::<3>(&key.qualifier)?;
                    let (hidden, data) = self.flag(value)?;
                    let toggle = PropertyHiddenToggle {
                        key: self.inflate(k)?,
                        name: self.inflate(n)?,
                        property_visibility: self.visibilities.get_or_parse(prop_vis)?,
                        timestamp: ts,
                        visibility,
                        data,
                    };
                    if hidden {
                        Mutation::MarkPropertyHidden(toggle)
                    } else {
                        Mutation::MarkPropertyVisible(toggle)
                    }
                }
                Family::ElementSoftDelete => Mutation::SoftDelete(SoftDelete {
                    timestamp: ts,
                    visibility,
                    data: self.data(value)?,
                }),
                Family::ElementHidden => {
                    let (hidden, data) = self.flag(value)?;
                    let toggle = HiddenToggle {
                        timestamp: ts,
                        visibility,
                        data,
                    };
                    if hidden {
                        Mutation::MarkHidden(toggle)
                    } else {
                        Mutation::MarkVisible(toggle)
                    }
                }
                Family::AdditionalVisibility => {
                    let (added, data) = self.flag(value)?;
                    let change = AdditionalVisibilityChange {
                        timestamp: ts,
                        label: utf8(&key.qualifier)?,
                        data,
                    };
                    if added {
                        Mutation::AddAdditionalVisibility(change)
                    } else {
                        Mutation::DeleteAdditionalVisibility(change)
                    }
                }
                Family::OutEdgeRef | Family::InEdgeRef => {
                    let [label, other] = qualifier::split_exact::<2>(value)?;
                    Mutation::AddEdgeRef(AddEdgeRef {
                        direction: edge_direction(family),
                        edge_id: ElementId::new(utf8(&key.qualifier)?),
                        label: self.inflate(label)?,
                        other_vertex_id: ElementId::new(utf8(other)?),
                        visibility,
                        timestamp: ts,
                    })
                }
                Family::OutEdgeSoftDelete | Family::InEdgeSoftDelete => {
                    Mutation::SoftDeleteEdgeRef(SoftDeleteEdgeRef {
                        direction: edge_direction(family),
                        edge_id: ElementId::new(utf8(&key.qualifier)?),
                        visibility,
                        timestamp: ts,
                        data: self.data(value)?,
                    })
                }
                Family::OutEdgeHidden | Family::InEdgeHidden => {
                    let (hidden, data) = self.flag(value)?;
                    let toggle = EdgeRefHiddenToggle {
                        direction: edge_direction(family),
                        edge_id: ElementId::new(utf8(&key.qualifier)?),
                        visibility,
                        timestamp: ts,
                        data,
                    };
                    if hidden {
                        Mutation::MarkEdgeRefHidden(toggle)
                    } else {
                        Mutation::MarkEdgeRefVisible(toggle)
                    }
                }
                Family::ExtendedDataMarker => Mutation::ExtendedDataMarker(ExtendedDataMarker {
                    table: self.inflate(&key.qualifier)?,
                    visibility,
                    timestamp: ts,
                }),
                Family::ExtendedColumn | Family::ExtendedColumnDelete => {
                    return Err(Error::integrity(format!(
                        "extended data family {} in an element row",
                        family.name()
                    )))
                }
            };
            mutations.push((seq, mutation));
        }

        for (index, owner) in owners {
            if metadata.is_empty() {
                break;
            }
            if let (_, Mutation::AddPropertyValue(add)) = &mut mutations[index] {
                if let Some(mut entries) = metadata.remove(&(owner, add.timestamp)) {
                    // Cells come back in token order; writes keep (key, visibility) order.
                    entries.sort_by(|a, b| (&a.key, &a.visibility).cmp(&(&b.key, &b.visibility)));
                    add.metadata = entries;
                }
            }
        }
        if !metadata.is_empty() {
            return Err(Error::integrity(format!(
                "{} property metadata group(s) without a property value",
                metadata.len()
            )));
        }

        Ok(Timeline::from_mutations(in_arrival_order(mutations)))
    }

    pub fn decode_extended(&self, cells: &[Cell]) -> Result<Timeline<ExtendedDataMutation>> {
        let mut mutations = Vec::with_capacity(cells.len());
        for cell in cells {
            let key = &cell.key;
            let family = Family::from_bytes(&key.family)?;
            let visibility = self.visibilities.get_or_parse(&key.visibility)?;
            let ts = key.timestamp;
            let (seq, value) = split_sequence(&cell.value)?;
            let mutation = match family {
                Family::ExtendedColumn | Family::ExtendedColumnDelete => {
                    let [c, k] = qualifier::split_exact::<2>(&key.qualifier)?;
                    let column = self.inflate(c)?;
                    let key = self.inflate(k)?;
                    if family == Family::ExtendedColumn {
                        ExtendedDataMutation::AddColumn(AddColumn {
                            column,
                            key,
                            value: self.lazy(value),
                            visibility,
                            timestamp: ts,
                        })
                    } else {
                        ExtendedDataMutation::DeleteColumn(DeleteColumn {
                            column,
                            key,
                            visibility,
                            timestamp: ts,
                        })
                    }
                }
                Family::AdditionalVisibility => {
                    let (added, data) = self.flag(value)?;
                    let change = AdditionalVisibilityChange {
                        timestamp: ts,
                        label: utf8(&key.qualifier)?,
                        data,
                    };
                    if added {
                        ExtendedDataMutation::AddAdditionalVisibility(change)
                    } else {
                        ExtendedDataMutation::DeleteAdditionalVisibility(change)
                    }
                }
                other => {
                    return Err(Error::integrity(format!(
                        "family {} in an extended data row",
                        other.name()
                    )))
                }
            };
            mutations.push((seq, mutation));
        }
        Ok(Timeline::from_mutations(in_arrival_order(mutations)))
    }
}

/// Order decoded mutations by timestamp, then arrival sequence.
fn in_arrival_order<M: Timestamped>(mut mutations: Vec<(u64, M)>) -> impl Iterator<Item = M> {
    mutations.sort_by_key(|(seq, m)| (m.timestamp(), *seq));
    mutations.into_iter().map(|(_, m)| m)
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::integrity(format!("cell component is not UTF-8: {}", e)))
}

fn edge_family(direction: Direction, out: Family, inbound: Family) -> Result<Family> {
    match direction {
        Direction::Out => Ok(out),
        Direction::In => Ok(inbound),
        Direction::Both => Err(Error::invalid("edge reference direction must be Out or In")),
    }
}

fn edge_direction(family: Family) -> Direction {
    match family {
        Family::OutEdgeRef | Family::OutEdgeHidden | Family::OutEdgeSoftDelete => Direction::Out,
        _ => Direction::In,
    }
}

#[cfg(test)]
mod tests;
