//! Order-preserving cell keys.
//!
//! A cell coordinate `(row, family, qualifier, visibility, timestamp)` is encoded
//! so that byte order equals tuple order, with the timestamp inverted so the
//! newest version of a coordinate sorts first. Each byte-string component has
//! `0x00` escaped as `0x00 0xFF` and is terminated by `0x00 0x01`.

use anyhow::{bail, Result};

use crate::clock::Timestamp;

const ESCAPE: u8 = 0x00;
const ESCAPED_NUL: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub row: Vec<u8>,
    pub family: Vec<u8>,
    pub qualifier: Vec<u8>,
    pub visibility: Vec<u8>,
    pub timestamp: Timestamp,
}

/// One stored cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub key: CellKey,
    pub value: Vec<u8>,
}

fn push_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        out.push(b);
        if b == ESCAPE {
            out.push(ESCAPED_NUL);
        }
    }
}

fn push_component(out: &mut Vec<u8>, bytes: &[u8]) {
    push_escaped(out, bytes);
    out.push(ESCAPE);
    out.push(TERMINATOR);
}

/// Read one terminated component starting at `pos`; returns (bytes, next pos).
fn read_component(encoded: &[u8], mut pos: usize) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    while pos < encoded.len() {
        let b = encoded[pos];
        if b != ESCAPE {
            out.push(b);
            pos += 1;
            continue;
        }
        match encoded.get(pos + 1) {
            Some(&ESCAPED_NUL) => {
                out.push(ESCAPE);
                pos += 2;
            }
            Some(&TERMINATOR) => return Ok((out, pos + 2)),
            other => bail!("invalid escape sequence 0x00 {:?} at offset {}", other, pos),
        }
    }
    bail!("unterminated key component")
}

impl CellKey {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.row.len() + self.family.len() + self.qualifier.len() + self.visibility.len() + 16,
        );
        push_component(&mut out, &self.row);
        push_component(&mut out, &self.family);
        push_component(&mut out, &self.qualifier);
        push_component(&mut out, &self.visibility);
        out.extend_from_slice(&(!self.timestamp.0).to_be_bytes());
        out
    }

    pub fn decode(encoded: &[u8]) -> Result<Self> {
        let (row, pos) = read_component(encoded, 0)?;
        let (family, pos) = read_component(encoded, pos)?;
        let (qualifier, pos) = read_component(encoded, pos)?;
        let (visibility, pos) = read_component(encoded, pos)?;
        let ts_bytes: [u8; 8] = match encoded.get(pos..) {
            Some(rest) if rest.len() == 8 => rest.try_into()?,
            _ => bail!("cell key has {} trailing bytes, expected 8", encoded.len() - pos),
        };
        Ok(CellKey {
            row,
            family,
            qualifier,
            visibility,
            timestamp: Timestamp(!u64::from_be_bytes(ts_bytes)),
        })
    }
}

/// Encoded prefix shared by every cell of exactly `row`.
pub fn row_prefix(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len() + 2);
    push_component(&mut out, row);
    out
}

/// Encoded prefix shared by every row whose bytes start with `partial`.
pub fn partial_row_prefix(partial: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(partial.len() + 1);
    push_escaped(&mut out, partial);
    out
}

/// Smallest encoded key sorting after every cell of `row`.
pub fn row_upper_bound(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len() + 2);
    push_escaped(&mut out, row);
    out.push(ESCAPE);
    out.push(TERMINATOR + 1);
    out
}

/// Decode only the row component of an encoded key.
pub fn decode_row(encoded: &[u8]) -> Result<Vec<u8>> {
    Ok(read_component(encoded, 0)?.0)
}
