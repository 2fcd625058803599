//! Property values and their byte encoding.
//!
//! Stores only ever see bytes: a [`ValueSerializer`] turns values into cell
//! values and back. Values decoded from cells stay encoded until first access
//! ([`PropertyValue::resolve`] decodes once and memoizes).

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::error::{Error, Result};

/// Pointer to a value held by the large-object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamingRef {
    /// Store-assigned identifier.
    pub id: String,
    /// Declared byte length, verified on read.
    pub length: u64,
    /// Timestamp of the mutation that stored the value.
    pub timestamp: Timestamp,
}

/// Loosely typed value carried by properties, metadata and extended data columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Stream(StreamingRef),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&StreamingRef> {
        match self {
            Value::Stream(r) => Some(r),
            _ => None,
        }
    }

    /// Payload size for the inline threshold check; only strings and bytes spill.
    pub(crate) fn spillable_len(&self) -> Option<usize> {
        match self {
            Value::String(s) => Some(s.len()),
            Value::Bytes(b) => Some(b.len()),
            _ => None,
        }
    }

    pub(crate) fn into_spill_bytes(self) -> Option<Vec<u8>> {
        match self {
            Value::String(s) => Some(s.into_bytes()),
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Stream(r) => write!(f, "<stream {} ({} bytes)>", r.id, r.length),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

/// Byte-array-in, byte-array-out value encoding used by the cell codec.
pub trait ValueSerializer: Send + Sync {
    /// Stable identity persisted in graph metadata and checked on open.
    fn id(&self) -> &'static str;

    fn serialize(&self, value: &Value) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Value>;
}

/// MessagePack, then LZ4 block compression with a size prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackSerializer;

impl ValueSerializer for MessagePackSerializer {
    fn id(&self) -> &'static str {
        "msgpack+lz4/v1"
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>> {
        let msgpack_bytes = rmp_serde::to_vec(value)
            .map_err(|e| Error::integrity(format!("MessagePack encoding failed: {}", e)))?;
        lz4::block::compress(&msgpack_bytes, None, true)
            .map_err(|e| Error::integrity(format!("LZ4 compression failed: {}", e)))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Value> {
        let decompressed = lz4::block::decompress(bytes, None)
            .map_err(|e| Error::integrity(format!("LZ4 decompression failed: {}", e)))?;
        rmp_serde::from_slice(&decompressed)
            .map_err(|e| Error::integrity(format!("MessagePack decoding failed: {}", e)))
    }
}

/// A property or column value that is either decoded already or decoded on demand.
#[derive(Clone)]
pub struct PropertyValue(Repr);

#[derive(Clone)]
enum Repr {
    Eager(Value),
    Lazy {
        bytes: Arc<[u8]>,
        serializer: Arc<dyn ValueSerializer>,
        resolved: OnceLock<Value>,
    },
}

impl PropertyValue {
    pub fn eager(value: Value) -> Self {
        PropertyValue(Repr::Eager(value))
    }

    pub fn lazy(bytes: impl Into<Arc<[u8]>>, serializer: Arc<dyn ValueSerializer>) -> Self {
        PropertyValue(Repr::Lazy {
            bytes: bytes.into(),
            serializer,
            resolved: OnceLock::new(),
        })
    }

    /// Decode (once) and return the value.
    pub fn resolve(&self) -> Result<&Value> {
        match &self.0 {
            Repr::Eager(value) => Ok(value),
            Repr::Lazy {
                bytes,
                serializer,
                resolved,
            } => {
                if let Some(value) = resolved.get() {
                    return Ok(value);
                }
                let value = serializer.deserialize(bytes)?;
                Ok(resolved.get_or_init(|| value))
            }
        }
    }

    pub fn is_resolved(&self) -> bool {
        match &self.0 {
            Repr::Eager(_) => true,
            Repr::Lazy { resolved, .. } => resolved.get().is_some(),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        PropertyValue::eager(value)
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self.resolve(), other.resolve()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Eager(value) => write!(f, "Eager({:?})", value),
            Repr::Lazy {
                bytes, resolved, ..
            } => match resolved.get() {
                Some(value) => write!(f, "Lazy({:?})", value),
                None => write!(f, "Lazy(<{} bytes>)", bytes.len()),
            },
        }
    }
}
