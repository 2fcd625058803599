// Versioned graph element store for cellgraph

//! Elements are append-only mutation timelines. Every property, edge reference
//! and extended-data cell carries its own visibility expression, and reads
//! materialize the latest state the caller's authorizations can see.

pub mod backend;
pub mod blob;
pub mod clock;
pub mod codec;
pub mod config;
pub mod element;
pub mod error;
pub mod extended;
pub mod graph;
pub mod id;
pub mod index;
pub mod materialize;
pub mod mutation;
pub mod reader;
pub mod request;
pub mod rocksdb;
pub mod store;
pub mod timeline;
pub mod value;
pub mod visibility;
pub mod writer;

pub use backend::{Backend, CellBackend, MemoryBackend};
pub use clock::{Clock, LogicalClock, ManualClock, Timestamp};
pub use config::{GraphConfig, NameSubstitutionKind, RetryConfig};
pub use element::{Edge, Element, FetchHints, Property, Vertex};
pub use error::{Error, Result};
pub use extended::{ExtendedColumn, ExtendedDataRow};
pub use graph::{ElementMutation, ElementWrite, FindPathOptions, Graph, GraphPath, SaveReport};
pub use id::{Direction, ElementId, ElementKey, ElementType};
pub use materialize::ReadOptions;
pub use reader::{
    create_reader, spawn_query_consumer_pool, spawn_reader, Query, QueryReply, Reader, ReaderConfig,
};
pub use value::Value;
pub use visibility::{Authorizations, Visibility};
pub use writer::{create_writer, spawn_write_consumer, WriteRequest, Writer, WriterConfig};
