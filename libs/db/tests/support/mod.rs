//! Shared fixtures for the integration tests.
//!
//! Every scenario is written once against `Graph<B>` and instantiated for the
//! memory backend and the cell-encoded backend.

#![allow(dead_code)]

use std::sync::Arc;

use cellgraph_db::{
    Authorizations, CellBackend, Graph, GraphConfig, ManualClock, MemoryBackend, ReadOptions,
    Visibility,
};
use cellgraph_db::store::MemoryCellStore;

pub fn vis(expression: &str) -> Visibility {
    Visibility::new(expression).unwrap()
}

pub fn auths(labels: &[&str]) -> Authorizations {
    Authorizations::new(labels.iter().copied())
}

pub fn read(labels: &[&str]) -> ReadOptions {
    ReadOptions::new(auths(labels))
}

pub fn memory_graph() -> Graph<MemoryBackend> {
    Graph::in_memory().with_clock(Arc::new(ManualClock::new(1_000, 1)))
}

pub fn cell_graph() -> Graph<CellBackend<MemoryCellStore>> {
    Graph::in_memory_cells(GraphConfig::default())
        .unwrap()
        .with_clock(Arc::new(ManualClock::new(1_000, 1)))
}
