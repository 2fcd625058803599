//! Graph facade over a [`Backend`].
//!
//! ## Module Structure
//!
//! - `mod.rs` - `Graph`, open/constructors, reads, deletes
//! - `builder.rs` - `ElementWrite` / `ElementMutation` builders, `apply`, `SaveReport`
//! - `metadata.rs` - schema version and encoding identity checks
//! - `path.rs` - path finding over adjacency
//!
//! Writes to one element are serialized by a per-element lock; the clock is
//! ticked while that lock is held, so an element's timeline order equals its
//! timestamp order. Different elements never contend.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;

pub mod builder;
pub mod metadata;
pub mod path;


pub use builder::{ElementMutation, ElementWrite, SaveReport};
pub use metadata::GraphMetadata;
pub use path::{FindPathOptions, Path as GraphPath};

use crate::backend::{Backend, CellBackend, MemoryBackend};
use crate::blob::{self, InMemoryLargeObjectStore, LargeObjectStore};
use crate::clock::{Clock, LogicalClock};
use crate::codec::Codec;
use crate::config::GraphConfig;
use crate::element::{Edge, Element, FetchHints, Vertex};
use crate::error::{Error, Result};
use crate::extended::ExtendedDataRow;
use crate::id::{Direction, ElementId, ElementKey, ElementType, ExtendedRowKey};
use crate::index::{NoopSearchIndex, SearchIndex};
use crate::materialize::{materialize, materialize_extended_row, ReadOptions};
use crate::mutation::{Mutation, SoftDelete, SoftDeleteEdgeRef};
use crate::rocksdb::StorageMode;
use crate::store::{CellStore, MemoryCellStore, RocksCellStore};
use crate::timeline::Timeline;
use crate::value::{MessagePackSerializer, StreamingRef};
use crate::visibility::{Authorizations, Visibility};

/// Elements loaded per backend round-trip when enumerating.
const LOAD_BATCH: usize = 256;

pub struct Graph<B: Backend> {
    backend: B,
    config: GraphConfig,
    clock: Arc<dyn Clock>,
    index: Arc<dyn SearchIndex>,
    blobs: Arc<dyn LargeObjectStore>,
    locks: DashMap<ElementKey, Arc<Mutex<()>>>,
}

impl Graph<MemoryBackend> {
    /// A process-local graph with default collaborators.
    pub fn in_memory() -> Self {
        Self::in_memory_with_config(GraphConfig::default())
    }

    pub fn in_memory_with_config(config: GraphConfig) -> Self {
        let backend = MemoryBackend::new();
        // Memory metadata writes cannot fail; an empty namespace always validates.
        if let Err(e) = metadata::validate_or_initialize(&backend) {
            tracing::warn!(error = %e, "[graph] Could not initialise in-memory metadata");
        }
        Self::assemble(backend, config)
    }
}

impl<S: CellStore + 'static> Graph<CellBackend<S>> {
    /// Open a cell-encoded graph over `store`, validating its metadata.
    pub fn open_cells(store: S, config: GraphConfig) -> Result<Self> {
        let codec = Codec::new(
            Arc::new(MessagePackSerializer),
            config.name_substitution.build(),
        );
        let backend = CellBackend::new(store, codec, config.write_retry.clone())?;
        Self::open(backend, config)
    }
}

impl Graph<CellBackend<MemoryCellStore>> {
    pub fn in_memory_cells(config: GraphConfig) -> Result<Self> {
        Self::open_cells(MemoryCellStore::new(), config)
    }
}

impl Graph<CellBackend<RocksCellStore>> {
    pub fn open_rocksdb(path: &Path, mode: StorageMode, config: GraphConfig) -> Result<Self> {
        let store = RocksCellStore::open(path, mode, config.block_cache.clone())
            .map_err(Error::BackendIo)?;
        Self::open_cells(store, config)
    }
}

impl<B: Backend> Graph<B> {
    fn assemble(backend: B, config: GraphConfig) -> Self {
        Self {
            backend,
            config,
            clock: Arc::new(LogicalClock::new()),
            index: Arc::new(NoopSearchIndex),
            blobs: Arc::new(InMemoryLargeObjectStore::new()),
            locks: DashMap::new(),
        }
    }

    /// Wrap `backend`, failing with `VersionMismatch` if its metadata disagrees.
    #[tracing::instrument(skip(backend, config), fields(backend = backend.name()))]
    pub fn open(backend: B, config: GraphConfig) -> Result<Self> {
        metadata::validate_or_initialize(&backend)?;
        tracing::info!("[graph] Opened");
        Ok(Self::assemble(backend, config))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_search_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn with_large_object_store(mut self, blobs: Arc<dyn LargeObjectStore>) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn metadata(&self) -> Result<GraphMetadata> {
        metadata::read(&self.backend)
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn index(&self) -> &dyn SearchIndex {
        self.index.as_ref()
    }

    pub(crate) fn blobs(&self) -> &dyn LargeObjectStore {
        self.blobs.as_ref()
    }

    /// Per-element write lock.
    pub(crate) fn element_lock(&self, key: &ElementKey) -> Arc<Mutex<()>> {
        self.locks.entry(key.clone()).or_default().clone()
    }

    /// Append under the element's lock, stamping each mutation from the clock.
    pub(crate) fn append_locked(
        &self,
        key: &ElementKey,
        build: impl FnOnce(&dyn Clock, Option<&Timeline<Mutation>>) -> Result<Vec<Mutation>>,
    ) -> Result<()> {
        let lock = self.element_lock(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let existing = self.backend.load(key)?;
        let mutations = build(self.clock(), existing.as_ref())?;
        if mutations.is_empty() {
            return Ok(());
        }
        tracing::debug!(element = %key, count = mutations.len(), "[graph] Appending mutations");
        self.backend.append(key, mutations)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Create (or re-assert) a vertex.
    pub fn prepare_vertex(&self, id: impl Into<ElementId>, visibility: Visibility) -> ElementMutation<'_, B> {
        ElementMutation::new(self, ElementWrite::vertex(id, visibility))
    }

    /// Create an edge between two existing vertices.
    pub fn prepare_edge(
        &self,
        id: impl Into<ElementId>,
        out_vertex_id: impl Into<ElementId>,
        in_vertex_id: impl Into<ElementId>,
        label: impl Into<String>,
        visibility: Visibility,
    ) -> ElementMutation<'_, B> {
        ElementMutation::new(
            self,
            ElementWrite::edge(id, out_vertex_id, in_vertex_id, label, visibility),
        )
    }

    /// Mutate an existing vertex.
    pub fn vertex_mutation(&self, id: impl Into<ElementId>) -> ElementMutation<'_, B> {
        ElementMutation::new(self, ElementWrite::existing(ElementKey::vertex(id)))
    }

    /// Mutate an existing edge.
    pub fn edge_mutation(&self, id: impl Into<ElementId>) -> ElementMutation<'_, B> {
        ElementMutation::new(self, ElementWrite::existing(ElementKey::edge(id)))
    }

    /// Soft delete a vertex and every incident edge the caller can see.
    /// Returns false when the vertex is not visible.
    #[tracing::instrument(skip(self, authorizations), fields(vertex = %id))]
    pub fn soft_delete_vertex(&self, id: &ElementId, authorizations: &Authorizations) -> Result<bool> {
        let options = ReadOptions::new(authorizations.clone())
            .with_fetch_hints(FetchHints::EDGE_REFS.with_hidden(true));
        let Some(vertex) = self.get_vertex(id, &options)? else {
            return Ok(false);
        };
        for edge_id in vertex.edge_ids(Direction::Both, &[])? {
            self.soft_delete_edge(&edge_id, authorizations)?;
        }
        let key = ElementKey::vertex(id.clone());
        let visibility = vertex.visibility().clone();
        self.append_locked(&key, |clock, _| {
            Ok(vec![Mutation::SoftDelete(SoftDelete {
                timestamp: clock.now(),
                visibility,
                data: None,
            })])
        })?;
        self.report_index(self.index.delete_element(&key, authorizations), &key);
        Ok(true)
    }

    /// Soft delete an edge and its references on both endpoints.
    #[tracing::instrument(skip(self, authorizations), fields(edge = %id))]
    pub fn soft_delete_edge(&self, id: &ElementId, authorizations: &Authorizations) -> Result<bool> {
        let options = ReadOptions::new(authorizations.clone())
            .with_fetch_hints(FetchHints::NONE.with_hidden(true));
        let Some(edge) = self.get_edge(id, &options)? else {
            return Ok(false);
        };
        let key = ElementKey::edge(id.clone());
        let visibility = edge.visibility().clone();
        {
            let visibility = visibility.clone();
            self.append_locked(&key, |clock, _| {
                Ok(vec![Mutation::SoftDelete(SoftDelete {
                    timestamp: clock.now(),
                    visibility,
                    data: None,
                })])
            })?;
        }
        self.drop_edge_refs(&edge, &visibility)?;
        self.report_index(self.index.delete_element(&key, authorizations), &key);
        Ok(true)
    }

    /// Hard delete a vertex: purge every incident edge, then the vertex row.
    #[tracing::instrument(skip(self, authorizations), fields(vertex = %id))]
    pub fn delete_vertex(&self, id: &ElementId, authorizations: &Authorizations) -> Result<bool> {
        let options = ReadOptions::new(authorizations.clone())
            .with_fetch_hints(FetchHints::EDGE_REFS.with_hidden(true));
        let Some(vertex) = self.get_vertex(id, &options)? else {
            return Ok(false);
        };
        for edge_id in vertex.edge_ids(Direction::Both, &[])? {
            self.delete_edge(&edge_id, authorizations)?;
        }
        let key = ElementKey::vertex(id.clone());
        self.purge(&key)?;
        self.report_index(self.index.delete_element(&key, authorizations), &key);
        Ok(true)
    }

    /// Hard delete an edge; its references on the endpoints are soft deleted.
    #[tracing::instrument(skip(self, authorizations), fields(edge = %id))]
    pub fn delete_edge(&self, id: &ElementId, authorizations: &Authorizations) -> Result<bool> {
        let options = ReadOptions::new(authorizations.clone())
            .with_fetch_hints(FetchHints::NONE.with_hidden(true));
        let Some(edge) = self.get_edge(id, &options)? else {
            return Ok(false);
        };
        let key = ElementKey::edge(id.clone());
        self.drop_edge_refs(&edge, edge.visibility())?;
        self.purge(&key)?;
        self.report_index(self.index.delete_element(&key, authorizations), &key);
        Ok(true)
    }

    fn purge(&self, key: &ElementKey) -> Result<()> {
        {
            let lock = self.element_lock(key);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.backend.purge(key)?;
        }
        self.locks.remove(key);
        tracing::debug!(element = %key, "[graph] Purged");
        Ok(())
    }

    fn drop_edge_refs(&self, edge: &Edge, visibility: &Visibility) -> Result<()> {
        for (vertex_id, direction) in [
            (edge.out_vertex_id(), Direction::Out),
            (edge.in_vertex_id(), Direction::In),
        ] {
            let vertex_key = ElementKey::vertex(vertex_id.clone());
            self.append_locked(&vertex_key, |clock, existing| {
                if existing.is_none() {
                    return Ok(Vec::new());
                }
                Ok(vec![Mutation::SoftDeleteEdgeRef(SoftDeleteEdgeRef {
                    direction,
                    edge_id: edge.id().clone(),
                    visibility: visibility.clone(),
                    timestamp: clock.now(),
                    data: None,
                })])
            })?;
        }
        Ok(())
    }

    pub(crate) fn report_index(&self, result: anyhow::Result<()>, key: &ElementKey) -> Option<String> {
        match result {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(
                    element = %key,
                    index = self.index.name(),
                    error = %e,
                    "[graph] Search index update failed"
                );
                Some(format!("{:#}", e))
            }
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_element(&self, key: &ElementKey, options: &ReadOptions) -> Result<Option<Element>> {
        Ok(self
            .backend
            .load(key)?
            .and_then(|timeline| materialize(key, &timeline, options)))
    }

    pub fn get_vertex(&self, id: &ElementId, options: &ReadOptions) -> Result<Option<Vertex>> {
        Ok(self
            .get_element(&ElementKey::vertex(id.clone()), options)?
            .and_then(Element::into_vertex))
    }

    pub fn get_edge(&self, id: &ElementId, options: &ReadOptions) -> Result<Option<Edge>> {
        Ok(self
            .get_element(&ElementKey::edge(id.clone()), options)?
            .and_then(Element::into_edge))
    }

    /// Visible elements among `keys`, in input order; missing ones are skipped.
    pub fn get_elements(&self, keys: &[ElementKey], options: &ReadOptions) -> Result<Vec<Element>> {
        let mut out = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(LOAD_BATCH) {
            let timelines = self.backend.load_many(chunk)?;
            out.extend(
                chunk
                    .iter()
                    .zip(timelines)
                    .filter_map(|(key, timeline)| materialize(key, &timeline?, options)),
            );
        }
        Ok(out)
    }

    pub fn get_vertices(&self, ids: &[ElementId], options: &ReadOptions) -> Result<Vec<Vertex>> {
        let keys: Vec<ElementKey> = ids.iter().cloned().map(ElementKey::vertex).collect();
        Ok(self
            .get_elements(&keys, options)?
            .into_iter()
            .filter_map(Element::into_vertex)
            .collect())
    }

    pub fn get_edges(&self, ids: &[ElementId], options: &ReadOptions) -> Result<Vec<Edge>> {
        let keys: Vec<ElementKey> = ids.iter().cloned().map(ElementKey::edge).collect();
        Ok(self
            .get_elements(&keys, options)?
            .into_iter()
            .filter_map(Element::into_edge)
            .collect())
    }

    /// Ids of every vertex visible under `options`, ordered.
    pub fn vertex_ids(&self, options: &ReadOptions) -> Result<Vec<ElementId>> {
        self.visible_ids(ElementType::Vertex, options)
    }

    /// Ids of every edge visible under `options`, ordered.
    pub fn edge_ids(&self, options: &ReadOptions) -> Result<Vec<ElementId>> {
        self.visible_ids(ElementType::Edge, options)
    }

    fn visible_ids(&self, element_type: ElementType, options: &ReadOptions) -> Result<Vec<ElementId>> {
        let options = options.clone().with_fetch_hints(FetchHints {
            include_hidden: options.fetch_hints.include_hidden,
            ..FetchHints::NONE
        });
        let keys: Vec<ElementKey> = self
            .backend
            .element_ids(element_type)?
            .into_iter()
            .map(|id| ElementKey { element_type, id })
            .collect();
        Ok(self
            .get_elements(&keys, &options)?
            .into_iter()
            .map(|element| element.id().clone())
            .collect())
    }

    /// Vertices adjacent to `id` through visible edge references.
    pub fn get_adjacent_vertices(
        &self,
        id: &ElementId,
        direction: Direction,
        labels: &[&str],
        options: &ReadOptions,
    ) -> Result<Vec<Vertex>> {
        let adjacency = options.clone().with_fetch_hints(FetchHints {
            edge_refs: true,
            ..options.fetch_hints
        });
        let Some(vertex) = self.get_vertex(id, &adjacency)? else {
            return Ok(Vec::new());
        };
        let ids = vertex.vertex_ids(direction, labels)?;
        self.get_vertices(&ids, options)
    }

    /// True when `element` materializes for the caller; extended data reads are gated on it.
    fn owner_visible(&self, element: &ElementKey, options: &ReadOptions) -> Result<bool> {
        let existence = options.clone().with_fetch_hints(FetchHints {
            include_hidden: options.fetch_hints.include_hidden,
            ..FetchHints::NONE
        });
        Ok(self.get_element(element, &existence)?.is_some())
    }

    /// Every visible row of one extended data table of a visible element.
    pub fn get_extended_data(
        &self,
        element: &ElementKey,
        table: &str,
        options: &ReadOptions,
    ) -> Result<Vec<ExtendedDataRow>> {
        if !self.owner_visible(element, options)? {
            return Ok(Vec::new());
        }
        let mut rows = Vec::new();
        for row_id in self.backend.row_ids(element, table)? {
            let key = ExtendedRowKey::new(element.clone(), table, row_id);
            if let Some(row) = self.load_extended_row(&key, options)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// One extended data row; `None` when the owning element is deleted or invisible.
    pub fn get_extended_row(
        &self,
        key: &ExtendedRowKey,
        options: &ReadOptions,
    ) -> Result<Option<ExtendedDataRow>> {
        if !self.owner_visible(&key.element, options)? {
            return Ok(None);
        }
        self.load_extended_row(key, options)
    }

    fn load_extended_row(
        &self,
        key: &ExtendedRowKey,
        options: &ReadOptions,
    ) -> Result<Option<ExtendedDataRow>> {
        Ok(self.backend.load_row(key)?.and_then(|timeline| {
            materialize_extended_row(key, &timeline, &options.authorizations, options.as_of)
        }))
    }

    /// Bytes of a value held by the large-object store.
    pub fn read_stream(&self, reference: &StreamingRef) -> Result<Vec<u8>> {
        blob::load_verified(self.blobs.as_ref(), reference)
    }

    /// Raw timeline, for inspection tools.
    pub fn timeline(&self, key: &ElementKey) -> Result<Option<Timeline<Mutation>>> {
        self.backend.load(key)
    }
}
