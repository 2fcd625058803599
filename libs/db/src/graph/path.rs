//! Path finding over vertex adjacency.
//!
//! One and two hops are answered by set membership and intersection of the
//! endpoints' adjacency; longer searches expand a whole hop of partial paths
//! at a time so each level costs one batched load.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::Graph;
use crate::backend::Backend;
use crate::element::FetchHints;
use crate::error::{Error, Result};
use crate::id::{Direction, ElementId};
use crate::materialize::ReadOptions;

/// Vertex ids from source to destination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path(Vec<ElementId>);

impl Path {
    pub fn vertices(&self) -> &[ElementId] {
        &self.0
    }

    /// Number of edges traversed.
    pub fn hops(&self) -> usize {
        self.0.len().saturating_sub(1)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{}", id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindPathOptions {
    pub source: ElementId,
    pub destination: ElementId,
    pub max_hops: usize,
    /// Edge labels to follow; empty follows every label.
    pub labels: Vec<String>,
}

impl FindPathOptions {
    pub fn new(source: impl Into<ElementId>, destination: impl Into<ElementId>, max_hops: usize) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            max_hops,
            labels: Vec::new(),
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }
}

impl<B: Backend> Graph<B> {
    /// Simple paths (no repeated vertex) of at most `max_hops` edges, ordered
    /// by length then vertex ids. Edges are followed in both directions.
    #[tracing::instrument(skip(self, read), fields(source = %options.source, destination = %options.destination, max_hops = options.max_hops))]
    pub fn find_paths(&self, options: &FindPathOptions, read: &ReadOptions) -> Result<Vec<Path>> {
        if options.max_hops == 0 {
            return Err(Error::invalid("max_hops must be at least 1"));
        }
        if options.source == options.destination {
            return Ok(Vec::new());
        }
        let read = read.clone().with_fetch_hints(FetchHints {
            edge_refs: true,
            ..FetchHints::NONE.with_hidden(read.fetch_hints.include_hidden)
        });
        let labels: Vec<&str> = options.labels.iter().map(String::as_str).collect();
        let mut search = Search {
            graph: self,
            read: &read,
            labels: &labels,
            adjacency: HashMap::new(),
        };

        let ends = [options.source.clone(), options.destination.clone()];
        search.load(&ends)?;
        let (Some(source_adjacent), Some(destination_adjacent)) = (
            search.adjacency.get(&options.source).cloned(),
            search.adjacency.get(&options.destination).cloned(),
        ) else {
            return Ok(Vec::new());
        };

        let mut paths = BTreeSet::new();
        if source_adjacent.contains(&options.destination) {
            paths.insert(Path(ends.to_vec()));
        }
        if options.max_hops == 2 {
            let middles: Vec<ElementId> = source_adjacent
                .intersection(&destination_adjacent)
                .filter(|id| **id != options.source && **id != options.destination)
                .cloned()
                .collect();
            // Adjacency may point at vertices deleted since.
            let existing = self.get_vertices(&middles, &read)?;
            for middle in existing {
                paths.insert(Path(vec![
                    options.source.clone(),
                    middle.id().clone(),
                    options.destination.clone(),
                ]));
            }
        } else if options.max_hops > 2 {
            search.expand(options, &mut paths)?;
        }

        tracing::debug!(found = paths.len(), "[graph] Path search finished");
        let mut paths: Vec<Path> = paths.into_iter().collect();
        paths.sort_by(|a, b| a.hops().cmp(&b.hops()).then_with(|| a.cmp(b)));
        Ok(paths)
    }
}

struct Search<'a, B: Backend> {
    graph: &'a Graph<B>,
    read: &'a ReadOptions,
    labels: &'a [&'a str],
    /// Visible vertices and their neighbours; absent means not visible.
    adjacency: HashMap<ElementId, BTreeSet<ElementId>>,
}

impl<B: Backend> Search<'_, B> {
    /// Batch-load adjacency for the ids not yet seen.
    fn load(&mut self, ids: &[ElementId]) -> Result<()> {
        let missing: Vec<ElementId> = ids
            .iter()
            .filter(|id| !self.adjacency.contains_key(*id))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        for vertex in self.graph.get_vertices(&missing, self.read)? {
            let neighbours = vertex.vertex_ids(Direction::Both, self.labels)?;
            self.adjacency
                .insert(vertex.id().clone(), neighbours.into_iter().collect());
        }
        Ok(())
    }

    fn expand(&mut self, options: &FindPathOptions, paths: &mut BTreeSet<Path>) -> Result<()> {
        let mut frontier = vec![vec![options.source.clone()]];
        for hop in 1..=options.max_hops {
            let tails: Vec<ElementId> = frontier
                .iter()
                .filter_map(|path| path.last().cloned())
                .collect();
            self.load(&tails)?;

            let mut next = Vec::new();
            for path in &frontier {
                let Some(tail) = path.last() else { continue };
                let Some(neighbours) = self.adjacency.get(tail) else {
                    continue;
                };
                for neighbour in neighbours {
                    if *neighbour == options.destination {
                        let mut found = path.clone();
                        found.push(neighbour.clone());
                        paths.insert(Path(found));
                    } else if hop < options.max_hops && !path.contains(neighbour) {
                        let mut longer = path.clone();
                        longer.push(neighbour.clone());
                        next.push(longer);
                    }
                }
            }
            tracing::trace!(hop, frontier = next.len(), "[graph] Expanded path frontier");
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(())
    }
}
