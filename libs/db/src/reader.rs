//! Async read pipeline.
//!
//! Queries travel over a flume MPMC channel to a pool of consumers sharing one
//! [`Graph`]. Each query runs on the blocking pool under the caller's timeout.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::element::{Edge, Vertex};
use crate::error::{Error, Result};
use crate::extended::ExtendedDataRow;
use crate::graph::{FindPathOptions, Graph, GraphPath};
use crate::id::{ElementId, ElementKey};
use crate::materialize::ReadOptions;
use crate::request::{RequestEnvelope, RequestMeta};

#[derive(Debug, Clone)]
pub enum Query {
    VertexById {
        id: ElementId,
        options: ReadOptions,
    },
    EdgeById {
        id: ElementId,
        options: ReadOptions,
    },
    ExtendedRows {
        element: ElementKey,
        table: String,
        options: ReadOptions,
    },
    FindPaths {
        paths: FindPathOptions,
        options: ReadOptions,
    },
}

#[derive(Debug)]
pub enum QueryReply {
    Vertex(Option<Vertex>),
    Edge(Option<Edge>),
    Rows(Vec<ExtendedDataRow>),
    Paths(Vec<GraphPath>),
}

impl RequestMeta for Query {
    type Reply = QueryReply;

    fn request_kind(&self) -> &'static str {
        match self {
            Query::VertexById { .. } => "vertex_by_id",
            Query::EdgeById { .. } => "edge_by_id",
            Query::ExtendedRows { .. } => "extended_rows",
            Query::FindPaths { .. } => "find_paths",
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::VertexById { id, .. } => write!(f, "VertexById({})", id),
            Query::EdgeById { id, .. } => write!(f, "EdgeById({})", id),
            Query::ExtendedRows { element, table, .. } => {
                write!(f, "ExtendedRows({}, {})", element, table)
            }
            Query::FindPaths { paths, .. } => write!(
                f,
                "FindPaths({} -> {}, {} hops)",
                paths.source, paths.destination, paths.max_hops
            ),
        }
    }
}

impl Query {
    fn execute<B: Backend>(self, graph: &Graph<B>) -> Result<QueryReply> {
        match self {
            Query::VertexById { id, options } => graph.get_vertex(&id, &options).map(QueryReply::Vertex),
            Query::EdgeById { id, options } => graph.get_edge(&id, &options).map(QueryReply::Edge),
            Query::ExtendedRows {
                element,
                table,
                options,
            } => graph
                .get_extended_data(&element, &table, &options)
                .map(QueryReply::Rows),
            Query::FindPaths { paths, options } => {
                graph.find_paths(&paths, &options).map(QueryReply::Paths)
            }
        }
    }
}

pub type QueryRequest = RequestEnvelope<Query>;

/// Configuration for the query reader
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Size of the MPMC channel buffer
    pub channel_buffer_size: usize,
    /// Timeout applied by [`Reader::query`]
    pub default_timeout: Duration,
    /// Consumers started by [`spawn_reader`]
    pub num_workers: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 1000,
            default_timeout: Duration::from_secs(5),
            num_workers: 4,
        }
    }
}

/// Handle for sending queries to the consumer pool
#[derive(Debug, Clone)]
pub struct Reader {
    sender: flume::Sender<QueryRequest>,
    default_timeout: Duration,
}

impl Reader {
    pub fn new(sender: flume::Sender<QueryRequest>, default_timeout: Duration) -> Self {
        Reader {
            sender,
            default_timeout,
        }
    }

    /// `run` with the configured default timeout.
    pub async fn query(&self, query: Query) -> Result<QueryReply> {
        self.run(query, self.default_timeout).await
    }

    /// Send a query and wait for its reply.
    pub async fn run(&self, query: Query, timeout: Duration) -> Result<QueryReply> {
        let (request, reply) = RequestEnvelope::new(query, Some(timeout));
        self.sender
            .send_async(request)
            .await
            .context("Failed to send query to reader queue")
            .map_err(Error::BackendIo)?;
        reply
            .await
            .context("Query consumer dropped the reply channel")
            .map_err(Error::BackendIo)?
    }

    pub async fn vertex_by_id(
        &self,
        id: impl Into<ElementId>,
        options: ReadOptions,
        timeout: Duration,
    ) -> Result<Option<Vertex>> {
        let query = Query::VertexById {
            id: id.into(),
            options,
        };
        match self.run(query, timeout).await? {
            QueryReply::Vertex(vertex) => Ok(vertex),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn edge_by_id(
        &self,
        id: impl Into<ElementId>,
        options: ReadOptions,
        timeout: Duration,
    ) -> Result<Option<Edge>> {
        let query = Query::EdgeById {
            id: id.into(),
            options,
        };
        match self.run(query, timeout).await? {
            QueryReply::Edge(edge) => Ok(edge),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn extended_rows(
        &self,
        element: ElementKey,
        table: impl Into<String>,
        options: ReadOptions,
        timeout: Duration,
    ) -> Result<Vec<ExtendedDataRow>> {
        let query = Query::ExtendedRows {
            element,
            table: table.into(),
            options,
        };
        match self.run(query, timeout).await? {
            QueryReply::Rows(rows) => Ok(rows),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn find_paths(
        &self,
        paths: FindPathOptions,
        options: ReadOptions,
        timeout: Duration,
    ) -> Result<Vec<GraphPath>> {
        match self.run(Query::FindPaths { paths, options }, timeout).await? {
            QueryReply::Paths(paths) => Ok(paths),
            other => Err(unexpected(&other)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_disconnected()
    }
}

fn unexpected(reply: &QueryReply) -> Error {
    Error::integrity(format!("query answered with unexpected reply {:?}", reply))
}

pub fn create_reader(config: ReaderConfig) -> (Reader, flume::Receiver<QueryRequest>) {
    let (sender, receiver) = flume::bounded(config.channel_buffer_size);
    (Reader::new(sender, config.default_timeout), receiver)
}

/// Create a reader and start `config.num_workers` consumers over `graph`.
pub fn spawn_reader<B: Backend>(
    config: ReaderConfig,
    graph: Arc<Graph<B>>,
) -> (Reader, Vec<JoinHandle<()>>) {
    let num_workers = config.num_workers.max(1);
    let (reader, receiver) = create_reader(config);
    (reader, spawn_query_consumer_pool(receiver, graph, num_workers))
}

async fn execute_request<B: Backend>(graph: &Arc<Graph<B>>, mut request: QueryRequest) {
    tracing::debug!(query = %request.payload, "Processing graph query");
    let query = request.payload.clone();
    let graph = graph.clone();
    let exec = tokio::task::spawn_blocking(move || query.execute(&graph));

    let joined = match request.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, exec).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(kind = request.kind(), ?timeout, "Query timed out");
                request.respond(Err(Error::Timeout(timeout)));
                return;
            }
        },
        None => exec.await,
    };
    let result = joined
        .context("query task panicked")
        .map_err(Error::BackendIo)
        .and_then(|result| result);
    tracing::trace!(
        kind = request.kind(),
        elapsed_nanos = request.elapsed_nanos(),
        ok = result.is_ok(),
        "Query finished"
    );
    request.respond(result);
}

/// Spawn `num_workers` consumers sharing `graph` and one receiver.
pub fn spawn_query_consumer_pool<B: Backend>(
    receiver: flume::Receiver<QueryRequest>,
    graph: Arc<Graph<B>>,
    num_workers: usize,
) -> Vec<JoinHandle<()>> {
    let handles = (0..num_workers)
        .map(|worker_id| {
            let receiver = receiver.clone();
            let graph = graph.clone();
            tokio::spawn(async move {
                tracing::info!(worker_id, "Graph query worker starting");
                while let Ok(request) = receiver.recv_async().await {
                    execute_request(&graph, request).await;
                }
                tracing::info!(worker_id, "Graph query worker shutting down");
            })
        })
        .collect();
    tracing::info!(num_workers, "Spawned graph query consumer pool");
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visibility::{Authorizations, Visibility};

    fn seeded() -> Arc<Graph<crate::backend::MemoryBackend>> {
        let graph = Graph::in_memory();
        let auths = Authorizations::empty();
        graph
            .prepare_vertex("v1", Visibility::empty())
            .set_property("k", "name", "Alice", Visibility::empty())
            .add_extended_data("logins", "r1", "ip", "", "10.0.0.1", Visibility::empty())
            .save(&auths)
            .unwrap();
        graph.prepare_vertex("v2", Visibility::empty()).save(&auths).unwrap();
        graph
            .prepare_edge("e1", "v1", "v2", "knows", Visibility::empty())
            .save(&auths)
            .unwrap();
        Arc::new(graph)
    }

    #[tokio::test]
    async fn test_pool_answers_every_query_kind() {
        let (reader, receiver) = create_reader(ReaderConfig::default());
        let handles = spawn_query_consumer_pool(receiver, seeded(), 2);
        let options = ReadOptions::new(Authorizations::empty());
        let timeout = Duration::from_secs(5);

        let vertex = reader
            .vertex_by_id("v1", options.clone(), timeout)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(vertex.property_value("name").unwrap().and_then(|v| v.as_str()), Some("Alice"));

        let edge = reader.edge_by_id("e1", options.clone(), timeout).await.unwrap().unwrap();
        assert_eq!(edge.label(), "knows");
        assert!(reader
            .edge_by_id("nope", options.clone(), timeout)
            .await
            .unwrap()
            .is_none());

        let rows = reader
            .extended_rows(ElementKey::vertex("v1"), "logins", options.clone(), timeout)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let paths = reader
            .find_paths(FindPathOptions::new("v1", "v2", 2), options, timeout)
            .await
            .unwrap();
        assert_eq!(paths.len(), 1);

        drop(reader);
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_query_uses_default_timeout() {
        let config = ReaderConfig {
            num_workers: 1,
            ..ReaderConfig::default()
        };
        let (reader, _handles) = spawn_reader(config, seeded());
        let reply = reader
            .query(Query::VertexById {
                id: "v2".into(),
                options: ReadOptions::new(Authorizations::empty()),
            })
            .await
            .unwrap();
        assert!(matches!(reply, QueryReply::Vertex(Some(_))));
    }

    #[tokio::test]
    async fn test_reader_closed_detection() {
        let (reader, receiver) = create_reader(ReaderConfig::default());
        assert!(!reader.is_closed());
        drop(receiver);
        assert!(reader.is_closed());
    }
}
