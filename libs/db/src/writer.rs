//! Async write pipeline.
//!
//! - `Writer` - cloneable handle sending batches of [`WriteRequest`]s
//! - `WriterConfig` - channel sizing
//! - `WriteConsumer` - applies batches to a shared [`Graph`] in arrival order
//!
//! ```rust,ignore
//! let (writer, receiver) = create_writer(WriterConfig::default());
//! let consumer = spawn_write_consumer(receiver, WriterConfig::default(), graph.clone());
//!
//! writer.send(vec![WriteRequest::save(ElementWrite::vertex("v1", vis), auths)]).await?;
//! writer.flush().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::graph::{ElementWrite, Graph, SaveReport};
use crate::id::ElementId;
use crate::visibility::Authorizations;

/// Completion signal carried in-band behind earlier writes.
pub struct FlushMarker(oneshot::Sender<Result<()>>);

impl FlushMarker {
    pub fn new() -> (Self, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    fn complete(self, result: Result<()>) {
        let _ = self.0.send(result);
    }
}

impl std::fmt::Debug for FlushMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FlushMarker")
    }
}

#[derive(Debug)]
pub enum WriteRequest {
    Save {
        write: ElementWrite,
        authorizations: Authorizations,
    },
    SoftDeleteVertex {
        id: ElementId,
        authorizations: Authorizations,
    },
    SoftDeleteEdge {
        id: ElementId,
        authorizations: Authorizations,
    },
    DeleteVertex {
        id: ElementId,
        authorizations: Authorizations,
    },
    DeleteEdge {
        id: ElementId,
        authorizations: Authorizations,
    },
    Flush(FlushMarker),
}

impl WriteRequest {
    pub fn save(write: ElementWrite, authorizations: Authorizations) -> Self {
        WriteRequest::Save {
            write,
            authorizations,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            WriteRequest::Save { .. } => "save",
            WriteRequest::SoftDeleteVertex { .. } => "soft_delete_vertex",
            WriteRequest::SoftDeleteEdge { .. } => "soft_delete_edge",
            WriteRequest::DeleteVertex { .. } => "delete_vertex",
            WriteRequest::DeleteEdge { .. } => "delete_edge",
            WriteRequest::Flush(_) => "flush",
        }
    }
}

/// Configuration for the write pipeline
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Size of the MPSC channel buffer
    pub channel_buffer_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_buffer_size: 1000,
        }
    }
}

/// Handle for sending writes to the consumer.
#[derive(Debug, Clone)]
pub struct Writer {
    sender: mpsc::Sender<Vec<WriteRequest>>,
}

impl Writer {
    pub fn new(sender: mpsc::Sender<Vec<WriteRequest>>) -> Self {
        Writer { sender }
    }

    /// Enqueue a batch and return without waiting for it to be applied.
    pub async fn send(&self, requests: Vec<WriteRequest>) -> Result<()> {
        self.sender
            .send(requests)
            .await
            .context("Failed to send writes to writer queue")
            .map_err(Error::BackendIo)
    }

    /// Wait until everything sent before this call has been applied.
    ///
    /// Returns the first write failure since the previous flush, if any.
    pub async fn flush(&self) -> Result<()> {
        let (marker, rx) = FlushMarker::new();
        self.send(vec![WriteRequest::Flush(marker)]).await?;
        rx.await
            .context("Flush failed - consumer dropped completion channel")
            .map_err(Error::BackendIo)?
    }

    pub async fn flush_with_timeout(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.flush())
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }

    /// `send` followed by `flush`.
    pub async fn send_sync(&self, requests: Vec<WriteRequest>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        self.send(requests).await?;
        self.flush().await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

pub fn create_writer(config: WriterConfig) -> (Writer, mpsc::Receiver<Vec<WriteRequest>>) {
    let (sender, receiver) = mpsc::channel(config.channel_buffer_size);
    (Writer::new(sender), receiver)
}

/// Applies write batches to a graph; one consumer per graph keeps arrival order.
pub struct WriteConsumer<B: Backend> {
    receiver: mpsc::Receiver<Vec<WriteRequest>>,
    config: WriterConfig,
    graph: Arc<Graph<B>>,
}

impl<B: Backend> WriteConsumer<B> {
    pub fn new(
        receiver: mpsc::Receiver<Vec<WriteRequest>>,
        config: WriterConfig,
        graph: Arc<Graph<B>>,
    ) -> Self {
        Self {
            receiver,
            config,
            graph,
        }
    }

    /// Process batches until every `Writer` is dropped.
    #[tracing::instrument(skip(self), name = "write_consumer")]
    pub async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!(config = ?self.config, "Starting write consumer");
        let mut failure: Option<Error> = None;
        while let Some(batch) = self.receiver.recv().await {
            let graph = self.graph.clone();
            let carried = failure.take();
            failure = tokio::task::spawn_blocking(move || apply_batch(&graph, batch, carried))
                .await
                .context("write batch task panicked")?;
        }
        if let Some(e) = failure {
            tracing::warn!(error = %e, "Write consumer closing with an unreported failure");
        }
        tracing::info!("Write consumer shutting down - channel closed");
        Ok(())
    }
}

/// Apply one batch in order; returns the failure still waiting for a flush.
#[tracing::instrument(skip_all, fields(batch_size = batch.len()))]
fn apply_batch<B: Backend>(
    graph: &Graph<B>,
    batch: Vec<WriteRequest>,
    mut failure: Option<Error>,
) -> Option<Error> {
    for request in batch {
        let kind = request.kind();
        let result = match request {
            WriteRequest::Flush(marker) => {
                marker.complete(failure.take().map_or(Ok(()), Err));
                continue;
            }
            WriteRequest::Save {
                write,
                authorizations,
            } => graph.apply(write, &authorizations).map(|report| log_report(&report)),
            WriteRequest::SoftDeleteVertex { id, authorizations } => {
                graph.soft_delete_vertex(&id, &authorizations).map(drop)
            }
            WriteRequest::SoftDeleteEdge { id, authorizations } => {
                graph.soft_delete_edge(&id, &authorizations).map(drop)
            }
            WriteRequest::DeleteVertex { id, authorizations } => {
                graph.delete_vertex(&id, &authorizations).map(drop)
            }
            WriteRequest::DeleteEdge { id, authorizations } => {
                graph.delete_edge(&id, &authorizations).map(drop)
            }
        };
        if let Err(e) = result {
            tracing::error!(kind, error = %e, "Write failed");
            failure.get_or_insert(e);
        }
    }
    failure
}

fn log_report(report: &SaveReport) {
    match &report.index_error {
        Some(error) => {
            tracing::debug!(element = %report.element, error = %error, "Saved, index update failed")
        }
        None => tracing::debug!(element = %report.element, "Saved"),
    }
}

pub fn spawn_write_consumer<B: Backend>(
    receiver: mpsc::Receiver<Vec<WriteRequest>>,
    config: WriterConfig,
    graph: Arc<Graph<B>>,
) -> JoinHandle<anyhow::Result<()>> {
    let consumer = WriteConsumer::new(receiver, config, graph);
    tokio::spawn(async move { consumer.run().await })
}
