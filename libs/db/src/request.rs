use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;

use crate::error::Result;

/// Metadata for request payloads carried by RequestEnvelope.
pub trait RequestMeta: Send + 'static {
    type Reply: Send + 'static;

    /// Stable label for tracing.
    fn request_kind(&self) -> &'static str;
}

/// Generic envelope for request/response over async channels.
pub struct RequestEnvelope<T: RequestMeta> {
    pub payload: T,
    pub reply: Option<oneshot::Sender<Result<T::Reply>>>,
    pub timeout: Option<Duration>,
    pub request_id: u64,
    pub created_at: Instant,
}

impl<T: RequestMeta> RequestEnvelope<T> {
    pub fn new(
        payload: T,
        timeout: Option<Duration>,
    ) -> (Self, oneshot::Receiver<Result<T::Reply>>) {
        let (reply, receiver) = oneshot::channel();
        let envelope = Self {
            payload,
            reply: Some(reply),
            timeout,
            request_id: new_request_id(),
            created_at: Instant::now(),
        };
        (envelope, receiver)
    }

    pub fn kind(&self) -> &'static str {
        self.payload.request_kind()
    }

    /// Deliver the result; a caller that stopped waiting is ignored.
    pub fn respond(&mut self, result: Result<T::Reply>) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result);
        }
    }

    pub fn elapsed_nanos(&self) -> u64 {
        self.created_at.elapsed().as_nanos() as u64
    }
}

impl<T: RequestMeta + std::fmt::Debug> std::fmt::Debug for RequestEnvelope<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEnvelope")
            .field("payload", &self.payload)
            .field("timeout", &self.timeout)
            .field("request_id", &self.request_id)
            .finish()
    }
}

pub fn new_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
