/*!
 * In-memory transport.
 *
 * Answers requests with a closure and keeps a log of what it handled. Used to
 * drive channels without real hardware, and to inject unsolicited messages.
 */
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use devlink_core::types::Id;

use crate::error::TransportError;
use crate::payload::Payload;
use crate::request::IoRequest;
use crate::sequential::PushSink;
use crate::transport::Transport;

type Responder = dyn Fn(&IoRequest) -> Result<Option<Payload>, TransportError> + Send + Sync;

/// Transport answering from a closure
pub struct MemoryTransport {
    responder: Box<Responder>,
    latency: Option<Duration>,
    handled: Mutex<Vec<Id>>,
    sink: Mutex<Option<PushSink>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Create a transport whose answers come from `responder`
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&IoRequest) -> Result<Option<Payload>, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            latency: None,
            handled: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// A transport that answers every request with no payload
    pub fn silent() -> Self {
        Self::new(|_| Ok(None))
    }

    /// A transport that echoes the request id back as a UTF-8 payload
    pub fn echo() -> Self {
        Self::new(|request| Ok(Some(Payload::from_string(request.id().as_str()))))
    }

    /// Sleep this long before answering each request
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Wrap in an `Arc` ready for a channel
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Ids of handled requests, in handling order
    pub fn handled(&self) -> Vec<Id> {
        self.handled.lock().clone()
    }

    /// Deliver an unsolicited message through the attached channel
    pub fn push(&self, payload: Payload) -> bool {
        match self.sink.lock().as_ref() {
            Some(sink) => sink.push(payload),
            None => false,
        }
    }

    /// Whether the owning channel has stopped
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("latency", &self.latency)
            .field("handled", &self.handled.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    fn attach(&self, sink: PushSink) {
        *self.sink.lock() = Some(sink);
    }

    async fn handle_request(&self, request: &IoRequest) -> Result<Option<Payload>, TransportError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.handled.lock().push(request.id().clone());
        (self.responder)(request)
    }

    async fn on_close(&self) {
        debug!("memory transport closed");
        self.closed.store(true, Ordering::Release);
    }
}
