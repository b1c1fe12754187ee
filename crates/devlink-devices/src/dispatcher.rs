/*!
 * Push fan-out.
 *
 * A channel accepts exactly one async handler. [`PushDispatcher`] is that
 * handler when several consumers need the same unsolicited messages.
 */
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::channel::{AsyncIoHandler, Channel};
use crate::error::Result;
use crate::payload::Payload;

/// Handle returned by [`PushDispatcher::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Forwards every pushed message to all current subscribers
#[derive(Default)]
pub struct PushDispatcher {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn AsyncIoHandler>)>>,
}

impl PushDispatcher {
    /// Create a dispatcher with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dispatcher and register it as the channel's async handler
    pub fn install(channel: &dyn Channel) -> Result<Arc<Self>> {
        let dispatcher = Arc::new(Self::new());
        channel.set_async_io_handler(dispatcher.clone())?;
        Ok(dispatcher)
    }

    /// Add a subscriber
    pub fn subscribe(&self, handler: Arc<dyn AsyncIoHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, handler));
        id
    }

    /// Remove a subscriber; returns `false` if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl AsyncIoHandler for PushDispatcher {
    fn on_message(&self, payload: Payload) {
        // Snapshot so subscribers may unsubscribe from inside the callback.
        let subscribers: Vec<_> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        trace!(subscribers = subscribers.len(), bytes = payload.len(), "dispatching push");
        for handler in subscribers {
            handler.on_message(payload.clone());
        }
    }
}

impl std::fmt::Debug for PushDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushDispatcher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
