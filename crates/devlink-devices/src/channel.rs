/*!
 * The channel abstraction.
 *
 * A channel is the transport-facing dispatcher for one physical or logical
 * connection. Requests are executed one at a time in submission order;
 * unsolicited messages from the device reach a single [`AsyncIoHandler`].
 */
use std::fmt::Debug;
use std::sync::Arc;

use devlink_core::types::Id;

use crate::error::Result;
use crate::payload::Payload;
use crate::request::IoRequest;
use crate::task::{IoTask, OneshotHandler, ResponseFuture};

/// Receives the outcome of one submitted request
///
/// Exactly one of the two methods is called, exactly once. Implementations
/// run on the channel worker and must return quickly.
pub trait IoHandler: Send + Sync {
    /// The transport handled the request
    fn complete(&self, request: &IoRequest, payload: Option<Payload>);

    /// The request failed, was cancelled, or was interrupted
    fn error(&self, request: &IoRequest, error: crate::error::ChannelError);
}

/// Receives unsolicited messages pushed by the device
pub trait AsyncIoHandler: Send + Sync {
    /// A message arrived that no request asked for
    fn on_message(&self, payload: Payload);
}

/// Sequential, asynchronous request dispatcher
pub trait Channel: Send + Sync + Debug {
    /// Channel identifier
    fn id(&self) -> &Id;

    /// Queue a request for execution. Never blocks.
    ///
    /// Fails with [`crate::ChannelError::Closed`] once the channel is closed.
    fn submit(&self, request: IoRequest, handler: Arc<dyn IoHandler>) -> Result<Arc<IoTask>>;

    /// Register the single consumer of unsolicited messages.
    ///
    /// A second registration fails with
    /// [`crate::ChannelError::AsyncHandlerAlreadySet`].
    fn set_async_io_handler(&self, handler: Arc<dyn AsyncIoHandler>) -> Result<()>;

    /// Close the channel, cancelling every queued request.
    ///
    /// Returns `true` for the call that actually closed the channel.
    fn close(&self) -> bool;

    /// Whether the channel has been closed
    fn is_closed(&self) -> bool;
}

/// Future-returning helpers over any [`Channel`]
pub trait ChannelExt: Channel {
    /// Submit a request and await its outcome
    ///
    /// This is the path scripts use when they need a device answer inline.
    fn request(&self, request: IoRequest) -> Result<ResponseFuture> {
        let (handler, rx) = OneshotHandler::new();
        let task = self.submit(request, Arc::new(handler))?;
        Ok(ResponseFuture::new(task, rx))
    }
}

impl<C: Channel + ?Sized> ChannelExt for C {}
