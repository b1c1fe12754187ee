/*!
 * Transport definitions for devlink.
 *
 * A transport performs the protocol-specific work behind a channel. The
 * channel owns ordering, cancellation and shutdown; the transport only turns
 * one request into one answer.
 */
use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::payload::Payload;
use crate::request::IoRequest;
use crate::sequential::PushSink;

/// Protocol-specific request execution
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Short protocol name used in logs
    fn name(&self) -> &str;

    /// Called once when the channel starts, with the sink for unsolicited messages
    fn attach(&self, _sink: PushSink) {}

    /// Execute one request.
    ///
    /// Returning [`TransportError::Interrupted`] is treated as an intentional
    /// shutdown: the request fails and the channel closes itself. Any other
    /// error fails only this request.
    async fn handle_request(&self, request: &IoRequest) -> Result<Option<Payload>, TransportError>;

    /// Called once by the channel worker after it stops
    async fn on_close(&self) {}
}
