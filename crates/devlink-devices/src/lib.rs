/*!
 * devlink Devices
 *
 * This crate provides the channel layer of devlink: sequential request
 * dispatch over a transport, request tasks with cancellation, unsolicited
 * message delivery, and a capability registry.
 */

#![warn(missing_docs)]

// Re-export core types
pub use devlink_core::prelude;

pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod payload;
pub mod protocols;
pub mod registry;
pub mod request;
pub mod sequential;
pub mod task;
pub mod transport;

pub use channel::{AsyncIoHandler, Channel, ChannelExt, IoHandler};
pub use dispatcher::{PushDispatcher, SubscriptionId};
pub use error::{ChannelError, Result, TransportError};
pub use payload::Payload;
pub use registry::{CapabilityRegistry, InMemoryRegistry, RegisteredCapability};
pub use request::IoRequest;
pub use sequential::{PushSink, SequentialChannel};
pub use task::{IoTask, ResponseFuture, TaskState};
pub use transport::Transport;

/// devlink devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device layer
pub fn init() -> std::result::Result<(), devlink_core::error::Error> {
    tracing::info!("devlink devices {} initialized", VERSION);
    Ok(())
}
