/*!
 * Error types for channels and transports.
 */
use thiserror::Error;

use devlink_core::error::Error as CoreError;

/// Failure reported by a transport while handling one request
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote side answered with something the transport cannot accept
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The transport was told to stop mid-request; fatal to the channel
    #[error("Transport interrupted")]
    Interrupted,
}

impl TransportError {
    /// Create a new protocol error
    pub fn protocol<S: AsRef<str>>(msg: S) -> Self {
        TransportError::Protocol(msg.as_ref().to_string())
    }
}

/// Error type for channel operations
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The channel has been closed
    #[error("Channel closed")]
    Closed,

    /// The request was cancelled before the transport saw it
    #[error("Request cancelled before dispatch")]
    Cancelled,

    /// The request was in flight when the channel was interrupted
    #[error("Request interrupted by channel shutdown")]
    Interrupted,

    /// The transport failed while handling the request
    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),

    /// The request exceeded the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// A second async handler was registered on a channel
    #[error("An async I/O handler is already registered")]
    AsyncHandlerAlreadySet,

    /// A payload could not be interpreted as requested
    #[error("Payload error: {0}")]
    Payload(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl ChannelError {
    /// Create a new payload error
    pub fn payload<S: AsRef<str>>(msg: S) -> Self {
        ChannelError::Payload(msg.as_ref().to_string())
    }

    /// Whether the request never reached the transport
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChannelError::Cancelled)
    }
}

impl From<TransportError> for ChannelError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Interrupted => ChannelError::Interrupted,
            other => ChannelError::Transport(other),
        }
    }
}

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_wrapping() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: ChannelError = TransportError::from(io).into();
        assert!(matches!(err, ChannelError::Transport(TransportError::Io(_))));

        let err: ChannelError = TransportError::Interrupted.into();
        assert!(matches!(err, ChannelError::Interrupted));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(ChannelError::Cancelled.is_cancelled());
        assert_eq!(ChannelError::Closed.to_string(), "Channel closed");
    }
}
