/*!
 * Error types for the devlink engine crate.
 */
use thiserror::Error;

/// Error type for devlink engine operations
#[derive(Error, Debug)]
pub enum Error {
    /// A caller supplied an argument that cannot be honoured
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation or scheduler was used after it stopped
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No registered operation covers the requested attributes
    #[error("No operation found: {0}")]
    NoOperationFound(String),

    /// Two record modifiers claim the same attribute
    #[error("Attribute conflict: {0}")]
    AttributeConflict(String),

    /// An operation was wired inconsistently
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A script failed
    #[error("Script error: {0}")]
    Script(String),

    /// A pushed message could not be decoded
    #[error("Message error: {0}")]
    Message(String),

    /// Channel error
    #[error("Channel error: {0}")]
    Channel(#[from] devlink_devices::ChannelError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] devlink_core::error::Error),

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for devlink engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new invalid argument error
    pub fn invalid_argument<S: AsRef<str>>(msg: S) -> Self {
        Error::InvalidArgument(msg.as_ref().to_string())
    }

    /// Create a new invalid state error
    pub fn invalid_state<S: AsRef<str>>(msg: S) -> Self {
        Error::InvalidState(msg.as_ref().to_string())
    }

    /// Create a new no-operation-found error
    pub fn no_operation_found<S: AsRef<str>>(msg: S) -> Self {
        Error::NoOperationFound(msg.as_ref().to_string())
    }

    /// Create a new attribute conflict error
    pub fn attribute_conflict<S: AsRef<str>>(msg: S) -> Self {
        Error::AttributeConflict(msg.as_ref().to_string())
    }

    /// Create a new configuration error
    pub fn configuration<S: AsRef<str>>(msg: S) -> Self {
        Error::Configuration(msg.as_ref().to_string())
    }

    /// Create a new script error
    pub fn script<S: AsRef<str>>(msg: S) -> Self {
        Error::Script(msg.as_ref().to_string())
    }

    /// Create a new message error
    pub fn message<S: AsRef<str>>(msg: S) -> Self {
        Error::Message(msg.as_ref().to_string())
    }

    /// Create a new other error
    pub fn other<S: AsRef<str>>(msg: S) -> Self {
        Error::Other(msg.as_ref().to_string())
    }

    /// Whether no operation matched the request
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::NoOperationFound(_))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
