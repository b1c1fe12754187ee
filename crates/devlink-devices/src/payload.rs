/*!
 * Opaque payloads crossing the channel boundary.
 *
 * Channels forward payloads between callers and transports without looking
 * inside them; only scripts and message handlers interpret the content.
 */
use std::fmt;
use std::io::Cursor;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{ChannelError, Result};

const DEFAULT_CHARSET: &str = "utf-8";

/// A cheaply cloneable view of data in flight
#[derive(Clone, PartialEq, Eq)]
pub struct Payload {
    data: Bytes,
    charset: Option<String>,
}

impl Payload {
    /// Wrap raw bytes with no declared charset
    pub fn from_bytes<B: Into<Bytes>>(data: B) -> Self {
        Self {
            data: data.into(),
            charset: None,
        }
    }

    /// Wrap text; the charset is recorded as UTF-8
    pub fn from_string<S: Into<String>>(text: S) -> Self {
        Self {
            data: Bytes::from(text.into()),
            charset: Some(DEFAULT_CHARSET.to_string()),
        }
    }

    /// Declare the charset of the payload
    pub fn with_charset<S: Into<String>>(mut self, charset: S) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Declared charset, if any
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// A shared handle to the underlying buffer
    pub fn as_byte_buffer(&self) -> Bytes {
        self.data.clone()
    }

    /// Interpret the payload as UTF-8 text
    pub fn as_str(&self) -> Result<&str> {
        if let Some(charset) = self.charset() {
            if !charset.eq_ignore_ascii_case(DEFAULT_CHARSET) && !charset.eq_ignore_ascii_case("utf8") {
                return Err(ChannelError::payload(format!("unsupported charset {}", charset)));
            }
        }
        std::str::from_utf8(&self.data)
            .map_err(|e| ChannelError::payload(format!("payload is not valid UTF-8: {}", e)))
    }

    /// A `std::io::Read` view over the payload
    pub fn reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.data.clone())
    }

    /// Deserialize the payload as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.data)
            .map_err(|e| ChannelError::payload(format!("invalid JSON payload: {}", e)))
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("len", &self.data.len())
            .field("charset", &self.charset)
            .finish()
    }
}

impl From<&'static str> for Payload {
    fn from(text: &'static str) -> Self {
        Self::from_string(text)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::from_string(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::from_bytes(data)
    }
}
