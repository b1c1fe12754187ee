/*!
 * I/O request instances.
 */
use std::collections::HashMap;

use devlink_core::types::Id;

use crate::payload::Payload;

/// One request submitted to a channel
///
/// The caller fills in named parameters before submission; transports read
/// them when the request is dispatched.
#[derive(Debug, Clone)]
pub struct IoRequest {
    id: Id,
    parameters: HashMap<String, Payload>,
}

impl IoRequest {
    /// Create a request with the given identifier
    pub fn new<I: Into<Id>>(id: I) -> Self {
        Self {
            id: id.into(),
            parameters: HashMap::new(),
        }
    }

    /// Request identifier
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Set a parameter (builder style)
    pub fn with_parameter<K: Into<String>, P: Into<Payload>>(mut self, name: K, value: P) -> Self {
        self.set_parameter(name, value);
        self
    }

    /// Set a parameter, replacing any previous value
    pub fn set_parameter<K: Into<String>, P: Into<Payload>>(&mut self, name: K, value: P) {
        self.parameters.insert(name.into(), value.into());
    }

    /// Look a parameter up by name
    pub fn parameter(&self, name: &str) -> Option<&Payload> {
        self.parameters.get(name)
    }

    /// All parameters
    pub fn parameters(&self) -> &HashMap<String, Payload> {
        &self.parameters
    }
}
