/*!
 * Capability registry for devlink.
 *
 * Records which attribute sets are available where, so callers can find a
 * device operation by the data it produces.
 */
use parking_lot::RwLock;
use tracing::debug;

use devlink_core::attribute::{Attribute, AttributeSet};
use devlink_core::error::{Error, Result};
use devlink_core::types::Id;

/// One published capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredCapability {
    /// Capability identifier, usually the operation id
    pub id: Id,
    /// Attributes the capability produces
    pub attributes: AttributeSet,
}

impl RegisteredCapability {
    /// Create a new capability entry
    pub fn new<I: Into<Id>>(id: I, attributes: AttributeSet) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }
}

/// Lookup of published capabilities
pub trait CapabilityRegistry: Send + Sync {
    /// Get a capability by id
    fn get(&self, id: &Id) -> Option<RegisteredCapability>;

    /// All registered capabilities
    fn get_all(&self) -> Vec<RegisteredCapability>;

    /// Capabilities that provide every attribute in `with` and none in `without`
    fn get_by_attribute(&self, with: &AttributeSet, without: &AttributeSet) -> Vec<RegisteredCapability>;

    /// Register a capability. Ids must be unique.
    fn add(&self, capability: RegisteredCapability) -> Result<()>;

    /// Remove a capability by id
    fn remove(&self, id: &Id) -> Option<RegisteredCapability>;
}

/// Linear-scan, in-memory registry
#[derive(Debug)]
pub struct InMemoryRegistry {
    entries: RwLock<Vec<RegisteredCapability>>,
}

impl InMemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Number of registered capabilities
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn provides_none(attributes: &AttributeSet, without: &AttributeSet) -> bool {
    !without.iter().any(|a: &Attribute| attributes.contains(a))
}

impl CapabilityRegistry for InMemoryRegistry {
    fn get(&self, id: &Id) -> Option<RegisteredCapability> {
        self.entries.read().iter().find(|c| &c.id == id).cloned()
    }

    fn get_all(&self) -> Vec<RegisteredCapability> {
        self.entries.read().clone()
    }

    fn get_by_attribute(&self, with: &AttributeSet, without: &AttributeSet) -> Vec<RegisteredCapability> {
        self.entries
            .read()
            .iter()
            .filter(|c| c.attributes.is_superset_of(with) && provides_none(&c.attributes, without))
            .cloned()
            .collect()
    }

    fn add(&self, capability: RegisteredCapability) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.iter().any(|c| c.id == capability.id) {
            return Err(Error::invalid_argument(format!(
                "Capability with ID {} already registered",
                capability.id
            )));
        }
        debug!("Registered capability {}", capability.id);
        entries.push(capability);
        Ok(())
    }

    fn remove(&self, id: &Id) -> Option<RegisteredCapability> {
        let mut entries = self.entries.write();
        let index = entries.iter().position(|c| &c.id == id)?;
        let removed = entries.remove(index);
        debug!("Removed capability {}", id);
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devlink_core::attribute::AttributeType;

    fn attr(name: &str) -> Attribute {
        Attribute::new(name, AttributeType::Float)
    }

    #[test]
    fn test_add_lookup_remove() {
        let registry = InMemoryRegistry::new();

        let temp = AttributeSet::from([attr("reg.temp")]);
        let temp_hum = AttributeSet::from([attr("reg.temp"), attr("reg.hum")]);
        registry.add(RegisteredCapability::new("temp", temp)).unwrap();
        registry.add(RegisteredCapability::new("temp-hum", temp_hum.clone())).unwrap();
        assert!(registry.add(RegisteredCapability::new("temp", temp_hum)).is_err());

        let with = AttributeSet::from([attr("reg.temp")]);
        assert_eq!(registry.get_by_attribute(&with, &AttributeSet::default()).len(), 2);

        let without = AttributeSet::from([attr("reg.hum")]);
        let found = registry.get_by_attribute(&with, &without);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.as_str(), "temp");

        assert!(registry.remove(&Id::from("temp")).is_some());
        assert!(registry.remove(&Id::from("temp")).is_none());
        assert!(registry.get(&Id::from("temp")).is_none());
        assert_eq!(registry.get_all().len(), 1);
        assert_eq!(registry.len(), 1);
    }
}
