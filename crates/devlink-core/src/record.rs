/*!
 * Records produced by operations.
 *
 * A [`Record`] is an immutable list of attributes paired with a parallel value
 * array. Records are built with [`RecordBuilder`] and never change afterwards.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::attribute::Attribute;
use crate::types::Value;

/// An immutable, ordered set of attribute/value pairs
#[derive(Clone, PartialEq)]
pub struct Record {
    attributes: Arc<[Attribute]>,
    values: Arc<[Value]>,
}

impl Record {
    /// Start building a record
    pub fn builder() -> RecordBuilder {
        RecordBuilder::new()
    }

    /// A record with no fields
    pub fn empty() -> Self {
        RecordBuilder::new().build()
    }

    /// Attributes in record order
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Values in record order, parallel to [`Record::attributes`]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Look a value up by attribute identifier
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position_of(|a| a.id() == name)
            .map(|i| &self.values[i])
    }

    /// Look a value up by attribute
    pub fn get_attribute(&self, attribute: &Attribute) -> Option<&Value> {
        self.position_of(|a| a == attribute)
            .map(|i| &self.values[i])
    }

    /// Whether the record has a field named `name`
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate over `(attribute, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&Attribute, &Value)> {
        self.attributes.iter().zip(self.values.iter())
    }

    /// Combine `computed` fields with `source`.
    ///
    /// Source fields keep their positions; a computed field whose name matches
    /// a source field replaces that value in place. Remaining computed fields
    /// are appended in ascending attribute order.
    pub fn merge(computed: &HashMap<Attribute, Value>, source: &Record) -> Record {
        if computed.is_empty() {
            return source.clone();
        }

        let mut builder = RecordBuilder::with_capacity(source.len() + computed.len());
        let mut consumed = Vec::with_capacity(computed.len());

        for (attribute, value) in source.iter() {
            match computed
                .iter()
                .find(|(c, _)| c.id() == attribute.id())
            {
                Some((c, v)) => {
                    builder = builder.set(c.clone(), v.clone());
                    consumed.push(c.clone());
                }
                None => builder = builder.set(attribute.clone(), value.clone()),
            }
        }

        let mut extra: Vec<_> = computed
            .iter()
            .filter(|(c, _)| !consumed.contains(c))
            .collect();
        extra.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (attribute, value) in extra {
            builder = builder.set(attribute.clone(), value.clone());
        }

        builder.build()
    }

    /// A copy whose fields listed in `order` come first, in that order.
    ///
    /// Fields not named in `order` follow in their original order; names in
    /// `order` that the record lacks are skipped.
    pub fn reordered(&self, order: &[Attribute]) -> Record {
        let mut builder = RecordBuilder::with_capacity(self.len());
        for attribute in order {
            if let Some(value) = self.get_attribute(attribute) {
                builder = builder.set(attribute.clone(), value.clone());
            }
        }
        for (attribute, value) in self.iter() {
            if !order.contains(attribute) {
                builder = builder.set(attribute.clone(), value.clone());
            }
        }
        builder.build()
    }

    fn position_of(&self, pred: impl Fn(&Attribute) -> bool) -> Option<usize> {
        self.attributes.iter().position(pred)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(a, v)| (a.id(), v)))
            .finish()
    }
}

/// Builder for [`Record`]
#[derive(Debug, Default)]
pub struct RecordBuilder {
    attributes: Vec<Attribute>,
    values: Vec<Value>,
}

impl RecordBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty builder with room for `capacity` fields
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            attributes: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    /// Set a field; setting an attribute twice overwrites it in place
    pub fn set<V: Into<Value>>(mut self, attribute: Attribute, value: V) -> Self {
        let value = value.into();
        match self.attributes.iter().position(|a| a == &attribute) {
            Some(i) => self.values[i] = value,
            None => {
                self.attributes.push(attribute);
                self.values.push(value);
            }
        }
        self
    }

    /// Freeze into an immutable record
    pub fn build(self) -> Record {
        Record {
            attributes: self.attributes.into(),
            values: self.values.into(),
        }
    }
}
