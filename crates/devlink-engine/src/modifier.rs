/*!
 * Record modifiers.
 *
 * A modifier declares the attributes it writes and fills them in from the
 * source record. Modifiers are pure; the pipeline owns merging.
 */
use std::collections::HashMap;
use std::fmt::Debug;

use chrono::Utc;

use devlink_core::attribute::{Attribute, AttributeSet};
use devlink_core::record::Record;
use devlink_core::types::Value;

/// A transform contributing a fixed set of attributes to a record
pub trait RecordModifier: Send + Sync + Debug {
    /// Attributes this modifier writes
    fn attributes(&self) -> &AttributeSet;

    /// Write this modifier's fields into `output`
    fn process(&self, source: &Record, output: &mut HashMap<Attribute, Value>);
}

/// Stamps each record with the current time
#[derive(Debug, Clone)]
pub struct TimestampModifier {
    attributes: AttributeSet,
}

impl TimestampModifier {
    /// Create a modifier writing [`Attribute::timestamp`]
    pub fn new() -> Self {
        Self {
            attributes: AttributeSet::from([Attribute::timestamp()]),
        }
    }
}

impl Default for TimestampModifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordModifier for TimestampModifier {
    fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    fn process(&self, _source: &Record, output: &mut HashMap<Attribute, Value>) {
        output.insert(Attribute::timestamp(), Value::Timestamp(Utc::now()));
    }
}

/// Adds constant fields, such as a device name or unit
#[derive(Debug, Clone)]
pub struct StaticFieldsModifier {
    attributes: AttributeSet,
    fields: Vec<(Attribute, Value)>,
}

impl StaticFieldsModifier {
    /// Create a modifier writing the given constant fields
    pub fn new<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (Attribute, Value)>,
    {
        let fields: Vec<_> = fields.into_iter().collect();
        let attributes = fields.iter().map(|(a, _)| a.clone()).collect();
        Self { attributes, fields }
    }
}

impl RecordModifier for StaticFieldsModifier {
    fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    fn process(&self, _source: &Record, output: &mut HashMap<Attribute, Value>) {
        for (attribute, value) in &self.fields {
            output.insert(attribute.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devlink_core::attribute::AttributeType;

    #[test]
    fn test_timestamp_modifier() {
        let modifier = TimestampModifier::new();
        let mut output = HashMap::new();
        modifier.process(&Record::empty(), &mut output);

        assert!(modifier.attributes().contains(&Attribute::timestamp()));
        assert!(output.get(&Attribute::timestamp()).unwrap().as_timestamp().is_some());
    }

    #[test]
    fn test_static_fields() {
        let site = Attribute::new("mod.site", AttributeType::String);
        let modifier = StaticFieldsModifier::new([(site.clone(), Value::from("plant-2"))]);
        let mut output = HashMap::new();
        modifier.process(&Record::empty(), &mut output);

        assert_eq!(modifier.attributes().len(), 1);
        assert_eq!(output.get(&site).unwrap().as_str(), Some("plant-2"));
    }
}
