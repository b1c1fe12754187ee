/*!
 * Record pipelines.
 *
 * A pipeline runs every modifier against the source record, collects the
 * computed fields, and merges them over the source. Computed fields win on a
 * name collision. Modifiers in one pipeline never write the same attribute.
 */
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use devlink_core::attribute::{Attribute, AttributeSet};
use devlink_core::record::Record;

use crate::error::{Error, Result};
use crate::modifier::RecordModifier;

struct PipelineInner {
    modifiers: Vec<Arc<dyn RecordModifier>>,
    attributes: AttributeSet,
    order: Vec<Attribute>,
}

/// An immutable, validated list of record modifiers
#[derive(Clone)]
pub struct RecordPipeline {
    inner: Option<Arc<PipelineInner>>,
}

impl RecordPipeline {
    /// The pipeline that returns its input unchanged
    pub const EMPTY: RecordPipeline = RecordPipeline { inner: None };

    /// The empty pipeline
    pub fn empty() -> Self {
        Self::EMPTY
    }

    /// Start building a pipeline
    pub fn builder() -> RecordPipelineBuilder {
        RecordPipelineBuilder::new()
    }

    /// Whether this pipeline leaves records untouched
    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// Union of the attributes every modifier writes
    pub fn attributes(&self) -> AttributeSet {
        self.inner
            .as_ref()
            .map(|inner| inner.attributes.clone())
            .unwrap_or_default()
    }

    /// Apply the pipeline to `source`
    pub fn run(&self, source: &Record) -> Record {
        let inner = match &self.inner {
            Some(inner) => inner,
            None => return source.clone(),
        };

        let mut computed = HashMap::with_capacity(inner.attributes.len());
        for modifier in &inner.modifiers {
            modifier.process(source, &mut computed);
        }

        let merged = Record::merge(&computed, source);
        if inner.order.is_empty() {
            merged
        } else {
            merged.reordered(&inner.order)
        }
    }
}

impl Default for RecordPipeline {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for RecordPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            None => f.write_str("RecordPipeline::EMPTY"),
            Some(inner) => f
                .debug_struct("RecordPipeline")
                .field("modifiers", &inner.modifiers)
                .field("order", &inner.order)
                .finish(),
        }
    }
}

/// Builder for [`RecordPipeline`]
#[derive(Debug, Default)]
pub struct RecordPipelineBuilder {
    modifiers: Vec<Arc<dyn RecordModifier>>,
    order: Vec<Attribute>,
}

impl RecordPipelineBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a modifier
    pub fn add<M: RecordModifier + 'static>(self, modifier: M) -> Self {
        self.add_shared(Arc::new(modifier))
    }

    /// Append a shared modifier
    pub fn add_shared(mut self, modifier: Arc<dyn RecordModifier>) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Put these attributes first, in this order, in every output record
    pub fn order_by<I: IntoIterator<Item = Attribute>>(mut self, attributes: I) -> Self {
        self.order = attributes.into_iter().collect();
        self
    }

    /// Whether some modifier already writes a field named like `attribute`
    pub fn declares(&self, attribute: &Attribute) -> bool {
        self.modifiers.iter().any(|m| m.attributes().contains_id(attribute.id()))
    }

    /// Validate and freeze.
    ///
    /// Fails with [`Error::AttributeConflict`] when two modifiers write a
    /// field of the same name, whatever its declared type.
    pub fn build(self) -> Result<RecordPipeline> {
        if self.modifiers.is_empty() && self.order.is_empty() {
            return Ok(RecordPipeline::EMPTY);
        }

        let mut attributes = AttributeSet::new();
        for modifier in &self.modifiers {
            for attribute in modifier.attributes() {
                if attributes.contains_id(attribute.id()) {
                    return Err(Error::attribute_conflict(format!(
                        "attribute '{}' is written by more than one modifier",
                        attribute.id()
                    )));
                }
                attributes.insert(attribute.clone());
            }
        }

        Ok(RecordPipeline {
            inner: Some(Arc::new(PipelineInner {
                modifiers: self.modifiers,
                attributes,
                order: self.order,
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::{StaticFieldsModifier, TimestampModifier};
    use devlink_core::attribute::AttributeType;
    use devlink_core::types::Value;

    fn attr(id: &str) -> Attribute {
        Attribute::new(id, AttributeType::Any)
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let record = Record::builder().set(attr("pipe.a"), 1).build();
        let pipeline = RecordPipeline::builder().build().unwrap();

        assert!(pipeline.is_empty());
        assert_eq!(pipeline.run(&record), record);
        assert_eq!(RecordPipeline::EMPTY.run(&record), record);
    }

    #[test]
    fn test_conflicting_modifiers_rejected() {
        let x = attr("pipe.x");
        let result = RecordPipeline::builder()
            .add(StaticFieldsModifier::new([(x.clone(), Value::from(1))]))
            .add(StaticFieldsModifier::new([(x, Value::from(2))]))
            .build();

        assert!(matches!(result, Err(Error::AttributeConflict(_))));
    }

    #[test]
    fn test_same_name_different_type_conflicts() {
        let as_int = Attribute::new("pipe.typed", AttributeType::Integer);
        let as_text = Attribute::new("pipe.typed", AttributeType::String);
        let result = RecordPipeline::builder()
            .add(StaticFieldsModifier::new([(as_int.clone(), Value::from(1))]))
            .add(StaticFieldsModifier::new([(as_text.clone(), Value::from("one"))]))
            .build();
        assert!(matches!(result, Err(Error::AttributeConflict(_))));

        let builder = RecordPipeline::builder().add(StaticFieldsModifier::new([(as_int, Value::from(1))]));
        assert!(builder.declares(&as_text));
    }

    #[test]
    fn test_computed_fields_override_source() {
        let unit = attr("pipe.unit");
        let value = attr("pipe.value");
        let source = Record::builder()
            .set(value.clone(), 20.5)
            .set(unit.clone(), "F")
            .build();

        let pipeline = RecordPipeline::builder()
            .add(StaticFieldsModifier::new([(unit.clone(), Value::from("C"))]))
            .add(TimestampModifier::new())
            .build()
            .unwrap();
        let out = pipeline.run(&source);

        assert_eq!(out.len(), 3);
        assert_eq!(out.get_attribute(&unit).unwrap().as_str(), Some("C"));
        assert_eq!(out.get_attribute(&value).unwrap().as_float(), Some(20.5));
        assert!(out.get_attribute(&Attribute::timestamp()).is_some());
        assert!(pipeline.attributes().contains(&Attribute::timestamp()));
    }

    #[test]
    fn test_order_by() {
        let a = attr("pipe.order.a");
        let b = attr("pipe.order.b");
        let c = attr("pipe.order.c");
        let source = Record::builder()
            .set(a.clone(), 1)
            .set(b.clone(), 2)
            .set(c.clone(), 3)
            .build();

        let pipeline = RecordPipeline::builder().order_by([c.clone()]).build().unwrap();
        let out = pipeline.run(&source);

        assert_eq!(out.attributes(), &[c, a, b]);
    }

    #[test]
    fn test_declares() {
        let builder = RecordPipeline::builder().add(TimestampModifier::new());
        assert!(builder.declares(&Attribute::timestamp()));
        assert!(!RecordPipeline::builder().declares(&Attribute::timestamp()));
    }
}
