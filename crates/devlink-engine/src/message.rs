/*!
 * Decoding of unsolicited device messages.
 */
use std::fmt::Debug;

use serde_json::Value as JsonValue;

use devlink_core::attribute::{Attribute, AttributeType};
use devlink_core::record::{Record, RecordBuilder};
use devlink_core::types::Value;
use devlink_devices::Payload;

use crate::error::{Error, Result};

/// Turns one kind of pushed message into a (possibly partial) record
pub trait MessageHandler: Send + Sync + Debug {
    /// Name of the message kind this handler decodes
    fn message_type(&self) -> &str;

    /// Whether this message closes a sample
    fn is_sync(&self) -> bool {
        false
    }

    /// Whether `payload` is a message of this kind
    fn accepts(&self, payload: &Payload) -> bool;

    /// Decode `payload` into the fields it carries
    fn decode(&self, payload: &Payload) -> Result<Record>;
}

/// Decodes JSON objects tagged with a type field
///
/// A message `{"type": "env", "temp": 21.5}` is accepted by the handler for
/// `"env"` and yields the listed attributes that are present in the object.
#[derive(Debug, Clone)]
pub struct JsonMessageHandler {
    message_type: String,
    type_field: String,
    sync: bool,
    attributes: Vec<Attribute>,
}

impl JsonMessageHandler {
    /// Create a handler for messages whose `"type"` field equals `message_type`
    pub fn new<S: Into<String>, I: IntoIterator<Item = Attribute>>(message_type: S, attributes: I) -> Self {
        Self {
            message_type: message_type.into(),
            type_field: "type".to_string(),
            sync: false,
            attributes: attributes.into_iter().collect(),
        }
    }

    /// Use a different field to carry the message type
    pub fn with_type_field<S: Into<String>>(mut self, field: S) -> Self {
        self.type_field = field.into();
        self
    }

    /// Mark this handler as the one that closes a sample
    pub fn sync(mut self) -> Self {
        self.sync = true;
        self
    }

    fn parse(&self, payload: &Payload) -> Option<serde_json::Map<String, JsonValue>> {
        match payload.json::<JsonValue>() {
            Ok(JsonValue::Object(map)) => Some(map),
            _ => None,
        }
    }
}

fn convert(attribute: &Attribute, json: &JsonValue) -> Result<Value> {
    let ty = attribute.attribute_type();
    let mismatch = || Error::message(format!("field '{}' is not a valid {}", attribute.id(), ty));

    let value = match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().ok_or_else(mismatch)?),
        },
        JsonValue::String(s) if ty == AttributeType::Timestamp => chrono::DateTime::parse_from_rfc3339(s)
            .map(|t| Value::Timestamp(t.with_timezone(&chrono::Utc)))
            .map_err(|_| mismatch())?,
        JsonValue::String(s) => Value::String(s.clone()),
        other if ty == AttributeType::Any => Value::String(other.to_string()),
        _ => return Err(mismatch()),
    };

    if !value.conforms_to(ty) {
        return Err(mismatch());
    }
    Ok(match (value, ty) {
        (Value::Integer(i), AttributeType::Float) => Value::Float(i as f64),
        (value, _) => value,
    })
}

impl MessageHandler for JsonMessageHandler {
    fn message_type(&self) -> &str {
        &self.message_type
    }

    fn is_sync(&self) -> bool {
        self.sync
    }

    fn accepts(&self, payload: &Payload) -> bool {
        self.parse(payload)
            .and_then(|map| map.get(&self.type_field).cloned())
            .map_or(false, |t| t.as_str() == Some(self.message_type.as_str()))
    }

    fn decode(&self, payload: &Payload) -> Result<Record> {
        let map = self
            .parse(payload)
            .ok_or_else(|| Error::message(format!("{} message is not a JSON object", self.message_type)))?;

        let mut builder = RecordBuilder::with_capacity(self.attributes.len());
        for attribute in &self.attributes {
            if let Some(json) = map.get(attribute.id()) {
                builder = builder.set(attribute.clone(), convert(attribute, json)?);
            }
        }
        Ok(builder.build())
    }
}

/// Check that a handler set can delimit samples.
///
/// With more than one handler exactly one must be sync.
pub(crate) fn validate_handlers(handlers: &[std::sync::Arc<dyn MessageHandler>]) -> Result<()> {
    if handlers.is_empty() {
        return Err(Error::configuration("at least one message handler is required"));
    }
    if handlers.len() > 1 {
        let sync = handlers.iter().filter(|h| h.is_sync()).count();
        if sync != 1 {
            return Err(Error::configuration(format!(
                "{} message handlers need exactly one sync handler, found {}",
                handlers.len(),
                sync
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn temp() -> Attribute {
        Attribute::new("msg.temp", AttributeType::Float)
    }

    fn handler() -> JsonMessageHandler {
        JsonMessageHandler::new("env", [temp(), Attribute::new("msg.ok", AttributeType::Boolean)])
    }

    #[test]
    fn test_accepts_by_type_field() {
        let h = handler();
        assert!(h.accepts(&Payload::from_string(r#"{"type":"env","msg.temp":1.5}"#)));
        assert!(!h.accepts(&Payload::from_string(r#"{"type":"alarm"}"#)));
        assert!(!h.accepts(&Payload::from_string("not json")));

        let custom = handler().with_type_field("kind");
        assert!(custom.accepts(&Payload::from_string(r#"{"kind":"env"}"#)));
    }

    #[test]
    fn test_decode_present_fields() {
        let record = handler()
            .decode(&Payload::from_string(r#"{"type":"env","msg.temp":21.5}"#))
            .unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("msg.temp").unwrap().as_float(), Some(21.5));

        let err = handler().decode(&Payload::from_string(r#"{"type":"env","msg.ok":"yes"}"#));
        assert!(matches!(err, Err(Error::Message(_))));
    }

    #[test]
    fn test_decode_checks_declared_types() {
        let count = Attribute::new("msg.count", AttributeType::Integer);
        let h = JsonMessageHandler::new("env", [temp(), count]);

        let record = h
            .decode(&Payload::from_string(r#"{"type":"env","msg.temp":21,"msg.count":3}"#))
            .unwrap();
        assert_eq!(record.get("msg.temp"), Some(&Value::Float(21.0)));
        assert_eq!(record.get("msg.count").unwrap().as_integer(), Some(3));

        let err = h.decode(&Payload::from_string(r#"{"type":"env","msg.count":2.5}"#));
        assert!(matches!(err, Err(Error::Message(_))));

        let err = h.decode(&Payload::from_string(r#"{"type":"env","msg.temp":[1]}"#));
        assert!(matches!(err, Err(Error::Message(_))));
    }

    #[test]
    fn test_validate_handlers() {
        let a: Arc<dyn MessageHandler> = Arc::new(handler());
        let b: Arc<dyn MessageHandler> = Arc::new(JsonMessageHandler::new("alarm", []));
        let s: Arc<dyn MessageHandler> = Arc::new(JsonMessageHandler::new("end", []).sync());

        assert!(validate_handlers(&[a.clone()]).is_ok());
        assert!(validate_handlers(&[]).is_err());
        assert!(validate_handlers(&[a.clone(), b.clone()]).is_err());
        assert!(validate_handlers(&[a.clone(), s.clone(), s.clone()]).is_err());
        assert!(validate_handlers(&[a, b, s]).is_ok());
    }
}
