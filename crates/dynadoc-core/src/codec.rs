//! Conversion between document values and native attribute values.

use serde_json::{Map, Number, Value};

use crate::error::CodecError;
use crate::types::{AttributeValue, Item};

/// Converts field values to and from the backend's attribute representation.
pub trait Codec: Send + Sync {
    fn encode_value(&self, value: &Value) -> Result<AttributeValue, CodecError>;

    fn decode_value(&self, attr: &AttributeValue) -> Result<Value, CodecError>;

    /// Encode every top-level field of a map into an item.
    fn encode_map(&self, fields: &Map<String, Value>) -> Result<Item, CodecError> {
        fields
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.encode_value(value)?)))
            .collect()
    }

    /// Decode every attribute of an item into a map.
    fn decode_item(&self, item: &Item) -> Result<Map<String, Value>, CodecError> {
        item.iter()
            .map(|(name, attr)| Ok((name.clone(), self.decode_value(attr)?)))
            .collect()
    }
}

/// The default codec: JSON values map one-to-one onto attribute values.
///
/// Numbers keep their exact decimal text; decoding tries `i64`, then `u64`,
/// then `f64`, so integers come back as integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeCodec;

impl Codec for AttributeCodec {
    fn encode_value(&self, value: &Value) -> Result<AttributeValue, CodecError> {
        Ok(match value {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Number(n) => AttributeValue::Number(n.to_string()),
            Value::String(s) => AttributeValue::String(s.clone()),
            Value::Array(items) => AttributeValue::List(
                items
                    .iter()
                    .map(|v| self.encode_value(v))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => AttributeValue::Map(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.encode_value(v)?)))
                    .collect::<Result<_, CodecError>>()?,
            ),
        })
    }

    fn decode_value(&self, attr: &AttributeValue) -> Result<Value, CodecError> {
        Ok(match attr {
            AttributeValue::Null => Value::Null,
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Number(text) => Value::Number(decode_number(text)?),
            AttributeValue::String(s) => Value::String(s.clone()),
            AttributeValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(|a| self.decode_value(a))
                    .collect::<Result<_, _>>()?,
            ),
            AttributeValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, a)| Ok((k.clone(), self.decode_value(a)?)))
                    .collect::<Result<_, CodecError>>()?,
            ),
        })
    }
}

fn decode_number(text: &str) -> Result<Number, CodecError> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Number::from(i));
    }
    if let Ok(u) = text.parse::<u64>() {
        return Ok(Number::from(u));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .ok_or_else(|| CodecError::InvalidNumber(text.to_string()))
}
