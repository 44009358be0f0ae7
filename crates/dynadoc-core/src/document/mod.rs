//! Uniform field access over caller-owned documents.
//!
//! A [`Document`] borrows either a `serde_json` map or a user record that
//! implements [`Record`], and exposes dotted field-path reads and writes over
//! both. The first path segment names a top-level field; the remaining
//! segments navigate into that field's JSON value.

pub mod path;
pub mod schema;

use serde_json::{Map, Value};
use tracing::trace;

use crate::codec::Codec;
use crate::error::{DocumentError, Error};
use crate::types::{Item, resolve_attr};

pub use schema::{FieldAccessor, Record, RecordSchema, RecordSchemaBuilder, from_value};

/// Top-level field storage behind a document.
trait Fields {
    /// `Err(UnknownField)` if the document cannot hold `name` at all.
    fn get(&self, name: &str) -> Result<Option<Value>, DocumentError>;
    fn set(&mut self, name: &str, value: Value) -> Result<(), DocumentError>;
    fn names(&self) -> Vec<String>;
}

impl Fields for &mut Map<String, Value> {
    fn get(&self, name: &str) -> Result<Option<Value>, DocumentError> {
        Ok((**self).get(name).cloned())
    }

    fn set(&mut self, name: &str, value: Value) -> Result<(), DocumentError> {
        self.insert(name.to_string(), value);
        Ok(())
    }

    fn names(&self) -> Vec<String> {
        self.keys().cloned().collect()
    }
}

struct RecordFields<'a, T: Record> {
    record: &'a mut T,
    schema: &'static RecordSchema<T>,
}

impl<T: Record> Fields for RecordFields<'_, T> {
    fn get(&self, name: &str) -> Result<Option<Value>, DocumentError> {
        let accessor = self
            .schema
            .accessor(name)
            .ok_or_else(|| DocumentError::UnknownField(name.to_string()))?;
        Ok(accessor.get(self.record))
    }

    fn set(&mut self, name: &str, value: Value) -> Result<(), DocumentError> {
        let accessor = self
            .schema
            .accessor(name)
            .ok_or_else(|| DocumentError::UnknownField(name.to_string()))?;
        accessor.set(self.record, value)
    }

    fn names(&self) -> Vec<String> {
        self.schema
            .fields()
            .iter()
            .filter(|f| f.get(self.record).is_some())
            .map(|f| f.name().to_string())
            .collect()
    }
}

/// A borrowed view of one caller-owned document.
pub struct Document<'a> {
    fields: Box<dyn Fields + Send + 'a>,
}

impl<'a> Document<'a> {
    pub fn from_map(map: &'a mut Map<String, Value>) -> Self {
        Self {
            fields: Box::new(map),
        }
    }

    pub fn from_record<T: Record>(record: &'a mut T) -> Self {
        Self {
            fields: Box::new(RecordFields {
                record,
                schema: T::schema(),
            }),
        }
    }

    /// Read the value at a dotted path.
    pub fn get_field(&self, path: &str) -> Result<Value, DocumentError> {
        let segments = path::split_path(path)?;
        let top = match self.fields.get(segments[0]) {
            Ok(Some(value)) => value,
            Ok(None) | Err(DocumentError::UnknownField(_)) => {
                return Err(DocumentError::FieldNotFound(path.to_string()));
            }
            Err(e) => return Err(e),
        };
        if segments.len() == 1 {
            return Ok(top);
        }
        path::get_path(&top, &segments[1..])
            .cloned()
            .ok_or_else(|| DocumentError::FieldNotFound(path.to_string()))
    }

    /// Whether a non-null value is present at a dotted path.
    pub fn has_field(&self, path: &str) -> bool {
        matches!(self.get_field(path), Ok(v) if !v.is_null())
    }

    /// Write a value at a dotted path, creating intermediate objects.
    pub fn set_field(&mut self, path: &str, value: Value) -> Result<(), DocumentError> {
        let segments = path::split_path(path)?;
        if segments.len() == 1 {
            return self.fields.set(segments[0], value);
        }
        let mut top = self
            .fields
            .get(segments[0])?
            .unwrap_or_else(|| Value::Object(Map::new()));
        path::set_path(&mut top, &segments[1..], value, path)?;
        self.fields.set(segments[0], top)
    }

    /// Names of the top-level fields that currently hold a value.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.names()
    }

    /// Encode every present top-level field into a native item.
    pub fn encode(&self, codec: &dyn Codec) -> Result<Item, Error> {
        let mut item = Item::new();
        for name in self.fields.names() {
            if let Some(value) = self.fields.get(&name)? {
                item.insert(name, codec.encode_value(&value)?);
            }
        }
        Ok(item)
    }

    /// Decode every attribute of `item` into `target`.
    ///
    /// Attributes a record type has no field for are skipped.
    pub fn decode(codec: &dyn Codec, item: &Item, target: &mut Document<'_>) -> Result<(), Error> {
        for (name, attr) in item {
            let value = codec.decode_value(attr)?;
            match target.fields.set(name, value) {
                Ok(()) => {}
                Err(DocumentError::UnknownField(field)) => {
                    trace!(field = %field, "skipping attribute with no record field");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Decode only the listed dotted paths of `item` into `target`, leaving
    /// every other field of the document untouched. Paths absent from the
    /// item are skipped.
    pub fn decode_paths(
        codec: &dyn Codec,
        item: &Item,
        paths: &[String],
        target: &mut Document<'_>,
    ) -> Result<(), Error> {
        for path in paths {
            if let Some(attr) = resolve_attr(item, path) {
                target.set_field(path, codec.decode_value(attr)?)?;
            }
        }
        Ok(())
    }
}
