//! Field accessors for user-defined record types.
//!
//! A [`RecordSchema`] maps each top-level field name to a pair of plain
//! function pointers. Implementors build it once per type (typically in a
//! `OnceLock`) and hand out a `&'static` reference from [`Record::schema`].

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::DocumentError;

/// Reads a field; `None` means the field is unset.
pub type Getter<T> = fn(&T) -> Option<Value>;

/// Writes a field from a decoded value.
pub type Setter<T> = fn(&mut T, Value) -> Result<(), DocumentError>;

/// A user type whose fields can be read and written by name.
pub trait Record: Send + Sized + 'static {
    fn schema() -> &'static RecordSchema<Self>;
}

pub struct FieldAccessor<T> {
    name: &'static str,
    get: Getter<T>,
    set: Setter<T>,
}

impl<T> FieldAccessor<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, record: &T) -> Option<Value> {
        (self.get)(record)
    }

    pub fn set(&self, record: &mut T, value: Value) -> Result<(), DocumentError> {
        (self.set)(record, value)
    }
}

/// Ordered accessors of one record type, looked up by field name.
pub struct RecordSchema<T> {
    fields: Vec<FieldAccessor<T>>,
    by_name: HashMap<&'static str, usize>,
}

impl<T> RecordSchema<T> {
    pub fn builder() -> RecordSchemaBuilder<T> {
        RecordSchemaBuilder { fields: Vec::new() }
    }

    pub fn accessor(&self, name: &str) -> Option<&FieldAccessor<T>> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn fields(&self) -> &[FieldAccessor<T>] {
        &self.fields
    }
}

pub struct RecordSchemaBuilder<T> {
    fields: Vec<FieldAccessor<T>>,
}

impl<T> RecordSchemaBuilder<T> {
    /// Add a field. A later field with the same name replaces an earlier one.
    pub fn field(mut self, name: &'static str, get: Getter<T>, set: Setter<T>) -> Self {
        self.fields.retain(|f| f.name != name);
        self.fields.push(FieldAccessor { name, get, set });
        self
    }

    pub fn build(self) -> RecordSchema<T> {
        let by_name = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name, i))
            .collect();
        RecordSchema {
            fields: self.fields,
            by_name,
        }
    }
}

/// Deserialize a decoded value into a field's type, for use in setters.
pub fn from_value<V: DeserializeOwned>(field: &str, value: Value) -> Result<V, DocumentError> {
    serde_json::from_value(value).map_err(|e| DocumentError::TypeMismatch {
        field: field.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;
    use serde_json::json;

    struct Book {
        title: String,
        pages: Option<u32>,
    }

    impl Record for Book {
        fn schema() -> &'static RecordSchema<Self> {
            static SCHEMA: OnceLock<RecordSchema<Book>> = OnceLock::new();
            SCHEMA.get_or_init(|| {
                RecordSchema::<Book>::builder()
                    .field(
                        "title",
                        |b| Some(json!(b.title)),
                        |b, v| {
                            b.title = from_value("title", v)?;
                            Ok(())
                        },
                    )
                    .field(
                        "pages",
                        |b| b.pages.map(|p| json!(p)),
                        |b, v| {
                            b.pages = from_value("pages", v)?;
                            Ok(())
                        },
                    )
                    .build()
            })
        }
    }

    #[test]
    fn test_schema_is_built_once() {
        assert!(std::ptr::eq(Book::schema(), Book::schema()));
        assert_eq!(Book::schema().fields().len(), 2);
    }

    #[test]
    fn test_accessor_get_set() {
        let mut book = Book {
            title: "Dune".to_string(),
            pages: None,
        };
        let pages = Book::schema().accessor("pages").unwrap();
        assert_eq!(pages.get(&book), None);
        pages.set(&mut book, json!(412)).unwrap();
        assert_eq!(book.pages, Some(412));
        assert!(Book::schema().accessor("isbn").is_none());
    }

    #[test]
    fn test_setter_type_mismatch() {
        let mut book = Book {
            title: "Dune".to_string(),
            pages: None,
        };
        let title = Book::schema().accessor("title").unwrap();
        let err = title.set(&mut book, json!(5)).unwrap_err();
        assert!(matches!(err, DocumentError::TypeMismatch { field, .. } if field == "title"));
    }
}
