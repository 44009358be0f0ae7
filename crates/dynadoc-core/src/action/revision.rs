//! Revisions, generated keys and write preconditions.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use uuid::Uuid;

use crate::document::Document;
use crate::query::FilterExpr;
use crate::types::AttributeValue;

use super::ActionKind;

/// Source of fresh revisions and generated keys.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Predictable ids `"{prefix}-1"`, `"{prefix}-2"`, ... for tests and replay.
#[derive(Debug)]
pub struct SequenceGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequenceGenerator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequenceGenerator {
    fn new_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.prefix)
    }
}

/// Whether a field is absent, null or an empty string.
pub(crate) fn is_blank(document: &Document<'_>, field: &str) -> bool {
    match document.get_field(field) {
        Ok(Value::Null) | Err(_) => true,
        Ok(Value::String(s)) => s.is_empty(),
        Ok(_) => false,
    }
}

/// The revision a caller supplied as a precondition, if any.
pub(crate) fn caller_revision(document: &Document<'_>, field: &str) -> Option<Value> {
    if is_blank(document, field) {
        return None;
    }
    document.get_field(field).ok()
}

/// Precondition for a write of `kind`.
///
/// CREATE needs the key to be absent. REPLACE, UPDATE and DELETE need it to
/// be present. Any kind given a caller revision also needs the stored
/// revision to match.
pub(crate) fn write_condition(
    kind: ActionKind,
    partition_key: &str,
    revision: Option<(&str, AttributeValue)>,
) -> Option<FilterExpr> {
    let mut conditions = Vec::new();
    match kind {
        ActionKind::Create => {
            conditions.push(FilterExpr::AttributeNotExists(partition_key.to_string()));
        }
        ActionKind::Replace | ActionKind::Update | ActionKind::Delete => {
            conditions.push(FilterExpr::AttributeExists(partition_key.to_string()));
        }
        ActionKind::Put | ActionKind::Get => {}
    }
    if let Some((field, value)) = revision {
        conditions.push(FilterExpr::Eq(field.to_string(), value));
    }
    FilterExpr::all(conditions)
}
