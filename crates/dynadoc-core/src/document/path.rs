//! Dot-separated field paths over JSON values.

use serde_json::{Map, Value};

use crate::error::DocumentError;

/// Split a dotted path into segments, rejecting empty segments.
pub fn split_path(path: &str) -> Result<Vec<&str>, DocumentError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(DocumentError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// The top-level field a path starts at.
pub fn top_level(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Value at `segments` below `value`, or `None` if any segment is missing.
pub fn get_path<'a>(value: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = current.as_object()?.get(*segment)?;
    }
    Some(current)
}

/// Set the value at `segments` below `value`, creating intermediate objects.
///
/// Fails if an existing intermediate value is not an object.
pub fn set_path(
    value: &mut Value,
    segments: &[&str],
    new_value: Value,
    full_path: &str,
) -> Result<(), DocumentError> {
    let Some((leaf, parents)) = segments.split_last() else {
        *value = new_value;
        return Ok(());
    };

    let mut current = value;
    for segment in parents {
        let map = as_object_mut(current, segment, full_path)?;
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    as_object_mut(current, leaf, full_path)?.insert(leaf.to_string(), new_value);
    Ok(())
}

fn as_object_mut<'a>(
    value: &'a mut Value,
    segment: &str,
    full_path: &str,
) -> Result<&'a mut Map<String, Value>, DocumentError> {
    value
        .as_object_mut()
        .ok_or_else(|| DocumentError::NotAnObject {
            path: full_path.to_string(),
            segment: segment.to_string(),
        })
}
