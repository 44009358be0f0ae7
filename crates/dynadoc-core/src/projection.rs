//! Attribute projection over native items.
//!
//! Used by backends to trim index rows to the index's projected attributes
//! and by callers that request a subset of field paths. Key attributes are
//! always kept.

use crate::types::{AttributeValue, Item, resolve_attr};

/// Keep only `paths` plus `key_attrs` from `item`. An empty `paths` keeps
/// the whole item.
pub fn project_item(item: &Item, paths: &[String], key_attrs: &[&str]) -> Item {
    if paths.is_empty() {
        return item.clone();
    }

    let mut result = Item::new();
    for &key in key_attrs {
        if let Some(v) = item.get(key) {
            result.insert(key.to_string(), v.clone());
        }
    }
    for path in paths {
        if let Some(v) = resolve_attr(item, path) {
            set_nested_path(&mut result, path, v.clone());
        }
    }
    result
}

/// Set a value at a dot-separated path, creating intermediate maps. A
/// segment already holding a non-map value is left as is.
fn set_nested_path(target: &mut Item, path: &str, value: AttributeValue) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((leaf, parents)) = segments.split_last() else {
        return;
    };

    let mut current = target;
    for &seg in parents {
        let entry = current
            .entry(seg.to_string())
            .or_insert_with(|| AttributeValue::Map(Default::default()));
        match entry.as_map_mut() {
            Some(map) => current = map,
            None => return,
        }
    }
    current.insert(leaf.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AttributeCodec, Codec};
    use serde_json::{Value, json};

    fn item(value: Value) -> Item {
        AttributeCodec.encode_map(value.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_empty_projection_returns_full_item() {
        let doc = item(json!({"pk": "a", "name": "Alice", "age": 30}));
        assert_eq!(project_item(&doc, &[], &["pk"]), doc);
    }

    #[test]
    fn test_top_level_projection() {
        let doc = item(json!({"pk": "a", "name": "Alice", "age": 30, "email": "a@b.com"}));
        let result = project_item(&doc, &["name".to_string(), "age".to_string()], &["pk"]);
        assert_eq!(result, item(json!({"pk": "a", "name": "Alice", "age": 30})));
    }

    #[test]
    fn test_nested_projection() {
        let doc = item(json!({"pk": "a", "address": {"city": "NYC", "zip": "10001"}}));
        let result = project_item(&doc, &["address.city".to_string()], &["pk"]);
        assert_eq!(result, item(json!({"pk": "a", "address": {"city": "NYC"}})));
    }

    #[test]
    fn test_keys_always_included() {
        let doc = item(json!({"pk": "a", "sk": "b", "name": "Alice", "age": 30}));
        let result = project_item(&doc, &["name".to_string()], &["pk", "sk"]);
        assert_eq!(result, item(json!({"pk": "a", "sk": "b", "name": "Alice"})));
    }

    #[test]
    fn test_missing_attr_silently_omitted() {
        let doc = item(json!({"pk": "a", "name": "Alice"}));
        let result = project_item(&doc, &["nonexistent".to_string()], &["pk"]);
        assert_eq!(result, item(json!({"pk": "a"})));
    }
}
