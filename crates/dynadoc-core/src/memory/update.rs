//! Applying update modifications to stored items.

use std::collections::BTreeMap;

use crate::transport::ItemMod;
use crate::types::{AttributeValue, Item};

use super::MemoryError;

/// Apply `mods` to `item` in path order.
///
/// SET creates intermediate maps as needed; REMOVE silently skips missing
/// paths; INCREMENT adds to an existing number or initializes a missing one.
pub fn apply_mods(item: &mut Item, mods: &BTreeMap<String, ItemMod>) -> Result<(), MemoryError> {
    for (path, m) in mods {
        let segments: Vec<&str> = path.split('.').collect();
        match m {
            ItemMod::Set(value) => resolve_path_set(item, &segments, value.clone(), path)?,
            ItemMod::Remove => resolve_path_remove(item, &segments),
            ItemMod::Increment(delta) => apply_increment(item, &segments, delta, path)?,
        }
    }
    Ok(())
}

fn resolve_path_set(
    map: &mut Item,
    segments: &[&str],
    value: AttributeValue,
    path: &str,
) -> Result<(), MemoryError> {
    let Some((leaf, parents)) = segments.split_last() else {
        return Ok(());
    };
    let mut current = map;
    for &seg in parents {
        current = current
            .entry(seg.to_string())
            .or_insert_with(|| AttributeValue::Map(BTreeMap::new()))
            .as_map_mut()
            .ok_or_else(|| MemoryError::UpdateFailed {
                path: path.to_string(),
                message: format!("segment '{seg}' is not a map"),
            })?;
    }
    current.insert(leaf.to_string(), value);
    Ok(())
}

fn resolve_path_remove(map: &mut Item, segments: &[&str]) {
    let Some((leaf, parents)) = segments.split_last() else {
        return;
    };
    let mut current = map;
    for &seg in parents {
        match current.get_mut(seg).and_then(AttributeValue::as_map_mut) {
            Some(next) => current = next,
            None => return,
        }
    }
    current.remove(*leaf);
}

fn resolve_path_get_mut<'a>(map: &'a mut Item, segments: &[&str]) -> Option<&'a mut AttributeValue> {
    let (first, rest) = segments.split_first()?;
    let mut current = map.get_mut(*first)?;
    for seg in rest {
        current = current.as_map_mut()?.get_mut(*seg)?;
    }
    Some(current)
}

fn apply_increment(
    item: &mut Item,
    segments: &[&str],
    delta: &AttributeValue,
    path: &str,
) -> Result<(), MemoryError> {
    let AttributeValue::Number(delta_text) = delta else {
        return Err(MemoryError::UpdateFailed {
            path: path.to_string(),
            message: format!("increment requires a number, got {}", delta.type_name()),
        });
    };
    match resolve_path_get_mut(item, segments) {
        Some(AttributeValue::Number(current)) => {
            let sum = add_numbers(current, delta_text).ok_or_else(|| MemoryError::UpdateFailed {
                path: path.to_string(),
                message: format!("cannot add {delta_text} to {current}"),
            })?;
            *current = sum;
            Ok(())
        }
        Some(other) => Err(MemoryError::UpdateFailed {
            path: path.to_string(),
            message: format!("increment target is a {}", other.type_name()),
        }),
        None => resolve_path_set(item, segments, delta.clone(), path),
    }
}

fn add_numbers(a: &str, b: &str) -> Option<String> {
    if let (Ok(x), Ok(y)) = (a.parse::<i128>(), b.parse::<i128>()) {
        return x.checked_add(y).map(|sum| sum.to_string());
    }
    let sum = a.parse::<f64>().ok()? + b.parse::<f64>().ok()?;
    sum.is_finite().then(|| sum.to_string())
}
