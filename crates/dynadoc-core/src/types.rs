//! Native attribute values, items and keys.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A backend-native attribute value.
///
/// Numbers travel as their decimal text so that integers wider than `f64`
/// survive the trip through a backend unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Number(String),
    String(String),
    List(Vec<AttributeValue>),
    Map(BTreeMap<String, AttributeValue>),
}

/// A stored row: top-level attribute name to native value.
pub type Item = BTreeMap<String, AttributeValue>;

impl AttributeValue {
    pub fn string(s: impl Into<String>) -> Self {
        AttributeValue::String(s.into())
    }

    pub fn number(n: impl fmt::Display) -> Self {
        AttributeValue::Number(n.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            AttributeValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, AttributeValue>> {
        match self {
            AttributeValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Null => "null",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Number(_) => "number",
            AttributeValue::String(_) => "string",
            AttributeValue::List(_) => "list",
            AttributeValue::Map(_) => "map",
        }
    }

    /// Whether this value may serve as a partition or sort key.
    pub fn is_valid_key(&self) -> bool {
        match self {
            AttributeValue::String(s) => !s.is_empty(),
            AttributeValue::Number(_) => true,
            _ => false,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            AttributeValue::Null => 0,
            AttributeValue::Bool(_) => 1,
            AttributeValue::Number(_) => 2,
            AttributeValue::String(_) => 3,
            AttributeValue::List(_) => 4,
            AttributeValue::Map(_) => 5,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => f.write_str("null"),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Number(n) => f.write_str(n),
            AttributeValue::String(s) => write!(f, "{s:?}"),
            AttributeValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            AttributeValue::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        AttributeValue::number(n)
    }
}

/// Compare two attribute values when their types are comparable.
///
/// - Numbers: numerically (integers exactly, otherwise as f64)
/// - Strings: lexicographically
/// - Booleans: false < true
/// - Null == Null
/// - Lists and maps: equality only
/// - Mismatched types: `None`
pub fn compare_attrs(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
    match (left, right) {
        (AttributeValue::Null, AttributeValue::Null) => Some(Ordering::Equal),
        (AttributeValue::Number(a), AttributeValue::Number(b)) => compare_numbers(a, b),
        (AttributeValue::String(a), AttributeValue::String(b)) => Some(a.cmp(b)),
        (AttributeValue::Bool(a), AttributeValue::Bool(b)) => Some(a.cmp(b)),
        (AttributeValue::List(_), AttributeValue::List(_))
        | (AttributeValue::Map(_), AttributeValue::Map(_)) => {
            (left == right).then_some(Ordering::Equal)
        }
        _ => None,
    }
}

fn compare_numbers(a: &str, b: &str) -> Option<Ordering> {
    if let (Ok(x), Ok(y)) = (a.parse::<i128>(), b.parse::<i128>()) {
        return Some(x.cmp(&y));
    }
    let x: f64 = a.parse().ok()?;
    let y: f64 = b.parse().ok()?;
    x.partial_cmp(&y)
}

/// Total order used for storage ordering: values of different types order by
/// type, incomparable values of one type fall back to their text.
pub fn total_cmp(left: &AttributeValue, right: &AttributeValue) -> Ordering {
    match compare_attrs(left, right) {
        Some(ord) => ord,
        None => left
            .type_rank()
            .cmp(&right.type_rank())
            .then_with(|| left.to_string().cmp(&right.to_string())),
    }
}

/// Resolve a dot-separated attribute path on an item.
///
/// Returns `None` if any segment is missing or crosses a non-map value.
pub fn resolve_attr<'a>(item: &'a Item, path: &str) -> Option<&'a AttributeValue> {
    let mut segments = path.split('.');
    let mut current = item.get(segments.next()?)?;
    for segment in segments {
        current = current.as_map()?.get(segment)?;
    }
    Some(current)
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Names of the partition and optional sort attribute of a table or index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySchema {
    pub partition: String,
    pub sort: Option<String>,
}

impl KeySchema {
    pub fn new(partition: impl Into<String>, sort: Option<String>) -> Self {
        Self {
            partition: partition.into(),
            sort,
        }
    }

    /// The attribute names that make up this key, partition first.
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition.as_str()).chain(self.sort.as_deref())
    }

    /// Whether `attr` is one of this key's attributes.
    pub fn contains(&self, attr: &str) -> bool {
        self.partition == attr || self.sort.as_deref() == Some(attr)
    }
}

/// A resolved primary key value.
///
/// Equality and hashing follow [`Ord`]: numbers compare by value, so `3` and
/// `3.0` are the same key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    pub partition: AttributeValue,
    pub sort: Option<AttributeValue>,
}

impl Key {
    /// Extract the key of `item` under `schema`; `None` if an attribute is missing.
    pub fn from_item(item: &Item, schema: &KeySchema) -> Option<Key> {
        let partition = item.get(&schema.partition)?.clone();
        let sort = match &schema.sort {
            Some(sk) => Some(item.get(sk)?.clone()),
            None => None,
        };
        Some(Key { partition, sort })
    }

    /// The key attributes as an item fragment.
    pub fn to_item(&self, schema: &KeySchema) -> Item {
        let mut item = Item::new();
        item.insert(schema.partition.clone(), self.partition.clone());
        if let (Some(sk), Some(value)) = (&schema.sort, &self.sort) {
            item.insert(sk.clone(), value.clone());
        }
        item
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        total_cmp(&self.partition, &other.partition).then_with(|| {
            match (&self.sort, &other.sort) {
                (Some(a), Some(b)) => total_cmp(a, b),
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
            }
        })
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_key_value(&self.partition, state);
        self.sort.is_some().hash(state);
        if let Some(sort) = &self.sort {
            hash_key_value(sort, state);
        }
    }
}

/// Numbers hash by their `f64` value so every text form of one number lands
/// in the same bucket.
fn hash_key_value<H: Hasher>(value: &AttributeValue, state: &mut H) {
    std::mem::discriminant(value).hash(state);
    match value {
        AttributeValue::Number(n) => match n.parse::<f64>() {
            // -0.0 and 0.0 compare equal.
            Ok(x) if x == 0.0 => 0u64.hash(state),
            Ok(x) => x.to_bits().hash(state),
            Err(_) => n.hash(state),
        },
        other => other.hash(state),
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sort {
            Some(sort) => write!(f, "({}, {})", self.partition, sort),
            None => write!(f, "({})", self.partition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_compare_numerically() {
        let a = AttributeValue::number(9);
        let b = AttributeValue::number(10);
        assert_eq!(compare_attrs(&a, &b), Some(Ordering::Less));

        let c = AttributeValue::number(2.5);
        assert_eq!(compare_attrs(&c, &a), Some(Ordering::Less));
        assert_eq!(
            compare_attrs(&AttributeValue::number(3), &AttributeValue::number("3.0")),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let a = AttributeValue::number(u64::MAX);
        let b = AttributeValue::number(u64::MAX - 1);
        assert_eq!(compare_attrs(&a, &b), Some(Ordering::Greater));
    }

    #[test]
    fn test_mismatched_types_incomparable() {
        assert_eq!(
            compare_attrs(&AttributeValue::string("1"), &AttributeValue::number(1)),
            None
        );
        assert_eq!(
            total_cmp(&AttributeValue::number(100), &AttributeValue::string("1")),
            Ordering::Less
        );
    }

    #[test]
    fn test_resolve_nested_attr() {
        let mut address = BTreeMap::new();
        address.insert("city".to_string(), AttributeValue::string("Oslo"));
        let mut item = Item::new();
        item.insert("address".to_string(), AttributeValue::Map(address));

        assert_eq!(
            resolve_attr(&item, "address.city"),
            Some(&AttributeValue::string("Oslo"))
        );
        assert_eq!(resolve_attr(&item, "address.zip"), None);
        assert_eq!(resolve_attr(&item, "address.city.x"), None);
    }

    #[test]
    fn test_key_from_item() {
        let schema = KeySchema::new("title", Some("author".to_string()));
        let mut item = Item::new();
        item.insert("title".to_string(), "Book1".into());
        item.insert("author".to_string(), "A1".into());
        item.insert("pages".to_string(), AttributeValue::number(120));

        let key = Key::from_item(&item, &schema).unwrap();
        assert_eq!(key.partition, AttributeValue::string("Book1"));
        assert_eq!(key.to_item(&schema).len(), 2);
        assert_eq!(key.to_string(), "(\"Book1\", \"A1\")");

        item.remove("author");
        assert!(Key::from_item(&item, &schema).is_none());
    }

    #[test]
    fn test_key_ordering() {
        let k = |p: i64, s: &str| Key {
            partition: p.into(),
            sort: Some(s.into()),
        };
        let mut keys = vec![k(10, "b"), k(9, "z"), k(10, "a")];
        keys.sort();
        assert_eq!(keys, vec![k(9, "z"), k(10, "a"), k(10, "b")]);
    }

    #[test]
    fn test_numeric_keys_equal_by_value() {
        use std::collections::HashSet;

        let k = |n: &str| Key {
            partition: AttributeValue::Number(n.to_string()),
            sort: None,
        };
        assert_eq!(k("3"), k("3.0"));
        assert_eq!(k("0"), k("-0.0"));
        assert_ne!(k("3"), k("3.5"));

        let mut seen = HashSet::new();
        assert!(seen.insert(k("3")));
        assert!(!seen.insert(k("3.0")));
        assert!(!seen.insert(k("3e0")));
        assert!(seen.insert(k("4")));
    }

    #[test]
    fn test_valid_key_values() {
        assert!(AttributeValue::string("x").is_valid_key());
        assert!(AttributeValue::number(0).is_valid_key());
        assert!(!AttributeValue::string("").is_valid_key());
        assert!(!AttributeValue::Null.is_valid_key());
        assert!(!AttributeValue::Bool(true).is_valid_key());
    }
}
