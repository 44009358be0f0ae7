//! In-process reference backend.
//!
//! [`MemoryBackend`] keeps each table as an ordered map from primary key to
//! item behind a `parking_lot::RwLock` and implements both [`Transport`] and
//! [`ErrorTranslator`]. Queries honor key conditions, residual filters,
//! per-index ordering and projection; limits count evaluated rows and the
//! resume token is the last evaluated position, MessagePack-encoded.

pub mod update;

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, trace};

use crate::iter::PaginationToken;
use crate::options::{CollectionOptions, IndexDefinition, Projection};
use crate::planner::{Access, Plan};
use crate::projection::project_item;
use crate::transport::{BackendFault, ErrorTranslator, Page, Transport, TransportError, WriteOp};
use crate::types::{Item, Key, KeySchema, total_cmp};

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("item is missing key attributes")]
    MissingKey,

    #[error("conditional check failed")]
    ConditionFailed,

    #[error("transaction canceled: {0}")]
    TransactionCanceled(String),

    #[error("malformed pagination token: {0}")]
    InvalidToken(String),

    #[error("update of '{path}' failed: {message}")]
    UpdateFailed { path: String, message: String },
}

struct MemoryTable {
    key: KeySchema,
    indexes: HashMap<String, IndexDefinition>,
    rows: BTreeMap<Key, Item>,
}

/// Snapshot of call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub queries: usize,
    pub batch_gets: usize,
    pub batch_get_keys: usize,
    pub writes: usize,
    pub transactions: usize,
    /// Highest number of calls observed in flight at once.
    pub peak_in_flight: usize,
}

#[derive(Default)]
struct Counters {
    queries: AtomicUsize,
    batch_gets: AtomicUsize,
    batch_get_keys: AtomicUsize,
    writes: AtomicUsize,
    transactions: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a call returns.
struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        counters.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        InFlight(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// In-memory tables implementing [`Transport`] and [`ErrorTranslator`].
#[derive(Default)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<String, MemoryTable>>,
    latency: Option<Duration>,
    counters: Counters,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`, to make concurrency observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Create the table and indexes described by `options`.
    pub fn create_table(&self, options: &CollectionOptions) -> Result<(), MemoryError> {
        let mut tables = self.tables.write();
        let name = options.table_name();
        if tables.contains_key(name) {
            return Err(MemoryError::TableExists(name.to_string()));
        }
        let indexes = options
            .indexes()
            .iter()
            .map(|def| (def.name.clone(), def.clone()))
            .collect();
        tables.insert(
            name.to_string(),
            MemoryTable {
                key: options.key_schema(),
                indexes,
                rows: BTreeMap::new(),
            },
        );
        debug!(table = name, "created memory table");
        Ok(())
    }

    /// Stored item for `key`, if any.
    pub fn get_item(&self, table: &str, key: &Key) -> Option<Item> {
        self.tables.read().get(table)?.rows.get(key).cloned()
    }

    /// Number of items in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    pub fn stats(&self) -> MemoryStats {
        let c = &self.counters;
        MemoryStats {
            queries: c.queries.load(Ordering::Acquire),
            batch_gets: c.batch_gets.load(Ordering::Acquire),
            batch_get_keys: c.batch_get_keys.load(Ordering::Acquire),
            writes: c.writes.load(Ordering::Acquire),
            transactions: c.transactions.load(Ordering::Acquire),
            peak_in_flight: c.peak_in_flight.load(Ordering::Acquire),
        }
    }

    fn enter(&self, counter: &AtomicUsize) -> InFlight<'_> {
        counter.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight::enter(&self.counters);
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
        guard
    }
}

// ---------------------------------------------------------------------------
// Query evaluation
// ---------------------------------------------------------------------------

/// Compare two rows by the listed attributes; a missing attribute sorts first.
fn position_cmp(a: &Item, b: &Item, attrs: &[String]) -> CmpOrdering {
    for attr in attrs {
        let ord = match (a.get(attr), b.get(attr)) {
            (Some(x), Some(y)) => total_cmp(x, y),
            (None, Some(_)) => CmpOrdering::Less,
            (Some(_), None) => CmpOrdering::Greater,
            (None, None) => CmpOrdering::Equal,
        };
        if ord != CmpOrdering::Equal {
            return ord;
        }
    }
    CmpOrdering::Equal
}

fn encode_token(position: &Item) -> Result<PaginationToken, MemoryError> {
    rmp_serde::to_vec(position)
        .map(PaginationToken::from_bytes)
        .map_err(|e| MemoryError::InvalidToken(e.to_string()))
}

fn decode_token(token: &PaginationToken) -> Result<Item, MemoryError> {
    rmp_serde::from_slice(token.as_bytes()).map_err(|e| MemoryError::InvalidToken(e.to_string()))
}

impl MemoryTable {
    fn query_page(
        &self,
        plan: &Plan,
        limit: Option<usize>,
        token: Option<&PaginationToken>,
    ) -> Result<Page, MemoryError> {
        // 1. Resolve the view: primary key or one index.
        let index = match plan.index_name() {
            Some(name) => Some(
                self.indexes
                    .get(name)
                    .ok_or_else(|| MemoryError::IndexNotFound(name.to_string()))?,
            ),
            None => None,
        };
        let view_key = index.map_or_else(|| self.key.clone(), IndexDefinition::key_schema);
        let mut position_attrs: Vec<String> = Vec::new();
        for attr in view_key.attributes().chain(self.key.attributes()) {
            if !position_attrs.iter().any(|a| a == attr) {
                position_attrs.push(attr.to_string());
            }
        }

        // 2. Rows in the view, in view order. Index rows need every index key.
        let mut rows: Vec<&Item> = self
            .rows
            .values()
            .filter(|item| view_key.attributes().all(|a| item.contains_key(a)))
            .filter(|item| match plan.access() {
                Access::Query(kc) => kc.matches(item),
                Access::Scan => true,
            })
            .collect();
        if index.is_some() {
            rows.sort_by(|a, b| position_cmp(a, b, &position_attrs));
        }
        if !plan.scan_forward() {
            rows.reverse();
        }

        // 3. Resume strictly after the token position.
        let start = match token {
            Some(token) => {
                let after = decode_token(token)?;
                let past = if plan.scan_forward() {
                    CmpOrdering::Greater
                } else {
                    CmpOrdering::Less
                };
                rows.iter()
                    .position(|row| position_cmp(row, &after, &position_attrs) == past)
                    .unwrap_or(rows.len())
            }
            None => 0,
        };

        // 4. Evaluate up to `limit` rows; the filter does not change the count.
        let remaining = &rows[start..];
        let take = limit.unwrap_or(remaining.len()).min(remaining.len());
        let evaluated = &remaining[..take];
        let keep: Vec<&str> = position_attrs.iter().map(String::as_str).collect();
        let items: Vec<Item> = evaluated
            .iter()
            .filter(|row| plan.filter().is_none_or(|f| f.eval(row)))
            .map(|row| match index.map(|def| &def.projection) {
                None | Some(Projection::All) => (*row).clone(),
                Some(Projection::KeysOnly) => project_item(row, &position_attrs, &keep),
                Some(Projection::Include(fields)) => project_item(row, fields, &keep),
            })
            .collect();

        let next_token = match evaluated.last() {
            Some(last) if take < remaining.len() => {
                let position: Item = position_attrs
                    .iter()
                    .filter_map(|a| last.get(a).map(|v| (a.clone(), v.clone())))
                    .collect();
                Some(encode_token(&position)?)
            }
            _ => None,
        };

        trace!(
            evaluated = evaluated.len(),
            returned = items.len(),
            more = next_token.is_some(),
            "memory query page"
        );
        Ok(Page { items, next_token })
    }

    /// Compute the post-write state of one op's target without applying it.
    fn stage(&self, op: &WriteOp) -> Result<(Key, Option<Item>), MemoryError> {
        let key = match op {
            WriteOp::Put { item, .. } => Key::from_item(item, &self.key).ok_or(MemoryError::MissingKey)?,
            WriteOp::Update { key, .. } | WriteOp::Delete { key, .. } => key.clone(),
        };
        let existing = self.rows.get(&key);
        if let Some(condition) = op.condition() {
            let empty = Item::new();
            if !condition.eval(existing.unwrap_or(&empty)) {
                return Err(MemoryError::ConditionFailed);
            }
        }
        let after = match op {
            WriteOp::Put { item, .. } => Some(item.clone()),
            WriteOp::Delete { .. } => None,
            WriteOp::Update { mods, .. } => {
                let mut item = existing.cloned().unwrap_or_else(|| key.to_item(&self.key));
                update::apply_mods(&mut item, mods)?;
                Some(item)
            }
        };
        Ok((key, after))
    }

    fn commit(&mut self, key: Key, after: Option<Item>) {
        match after {
            Some(item) => {
                self.rows.insert(key, item);
            }
            None => {
                self.rows.remove(&key);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

impl Transport for MemoryBackend {
    fn execute_query(
        &self,
        plan: &Plan,
        limit: Option<usize>,
        token: Option<&PaginationToken>,
    ) -> Result<Page, TransportError> {
        let _guard = self.enter(&self.counters.queries);
        let tables = self.tables.read();
        let table = tables
            .get(plan.table())
            .ok_or_else(|| MemoryError::TableNotFound(plan.table().to_string()))?;
        Ok(table.query_page(plan, limit, token)?)
    }

    fn batch_get(&self, table: &str, keys: &[Key]) -> Result<Vec<Option<Item>>, TransportError> {
        let _guard = self.enter(&self.counters.batch_gets);
        self.counters
            .batch_get_keys
            .fetch_add(keys.len(), Ordering::AcqRel);
        let tables = self.tables.read();
        let table = tables
            .get(table)
            .ok_or_else(|| MemoryError::TableNotFound(table.to_string()))?;
        Ok(keys.iter().map(|k| table.rows.get(k).cloned()).collect())
    }

    fn write(&self, table: &str, op: WriteOp) -> Result<(), TransportError> {
        let _guard = self.enter(&self.counters.writes);
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(table)
            .ok_or_else(|| MemoryError::TableNotFound(table.to_string()))?;
        let (key, after) = table.stage(&op)?;
        table.commit(key, after);
        Ok(())
    }

    fn transact(&self, table: &str, ops: Vec<WriteOp>) -> Result<(), TransportError> {
        let _guard = self.enter(&self.counters.transactions);
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(table)
            .ok_or_else(|| MemoryError::TableNotFound(table.to_string()))?;

        // Validate everything before applying anything.
        let mut seen = HashSet::new();
        let mut staged = Vec::with_capacity(ops.len());
        for (i, op) in ops.iter().enumerate() {
            let (key, after) = table
                .stage(op)
                .map_err(|e| MemoryError::TransactionCanceled(format!("operation {i}: {e}")))?;
            if !seen.insert(key.clone()) {
                return Err(MemoryError::TransactionCanceled(format!(
                    "operation {i}: multiple operations on key {key}"
                ))
                .into());
            }
            staged.push((key, after));
        }
        for (key, after) in staged {
            table.commit(key, after);
        }
        Ok(())
    }
}

impl ErrorTranslator for MemoryBackend {
    fn classify(&self, err: &(dyn std::error::Error + Send + Sync + 'static)) -> BackendFault {
        match err.downcast_ref::<MemoryError>() {
            Some(MemoryError::ConditionFailed) => BackendFault::ConditionFailed,
            Some(MemoryError::TransactionCanceled(_)) => BackendFault::TransactionCanceled,
            Some(MemoryError::TableNotFound(_) | MemoryError::IndexNotFound(_)) => {
                BackendFault::NotFound
            }
            Some(MemoryError::TableExists(_)) => BackendFault::AlreadyExists,
            Some(
                MemoryError::MissingKey
                | MemoryError::InvalidToken(_)
                | MemoryError::UpdateFailed { .. },
            ) => BackendFault::InvalidArgument,
            None => BackendFault::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AttributeCodec, Codec};
    use crate::planner::{QueryPlanner, Queryable};
    use crate::query::{FilterExpr, FilterOp, Query};
    use crate::types::AttributeValue;
    use serde_json::{Value, json};

    fn options() -> CollectionOptions {
        CollectionOptions::builder("books")
            .partition_key("title")
            .sort_key("author")
            .allow_scans(true)
            .global_index("by-publisher", "publisher", Some("year"), Projection::KeysOnly)
            .build()
            .unwrap()
    }

    fn item(value: Value) -> Item {
        AttributeCodec.encode_map(value.as_object().unwrap()).unwrap()
    }

    fn put(backend: &MemoryBackend, value: Value) {
        backend
            .write(
                "books",
                WriteOp::Put {
                    item: item(value),
                    condition: None,
                },
            )
            .unwrap();
    }

    fn seeded() -> (MemoryBackend, CollectionOptions) {
        let options = options();
        let backend = MemoryBackend::new();
        backend.create_table(&options).unwrap();
        put(&backend, json!({"title": "B", "author": "A1", "publisher": "Orbit", "year": 2001}));
        put(&backend, json!({"title": "A", "author": "A2", "publisher": "Orbit", "year": 1999}));
        put(&backend, json!({"title": "A", "author": "A1", "publisher": "Tor", "year": 2010}));
        put(&backend, json!({"title": "C", "author": "A3"}));
        (backend, options)
    }

    fn plan(options: &CollectionOptions, query: Query) -> Plan {
        let queryables = Queryable::for_collection(options);
        QueryPlanner::new(options, &queryables, &AttributeCodec)
            .plan(&query)
            .unwrap()
    }

    fn titles(items: &[Item]) -> Vec<String> {
        items
            .iter()
            .map(|i| format!("{}/{}", i["title"].as_str().unwrap(), i["author"].as_str().unwrap()))
            .collect()
    }

    fn key(title: &str, author: &str) -> Key {
        Key {
            partition: title.into(),
            sort: Some(author.into()),
        }
    }

    #[test]
    fn test_create_table_twice_fails() {
        let (backend, options) = seeded();
        assert!(matches!(
            backend.create_table(&options),
            Err(MemoryError::TableExists(_))
        ));
    }

    #[test]
    fn test_scan_in_key_order() {
        let (backend, options) = seeded();
        let page = backend
            .execute_query(&plan(&options, Query::new()), None, None)
            .unwrap();
        assert_eq!(titles(&page.items), vec!["A/A1", "A/A2", "B/A1", "C/A3"]);
        assert!(page.next_token.is_none());
    }

    #[test]
    fn test_query_partition_with_filter() {
        let (backend, options) = seeded();
        let plan = plan(
            &options,
            Query::new()
                .filter("title", FilterOp::Equal, "A")
                .filter("year", FilterOp::GreaterThan, 2000),
        );
        let page = backend.execute_query(&plan, None, None).unwrap();
        assert_eq!(titles(&page.items), vec!["A/A1"]);
    }

    #[test]
    fn test_index_order_and_projection() {
        let (backend, options) = seeded();
        let plan = plan(&options, Query::new().filter("publisher", FilterOp::Equal, "Orbit"));
        let page = backend.execute_query(&plan, None, None).unwrap();
        assert_eq!(titles(&page.items), vec!["A/A2", "B/A1"]);
        assert_eq!(
            page.items[0],
            item(json!({"title": "A", "author": "A2", "publisher": "Orbit", "year": 1999}))
        );
    }

    #[test]
    fn test_limit_counts_evaluated_rows() {
        let (backend, options) = seeded();
        let plan = plan(&options, Query::new().filter("year", FilterOp::GreaterThan, 2000));

        let first = backend.execute_query(&plan, Some(2), None).unwrap();
        assert_eq!(titles(&first.items), vec!["A/A1"]);
        let token = first.next_token.unwrap();

        let second = backend.execute_query(&plan, Some(2), Some(&token)).unwrap();
        assert_eq!(titles(&second.items), vec!["B/A1"]);
        assert!(second.next_token.is_none());
    }

    #[test]
    fn test_descending_with_token() {
        let (backend, options) = seeded();
        let plan = plan(
            &options,
            Query::new()
                .filter("title", FilterOp::Equal, "A")
                .order_by("author", false),
        );
        let first = backend.execute_query(&plan, Some(1), None).unwrap();
        assert_eq!(titles(&first.items), vec!["A/A2"]);
        let second = backend
            .execute_query(&plan, Some(1), first.next_token.as_ref())
            .unwrap();
        assert_eq!(titles(&second.items), vec!["A/A1"]);
        assert!(second.next_token.is_none());
    }

    #[test]
    fn test_malformed_token() {
        let (backend, options) = seeded();
        let bad = PaginationToken::from_bytes(vec![0xc1]);
        let err = backend
            .execute_query(&plan(&options, Query::new()), None, Some(&bad))
            .unwrap_err();
        assert_eq!(backend.classify(err.as_ref()), BackendFault::InvalidArgument);
    }

    #[test]
    fn test_conditional_put() {
        let (backend, _) = seeded();
        let err = backend
            .write(
                "books",
                WriteOp::Put {
                    item: item(json!({"title": "A", "author": "A1"})),
                    condition: Some(FilterExpr::AttributeNotExists("title".into())),
                },
            )
            .unwrap_err();
        assert_eq!(backend.classify(err.as_ref()), BackendFault::ConditionFailed);
    }

    #[test]
    fn test_update_and_delete() {
        let (backend, _) = seeded();
        let mut mods = BTreeMap::new();
        mods.insert(
            "year".to_string(),
            crate::transport::ItemMod::Increment(AttributeValue::number(1)),
        );
        backend
            .write(
                "books",
                WriteOp::Update {
                    key: key("A", "A1"),
                    mods,
                    condition: Some(FilterExpr::AttributeExists("title".into())),
                },
            )
            .unwrap();
        assert_eq!(
            backend.get_item("books", &key("A", "A1")).unwrap()["year"],
            AttributeValue::number(2011)
        );

        backend
            .write(
                "books",
                WriteOp::Delete {
                    key: key("C", "A3"),
                    condition: None,
                },
            )
            .unwrap();
        assert_eq!(backend.len("books"), 3);
    }

    #[test]
    fn test_transaction_is_all_or_nothing() {
        let (backend, _) = seeded();
        let err = backend
            .transact(
                "books",
                vec![
                    WriteOp::Put {
                        item: item(json!({"title": "D", "author": "A4"})),
                        condition: None,
                    },
                    WriteOp::Delete {
                        key: key("Z", "Z"),
                        condition: Some(FilterExpr::AttributeExists("title".into())),
                    },
                ],
            )
            .unwrap_err();
        assert_eq!(backend.classify(err.as_ref()), BackendFault::TransactionCanceled);
        assert!(backend.get_item("books", &key("D", "A4")).is_none());
        assert_eq!(backend.len("books"), 4);
    }

    #[test]
    fn test_transaction_rejects_duplicate_keys() {
        let (backend, _) = seeded();
        let op = WriteOp::Delete {
            key: key("A", "A1"),
            condition: None,
        };
        let err = backend.transact("books", vec![op.clone(), op]).unwrap_err();
        assert_eq!(backend.classify(err.as_ref()), BackendFault::TransactionCanceled);
        assert_eq!(backend.len("books"), 4);
    }

    #[test]
    fn test_batch_get_positional() {
        let (backend, _) = seeded();
        let found = backend
            .batch_get("books", &[key("B", "A1"), key("X", "Y"), key("A", "A2")])
            .unwrap();
        assert!(found[0].is_some());
        assert!(found[1].is_none());
        assert!(found[2].is_some());
        let stats = backend.stats();
        assert_eq!(stats.batch_gets, 1);
        assert_eq!(stats.batch_get_keys, 3);
    }

    #[test]
    fn test_unknown_table_and_foreign_errors() {
        let backend = MemoryBackend::new();
        let err = backend.batch_get("nope", &[]).unwrap_err();
        assert_eq!(backend.classify(err.as_ref()), BackendFault::NotFound);

        let foreign: TransportError = "boom".into();
        assert_eq!(backend.classify(foreign.as_ref()), BackendFault::Unknown);
    }
}
