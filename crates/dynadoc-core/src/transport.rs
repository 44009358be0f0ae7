//! The backend seam: network calls and error classification.
//!
//! One implementation per backend, chosen when the collection is built. All
//! calls are blocking; the action executor runs free actions on its own
//! worker threads, so implementations must be `Send + Sync`.

use std::collections::BTreeMap;

use crate::error::ErrorKind;
use crate::iter::PaginationToken;
use crate::planner::Plan;
use crate::query::FilterExpr;
use crate::types::{AttributeValue, Item, Key};

/// Error type returned by transports.
pub type TransportError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    /// Resume position when the backend has more results.
    pub next_token: Option<PaginationToken>,
}

/// Optional transport features the planner may rely on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The backend can return scan results ordered by an arbitrary field.
    pub scan_ordering: bool,
}

/// A modification applied by an update write.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemMod {
    Set(AttributeValue),
    Remove,
    /// Add a number to the current value (absent counts as zero).
    Increment(AttributeValue),
}

/// A single conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        item: Item,
        condition: Option<FilterExpr>,
    },
    Update {
        key: Key,
        mods: BTreeMap<String, ItemMod>,
        condition: Option<FilterExpr>,
    },
    Delete {
        key: Key,
        condition: Option<FilterExpr>,
    },
}

impl WriteOp {
    pub fn condition(&self) -> Option<&FilterExpr> {
        match self {
            WriteOp::Put { condition, .. }
            | WriteOp::Update { condition, .. }
            | WriteOp::Delete { condition, .. } => condition.as_ref(),
        }
    }
}

pub trait Transport: Send + Sync {
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Run one page of `plan`, resuming after `token`. `limit` bounds the
    /// number of rows the backend evaluates for this page.
    fn execute_query(
        &self,
        plan: &Plan,
        limit: Option<usize>,
        token: Option<&PaginationToken>,
    ) -> Result<Page, TransportError>;

    /// Read items by primary key; the result is positional.
    fn batch_get(&self, table: &str, keys: &[Key]) -> Result<Vec<Option<Item>>, TransportError>;

    fn write(&self, table: &str, op: WriteOp) -> Result<(), TransportError>;

    /// Apply every op or none of them.
    fn transact(&self, table: &str, ops: Vec<WriteOp>) -> Result<(), TransportError>;
}

/// Backend-specific failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFault {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    /// A write precondition did not hold.
    ConditionFailed,
    /// A transactional call was aborted.
    TransactionCanceled,
    Unknown,
}

impl BackendFault {
    /// The error kind reported for this fault outside any write context. A
    /// failed precondition means the expected document is not there.
    pub fn error_kind(self) -> ErrorKind {
        match self {
            BackendFault::InvalidArgument => ErrorKind::InvalidArgument,
            BackendFault::NotFound | BackendFault::ConditionFailed => ErrorKind::NotFound,
            BackendFault::AlreadyExists => ErrorKind::AlreadyExists,
            BackendFault::TransactionCanceled => ErrorKind::TransactionFailed,
            BackendFault::Unknown => ErrorKind::Unknown,
        }
    }
}

/// Classifies transport errors.
pub trait ErrorTranslator: Send + Sync {
    fn classify(&self, err: &(dyn std::error::Error + Send + Sync + 'static)) -> BackendFault;
}
