//! Error types for all dynadoc operations.
//!
//! Every error maps onto one [`ErrorKind`], the taxonomy callers branch on.

use std::fmt;

use thiserror::Error;

use crate::action::ActionKind;
use crate::transport::TransportError;

/// Coarse classification shared by every error the engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    TransactionFailed,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotFound => "resource not found",
            ErrorKind::AlreadyExists => "resource already exists",
            ErrorKind::TransactionFailed => "transaction failed",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Top-level error type for dynadoc operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// `next` was called on an iterator with no remaining results.
    #[error("no more documents in iterator")]
    Exhausted,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Options(_) | Error::Document(_) | Error::Codec(_) | Error::Plan(_) => {
                ErrorKind::InvalidArgument
            }
            Error::Action(e) => e.kind(),
            Error::Backend(e) => e.kind(),
            Error::Exhausted => ErrorKind::NotFound,
        }
    }
}

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("table name must not be empty")]
    EmptyTableName,

    #[error("partition key field must not be empty")]
    EmptyPartitionKey,

    #[error("sort key '{0}' must differ from the partition key")]
    SortKeyIsPartitionKey(String),

    #[error("revision field '{0}' must not be a key field")]
    RevisionFieldIsKey(String),

    #[error("max_outstanding_action_rpcs must be at least 1")]
    ZeroOutstandingRpcs,

    #[error("index name must not be empty")]
    EmptyIndexName,

    #[error("duplicate index name: {0}")]
    DuplicateIndex(String),

    #[error("index '{0}' has an empty key attribute")]
    EmptyIndexKey(String),

    #[error("local index '{index}' must use the table partition key '{expected}'")]
    LocalIndexPartitionKey { index: String, expected: String },

    #[error("local index '{0}' requires a sort key")]
    LocalIndexWithoutSortKey(String),

    #[error("collection for table '{0}' has no transport")]
    MissingTransport(String),

    #[error("failed to parse collection options: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("field not found: {0}")]
    FieldNotFound(String),

    #[error("record has no field named '{0}'")]
    UnknownField(String),

    #[error("invalid field path: '{0}'")]
    InvalidPath(String),

    #[error("path '{path}' crosses non-object value at '{segment}'")]
    NotAnObject { path: String, segment: String },

    #[error("field '{field}' has the wrong type: {message}")]
    TypeMismatch { field: String, message: String },
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("number '{0}' cannot be represented")]
    InvalidNumber(String),

    #[error("unsupported value for field '{field}': {message}")]
    Unsupported { field: String, message: String },
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("filter field must not be empty")]
    EmptyFilterField,

    #[error("filter on '{field}' with {op} requires a list value")]
    ExpectedList { field: String, op: &'static str },

    #[error(
        "no index of table '{table}' has an equality filter on its partition key and scans are disabled"
    )]
    NoUsableIndex { table: String },

    #[error("order by '{field}' is not supported on a scan")]
    OrderByOnScan { field: String },

    #[error("order by '{field}' needs an index with '{field}' as its sort key")]
    OrderByNotSortKey { field: String },
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("document is missing partition key '{0}'")]
    MissingPartitionKey(String),

    #[error("document is missing sort key '{0}'")]
    MissingSortKey(String),

    #[error("key field '{field}' must be a non-empty string or a number, got {found}")]
    InvalidKeyValue { field: String, found: String },

    #[error("create must not carry a revision (field '{0}')")]
    RevisionOnCreate(String),

    #[error("modification touches protected field '{0}'")]
    ProtectedField(String),

    #[error("update requires at least one modification")]
    EmptyMods,

    #[error("atomic writes are already enabled at action {0}")]
    AtomicWritesAlreadyEnabled(usize),

    #[error("no document with key {0}")]
    NotFound(String),

    #[error("atomic group aborted because action {0} failed")]
    AtomicGroupAborted(usize),
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::NotFound(_) => ErrorKind::NotFound,
            ActionError::AtomicGroupAborted(_) => ErrorKind::TransactionFailed,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

/// A transport failure after classification by the error translator.
#[derive(Debug, Error)]
#[error("backend error ({kind}): {source}")]
pub struct BackendError {
    kind: ErrorKind,
    #[source]
    source: TransportError,
}

impl BackendError {
    pub fn new(kind: ErrorKind, source: TransportError) -> Self {
        Self { kind, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// One failed action from [`ActionList::run`](crate::action::ActionList::run).
#[derive(Debug)]
pub struct ActionFailure {
    /// Position of the action in its list.
    pub index: usize,
    pub kind: ActionKind,
    pub error: Error,
}

/// Returned by `run()` when at least one action failed.
#[derive(Debug, Error)]
#[error("{} of {total} actions failed; first: action {}: {}",
    failures.len(), failures[0].index, failures[0].error)]
pub struct ActionListError {
    pub failures: Vec<ActionFailure>,
    pub total: usize,
}

impl ActionListError {
    /// The failure recorded for the action at `index`, if any.
    pub fn failure(&self, index: usize) -> Option<&ActionFailure> {
        self.failures.iter().find(|f| f.index == index)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
