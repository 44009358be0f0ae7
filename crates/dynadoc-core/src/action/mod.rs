//! Action lists: batched point operations with an optional atomic group.
//!
//! Actions are appended to an [`ActionList`] and executed together by
//! [`ActionList::run`]. Actions appended before
//! [`enable_atomic_writes`](ActionList::enable_atomic_writes) are free: they
//! run concurrently with bounded parallelism. Writes appended after it form
//! the atomic group, issued as one transactional call once every free action
//! has finished.

pub(crate) mod executor;
pub mod revision;

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::collection::Collection;
use crate::document::Document;
use crate::error::{ActionError, ActionListError, Error};

pub use revision::{IdGenerator, SequenceGenerator, UuidGenerator};

/// Most keys sent in one batched read.
pub const MAX_BATCH_GET_KEYS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Get,
    Create,
    Put,
    Replace,
    Update,
    Delete,
}

impl ActionKind {
    pub fn is_write(self) -> bool {
        self != ActionKind::Get
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Get => "GET",
            ActionKind::Create => "CREATE",
            ActionKind::Put => "PUT",
            ActionKind::Replace => "REPLACE",
            ActionKind::Update => "UPDATE",
            ActionKind::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A modification to one field path of a stored document.
#[derive(Debug, Clone, PartialEq)]
pub enum Mod {
    Set(Value),
    Remove,
    /// Add a number to the stored value; a missing value counts as zero.
    Increment(Value),
}

impl Mod {
    pub fn set(value: impl Into<Value>) -> Self {
        Mod::Set(value.into())
    }

    pub fn increment(amount: impl Into<Value>) -> Self {
        Mod::Increment(amount.into())
    }
}

/// Field path to modification.
pub type Mods = BTreeMap<String, Mod>;

/// One queued operation bound to a caller's document.
pub struct Action<'d> {
    kind: ActionKind,
    document: Document<'d>,
    field_paths: Vec<String>,
    mods: Mods,
    index: usize,
    in_atomic_writes: bool,
}

impl Action<'_> {
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn in_atomic_writes(&self) -> bool {
        self.in_atomic_writes
    }
}

/// Ordered actions plus the point where atomic writes began.
pub struct ActionList<'c, 'd> {
    collection: &'c Collection,
    actions: Vec<Action<'d>>,
    atomic_boundary: Option<usize>,
}

impl<'c, 'd> ActionList<'c, 'd> {
    pub(crate) fn new(collection: &'c Collection) -> Self {
        Self {
            collection,
            actions: Vec::new(),
            atomic_boundary: None,
        }
    }

    fn push(
        &mut self,
        kind: ActionKind,
        document: Document<'d>,
        field_paths: Vec<String>,
        mods: Mods,
    ) -> &mut Self {
        let index = self.actions.len();
        self.actions.push(Action {
            kind,
            document,
            field_paths,
            mods,
            index,
            in_atomic_writes: kind.is_write() && self.atomic_boundary.is_some(),
        });
        self
    }

    /// Read the stored document into `document`. With field paths, only those
    /// paths (plus the key fields) are written into it.
    pub fn get(&mut self, document: Document<'d>, field_paths: &[&str]) -> &mut Self {
        let paths = field_paths.iter().map(|p| p.to_string()).collect();
        self.push(ActionKind::Get, document, paths, Mods::new())
    }

    /// Write a new document; fails if the key exists.
    pub fn create(&mut self, document: Document<'d>) -> &mut Self {
        self.push(ActionKind::Create, document, Vec::new(), Mods::new())
    }

    /// Write a document whether or not the key exists.
    pub fn put(&mut self, document: Document<'d>) -> &mut Self {
        self.push(ActionKind::Put, document, Vec::new(), Mods::new())
    }

    /// Overwrite an existing document.
    pub fn replace(&mut self, document: Document<'d>) -> &mut Self {
        self.push(ActionKind::Replace, document, Vec::new(), Mods::new())
    }

    /// Apply `mods` to an existing document identified by `document`'s key.
    pub fn update(&mut self, document: Document<'d>, mods: Mods) -> &mut Self {
        self.push(ActionKind::Update, document, Vec::new(), mods)
    }

    pub fn delete(&mut self, document: Document<'d>) -> &mut Self {
        self.push(ActionKind::Delete, document, Vec::new(), Mods::new())
    }

    /// Make every write appended from now on part of the atomic group.
    /// Allowed once per list.
    pub fn enable_atomic_writes(&mut self) -> Result<&mut Self, Error> {
        if let Some(boundary) = self.atomic_boundary {
            return Err(ActionError::AtomicWritesAlreadyEnabled(boundary).into());
        }
        self.atomic_boundary = Some(self.actions.len());
        Ok(self)
    }

    /// Index of the first action appended after atomic writes were enabled.
    pub fn atomic_boundary(&self) -> Option<usize> {
        self.atomic_boundary
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Execute every action. Returns one failure per failed action.
    pub fn run(self) -> Result<(), ActionListError> {
        executor::execute(self.collection, self.actions)
    }
}

impl fmt::Debug for ActionList<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<ActionKind> = self.actions.iter().map(Action::kind).collect();
        f.debug_struct("ActionList")
            .field("actions", &kinds)
            .field("atomic_boundary", &self.atomic_boundary)
            .finish()
    }
}
