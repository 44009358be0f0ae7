//! Runs an action list against the collection's transport.
//!
//! Execution has four phases:
//!
//! 1. **Prepare** every action: resolve its key, build the native write and
//!    its precondition, draw fresh revisions. Failures here never reach the
//!    backend. One invalid atomic member aborts the whole group.
//! 2. **Free phase**: coalesced batched reads and free writes run on a pool of
//!    at most `max_outstanding_action_rpcs` workers.
//! 3. **Atomic phase**: the atomic writes go out as one transactional call.
//! 4. **Finish**: fan read results back into the callers' documents and write
//!    new revisions back.

use std::collections::{BTreeMap, HashMap};
use std::thread;

use crossbeam_channel::unbounded;
use serde_json::Value;
use tracing::{debug, trace};

use crate::codec::Codec;
use crate::collection::Collection;
use crate::document::Document;
use crate::document::path::{split_path, top_level};
use crate::error::{
    ActionError, ActionFailure, ActionListError, BackendError, CodecError, DocumentError, Error,
    ErrorKind,
};
use crate::transport::{BackendFault, ItemMod, TransportError, WriteOp};
use crate::types::{AttributeValue, Item, Key, KeySchema};

use super::revision::{caller_revision, is_blank, write_condition};
use super::{Action, ActionKind, MAX_BATCH_GET_KEYS, Mod};

/// An action after phase 1.
enum Prepared {
    Get(Key),
    Write {
        op: WriteOp,
        /// Revision to write back into the document on success.
        revision: Option<String>,
    },
}

/// Work item for the free-phase pool.
enum Task {
    BatchGet(Vec<Key>),
    Write { index: usize, op: WriteOp },
}

enum TaskOutcome {
    BatchGet(Result<Vec<Option<Item>>, TransportError>),
    Write {
        index: usize,
        result: Result<(), TransportError>,
    },
}

pub(crate) fn execute(
    collection: &Collection,
    mut actions: Vec<Action<'_>>,
) -> Result<(), ActionListError> {
    let total = actions.len();
    let table = collection.options().table_name();
    let mut errors: BTreeMap<usize, Error> = BTreeMap::new();
    let mut prepared: Vec<Option<Prepared>> = Vec::with_capacity(total);

    // 1. Prepare.
    for action in &mut actions {
        match prepare(collection, action) {
            Ok(p) => prepared.push(Some(p)),
            Err(e) => {
                errors.insert(action.index, e);
                prepared.push(None);
            }
        }
    }
    let atomic: Vec<usize> = actions
        .iter()
        .filter(|a| a.in_atomic_writes)
        .map(|a| a.index)
        .collect();
    if let Some(&bad) = atomic.iter().find(|i| errors.contains_key(i)) {
        for &i in &atomic {
            errors
                .entry(i)
                .or_insert_with(|| ActionError::AtomicGroupAborted(bad).into());
            prepared[i] = None;
        }
    }

    // 2. Free phase: coalesce reads, then run reads and free writes together.
    let mut slot_of: HashMap<Key, usize> = HashMap::new();
    let mut unique_keys: Vec<Key> = Vec::new();
    let mut get_slots: Vec<(usize, usize)> = Vec::new();
    let mut tasks: Vec<Task> = Vec::new();
    let mut atomic_ops: Vec<(usize, WriteOp)> = Vec::new();
    let mut revisions: HashMap<usize, String> = HashMap::new();

    for (index, slot) in prepared.into_iter().enumerate() {
        match slot {
            Some(Prepared::Get(key)) => {
                let next = unique_keys.len();
                let slot = *slot_of.entry(key.clone()).or_insert_with(|| {
                    unique_keys.push(key);
                    next
                });
                get_slots.push((index, slot));
            }
            Some(Prepared::Write { op, revision }) => {
                if let Some(revision) = revision {
                    revisions.insert(index, revision);
                }
                if actions[index].in_atomic_writes {
                    atomic_ops.push((index, op));
                } else {
                    tasks.push(Task::Write { index, op });
                }
            }
            None => {}
        }
    }
    let free_writes = tasks.len();
    for chunk in unique_keys.chunks(MAX_BATCH_GET_KEYS) {
        tasks.push(Task::BatchGet(chunk.to_vec()));
    }

    let workers = collection.options().max_outstanding_action_rpcs();
    debug!(
        table,
        actions = total,
        gets = get_slots.len(),
        unique_keys = unique_keys.len(),
        free_writes,
        atomic_writes = atomic_ops.len(),
        workers,
        "running action list"
    );

    let transport = collection.transport();
    let outcomes = run_bounded(tasks, workers, |task| match task {
        Task::BatchGet(keys) => TaskOutcome::BatchGet(transport.batch_get(table, &keys)),
        Task::Write { index, op } => TaskOutcome::Write {
            index,
            result: transport.write(table, op),
        },
    });

    let mut found: Vec<Option<Item>> = Vec::with_capacity(unique_keys.len());
    let mut read_errors: HashMap<usize, (ErrorKind, String)> = HashMap::new();
    for outcome in outcomes {
        match outcome {
            TaskOutcome::Write { index, result } => {
                if let Err(e) = result {
                    errors.insert(index, write_error(collection, actions[index].kind, e));
                }
            }
            TaskOutcome::BatchGet(result) => {
                let chunk = found.len() / MAX_BATCH_GET_KEYS;
                let len = MAX_BATCH_GET_KEYS.min(unique_keys.len() - found.len());
                match result {
                    Ok(mut items) => {
                        items.resize(len, None);
                        found.extend(items);
                    }
                    Err(e) => {
                        let kind = collection.translator().classify(e.as_ref()).error_kind();
                        read_errors.insert(chunk, (kind, e.to_string()));
                        found.extend(std::iter::repeat_n(None, len));
                    }
                }
            }
        }
    }

    // 3. Atomic phase: one call, after every free action finished.
    if !atomic_ops.is_empty() {
        let (indexes, ops): (Vec<usize>, Vec<WriteOp>) = atomic_ops.into_iter().unzip();
        if let Err(e) = transport.transact(table, ops) {
            debug!(table, error = %e, "atomic group failed");
            let first = indexes[0];
            errors.insert(
                first,
                BackendError::new(ErrorKind::TransactionFailed, e).into(),
            );
            for &i in &indexes[1..] {
                errors.insert(i, ActionError::AtomicGroupAborted(first).into());
            }
        }
    }

    // 4. Finish: fan out reads, write back revisions.
    let codec = collection.codec();
    let key_schema = collection.options().key_schema();
    for (index, slot) in get_slots {
        let action = &mut actions[index];
        if let Some((kind, message)) = read_errors.get(&(slot / MAX_BATCH_GET_KEYS)) {
            errors.insert(index, BackendError::new(*kind, message.clone().into()).into());
            continue;
        }
        let result = match found.get(slot).and_then(Option::as_ref) {
            Some(item) => decode_get(codec, item, &key_schema, action),
            None => Err(ActionError::NotFound(unique_keys[slot].to_string()).into()),
        };
        if let Err(e) = result {
            errors.insert(index, e);
        }
    }
    if let Some(field) = collection.options().revision_field() {
        for (index, revision) in revisions {
            if errors.contains_key(&index) {
                continue;
            }
            match actions[index].document.set_field(field, Value::String(revision)) {
                Ok(()) => {}
                Err(DocumentError::UnknownField(name)) => {
                    trace!(field = %name, "record has no revision field");
                }
                Err(e) => {
                    errors.insert(index, e.into());
                }
            }
        }
    }

    if errors.is_empty() {
        return Ok(());
    }
    debug!(table, failed = errors.len(), total, "action list finished with failures");
    let failures = errors
        .into_iter()
        .map(|(index, error)| ActionFailure {
            index,
            kind: actions[index].kind,
            error,
        })
        .collect();
    Err(ActionListError { failures, total })
}

// ---------------------------------------------------------------------------
// Phase 1
// ---------------------------------------------------------------------------

fn prepare(collection: &Collection, action: &mut Action<'_>) -> Result<Prepared, Error> {
    let options = collection.options();
    let codec = collection.codec();
    let key_schema = options.key_schema();
    let partition_key = options.partition_key();

    if action.kind == ActionKind::Create
        && options.sort_key().is_none()
        && is_blank(&action.document, partition_key)
    {
        let id = collection.id_generator().new_id();
        trace!(field = partition_key, id = %id, "generated key");
        action
            .document
            .set_field(partition_key, Value::String(id))?;
    }

    let key = document_key(collection, &action.document, &key_schema)?;
    if action.kind == ActionKind::Get {
        return Ok(Prepared::Get(key));
    }

    let revision_field = options.revision_field();
    let supplied = match revision_field {
        Some(field) => caller_revision(&action.document, field),
        None => None,
    };
    let precondition = match (revision_field, supplied) {
        (Some(field), Some(_)) if action.kind == ActionKind::Create => {
            return Err(ActionError::RevisionOnCreate(field.to_string()).into());
        }
        (Some(field), Some(value)) => Some((field, codec.encode_value(&value)?)),
        _ => None,
    };
    let condition = write_condition(action.kind, partition_key, precondition);
    let revision = match action.kind {
        ActionKind::Delete => None,
        _ => revision_field.map(|_| collection.id_generator().new_id()),
    };

    let op = match action.kind {
        ActionKind::Create | ActionKind::Put | ActionKind::Replace => {
            let mut item = action.document.encode(codec)?;
            if let (Some(field), Some(revision)) = (revision_field, &revision) {
                item.insert(field.to_string(), AttributeValue::string(revision.clone()));
            }
            WriteOp::Put { item, condition }
        }
        ActionKind::Update => {
            let mut mods = native_mods(collection, &action.mods, &key_schema)?;
            if let (Some(field), Some(revision)) = (revision_field, &revision) {
                mods.insert(
                    field.to_string(),
                    ItemMod::Set(AttributeValue::string(revision.clone())),
                );
            }
            WriteOp::Update {
                key,
                mods,
                condition,
            }
        }
        ActionKind::Delete => WriteOp::Delete { key, condition },
        ActionKind::Get => return Ok(Prepared::Get(key)),
    };
    Ok(Prepared::Write { op, revision })
}

/// The primary key named by a document's key fields.
fn document_key(
    collection: &Collection,
    document: &Document<'_>,
    schema: &KeySchema,
) -> Result<Key, Error> {
    let codec = collection.codec();
    let read = |field: &str, missing: fn(String) -> ActionError| -> Result<AttributeValue, Error> {
        let value = match document.get_field(field) {
            Ok(Value::Null) | Err(DocumentError::FieldNotFound(_)) => {
                return Err(missing(field.to_string()).into());
            }
            Ok(Value::String(s)) if s.is_empty() => return Err(missing(field.to_string()).into()),
            Ok(value) => value,
            Err(e) => return Err(e.into()),
        };
        let attr = codec.encode_value(&value)?;
        if !attr.is_valid_key() {
            return Err(ActionError::InvalidKeyValue {
                field: field.to_string(),
                found: attr.type_name().to_string(),
            }
            .into());
        }
        Ok(attr)
    };
    let partition = read(&schema.partition, ActionError::MissingPartitionKey)?;
    let sort = match &schema.sort {
        Some(field) => Some(read(field, ActionError::MissingSortKey)?),
        None => None,
    };
    Ok(Key { partition, sort })
}

/// Convert caller modifications into native ones, rejecting paths that touch
/// key or revision fields.
fn native_mods(
    collection: &Collection,
    mods: &BTreeMap<String, Mod>,
    key_schema: &KeySchema,
) -> Result<BTreeMap<String, ItemMod>, Error> {
    if mods.is_empty() {
        return Err(ActionError::EmptyMods.into());
    }
    let codec = collection.codec();
    let revision_field = collection.options().revision_field();
    let mut native = BTreeMap::new();
    for (path, m) in mods {
        split_path(path)?;
        let top = top_level(path);
        if key_schema.contains(top) || revision_field == Some(top) {
            return Err(ActionError::ProtectedField(path.clone()).into());
        }
        let item_mod = match m {
            Mod::Set(value) => ItemMod::Set(codec.encode_value(value)?),
            Mod::Remove => ItemMod::Remove,
            Mod::Increment(amount) => match codec.encode_value(amount)? {
                number @ AttributeValue::Number(_) => ItemMod::Increment(number),
                other => {
                    return Err(CodecError::Unsupported {
                        field: path.clone(),
                        message: format!("increment requires a number, got {}", other.type_name()),
                    }
                    .into());
                }
            },
        };
        native.insert(path.clone(), item_mod);
    }
    Ok(native)
}

// ---------------------------------------------------------------------------
// Phases 2-4
// ---------------------------------------------------------------------------

/// Run `f` over `tasks` on at most `max_workers` scoped threads, returning the
/// outcomes in task order.
fn run_bounded<T, R, F>(tasks: Vec<T>, max_workers: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let count = tasks.len();
    if count == 0 {
        return Vec::new();
    }
    let workers = max_workers.clamp(1, count);

    let (task_tx, task_rx) = unbounded();
    for task in tasks.into_iter().enumerate() {
        // The receiver lives until the scope below ends.
        if task_tx.send(task).is_err() {
            break;
        }
    }
    drop(task_tx);

    let (result_tx, result_rx) = unbounded();
    thread::scope(|scope| {
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let f = &f;
            scope.spawn(move || {
                for (i, task) in task_rx.iter() {
                    if result_tx.send((i, f(task))).is_err() {
                        break;
                    }
                }
            });
        }
    });
    drop(result_tx);

    let mut slots: Vec<Option<R>> = (0..count).map(|_| None).collect();
    for (i, outcome) in result_rx.iter() {
        slots[i] = Some(outcome);
    }
    slots.into_iter().flatten().collect()
}

/// Classify a failed free write. A failed precondition on CREATE means the
/// key already exists; on any other kind it means the document (or its
/// expected revision) is gone.
fn write_error(collection: &Collection, kind: ActionKind, err: TransportError) -> Error {
    let fault = collection.translator().classify(err.as_ref());
    let error_kind = match (fault, kind) {
        (BackendFault::ConditionFailed, ActionKind::Create) => ErrorKind::AlreadyExists,
        (fault, _) => fault.error_kind(),
    };
    BackendError::new(error_kind, err).into()
}

fn decode_get(
    codec: &dyn Codec,
    item: &Item,
    key_schema: &KeySchema,
    action: &mut Action<'_>,
) -> Result<(), Error> {
    if action.field_paths.is_empty() {
        return Document::decode(codec, item, &mut action.document);
    }
    let mut wanted: Vec<String> = key_schema.attributes().map(str::to_string).collect();
    wanted.extend(action.field_paths.iter().cloned());
    Document::decode_paths(codec, item, &wanted, &mut action.document)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_run_bounded_keeps_task_order() {
        let out = run_bounded((0..50).collect(), 4, |n: u32| n * 2);
        assert_eq!(out, (0..50).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_run_bounded_limits_workers() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        run_bounded((0..12).collect(), 3, |_: u32| {
            let now = in_flight.fetch_add(1, Ordering::AcqRel) + 1;
            peak.fetch_max(now, Ordering::AcqRel);
            thread::sleep(Duration::from_millis(5));
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });
        let peak = peak.load(Ordering::Acquire);
        assert!(peak <= 3, "peak {peak}");
    }

    #[test]
    fn test_run_bounded_empty_and_single_worker() {
        let out: Vec<u8> = run_bounded(Vec::<u8>::new(), 4, |n| n);
        assert!(out.is_empty());

        let seen = Mutex::new(Vec::new());
        run_bounded(vec![1, 2, 3], 1, |n: u8| seen.lock().unwrap().push(n));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }
}
