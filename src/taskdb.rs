//! The task database: task documents, operation logs, the working set, and
//! the sync cursor, all encoded into one [`Storage`] key space.
//!
//! Key layout (each prefix is its own partition; none is a prefix of another):
//!
//! | key                      | value                                  |
//! |--------------------------|----------------------------------------|
//! | `task:<uuid>`            | JSON property map                      |
//! | `op:<seq>`               | JSON operation, not yet synced         |
//! | `undo:<seq>`             | JSON operation, undo log               |
//! | `hist:<seq>`             | JSON operation, per-task audit history |
//! | `ws:<index>`             | task UUID in the working set           |
//! | `meta:base_version`      | last server version synced through     |
//! | `meta:next_seq`          | next log sequence number               |
//!
//! `<seq>` and `<index>` are 16-digit zero-padded hex so that key order is
//! numeric order.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use log::{debug, trace};
use uuid::Uuid;

use crate::errors::{invalid, Error, Result};
use crate::model::{Status, TaskMap};
use crate::operation::{Operation, Operations};
use crate::storage::{Storage, StorageTxn};
use crate::validate::{format_timestamp, parse_timestamp, validate_property};

pub(crate) const TASK_PREFIX: &[u8] = b"task:";
pub(crate) const LOCAL_OPS: &[u8] = b"op:";
pub(crate) const UNDO_LOG: &[u8] = b"undo:";
pub(crate) const HISTORY: &[u8] = b"hist:";
const WORKING_SET: &[u8] = b"ws:";
const BASE_VERSION: &[u8] = b"meta:base_version";
const NEXT_SEQ: &[u8] = b"meta:next_seq";

/// Properties whose values are epoch-second timestamps.
const DATE_PROPERTIES: &[&str] = &[
    "entry",
    "modified",
    "due",
    "wait",
    "start",
    "end",
    "scheduled",
    "until",
];

fn key(prefix: &[u8], suffix: &str) -> Vec<u8> {
    let mut k = prefix.to_vec();
    k.extend_from_slice(suffix.as_bytes());
    k
}

fn task_key(uuid: Uuid) -> Vec<u8> {
    key(TASK_PREFIX, &uuid.to_string())
}

fn numbered_key(prefix: &[u8], n: u64) -> Vec<u8> {
    key(prefix, &format!("{n:016x}"))
}

fn parse_numbered_key(prefix: &[u8], k: &[u8]) -> Result<u64> {
    std::str::from_utf8(&k[prefix.len()..])
        .ok()
        .and_then(|s| u64::from_str_radix(s, 16).ok())
        .ok_or_else(|| Error::Storage(format!("malformed key {}", String::from_utf8_lossy(k))))
}

fn read_u64(txn: &mut dyn StorageTxn, k: &[u8]) -> Result<u64> {
    match txn.get(k)? {
        None => Ok(0),
        Some(bytes) => std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                Error::Storage(format!("malformed value for {}", String::from_utf8_lossy(k)))
            }),
    }
}

// ---- task documents ----

/// The stored document for `uuid`, including an empty one.
pub(crate) fn get_task_doc(txn: &mut dyn StorageTxn, uuid: Uuid) -> Result<Option<TaskMap>> {
    match txn.get(&task_key(uuid))? {
        None => Ok(None),
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
    }
}

/// The task `uuid`, treating a task with no properties as nonexistent.
pub(crate) fn get_task(txn: &mut dyn StorageTxn, uuid: Uuid) -> Result<Option<TaskMap>> {
    Ok(get_task_doc(txn, uuid)?.filter(|t| !t.is_empty()))
}

pub(crate) fn set_task(txn: &mut dyn StorageTxn, uuid: Uuid, task: &TaskMap) -> Result<()> {
    txn.set(&task_key(uuid), serde_json::to_vec(task)?)
}

pub(crate) fn remove_task(txn: &mut dyn StorageTxn, uuid: Uuid) -> Result<()> {
    txn.delete(&task_key(uuid))
}

/// Every task with at least one property, ordered by UUID.
pub(crate) fn all_tasks(txn: &mut dyn StorageTxn) -> Result<Vec<(Uuid, TaskMap)>> {
    let mut tasks = Vec::new();
    for (k, v) in txn.scan(TASK_PREFIX)? {
        let uuid = std::str::from_utf8(&k[TASK_PREFIX.len()..])
            .ok()
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| {
                Error::Storage(format!("malformed task key {}", String::from_utf8_lossy(&k)))
            })?;
        let task: TaskMap = serde_json::from_slice(&v)?;
        if !task.is_empty() {
            tasks.push((uuid, task));
        }
    }
    Ok(tasks)
}

/// Replace every task document.
pub(crate) fn replace_all_tasks(
    txn: &mut dyn StorageTxn,
    tasks: &BTreeMap<Uuid, TaskMap>,
) -> Result<()> {
    for (k, _) in txn.scan(TASK_PREFIX)? {
        txn.delete(&k)?;
    }
    for (uuid, task) in tasks {
        set_task(txn, *uuid, task)?;
    }
    Ok(())
}

// ---- operation logs ----

pub(crate) fn append_log(txn: &mut dyn StorageTxn, log: &[u8], op: &Operation) -> Result<()> {
    let seq = read_u64(txn, NEXT_SEQ)?;
    txn.set(&numbered_key(log, seq), serde_json::to_vec(op)?)?;
    txn.set(NEXT_SEQ, (seq + 1).to_string().into_bytes())
}

/// The log's entries in order, with their storage keys.
pub(crate) fn read_log(txn: &mut dyn StorageTxn, log: &[u8]) -> Result<Vec<(Vec<u8>, Operation)>> {
    txn.scan(log)?
        .into_iter()
        .map(|(k, v)| Ok((k, serde_json::from_slice(&v)?)))
        .collect()
}

pub(crate) fn clear_log(txn: &mut dyn StorageTxn, log: &[u8]) -> Result<()> {
    for (k, _) in txn.scan(log)? {
        txn.delete(&k)?;
    }
    Ok(())
}

pub(crate) fn base_version(txn: &mut dyn StorageTxn) -> Result<u64> {
    read_u64(txn, BASE_VERSION)
}

pub(crate) fn set_base_version(txn: &mut dyn StorageTxn, version: u64) -> Result<()> {
    txn.set(BASE_VERSION, version.to_string().into_bytes())
}

// ---- applying operations ----

/// Apply one operation to the stored tasks, validating it against the current
/// state. Returns the operation as it should be recorded: `Update::old_value`
/// and `Delete::old_task` are replaced with what was actually there, so that
/// the recorded operation inverts exactly.
pub(crate) fn apply_op(txn: &mut dyn StorageTxn, op: &Operation) -> Result<Operation> {
    trace!("applying {op:?}");
    match op {
        Operation::Create { uuid } => {
            if get_task(txn, *uuid)?.is_some() {
                invalid!("task {uuid} already exists");
            }
            let mut task = TaskMap::new();
            task.insert("entry".into(), format_timestamp(Utc::now()));
            set_task(txn, *uuid, &task)?;
            Ok(op.clone())
        }
        Operation::Delete { uuid, .. } => {
            let Some(old_task) = get_task_doc(txn, *uuid)? else {
                invalid!("cannot delete task {uuid}: it does not exist");
            };
            remove_task(txn, *uuid)?;
            Ok(Operation::Delete {
                uuid: *uuid,
                old_task,
            })
        }
        Operation::Update {
            uuid,
            property,
            timestamp,
            value,
            ..
        } => {
            validate_property(property)?;
            let Some(mut task) = get_task_doc(txn, *uuid)? else {
                invalid!("cannot update task {uuid}: it does not exist");
            };
            let old_value = match value {
                Some(v) => task.insert(property.clone(), v.clone()),
                None => task.remove(property),
            };
            set_task(txn, *uuid, &task)?;
            Ok(Operation::Update {
                uuid: *uuid,
                property: property.clone(),
                timestamp: *timestamp,
                old_value,
                value: value.clone(),
            })
        }
        Operation::UndoPoint => Ok(Operation::UndoPoint),
    }
}

/// Reject values the task model cannot hold: a status outside the known set,
/// or a date property that is not epoch seconds. Checked for local commits
/// only; undo and sync restore values that are already stored.
fn validate_value(op: &Operation) -> Result<()> {
    let Operation::Update {
        property,
        value: Some(value),
        ..
    } = op
    else {
        return Ok(());
    };
    if property == "status" {
        Status::parse(value)?;
    } else if DATE_PROPERTIES.contains(&property.as_str()) {
        parse_timestamp(value)?;
    }
    Ok(())
}

// ---- working set ----

/// Working set entries as `(index, uuid)`, in index order.
pub(crate) fn working_set(txn: &mut dyn StorageTxn) -> Result<Vec<(usize, Uuid)>> {
    txn.scan(WORKING_SET)?
        .into_iter()
        .map(|(k, v)| {
            let index = parse_numbered_key(WORKING_SET, &k)? as usize;
            let uuid = std::str::from_utf8(&v)
                .ok()
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| Error::Storage(format!("malformed working set entry {index}")))?;
            Ok((index, uuid))
        })
        .collect()
}

fn set_working_set(txn: &mut dyn StorageTxn, entries: &[(usize, Uuid)]) -> Result<()> {
    for (k, _) in txn.scan(WORKING_SET)? {
        txn.delete(&k)?;
    }
    for (index, uuid) in entries {
        txn.set(
            &numbered_key(WORKING_SET, *index as u64),
            uuid.to_string().into_bytes(),
        )?;
    }
    Ok(())
}

/// Smallest indices >= 1 not in `used`, `count` of them.
fn free_indices(used: &HashSet<usize>, count: usize) -> Vec<usize> {
    (1..).filter(|i| !used.contains(i)).take(count).collect()
}

/// Add `uuid` to the working set at the smallest unused index, unless it is
/// already there. Returns its index.
pub(crate) fn add_to_working_set(txn: &mut dyn StorageTxn, uuid: Uuid) -> Result<usize> {
    let entries = working_set(txn)?;
    if let Some((index, _)) = entries.iter().find(|(_, u)| *u == uuid) {
        return Ok(*index);
    }
    let used: HashSet<usize> = entries.iter().map(|(i, _)| *i).collect();
    let index = free_indices(&used, 1)[0];
    txn.set(
        &numbered_key(WORKING_SET, index as u64),
        uuid.to_string().into_bytes(),
    )?;
    Ok(index)
}

/// Ordering for tasks newly entering the working set: by entry time, then UUID.
fn entry_order(task: &TaskMap) -> i64 {
    task.get("entry")
        .and_then(|e| e.parse().ok())
        .unwrap_or(i64::MAX)
}

pub(crate) fn rebuild_working_set<F>(
    txn: &mut dyn StorageTxn,
    in_working_set: F,
    renumber: bool,
) -> Result<()>
where
    F: Fn(&TaskMap) -> bool,
{
    let old = working_set(txn)?;
    let mut members: Vec<(i64, Uuid)> = all_tasks(txn)?
        .into_iter()
        .filter(|(_, t)| in_working_set(t))
        .map(|(u, t)| (entry_order(&t), u))
        .collect();
    let member_set: HashSet<Uuid> = members.iter().map(|(_, u)| *u).collect();

    let kept: Vec<(usize, Uuid)> = old
        .into_iter()
        .filter(|(_, u)| member_set.contains(u))
        .collect();
    let kept_uuids: HashSet<Uuid> = kept.iter().map(|(_, u)| *u).collect();
    members.retain(|(_, u)| !kept_uuids.contains(u));
    members.sort();
    let new_members: Vec<Uuid> = members.into_iter().map(|(_, u)| u).collect();

    let entries: Vec<(usize, Uuid)> = if renumber {
        kept.iter()
            .map(|(_, u)| *u)
            .chain(new_members)
            .enumerate()
            .map(|(i, u)| (i + 1, u))
            .collect()
    } else {
        let used: HashSet<usize> = kept.iter().map(|(i, _)| *i).collect();
        let mut entries = kept;
        entries.extend(free_indices(&used, new_members.len()).into_iter().zip(new_members));
        entries
    };
    debug!(
        "rebuilt working set with {} tasks (renumber: {renumber})",
        entries.len()
    );
    set_working_set(txn, &entries)
}

/// Owner of a [`Storage`] backend, exposing the task database operations.
pub struct TaskDb {
    storage: Box<dyn Storage>,
}

impl TaskDb {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self { storage }
    }

    pub(crate) fn txn(&mut self) -> Result<Box<dyn StorageTxn + '_>> {
        self.storage.txn()
    }

    pub fn get_task(&mut self, uuid: Uuid) -> Result<Option<TaskMap>> {
        get_task(self.txn()?.as_mut(), uuid)
    }

    pub fn all_tasks(&mut self) -> Result<Vec<(Uuid, TaskMap)>> {
        all_tasks(self.txn()?.as_mut())
    }

    pub fn all_task_uuids(&mut self) -> Result<Vec<Uuid>> {
        Ok(self.all_tasks()?.into_iter().map(|(u, _)| u).collect())
    }

    /// Apply a batch atomically. Either every operation applies and the batch
    /// is recorded in the local, undo, and history logs, or nothing changes.
    /// `add_to_working_set` selects applied operations whose task should join
    /// the working set.
    pub fn commit_operations<F>(&mut self, ops: Operations, add_to_working_set: F) -> Result<()>
    where
        F: Fn(&Operation) -> bool,
    {
        if ops.is_empty() {
            return Ok(());
        }
        let mut txn = self.txn()?;
        let txn = txn.as_mut();
        for op in ops.iter() {
            validate_value(op)?;
            let recorded = apply_op(txn, op)?;
            if add_to_working_set(&recorded) {
                if let Some(uuid) = recorded.uuid() {
                    self::add_to_working_set(txn, uuid)?;
                }
            }
            append_log(txn, LOCAL_OPS, &recorded)?;
            append_log(txn, UNDO_LOG, &recorded)?;
            if !recorded.is_undo_point() {
                append_log(txn, HISTORY, &recorded)?;
            }
        }
        txn.commit()?;
        debug!("committed {} operations", ops.len());
        Ok(())
    }

    /// The tail of the undo log back to (and including) the most recent undo
    /// point, or the whole log if it has none. In chronological order.
    fn undo_tail(txn: &mut dyn StorageTxn) -> Result<Vec<(Vec<u8>, Operation)>> {
        let mut log = read_log(txn, UNDO_LOG)?;
        let start = log.iter().rposition(|(_, op)| op.is_undo_point()).unwrap_or(0);
        Ok(log.split_off(start))
    }

    /// The operations the next undo would revert, without applying anything.
    pub fn undo_operations(&mut self) -> Result<Operations> {
        let tail = Self::undo_tail(self.txn()?.as_mut())?;
        Ok(tail.into_iter().map(|(_, op)| op).collect())
    }

    /// Revert `ops`, which must be exactly what [`TaskDb::undo_operations`]
    /// currently returns. Returns false, changing nothing, if `ops` is empty
    /// or no longer matches the end of the undo log.
    pub fn commit_reversed_operations(&mut self, ops: Operations) -> Result<bool> {
        if ops.is_empty() {
            return Ok(false);
        }
        let mut txn = self.txn()?;
        let txn = txn.as_mut();
        let tail = Self::undo_tail(txn)?;
        if tail.len() != ops.len() || tail.iter().zip(ops.iter()).any(|((_, a), b)| a != b) {
            debug!("undo operations are stale; not reverting");
            return Ok(false);
        }
        for op in ops.reversed().iter() {
            if op.is_undo_point() {
                continue;
            }
            let recorded = apply_op(txn, op)?;
            append_log(txn, LOCAL_OPS, &recorded)?;
            append_log(txn, HISTORY, &recorded)?;
        }
        for (k, _) in &tail {
            txn.delete(k)?;
        }
        txn.commit()?;
        debug!("reverted {} operations", tail.len());
        Ok(true)
    }

    /// Every recorded operation that touched `uuid`, oldest first.
    pub fn task_operations(&mut self, uuid: Uuid) -> Result<Operations> {
        let history = read_log(self.txn()?.as_mut(), HISTORY)?;
        Ok(history
            .into_iter()
            .map(|(_, op)| op)
            .filter(|op| op.uuid() == Some(uuid))
            .collect())
    }

    /// Unsynced local operations, not counting undo points.
    pub fn num_operations(&mut self) -> Result<usize> {
        let ops = read_log(self.txn()?.as_mut(), LOCAL_OPS)?;
        Ok(ops.iter().filter(|(_, op)| !op.is_undo_point()).count())
    }

    pub fn num_undo_points(&mut self) -> Result<usize> {
        let ops = read_log(self.txn()?.as_mut(), UNDO_LOG)?;
        Ok(ops.iter().filter(|(_, op)| op.is_undo_point()).count())
    }

    #[cfg(test)]
    pub fn base_version(&mut self) -> Result<u64> {
        base_version(self.txn()?.as_mut())
    }

    pub fn working_set(&mut self) -> Result<Vec<(usize, Uuid)>> {
        working_set(self.txn()?.as_mut())
    }

    pub fn rebuild_working_set<F>(&mut self, in_working_set: F, renumber: bool) -> Result<()>
    where
        F: Fn(&TaskMap) -> bool,
    {
        let mut txn = self.txn()?;
        rebuild_working_set(txn.as_mut(), in_working_set, renumber)?;
        txn.commit()
    }
}
