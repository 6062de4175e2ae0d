//! Reconciling local changes with a server's shared history.
//!
//! An attempt runs inside one local storage transaction:
//!
//! 1. fetch operations since the local version cursor (reseeding from a
//!    snapshot if the server has compacted past it),
//! 2. revert the unsynced local operations,
//! 3. apply the remote operations,
//! 4. reapply the local operations on top, rebasing them,
//! 5. submit the rebased operations against the fetched version.
//!
//! The transaction commits only after the server accepts the submission, so a
//! failed or conflicting attempt leaves local state untouched.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::operation::Operation;
use crate::server::{FetchResult, Server, Snapshot, SubmitResult};
use crate::storage::StorageTxn;
use crate::taskdb::{self, TaskDb, HISTORY, LOCAL_OPS, UNDO_LOG};

/// Attempts before a persistently moving server version becomes an error.
pub const MAX_ATTEMPTS: usize = 10;

pub(crate) fn sync(db: &mut TaskDb, server: &mut dyn Server, avoid_snapshots: bool) -> Result<()> {
    let mut last_conflict = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match sync_once(db, server, avoid_snapshots) {
            Ok(()) => return Ok(()),
            Err(Error::VersionConflict { expected, actual }) => {
                debug!("sync attempt {attempt}: server moved from {expected} to {actual}; retrying");
                last_conflict = Some((expected, actual));
            }
            Err(e) => return Err(e),
        }
    }
    let detail = last_conflict
        .map(|(e, a)| format!(" (last based on {e}, server at {a})"))
        .unwrap_or_default();
    Err(Error::Sync(format!(
        "server version kept changing; gave up after {MAX_ATTEMPTS} attempts{detail}"
    )))
}

/// Fetch the remote operations after `base`, reseeding from the server's
/// snapshot if they are no longer available.
fn fetch(server: &mut dyn Server, base: u64) -> Result<(Vec<Operation>, u64, Option<Snapshot>)> {
    match server.get_operations_since(base)? {
        FetchResult::Operations {
            operations,
            version,
        } => Ok((operations, version, None)),
        FetchResult::Gap { earliest } => {
            let Some(snapshot) = server.get_snapshot()? else {
                return Err(Error::Sync(format!(
                    "server history starts at version {earliest} but this replica is at {base} \
                     and the server has no snapshot"
                )));
            };
            info!(
                "replica at version {base} is behind the server history; reseeding from snapshot at {}",
                snapshot.version
            );
            match server.get_operations_since(snapshot.version)? {
                FetchResult::Operations {
                    operations,
                    version,
                } => Ok((operations, version, Some(snapshot))),
                FetchResult::Gap { earliest } => Err(Error::Sync(format!(
                    "server snapshot at version {} predates its history (starting at {earliest})",
                    snapshot.version
                ))),
            }
        }
    }
}

fn sync_once(db: &mut TaskDb, server: &mut dyn Server, avoid_snapshots: bool) -> Result<()> {
    let mut txn = db.txn()?;
    let txn = txn.as_mut();

    let base = taskdb::base_version(txn)?;
    let local: Vec<Operation> = taskdb::read_log(txn, LOCAL_OPS)?
        .into_iter()
        .map(|(_, op)| op)
        .filter(|op| !op.is_undo_point())
        .collect();

    let (remote, server_version, reseed) = fetch(server, base)?;
    debug!(
        "sync: {} local operations, {} remote operations (version {base} -> {server_version})",
        local.len(),
        remote.len()
    );

    match &reseed {
        Some(snapshot) => taskdb::replace_all_tasks(txn, &snapshot.tasks)?,
        None => revert(txn, &local)?,
    }

    let latest = apply_remote(txn, &remote)?;
    let rebased = reapply_local(txn, local, &latest)?;

    let (version, snapshot) = if rebased.is_empty() {
        (server_version, None)
    } else {
        match server.submit_operations(&rebased, server_version)? {
            SubmitResult::Conflict { version } => {
                txn.rollback()?;
                return Err(Error::VersionConflict {
                    expected: server_version,
                    actual: version,
                });
            }
            SubmitResult::Accepted {
                version,
                snapshot_urgent,
            } => {
                // taken before commit so it reflects exactly `version`
                let snapshot = if snapshot_urgent && !avoid_snapshots {
                    let tasks = taskdb::all_tasks(txn)?.into_iter().collect();
                    Some(Snapshot { version, tasks })
                } else {
                    None
                };
                (version, snapshot)
            }
        }
    };
    finish(txn, version)?;
    info!(
        "synced: sent {}, received {}, now at version {version}",
        rebased.len(),
        remote.len()
    );
    if let Some(snapshot) = snapshot {
        put_snapshot(server, snapshot);
    }
    Ok(())
}

/// Advance the cursor, drop the synced local operations and the undo log,
/// and commit.
fn finish(txn: &mut dyn StorageTxn, version: u64) -> Result<()> {
    taskdb::set_base_version(txn, version)?;
    taskdb::clear_log(txn, LOCAL_OPS)?;
    taskdb::clear_log(txn, UNDO_LOG)?;
    txn.commit()
}

fn put_snapshot(server: &mut dyn Server, snapshot: Snapshot) {
    let version = snapshot.version;
    match server.put_snapshot(&snapshot) {
        Ok(()) => debug!("uploaded snapshot at version {version}"),
        Err(e) => warn!("failed to upload snapshot at version {version}: {e}"),
    }
}

/// Undo the unsynced local operations, newest first.
fn revert(txn: &mut dyn StorageTxn, local: &[Operation]) -> Result<()> {
    let now = Utc::now();
    for op in local.iter().rev() {
        for inverse in op.inverse(now) {
            taskdb::apply_op(txn, &inverse)?;
        }
    }
    Ok(())
}

/// Apply remote operations, skipping any that do not apply to the local
/// state. Returns the latest remote update timestamp per (task, property).
fn apply_remote(
    txn: &mut dyn StorageTxn,
    remote: &[Operation],
) -> Result<HashMap<(Uuid, String), DateTime<Utc>>> {
    let mut latest: HashMap<(Uuid, String), DateTime<Utc>> = HashMap::new();
    for op in remote {
        if op.is_undo_point() {
            continue;
        }
        if let Err(e) = taskdb::apply_op(txn, op) {
            warn!("skipping remote operation {op:?}: {e}");
            continue;
        }
        taskdb::append_log(txn, HISTORY, op)?;
        if let Operation::Update {
            uuid,
            property,
            timestamp,
            ..
        } = op
        {
            let entry = latest.entry((*uuid, property.clone())).or_insert(*timestamp);
            if *timestamp > *entry {
                *entry = *timestamp;
            }
        }
    }
    Ok(latest)
}

/// Replay local operations after the remote ones, returning what to submit.
///
/// A create of a task that now exists is dropped, as are updates and deletes
/// of tasks that no longer exist. An update of a property that a remote
/// update with a later (or equal) timestamp also changed loses: it is still
/// submitted, but carrying the live value, so it changes nothing on replay.
fn reapply_local(
    txn: &mut dyn StorageTxn,
    local: Vec<Operation>,
    latest: &HashMap<(Uuid, String), DateTime<Utc>>,
) -> Result<Vec<Operation>> {
    let mut rebased = Vec::with_capacity(local.len());
    for op in local {
        match &op {
            Operation::UndoPoint => continue,
            Operation::Create { uuid } => {
                if taskdb::get_task(txn, *uuid)?.is_some() {
                    debug!("dropping create of {uuid}: it already exists");
                    continue;
                }
            }
            Operation::Delete { uuid, .. } => {
                if taskdb::get_task_doc(txn, *uuid)?.is_none() {
                    debug!("dropping delete of {uuid}: it is already gone");
                    continue;
                }
            }
            Operation::Update {
                uuid,
                property,
                timestamp,
                ..
            } => {
                let Some(task) = taskdb::get_task_doc(txn, *uuid)? else {
                    debug!("dropping update of {uuid}: the task is gone");
                    continue;
                };
                let lost = latest
                    .get(&(*uuid, property.clone()))
                    .is_some_and(|remote_ts| remote_ts >= timestamp);
                if lost {
                    let live = task.get(property).cloned();
                    debug!("local update of {uuid}.{property} lost to a later remote update");
                    rebased.push(Operation::Update {
                        uuid: *uuid,
                        property: property.clone(),
                        timestamp: *timestamp,
                        old_value: live.clone(),
                        value: live,
                    });
                    continue;
                }
            }
        }
        rebased.push(taskdb::apply_op(txn, &op)?);
    }
    Ok(rebased)
}
