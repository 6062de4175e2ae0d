use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{Duration, Utc};
use log::{debug, info};
use uuid::Uuid;

use crate::config::ReplicaConfig;
use crate::depmap::DependencyMap;
use crate::errors::{Error, Result};
use crate::model::{Status, TaskMap};
use crate::operation::{Operation, Operations};
use crate::paths;
use crate::server::{Server, ServerConfig};
use crate::storage::{AccessMode, InMemoryStorage, Storage, StorageConfig};
use crate::task::Task;
use crate::taskdb::TaskDb;
use crate::validate::{format_timestamp, parse_timestamp};
use crate::workingset::WorkingSet;

/// One replica of the task database: storage plus the derived working set
/// and dependency map.
///
/// A replica is not internally synchronized. Use one per thread, or wrap it
/// in a mutex.
pub struct Replica {
    taskdb: TaskDb,
    config: ReplicaConfig,
    /// Dropped whenever a commit may have changed the task set.
    depmap: Option<Rc<DependencyMap>>,
}

fn in_working_set(task: &TaskMap) -> bool {
    Status::of(task).is_active_member()
}

/// A status update that moves a task into the working set.
fn enters_working_set(op: &Operation) -> bool {
    let Operation::Update {
        property,
        old_value,
        value,
        ..
    } = op
    else {
        return false;
    };
    let active = |v: &Option<String>| {
        v.as_deref()
            .is_some_and(|s| Status::from_taskmap(s).is_active_member())
    };
    property == "status" && active(value) && !active(old_value)
}

impl Replica {
    pub fn new(storage: Box<dyn Storage>) -> Self {
        Self::with_config(storage, ReplicaConfig::default())
    }

    pub fn with_config(storage: Box<dyn Storage>, config: ReplicaConfig) -> Self {
        Self {
            taskdb: TaskDb::new(storage),
            config,
            depmap: None,
        }
    }

    /// A volatile replica, for tests and scratch work.
    pub fn open_in_memory() -> Self {
        Self::new(Box::new(InMemoryStorage::new()))
    }

    /// Open the replica stored in `path`. Fails with a storage error if the
    /// directory does not exist and `create_if_missing` is false.
    pub fn open_on_disk(
        path: impl AsRef<Path>,
        create_if_missing: bool,
        access_mode: AccessMode,
    ) -> Result<Self> {
        let storage = StorageConfig::OnDisk {
            taskdb_dir: path.as_ref().to_path_buf(),
            create_if_missing,
            access_mode,
        }
        .into_storage()?;
        Ok(Self::new(storage))
    }

    /// Open (creating if needed) the replica in the default data directory,
    /// configured from its `config.toml`.
    pub fn open_default() -> Result<Self> {
        let config = ReplicaConfig::load()?;
        let storage = StorageConfig::OnDisk {
            taskdb_dir: paths::taskdb_dir(),
            create_if_missing: true,
            access_mode: AccessMode::ReadWrite,
        }
        .into_storage()?;
        Ok(Self::with_config(storage, config))
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    // ---- tasks ----

    /// Add a `Create` (and its `entry` time) to `ops` and return a handle to
    /// the new task. Nothing is stored until `ops` is committed.
    pub fn create_task(&mut self, uuid: Uuid, ops: &mut Operations) -> Result<Task> {
        let entry = format_timestamp(Utc::now());
        ops.push(Operation::Create { uuid });
        ops.push(Operation::Update {
            uuid,
            property: "entry".into(),
            timestamp: Utc::now(),
            old_value: None,
            value: Some(entry.clone()),
        });
        let mut data = TaskMap::new();
        data.insert("entry".into(), entry);
        Ok(Task::new(uuid, data))
    }

    /// Create, describe, and commit a task in one step, as its own undo unit.
    pub fn new_task(&mut self, status: Status, description: &str) -> Result<Task> {
        let mut ops = Operations::new_with_undo_point();
        let mut task = self.create_task(Uuid::new_v4(), &mut ops)?;
        task.set_description(description, &mut ops)?;
        task.set_status(status, &mut ops)?;
        self.commit_operations(ops)?;
        Ok(task)
    }

    /// Purge a task. Returns false if there was no such task.
    pub fn delete_task(&mut self, uuid: Uuid) -> Result<bool> {
        let Some(task) = self.task(uuid)? else {
            return Ok(false);
        };
        let mut ops = Operations::new_with_undo_point();
        task.delete(&mut ops);
        self.commit_operations(ops)?;
        Ok(true)
    }

    pub fn task(&mut self, uuid: Uuid) -> Result<Option<Task>> {
        Ok(self.taskdb.get_task(uuid)?.map(|data| Task::new(uuid, data)))
    }

    pub fn task_data(&mut self, uuid: Uuid) -> Result<Option<TaskMap>> {
        self.taskdb.get_task(uuid)
    }

    pub fn task_uuids(&mut self) -> Result<Vec<Uuid>> {
        self.taskdb.all_task_uuids()
    }

    pub fn all_tasks(&mut self) -> Result<HashMap<Uuid, Task>> {
        Ok(self
            .taskdb
            .all_tasks()?
            .into_iter()
            .map(|(uuid, data)| (uuid, Task::new(uuid, data)))
            .collect())
    }

    pub fn all_task_data(&mut self) -> Result<HashMap<Uuid, TaskMap>> {
        Ok(self.taskdb.all_tasks()?.into_iter().collect())
    }

    /// Tasks with status pending, oldest entry first.
    pub fn pending_tasks(&mut self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .taskdb
            .all_tasks()?
            .into_iter()
            .map(|(uuid, data)| Task::new(uuid, data))
            .filter(Task::is_pending)
            .collect();
        tasks.sort_by_key(|t| (t.entry(), t.uuid()));
        Ok(tasks)
    }

    // ---- operations and undo ----

    /// Apply and record `ops` as one atomic batch. This is the only way
    /// changes become durable.
    pub fn commit_operations(&mut self, ops: Operations) -> Result<()> {
        self.depmap = None;
        self.taskdb.commit_operations(ops, enters_working_set)
    }

    pub fn num_local_operations(&mut self) -> Result<usize> {
        self.taskdb.num_operations()
    }

    pub fn num_undo_points(&mut self) -> Result<usize> {
        self.taskdb.num_undo_points()
    }

    /// The operations [`Replica::undo`] would revert, oldest first.
    pub fn undo_operations(&mut self) -> Result<Operations> {
        self.taskdb.undo_operations()
    }

    /// Revert `ops`, as returned by [`Replica::undo_operations`]. Returns
    /// false without changing anything if `ops` is empty or out of date.
    pub fn commit_reversed_operations(&mut self, ops: Operations) -> Result<bool> {
        self.depmap = None;
        self.taskdb.commit_reversed_operations(ops)
    }

    /// Revert everything back to the most recent undo point. Returns false if
    /// there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool> {
        let ops = self.undo_operations()?;
        self.commit_reversed_operations(ops)
    }

    /// Every recorded operation on `uuid`, oldest first.
    pub fn task_operations(&mut self, uuid: Uuid) -> Result<Operations> {
        self.taskdb.task_operations(uuid)
    }

    // ---- derived views ----

    pub fn working_set(&mut self) -> Result<WorkingSet> {
        Ok(WorkingSet::new(self.taskdb.working_set()?))
    }

    /// Recompute working set membership (pending and recurring tasks). With
    /// `renumber`, indices are compacted to 1..N.
    pub fn rebuild_working_set(&mut self, renumber: bool) -> Result<()> {
        self.taskdb.rebuild_working_set(in_working_set, renumber)
    }

    /// The dependency map, rebuilt if `force` is set or the task set may have
    /// changed since it was last built.
    pub fn dependency_map(&mut self, force: bool) -> Result<Rc<DependencyMap>> {
        if force || self.depmap.is_none() {
            let tasks = self.taskdb.all_tasks()?;
            debug!("building dependency map over {} tasks", tasks.len());
            let map = DependencyMap::build(tasks.iter().map(|(u, t)| (u, t)));
            self.depmap = Some(Rc::new(map));
        }
        self.depmap
            .clone()
            .ok_or_else(|| Error::Storage("dependency map unavailable".into()))
    }

    // ---- maintenance ----

    /// Purge deleted tasks not modified within `expire_after_days`. Returns
    /// the number purged.
    pub fn expire_tasks(&mut self) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(self.config.expire_after_days));
        let mut ops = Operations::new_with_undo_point();
        for (uuid, data) in self.taskdb.all_tasks()? {
            let task = Task::new(uuid, data);
            if !task.is_deleted() {
                continue;
            }
            let modified = task
                .get_value("modified")
                .and_then(|m| parse_timestamp(m).ok());
            if modified.is_some_and(|m| m < cutoff) {
                task.delete(&mut ops);
            }
        }
        let expired = ops.len() - 1;
        if expired > 0 {
            self.commit_operations(ops)?;
            info!("expired {expired} deleted tasks");
        }
        Ok(expired)
    }

    // ---- sync ----

    /// Sync with `server`, then refresh the working set without renumbering.
    pub fn sync(&mut self, server: &mut dyn Server, avoid_snapshots: bool) -> Result<()> {
        self.depmap = None;
        crate::sync::sync(&mut self.taskdb, server, avoid_snapshots)?;
        self.rebuild_working_set(false)
    }

    pub fn sync_with(&mut self, config: ServerConfig, avoid_snapshots: bool) -> Result<()> {
        let mut server = config.into_server()?;
        self.sync(server.as_mut(), avoid_snapshots)
    }

    /// Sync against a server kept in another local directory.
    pub fn sync_to_local(
        &mut self,
        server_dir: impl Into<PathBuf>,
        avoid_snapshots: bool,
    ) -> Result<()> {
        self.sync_with(ServerConfig::local(server_dir), avoid_snapshots)
    }

    /// Sync against an HTTP sync server.
    pub fn sync_to_remote(
        &mut self,
        url: &str,
        client_id: Uuid,
        encryption_secret: &str,
        avoid_snapshots: bool,
    ) -> Result<()> {
        let config = ServerConfig::Remote {
            url: url.to_string(),
            client_id: client_id.to_string(),
            encryption_secret: encryption_secret.to_string(),
        };
        self.sync_with(config, avoid_snapshots)
    }

    /// Sync against the server named in this replica's config.
    pub fn sync_configured(&mut self) -> Result<()> {
        let Some(server) = self.config.sync.clone() else {
            return Err(Error::Config("no sync server configured".into()));
        };
        let avoid = self.config.avoid_snapshots;
        self.sync_with(server, avoid)
    }
}
