use std::collections::{BTreeSet, HashMap, HashSet};

use log::trace;
use uuid::Uuid;

use crate::model::{Status, TaskMap};

/// Dependency edges between tasks, derived from their `depends` properties.
///
/// The map is a read-only index built from a full scan of the task set; it is
/// never mutated directly. Unknown UUIDs yield empty sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyMap {
    dependencies: HashMap<Uuid, BTreeSet<Uuid>>,
    dependents: HashMap<Uuid, BTreeSet<Uuid>>,
    /// Pending or recurring tasks at build time.
    active: HashSet<Uuid>,
}

/// Parse a comma-joined `depends` value. Entries that are not UUIDs are
/// skipped.
pub(crate) fn parse_depends(value: &str) -> BTreeSet<Uuid> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match Uuid::parse_str(s) {
            Ok(u) => Some(u),
            Err(_) => {
                trace!("ignoring malformed dependency '{s}'");
                None
            }
        })
        .collect()
}

pub(crate) fn format_depends(deps: &BTreeSet<Uuid>) -> String {
    deps.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl DependencyMap {
    pub(crate) fn build<'a>(tasks: impl IntoIterator<Item = (&'a Uuid, &'a TaskMap)>) -> Self {
        let mut map = Self::default();
        for (uuid, task) in tasks {
            if Status::of(task).is_active_member() {
                map.active.insert(*uuid);
            }
            let Some(depends) = task.get("depends") else {
                continue;
            };
            let deps = parse_depends(depends);
            for dep in &deps {
                map.dependents.entry(*dep).or_default().insert(*uuid);
            }
            if !deps.is_empty() {
                map.dependencies.insert(*uuid, deps);
            }
        }
        map
    }

    /// Tasks that `uuid` depends on.
    pub fn dependencies(&self, uuid: Uuid) -> BTreeSet<Uuid> {
        self.dependencies.get(&uuid).cloned().unwrap_or_default()
    }

    /// Tasks that depend on `uuid`.
    pub fn dependents(&self, uuid: Uuid) -> BTreeSet<Uuid> {
        self.dependents.get(&uuid).cloned().unwrap_or_default()
    }

    pub fn has_dependency(&self, uuid: Uuid) -> bool {
        self.dependencies.contains_key(&uuid)
    }

    /// True if pending task `uuid` depends on a task that is still pending.
    pub fn is_blocked(&self, uuid: Uuid) -> bool {
        self.active.contains(&uuid)
            && self
                .dependencies
                .get(&uuid)
                .is_some_and(|deps| deps.iter().any(|d| self.active.contains(d)))
    }

    /// True if pending task `uuid` has a pending task depending on it.
    pub fn is_blocking(&self, uuid: Uuid) -> bool {
        self.active.contains(&uuid)
            && self
                .dependents
                .get(&uuid)
                .is_some_and(|deps| deps.iter().any(|d| self.active.contains(d)))
    }
}
