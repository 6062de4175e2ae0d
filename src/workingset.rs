use std::collections::HashMap;

use uuid::Uuid;

/// A point-in-time copy of the working set: small positive indices mapped to
/// task UUIDs. Index 0 is never assigned. Gaps are possible until the set is
/// rebuilt with renumbering.
///
/// This holds UUIDs only; resolving an index to a task is a lookup on the
/// replica.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSet {
    by_index: Vec<Option<Uuid>>,
    by_uuid: HashMap<Uuid, usize>,
}

impl WorkingSet {
    pub(crate) fn new(entries: Vec<(usize, Uuid)>) -> Self {
        let largest = entries.iter().map(|(i, _)| *i).max().unwrap_or(0);
        let mut by_index = vec![None; largest + 1];
        let mut by_uuid = HashMap::new();
        for (index, uuid) in entries {
            by_index[index] = Some(uuid);
            by_uuid.insert(uuid, index);
        }
        Self { by_index, by_uuid }
    }

    /// Number of tasks in the working set.
    pub fn len(&self) -> usize {
        self.by_uuid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uuid.is_empty()
    }

    /// The highest assigned index, or 0 if the set is empty.
    pub fn largest_index(&self) -> usize {
        self.by_index.len().saturating_sub(1)
    }

    pub fn by_index(&self, index: usize) -> Option<Uuid> {
        self.by_index.get(index).copied().flatten()
    }

    pub fn by_uuid(&self, uuid: Uuid) -> Option<usize> {
        self.by_uuid.get(&uuid).copied()
    }

    /// Assigned `(index, uuid)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Uuid)> + '_ {
        self.by_index
            .iter()
            .enumerate()
            .filter_map(|(i, u)| u.map(|u| (i, u)))
    }
}
