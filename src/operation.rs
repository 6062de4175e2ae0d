use std::ops::Index;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::TaskMap;

/// A single reversible change to the task database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Create a new task.
    Create { uuid: Uuid },
    /// Remove a task. `old_task` is its full property map at the time of
    /// deletion, which makes the operation reversible.
    Delete { uuid: Uuid, old_task: TaskMap },
    /// Set (`value: Some`) or clear (`value: None`) one property of a task.
    /// `old_value` is the value being replaced.
    Update {
        uuid: Uuid,
        property: String,
        timestamp: DateTime<Utc>,
        old_value: Option<String>,
        value: Option<String>,
    },
    /// A user-visible checkpoint for undo.
    UndoPoint,
}

impl Operation {
    pub fn uuid(&self) -> Option<Uuid> {
        match self {
            Self::Create { uuid } | Self::Delete { uuid, .. } | Self::Update { uuid, .. } => {
                Some(*uuid)
            }
            Self::UndoPoint => None,
        }
    }

    pub fn is_undo_point(&self) -> bool {
        matches!(self, Self::UndoPoint)
    }

    /// The operations that reverse this one, in application order.
    ///
    /// Reversing a `Delete` recreates the task and restores every property of
    /// the snapshot; `timestamp` stamps those restoring updates.
    pub fn inverse(&self, timestamp: DateTime<Utc>) -> Vec<Operation> {
        match self {
            Self::Create { uuid } => vec![Self::Delete {
                uuid: *uuid,
                old_task: TaskMap::new(),
            }],
            Self::Delete { uuid, old_task } => {
                let mut ops = vec![Self::Create { uuid: *uuid }];
                let mut props: Vec<_> = old_task.iter().collect();
                props.sort();
                for (property, value) in props {
                    ops.push(Self::Update {
                        uuid: *uuid,
                        property: property.clone(),
                        timestamp,
                        old_value: None,
                        value: Some(value.clone()),
                    });
                }
                // creation stamps `entry`; drop it if the snapshot had none
                if !old_task.contains_key("entry") {
                    ops.push(Self::Update {
                        uuid: *uuid,
                        property: "entry".into(),
                        timestamp,
                        old_value: None,
                        value: None,
                    });
                }
                ops
            }
            Self::Update {
                uuid,
                property,
                timestamp,
                old_value,
                value,
            } => vec![Self::Update {
                uuid: *uuid,
                property: property.clone(),
                timestamp: *timestamp,
                old_value: value.clone(),
                value: old_value.clone(),
            }],
            Self::UndoPoint => vec![Self::UndoPoint],
        }
    }
}

/// An ordered batch of operations, applied and committed as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operations(Vec<Operation>);

impl Operations {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch that begins with an undo point.
    pub fn new_with_undo_point() -> Self {
        Self(vec![Operation::UndoPoint])
    }

    pub fn push(&mut self, op: Operation) {
        self.0.push(op);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Operation> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.0.iter()
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// A batch that undoes this one: operations in reverse order, each
    /// replaced by its inverse.
    pub fn reversed(&self) -> Operations {
        let now = Utc::now();
        self.0.iter().rev().flat_map(|op| op.inverse(now)).collect()
    }

    pub fn as_slice(&self) -> &[Operation] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<Operation> {
        self.0
    }
}

impl Index<usize> for Operations {
    type Output = Operation;

    fn index(&self, index: usize) -> &Operation {
        &self.0[index]
    }
}

impl From<Vec<Operation>> for Operations {
    fn from(ops: Vec<Operation>) -> Self {
        Self(ops)
    }
}

impl FromIterator<Operation> for Operations {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Operation> for Operations {
    fn extend<I: IntoIterator<Item = Operation>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Operations {
    type Item = Operation;
    type IntoIter = std::vec::IntoIter<Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Operations {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn u() -> Uuid {
        Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap()
    }

    fn update(prop: &str, old: Option<&str>, new: Option<&str>, ts: DateTime<Utc>) -> Operation {
        Operation::Update {
            uuid: u(),
            property: prop.into(),
            timestamp: ts,
            old_value: old.map(Into::into),
            value: new.map(Into::into),
        }
    }

    #[test]
    fn update_inverse_swaps_values() {
        let ts = Utc::now();
        let op = update("description", Some("old"), Some("new"), ts);
        assert_eq!(
            op.inverse(ts),
            vec![update("description", Some("new"), Some("old"), ts)]
        );
    }

    #[test]
    fn create_and_delete_invert() {
        let ts = Utc::now();
        let create = Operation::Create { uuid: u() };
        assert!(matches!(create.inverse(ts)[..], [Operation::Delete { .. }]));

        let mut old_task = TaskMap::new();
        old_task.insert("entry".into(), "100".into());
        old_task.insert("status".into(), "pending".into());
        let delete = Operation::Delete {
            uuid: u(),
            old_task,
        };
        assert_eq!(
            delete.inverse(ts),
            vec![
                Operation::Create { uuid: u() },
                update("entry", None, Some("100"), ts),
                update("status", None, Some("pending"), ts),
            ]
        );
    }

    #[test]
    fn delete_without_entry_clears_entry_on_inverse() {
        let ts = Utc::now();
        let mut old_task = TaskMap::new();
        old_task.insert("status".into(), "pending".into());
        let inv = Operation::Delete {
            uuid: u(),
            old_task,
        }
        .inverse(ts);
        assert_eq!(inv.last(), Some(&update("entry", None, None, ts)));
    }

    #[test]
    fn delete_of_empty_document_recreates_it_empty() {
        let ts = Utc::now();
        let inv = Operation::Delete {
            uuid: u(),
            old_task: TaskMap::new(),
        }
        .inverse(ts);
        assert_eq!(
            inv,
            vec![
                Operation::Create { uuid: u() },
                update("entry", None, None, ts)
            ]
        );
    }

    #[test]
    fn reversed_batch() {
        let ts = Utc::now();
        let ops: Operations = vec![
            Operation::Create { uuid: u() },
            Operation::UndoPoint,
            update("x", None, Some("1"), ts),
        ]
        .into();
        let rev = ops.reversed();
        assert_eq!(rev.len(), 3);
        assert_eq!(rev[0], update("x", Some("1"), None, ts));
        assert_eq!(rev[1], Operation::UndoPoint);
        assert!(matches!(rev[2], Operation::Delete { .. }));
    }

    #[test]
    fn batch_accessors() {
        let mut ops = Operations::new_with_undo_point();
        ops.push(Operation::Create { uuid: u() });
        assert_eq!(ops.len(), 2);
        assert_eq!(ops.get(1).and_then(Operation::uuid), Some(u()));
        assert!(ops.get(2).is_none());
        ops.truncate(1);
        assert_eq!(ops.iter().filter(|op| op.is_undo_point()).count(), 1);
        ops.clear();
        assert!(ops.is_empty());
    }

    #[test]
    fn serializes_for_the_wire() {
        let op = update("due", None, Some("1700000000"), Utc::now());
        let json = serde_json::to_string(&op).unwrap();
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }
}
