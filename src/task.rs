//! A read view of one task, plus mutators that record their changes as
//! operations in a caller-supplied batch.
//!
//! Mutators update the handle immediately so later reads reflect them, but
//! nothing is durable until the batch is passed to
//! [`crate::Replica::commit_operations`].

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::depmap::{format_depends, parse_depends, DependencyMap};
use crate::errors::{invalid, Result};
use crate::model::{Annotation, Status, SyntheticTag, Tag, TaskMap};
use crate::operation::{Operation, Operations};
use crate::validate::{format_timestamp, parse_timestamp, validate_property};

/// Properties with a meaning of their own; everything else that is not a tag,
/// annotation, or dependency marker is a UDA.
const RESERVED: &[&str] = &[
    "description",
    "status",
    "priority",
    "entry",
    "modified",
    "start",
    "end",
    "due",
    "wait",
    "until",
    "scheduled",
    "recur",
    "mask",
    "imask",
    "parent",
    "depends",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    uuid: Uuid,
    data: TaskMap,
}

impl Task {
    pub(crate) fn new(uuid: Uuid, data: TaskMap) -> Self {
        Self { uuid, data }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn task_data(&self) -> &TaskMap {
        &self.data
    }

    pub fn into_task_data(self) -> TaskMap {
        self.data
    }

    pub fn get_value(&self, property: &str) -> Option<&str> {
        self.data.get(property).map(String::as_str)
    }

    /// Missing status reads as pending.
    pub fn status(&self) -> Status {
        Status::of(&self.data)
    }

    pub fn description(&self) -> &str {
        self.get_value("description").unwrap_or("")
    }

    pub fn priority(&self) -> &str {
        self.get_value("priority").unwrap_or("")
    }

    fn timestamp(&self, property: &str) -> Option<DateTime<Utc>> {
        self.get_value(property)
            .and_then(|v| parse_timestamp(v).ok())
    }

    pub fn entry(&self) -> Option<DateTime<Utc>> {
        self.timestamp("entry")
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.timestamp("modified")
    }

    pub fn due(&self) -> Option<DateTime<Utc>> {
        self.timestamp("due")
    }

    pub fn wait(&self) -> Option<DateTime<Utc>> {
        self.timestamp("wait")
    }

    /// When the task was started, if it is active.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.timestamp("start")
    }

    pub fn is_waiting(&self) -> bool {
        self.wait().is_some_and(|w| w > Utc::now())
    }

    pub fn is_active(&self) -> bool {
        self.data.contains_key("start")
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    pub fn is_completed(&self) -> bool {
        self.status() == Status::Completed
    }

    pub fn is_deleted(&self) -> bool {
        self.status() == Status::Deleted
    }

    pub fn is_blocked(&self, deps: &DependencyMap) -> bool {
        deps.is_blocked(self.uuid)
    }

    pub fn is_blocking(&self, deps: &DependencyMap) -> bool {
        deps.is_blocking(self.uuid)
    }

    pub fn dependencies(&self) -> Vec<Uuid> {
        self.get_value("depends")
            .map(|d| parse_depends(d).into_iter().collect())
            .unwrap_or_default()
    }

    fn user_tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.data
            .keys()
            .filter_map(|k| k.strip_prefix("tag_"))
            .filter_map(|name| name.parse::<Tag>().ok())
            .filter(Tag::is_user)
    }

    fn synthetic_tags(&self, deps: &DependencyMap) -> Vec<SyntheticTag> {
        let mut tags = Vec::new();
        match self.status() {
            Status::Pending => tags.push(SyntheticTag::Pending),
            Status::Completed => tags.push(SyntheticTag::Completed),
            Status::Deleted => tags.push(SyntheticTag::Deleted),
            Status::Recurring | Status::Unknown(_) => {}
        }
        if self.is_waiting() {
            tags.push(SyntheticTag::Waiting);
        }
        if self.is_active() {
            tags.push(SyntheticTag::Active);
        }
        if self.is_blocked(deps) {
            tags.push(SyntheticTag::Blocked);
        } else {
            tags.push(SyntheticTag::Unblocked);
        }
        if self.is_blocking(deps) {
            tags.push(SyntheticTag::Blocking);
        }
        tags
    }

    /// User tags plus the synthetic tags derived from status, wait, start,
    /// and dependencies. Sorted.
    pub fn tags(&self, deps: &DependencyMap) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .user_tags()
            .chain(self.synthetic_tags(deps).into_iter().map(Tag::Synthetic))
            .collect();
        tags.sort();
        tags
    }

    pub fn has_tag(&self, tag: &Tag, deps: &DependencyMap) -> bool {
        match tag {
            Tag::User(name) => self.data.contains_key(&format!("tag_{name}")),
            Tag::Synthetic(t) => self.synthetic_tags(deps).contains(t),
        }
    }

    /// Annotations in entry order.
    pub fn annotations(&self) -> Vec<Annotation> {
        let mut anns: Vec<Annotation> = self
            .data
            .iter()
            .filter_map(|(k, v)| {
                let entry = parse_timestamp(k.strip_prefix("annotation_")?).ok()?;
                Some(Annotation {
                    entry,
                    description: v.clone(),
                })
            })
            .collect();
        anns.sort_by_key(|a| a.entry);
        anns
    }

    /// User-defined attributes as `((namespace, key), value)`. Properties
    /// without a `.` are reported with an empty namespace.
    pub fn udas(&self) -> Vec<((&str, &str), &str)> {
        let mut udas: Vec<_> = self
            .data
            .iter()
            .filter(|(k, _)| is_uda(k))
            .map(|(k, v)| (split_uda(k), v.as_str()))
            .collect();
        udas.sort();
        udas
    }

    pub fn get_uda(&self, namespace: &str, key: &str) -> Option<&str> {
        self.get_value(&uda_property(namespace, key))
    }

    // ---- mutators ----

    /// Record an update of `property` and apply it to this handle.
    fn update(&mut self, property: &str, value: Option<String>, ops: &mut Operations) {
        let old_value = match &value {
            Some(v) => self.data.insert(property.to_string(), v.clone()),
            None => self.data.remove(property),
        };
        ops.push(Operation::Update {
            uuid: self.uuid,
            property: property.to_string(),
            timestamp: Utc::now(),
            old_value,
            value,
        });
    }

    /// Stamp `modified` with the current time.
    fn touch(&mut self, ops: &mut Operations) {
        self.update("modified", Some(format_timestamp(Utc::now())), ops);
    }

    /// Set (`Some`) or clear (`None`) any property, then update `modified`.
    pub fn set_value(
        &mut self,
        property: &str,
        value: Option<String>,
        ops: &mut Operations,
    ) -> Result<()> {
        validate_property(property)?;
        self.update(property, value, ops);
        if property != "modified" {
            self.touch(ops);
        }
        Ok(())
    }

    pub fn set_description(&mut self, description: &str, ops: &mut Operations) -> Result<()> {
        self.set_value("description", Some(description.to_string()), ops)
    }

    /// Completed and deleted tasks get an `end` time; other statuses clear it.
    pub fn set_status(&mut self, status: Status, ops: &mut Operations) -> Result<()> {
        if let Status::Unknown(s) = &status {
            if s != "unknown" {
                invalid!(
                    "invalid status '{s}': must be pending, completed, deleted, recurring, or unknown"
                );
            }
        }
        let closed = matches!(status, Status::Completed | Status::Deleted);
        self.update("status", Some(status.to_taskmap().to_string()), ops);
        if closed {
            self.update("end", Some(format_timestamp(Utc::now())), ops);
        } else if self.data.contains_key("end") {
            self.update("end", None, ops);
        }
        self.touch(ops);
        Ok(())
    }

    pub fn set_priority(&mut self, priority: &str, ops: &mut Operations) -> Result<()> {
        let value = (!priority.is_empty()).then(|| priority.to_string());
        self.set_value("priority", value, ops)
    }

    pub fn set_due(&mut self, due: Option<DateTime<Utc>>, ops: &mut Operations) -> Result<()> {
        self.set_value("due", due.map(format_timestamp), ops)
    }

    pub fn set_wait(&mut self, wait: Option<DateTime<Utc>>, ops: &mut Operations) -> Result<()> {
        self.set_value("wait", wait.map(format_timestamp), ops)
    }

    /// Mark the task active. No-op if it already is.
    pub fn start(&mut self, ops: &mut Operations) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        self.set_value("start", Some(format_timestamp(Utc::now())), ops)
    }

    pub fn stop(&mut self, ops: &mut Operations) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }
        self.set_value("start", None, ops)
    }

    /// Stop the task if active and mark it completed.
    pub fn done(&mut self, ops: &mut Operations) -> Result<()> {
        if self.is_active() {
            self.update("start", None, ops);
        }
        self.set_status(Status::Completed, ops)
    }

    pub fn add_tag(&mut self, tag: &Tag, ops: &mut Operations) -> Result<()> {
        let Tag::User(name) = tag else {
            invalid!("synthetic tag {tag} cannot be added");
        };
        self.set_value(&format!("tag_{name}"), Some(String::new()), ops)
    }

    pub fn remove_tag(&mut self, tag: &Tag, ops: &mut Operations) -> Result<()> {
        let Tag::User(name) = tag else {
            invalid!("synthetic tag {tag} cannot be removed");
        };
        self.set_value(&format!("tag_{name}"), None, ops)
    }

    /// Annotations are keyed by their entry time, so two annotations in the
    /// same second collide; the later one is moved forward until it is unique.
    pub fn add_annotation(&mut self, mut ann: Annotation, ops: &mut Operations) -> Result<()> {
        while self
            .data
            .contains_key(&format!("annotation_{}", ann.entry.timestamp()))
        {
            ann.entry += chrono::Duration::seconds(1);
        }
        self.set_value(
            &format!("annotation_{}", ann.entry.timestamp()),
            Some(ann.description),
            ops,
        )
    }

    pub fn remove_annotation(&mut self, entry: DateTime<Utc>, ops: &mut Operations) -> Result<()> {
        self.set_value(&format!("annotation_{}", entry.timestamp()), None, ops)
    }

    pub fn set_uda(
        &mut self,
        namespace: &str,
        key: &str,
        value: &str,
        ops: &mut Operations,
    ) -> Result<()> {
        let property = checked_uda_property(namespace, key)?;
        self.set_value(&property, Some(value.to_string()), ops)
    }

    pub fn remove_uda(&mut self, namespace: &str, key: &str, ops: &mut Operations) -> Result<()> {
        let property = checked_uda_property(namespace, key)?;
        self.set_value(&property, None, ops)
    }

    pub fn add_dependency(&mut self, dep: Uuid, ops: &mut Operations) -> Result<()> {
        if dep == self.uuid {
            invalid!("task {dep} cannot depend on itself");
        }
        let mut deps = self
            .get_value("depends")
            .map(parse_depends)
            .unwrap_or_default();
        if !deps.insert(dep) {
            return Ok(());
        }
        self.set_value("depends", Some(format_depends(&deps)), ops)
    }

    pub fn remove_dependency(&mut self, dep: Uuid, ops: &mut Operations) -> Result<()> {
        let mut deps = self
            .get_value("depends")
            .map(parse_depends)
            .unwrap_or_default();
        if !deps.remove(&dep) {
            return Ok(());
        }
        let value = (!deps.is_empty()).then(|| format_depends(&deps));
        self.set_value("depends", value, ops)
    }

    /// Remove the task entirely. This is a purge, not `status = deleted`.
    pub fn delete(self, ops: &mut Operations) {
        ops.push(Operation::Delete {
            uuid: self.uuid,
            old_task: self.data,
        });
    }
}

fn is_uda(property: &str) -> bool {
    !RESERVED.contains(&property)
        && !property.starts_with("tag_")
        && !property.starts_with("annotation_")
        && !property.starts_with("dep_")
}

fn split_uda(property: &str) -> (&str, &str) {
    property.split_once('.').unwrap_or(("", property))
}

fn uda_property(namespace: &str, key: &str) -> String {
    if namespace.is_empty() {
        key.to_string()
    } else {
        format!("{namespace}.{key}")
    }
}

fn checked_uda_property(namespace: &str, key: &str) -> Result<String> {
    if key.is_empty() {
        invalid!("UDA key must not be empty");
    }
    if namespace.contains('.') {
        invalid!("UDA namespace '{namespace}' must not contain '.'");
    }
    let property = uda_property(namespace, key);
    if !is_uda(&property) {
        invalid!("'{property}' is a reserved property, not a UDA");
    }
    validate_property(&property)?;
    Ok(property)
}
