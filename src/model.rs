use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{invalid, Error, Result};
use crate::validate::validate_tag;

/// The property map of a single task. All values are strings at this level;
/// dates are stored as decimal Unix-epoch seconds.
pub type TaskMap = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Completed,
    Deleted,
    Recurring,
    /// A status value this crate does not recognize, preserved verbatim.
    Unknown(String),
}

impl Status {
    /// Parse caller input. Only the five known values are accepted here;
    /// stored data with other values goes through [`Status::from_taskmap`].
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "deleted" => Ok(Self::Deleted),
            "recurring" => Ok(Self::Recurring),
            "unknown" => Ok(Self::Unknown("unknown".into())),
            _ => invalid!(
                "invalid status '{s}': must be pending, completed, deleted, recurring, or unknown"
            ),
        }
    }

    pub fn from_taskmap(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "deleted" => Self::Deleted,
            "recurring" => Self::Recurring,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The status of a stored task. A task without one is pending.
    pub fn of(task: &TaskMap) -> Self {
        task.get("status")
            .map(|s| Self::from_taskmap(s))
            .unwrap_or(Self::Pending)
    }

    pub fn to_taskmap(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Deleted => "deleted",
            Self::Recurring => "recurring",
            Self::Unknown(s) => s,
        }
    }

    /// Pending and recurring tasks are the ones that belong in the working set.
    pub fn is_active_member(&self) -> bool {
        matches!(self, Self::Pending | Self::Recurring)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_taskmap())
    }
}

/// Tags computed from task state rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyntheticTag {
    Waiting,
    Active,
    Pending,
    Completed,
    Deleted,
    Blocked,
    Unblocked,
    Blocking,
}

impl SyntheticTag {
    pub const ALL: [SyntheticTag; 8] = [
        Self::Waiting,
        Self::Active,
        Self::Pending,
        Self::Completed,
        Self::Deleted,
        Self::Blocked,
        Self::Unblocked,
        Self::Blocking,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Active => "ACTIVE",
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Deleted => "DELETED",
            Self::Blocked => "BLOCKED",
            Self::Unblocked => "UNBLOCKED",
            Self::Blocking => "BLOCKING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    User(String),
    Synthetic(SyntheticTag),
}

impl Tag {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Synthetic(_))
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl FromStr for Tag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(synth) = SyntheticTag::ALL.iter().find(|t| t.as_str() == s) {
            return Ok(Self::Synthetic(*synth));
        }
        validate_tag(s)?;
        Ok(Self::User(s.to_string()))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(s) => f.write_str(s),
            Self::Synthetic(t) => f.write_str(t.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Annotation {
    pub entry: DateTime<Utc>,
    pub description: String,
}
