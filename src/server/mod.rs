//! The sync transport: what the sync engine needs from a server holding the
//! shared operation history.

mod local;
mod remote;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::model::TaskMap;
use crate::operation::Operation;

pub use local::LocalServer;
pub use remote::RemoteServer;

/// Retained operations at which a local server asks for a snapshot.
pub const DEFAULT_SNAPSHOT_THRESHOLD: u64 = 100;

/// Response to [`Server::get_operations_since`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchResult {
    /// Every operation after the requested version, in order, and the
    /// server's current version.
    Operations {
        operations: Vec<Operation>,
        version: u64,
    },
    /// The operations after the requested version were compacted into a
    /// snapshot; the oldest version still fetchable is `earliest`.
    Gap { earliest: u64 },
}

/// Response to [`Server::submit_operations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitResult {
    Accepted { version: u64, snapshot_urgent: bool },
    /// The server is not at the submitted base version.
    Conflict { version: u64 },
}

/// Every task's state as of `version`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub tasks: BTreeMap<Uuid, TaskMap>,
}

/// A shared, versioned operation history. Each accepted operation advances the
/// version by one.
pub trait Server {
    fn get_operations_since(&mut self, version: u64) -> Result<FetchResult>;

    /// Append `ops` if the server is still at `base_version`. All or nothing.
    fn submit_operations(&mut self, ops: &[Operation], base_version: u64) -> Result<SubmitResult>;

    fn get_snapshot(&mut self) -> Result<Option<Snapshot>>;

    fn put_snapshot(&mut self, snapshot: &Snapshot) -> Result<()>;
}

/// How to reach a sync server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum ServerConfig {
    /// Another directory on this machine, holding its own SQLite store.
    Local {
        server_dir: PathBuf,
        #[serde(default = "default_snapshot_threshold")]
        snapshot_threshold: u64,
    },
    /// An HTTP sync server.
    Remote {
        url: String,
        client_id: String,
        encryption_secret: String,
    },
}

fn default_snapshot_threshold() -> u64 {
    DEFAULT_SNAPSHOT_THRESHOLD
}

impl ServerConfig {
    pub fn local(server_dir: impl Into<PathBuf>) -> Self {
        Self::Local {
            server_dir: server_dir.into(),
            snapshot_threshold: DEFAULT_SNAPSHOT_THRESHOLD,
        }
    }

    /// Check required fields without touching the filesystem or network.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Local {
                server_dir,
                snapshot_threshold,
            } => {
                if server_dir.as_os_str().is_empty() {
                    return Err(Error::Config("local sync: server_dir is empty".into()));
                }
                if *snapshot_threshold == 0 {
                    return Err(Error::Config(
                        "local sync: snapshot_threshold must be at least 1".into(),
                    ));
                }
            }
            Self::Remote {
                url,
                client_id,
                encryption_secret,
            } => {
                if url.trim().is_empty() {
                    return Err(Error::Config("remote sync: url is required".into()));
                }
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(Error::Config(format!(
                        "remote sync: url '{url}' must start with http:// or https://"
                    )));
                }
                if Uuid::parse_str(client_id).is_err() {
                    return Err(Error::Config(format!(
                        "remote sync: client_id '{client_id}' is not a UUID"
                    )));
                }
                if encryption_secret.is_empty() {
                    return Err(Error::Config(
                        "remote sync: encryption_secret is required".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn into_server(self) -> Result<Box<dyn Server>> {
        self.validate()?;
        Ok(match self {
            Self::Local {
                server_dir,
                snapshot_threshold,
            } => Box::new(LocalServer::new(server_dir, snapshot_threshold)?),
            Self::Remote {
                url,
                client_id,
                encryption_secret,
            } => Box::new(RemoteServer::new(&url, &client_id, &encryption_secret)),
        })
    }
}
