use std::path::Path;

use serde::Deserialize;

use crate::errors::{Error, Result};
use crate::server::ServerConfig;

pub const DEFAULT_EXPIRE_AFTER_DAYS: u32 = 180;

/// Replica settings, read from `config.toml` in the data directory.
///
/// ```toml
/// expire_after_days = 90
/// avoid_snapshots = false
///
/// [sync.local]
/// server_dir = "/mnt/shared/tasks-server"
/// snapshot_threshold = 50
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicaConfig {
    /// Deleted tasks untouched for this many days are purged by
    /// [`crate::Replica::expire_tasks`].
    #[serde(default = "default_expire_after_days")]
    pub expire_after_days: u32,
    #[serde(default)]
    pub avoid_snapshots: bool,
    /// The server used by [`crate::Replica::sync_configured`].
    pub sync: Option<ServerConfig>,
}

fn default_expire_after_days() -> u32 {
    DEFAULT_EXPIRE_AFTER_DAYS
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            expire_after_days: DEFAULT_EXPIRE_AFTER_DAYS,
            avoid_snapshots: false,
            sync: None,
        }
    }
}

impl ReplicaConfig {
    /// Load config from the default location.
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&crate::paths::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config: ReplicaConfig = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| {
                Error::Config(format!("failed to parse {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.expire_after_days == 0 {
            return Err(Error::Config(format!(
                "{}: expire_after_days must be at least 1",
                path.display()
            )));
        }
        if let Some(sync) = &self.sync {
            sync.validate().map_err(|e| match e {
                Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
                other => other,
            })?;
        }
        Ok(())
    }
}
