//! Default locations for replica data.
//!
//! Everything lives under one data directory: the task database in
//! `taskdb/` and the optional `config.toml`.

use std::path::PathBuf;

/// Resolve the data directory.
/// Checks the `TASKREPLICA_DIR` env var, falls back to `$HOME/.taskreplica`.
pub fn data_dir() -> PathBuf {
    resolve(
        std::env::var("TASKREPLICA_DIR").ok(),
        std::env::var("HOME").ok(),
    )
}

fn resolve(override_dir: Option<String>, home: Option<String>) -> PathBuf {
    match override_dir.filter(|d| !d.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => PathBuf::from(home.unwrap_or_else(|| ".".into())).join(".taskreplica"),
    }
}

pub fn taskdb_dir() -> PathBuf {
    data_dir().join("taskdb")
}

pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}
