//! A local-first, replicated task database.
//!
//! Every change to a task is an [`Operation`]; batches of operations are
//! applied atomically to a [`Replica`], recorded for undo, and later exchanged
//! with a sync [`Server`] to reconcile with other replicas.

pub mod config;
pub mod depmap;
pub mod errors;
pub mod model;
pub mod operation;
pub mod paths;
pub mod replica;
pub mod server;
pub mod storage;
mod sync;
pub mod task;
mod taskdb;
pub mod validate;
pub mod workingset;

pub use config::ReplicaConfig;
pub use depmap::DependencyMap;
pub use errors::{Error, ErrorKind, Result};
pub use model::{Annotation, Status, SyntheticTag, Tag, TaskMap};
pub use operation::{Operation, Operations};
pub use replica::Replica;
pub use server::{
    FetchResult, LocalServer, RemoteServer, Server, ServerConfig, Snapshot, SubmitResult,
};
pub use storage::{AccessMode, InMemoryStorage, SqliteStorage, Storage, StorageConfig};
pub use sync::MAX_ATTEMPTS as MAX_SYNC_ATTEMPTS;
pub use task::Task;
pub use workingset::WorkingSet;
