//! Durable ordered key-value storage with atomic batch commit.
//!
//! Everything above this layer (task documents, operation logs, the working
//! set, the sync cursor) is encoded into raw byte keys by [`crate::taskdb`].
//! A backend only has to provide byte-keyed get/set/delete, prefix scans, and
//! transactions that become visible all at once on commit.

mod inmemory;
mod sqlite;

use std::path::PathBuf;

use crate::errors::Result;

pub use inmemory::InMemoryStorage;
pub use sqlite::SqliteStorage;

pub type KvPair = (Vec<u8>, Vec<u8>);

/// Whether an on-disk replica may be modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

impl AccessMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "read_only" => Ok(Self::ReadOnly),
            "read_write" => Ok(Self::ReadWrite),
            _ => crate::errors::invalid!(
                "invalid access mode '{s}': must be read_only or read_write"
            ),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::ReadWrite => "read_write",
        }
    }
}

/// A scoped write context. Writes are buffered until [`StorageTxn::commit`];
/// dropping the transaction without committing discards them.
pub trait StorageTxn {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()>;
    fn delete(&mut self, key: &[u8]) -> Result<()>;
    /// All pairs whose key starts with `prefix`, in ascending key order.
    fn scan(&mut self, prefix: &[u8]) -> Result<Vec<KvPair>>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

pub trait Storage {
    fn txn<'a>(&'a mut self) -> Result<Box<dyn StorageTxn + 'a>>;

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.txn()?.get(key)
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let mut txn = self.txn()?;
        txn.set(key, value)?;
        txn.commit()
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        let mut txn = self.txn()?;
        txn.delete(key)?;
        txn.commit()
    }

    fn scan(&mut self, prefix: &[u8]) -> Result<Vec<KvPair>> {
        self.txn()?.scan(prefix)
    }
}

/// How to construct a [`Storage`] backend.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    InMemory,
    OnDisk {
        taskdb_dir: PathBuf,
        create_if_missing: bool,
        access_mode: AccessMode,
    },
}

impl StorageConfig {
    pub fn into_storage(self) -> Result<Box<dyn Storage>> {
        Ok(match self {
            Self::InMemory => Box::new(InMemoryStorage::new()),
            Self::OnDisk {
                taskdb_dir,
                create_if_missing,
                access_mode,
            } => Box::new(SqliteStorage::new(
                taskdb_dir,
                create_if_missing,
                access_mode,
            )?),
        })
    }
}
