use std::path::Path;

use log::debug;

use super::{FetchResult, Server, Snapshot, SubmitResult};
use crate::errors::{Error, Result};
use crate::operation::Operation;
use crate::storage::{AccessMode, SqliteStorage, Storage, StorageTxn};

const VERSION: &[u8] = b"version";
/// Operations at or below this version have been folded into the snapshot.
const FLOOR: &[u8] = b"floor";
const SNAPSHOT: &[u8] = b"snapshot";
const OP_PREFIX: &[u8] = b"op:";

fn op_key(version: u64) -> Vec<u8> {
    let mut k = OP_PREFIX.to_vec();
    k.extend_from_slice(format!("{version:016x}").as_bytes());
    k
}

fn read_u64(txn: &mut dyn StorageTxn, key: &[u8]) -> Result<u64> {
    match txn.get(key)? {
        None => Ok(0),
        Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
    }
}

fn write_u64(txn: &mut dyn StorageTxn, key: &[u8], value: u64) -> Result<()> {
    txn.set(key, serde_json::to_vec(&value)?)
}

/// A sync server kept in a directory on this machine, so replicas sharing a
/// filesystem can sync without a network service.
pub struct LocalServer {
    storage: SqliteStorage,
    snapshot_threshold: u64,
}

impl LocalServer {
    pub fn new(server_dir: impl AsRef<Path>, snapshot_threshold: u64) -> Result<Self> {
        let storage = SqliteStorage::new(server_dir, true, AccessMode::ReadWrite)?;
        Ok(Self {
            storage,
            snapshot_threshold,
        })
    }
}

impl Server for LocalServer {
    fn get_operations_since(&mut self, version: u64) -> Result<FetchResult> {
        let mut txn = self.storage.txn()?;
        let current = read_u64(txn.as_mut(), VERSION)?;
        let floor = read_u64(txn.as_mut(), FLOOR)?;
        if version > current {
            return Err(Error::Sync(format!(
                "client is at version {version} but the server is only at {current}"
            )));
        }
        if version < floor {
            return Ok(FetchResult::Gap { earliest: floor });
        }
        let mut operations = Vec::new();
        for (key, value) in txn.scan(OP_PREFIX)? {
            if key > op_key(version) {
                operations.push(serde_json::from_slice(&value)?);
            }
        }
        Ok(FetchResult::Operations {
            operations,
            version: current,
        })
    }

    fn submit_operations(&mut self, ops: &[Operation], base_version: u64) -> Result<SubmitResult> {
        let mut txn = self.storage.txn()?;
        let current = read_u64(txn.as_mut(), VERSION)?;
        if current != base_version {
            debug!("rejecting submission based on {base_version}; server is at {current}");
            return Ok(SubmitResult::Conflict { version: current });
        }
        let mut version = current;
        for op in ops {
            version += 1;
            txn.set(&op_key(version), serde_json::to_vec(op)?)?;
        }
        write_u64(txn.as_mut(), VERSION, version)?;
        let floor = read_u64(txn.as_mut(), FLOOR)?;
        txn.commit()?;
        debug!("accepted {} operations, now at version {version}", ops.len());
        Ok(SubmitResult::Accepted {
            version,
            snapshot_urgent: version - floor >= self.snapshot_threshold,
        })
    }

    fn get_snapshot(&mut self) -> Result<Option<Snapshot>> {
        match self.storage.get(SNAPSHOT)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        }
    }

    fn put_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let mut txn = self.storage.txn()?;
        let current = read_u64(txn.as_mut(), VERSION)?;
        if snapshot.version > current {
            return Err(Error::Sync(format!(
                "snapshot version {} is ahead of the server ({current})",
                snapshot.version
            )));
        }
        let floor = read_u64(txn.as_mut(), FLOOR)?;
        if snapshot.version <= floor {
            debug!("ignoring snapshot at {}; already have {floor}", snapshot.version);
            return Ok(());
        }
        txn.set(SNAPSHOT, serde_json::to_vec(snapshot)?)?;
        let discard_through = op_key(snapshot.version);
        for (key, _) in txn.scan(OP_PREFIX)? {
            if key <= discard_through {
                txn.delete(&key)?;
            }
        }
        write_u64(txn.as_mut(), FLOOR, snapshot.version)?;
        txn.commit()?;
        debug!("stored snapshot at version {}", snapshot.version);
        Ok(())
    }
}
