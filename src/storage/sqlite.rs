use std::path::{Path, PathBuf};

use log::debug;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};

use super::{AccessMode, KvPair, Storage, StorageTxn};
use crate::errors::{Error, Result};

const DB_FILENAME: &str = "taskreplica.sqlite3";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key   BLOB PRIMARY KEY NOT NULL,
    value BLOB NOT NULL
) WITHOUT ROWID;
";

fn set_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

/// On-disk storage: a single SQLite database inside `taskdb_dir`.
///
/// Cross-process safety comes from SQLite's own locking; writers take the
/// database lock up front (`BEGIN IMMEDIATE`) so two replicas opened on the
/// same directory serialize instead of failing mid-transaction.
pub struct SqliteStorage {
    conn: Connection,
    access_mode: AccessMode,
}

impl SqliteStorage {
    pub fn new(
        taskdb_dir: impl AsRef<Path>,
        create_if_missing: bool,
        access_mode: AccessMode,
    ) -> Result<Self> {
        let dir = taskdb_dir.as_ref();
        if !dir.exists() {
            if !create_if_missing || access_mode == AccessMode::ReadOnly {
                return Err(Error::Storage(format!(
                    "task database directory {} does not exist",
                    dir.display()
                )));
            }
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Storage(format!("failed to create directory {}: {e}", dir.display()))
            })?;
        }
        let path: PathBuf = dir.join(DB_FILENAME);

        let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match access_mode {
            AccessMode::ReadOnly => flags |= OpenFlags::SQLITE_OPEN_READ_ONLY,
            AccessMode::ReadWrite => flags |= OpenFlags::SQLITE_OPEN_READ_WRITE,
        }
        if create_if_missing && access_mode == AccessMode::ReadWrite {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let conn = Connection::open_with_flags(&path, flags).map_err(|e| {
            Error::Storage(format!("failed to open {}: {e}", path.display()))
        })?;
        if access_mode == AccessMode::ReadWrite {
            set_pragmas(&conn)?;
            conn.execute_batch(SCHEMA)?;
        } else {
            conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        }
        debug!("opened {} ({})", path.display(), access_mode.as_str());
        Ok(Self { conn, access_mode })
    }
}

struct Txn<'t> {
    txn: Option<Transaction<'t>>,
}

impl<'t> Txn<'t> {
    fn txn(&self) -> Result<&Transaction<'t>> {
        self.txn
            .as_ref()
            .ok_or_else(|| Error::Storage("transaction is already finished".into()))
    }
}

impl StorageTxn for Txn<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self
            .txn()?
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.txn()?.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.txn()?.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }

    fn scan(&mut self, prefix: &[u8]) -> Result<Vec<KvPair>> {
        let txn = self.txn()?;
        let mut stmt = txn.prepare_cached(
            "SELECT key, value FROM kv WHERE substr(key, 1, ?2) = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(rusqlite::params![prefix, prefix.len() as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    fn commit(&mut self) -> Result<()> {
        let txn = self
            .txn
            .take()
            .ok_or_else(|| Error::Storage("transaction is already finished".into()))?;
        txn.commit()?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if let Some(txn) = self.txn.take() {
            txn.rollback()?;
        }
        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn txn<'a>(&'a mut self) -> Result<Box<dyn StorageTxn + 'a>> {
        let behavior = match self.access_mode {
            AccessMode::ReadWrite => TransactionBehavior::Immediate,
            AccessMode::ReadOnly => TransactionBehavior::Deferred,
        };
        let txn = self.conn.transaction_with_behavior(behavior)?;
        Ok(Box::new(Txn { txn: Some(txn) }))
    }
}
