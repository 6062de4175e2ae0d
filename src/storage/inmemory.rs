use std::collections::BTreeMap;

use super::{KvPair, Storage, StorageTxn};
use crate::errors::{Error, Result};

/// Volatile storage backed by an ordered map. Useful for tests and for
/// replicas that sync everything they need on startup.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Pending writes: `Some(value)` for a set, `None` for a delete.
type WriteSet = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

struct Txn<'t> {
    storage: &'t mut InMemoryStorage,
    writes: Option<WriteSet>,
}

impl Txn<'_> {
    fn writes(&mut self) -> Result<&mut WriteSet> {
        self.writes
            .as_mut()
            .ok_or_else(|| Error::Storage("transaction is already finished".into()))
    }
}

impl StorageTxn for Txn<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.writes()?.get(key) {
            return Ok(pending.clone());
        }
        Ok(self.storage.data.get(key).cloned())
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.writes()?.insert(key.to_vec(), Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.writes()?.insert(key.to_vec(), None);
        Ok(())
    }

    fn scan(&mut self, prefix: &[u8]) -> Result<Vec<KvPair>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .storage
            .data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in self.writes()?.range(prefix.to_vec()..) {
            if !k.starts_with(prefix) {
                break;
            }
            match v {
                Some(v) => merged.insert(k.clone(), v.clone()),
                None => merged.remove(k),
            };
        }
        Ok(merged.into_iter().collect())
    }

    fn commit(&mut self) -> Result<()> {
        let writes = self
            .writes
            .take()
            .ok_or_else(|| Error::Storage("transaction is already finished".into()))?;
        for (k, v) in writes {
            match v {
                Some(v) => self.storage.data.insert(k, v),
                None => self.storage.data.remove(&k),
            };
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.writes = None;
        Ok(())
    }
}

impl Storage for InMemoryStorage {
    fn txn<'a>(&'a mut self) -> Result<Box<dyn StorageTxn + 'a>> {
        Ok(Box::new(Txn {
            storage: self,
            writes: Some(WriteSet::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support;

    #[test]
    fn backend_contract() {
        let mut storage = InMemoryStorage::new();
        test_support::all(&mut storage);
    }

    #[test]
    fn scan_sees_uncommitted_deletes() {
        let mut storage = InMemoryStorage::new();
        storage.set(b"p:1", b"a".to_vec()).unwrap();
        storage.set(b"p:2", b"b".to_vec()).unwrap();
        let mut txn = storage.txn().unwrap();
        txn.delete(b"p:1").unwrap();
        txn.set(b"p:3", b"c".to_vec()).unwrap();
        let keys: Vec<Vec<u8>> = txn.scan(b"p:").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"p:2".to_vec(), b"p:3".to_vec()]);
    }

    #[test]
    fn use_after_commit_fails() {
        let mut storage = InMemoryStorage::new();
        let mut txn = storage.txn().unwrap();
        txn.commit().unwrap();
        assert!(txn.set(b"k", vec![]).is_err());
        assert!(txn.commit().is_err());
    }
}
