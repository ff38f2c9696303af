//! In-memory [`StateStore`].

use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{DbResult, StateStore, WriteBatch};

/// A sorted map behind a lock. Applying a batch takes the write lock once,
/// so readers never observe half a batch.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn apply(&self, batch: WriteBatch) -> DbResult<()> {
        let mut entries = self.entries.write();
        for (key, value) in batch.iter() {
            match value {
                Some(v) => {
                    entries.insert(key.to_vec(), v.to_vec());
                }
                None => {
                    entries.remove(key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_prefix_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put("escrow/00000000000000000002", b"b".to_vec());
        batch.put("escrow/00000000000000000001", b"a".to_vec());
        batch.put("schedule/00000000000000000001", b"s".to_vec());
        store.apply(batch).unwrap();

        let scanned = store.scan_prefix(b"escrow/").unwrap();
        let values: Vec<_> = scanned.into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn delete_in_batch() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put("k", b"v".to_vec());
        store.apply(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.remove("k");
        store.apply(batch).unwrap();
        assert!(store.get(b"k").unwrap().is_none());
        assert!(store.is_empty());
    }
}
