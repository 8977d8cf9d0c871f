use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::kv::{scan_btree, BatchOp, KvStore, ScanRange, WriteBatch};

/// Write-buffered overlay on a parent store.
///
/// Reads see the buffered writes first (a buffered delete hides the parent
/// value). Nothing reaches the parent until the caller takes
/// [`CacheKv::into_batch`] and writes it; dropping the cache discards
/// everything.
pub struct CacheKv<'a> {
    parent: &'a dyn KvStore,
    /// `None` marks a buffered delete.
    writes: RwLock<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl<'a> CacheKv<'a> {
    pub fn new(parent: &'a dyn KvStore) -> Self {
        Self {
            parent,
            writes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of keys touched so far.
    pub fn pending(&self) -> Result<usize> {
        Ok(self.writes.read().map_err(|_| StoreError::LockPoisoned)?.len())
    }

    /// Buffered writes as one batch, in key order.
    pub fn into_batch(self) -> Result<WriteBatch> {
        let writes = self
            .writes
            .into_inner()
            .map_err(|_| StoreError::LockPoisoned)?;
        let mut batch = WriteBatch::new();
        for (key, value) in writes {
            match value {
                Some(v) => batch.put(key, v),
                None => batch.delete(key),
            };
        }
        Ok(batch)
    }
}

impl KvStore for CacheKv<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        {
            let writes = self.writes.read().map_err(|_| StoreError::LockPoisoned)?;
            if let Some(buffered) = writes.get(key) {
                return Ok(buffered.clone());
            }
        }
        self.parent.get(key)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut writes = self.writes.write().map_err(|_| StoreError::LockPoisoned)?;
        for op in batch {
            match op {
                BatchOp::Put { key, value } => writes.insert(key, Some(value)),
                BatchOp::Delete { key } => writes.insert(key, None),
            };
        }
        Ok(())
    }

    fn scan(&self, range: &ScanRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let writes = self.writes.read().map_err(|_| StoreError::LockPoisoned)?;
        let overlay: Vec<(&Vec<u8>, &Option<Vec<u8>>)> =
            writes.iter().filter(|(k, _)| range.contains(k)).collect();

        // Each overlay key can hide at most one parent entry, so asking the
        // parent for `limit + overlay.len()` is enough to fill the page.
        let parent_range = ScanRange {
            limit: range.limit.map(|l| l.saturating_add(overlay.len())),
            ..range.clone()
        };
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = self
            .parent
            .scan(&parent_range)?
            .into_iter()
            .map(|(k, v)| (k, Some(v)))
            .collect();
        for (k, v) in overlay {
            merged.insert(k.clone(), v.clone());
        }

        Ok(scan_btree(&merged, range, |v| v.clone()))
    }
}
