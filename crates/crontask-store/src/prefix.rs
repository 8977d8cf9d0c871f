use std::sync::Arc;

use crate::error::Result;
use crate::kv::{BatchOp, KvStore, ScanRange, WriteBatch};

/// A namespace inside a parent store. Keys are transparently prefixed on the
/// way in and stripped on the way out, so two `PrefixKv`s with disjoint
/// prefixes never see each other's data.
#[derive(Clone)]
pub struct PrefixKv {
    inner: Arc<dyn KvStore>,
    prefix: Vec<u8>,
}

impl PrefixKv {
    pub fn new(inner: Arc<dyn KvStore>, prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }

    /// Rewrites `batch` into the parent's key space, for callers that commit
    /// several namespaces through the parent in one write.
    pub fn prefix_batch(&self, batch: WriteBatch) -> WriteBatch {
        let mut prefixed = WriteBatch::new();
        for op in batch {
            match op {
                BatchOp::Put { key, value } => prefixed.put(self.full_key(&key), value),
                BatchOp::Delete { key } => prefixed.delete(self.full_key(&key)),
            };
        }
        prefixed
    }
}

impl KvStore for PrefixKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(&self.full_key(key))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.inner.write(self.prefix_batch(batch))
    }

    fn scan(&self, range: &ScanRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let inner_range = ScanRange {
            prefix: self.full_key(&range.prefix),
            start_after: range.start_after.as_deref().map(|c| self.full_key(c)),
            limit: range.limit,
            reverse: range.reverse,
        };
        let strip = self.prefix.len();
        Ok(self
            .inner
            .scan(&inner_range)?
            .into_iter()
            .map(|(k, v)| (k[strip..].to_vec(), v))
            .collect())
    }
}
