use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use crate::error::{Result, StoreError};

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// Ordered list of mutations applied atomically by [`KvStore::write`].
/// Later operations on the same key win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

impl IntoIterator for WriteBatch {
    type Item = BatchOp;
    type IntoIter = std::vec::IntoIter<BatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// Ordered scan over every key starting with `prefix`.
///
/// `start_after` is an exclusive cursor in scan direction: keys strictly
/// greater than it when scanning forward, strictly smaller when `reverse`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRange {
    pub prefix: Vec<u8>,
    pub start_after: Option<Vec<u8>>,
    pub limit: Option<usize>,
    pub reverse: bool,
}

impl ScanRange {
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn start_after(mut self, cursor: impl Into<Vec<u8>>) -> Self {
        self.start_after = Some(cursor.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Whether `key` falls inside this range, ignoring the limit.
    pub fn contains(&self, key: &[u8]) -> bool {
        if !key.starts_with(&self.prefix) {
            return false;
        }
        match &self.start_after {
            Some(cursor) if self.reverse => key < cursor.as_slice(),
            Some(cursor) => key > cursor.as_slice(),
            None => true,
        }
    }
}

/// Smallest key greater than every key starting with `prefix`, or `None`
/// when no such key exists (empty or all-`0xFF` prefix).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Byte-keyed ordered storage. Keys compare lexicographically.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Apply every operation of `batch` or none of them.
    fn write(&self, batch: WriteBatch) -> Result<()>;

    /// Entries under `range`, in ascending key order (descending if reversed).
    fn scan(&self, range: &ScanRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        (**self).write(batch)
    }

    fn scan(&self, range: &ScanRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        (**self).scan(range)
    }
}

/// Collects the entries of an ordered map that fall under `range`.
pub(crate) fn scan_btree<V, F>(
    map: &BTreeMap<Vec<u8>, V>,
    range: &ScanRange,
    mut value: F,
) -> Vec<(Vec<u8>, Vec<u8>)>
where
    F: FnMut(&V) -> Option<Vec<u8>>,
{
    let limit = range.limit.unwrap_or(usize::MAX);
    let in_prefix = |k: &&Vec<u8>| k.starts_with(&range.prefix);

    let pick = |(k, v): (&Vec<u8>, &V)| value(v).map(|v| (k.clone(), v));

    if range.reverse {
        let upper = match (&range.start_after, prefix_end(&range.prefix)) {
            (Some(cursor), Some(end)) if *cursor < end => Bound::Excluded(cursor.clone()),
            (Some(cursor), None) => Bound::Excluded(cursor.clone()),
            (_, Some(end)) => Bound::Excluded(end),
            (None, None) => Bound::Unbounded,
        };
        map.range((Bound::Unbounded, upper))
            .rev()
            .take_while(|(k, _)| in_prefix(k))
            .filter_map(pick)
            .take(limit)
            .collect()
    } else {
        let lower = match &range.start_after {
            Some(cursor) if cursor.as_slice() >= range.prefix.as_slice() => {
                Bound::Excluded(cursor.clone())
            }
            _ => Bound::Included(range.prefix.clone()),
        };
        map.range((lower, Bound::Unbounded))
            .take_while(|(k, _)| in_prefix(k))
            .filter_map(pick)
            .take(limit)
            .collect()
    }
}

/// In-memory store backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryKv {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.data.read().map_err(|_| StoreError::LockPoisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let data = self.data.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(data.get(key).cloned())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut data = self.data.write().map_err(|_| StoreError::LockPoisoned)?;
        for op in batch {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan(&self, range: &ScanRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let data = self.data.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(scan_btree(&data, range, |v| Some(v.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryKv {
        let kv = MemoryKv::new();
        let mut batch = WriteBatch::new();
        for k in [&b"a1"[..], b"a2", b"a3", b"b1", b"\xff\xff"] {
            batch.put(k, k);
        }
        kv.write(batch).unwrap();
        kv
    }

    fn keys(entries: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<Vec<u8>> {
        entries.into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn prefix_end_carries() {
        assert_eq!(prefix_end(b"a"), Some(b"b".to_vec()));
        assert_eq!(prefix_end(b"a\xff"), Some(b"b".to_vec()));
        assert_eq!(prefix_end(b"\xff\xff"), None);
        assert_eq!(prefix_end(b""), None);
    }

    #[test]
    fn scan_respects_prefix_and_direction() {
        let kv = seeded();
        let fwd = kv.scan(&ScanRange::prefix(b"a".to_vec())).unwrap();
        assert_eq!(keys(fwd), vec![b"a1".to_vec(), b"a2".to_vec(), b"a3".to_vec()]);

        let rev = kv
            .scan(&ScanRange::prefix(b"a".to_vec()).reverse(true))
            .unwrap();
        assert_eq!(keys(rev), vec![b"a3".to_vec(), b"a2".to_vec(), b"a1".to_vec()]);

        let all = kv.scan(&ScanRange::prefix(Vec::new())).unwrap();
        assert_eq!(all.len(), 5);
        let high = kv
            .scan(&ScanRange::prefix(b"\xff".to_vec()).reverse(true))
            .unwrap();
        assert_eq!(keys(high), vec![b"\xff\xff".to_vec()]);
    }

    #[test]
    fn scan_cursor_is_exclusive() {
        let kv = seeded();
        let fwd = kv
            .scan(&ScanRange::prefix(b"a".to_vec()).start_after(b"a1".to_vec()).limit(1))
            .unwrap();
        assert_eq!(keys(fwd), vec![b"a2".to_vec()]);

        let rev = kv
            .scan(
                &ScanRange::prefix(b"a".to_vec())
                    .start_after(b"a2".to_vec())
                    .reverse(true),
            )
            .unwrap();
        assert_eq!(keys(rev), vec![b"a1".to_vec()]);
    }

    #[test]
    fn batch_applies_in_order() {
        let kv = MemoryKv::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"1".to_vec());
        batch.delete(b"k".to_vec());
        batch.put(b"k".to_vec(), b"2".to_vec());
        kv.write(batch).unwrap();
        assert_eq!(kv.get(b"k").unwrap(), Some(b"2".to_vec()));

        kv.delete(b"k").unwrap();
        assert!(!kv.has(b"k").unwrap());
    }
}
