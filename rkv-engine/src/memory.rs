//! # In-Memory Store
//!
//! A `KvStore` backed by an ordered map behind a read/write lock.
//!
//! Keys are kept in a `BTreeMap` so a scan cursor can simply be the last key
//! examined: the next page resumes strictly after it. Every key present for
//! the whole scan is returned exactly once, whatever else is inserted or
//! removed in between.

use std::collections::BTreeMap;
use std::ops::Bound;

use bytes::Bytes;
use parking_lot::RwLock;
use rkv_common::{glob_match, StoreError, StoreResult};

use crate::engine::{KvStore, ScanCursor, ScanPage};

/// Prefix marking a resume token produced by `MemoryStore::scan`.
const RESUME_PREFIX: char = '>';

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Removes every key.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl KvStore for MemoryStore {
    const PARALLEL_SAFE: bool = true;

    fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Bytes) -> StoreResult<()> {
        self.entries.write().insert(key.to_owned(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    fn scan(&self, cursor: &ScanCursor, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        let lower = if cursor.is_start() {
            Bound::Unbounded
        } else {
            let last = cursor
                .as_str()
                .strip_prefix(RESUME_PREFIX)
                .ok_or_else(|| StoreError::protocol(format!("invalid cursor {:?}", cursor.as_str())))?;
            Bound::Excluded(last)
        };

        let entries = self.entries.read();
        let budget = count.max(1);
        let mut page = ScanPage::default();
        let mut examined = 0;

        for key in entries.range::<str, _>((lower, Bound::Unbounded)).map(|(key, _)| key) {
            if glob_match(pattern, key) {
                page.keys.push(key.clone());
            }
            examined += 1;
            if examined == budget {
                page.next = Some(ScanCursor::new(format!("{RESUME_PREFIX}{key}")));
                break;
            }
        }
        Ok(page)
    }
}
