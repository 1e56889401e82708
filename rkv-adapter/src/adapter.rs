//! # Key-Value Adapter
//!
//! The single point of contact between a record pipeline and a key-value
//! store.
//!
//! ## Design Principles
//!
//! 1. **Composition**: The adapter owns a store handle, a boxed serializer and
//!    a compiled key template; each can be swapped without touching the
//!    others.
//! 2. **Eager Validation**: A bad template fails in the constructor, before
//!    the store is ever called.
//! 3. **Lazy Iteration**: `iterate` pulls one scan page at a time and reads
//!    each record only when the consumer asks for it.
//! 4. **No Hidden Policy**: No retries, no locks, no caching. Concurrency is
//!    whatever the store declares through `KvStore::PARALLEL_SAFE`.

use std::borrow::Cow;
use std::vec;

use bytes::Bytes;
use rkv_common::{Error, RkvResult};
use rkv_engine::{KvStore, ScanCursor};
use tracing::debug;

use crate::key::KeyFormatter;
use crate::serializer::Serializer;

/// Keys requested per scan round trip unless configured otherwise.
pub const DEFAULT_SCAN_COUNT: usize = 100;

pub(crate) fn checked_scan_count(scan_count: usize) -> RkvResult<usize> {
    if scan_count == 0 {
        return Err(Error::configuration("scan_count", "must be greater than zero"));
    }
    Ok(scan_count)
}

/// A record that knows its own identifier.
///
/// Implementing this is optional; it only enables [`KeyValueAdapter::put`].
pub trait Record {
    fn record_id(&self) -> Cow<'_, str>;
}

/// Persists records of type `R` in the store `S`.
pub struct KeyValueAdapter<R, S> {
    store: S,
    serializer: Box<dyn Serializer<R>>,
    keys: KeyFormatter,
    scan_count: usize,
}

impl<R, S: KvStore> KeyValueAdapter<R, S> {
    /// Whether one adapter may be called concurrently from several threads.
    ///
    /// Mirrors the store's own declaration; callers must serialize access or
    /// build one adapter per worker when this is false.
    pub const PARALLEL_SAFE: bool = S::PARALLEL_SAFE;

    /// Builds an adapter, validating `key_template` before anything else.
    pub fn new(store: S, serializer: Box<dyn Serializer<R>>, key_template: &str) -> RkvResult<Self> {
        let keys = KeyFormatter::new(key_template)?;
        Ok(Self::from_parts(store, serializer, keys))
    }

    /// Builds an adapter from an already compiled key formatter.
    pub fn from_parts(store: S, serializer: Box<dyn Serializer<R>>, keys: KeyFormatter) -> Self {
        KeyValueAdapter {
            store,
            serializer,
            keys,
            scan_count: DEFAULT_SCAN_COUNT,
        }
    }

    /// Sets how many keys each scan round trip asks the store for.
    ///
    /// Zero is rejected with `Error::Configuration`.
    pub fn with_scan_count(mut self, scan_count: usize) -> RkvResult<Self> {
        self.scan_count = checked_scan_count(scan_count)?;
        Ok(self)
    }

    pub fn parallel_safe(&self) -> bool {
        Self::PARALLEL_SAFE
    }

    pub fn key_formatter(&self) -> &KeyFormatter {
        &self.keys
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Storage key for `record_id`.
    pub fn key_for(&self, record_id: &str) -> String {
        self.keys.format(record_id)
    }

    /// Reads and decodes the record stored for `record_id`.
    ///
    /// An absent key is `Error::NotFound`; nothing is decoded in that case.
    pub fn get(&self, record_id: &str) -> RkvResult<R> {
        let key = self.keys.format(record_id);
        debug!(key = %key, "get record");
        match self.load(&key)? {
            Some(record) => Ok(record),
            None => Err(Error::NotFound {
                record_id: record_id.to_owned(),
                key,
            }),
        }
    }

    /// Encodes `record` and writes it under `record_id`.
    ///
    /// Store failures are returned as-is; nothing is retried.
    pub fn set(&self, record_id: &str, record: &R) -> RkvResult<()> {
        let key = self.keys.format(record_id);
        let payload = match self.serializer.encode(record) {
            Ok(payload) => payload,
            Err(source) => return Err(Error::Serialization { key, source }),
        };
        debug!(key = %key, bytes = payload.len(), format = self.serializer.name(), "set record");
        self.store
            .set(&key, Bytes::from(payload))
            .map_err(|source| Error::Store { key, source })
    }

    /// Writes a record under its own identifier.
    pub fn put(&self, record: &R) -> RkvResult<()>
    where
        R: Record,
    {
        let record_id = record.record_id();
        self.set(&record_id, record)
    }

    /// Removes the record for `record_id`. Returns true if it existed.
    pub fn delete(&self, record_id: &str) -> RkvResult<bool> {
        let key = self.keys.format(record_id);
        debug!(key = %key, "delete record");
        self.store
            .delete(&key)
            .map_err(|source| Error::Store { key, source })
    }

    pub fn exists(&self, record_id: &str) -> RkvResult<bool> {
        let key = self.keys.format(record_id);
        self.store
            .exists(&key)
            .map_err(|source| Error::Store { key, source })
    }

    /// Lazily yields every record in this adapter's namespace.
    ///
    /// Each call starts a fresh scan. The sequence is not a snapshot: writes
    /// made while it runs may or may not show up, and a key removed between
    /// its scan page and its read is skipped. A failed page ends the
    /// sequence after yielding the error; a failed record does not.
    pub fn iterate(&self) -> Records<'_, R, S> {
        Records {
            scan: KeyScan::new(self),
        }
    }

    /// Like [`iterate`](Self::iterate), but yields `(record_id, record)`.
    pub fn iterate_entries(&self) -> Entries<'_, R, S> {
        Entries {
            scan: KeyScan::new(self),
        }
    }

    fn load(&self, key: &str) -> RkvResult<Option<R>> {
        let payload = self.store.get(key).map_err(|source| Error::Store {
            key: key.to_owned(),
            source,
        })?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        self.serializer
            .decode(&payload)
            .map(Some)
            .map_err(|source| Error::Serialization {
                key: key.to_owned(),
                source,
            })
    }

    /// Reads the record behind a scanned key, skipping keys that are not
    /// ours or that vanished since the scan saw them.
    fn load_scanned<'k>(&self, key: &'k str) -> Option<RkvResult<(Cow<'k, str>, R)>> {
        // Keys of a longer template sharing our prefix also match the glob.
        let Some(record_id) = self.keys.parse(key) else {
            debug!(key = %key, template = %self.keys.template(), "skipping key of another template");
            return None;
        };
        match self.load(key) {
            Ok(Some(record)) => Some(Ok((record_id, record))),
            Ok(None) => {
                debug!(key = %key, "key removed during iteration");
                None
            }
            Err(err) => Some(Err(err)),
        }
    }
}

impl<R, S> std::fmt::Debug for KeyValueAdapter<R, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueAdapter")
            .field("template", &self.keys.template())
            .field("serializer", &self.serializer.name())
            .field("scan_count", &self.scan_count)
            .finish_non_exhaustive()
    }
}

/// Pulls matching keys from the store one page at a time.
struct KeyScan<'a, R, S> {
    adapter: &'a KeyValueAdapter<R, S>,
    cursor: Option<ScanCursor>,
    page: vec::IntoIter<String>,
}

impl<'a, R, S: KvStore> KeyScan<'a, R, S> {
    fn new(adapter: &'a KeyValueAdapter<R, S>) -> Self {
        KeyScan {
            adapter,
            cursor: Some(ScanCursor::start()),
            page: Vec::new().into_iter(),
        }
    }
}

impl<R, S: KvStore> Iterator for KeyScan<'_, R, S> {
    type Item = RkvResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(key) = self.page.next() {
                return Some(Ok(key));
            }
            // No cursor left means the scan finished (or failed).
            let cursor = self.cursor.take()?;
            let pattern = self.adapter.keys.wildcard();
            match self.adapter.store.scan(&cursor, pattern, self.adapter.scan_count) {
                Ok(page) => {
                    debug!(pattern = %pattern, keys = page.keys.len(), done = page.next.is_none(), "scan page");
                    self.cursor = page.next;
                    self.page = page.keys.into_iter();
                }
                Err(source) => {
                    return Some(Err(Error::Store {
                        key: pattern.to_owned(),
                        source,
                    }));
                }
            }
        }
    }
}

/// Lazy sequence returned by [`KeyValueAdapter::iterate`].
pub struct Records<'a, R, S> {
    scan: KeyScan<'a, R, S>,
}

impl<R, S: KvStore> Iterator for Records<'_, R, S> {
    type Item = RkvResult<R>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = match self.scan.next()? {
                Ok(key) => key,
                Err(err) => return Some(Err(err)),
            };
            if let Some(loaded) = self.scan.adapter.load_scanned(&key) {
                return Some(loaded.map(|(_, record)| record));
            }
        }
    }
}

/// Lazy sequence returned by [`KeyValueAdapter::iterate_entries`].
pub struct Entries<'a, R, S> {
    scan: KeyScan<'a, R, S>,
}

impl<R, S: KvStore> Iterator for Entries<'_, R, S> {
    type Item = RkvResult<(String, R)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = match self.scan.next()? {
                Ok(key) => key,
                Err(err) => return Some(Err(err)),
            };
            if let Some(loaded) = self.scan.adapter.load_scanned(&key) {
                return Some(loaded.map(|(record_id, record)| (record_id.into_owned(), record)));
            }
        }
    }
}
