//! # Store Collaborator Interface
//!
//! ## Design Principles
//!
//! 1. **Strategy Pattern**: Abstract the key-value store behind a trait so the
//!    adapter works against memory, a Redis connection or anything else that
//!    offers GET/SET/SCAN.
//! 2. **Binary-Safe Values**: Values are `Bytes`; keys are strings because
//!    they come out of a textual key template.
//! 3. **Cursor Scans**: Enumeration is page-at-a-time through an opaque
//!    cursor, so no caller ever has to hold the whole keyspace.
//! 4. **Declared Concurrency**: Each backend states whether one handle may be
//!    shared by concurrent callers via `PARALLEL_SAFE`.

use std::sync::Arc;

use bytes::Bytes;
use rkv_common::StoreResult;

/// Opaque scan position handed back to the store on the next page request.
///
/// `"0"` starts a scan, following the Redis convention. Backends are free to
/// put anything else in the token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanCursor(String);

impl ScanCursor {
    /// Token that starts a new scan.
    pub const START_TOKEN: &'static str = "0";

    pub fn start() -> Self {
        ScanCursor(Self::START_TOKEN.to_string())
    }

    pub fn new(token: impl Into<String>) -> Self {
        ScanCursor(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_start(&self) -> bool {
        self.0 == Self::START_TOKEN
    }
}

impl Default for ScanCursor {
    fn default() -> Self {
        Self::start()
    }
}

/// One page of a cursor scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Keys on this page that matched the pattern. May be empty even when the
    /// scan is not finished.
    pub keys: Vec<String>,
    /// Cursor for the next page, or `None` once the scan is complete.
    pub next: Option<ScanCursor>,
}

/// Strategy pattern: the surface the adapter needs from a key-value store.
///
/// Retry, reconnection and timeouts are the implementation's business; the
/// adapter calls each method once and surfaces whatever error comes back.
pub trait KvStore {
    /// Whether a single handle may be used by multiple callers at once.
    ///
    /// This is a declaration made by the backend author, not something the
    /// adapter can verify.
    const PARALLEL_SAFE: bool;

    /// Returns the value for a key, or `None` if the key is absent.
    fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Inserts or replaces a key with the provided value.
    fn set(&self, key: &str, value: Bytes) -> StoreResult<()>;

    /// Removes a key. Returns true if the key existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Returns true if the key exists.
    fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Fetches the next page of keys matching the glob `pattern`.
    ///
    /// `count` is a hint for how much work one page may do. Keys present for
    /// the whole scan are returned at least once; keys written or removed
    /// while the scan runs may or may not be seen.
    fn scan(&self, cursor: &ScanCursor, pattern: &str, count: usize) -> StoreResult<ScanPage>;
}

impl<S: KvStore> KvStore for Arc<S> {
    const PARALLEL_SAFE: bool = S::PARALLEL_SAFE;

    fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Bytes) -> StoreResult<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        (**self).delete(key)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        (**self).exists(key)
    }

    fn scan(&self, cursor: &ScanCursor, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        (**self).scan(cursor, pattern, count)
    }
}
