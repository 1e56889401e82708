//! `KvStore` backends over a lazily opened RESP connection.

use std::cell::RefCell;

use bytes::Bytes;
use parking_lot::Mutex;
use rkv_common::StoreResult;
use rkv_engine::{KvStore, ScanCursor, ScanPage};
use tracing::warn;

use crate::connection::{breaks_connection, Address, Connection};
use crate::options::{ConnectionSettings, StoreOptions};

/// Where to connect and how; shared by both backends.
#[derive(Debug, Clone)]
struct Endpoint {
    address: Address,
    settings: ConnectionSettings,
}

impl Endpoint {
    fn new(address: &str, options: &StoreOptions) -> StoreResult<Self> {
        Ok(Endpoint {
            address: Address::parse(address)?,
            settings: ConnectionSettings::from_options(options)?,
        })
    }

    /// Runs `op` on the connection in `slot`, opening one if needed.
    ///
    /// The connection is put back unless `op` failed in a way that leaves the
    /// stream unusable; the next call then reconnects.
    fn run<T>(
        &self,
        slot: &mut Option<Connection>,
        op: impl FnOnce(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => Connection::open(&self.address, &self.settings)?,
        };
        let result = op(&mut conn);
        match &result {
            Err(err) if breaks_connection(err) => {
                warn!(host = %self.address.host, port = self.address.port, error = %err, "dropping store connection");
            }
            _ => *slot = Some(conn),
        }
        result
    }
}

/// Thread-safe RESP client.
///
/// Requests from concurrent callers are serialized on one connection by a
/// mutex, so a single handle may be shared freely.
#[derive(Debug)]
pub struct RespClient {
    endpoint: Endpoint,
    conn: Mutex<Option<Connection>>,
}

impl RespClient {
    /// Validates `address` and `options` without touching the network.
    pub fn open(address: &str, options: &StoreOptions) -> StoreResult<Self> {
        Ok(RespClient {
            endpoint: Endpoint::new(address, options)?,
            conn: Mutex::new(None),
        })
    }

    pub fn address(&self) -> &Address {
        &self.endpoint.address
    }

    /// Round-trips a `PING`, connecting first if necessary.
    pub fn ping(&self) -> StoreResult<()> {
        self.with_connection(Connection::ping)
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut slot = self.conn.lock();
        self.endpoint.run(&mut slot, op)
    }
}

impl KvStore for RespClient {
    const PARALLEL_SAFE: bool = true;

    fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.with_connection(|conn| conn.get(key))
    }

    fn set(&self, key: &str, value: Bytes) -> StoreResult<()> {
        self.with_connection(|conn| conn.set(key, &value))
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.with_connection(|conn| conn.delete(key))
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.with_connection(|conn| conn.exists(key))
    }

    fn scan(&self, cursor: &ScanCursor, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        self.with_connection(|conn| conn.scan(cursor, pattern, count))
    }
}

/// Single-caller RESP backend.
///
/// Holds its connection in a `RefCell`, so it is `!Sync` and declares itself
/// not parallel-safe. Callers wanting concurrency construct one per worker.
#[derive(Debug)]
pub struct RespConnection {
    endpoint: Endpoint,
    conn: RefCell<Option<Connection>>,
}

impl RespConnection {
    /// Validates `address` and `options` without touching the network.
    pub fn open(address: &str, options: &StoreOptions) -> StoreResult<Self> {
        Ok(RespConnection {
            endpoint: Endpoint::new(address, options)?,
            conn: RefCell::new(None),
        })
    }

    pub fn address(&self) -> &Address {
        &self.endpoint.address
    }

    pub fn ping(&self) -> StoreResult<()> {
        self.with_connection(Connection::ping)
    }

    fn with_connection<T>(&self, op: impl FnOnce(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut slot = self.conn.borrow_mut();
        self.endpoint.run(&mut slot, op)
    }
}

impl KvStore for RespConnection {
    const PARALLEL_SAFE: bool = false;

    fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        self.with_connection(|conn| conn.get(key))
    }

    fn set(&self, key: &str, value: Bytes) -> StoreResult<()> {
        self.with_connection(|conn| conn.set(key, &value))
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.with_connection(|conn| conn.delete(key))
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.with_connection(|conn| conn.exists(key))
    }

    fn scan(&self, cursor: &ScanCursor, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        self.with_connection(|conn| conn.scan(cursor, pattern, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rkv_common::StoreErrorKind;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn open_does_not_connect() {
        // Nothing listens on port 1; opening must still succeed.
        let client = RespClient::open("127.0.0.1:1", &StoreOptions::new()).unwrap();
        assert_eq!(client.address().port, 1);

        let err = client.get("k").unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Connection);
    }

    #[test]
    fn open_rejects_bad_options() {
        let options: StoreOptions = [("db", "x")].into_iter().collect();
        let err = RespConnection::open("localhost", &options).unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Config);
    }

    #[test]
    fn reconnects_after_dropped_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            // First connection: hang up without answering.
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
            // Second connection: answer one PING.
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).unwrap();
            stream.write_all(b"+PONG\r\n").unwrap();
        });

        let client = RespClient::open(&format!("127.0.0.1:{port}"), &StoreOptions::new()).unwrap();
        let err = client.ping().unwrap_err();
        assert!(err.is_retryable());
        client.ping().unwrap();
    }

    #[test]
    fn declares_parallel_safety() {
        assert!(<RespClient as KvStore>::PARALLEL_SAFE);
        assert!(!<RespConnection as KvStore>::PARALLEL_SAFE);
    }
}
