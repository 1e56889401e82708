//! # RecordKV RESP Client
//!
//! Blocking RESP2 client that lets the adapter talk to a Redis-compatible
//! store. Two `KvStore` backends are provided:
//!
//! - [`RespClient`]: one connection behind a mutex; safe to share.
//! - [`RespConnection`]: one connection behind a `RefCell`; single caller only.
//!
//! Both connect lazily on first use. A connection that fails at the transport
//! level is dropped and a fresh one is opened on the next call; the failed
//! call itself is never replayed.

pub mod client;
pub mod connection;
pub mod options;

pub use client::{RespClient, RespConnection};
pub use connection::{Address, Connection};
pub use options::{ConnectionSettings, StoreOptions};
