//! Redis-compatible development server for RecordKV.
//!
//! Serves the subset of RESP2 commands the adapter's client needs, backed by
//! `MemoryStore`. It exists so the client and adapter can be tested against a
//! real socket without an external Redis.

pub mod server;
pub mod stats;

pub use server::{handle_connection, serve, ServerState};
pub use stats::{ServerStats, StatsSnapshot};
