//! # Server Statistics
//!
//! Lightweight counters reported through the `INFO` command.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: Atomic counters aggregate events cheaply.
//! 2. **Relaxed Ordering**: Counters are independent; no cross-field ordering
//!    is needed, only eventual consistency.
//! 3. **Plain Snapshots**: Readers get a copyable struct, never the atomics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of all server counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Connections accepted since start.
    pub connections_total: u64,
    /// Connections currently open.
    pub connections_active: u64,
    /// Commands processed.
    pub commands_total: u64,
    /// Commands answered with an error reply.
    pub errors_total: u64,
}

/// Thread-safe counters shared by every connection task.
#[derive(Debug, Default)]
pub struct ServerStats {
    connections_total: AtomicU64,
    connections_active: AtomicU64,
    commands_total: AtomicU64,
    errors_total: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an accepted connection.
    pub fn record_connect(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a closed connection.
    pub fn record_disconnect(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records one processed command and whether it failed.
    pub fn record_command(&self, failed: bool) {
        self.commands_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.errors_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            commands_total: self.commands_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
        }
    }
}
