//! # Server Counters
//!
//! Atomic counters for connections and commands so tests can observe how
//! the client behaves on the wire (e.g. that a broken connection was
//! replaced by a fresh one).
//!
//! `Ordering::Relaxed` is enough: counters are read as independent totals.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of all counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections_total: u64,
    pub connections_open: u64,
    pub gets: u64,
    pub get_hits: u64,
    pub sets: u64,
    pub flushes: u64,
    pub errors: u64,
}

/// Thread-safe counter set.
#[derive(Debug, Default)]
pub struct ServerStats {
    connections_total: AtomicU64,
    connections_open: AtomicU64,
    gets: AtomicU64,
    get_hits: AtomicU64,
    sets: AtomicU64,
    flushes: AtomicU64,
    errors: AtomicU64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_open.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_open.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_get(&self, hit: bool) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.get_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_open: self.connections_open.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            get_hits: self.get_hits.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
