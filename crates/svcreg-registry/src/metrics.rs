//! Metrics Collection
//!
//! Counters for registrations, lookups, and session recovery, exported through
//! the `metrics` facade and mirrored locally for snapshots.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use std::sync::atomic::{AtomicU64, Ordering};

/// Registry client metrics collector
#[derive(Debug)]
pub struct RegistryMetrics {
    registrations: AtomicU64,
    registration_failures: AtomicU64,
    lookups: AtomicU64,
    lookup_failures: AtomicU64,
    reconnects: AtomicU64,
    reconnect_failures: AtomicU64,
    replay_failures: AtomicU64,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        describe_counter!(
            "registry_registrations_total",
            "Total successful registrations"
        );
        describe_counter!(
            "registry_registration_failures_total",
            "Total failed registrations"
        );
        describe_counter!("registry_lookups_total", "Total successful lookups");
        describe_counter!("registry_lookup_failures_total", "Total failed lookups");
        describe_counter!(
            "registry_reconnects_total",
            "Total sessions re-established after loss"
        );
        describe_counter!(
            "registry_reconnect_failures_total",
            "Total failed reconnect attempts"
        );
        describe_counter!(
            "registry_replay_failures_total",
            "Total entries that could not be republished after reconnecting"
        );
        describe_gauge!("registry_entries", "Entries recorded for replay");

        Self {
            registrations: AtomicU64::new(0),
            registration_failures: AtomicU64::new(0),
            lookups: AtomicU64::new(0),
            lookup_failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            reconnect_failures: AtomicU64::new(0),
            replay_failures: AtomicU64::new(0),
        }
    }

    pub fn record_registration(&self, entries: usize) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
        counter!("registry_registrations_total").increment(1);
        gauge!("registry_entries").set(entries as f64);
    }

    pub fn record_registration_failure(&self) {
        self.registration_failures.fetch_add(1, Ordering::Relaxed);
        counter!("registry_registration_failures_total").increment(1);
    }

    pub fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        counter!("registry_lookups_total").increment(1);
    }

    pub fn record_lookup_failure(&self) {
        self.lookup_failures.fetch_add(1, Ordering::Relaxed);
        counter!("registry_lookup_failures_total").increment(1);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        counter!("registry_reconnects_total").increment(1);
    }

    pub fn record_reconnect_failure(&self) {
        self.reconnect_failures.fetch_add(1, Ordering::Relaxed);
        counter!("registry_reconnect_failures_total").increment(1);
    }

    pub fn record_replay_failure(&self) {
        self.replay_failures.fetch_add(1, Ordering::Relaxed);
        counter!("registry_replay_failures_total").increment(1);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            registrations: self.registrations.load(Ordering::Relaxed),
            registration_failures: self.registration_failures.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            reconnect_failures: self.reconnect_failures.load(Ordering::Relaxed),
            replay_failures: self.replay_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for RegistryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`RegistryMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub registrations: u64,
    pub registration_failures: u64,
    pub lookups: u64,
    pub lookup_failures: u64,
    pub reconnects: u64,
    pub reconnect_failures: u64,
    pub replay_failures: u64,
}
