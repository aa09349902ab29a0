//! Lock-free counters and gauges for the attachment and migration metrics.
//!
//! Exposition (Prometheus text format) is out of scope for this
//! workspace; this module only accumulates the numbers a transport
//! layer would expose.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;

/// The outcome a `migration_result_total{result}` observation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationResult {
    /// The migration resolved to a single remaining node.
    Completed,
    /// The migration exceeded its timeout.
    TimedOut,
}

/// A single controller RPC operation, for `attachment_ops_total{op}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentOp {
    /// `ControllerPublishVolume`.
    Publish,
    /// `ControllerUnpublishVolume`.
    Unpublish,
}

/// A running mean/count accumulator, used for
/// `migration_duration_seconds`. A full histogram with configurable
/// buckets belongs to the exposition layer; this crate only keeps
/// enough state for that layer to report one.
#[derive(Debug, Default)]
struct DurationSummary {
    count: AtomicU64,
    sum_millis: AtomicU64,
}

impl DurationSummary {
    fn observe(&self, duration: chrono::Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let millis = duration.num_milliseconds().max(0) as u64;
        self.sum_millis.fetch_add(millis, Ordering::Relaxed);
    }

    fn snapshot(&self) -> (u64, u64) {
        (
            self.count.load(Ordering::Relaxed),
            self.sum_millis.load(Ordering::Relaxed),
        )
    }
}

/// The metrics surface the controller plane exposes.
#[derive(Debug, Default)]
pub struct Metrics {
    attachment_ops: RwLock<HashMap<AttachmentOp, AtomicU64>>,
    attachment_conflicts: AtomicU64,
    grace_period_used: AtomicU64,
    migration_results: RwLock<HashMap<MigrationResult, AtomicU64>>,
    migration_duration: DurationSummary,
    connection_state: RwLock<HashMap<String, AtomicI64>>,
}

impl Metrics {
    /// Creates a fresh, zeroed metrics registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments `attachment_ops_total{op}`.
    pub fn record_attachment_op(&self, op: AttachmentOp) {
        if let Some(counter) = self.attachment_ops.read().get(&op) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.attachment_ops
            .write()
            .entry(op)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Increments `attachment_conflicts_total`.
    pub fn record_conflict(&self) {
        self.attachment_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments `grace_period_used_total`.
    pub fn record_grace_period_used(&self) {
        self.grace_period_used.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments `migration_result_total{result}` and observes the
    /// elapsed duration into `migration_duration_seconds`.
    pub fn record_migration_result(&self, result: MigrationResult, elapsed: chrono::Duration) {
        if let Some(counter) = self.migration_results.read().get(&result) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            self.migration_results
                .write()
                .entry(result)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
        self.migration_duration.observe(elapsed);
    }

    /// Sets the `connection_state{address}` gauge: `1` connected, `0` not.
    pub fn set_connection_state(&self, address: &str, connected: bool) {
        let value = i64::from(connected);
        if let Some(gauge) = self.connection_state.read().get(address) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        self.connection_state
            .write()
            .entry(address.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .store(value, Ordering::Relaxed);
    }

    /// Reads the current `attachment_ops_total{op}` value.
    #[must_use]
    pub fn attachment_ops_total(&self, op: AttachmentOp) -> u64 {
        self.attachment_ops
            .read()
            .get(&op)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Reads the current `attachment_conflicts_total` value.
    #[must_use]
    pub fn attachment_conflicts_total(&self) -> u64 {
        self.attachment_conflicts.load(Ordering::Relaxed)
    }

    /// Reads the current `grace_period_used_total` value.
    #[must_use]
    pub fn grace_period_used_total(&self) -> u64 {
        self.grace_period_used.load(Ordering::Relaxed)
    }

    /// Reads the current `migration_result_total{result}` value.
    #[must_use]
    pub fn migration_result_total(&self, result: MigrationResult) -> u64 {
        self.migration_results
            .read()
            .get(&result)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Reads `(count, sum_millis)` for `migration_duration_seconds`.
    #[must_use]
    pub fn migration_duration_summary(&self) -> (u64, u64) {
        self.migration_duration.snapshot()
    }

    /// Reads the current `connection_state{address}` gauge value.
    #[must_use]
    pub fn connection_state(&self, address: &str) -> Option<bool> {
        self.connection_state
            .read()
            .get(address)
            .map(|g| g.load(Ordering::Relaxed) != 0)
    }
}
