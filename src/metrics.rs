//! Engine metrics.
//!
//! Plain atomic counters with a copyable snapshot; scraping and export
//! live outside this crate.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one partition's engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    records_processed: AtomicU64,
    commands_rejected: AtomicU64,
    events_replayed: AtomicU64,
    distributions_started: AtomicU64,
    distributions_finished: AtomicU64,
    transmissions: AtomicU64,
    checkpoints_created: AtomicU64,
    checkpoints_ignored: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub records_processed: u64,
    pub commands_rejected: u64,
    pub events_replayed: u64,
    pub distributions_started: u64,
    pub distributions_finished: u64,
    pub transmissions: u64,
    pub checkpoints_created: u64,
    pub checkpoints_ignored: u64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self) {
        self.records_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(&self, events: u64) {
        self.events_replayed.fetch_add(events, Ordering::Relaxed);
    }

    pub fn record_distribution_started(&self) {
        self.distributions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_distribution_finished(&self) {
        self.distributions_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transmission(&self) {
        self.transmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint_created(&self) {
        self.checkpoints_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_checkpoint_ignored(&self) {
        self.checkpoints_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_processed: self.records_processed.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            events_replayed: self.events_replayed.load(Ordering::Relaxed),
            distributions_started: self.distributions_started.load(Ordering::Relaxed),
            distributions_finished: self.distributions_finished.load(Ordering::Relaxed),
            transmissions: self.transmissions.load(Ordering::Relaxed),
            checkpoints_created: self.checkpoints_created.load(Ordering::Relaxed),
            checkpoints_ignored: self.checkpoints_ignored.load(Ordering::Relaxed),
        }
    }
}
