//! The inter-partition transport boundary.
//!
//! The engine assumes reliable, at-least-once delivery of commands to a
//! named partition and of acknowledgments back; everything above that
//! (exactly-once effect, retry bookkeeping) lives in the distribution
//! behavior. Any transport satisfying [`PartitionTransport`] plugs in.
//!
//! [`LoopbackTransport`] is the in-process implementation used by tests
//! and single-binary deployments: records are serialized to their wire
//! bytes and queued per partition, with per-partition failure injection
//! to exercise the retry path.

use crate::error::{DistributionError, Result};
use crate::record::Record;
use crate::types::PartitionId;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Fire-and-forget delivery of commands to other partitions.
#[async_trait]
pub trait PartitionTransport: Send + Sync + std::fmt::Debug {
    /// Deliver `record` to `target`. Returns an error when the target
    /// is unknown or currently unreachable; the caller leaves the
    /// distribution pending for the redistribution loop.
    async fn send_command(&self, target: PartitionId, record: Record) -> Result<()>;
}

/// In-process transport: per-partition inboxes over the wire encoding.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    inboxes: DashMap<PartitionId, mpsc::UnboundedSender<bytes::Bytes>>,
    unreachable: RwLock<HashSet<PartitionId>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a partition and get the receiving end of its inbox.
    pub fn register(&self, partition: PartitionId) -> mpsc::UnboundedReceiver<bytes::Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.insert(partition, tx);
        rx
    }

    /// Simulate the partition becoming unreachable.
    pub fn set_unreachable(&self, partition: PartitionId) {
        self.unreachable.write().insert(partition);
        debug!(partition, "Partition marked unreachable");
    }

    /// Heal a previously unreachable partition.
    pub fn set_reachable(&self, partition: PartitionId) {
        self.unreachable.write().remove(&partition);
        debug!(partition, "Partition marked reachable");
    }

    /// Number of successfully delivered records.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of records dropped due to unreachable targets.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PartitionTransport for LoopbackTransport {
    async fn send_command(&self, target: PartitionId, record: Record) -> Result<()> {
        if self.unreachable.read().contains(&target) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(DistributionError::Unreachable(target).into());
        }
        let Some(inbox) = self.inboxes.get(&target) else {
            return Err(DistributionError::UnknownPartition(target).into());
        };
        let bytes = record
            .to_bytes()
            .map_err(|e| crate::error::Error::Internal(format!("record encode: {e}")))?;
        inbox
            .send(bytes)
            .map_err(|_| DistributionError::TransportClosed)?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        trace!(target, "Record delivered");
        Ok(())
    }
}
