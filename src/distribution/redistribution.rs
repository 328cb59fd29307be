//! Retransmission of unacknowledged distributions.
//!
//! The origin partition keeps every not-yet-acknowledged distribution
//! in the retriable column family. This loop scans that family on a
//! fixed interval and retransmits due entries, with per-distribution
//! exponential backoff plus jitter so a recovering partition is not
//! flooded. Backoff bookkeeping is in-memory only — timestamps in
//! state would make replay nondeterministic — so a restart simply
//! retries everything once and re-learns the backoff.
//!
//! The loop only reads committed state through its own context; it
//! never opens a transaction and can therefore run beside the
//! processing thread.

use crate::config::DistributionConfig;
use crate::distribution::transport::PartitionTransport;
use crate::distribution::distributed_copy;
use crate::error::Result;
use crate::record::{Record, RecordType};
use crate::state::{EngineState, StateStore};
use crate::types::PartitionId;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background retry loop for one partition's pending distributions.
pub struct Redistributor {
    partition_id: PartitionId,
    config: DistributionConfig,
    store: StateStore,
    state: EngineState,
    transport: Arc<dyn PartitionTransport>,
    backoff: HashMap<(u64, PartitionId), RetrySchedule>,
}

#[derive(Debug, Clone, Copy)]
struct RetrySchedule {
    next_due: Instant,
    delay: Duration,
    attempts: u32,
}

impl Redistributor {
    pub fn new(
        partition_id: PartitionId,
        config: DistributionConfig,
        store: StateStore,
        state: EngineState,
        transport: Arc<dyn PartitionTransport>,
    ) -> Self {
        Self {
            partition_id,
            config,
            store,
            state,
            transport,
            backoff: HashMap::new(),
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.run_retry_cycle().await {
                        warn!(error = %err, "Redistribution cycle failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!(partition_id = self.partition_id, "Redistributor shutting down");
                    break;
                }
            }
        }
    }

    /// One scan over the retriable distributions, retransmitting the due
    /// ones. Exposed for tests that drive the loop manually.
    pub async fn run_retry_cycle(&mut self) -> Result<usize> {
        let mut entries = Vec::new();
        self.store
            .scan(&self.state.retriable_distribution, |key, _| {
                entries.push(key);
                true
            })?;

        // Drop backoff entries for distributions that completed.
        self.backoff.retain(|key, _| entries.contains(key));

        let now = Instant::now();
        let mut sent = 0;
        for (distribution_key, target) in entries {
            if let Some(schedule) = self.backoff.get(&(distribution_key, target)) {
                if schedule.next_due > now {
                    continue;
                }
            }
            let Some(command) = self.rebuild_command(distribution_key, target)? else {
                continue;
            };
            match self.transport.send_command(target, command).await {
                Ok(()) => {
                    debug!(distribution_key, target, "Retransmitted distribution");
                    sent += 1;
                }
                Err(err) => {
                    debug!(distribution_key, target, error = %err, "Retransmission failed");
                }
            }
            self.schedule_next(distribution_key, target, now);
        }
        Ok(sent)
    }

    /// Rebuild the distributed command from the pending entry, honoring
    /// head-of-line order for queued distributions.
    fn rebuild_command(
        &mut self,
        distribution_key: u64,
        target: PartitionId,
    ) -> Result<Option<Record>> {
        let mut ctx = crate::state::DbContext::new();
        let Some(pending) =
            self.store
                .read(&self.state.pending_distribution, &mut ctx, &(distribution_key, target))?
        else {
            return Ok(None);
        };
        if let Some(queue) = pending.queue_id {
            let mut head = None;
            self.store
                .scan(&self.state.queued_distribution, |(q, p, key), _| {
                    if q == queue && p == target {
                        head = Some(key);
                        return false;
                    }
                    true
                })?;
            if head != Some(distribution_key) {
                return Ok(None);
            }
        }
        let command = Record {
            key: pending.command_key,
            intent: pending.command_intent,
            record_type: RecordType::Command,
            value: pending.command_value,
            rejection: None,
            position: 0,
            source_position: 0,
            request: None,
            distribution: None,
        };
        Ok(Some(distributed_copy(&command, self.partition_id, distribution_key)))
    }

    fn schedule_next(&mut self, distribution_key: u64, target: PartitionId, now: Instant) {
        let entry = self
            .backoff
            .entry((distribution_key, target))
            .or_insert(RetrySchedule {
                next_due: now,
                delay: self.config.initial_backoff,
                attempts: 0,
            });
        let jitter_bound = entry.delay.mul_f64(self.config.jitter.clamp(0.0, 1.0));
        let jitter = if jitter_bound.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..jitter_bound)
        };
        entry.next_due = now + entry.delay + jitter;
        entry.delay = (entry.delay * 2).min(self.config.max_backoff);
        entry.attempts += 1;
        debug!(
            distribution_key,
            target,
            attempts = entry.attempts,
            next_delay_ms = entry.delay.as_millis() as u64,
            "Retry scheduled"
        );
    }
}

impl std::fmt::Debug for Redistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redistributor")
            .field("partition_id", &self.partition_id)
            .field("tracked", &self.backoff.len())
            .finish()
    }
}
