//! Cross-partition command distribution.
//!
//! A command accepted on one partition that must be visible everywhere
//! is *distributed*: recorded as pending-acknowledgment for every other
//! partition, transmitted, applied there, and acknowledged back. The
//! origin considers the operation complete once every target partition
//! acknowledged.
//!
//! ```text
//!  origin partition                      target partition
//!  ─────────────────                     ────────────────
//!  Started   (event)
//!  Distributing (event, per target) ──►  original command
//!                                        (applied, no response)
//!  Acknowledge (command)  ◄──────────────  acknowledge()
//!  Acknowledged (event)
//!  Finished  (event, after last ack)
//! ```
//!
//! Delivery is at-least-once; the *effect* is exactly-once because a
//! redelivered command fails the receiving handler's precondition
//! checks (the entity has already moved on) and is simply acknowledged
//! again. Unacknowledged distributions are retransmitted by the
//! [`redistribution`] loop.
//!
//! Ordered distributions share a queue: per `(queue, partition)`, a
//! command is transmitted only once it is the head of the queue, and
//! each acknowledgment releases the next entry.

pub mod redistribution;
pub mod transport;

pub use redistribution::Redistributor;
pub use transport::{LoopbackTransport, PartitionTransport};

use crate::error::{Error, Result, StorageError};
use crate::processing::processor::{ProcessingFrame, RecordProcessor};
use crate::processing::writers::SideEffect;
use crate::record::{
    CommandDistributionRecord, DistributionIntent, DistributionMetadata, Intent, Record,
    RecordType, RecordValue,
};
use crate::state::{EngineState, PendingDistribution, TransactionScope};
use crate::types::{DistributionOrdering, PartitionId};
use tracing::debug;

/// Queue for ordered scope distribution.
pub const SCOPE_DISTRIBUTION_QUEUE: u64 = 1;

/// Fan-out/acknowledge protocol entry points, called by processors.
#[derive(Debug, Clone)]
pub struct CommandDistributionBehavior {
    partition_id: PartitionId,
    partition_count: u32,
}

impl CommandDistributionBehavior {
    pub fn new(partition_id: PartitionId, partition_count: u32) -> Self {
        Self {
            partition_id,
            partition_count,
        }
    }

    /// All partitions except this one.
    fn targets(&self) -> impl Iterator<Item = PartitionId> + '_ {
        (1..=self.partition_count).filter(|p| *p != self.partition_id)
    }

    /// Whether there is anybody to distribute to.
    pub fn has_targets(&self) -> bool {
        self.partition_count > 1
    }

    /// Record `command` as pending-acknowledgment for every other
    /// partition and stage its transmission.
    ///
    /// The pending bookkeeping is written through the staged events'
    /// appliers, so replay rebuilds it without re-transmitting;
    /// transmissions are post-commit side effects.
    pub fn distribute(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        distribution_key: u64,
        command: &Record,
        ordering: DistributionOrdering,
    ) -> Result<()> {
        let targets: Vec<PartitionId> = self.targets().collect();
        if targets.is_empty() {
            return Ok(());
        }
        let queue_id = ordering.queue_id();

        debug!(
            distribution_key,
            targets = targets.len(),
            ?ordering,
            "Distributing command"
        );

        frame.writers.state().append_follow_up_event(
            distribution_key,
            Intent::Distribution(DistributionIntent::Started),
            RecordValue::Distribution(CommandDistributionRecord {
                partition: self.partition_id,
                queue_id,
                command_key: command.key,
                command_value_type: command.value_type(),
                command_intent: command.intent,
                command_value: Some(Box::new(command.value.clone())),
            }),
        );

        for target in targets {
            // Head-of-line gating happens before this distribution's own
            // queue entry is applied, so an empty queue means "go".
            let transmit_now = match queue_id {
                None => true,
                Some(queue) => !has_queued(frame.scope, &frame.state, queue, target)?,
            };

            frame.writers.state().append_follow_up_event(
                distribution_key,
                Intent::Distribution(DistributionIntent::Distributing),
                RecordValue::Distribution(CommandDistributionRecord {
                    partition: target,
                    queue_id,
                    command_key: command.key,
                    command_value_type: command.value_type(),
                    command_intent: command.intent,
                    command_value: Some(Box::new(command.value.clone())),
                }),
            );

            if transmit_now {
                frame.writers.side_effect(SideEffect::SendCommand {
                    target,
                    record: distributed_copy(
                        command,
                        self.partition_id,
                        distribution_key,
                    ),
                });
            }
        }
        Ok(())
    }

    /// Acknowledge a distributed command after applying it, so the
    /// origin partition can complete the distribution. Safe to call for
    /// redelivered commands.
    pub fn acknowledge(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
    ) -> Result<()> {
        let Some(metadata) = command.distribution else {
            return Err(Error::Internal(
                "acknowledge called for a non-distributed command".to_string(),
            ));
        };
        let acknowledgment = Record {
            key: metadata.distribution_key,
            intent: Intent::Distribution(DistributionIntent::Acknowledge),
            record_type: RecordType::Command,
            value: RecordValue::Distribution(CommandDistributionRecord {
                partition: self.partition_id,
                queue_id: None,
                command_key: command.key,
                command_value_type: command.value_type(),
                command_intent: command.intent,
                command_value: None,
            }),
            rejection: None,
            position: 0,
            source_position: 0,
            request: None,
            distribution: None,
        };
        frame.writers.side_effect(SideEffect::SendCommand {
            target: metadata.origin_partition,
            record: acknowledgment,
        });
        Ok(())
    }
}

/// Build the copy of `command` that travels to a target partition.
pub(crate) fn distributed_copy(
    command: &Record,
    origin_partition: PartitionId,
    distribution_key: u64,
) -> Record {
    Record {
        key: command.key,
        intent: command.intent,
        record_type: RecordType::Command,
        value: command.value.clone(),
        rejection: None,
        position: 0,
        source_position: 0,
        request: None,
        distribution: Some(DistributionMetadata {
            origin_partition,
            distribution_key,
        }),
    }
}

fn has_queued(
    tx: &mut TransactionScope<'_, '_>,
    state: &EngineState,
    queue: u64,
    partition: PartitionId,
) -> Result<bool> {
    let mut found = false;
    state
        .queued_distribution
        .while_equal_prefix(tx, &(queue, partition), |_, _| {
            found = true;
            false
        })?;
    Ok(found)
}

/// Processes distribution records on the origin partition: incoming
/// acknowledgments, and the replay of the distribution lifecycle events.
pub struct DistributionProcessor;

impl DistributionProcessor {
    fn on_acknowledge(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
    ) -> Result<()> {
        let value = distribution_value(command)?;
        let distribution_key = command.key;
        let acknowledging = value.partition;

        let Some(pending) = frame
            .state
            .pending_distribution
            .get(frame.scope, &(distribution_key, acknowledging))?
        else {
            // Redelivered acknowledgment of an already-completed
            // distribution. A normal outcome of at-least-once delivery.
            debug!(
                distribution_key,
                partition = acknowledging,
                "Ignoring acknowledgment with no pending distribution"
            );
            return Ok(());
        };

        frame.writers.state().append_follow_up_event(
            distribution_key,
            Intent::Distribution(DistributionIntent::Acknowledged),
            RecordValue::Distribution(CommandDistributionRecord {
                partition: acknowledging,
                queue_id: pending.queue_id,
                command_key: pending.command_key,
                command_value_type: pending.command_value_type,
                command_intent: pending.command_intent,
                command_value: None,
            }),
        );

        // The distribution is finished once no other partition is
        // still pending. The acknowledged entry itself is removed by
        // the Acknowledged applier right after this check.
        let mut others_pending = false;
        frame.state.pending_distribution.while_equal_prefix(
            frame.scope,
            &distribution_key,
            |(_, partition), _| {
                if partition != acknowledging {
                    others_pending = true;
                    return false;
                }
                true
            },
        )?;
        if !others_pending {
            frame.writers.state().append_follow_up_event(
                distribution_key,
                Intent::Distribution(DistributionIntent::Finished),
                RecordValue::Distribution(CommandDistributionRecord {
                    partition: frame.partition_id,
                    queue_id: pending.queue_id,
                    command_key: pending.command_key,
                    command_value_type: pending.command_value_type,
                    command_intent: pending.command_intent,
                    command_value: None,
                }),
            );
        }

        // Ordered mode: the acknowledgment releases the next queued
        // distribution for this (queue, partition).
        if let Some(queue) = pending.queue_id {
            if let Some(next_key) =
                next_in_queue(frame.scope, &frame.state, queue, acknowledging, distribution_key)?
            {
                let Some(next) = frame
                    .state
                    .pending_distribution
                    .get(frame.scope, &(next_key, acknowledging))?
                else {
                    return Err(StorageError::Corruption(format!(
                        "queued distribution '{next_key}' has no pending entry"
                    ))
                    .into());
                };
                let command = Record {
                    key: next.command_key,
                    intent: next.command_intent,
                    record_type: RecordType::Command,
                    value: next.command_value.clone(),
                    rejection: None,
                    position: 0,
                    source_position: 0,
                    request: None,
                    distribution: None,
                };
                frame.writers.side_effect(SideEffect::SendCommand {
                    target: acknowledging,
                    record: distributed_copy(&command, frame.partition_id, next_key),
                });
            }
        }
        Ok(())
    }
}

fn next_in_queue(
    tx: &mut TransactionScope<'_, '_>,
    state: &EngineState,
    queue: u64,
    partition: PartitionId,
    acknowledged_key: u64,
) -> Result<Option<u64>> {
    let mut next = None;
    state
        .queued_distribution
        .while_equal_prefix(tx, &(queue, partition), |(_, _, key), _| {
            if key == acknowledged_key {
                return true; // removed by the Acknowledged applier
            }
            next = Some(key);
            false
        })?;
    Ok(next)
}

impl RecordProcessor for DistributionProcessor {
    fn process_new_command(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
    ) -> Result<()> {
        match command.intent {
            Intent::Distribution(DistributionIntent::Acknowledge) => {
                self.on_acknowledge(frame, command)
            }
            other => Err(Error::Internal(format!(
                "not a distribution command: {other:?}"
            ))),
        }
    }

    fn process_distributed_command(
        &self,
        _frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
    ) -> Result<()> {
        Err(Error::Internal(format!(
            "distribution records are never themselves distributed: {:?}",
            command.intent
        )))
    }

    fn replay(
        &self,
        tx: &mut TransactionScope<'_, '_>,
        state: &EngineState,
        event: &Record,
    ) -> Result<()> {
        let value = distribution_value(event)?;
        let distribution_key = event.key;
        match event.intent {
            Intent::Distribution(DistributionIntent::Started)
            | Intent::Distribution(DistributionIntent::Finished) => Ok(()),
            Intent::Distribution(DistributionIntent::Distributing) => {
                let command_value = value.command_value.as_deref().cloned().ok_or_else(|| {
                    StorageError::Corruption(format!(
                        "distributing event '{distribution_key}' carries no command value"
                    ))
                })?;
                let entry = (distribution_key, value.partition);
                state.pending_distribution.put(
                    tx,
                    &entry,
                    &PendingDistribution {
                        command_key: value.command_key,
                        command_value_type: value.command_value_type,
                        command_intent: value.command_intent,
                        command_value,
                        queue_id: value.queue_id,
                    },
                )?;
                state.retriable_distribution.put(tx, &entry, &())?;
                if let Some(queue) = value.queue_id {
                    state.queued_distribution.put(
                        tx,
                        &(queue, value.partition, distribution_key),
                        &(),
                    )?;
                }
                state.key_generator.track_key(tx, distribution_key)
            }
            Intent::Distribution(DistributionIntent::Acknowledged) => {
                let entry = (distribution_key, value.partition);
                state.pending_distribution.delete(tx, &entry)?;
                state.retriable_distribution.delete(tx, &entry)?;
                if let Some(queue) = value.queue_id {
                    state.queued_distribution.delete(
                        tx,
                        &(queue, value.partition, distribution_key),
                    )?;
                }
                Ok(())
            }
            other => Err(Error::Internal(format!(
                "not a distribution event: {other:?}"
            ))),
        }
    }
}

fn distribution_value(record: &Record) -> Result<&CommandDistributionRecord> {
    match &record.value {
        RecordValue::Distribution(value) => Ok(value),
        other => Err(Error::Internal(format!(
            "expected distribution value, got {:?}",
            other.value_type()
        ))),
    }
}
