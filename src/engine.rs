//! The partition engine: one logical thread applying records against
//! the state store.
//!
//! Each record is processed in exactly one transaction: the command is
//! appended to the log, dispatched to its handler, the staged follow-up
//! events are appended and applied, and the step commits. Side effects
//! — client responses, cross-partition transmissions, backup triggers —
//! run only after the commit, so a rolled-back step leaves nothing
//! behind anywhere.
//!
//! On restart, [`PartitionEngine::recover`] replays the persisted
//! events in position order through the handlers' replay path,
//! skipping everything already reflected in state, and never re-runs
//! side effects.

use crate::checkpoint::{BackupManager, CheckpointCoordinator};
use crate::config::EngineConfig;
use crate::distribution::{CommandDistributionBehavior, PartitionTransport, Redistributor};
use crate::error::{Error, Result};
use crate::metrics::EngineMetrics;
use crate::processing::processor::ProcessingFrame;
use crate::processing::writers::{CommandResponse, SideEffect, Writers};
use crate::processing::{build_dispatch, RecordProcessor};
use crate::record::{
    CheckpointIntent, DistributionIntent, Intent, Record, RecordType, ValueType,
};
use crate::state::{DbContext, EngineState, StateStore};
use crate::types::PartitionId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one processing step produced.
#[derive(Debug)]
pub struct ProcessingOutcome {
    /// Position assigned to the processed command.
    pub position: u64,
    /// The command as appended, followed by its follow-up records.
    pub records: Vec<Record>,
    /// Client response, present only for fresh commands with a request.
    pub response: Option<CommandResponse>,
    /// Side effects staged by the step (already executed by
    /// [`PartitionEngine::submit`]).
    pub side_effects: Vec<SideEffect>,
    /// Number of follow-up commands enqueued for later steps.
    pub enqueued_commands: usize,
}

/// What recovery found and rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    /// Events actually re-applied (those above the last processed
    /// position).
    pub events_replayed: u64,
    /// Highest position on the log.
    pub last_position: u64,
}

/// One partition's processing pipeline.
pub struct PartitionEngine {
    config: EngineConfig,
    store: StateStore,
    state: EngineState,
    processors: HashMap<ValueType, Box<dyn RecordProcessor>>,
    distribution: CommandDistributionBehavior,
    checkpoint: Arc<CheckpointCoordinator>,
    transport: Arc<dyn PartitionTransport>,
    backup: Arc<dyn BackupManager>,
    metrics: Arc<EngineMetrics>,
    ctx: DbContext,
    next_position: u64,
    queue: VecDeque<Record>,
}

impl PartitionEngine {
    /// Open the store, register the column families, and wire the
    /// processors. Call [`Self::recover`] before processing.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn PartitionTransport>,
        backup: Arc<dyn BackupManager>,
    ) -> Result<Self> {
        if config.partition_id == 0 || config.partition_id > config.partition_count {
            return Err(Error::Config(format!(
                "partition id {} outside 1..={}",
                config.partition_id, config.partition_count
            )));
        }
        let store = StateStore::open(&config.store)?;
        let state = EngineState::new(&store, config.partition_id)?;
        let distribution =
            CommandDistributionBehavior::new(config.partition_id, config.partition_count);

        Ok(Self {
            store,
            state,
            processors: build_dispatch(),
            distribution,
            checkpoint: Arc::new(CheckpointCoordinator::new()),
            transport,
            backup,
            metrics: Arc::new(EngineMetrics::new()),
            ctx: DbContext::new(),
            next_position: 1,
            queue: VecDeque::new(),
            config,
        })
    }

    /// Replay persisted events in position order to rebuild derived
    /// state, then initialize the checkpoint coordinator.
    ///
    /// Events at or below the persisted last-processed position are
    /// already reflected in state and are skipped; replay never
    /// validates, responds, transmits, or triggers backups.
    pub fn recover(&mut self) -> Result<ReplayReport> {
        let replay_floor = self
            .store
            .read(&self.state.last_processed, &mut self.ctx, &())?
            .unwrap_or(0);

        let mut events = Vec::new();
        let mut last_position = 0;
        self.store.scan(&self.state.log, |position, record| {
            last_position = position;
            if record.record_type == RecordType::Event && position > replay_floor {
                events.push(record);
            }
            true
        })?;

        let state = self.state;
        let processors = &self.processors;
        let events_replayed = if last_position == 0 {
            0
        } else {
            self.store.run_in_transaction(&mut self.ctx, |tx| {
                let mut replayed = 0u64;
                for event in &events {
                    processor_for(processors, event.value_type())?.replay(tx, &state, event)?;
                    replayed += 1;
                }
                state.last_processed.put(tx, &(), &last_position)?;
                Ok(replayed)
            })?
        };

        self.next_position = last_position + 1;
        let current = self.store.read(&self.state.checkpoint, &mut self.ctx, &())?;
        self.checkpoint.initialize(current);
        self.metrics.record_replayed(events_replayed);

        info!(
            partition_id = self.config.partition_id,
            events_replayed, last_position, "Recovery complete"
        );
        Ok(ReplayReport {
            events_replayed,
            last_position,
        })
    }

    /// Process one command: validate, mutate, persist — all in one
    /// transaction. Side effects are staged into the outcome, not yet
    /// executed; [`Self::submit`] is the all-in-one entry point.
    pub fn process_command(&mut self, mut command: Record) -> Result<ProcessingOutcome> {
        if command.record_type != RecordType::Command {
            return Err(Error::Internal(format!(
                "only commands are processed, got {:?}",
                command.record_type
            )));
        }
        let position = self.next_position;
        command.position = position;

        debug!(
            partition_id = self.config.partition_id,
            position,
            intent = ?command.intent,
            distributed = command.is_distributed(),
            "Processing command"
        );

        let state = self.state;
        let partition_id = self.config.partition_id;
        let distribution = &self.distribution;
        let processors = &self.processors;

        let (followups, commands, response, side_effects) =
            self.store.run_in_transaction(&mut self.ctx, |tx| {
                state.log.put(tx, &position, &command)?;

                let mut writers = Writers::new(partition_id, position, position + 1);
                let processor = processor_for(processors, command.value_type())?;
                {
                    let mut frame = ProcessingFrame {
                        partition_id,
                        position,
                        state,
                        scope: tx,
                        writers: &mut writers,
                        distribution,
                    };
                    if command.is_distributed() {
                        processor.process_distributed_command(&mut frame, &command)?;
                    } else {
                        processor.process_new_command(&mut frame, &command)?;
                    }
                }

                let (followups, commands, response, side_effects) = writers.into_parts();
                let mut last_position = position;
                for record in &followups {
                    state.log.put(tx, &record.position, record)?;
                    last_position = record.position;
                    if record.record_type == RecordType::Event {
                        processor_for(processors, record.value_type())?
                            .replay(tx, &state, record)?;
                    }
                }
                state.last_processed.put(tx, &(), &last_position)?;
                Ok((followups, commands, response, side_effects))
            })?;

        self.next_position = position + 1 + followups.len() as u64;
        self.account(&followups);

        // Listener notification is synchronous and post-commit; the
        // remaining side effects need the async executor.
        for effect in &side_effects {
            if let SideEffect::CheckpointCommitted {
                checkpoint_id,
                position,
            } = effect
            {
                self.checkpoint.on_committed(*checkpoint_id, *position);
            }
        }

        let enqueued_commands = commands.len();
        self.queue.extend(commands);

        let mut records = Vec::with_capacity(1 + followups.len());
        records.push(command);
        records.extend(followups);

        Ok(ProcessingOutcome {
            position,
            records,
            response,
            side_effects,
            enqueued_commands,
        })
    }

    /// Process a command, execute its side effects, and drain the
    /// follow-up command queue.
    pub async fn submit(&mut self, command: Record) -> Result<ProcessingOutcome> {
        let outcome = self.process_command(command)?;
        self.execute_side_effects(&outcome.side_effects).await;
        self.drain().await?;
        Ok(outcome)
    }

    /// Process queued follow-up commands until none remain.
    pub async fn drain(&mut self) -> Result<usize> {
        let mut processed = 0;
        while let Some(next) = self.queue.pop_front() {
            let outcome = self.process_command(next)?;
            self.execute_side_effects(&outcome.side_effects).await;
            processed += 1;
        }
        Ok(processed)
    }

    /// Execute post-commit side effects. Transmission failures are
    /// logged and left to the redistribution loop; backups are
    /// fire-and-forget.
    pub async fn execute_side_effects(&self, effects: &[SideEffect]) {
        for effect in effects {
            match effect {
                SideEffect::SendCommand { target, record } => {
                    match self.transport.send_command(*target, record.clone()).await {
                        Ok(()) => self.metrics.record_transmission(),
                        Err(err) => {
                            warn!(
                                target_partition = target,
                                error = %err,
                                "Transmission failed; left pending for redistribution"
                            );
                        }
                    }
                }
                SideEffect::TriggerBackup {
                    checkpoint_id,
                    position,
                } => {
                    let backup = Arc::clone(&self.backup);
                    let (id, at) = (*checkpoint_id, *position);
                    tokio::spawn(async move { backup.take_backup(id, at).await });
                }
                SideEffect::CheckpointCommitted { .. } => {
                    // Already applied synchronously after commit.
                }
            }
        }
    }

    fn account(&self, followups: &[Record]) {
        self.metrics.record_processed();
        for record in followups {
            match (record.record_type, record.intent) {
                (RecordType::CommandRejection, _) => self.metrics.record_rejected(),
                (_, Intent::Distribution(DistributionIntent::Started)) => {
                    self.metrics.record_distribution_started()
                }
                (_, Intent::Distribution(DistributionIntent::Finished)) => {
                    self.metrics.record_distribution_finished()
                }
                (_, Intent::Checkpoint(CheckpointIntent::Created)) => {
                    self.metrics.record_checkpoint_created()
                }
                (_, Intent::Checkpoint(CheckpointIntent::Ignored)) => {
                    self.metrics.record_checkpoint_ignored()
                }
                _ => {}
            }
        }
    }

    /// Build the redistribution loop for this partition. Runs beside
    /// the engine; reads only committed state.
    pub fn redistributor(&self) -> Redistributor {
        Redistributor::new(
            self.config.partition_id,
            self.config.distribution.clone(),
            self.store.clone(),
            self.state,
            Arc::clone(&self.transport),
        )
    }

    pub fn partition_id(&self) -> PartitionId {
        self.config.partition_id
    }

    pub fn next_position(&self) -> u64 {
        self.next_position
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn checkpoint_coordinator(&self) -> &Arc<CheckpointCoordinator> {
        &self.checkpoint
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }
}

impl std::fmt::Debug for PartitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionEngine")
            .field("partition_id", &self.config.partition_id)
            .field("next_position", &self.next_position)
            .field("queued_commands", &self.queue.len())
            .finish()
    }
}

fn processor_for<'a>(
    processors: &'a HashMap<ValueType, Box<dyn RecordProcessor>>,
    value_type: ValueType,
) -> Result<&'a dyn RecordProcessor> {
    processors
        .get(&value_type)
        .map(|b| b.as_ref())
        .ok_or_else(|| Error::Internal(format!("no processor for {value_type:?}")))
}
