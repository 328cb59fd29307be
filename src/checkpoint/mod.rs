//! Checkpoint coordination.
//!
//! A checkpoint is a monotonically increasing marker used to coordinate
//! backups: `NoCheckpoint → Checkpointed(id, position)`, transitions
//! only forward. A `Create` command with an id above the current one is
//! accepted — persisted, announced as `Created`, handed to the backup
//! manager, broadcast to listeners; anything else is answered with an
//! `Ignored` event echoing the *current* id and position. Replay of
//! `Created` restores the row without re-triggering the backup.
//!
//! Checkpoint creation fans out to the other partitions (unordered
//! distribution), so one management command checkpoints the whole
//! deployment, each partition at its own position.

pub mod backup;

pub use backup::{BackupManager, FsBackupManager, NoopBackupManager, RecordingBackupManager};

use crate::error::{Error, Result};
use crate::processing::processor::{ProcessingFrame, RecordProcessor};
use crate::processing::writers::SideEffect;
use crate::record::{CheckpointIntent, CheckpointRecord, Intent, Record, RecordValue};
use crate::state::{CheckpointState, EngineState, TransactionScope};
use crate::types::DistributionOrdering;
use parking_lot::Mutex;
use tracing::{debug, info};

/// Observer of committed checkpoints.
pub trait CheckpointListener: Send {
    fn on_checkpoint(&self, checkpoint_id: u64);
}

impl<F: Fn(u64) + Send> CheckpointListener for F {
    fn on_checkpoint(&self, checkpoint_id: u64) {
        self(checkpoint_id)
    }
}

/// Tracks the committed checkpoint in memory and fans it out to
/// listeners.
///
/// Listener registration is itself stateful: registering after a
/// checkpoint has committed notifies immediately with the current id;
/// registering before initialization queues the listener until the
/// persisted state has been scanned.
pub struct CheckpointCoordinator {
    inner: Mutex<CoordinatorInner>,
}

#[derive(Default)]
struct CoordinatorInner {
    initialized: bool,
    current: Option<CheckpointState>,
    listeners: Vec<Box<dyn CheckpointListener>>,
    pending: Vec<Box<dyn CheckpointListener>>,
}

impl CheckpointCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CoordinatorInner::default()),
        }
    }

    /// Register a listener.
    pub fn register_listener(&self, listener: Box<dyn CheckpointListener>) {
        let mut inner = self.inner.lock();
        if !inner.initialized {
            inner.pending.push(listener);
            return;
        }
        if let Some(current) = inner.current {
            listener.on_checkpoint(current.checkpoint_id);
        }
        inner.listeners.push(listener);
    }

    /// Finish initialization with the state recovered from the store,
    /// flushing listeners that registered early.
    pub fn initialize(&self, current: Option<CheckpointState>) {
        let mut inner = self.inner.lock();
        inner.current = current;
        inner.initialized = true;
        let pending = std::mem::take(&mut inner.pending);
        for listener in pending {
            if let Some(current) = inner.current {
                listener.on_checkpoint(current.checkpoint_id);
            }
            inner.listeners.push(listener);
        }
        debug!(current = ?inner.current, "Checkpoint coordinator initialized");
    }

    /// A new checkpoint committed; update and notify.
    pub fn on_committed(&self, checkpoint_id: u64, checkpoint_position: u64) {
        let mut inner = self.inner.lock();
        debug_assert!(
            inner
                .current
                .map_or(true, |c| checkpoint_id > c.checkpoint_id),
            "checkpoint ids only move forward"
        );
        inner.current = Some(CheckpointState {
            checkpoint_id,
            checkpoint_position,
        });
        info!(checkpoint_id, checkpoint_position, "Checkpoint committed");
        for listener in &inner.listeners {
            listener.on_checkpoint(checkpoint_id);
        }
    }

    /// The committed checkpoint, if any.
    pub fn current(&self) -> Option<CheckpointState> {
        self.inner.lock().current
    }
}

impl Default for CheckpointCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CheckpointCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CheckpointCoordinator")
            .field("initialized", &inner.initialized)
            .field("current", &inner.current)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

/// Processes checkpoint records.
pub struct CheckpointProcessor;

impl CheckpointProcessor {
    fn on_create(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
        distribute: bool,
    ) -> Result<()> {
        let requested = checkpoint_value(command)?.checkpoint_id;
        let current = frame.state.checkpoint.get(frame.scope, &())?;
        let current_id = current.map_or(0, |c| c.checkpoint_id);

        if requested > current_id {
            let record = CheckpointRecord {
                checkpoint_id: requested,
                checkpoint_position: frame.position,
            };
            frame.writers.state().append_follow_up_event(
                command.key,
                Intent::Checkpoint(CheckpointIntent::Created),
                RecordValue::Checkpoint(record),
            );
            frame.writers.response().write_event_response(
                command,
                command.key,
                Intent::Checkpoint(CheckpointIntent::Created),
                RecordValue::Checkpoint(record),
            );
            frame.writers.side_effect(SideEffect::TriggerBackup {
                checkpoint_id: requested,
                position: frame.position,
            });
            frame.writers.side_effect(SideEffect::CheckpointCommitted {
                checkpoint_id: requested,
                position: frame.position,
            });

            if distribute && frame.distribution.has_targets() {
                let distribution_key = frame.state.key_generator.next_key(frame.scope)?;
                let distribution = frame.distribution;
                distribution.distribute(
                    frame,
                    distribution_key,
                    command,
                    DistributionOrdering::Unordered,
                )?;
            }
        } else {
            // Stale or duplicate request: echo the current state, touch
            // nothing, trigger nothing.
            let echo = current.unwrap_or(CheckpointState {
                checkpoint_id: 0,
                checkpoint_position: 0,
            });
            let record = CheckpointRecord {
                checkpoint_id: echo.checkpoint_id,
                checkpoint_position: echo.checkpoint_position,
            };
            frame.writers.state().append_follow_up_event(
                command.key,
                Intent::Checkpoint(CheckpointIntent::Ignored),
                RecordValue::Checkpoint(record),
            );
            frame.writers.response().write_event_response(
                command,
                command.key,
                Intent::Checkpoint(CheckpointIntent::Ignored),
                RecordValue::Checkpoint(record),
            );
        }
        Ok(())
    }
}

impl RecordProcessor for CheckpointProcessor {
    fn process_new_command(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
    ) -> Result<()> {
        match command.intent {
            Intent::Checkpoint(CheckpointIntent::Create) => self.on_create(frame, command, true),
            other => Err(Error::Internal(format!(
                "not a checkpoint command: {other:?}"
            ))),
        }
    }

    fn process_distributed_command(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
    ) -> Result<()> {
        match command.intent {
            Intent::Checkpoint(CheckpointIntent::Create) => {
                self.on_create(frame, command, false)?;
            }
            other => {
                return Err(Error::Internal(format!(
                    "checkpoint command is not distributable: {other:?}"
                )))
            }
        }
        let distribution = frame.distribution;
        distribution.acknowledge(frame, command)
    }

    fn replay(
        &self,
        tx: &mut TransactionScope<'_, '_>,
        state: &EngineState,
        event: &Record,
    ) -> Result<()> {
        match event.intent {
            Intent::Checkpoint(CheckpointIntent::Created) => {
                let value = checkpoint_value(event)?;
                state.checkpoint.put(
                    tx,
                    &(),
                    &CheckpointState {
                        checkpoint_id: value.checkpoint_id,
                        checkpoint_position: value.checkpoint_position,
                    },
                )
            }
            Intent::Checkpoint(CheckpointIntent::Ignored) => Ok(()),
            other => Err(Error::Internal(format!(
                "not a checkpoint event: {other:?}"
            ))),
        }
    }
}

fn checkpoint_value(record: &Record) -> Result<&CheckpointRecord> {
    match &record.value {
        RecordValue::Checkpoint(value) => Ok(value),
        other => Err(Error::Internal(format!(
            "expected checkpoint value, got {:?}",
            other.value_type()
        ))),
    }
}
