//! The record-processing state machine contract.
//!
//! One processor per record value type, each implementing exactly three
//! transition entry points:
//!
//! - `process_new_command`: the first time a command is seen on its
//!   origin partition. Validates preconditions, writes follow-up events
//!   (or a rejection), optionally responds to the client, optionally
//!   hands off to command distribution.
//! - `process_distributed_command`: a command received via
//!   distribution. Applies the same mutation as the success path, never
//!   writes a client response, and acknowledges the command so the
//!   origin partition can complete.
//! - `replay`: recovery. Re-applies a previously-written follow-up
//!   event to rebuild state deterministically. Never re-validates,
//!   never writes records or responses, never triggers side effects.
//!
//! Processors mutate state exclusively through `replay`-shared
//! appliers: the live path stages events and the engine immediately
//! feeds them back through `replay` inside the same transaction. What
//! recovery does later is therefore byte-for-byte what processing did
//! live.

use crate::distribution::CommandDistributionBehavior;
use crate::error::Result;
use crate::processing::writers::Writers;
use crate::record::Record;
use crate::state::{EngineState, TransactionScope};
use crate::types::PartitionId;

/// Everything a processor may touch during one processing step.
pub struct ProcessingFrame<'a, 'db, 'ctx> {
    /// The partition this engine runs.
    pub partition_id: PartitionId,
    /// Position of the command being processed.
    pub position: u64,
    /// Column family handles.
    pub state: EngineState,
    /// The step's open transaction.
    pub scope: &'a mut TransactionScope<'db, 'ctx>,
    /// Staged follow-up records, response, and side effects.
    pub writers: &'a mut Writers,
    /// Cross-partition distribution entry point.
    pub distribution: &'a CommandDistributionBehavior,
}

/// The state-machine handler contract, one implementation per value type.
pub trait RecordProcessor: Send + Sync {
    /// Handle a freshly-received command on its origin partition.
    fn process_new_command(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
    ) -> Result<()>;

    /// Handle a command received via cross-partition distribution.
    fn process_distributed_command(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
    ) -> Result<()>;

    /// Re-apply a follow-up event during recovery (and, in the live
    /// path, immediately after it is staged).
    fn replay(
        &self,
        tx: &mut TransactionScope<'_, '_>,
        state: &EngineState,
        event: &Record,
    ) -> Result<()>;
}
