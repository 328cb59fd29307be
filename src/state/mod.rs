//! The typed column-family state store.
//!
//! An embedded, ordered, transactional key-value engine exposing
//! strongly-typed column families. All engine state — the event log,
//! user tasks, scopes, the checkpoint row, distribution bookkeeping,
//! the key generator — persists here, in one shared keyspace scoped by
//! per-family prefixes.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        StateStore                          │
//! │  one ordered keyspace, one-byte prefix per column family   │
//! │                                                            │
//! │  0x01 log                    position   -> Record          │
//! │  0x02 user-tasks             key        -> UserTask        │
//! │  0x03 tasks-by-scope         (scope,key)-> ()              │
//! │  0x04 scopes                 key        -> ProcessScope    │
//! │  0x05 checkpoint             ()         -> CheckpointState │
//! │  0x06 pending-distribution   (dist,part)-> Pending…        │
//! │  0x07 retriable-distribution (dist,part)-> ()              │
//! │  0x08 queued-distribution    (q,part,dist) -> ()           │
//! │  0x09 key-generator          ()         -> u64             │
//! │  0x0A last-processed         ()         -> u64             │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod column_family;
pub mod context;
pub mod entities;
pub mod key_generator;
pub mod store;

pub use codec::{KeyCodec, ValueCodec};
pub use column_family::ColumnFamily;
pub use context::{DbContext, TransactionScope};
pub use entities::{
    CheckpointState, LifecycleState, PendingDistribution, ProcessScope, UserTask,
};
pub use key_generator::KeyGenerator;
pub use store::StateStore;

use crate::error::Result;
use crate::record::Record;
use crate::types::PartitionId;

/// Family prefixes. Stable across releases; never reuse a retired one.
mod prefixes {
    pub const LOG: u8 = 0x01;
    pub const USER_TASKS: u8 = 0x02;
    pub const TASKS_BY_SCOPE: u8 = 0x03;
    pub const SCOPES: u8 = 0x04;
    pub const CHECKPOINT: u8 = 0x05;
    pub const PENDING_DISTRIBUTION: u8 = 0x06;
    pub const RETRIABLE_DISTRIBUTION: u8 = 0x07;
    pub const QUEUED_DISTRIBUTION: u8 = 0x08;
    pub const KEY_GENERATOR: u8 = 0x09;
    pub const LAST_PROCESSED: u8 = 0x0A;
}

/// All column family handles for one partition, registered once at
/// store-open time. Handles are plain typed prefixes, so the whole
/// struct is `Copy` and freely shareable.
#[derive(Debug, Clone, Copy)]
pub struct EngineState {
    /// The event-sourced record log, keyed by position.
    pub log: ColumnFamily<u64, Record>,
    /// User tasks by entity key.
    pub user_tasks: ColumnFamily<u64, UserTask>,
    /// Secondary index: open tasks by owning scope.
    pub tasks_by_scope: ColumnFamily<(u64, u64), ()>,
    /// Process scopes by entity key.
    pub scopes: ColumnFamily<u64, ProcessScope>,
    /// The single monotonic checkpoint row.
    pub checkpoint: ColumnFamily<(), CheckpointState>,
    /// Distributions awaiting acknowledgment, by (distribution, partition).
    pub pending_distribution: ColumnFamily<(u64, PartitionId), PendingDistribution>,
    /// Distributions eligible for retransmission, by (distribution, partition).
    pub retriable_distribution: ColumnFamily<(u64, PartitionId), ()>,
    /// Ordered-distribution queues, by (queue, partition, distribution).
    pub queued_distribution: ColumnFamily<(u64, PartitionId, u64), ()>,
    /// Monotonic entity key allocator.
    pub key_generator: KeyGenerator,
    /// Position of the last record whose effects are reflected in state.
    /// Replay skips events at or below it.
    pub last_processed: ColumnFamily<(), u64>,
}

impl EngineState {
    /// Register every column family. Called once per store.
    pub fn new(store: &StateStore, partition_id: PartitionId) -> Result<Self> {
        let key_generator_family =
            store.open_column_family("key-generator", prefixes::KEY_GENERATOR)?;
        Ok(Self {
            log: store.open_column_family("log", prefixes::LOG)?,
            user_tasks: store.open_column_family("user-tasks", prefixes::USER_TASKS)?,
            tasks_by_scope: store
                .open_column_family("tasks-by-scope", prefixes::TASKS_BY_SCOPE)?,
            scopes: store.open_column_family("scopes", prefixes::SCOPES)?,
            checkpoint: store.open_column_family("checkpoint", prefixes::CHECKPOINT)?,
            pending_distribution: store
                .open_column_family("pending-distribution", prefixes::PENDING_DISTRIBUTION)?,
            retriable_distribution: store
                .open_column_family("retriable-distribution", prefixes::RETRIABLE_DISTRIBUTION)?,
            queued_distribution: store
                .open_column_family("queued-distribution", prefixes::QUEUED_DISTRIBUTION)?,
            key_generator: KeyGenerator::new(partition_id, key_generator_family),
            last_processed: store.open_column_family("last-processed", prefixes::LAST_PROCESSED)?,
        })
    }
}
