//! Partitioned, event-sourced command processing core for workflow
//! orchestration.
//!
//! For each partition, a single logical thread applies incoming
//! commands against a durable, transactional key-value state store,
//! producing deterministic follow-up events — and, for operations that
//! must be visible on every partition, replicates the command to all
//! partitions and waits for acknowledgment before completing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                PartitionEngine                  │
//! │  one transaction per record, replay on restart  │
//! └─────────────────────────────────────────────────┘
//!          │               │                │
//!          ▼               ▼                ▼
//! ┌───────────────┐ ┌─────────────┐ ┌──────────────┐
//! │   Record      │ │  Command    │ │  Checkpoint  │
//! │  Processors   │ │Distribution │ │ Coordinator  │
//! │ (per value    │ │ (fan-out /  │ │ (monotonic,  │
//! │  type)        │ │  acknowledge│ │  backups)    │
//! └───────────────┘ └─────────────┘ └──────────────┘
//!          │               │                │
//!          └───────────────┼────────────────┘
//!                          ▼
//! ┌─────────────────────────────────────────────────┐
//! │                   StateStore                    │
//! │   typed column families over one ordered,       │
//! │   transactional keyspace (RocksDB)              │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use flowcore::{
//!     CheckpointIntent, EngineConfig, Intent, LoopbackTransport, NoopBackupManager,
//!     PartitionEngine, Record, RecordValue, CheckpointRecord,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(LoopbackTransport::new());
//!     let config = EngineConfig::new(1, 1, "./partition-1");
//!     let mut engine =
//!         PartitionEngine::new(config, transport, Arc::new(NoopBackupManager))?;
//!     engine.recover()?;
//!
//!     let outcome = engine
//!         .submit(Record::new_command(
//!             Intent::Checkpoint(CheckpointIntent::Create),
//!             RecordValue::Checkpoint(CheckpointRecord {
//!                 checkpoint_id: 1,
//!                 checkpoint_position: 0,
//!             }),
//!         ))
//!         .await?;
//!     println!("processed at position {}", outcome.position);
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency model
//!
//! Parallelism exists *across* partitions, each with its own store and
//! engine. Within a partition, records are applied strictly in
//! increasing position order by a single logical thread; transactions
//! never cross an `await`. Cross-partition distribution and backups are
//! asynchronous side effects executed after commit.

pub mod checkpoint;
pub mod config;
pub mod distribution;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod processing;
pub mod record;
pub mod state;
pub mod testing;
pub mod types;

// Re-export main types for convenience.
pub use checkpoint::{
    BackupManager, CheckpointCoordinator, CheckpointListener, CheckpointProcessor,
    FsBackupManager, NoopBackupManager, RecordingBackupManager,
};
pub use config::{CheckpointConfig, DistributionConfig, EngineConfig, StoreConfig};
pub use distribution::{
    CommandDistributionBehavior, LoopbackTransport, PartitionTransport, Redistributor,
};
pub use engine::{PartitionEngine, ProcessingOutcome, ReplayReport};
pub use error::{
    BackupError, DistributionError, Error, Result, SchemaError, StorageError,
};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use processing::{CommandResponse, ProcessingFrame, RecordProcessor, SideEffect, Writers};
pub use record::{
    CheckpointIntent, CheckpointRecord, CommandDistributionRecord, DistributionIntent,
    DistributionMetadata, Intent, Record, RecordType, RecordValue, Rejection, RejectionType,
    RequestMetadata, ScopeIntent, ScopeRecord, UserTaskIntent, UserTaskRecord, ValueType,
};
pub use state::{
    CheckpointState, ColumnFamily, DbContext, EngineState, KeyCodec, KeyGenerator,
    LifecycleState, ProcessScope, StateStore, TransactionScope, UserTask, ValueCodec,
};
pub use types::{DistributionOrdering, PartitionId};
