//! Shared helpers for the integration tests.

use crate::checkpoint::RecordingBackupManager;
use crate::config::{DistributionConfig, EngineConfig, StoreConfig};
use crate::distribution::LoopbackTransport;
use crate::engine::{PartitionEngine, ProcessingOutcome};
use crate::error::Result;
use crate::record::{
    CheckpointIntent, CheckpointRecord, Intent, Record, RecordValue, RequestMetadata, ScopeIntent,
    ScopeRecord, UserTaskIntent, UserTaskRecord,
};
use crate::types::PartitionId;
use bytes::Bytes;
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::sleep;

static TRACING: Once = Once::new();

/// Route test logs through the test writer; `RUST_LOG` filters.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A small in-process deployment: one engine per partition, loopback
/// transport between them, one recording backup manager per partition.
pub(crate) struct TestFabric {
    pub engines: Vec<PartitionEngine>,
    pub transport: Arc<LoopbackTransport>,
    pub backups: Vec<Arc<RecordingBackupManager>>,
    inboxes: Vec<mpsc::UnboundedReceiver<Bytes>>,
    _dirs: Vec<TempDir>,
}

impl TestFabric {
    /// Build and recover `partition_count` engines.
    pub fn new(partition_count: u32) -> Self {
        init_tracing();
        let transport = Arc::new(LoopbackTransport::new());
        let mut engines = Vec::new();
        let mut inboxes = Vec::new();
        let mut backups = Vec::new();
        let mut dirs = Vec::new();

        for partition_id in 1..=partition_count {
            let dir = TempDir::new().unwrap();
            let config = EngineConfig::new(partition_id, partition_count, dir.path())
                .with_store_config(StoreConfig::new(dir.path()).with_sync_writes(false))
                .with_distribution_config(
                    DistributionConfig::default()
                        .with_scan_interval(Duration::from_millis(10))
                        .with_initial_backoff(Duration::from_millis(1)),
                );
            let backup = Arc::new(RecordingBackupManager::new());
            inboxes.push(transport.register(partition_id));
            let mut engine = PartitionEngine::new(
                config,
                Arc::clone(&transport) as Arc<dyn crate::distribution::PartitionTransport>,
                Arc::clone(&backup) as Arc<dyn crate::checkpoint::BackupManager>,
            )
            .unwrap();
            engine.recover().unwrap();
            engines.push(engine);
            backups.push(backup);
            dirs.push(dir);
        }

        Self {
            engines,
            transport,
            backups,
            inboxes,
            _dirs: dirs,
        }
    }

    pub fn engine(&mut self, partition: PartitionId) -> &mut PartitionEngine {
        &mut self.engines[(partition - 1) as usize]
    }

    /// Submit a command to one partition.
    pub async fn submit(
        &mut self,
        partition: PartitionId,
        command: Record,
    ) -> Result<ProcessingOutcome> {
        self.engine(partition).submit(command).await
    }

    /// Deliver queued cross-partition traffic until nothing moves.
    pub async fn pump(&mut self) {
        loop {
            let mut any = false;
            for idx in 0..self.engines.len() {
                while let Ok(bytes) = self.inboxes[idx].try_recv() {
                    let record = Record::from_bytes(&bytes).unwrap();
                    self.engines[idx].submit(record).await.unwrap();
                    any = true;
                }
            }
            if !any {
                break;
            }
        }
    }
}

/// Wait until `predicate` holds, polling, up to `timeout`.
pub(crate) async fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    predicate()
}

pub(crate) fn create_scope() -> Record {
    Record::new_command(
        Intent::Scope(ScopeIntent::Create),
        RecordValue::Scope(ScopeRecord::active()),
    )
}

pub(crate) fn create_task(scope_key: u64, name: &str) -> Record {
    Record::new_command(
        Intent::UserTask(UserTaskIntent::Create),
        RecordValue::UserTask(UserTaskRecord::new(name, scope_key)),
    )
}

pub(crate) fn assign_task(task_key: u64, assignee: &str) -> Record {
    Record::new_command(
        Intent::UserTask(UserTaskIntent::Assign),
        RecordValue::UserTask(UserTaskRecord::new("", 0).with_assignee(assignee)),
    )
    .with_key(task_key)
}

pub(crate) fn claim_task(task_key: u64, claimant: &str) -> Record {
    Record::new_command(
        Intent::UserTask(UserTaskIntent::Claim),
        RecordValue::UserTask(UserTaskRecord::new("", 0).with_assignee(claimant)),
    )
    .with_key(task_key)
}

pub(crate) fn complete_task(task_key: u64) -> Record {
    Record::new_command(
        Intent::UserTask(UserTaskIntent::Complete),
        RecordValue::UserTask(UserTaskRecord::new("", 0)),
    )
    .with_key(task_key)
}

pub(crate) fn create_checkpoint(checkpoint_id: u64) -> Record {
    Record::new_command(
        Intent::Checkpoint(CheckpointIntent::Create),
        RecordValue::Checkpoint(CheckpointRecord {
            checkpoint_id,
            checkpoint_position: 0,
        }),
    )
}

pub(crate) fn with_request(record: Record) -> Record {
    record.with_request(RequestMetadata {
        request_stream_id: 1,
        request_id: 1,
    })
}

/// The key the engine assigned to the entity created by this outcome.
pub(crate) fn created_key(outcome: &ProcessingOutcome) -> u64 {
    outcome.records[1].key
}
