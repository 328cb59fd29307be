//! The record model: the immutable unit of work exchanged between
//! processing steps.
//!
//! Commands express the intent to change state; events express that a
//! change happened. Every accepted command produces at least one
//! follow-up event (or an explicit rejection), and the per-partition
//! `position` is the engine's logical clock.

use crate::types::PartitionId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Whether a record is a command, an event, or a command rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    /// Intent to change state; subject to validation.
    Command,
    /// A persisted fact; replayed during recovery.
    Event,
    /// A validation failure for a command; never mutates state.
    CommandRejection,
}

/// Why a command was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionType {
    /// The addressed entity does not exist.
    NotFound,
    /// The entity exists but its lifecycle state does not admit the command.
    InvalidState,
    /// The command itself is malformed.
    InvalidArgument,
}

/// A structured rejection: type plus deterministic human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub rejection_type: RejectionType,
    pub reason: String,
}

/// Discriminant for the record value payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    UserTask,
    Scope,
    Checkpoint,
    Distribution,
}

/// Intents for user task records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserTaskIntent {
    Create,
    Creating,
    Created,
    Assign,
    Assigning,
    Assigned,
    Claim,
    Update,
    Updating,
    Updated,
    Complete,
    Completing,
    Completed,
    Cancel,
    Canceling,
    Canceled,
}

impl UserTaskIntent {
    /// Lower-case label used in rejection messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Create | Self::Creating | Self::Created => "create",
            Self::Assign | Self::Assigning | Self::Assigned => "assign",
            Self::Claim => "claim",
            Self::Update | Self::Updating | Self::Updated => "update",
            Self::Complete | Self::Completing | Self::Completed => "complete",
            Self::Cancel | Self::Canceling | Self::Canceled => "cancel",
        }
    }
}

/// Intents for process scope records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeIntent {
    Create,
    Created,
    Advance,
    Advanced,
}

/// Intents for checkpoint records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointIntent {
    Create,
    Created,
    Ignored,
}

/// Intents for command distribution records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistributionIntent {
    Started,
    Distributing,
    Acknowledge,
    Acknowledged,
    Finished,
}

/// The intent of a record, scoped by value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    UserTask(UserTaskIntent),
    Scope(ScopeIntent),
    Checkpoint(CheckpointIntent),
    Distribution(DistributionIntent),
}

impl Intent {
    /// The value type this intent belongs to.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::UserTask(_) => ValueType::UserTask,
            Self::Scope(_) => ValueType::Scope,
            Self::Checkpoint(_) => ValueType::Checkpoint,
            Self::Distribution(_) => ValueType::Distribution,
        }
    }
}

/// Value payload of a user task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTaskRecord {
    /// Task display name.
    pub name: String,
    /// Current or requested assignee.
    pub assignee: Option<String>,
    /// Candidate group eligible to claim the task.
    pub candidate_group: Option<String>,
    /// Key of the owning process scope.
    pub scope_key: u64,
}

impl UserTaskRecord {
    /// A minimal task value for the given scope.
    pub fn new(name: impl Into<String>, scope_key: u64) -> Self {
        Self {
            name: name.into(),
            assignee: None,
            candidate_group: None,
            scope_key,
        }
    }

    /// Set the assignee.
    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    /// Set the candidate group.
    pub fn with_candidate_group(mut self, group: impl Into<String>) -> Self {
        self.candidate_group = Some(group.into());
        self
    }
}

/// Value payload of a process scope record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRecord {
    /// Whether the scope accepts further work.
    pub active: bool,
}

impl ScopeRecord {
    pub fn active() -> Self {
        Self { active: true }
    }
}

/// Value payload of a checkpoint record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Monotonic checkpoint id.
    pub checkpoint_id: u64,
    /// Record position at which the checkpoint was taken.
    pub checkpoint_position: u64,
}

/// Value payload of a command distribution record.
///
/// Wraps the command being distributed so that receiving partitions and
/// replay can reconstruct it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDistributionRecord {
    /// The partition this record refers to: the target for
    /// `Distributing`, the acknowledging partition for `Acknowledge` and
    /// `Acknowledged`, the origin for `Started` and `Finished`.
    pub partition: PartitionId,
    /// Ordered-distribution queue, if any.
    pub queue_id: Option<u64>,
    /// Key of the wrapped command.
    pub command_key: u64,
    /// Value type of the wrapped command.
    pub command_value_type: ValueType,
    /// Intent of the wrapped command.
    pub command_intent: Intent,
    /// The wrapped command's value. Absent on acknowledgments.
    pub command_value: Option<Box<RecordValue>>,
}

/// Tagged union of all record value payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordValue {
    UserTask(UserTaskRecord),
    Scope(ScopeRecord),
    Checkpoint(CheckpointRecord),
    Distribution(CommandDistributionRecord),
}

impl RecordValue {
    /// The discriminant of this payload.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::UserTask(_) => ValueType::UserTask,
            Self::Scope(_) => ValueType::Scope,
            Self::Checkpoint(_) => ValueType::Checkpoint,
            Self::Distribution(_) => ValueType::Distribution,
        }
    }
}

/// Correlation data for commands expecting a client response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Stream the gateway expects the response on.
    pub request_stream_id: u32,
    /// Request id within that stream.
    pub request_id: u64,
}

/// Marks a command as having arrived via cross-partition distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionMetadata {
    /// Partition the command was accepted on.
    pub origin_partition: PartitionId,
    /// Key of the distribution this command belongs to.
    pub distribution_key: u64,
}

/// The unit exchanged between processing steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Entity key the record refers to. Zero until allocated.
    pub key: u64,
    /// What the record intends or reports.
    pub intent: Intent,
    /// Command, event, or rejection.
    pub record_type: RecordType,
    /// Typed payload.
    pub value: RecordValue,
    /// Present on rejection records.
    pub rejection: Option<Rejection>,
    /// Per-partition logical clock. Zero until appended.
    pub position: u64,
    /// Position of the record that caused this one. Zero for client commands.
    pub source_position: u64,
    /// Present on commands expecting a client response.
    pub request: Option<RequestMetadata>,
    /// Present on commands received via distribution.
    pub distribution: Option<DistributionMetadata>,
}

impl Record {
    /// Create a fresh command record with no key or position assigned.
    pub fn new_command(intent: Intent, value: RecordValue) -> Self {
        debug_assert_eq!(intent.value_type(), value.value_type());
        Self {
            key: 0,
            intent,
            record_type: RecordType::Command,
            value,
            rejection: None,
            position: 0,
            source_position: 0,
            request: None,
            distribution: None,
        }
    }

    /// Set the entity key.
    pub fn with_key(mut self, key: u64) -> Self {
        self.key = key;
        self
    }

    /// Attach request correlation metadata.
    pub fn with_request(mut self, request: RequestMetadata) -> Self {
        self.request = Some(request);
        self
    }

    /// Attach distribution metadata.
    pub fn with_distribution(mut self, distribution: DistributionMetadata) -> Self {
        self.distribution = Some(distribution);
        self
    }

    /// The payload discriminant.
    pub fn value_type(&self) -> ValueType {
        self.value.value_type()
    }

    /// Whether this command arrived via cross-partition distribution.
    pub fn is_distributed(&self) -> bool {
        self.distribution.is_some()
    }

    /// Serialize for the wire.
    pub fn to_bytes(&self) -> Result<Bytes, bincode::Error> {
        bincode::serialize(self).map(Bytes::from)
    }

    /// Deserialize from the wire.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
