//! Persisted entity types stored in the column families.
//!
//! These are the durable shapes; the wire-level counterparts live in
//! [`crate::record`]. Lifecycle-gated entities carry their state
//! machine status alongside the data, which is what precondition checks
//! test commands against.

use crate::record::{Intent, RecordValue, ValueType};
use serde::{Deserialize, Serialize};

/// Lifecycle states of a user task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Creating,
    Created,
    Assigning,
    Assigned,
    Updating,
    Completing,
    Completed,
    Canceling,
    Canceled,
}

impl LifecycleState {
    /// Display name used in rejection messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Created => "CREATED",
            Self::Assigning => "ASSIGNING",
            Self::Assigned => "ASSIGNED",
            Self::Updating => "UPDATING",
            Self::Completing => "COMPLETING",
            Self::Completed => "COMPLETED",
            Self::Canceling => "CANCELING",
            Self::Canceled => "CANCELED",
        }
    }
}

/// A user task as persisted in the primary task family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTask {
    pub key: u64,
    pub name: String,
    pub assignee: Option<String>,
    pub candidate_group: Option<String>,
    pub scope_key: u64,
    pub lifecycle: LifecycleState,
}

/// An owning process scope. Tasks advance their scope on completion,
/// but only while the scope is still active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessScope {
    pub key: u64,
    pub active: bool,
    /// Number of times the scope has been advanced.
    pub advanced: u64,
}

/// The single checkpoint row. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub checkpoint_id: u64,
    pub checkpoint_position: u64,
}

/// A distribution awaiting acknowledgment from one target partition.
///
/// Keyed by `(distribution_key, target_partition)`. Carries everything
/// needed to rebuild and retransmit the distributed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDistribution {
    /// Key of the wrapped command.
    pub command_key: u64,
    /// Value type of the wrapped command.
    pub command_value_type: ValueType,
    /// Intent of the wrapped command.
    pub command_intent: Intent,
    /// The wrapped command's value.
    pub command_value: RecordValue,
    /// Ordered-distribution queue, if any.
    pub queue_id: Option<u64>,
}
