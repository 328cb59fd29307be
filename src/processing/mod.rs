//! The record-processing state machine.
//!
//! Dispatch is a plain table from value type to handler, built once at
//! partition startup — an explicit composition root instead of runtime
//! discovery. Each handler implements the three-entry-point
//! [`RecordProcessor`] contract; precondition checks and the staged
//! [`Writers`] facade are shared across handlers.

pub mod preconditions;
pub mod processor;
pub mod scope;
pub mod user_task;
pub mod writers;

pub use processor::{ProcessingFrame, RecordProcessor};
pub use writers::{CommandResponse, SideEffect, Writers};

use crate::checkpoint::CheckpointProcessor;
use crate::distribution::DistributionProcessor;
use crate::record::ValueType;
use scope::ScopeProcessor;
use std::collections::HashMap;
use user_task::UserTaskProcessor;

/// Build the value-type dispatch table. The composition root: every
/// handler the engine knows is listed here, explicitly.
pub fn build_dispatch() -> HashMap<ValueType, Box<dyn RecordProcessor>> {
    let mut table: HashMap<ValueType, Box<dyn RecordProcessor>> = HashMap::new();
    table.insert(ValueType::UserTask, Box::new(UserTaskProcessor));
    table.insert(ValueType::Scope, Box::new(ScopeProcessor));
    table.insert(ValueType::Checkpoint, Box::new(CheckpointProcessor));
    table.insert(ValueType::Distribution, Box::new(DistributionProcessor));
    table
}
