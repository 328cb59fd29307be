//! The writers facade handed to record processors.
//!
//! Processors never write to the log, the response channel, or the
//! transport directly. They stage everything here during the
//! processing step; the engine drains the staged work inside the same
//! transaction (follow-up records) or after commit (responses and side
//! effects). A rolled-back step therefore leaves no trace anywhere.

use crate::record::{
    Intent, Record, RecordType, RecordValue, Rejection, RejectionType, RequestMetadata,
};
use crate::types::PartitionId;
use tracing::debug;

/// A post-commit side effect staged during processing.
///
/// Side effects are executed only after the step's transaction has
/// committed, and never during replay.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Transmit a command to another partition.
    SendCommand { target: PartitionId, record: Record },
    /// Ask the backup manager for a backup. Fire-and-forget.
    TriggerBackup { checkpoint_id: u64, position: u64 },
    /// Notify checkpoint listeners of a newly committed checkpoint.
    CheckpointCommitted { checkpoint_id: u64, position: u64 },
}

/// A response to the client that issued a command.
///
/// Written only on the origin partition, only for fresh commands.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub partition_id: PartitionId,
    pub key: u64,
    pub intent: Intent,
    pub record_type: RecordType,
    pub value: Option<RecordValue>,
    pub rejection: Option<Rejection>,
    pub request: RequestMetadata,
}

/// Buffered writers for one processing step.
#[derive(Debug)]
pub struct Writers {
    partition_id: PartitionId,
    command_position: u64,
    next_position: u64,
    followups: Vec<Record>,
    commands: Vec<Record>,
    response: Option<CommandResponse>,
    side_effects: Vec<SideEffect>,
}

impl Writers {
    pub(crate) fn new(
        partition_id: PartitionId,
        command_position: u64,
        first_followup_position: u64,
    ) -> Self {
        Self {
            partition_id,
            command_position,
            next_position: first_followup_position,
            followups: Vec::new(),
            commands: Vec::new(),
            response: None,
            side_effects: Vec::new(),
        }
    }

    /// The state writer: stages follow-up events.
    pub fn state(&mut self) -> StateWriter<'_> {
        StateWriter { writers: self }
    }

    /// The command writer: stages follow-up commands.
    pub fn command(&mut self) -> CommandWriter<'_> {
        CommandWriter { writers: self }
    }

    /// The response writer: stages the client response.
    pub fn response(&mut self) -> ResponseWriter<'_> {
        ResponseWriter { writers: self }
    }

    /// The rejection writer: stages a rejection record plus response.
    pub fn rejection(&mut self) -> RejectionWriter<'_> {
        RejectionWriter { writers: self }
    }

    /// Stage a post-commit side effect.
    pub fn side_effect(&mut self, effect: SideEffect) {
        self.side_effects.push(effect);
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Vec<Record>,
        Vec<Record>,
        Option<CommandResponse>,
        Vec<SideEffect>,
    ) {
        (self.followups, self.commands, self.response, self.side_effects)
    }

    fn stage_followup(&mut self, mut record: Record) -> u64 {
        let position = self.next_position;
        self.next_position += 1;
        record.position = position;
        record.source_position = self.command_position;
        self.followups.push(record);
        position
    }
}

/// Stages follow-up events, the persisted facts of the event-sourced log.
#[derive(Debug)]
pub struct StateWriter<'a> {
    writers: &'a mut Writers,
}

impl StateWriter<'_> {
    /// Stage a follow-up event and return its position.
    pub fn append_follow_up_event(&mut self, key: u64, intent: Intent, value: RecordValue) -> u64 {
        debug_assert_eq!(intent.value_type(), value.value_type());
        self.writers.stage_followup(Record {
            key,
            intent,
            record_type: RecordType::Event,
            value,
            rejection: None,
            position: 0,
            source_position: 0,
            request: None,
            distribution: None,
        })
    }
}

/// Stages follow-up commands, processed as their own steps after commit.
#[derive(Debug)]
pub struct CommandWriter<'a> {
    writers: &'a mut Writers,
}

impl CommandWriter<'_> {
    /// Stage a follow-up command. It receives its own position when the
    /// engine processes it.
    pub fn append_follow_up_command(&mut self, key: u64, intent: Intent, value: RecordValue) {
        debug_assert_eq!(intent.value_type(), value.value_type());
        self.writers.commands.push(Record {
            key,
            intent,
            record_type: RecordType::Command,
            value,
            rejection: None,
            position: 0,
            source_position: self.writers.command_position,
            request: None,
            distribution: None,
        });
    }
}

/// Stages the success response for the command being processed.
#[derive(Debug)]
pub struct ResponseWriter<'a> {
    writers: &'a mut Writers,
}

impl ResponseWriter<'_> {
    /// Stage a success response echoing the given event.
    ///
    /// No-op when the command carries no request metadata, or when it
    /// arrived via distribution (the origin already responded).
    pub fn write_event_response(
        &mut self,
        command: &Record,
        key: u64,
        intent: Intent,
        value: RecordValue,
    ) {
        if command.is_distributed() {
            debug!("Suppressing response for distributed command");
            return;
        }
        let Some(request) = command.request else {
            return;
        };
        self.writers.response = Some(CommandResponse {
            partition_id: self.writers.partition_id,
            key,
            intent,
            record_type: RecordType::Event,
            value: Some(value),
            rejection: None,
            request,
        });
    }
}

/// Stages a command rejection: a rejection record on the log plus, for
/// fresh commands with a request, a rejection response.
#[derive(Debug)]
pub struct RejectionWriter<'a> {
    writers: &'a mut Writers,
}

impl RejectionWriter<'_> {
    /// Reject the command being processed. Performs no state mutation.
    pub fn reject(&mut self, command: &Record, rejection_type: RejectionType, reason: String) {
        debug!(
            key = command.key,
            ?rejection_type,
            reason = %reason,
            "Command rejected"
        );
        let rejection = Rejection {
            rejection_type,
            reason: reason.clone(),
        };
        self.writers.stage_followup(Record {
            key: command.key,
            intent: command.intent,
            record_type: RecordType::CommandRejection,
            value: command.value.clone(),
            rejection: Some(rejection.clone()),
            position: 0,
            source_position: 0,
            request: None,
            distribution: None,
        });

        if command.is_distributed() {
            return;
        }
        if let Some(request) = command.request {
            self.writers.response = Some(CommandResponse {
                partition_id: self.writers.partition_id,
                key: command.key,
                intent: command.intent,
                record_type: RecordType::CommandRejection,
                value: None,
                rejection: Some(rejection),
                request,
            });
        }
    }
}
