//! The user-task record processor.
//!
//! Tasks are lifecycle-gated: each command names the set of lifecycle
//! states it is valid in, and every successful mutation emits an
//! in-flight event immediately followed by its terminal event in the
//! same follow-up batch (`Assigning` then `Assigned`, and so on). The
//! in-flight applier persists only the lifecycle transition, so a
//! replay interrupted between the two events resumes cleanly.
//!
//! Completing a task additionally advances its owning scope — via a
//! follow-up command, and only if the scope still exists and is active.
//! A vanished scope is a normal outcome, not an error.

use crate::error::{Error, Result, StorageError};
use crate::processing::preconditions::{require_active_scope, require_claimable, require_task};
use crate::processing::processor::{ProcessingFrame, RecordProcessor};
use crate::record::{
    Intent, Record, RecordValue, RejectionType, ScopeIntent, ScopeRecord, UserTaskIntent,
    UserTaskRecord,
};
use crate::state::{EngineState, LifecycleState, TransactionScope, UserTask};
use tracing::debug;

/// Lifecycle states in which a task still accepts work.
const OPEN_STATES: &[LifecycleState] = &[LifecycleState::Created, LifecycleState::Assigned];

pub struct UserTaskProcessor;

impl UserTaskProcessor {
    fn handle(&self, frame: &mut ProcessingFrame<'_, '_, '_>, command: &Record) -> Result<()> {
        let Intent::UserTask(intent) = command.intent else {
            return Err(Error::Internal(format!(
                "user task processor got {:?}",
                command.intent
            )));
        };
        match intent {
            UserTaskIntent::Create => self.on_create(frame, command),
            UserTaskIntent::Assign => self.on_assign(frame, command),
            UserTaskIntent::Claim => self.on_claim(frame, command),
            UserTaskIntent::Update => self.on_update(frame, command),
            UserTaskIntent::Complete => self.on_complete(frame, command),
            UserTaskIntent::Cancel => self.on_cancel(frame, command),
            other => Err(Error::Internal(format!(
                "not a user task command: {other:?}"
            ))),
        }
    }

    fn on_create(&self, frame: &mut ProcessingFrame<'_, '_, '_>, command: &Record) -> Result<()> {
        let value = task_value(command)?;
        if value.name.is_empty() {
            frame.writers.rejection().reject(
                command,
                RejectionType::InvalidArgument,
                "Expected to create user task, but no name was provided".to_string(),
            );
            return Ok(());
        }
        match require_active_scope(frame.scope, &frame.state, value.scope_key, "create a task in")? {
            Ok(_) => {}
            Err(rejection) => {
                frame
                    .writers
                    .rejection()
                    .reject(command, rejection.rejection_type, rejection.reason);
                return Ok(());
            }
        }

        let key = if command.key != 0 {
            command.key
        } else {
            frame.state.key_generator.next_key(frame.scope)?
        };
        let snapshot = value.clone();
        frame.writers.state().append_follow_up_event(
            key,
            Intent::UserTask(UserTaskIntent::Creating),
            RecordValue::UserTask(snapshot.clone()),
        );
        frame.writers.state().append_follow_up_event(
            key,
            Intent::UserTask(UserTaskIntent::Created),
            RecordValue::UserTask(snapshot.clone()),
        );
        frame.writers.response().write_event_response(
            command,
            key,
            Intent::UserTask(UserTaskIntent::Created),
            RecordValue::UserTask(snapshot),
        );
        Ok(())
    }

    fn on_assign(&self, frame: &mut ProcessingFrame<'_, '_, '_>, command: &Record) -> Result<()> {
        let value = task_value(command)?;
        let Some(assignee) = value.assignee.clone() else {
            frame.writers.rejection().reject(
                command,
                RejectionType::InvalidArgument,
                format!(
                    "Expected to assign user task with key '{}', but no assignee was provided",
                    command.key
                ),
            );
            return Ok(());
        };
        let task = match require_task(
            frame.scope,
            &frame.state,
            command.key,
            OPEN_STATES,
            UserTaskIntent::Assign,
        )? {
            Ok(task) => task,
            Err(rejection) => {
                frame
                    .writers
                    .rejection()
                    .reject(command, rejection.rejection_type, rejection.reason);
                return Ok(());
            }
        };
        self.emit_assignment(frame, command, &task, assignee);
        Ok(())
    }

    fn on_claim(&self, frame: &mut ProcessingFrame<'_, '_, '_>, command: &Record) -> Result<()> {
        let value = task_value(command)?;
        let Some(claimant) = value.assignee.clone() else {
            frame.writers.rejection().reject(
                command,
                RejectionType::InvalidArgument,
                format!(
                    "Expected to claim user task with key '{}', but no claimant was provided",
                    command.key
                ),
            );
            return Ok(());
        };
        let task = match require_task(
            frame.scope,
            &frame.state,
            command.key,
            OPEN_STATES,
            UserTaskIntent::Claim,
        )? {
            Ok(task) => task,
            Err(rejection) => {
                frame
                    .writers
                    .rejection()
                    .reject(command, rejection.rejection_type, rejection.reason);
                return Ok(());
            }
        };
        if let Err(rejection) = require_claimable(&task, &claimant) {
            frame
                .writers
                .rejection()
                .reject(command, rejection.rejection_type, rejection.reason);
            return Ok(());
        }
        self.emit_assignment(frame, command, &task, claimant);
        Ok(())
    }

    /// Shared success path of assign and claim.
    fn emit_assignment(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
        task: &UserTask,
        assignee: String,
    ) {
        let snapshot = UserTaskRecord {
            name: task.name.clone(),
            assignee: Some(assignee),
            candidate_group: task.candidate_group.clone(),
            scope_key: task.scope_key,
        };
        frame.writers.state().append_follow_up_event(
            task.key,
            Intent::UserTask(UserTaskIntent::Assigning),
            RecordValue::UserTask(snapshot.clone()),
        );
        frame.writers.state().append_follow_up_event(
            task.key,
            Intent::UserTask(UserTaskIntent::Assigned),
            RecordValue::UserTask(snapshot.clone()),
        );
        frame.writers.response().write_event_response(
            command,
            task.key,
            Intent::UserTask(UserTaskIntent::Assigned),
            RecordValue::UserTask(snapshot),
        );
    }

    fn on_update(&self, frame: &mut ProcessingFrame<'_, '_, '_>, command: &Record) -> Result<()> {
        let value = task_value(command)?;
        let task = match require_task(
            frame.scope,
            &frame.state,
            command.key,
            OPEN_STATES,
            UserTaskIntent::Update,
        )? {
            Ok(task) => task,
            Err(rejection) => {
                frame
                    .writers
                    .rejection()
                    .reject(command, rejection.rejection_type, rejection.reason);
                return Ok(());
            }
        };
        let snapshot = UserTaskRecord {
            name: if value.name.is_empty() {
                task.name.clone()
            } else {
                value.name.clone()
            },
            assignee: task.assignee.clone(),
            candidate_group: value
                .candidate_group
                .clone()
                .or_else(|| task.candidate_group.clone()),
            scope_key: task.scope_key,
        };
        frame.writers.state().append_follow_up_event(
            task.key,
            Intent::UserTask(UserTaskIntent::Updating),
            RecordValue::UserTask(snapshot.clone()),
        );
        frame.writers.state().append_follow_up_event(
            task.key,
            Intent::UserTask(UserTaskIntent::Updated),
            RecordValue::UserTask(snapshot.clone()),
        );
        frame.writers.response().write_event_response(
            command,
            task.key,
            Intent::UserTask(UserTaskIntent::Updated),
            RecordValue::UserTask(snapshot),
        );
        Ok(())
    }

    fn on_complete(&self, frame: &mut ProcessingFrame<'_, '_, '_>, command: &Record) -> Result<()> {
        let task = match require_task(
            frame.scope,
            &frame.state,
            command.key,
            OPEN_STATES,
            UserTaskIntent::Complete,
        )? {
            Ok(task) => task,
            Err(rejection) => {
                frame
                    .writers
                    .rejection()
                    .reject(command, rejection.rejection_type, rejection.reason);
                return Ok(());
            }
        };
        let snapshot = task_snapshot(&task);
        frame.writers.state().append_follow_up_event(
            task.key,
            Intent::UserTask(UserTaskIntent::Completing),
            RecordValue::UserTask(snapshot.clone()),
        );
        frame.writers.state().append_follow_up_event(
            task.key,
            Intent::UserTask(UserTaskIntent::Completed),
            RecordValue::UserTask(snapshot.clone()),
        );
        frame.writers.response().write_event_response(
            command,
            task.key,
            Intent::UserTask(UserTaskIntent::Completed),
            RecordValue::UserTask(snapshot),
        );

        // Advance the owning scope, but only while it is still around.
        match frame.state.scopes.get(frame.scope, &task.scope_key)? {
            Some(scope) if scope.active => {
                frame.writers.command().append_follow_up_command(
                    task.scope_key,
                    Intent::Scope(ScopeIntent::Advance),
                    RecordValue::Scope(ScopeRecord::active()),
                );
            }
            _ => {
                debug!(
                    task_key = task.key,
                    scope_key = task.scope_key,
                    "Owning scope gone or inactive, skipping advance"
                );
            }
        }
        Ok(())
    }

    fn on_cancel(&self, frame: &mut ProcessingFrame<'_, '_, '_>, command: &Record) -> Result<()> {
        let task = match require_task(
            frame.scope,
            &frame.state,
            command.key,
            OPEN_STATES,
            UserTaskIntent::Cancel,
        )? {
            Ok(task) => task,
            Err(rejection) => {
                frame
                    .writers
                    .rejection()
                    .reject(command, rejection.rejection_type, rejection.reason);
                return Ok(());
            }
        };
        let snapshot = task_snapshot(&task);
        frame.writers.state().append_follow_up_event(
            task.key,
            Intent::UserTask(UserTaskIntent::Canceling),
            RecordValue::UserTask(snapshot.clone()),
        );
        frame.writers.state().append_follow_up_event(
            task.key,
            Intent::UserTask(UserTaskIntent::Canceled),
            RecordValue::UserTask(snapshot.clone()),
        );
        frame.writers.response().write_event_response(
            command,
            task.key,
            Intent::UserTask(UserTaskIntent::Canceled),
            RecordValue::UserTask(snapshot),
        );
        Ok(())
    }
}

impl RecordProcessor for UserTaskProcessor {
    fn process_new_command(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
    ) -> Result<()> {
        self.handle(frame, command)
    }

    fn process_distributed_command(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
    ) -> Result<()> {
        // Same mutation, no response (the writers suppress it), then
        // acknowledge so the origin can complete.
        self.handle(frame, command)?;
        let distribution = frame.distribution;
        distribution.acknowledge(frame, command)
    }

    fn replay(
        &self,
        tx: &mut TransactionScope<'_, '_>,
        state: &EngineState,
        event: &Record,
    ) -> Result<()> {
        let Intent::UserTask(intent) = event.intent else {
            return Err(Error::Internal(format!(
                "user task applier got {:?}",
                event.intent
            )));
        };
        let value = task_value(event)?;
        match intent {
            UserTaskIntent::Creating => {
                let task = UserTask {
                    key: event.key,
                    name: value.name.clone(),
                    assignee: value.assignee.clone(),
                    candidate_group: value.candidate_group.clone(),
                    scope_key: value.scope_key,
                    lifecycle: LifecycleState::Creating,
                };
                state.user_tasks.put(tx, &event.key, &task)?;
                state
                    .tasks_by_scope
                    .put(tx, &(value.scope_key, event.key), &())?;
                state.key_generator.track_key(tx, event.key)?;
            }
            UserTaskIntent::Created => {
                self.transition(tx, state, event.key, LifecycleState::Created)?;
            }
            UserTaskIntent::Assigning => {
                self.transition(tx, state, event.key, LifecycleState::Assigning)?;
            }
            UserTaskIntent::Assigned => {
                let mut task = self.existing(tx, state, event.key)?;
                task.assignee = value.assignee.clone();
                task.lifecycle = LifecycleState::Assigned;
                state.user_tasks.put(tx, &event.key, &task)?;
            }
            UserTaskIntent::Updating => {
                self.transition(tx, state, event.key, LifecycleState::Updating)?;
            }
            UserTaskIntent::Updated => {
                let mut task = self.existing(tx, state, event.key)?;
                task.name = value.name.clone();
                task.candidate_group = value.candidate_group.clone();
                task.lifecycle = if task.assignee.is_some() {
                    LifecycleState::Assigned
                } else {
                    LifecycleState::Created
                };
                state.user_tasks.put(tx, &event.key, &task)?;
            }
            UserTaskIntent::Completing => {
                self.transition(tx, state, event.key, LifecycleState::Completing)?;
            }
            UserTaskIntent::Completed => {
                let mut task = self.existing(tx, state, event.key)?;
                task.lifecycle = LifecycleState::Completed;
                state.user_tasks.put(tx, &event.key, &task)?;
                state
                    .tasks_by_scope
                    .delete(tx, &(task.scope_key, event.key))?;
            }
            UserTaskIntent::Canceling => {
                self.transition(tx, state, event.key, LifecycleState::Canceling)?;
            }
            UserTaskIntent::Canceled => {
                let mut task = self.existing(tx, state, event.key)?;
                task.lifecycle = LifecycleState::Canceled;
                state.user_tasks.put(tx, &event.key, &task)?;
                state
                    .tasks_by_scope
                    .delete(tx, &(task.scope_key, event.key))?;
            }
            other => {
                return Err(Error::Internal(format!(
                    "not a user task event: {other:?}"
                )));
            }
        }
        Ok(())
    }
}

impl UserTaskProcessor {
    fn existing(
        &self,
        tx: &mut TransactionScope<'_, '_>,
        state: &EngineState,
        key: u64,
    ) -> Result<UserTask> {
        state.user_tasks.get(tx, &key)?.ok_or_else(|| {
            StorageError::Corruption(format!("user task '{key}' missing during replay")).into()
        })
    }

    fn transition(
        &self,
        tx: &mut TransactionScope<'_, '_>,
        state: &EngineState,
        key: u64,
        lifecycle: LifecycleState,
    ) -> Result<()> {
        let mut task = self.existing(tx, state, key)?;
        task.lifecycle = lifecycle;
        state.user_tasks.put(tx, &key, &task)
    }
}

fn task_value(record: &Record) -> Result<&UserTaskRecord> {
    match &record.value {
        RecordValue::UserTask(value) => Ok(value),
        other => Err(Error::Internal(format!(
            "expected user task value, got {:?}",
            other.value_type()
        ))),
    }
}

fn task_snapshot(task: &UserTask) -> UserTaskRecord {
    UserTaskRecord {
        name: task.name.clone(),
        assignee: task.assignee.clone(),
        candidate_group: task.candidate_group.clone(),
        scope_key: task.scope_key,
    }
}
