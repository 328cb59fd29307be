//! The process-scope record processor.
//!
//! Scopes are the cross-partition resource of the engine: a scope
//! created on one partition must exist on every partition before tasks
//! can reference it anywhere, so `Create` is distributed (ordered, one
//! queue) and completes only once all partitions acknowledged.
//! `Advance` is the partition-local follow-up a completing task issues
//! against its owning scope.

use crate::distribution::SCOPE_DISTRIBUTION_QUEUE;
use crate::error::{Error, Result, StorageError};
use crate::processing::preconditions::require_active_scope;
use crate::processing::processor::{ProcessingFrame, RecordProcessor};
use crate::record::{Intent, Record, RecordValue, RejectionType, ScopeIntent, ScopeRecord};
use crate::state::{EngineState, ProcessScope, TransactionScope};
use crate::types::DistributionOrdering;

pub struct ScopeProcessor;

impl ScopeProcessor {
    fn on_create(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
        distribute: bool,
    ) -> Result<()> {
        let key = if command.key != 0 {
            command.key
        } else {
            frame.state.key_generator.next_key(frame.scope)?
        };

        if frame.state.scopes.exists(frame.scope, &key)? {
            frame.writers.rejection().reject(
                command,
                RejectionType::InvalidState,
                format!("Expected to create process scope with key '{key}', but it already exists"),
            );
            return Ok(());
        }

        frame.writers.state().append_follow_up_event(
            key,
            Intent::Scope(ScopeIntent::Created),
            RecordValue::Scope(ScopeRecord::active()),
        );
        frame.writers.response().write_event_response(
            command,
            key,
            Intent::Scope(ScopeIntent::Created),
            RecordValue::Scope(ScopeRecord::active()),
        );

        if distribute {
            let distribution = frame.distribution;
            let distributed = command.clone().with_key(key);
            distribution.distribute(
                frame,
                key,
                &distributed,
                DistributionOrdering::Ordered(SCOPE_DISTRIBUTION_QUEUE),
            )?;
        }
        Ok(())
    }

    fn on_advance(&self, frame: &mut ProcessingFrame<'_, '_, '_>, command: &Record) -> Result<()> {
        match require_active_scope(frame.scope, &frame.state, command.key, "advance")? {
            Ok(_) => {
                frame.writers.state().append_follow_up_event(
                    command.key,
                    Intent::Scope(ScopeIntent::Advanced),
                    RecordValue::Scope(ScopeRecord::active()),
                );
                Ok(())
            }
            Err(rejection) => {
                frame
                    .writers
                    .rejection()
                    .reject(command, rejection.rejection_type, rejection.reason);
                Ok(())
            }
        }
    }
}

impl RecordProcessor for ScopeProcessor {
    fn process_new_command(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
    ) -> Result<()> {
        match command.intent {
            Intent::Scope(ScopeIntent::Create) => self.on_create(frame, command, true),
            Intent::Scope(ScopeIntent::Advance) => self.on_advance(frame, command),
            other => Err(Error::Internal(format!("not a scope command: {other:?}"))),
        }
    }

    fn process_distributed_command(
        &self,
        frame: &mut ProcessingFrame<'_, '_, '_>,
        command: &Record,
    ) -> Result<()> {
        match command.intent {
            // Apply the same mutation as the origin, but never
            // re-distribute and never respond; then acknowledge.
            Intent::Scope(ScopeIntent::Create) => self.on_create(frame, command, false)?,
            other => {
                return Err(Error::Internal(format!(
                    "scope command is not distributable: {other:?}"
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
            Intent::Scope(ScopeIntent::Created) => {
                state.scopes.put(
                    tx,
                    &event.key,
                    &ProcessScope {
                        key: event.key,
                        active: true,
                        advanced: 0,
                    },
                )?;
                state.key_generator.track_key(tx, event.key)
            }
            Intent::Scope(ScopeIntent::Advanced) => {
                let mut scope = state.scopes.get(tx, &event.key)?.ok_or_else(|| {
                    StorageError::Corruption(format!(
                        "process scope '{}' missing during replay",
                        event.key
                    ))
                })?;
                scope.advanced += 1;
                state.scopes.put(tx, &event.key, &scope)
            }
            other => Err(Error::Internal(format!("not a scope event: {other:?}"))),
        }
    }
}
