//! Declarative precondition checks for lifecycle-gated entities.
//!
//! A check looks the entity up and returns either the entity or a
//! rejection, chosen by fixed precedence: entity missing takes
//! `NotFound` before any lifecycle consideration; a lifecycle state
//! outside the accepted set takes `InvalidState`; claim-style intents
//! additionally reject when the entity is owned by a different actor.
//! Rejections are data, not errors — the outer `Result` carries only
//! storage failures.
//!
//! Messages are deterministic templates over intent name, key, and
//! current state, so error text is testable.

use crate::error::Result;
use crate::record::{Rejection, RejectionType, UserTaskIntent};
use crate::state::{EngineState, LifecycleState, ProcessScope, TransactionScope, UserTask};

/// Outcome of a precondition check: the entity, or why not.
pub type Checked<T> = std::result::Result<T, Rejection>;

/// Look up a user task and require its lifecycle state to be accepted.
pub fn require_task(
    tx: &mut TransactionScope<'_, '_>,
    state: &EngineState,
    task_key: u64,
    accepted: &[LifecycleState],
    intent: UserTaskIntent,
) -> Result<Checked<UserTask>> {
    let Some(task) = state.user_tasks.get(tx, &task_key)? else {
        return Ok(Err(Rejection {
            rejection_type: RejectionType::NotFound,
            reason: format!(
                "Expected to {} user task with key '{}', but no such user task exists",
                intent.label(),
                task_key
            ),
        }));
    };
    if !accepted.contains(&task.lifecycle) {
        return Ok(Err(Rejection {
            rejection_type: RejectionType::InvalidState,
            reason: format!(
                "Expected to {} user task with key '{}', but it is in state '{}'",
                intent.label(),
                task_key,
                task.lifecycle.name()
            ),
        }));
    }
    Ok(Ok(task))
}

/// Claim-specific ownership check: a task already assigned to somebody
/// else cannot be claimed; reclaiming by the current assignee succeeds.
pub fn require_claimable(task: &UserTask, claimant: &str) -> Checked<()> {
    match task.assignee.as_deref() {
        Some(owner) if owner != claimant => Err(Rejection {
            rejection_type: RejectionType::InvalidState,
            reason: format!(
                "Expected to claim user task with key '{}', but it is already assigned to '{}'",
                task.key, owner
            ),
        }),
        _ => Ok(()),
    }
}

/// Look up a process scope and require it to exist and be active.
pub fn require_active_scope(
    tx: &mut TransactionScope<'_, '_>,
    state: &EngineState,
    scope_key: u64,
    intent_label: &str,
) -> Result<Checked<ProcessScope>> {
    let Some(scope) = state.scopes.get(tx, &scope_key)? else {
        return Ok(Err(Rejection {
            rejection_type: RejectionType::NotFound,
            reason: format!(
                "Expected to {} process scope with key '{}', but no such scope exists",
                intent_label, scope_key
            ),
        }));
    };
    if !scope.active {
        return Ok(Err(Rejection {
            rejection_type: RejectionType::InvalidState,
            reason: format!(
                "Expected to {} process scope with key '{}', but it is not active",
                intent_label, scope_key
            ),
        }));
    }
    Ok(Ok(scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::state::{DbContext, StateStore};
    use tempfile::TempDir;

    fn setup() -> (StateStore, EngineState, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(&StoreConfig::new(dir.path()).with_sync_writes(false)).unwrap();
        let state = EngineState::new(&store, 1).unwrap();
        (store, state, dir)
    }

    fn seed_task(store: &StateStore, state: &EngineState, lifecycle: LifecycleState) -> UserTask {
        let task = UserTask {
            key: 100,
            name: "review".into(),
            assignee: Some("alice".into()),
            candidate_group: None,
            scope_key: 1,
            lifecycle,
        };
        let mut ctx = DbContext::new();
        let stored = task.clone();
        store
            .run_in_transaction(&mut ctx, |tx| state.user_tasks.put(tx, &task.key, &stored))
            .unwrap();
        task
    }

    #[test]
    fn test_missing_entity_takes_not_found() {
        let (store, state, _dir) = setup();
        let mut ctx = DbContext::new();

        let checked = store
            .run_in_transaction(&mut ctx, |tx| {
                require_task(tx, &state, 42, &[LifecycleState::Created], UserTaskIntent::Assign)
            })
            .unwrap();

        let rejection = checked.unwrap_err();
        assert_eq!(rejection.rejection_type, RejectionType::NotFound);
        assert_eq!(
            rejection.reason,
            "Expected to assign user task with key '42', but no such user task exists"
        );
    }

    #[test]
    fn test_wrong_lifecycle_takes_invalid_state() {
        let (store, state, _dir) = setup();
        seed_task(&store, &state, LifecycleState::Completed);
        let mut ctx = DbContext::new();

        let checked = store
            .run_in_transaction(&mut ctx, |tx| {
                require_task(tx, &state, 100, &[LifecycleState::Created], UserTaskIntent::Assign)
            })
            .unwrap();

        let rejection = checked.unwrap_err();
        assert_eq!(rejection.rejection_type, RejectionType::InvalidState);
        assert_eq!(
            rejection.reason,
            "Expected to assign user task with key '100', but it is in state 'COMPLETED'"
        );
    }

    #[test]
    fn test_accepted_lifecycle_returns_entity() {
        let (store, state, _dir) = setup();
        let task = seed_task(&store, &state, LifecycleState::Created);
        let mut ctx = DbContext::new();

        let checked = store
            .run_in_transaction(&mut ctx, |tx| {
                require_task(
                    tx,
                    &state,
                    100,
                    &[LifecycleState::Created, LifecycleState::Assigned],
                    UserTaskIntent::Complete,
                )
            })
            .unwrap();

        assert_eq!(checked.unwrap(), task);
    }

    #[test]
    fn test_claim_ownership_precedence() {
        let (store, state, _dir) = setup();
        let task = seed_task(&store, &state, LifecycleState::Assigned);
        drop(store);

        // Reclaim by the current assignee is idempotent.
        assert!(require_claimable(&task, "alice").is_ok());

        // Claim by anybody else is an invalid state, not a not-found.
        let rejection = require_claimable(&task, "bob").unwrap_err();
        assert_eq!(rejection.rejection_type, RejectionType::InvalidState);
        assert!(rejection.reason.contains("already assigned to 'alice'"));
    }

    #[test]
    fn test_inactive_scope_rejected() {
        let (store, state, _dir) = setup();
        let mut ctx = DbContext::new();
        store
            .run_in_transaction(&mut ctx, |tx| {
                state.scopes.put(
                    tx,
                    &7,
                    &ProcessScope {
                        key: 7,
                        active: false,
                        advanced: 0,
                    },
                )
            })
            .unwrap();

        let checked = store
            .run_in_transaction(&mut ctx, |tx| require_active_scope(tx, &state, 7, "advance"))
            .unwrap();
        let rejection = checked.unwrap_err();
        assert_eq!(rejection.rejection_type, RejectionType::InvalidState);

        let checked = store
            .run_in_transaction(&mut ctx, |tx| require_active_scope(tx, &state, 8, "advance"))
            .unwrap();
        assert_eq!(checked.unwrap_err().rejection_type, RejectionType::NotFound);
    }
}
