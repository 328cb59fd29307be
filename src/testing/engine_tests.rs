//! Integration tests for the partition engine: lifecycle gating,
//! rejection precedence, follow-up commands, and replay determinism.

#[cfg(test)]
mod tests {
    use crate::record::{
        Intent, RecordType, RecordValue, RejectionType, ScopeIntent, UserTaskIntent,
    };
    use crate::state::{DbContext, LifecycleState};
    use crate::testing::utils::{
        assign_task, claim_task, complete_task, create_scope, create_task, created_key,
        with_request, TestFabric,
    };

    async fn scope_and_task(fabric: &mut TestFabric) -> (u64, u64) {
        let scope = fabric.submit(1, create_scope()).await.unwrap();
        let scope_key = created_key(&scope);
        let task = fabric.submit(1, create_task(scope_key, "review")).await.unwrap();
        (scope_key, created_key(&task))
    }

    #[tokio::test]
    async fn test_create_emits_two_phase_events() {
        let mut fabric = TestFabric::new(1);
        let (scope_key, task_key) = scope_and_task(&mut fabric).await;

        let engine = fabric.engine(1);
        let mut ctx = DbContext::new();
        let task = engine
            .store()
            .read(&engine.state().user_tasks, &mut ctx, &task_key)
            .unwrap()
            .unwrap();
        assert_eq!(task.lifecycle, LifecycleState::Created);
        assert_eq!(task.scope_key, scope_key);

        // Secondary index points at the open task.
        let index = engine
            .store()
            .read(&engine.state().tasks_by_scope, &mut ctx, &(scope_key, task_key))
            .unwrap();
        assert!(index.is_some());
    }

    #[tokio::test]
    async fn test_assign_then_complete_advances_scope() {
        let mut fabric = TestFabric::new(1);
        let (scope_key, task_key) = scope_and_task(&mut fabric).await;

        let outcome = fabric.submit(1, assign_task(task_key, "alice")).await.unwrap();
        let intents: Vec<_> = outcome.records[1..].iter().map(|r| r.intent).collect();
        assert_eq!(
            intents,
            vec![
                Intent::UserTask(UserTaskIntent::Assigning),
                Intent::UserTask(UserTaskIntent::Assigned),
            ]
        );

        let outcome = fabric.submit(1, complete_task(task_key)).await.unwrap();
        assert_eq!(outcome.enqueued_commands, 1, "scope advance follow-up");

        let engine = fabric.engine(1);
        let mut ctx = DbContext::new();
        let scope = engine
            .store()
            .read(&engine.state().scopes, &mut ctx, &scope_key)
            .unwrap()
            .unwrap();
        assert_eq!(scope.advanced, 1);

        let task = engine
            .store()
            .read(&engine.state().user_tasks, &mut ctx, &task_key)
            .unwrap()
            .unwrap();
        assert_eq!(task.lifecycle, LifecycleState::Completed);
        // Completed tasks leave the by-scope index.
        let index = engine
            .store()
            .read(&engine.state().tasks_by_scope, &mut ctx, &(scope_key, task_key))
            .unwrap();
        assert!(index.is_none());
    }

    #[tokio::test]
    async fn test_assign_missing_task_is_not_found() {
        let mut fabric = TestFabric::new(1);
        fabric.submit(1, create_scope()).await.unwrap();

        let outcome = fabric
            .submit(1, with_request(assign_task(999, "alice")))
            .await
            .unwrap();

        assert_eq!(outcome.records[1].record_type, RecordType::CommandRejection);
        let response = outcome.response.unwrap();
        let rejection = response.rejection.unwrap();
        assert_eq!(rejection.rejection_type, RejectionType::NotFound);
        assert_eq!(
            rejection.reason,
            "Expected to assign user task with key '999', but no such user task exists"
        );
    }

    #[tokio::test]
    async fn test_assign_completed_task_is_invalid_state() {
        let mut fabric = TestFabric::new(1);
        let (_, task_key) = scope_and_task(&mut fabric).await;
        fabric.submit(1, complete_task(task_key)).await.unwrap();

        let before = fabric.engine(1).store().export_keyspace().unwrap();
        let outcome = fabric
            .submit(1, with_request(assign_task(task_key, "alice")))
            .await
            .unwrap();

        // Exactly one follow-up: the rejection. No state mutation
        // besides the log entries themselves.
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[1].record_type, RecordType::CommandRejection);
        let rejection = outcome.response.unwrap().rejection.unwrap();
        assert_eq!(rejection.rejection_type, RejectionType::InvalidState);
        assert!(rejection.reason.contains("state 'COMPLETED'"));

        let after = fabric.engine(1).store().export_keyspace().unwrap();
        // Only log and last-processed rows changed.
        let changed: Vec<_> = after
            .iter()
            .filter(|entry| !before.contains(entry))
            .collect();
        assert_eq!(changed.len(), 3);
    }

    #[tokio::test]
    async fn test_claim_is_idempotent_for_current_assignee_only() {
        let mut fabric = TestFabric::new(1);
        let (_, task_key) = scope_and_task(&mut fabric).await;

        fabric.submit(1, claim_task(task_key, "alice")).await.unwrap();

        // Reclaim by alice succeeds.
        let outcome = fabric.submit(1, claim_task(task_key, "alice")).await.unwrap();
        assert_eq!(
            outcome.records[2].intent,
            Intent::UserTask(UserTaskIntent::Assigned)
        );

        // Claim by bob is rejected with INVALID_STATE.
        let outcome = fabric
            .submit(1, with_request(claim_task(task_key, "bob")))
            .await
            .unwrap();
        let rejection = outcome.response.unwrap().rejection.unwrap();
        assert_eq!(rejection.rejection_type, RejectionType::InvalidState);
        assert_eq!(
            rejection.reason,
            format!(
                "Expected to claim user task with key '{task_key}', but it is already assigned to 'alice'"
            )
        );

        let engine = fabric.engine(1);
        let mut ctx = DbContext::new();
        let task = engine
            .store()
            .read(&engine.state().user_tasks, &mut ctx, &task_key)
            .unwrap()
            .unwrap();
        assert_eq!(task.assignee.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_complete_with_vanished_scope_skips_advance() {
        let mut fabric = TestFabric::new(1);
        let (scope_key, task_key) = scope_and_task(&mut fabric).await;

        // Simulate the scope having gone away.
        {
            let engine = fabric.engine(1);
            let state = *engine.state();
            let store = engine.store().clone();
            let mut ctx = DbContext::new();
            store
                .run_in_transaction(&mut ctx, |tx| state.scopes.delete(tx, &scope_key))
                .unwrap();
        }

        let outcome = fabric.submit(1, complete_task(task_key)).await.unwrap();
        // Completion itself succeeds; the side effect is skipped, not an error.
        assert_eq!(outcome.enqueued_commands, 0);
        assert_eq!(
            outcome.records[2].intent,
            Intent::UserTask(UserTaskIntent::Completed)
        );
    }

    #[tokio::test]
    async fn test_scope_create_responds_to_request() {
        let mut fabric = TestFabric::new(1);
        let outcome = fabric.submit(1, with_request(create_scope())).await.unwrap();

        let response = outcome.response.unwrap();
        assert_eq!(response.intent, Intent::Scope(ScopeIntent::Created));
        assert_eq!(response.key, created_key(&outcome));
        assert!(response.rejection.is_none());
        assert!(matches!(response.value, Some(RecordValue::Scope(_))));
    }

    #[tokio::test]
    async fn test_failed_step_leaves_no_partial_writes() {
        let mut fabric = TestFabric::new(1);
        fabric.submit(1, create_scope()).await.unwrap();

        let engine = fabric.engine(1);
        let before = engine.store().export_keyspace().unwrap();
        let next_position = engine.next_position();

        // A distribution record arriving as a distributed command is an
        // internal error: the whole step must roll back.
        let bogus = crate::record::Record {
            key: 1,
            intent: Intent::Distribution(crate::record::DistributionIntent::Acknowledge),
            record_type: RecordType::Command,
            value: RecordValue::Distribution(crate::record::CommandDistributionRecord {
                partition: 1,
                queue_id: None,
                command_key: 1,
                command_value_type: crate::record::ValueType::Scope,
                command_intent: Intent::Scope(ScopeIntent::Create),
                command_value: None,
            }),
            rejection: None,
            position: 0,
            source_position: 0,
            request: None,
            distribution: Some(crate::record::DistributionMetadata {
                origin_partition: 1,
                distribution_key: 1,
            }),
        };
        assert!(engine.process_command(bogus).is_err());

        assert_eq!(engine.store().export_keyspace().unwrap(), before);
        assert_eq!(engine.next_position(), next_position);
    }

    #[tokio::test]
    async fn test_replay_rebuilds_identical_state() {
        let mut fabric = TestFabric::new(1);
        let (_, task_key) = scope_and_task(&mut fabric).await;
        fabric.submit(1, claim_task(task_key, "alice")).await.unwrap();
        fabric.submit(1, complete_task(task_key)).await.unwrap();
        fabric
            .submit(1, crate::testing::utils::create_checkpoint(1))
            .await
            .unwrap();

        let source = fabric.engine(1);
        let source_dump = source.store().export_keyspace().unwrap();

        // A fresh partition with only the log: replay must reconstruct
        // byte-identical state.
        let mut rebuilt = TestFabric::new(1);
        {
            let engine = rebuilt.engine(1);
            let state = *engine.state();
            let store = engine.store().clone();
            let mut ctx = DbContext::new();
            let mut log = Vec::new();
            source
                .store()
                .scan(&source.state().log, |position, record| {
                    log.push((position, record));
                    true
                })
                .unwrap();
            store
                .run_in_transaction(&mut ctx, |tx| {
                    for (position, record) in &log {
                        state.log.put(tx, position, record)?;
                    }
                    Ok(())
                })
                .unwrap();
            let report = engine.recover().unwrap();
            assert!(report.events_replayed > 0);
        }

        let rebuilt_dump = rebuilt.engine(1).store().export_keyspace().unwrap();
        assert_eq!(source_dump, rebuilt_dump);

        // Replay re-executes no side effects: no backup was taken.
        assert!(rebuilt.backups[0].taken().is_empty());
        // But the coordinator knows the recovered checkpoint.
        assert_eq!(
            rebuilt.engine(1).checkpoint_coordinator().current().map(|c| c.checkpoint_id),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_recover_on_consistent_store_replays_nothing() {
        let mut fabric = TestFabric::new(1);
        let (_, task_key) = scope_and_task(&mut fabric).await;
        fabric.submit(1, assign_task(task_key, "alice")).await.unwrap();

        let engine = fabric.engine(1);
        let before = engine.store().export_keyspace().unwrap();
        let next_position = engine.next_position();

        let report = engine.recover().unwrap();
        assert_eq!(report.events_replayed, 0);
        assert_eq!(engine.next_position(), next_position);
        assert_eq!(engine.store().export_keyspace().unwrap(), before);
    }

    #[tokio::test]
    async fn test_keys_stay_monotonic_after_recovery() {
        let mut fabric = TestFabric::new(1);
        let (scope_key, task_key) = scope_and_task(&mut fabric).await;

        let engine = fabric.engine(1);
        engine.recover().unwrap();

        let outcome = engine.submit(create_task(scope_key, "second")).await.unwrap();
        assert!(created_key(&outcome) > task_key);
    }
}
