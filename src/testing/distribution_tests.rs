//! Integration tests for cross-partition command distribution:
//! fan-out, acknowledgment, idempotent redelivery, ordered queues, and
//! the redistribution loop.

#[cfg(test)]
mod tests {
    use crate::distribution::distributed_copy;
    use crate::processing::SideEffect;
    use crate::record::{DistributionIntent, Intent, RecordType};
    use crate::state::DbContext;
    use crate::testing::utils::{create_checkpoint, create_scope, created_key, TestFabric};

    fn pending_count(fabric: &mut TestFabric, partition: u32) -> usize {
        let engine = fabric.engine(partition);
        let mut count = 0;
        engine
            .store()
            .scan(&engine.state().pending_distribution, |_, _| {
                count += 1;
                true
            })
            .unwrap();
        count
    }

    fn scope_exists(fabric: &mut TestFabric, partition: u32, scope_key: u64) -> bool {
        let engine = fabric.engine(partition);
        let mut ctx = DbContext::new();
        engine
            .store()
            .read(&engine.state().scopes, &mut ctx, &scope_key)
            .unwrap()
            .is_some()
    }

    #[tokio::test]
    async fn test_scope_create_fans_out_and_finishes() {
        let mut fabric = TestFabric::new(3);

        let outcome = fabric.submit(1, create_scope()).await.unwrap();
        let scope_key = created_key(&outcome);

        let intents: Vec<_> = outcome.records[1..].iter().map(|r| r.intent).collect();
        assert_eq!(
            intents,
            vec![
                Intent::Scope(crate::record::ScopeIntent::Created),
                Intent::Distribution(DistributionIntent::Started),
                Intent::Distribution(DistributionIntent::Distributing),
                Intent::Distribution(DistributionIntent::Distributing),
            ]
        );
        assert_eq!(pending_count(&mut fabric, 1), 2);

        fabric.pump().await;

        for partition in 1..=3 {
            assert!(scope_exists(&mut fabric, partition, scope_key));
        }
        assert_eq!(pending_count(&mut fabric, 1), 0);

        // The origin logged one Acknowledged per target plus Finished.
        let engine = fabric.engine(1);
        let mut acknowledged = 0;
        let mut finished = 0;
        engine
            .store()
            .scan(&engine.state().log, |_, record| {
                match record.intent {
                    Intent::Distribution(DistributionIntent::Acknowledged) => acknowledged += 1,
                    Intent::Distribution(DistributionIntent::Finished) => finished += 1,
                    _ => {}
                }
                true
            })
            .unwrap();
        assert_eq!((acknowledged, finished), (2, 1));
    }

    #[tokio::test]
    async fn test_redelivered_command_is_rejected_and_reacknowledged() {
        let mut fabric = TestFabric::new(2);

        let outcome = fabric.submit(1, create_scope()).await.unwrap();
        let scope_key = created_key(&outcome);
        let original = outcome.records[0].clone();
        fabric.pump().await;
        assert!(scope_exists(&mut fabric, 2, scope_key));

        // Simulate the transport redelivering the distributed command.
        let copy = distributed_copy(&original.clone().with_key(scope_key), 1, scope_key);
        let redelivery = fabric.submit(2, copy).await.unwrap();

        // Rejected, not applied twice; the acknowledgment is still sent.
        assert_eq!(redelivery.records[1].record_type, RecordType::CommandRejection);
        assert!(redelivery.response.is_none());
        assert!(redelivery
            .side_effects
            .iter()
            .any(|e| matches!(e, SideEffect::SendCommand { target: 1, .. })));

        // The origin treats the duplicate acknowledgment as a no-op.
        fabric.pump().await;
        assert_eq!(pending_count(&mut fabric, 1), 0);
    }

    #[tokio::test]
    async fn test_unreachable_partition_stays_pending_until_retried() {
        let mut fabric = TestFabric::new(3);
        fabric.transport.set_unreachable(3);

        let outcome = fabric.submit(1, create_scope()).await.unwrap();
        let scope_key = created_key(&outcome);
        fabric.pump().await;

        // Partition 2 acknowledged; partition 3 never got the command.
        assert!(scope_exists(&mut fabric, 2, scope_key));
        assert!(!scope_exists(&mut fabric, 3, scope_key));
        assert_eq!(pending_count(&mut fabric, 1), 1);

        // Retrying against a dead partition keeps the entry pending.
        let mut redistributor = fabric.engines[0].redistributor();
        redistributor.run_retry_cycle().await.unwrap();
        assert_eq!(pending_count(&mut fabric, 1), 1);

        // Heal and retry: the command goes through and completes.
        fabric.transport.set_reachable(3);
        // Let the first retry's backoff elapse.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        redistributor.run_retry_cycle().await.unwrap();
        fabric.pump().await;

        assert!(scope_exists(&mut fabric, 3, scope_key));
        assert_eq!(pending_count(&mut fabric, 1), 0);
    }

    #[tokio::test]
    async fn test_ordered_distribution_waits_for_head_acknowledgment() {
        let mut fabric = TestFabric::new(2);

        let first = fabric.submit(1, create_scope()).await.unwrap();
        let second = fabric.submit(1, create_scope()).await.unwrap();
        let first_key = created_key(&first);
        let second_key = created_key(&second);

        // The first transmits immediately; the second waits in queue.
        assert!(first
            .side_effects
            .iter()
            .any(|e| matches!(e, SideEffect::SendCommand { .. })));
        assert!(!second
            .side_effects
            .iter()
            .any(|e| matches!(e, SideEffect::SendCommand { .. })));
        assert_eq!(fabric.transport.delivered(), 1);

        // Acknowledging the head releases the next in queue.
        fabric.pump().await;
        assert!(scope_exists(&mut fabric, 2, first_key));
        assert!(scope_exists(&mut fabric, 2, second_key));
        assert_eq!(pending_count(&mut fabric, 1), 0);

        // Both applied in distribution order on the receiving side.
        let engine = fabric.engine(2);
        let mut applied = Vec::new();
        engine
            .store()
            .scan(&engine.state().log, |_, record| {
                if record.intent == Intent::Scope(crate::record::ScopeIntent::Created) {
                    applied.push(record.key);
                }
                true
            })
            .unwrap();
        assert_eq!(applied, vec![first_key, second_key]);
    }

    #[tokio::test]
    async fn test_checkpoint_create_reaches_every_partition() {
        let mut fabric = TestFabric::new(2);

        fabric.submit(1, create_checkpoint(7)).await.unwrap();
        fabric.pump().await;

        for partition in 1..=2 {
            let engine = fabric.engine(partition);
            let mut ctx = DbContext::new();
            let row = engine
                .store()
                .read(&engine.state().checkpoint, &mut ctx, &())
                .unwrap()
                .unwrap();
            assert_eq!(row.checkpoint_id, 7);
        }
        assert_eq!(pending_count(&mut fabric, 1), 0);
    }
}
