//! Integration tests for checkpoint coordination: monotonic accept,
//! ignore-with-echo, backup triggering, and listener registration.

#[cfg(test)]
mod tests {
    use crate::record::{CheckpointIntent, Intent, RecordValue};
    use crate::state::DbContext;
    use crate::testing::utils::{create_checkpoint, wait_until, with_request, TestFabric};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn checkpoint_row(fabric: &mut TestFabric) -> Option<(u64, u64)> {
        let engine = fabric.engine(1);
        let mut ctx = DbContext::new();
        engine
            .store()
            .read(&engine.state().checkpoint, &mut ctx, &())
            .unwrap()
            .map(|row| (row.checkpoint_id, row.checkpoint_position))
    }

    #[tokio::test]
    async fn test_create_on_empty_state_is_accepted() {
        let mut fabric = TestFabric::new(1);

        let outcome = fabric.submit(1, with_request(create_checkpoint(1))).await.unwrap();
        let position = outcome.position;

        assert_eq!(outcome.records[1].intent, Intent::Checkpoint(CheckpointIntent::Created));
        let RecordValue::Checkpoint(value) = &outcome.records[1].value else {
            panic!("expected checkpoint value");
        };
        assert_eq!(value.checkpoint_id, 1);
        assert_eq!(value.checkpoint_position, position);
        assert_eq!(checkpoint_row(&mut fabric), Some((1, position)));

        // The backup manager is handed exactly this checkpoint.
        let backup = Arc::clone(&fabric.backups[0]);
        assert!(
            wait_until(|| backup.taken() == vec![(1, position)], Duration::from_secs(1)).await
        );
    }

    #[tokio::test]
    async fn test_duplicate_create_is_ignored_and_echoes_current() {
        let mut fabric = TestFabric::new(1);

        let first = fabric.submit(1, create_checkpoint(1)).await.unwrap();
        let position = first.position;
        let backup = Arc::clone(&fabric.backups[0]);
        assert!(wait_until(|| backup.taken().len() == 1, Duration::from_secs(1)).await);

        let second = fabric.submit(1, with_request(create_checkpoint(1))).await.unwrap();

        assert_eq!(second.records[1].intent, Intent::Checkpoint(CheckpointIntent::Ignored));
        let RecordValue::Checkpoint(value) = &second.records[1].value else {
            panic!("expected checkpoint value");
        };
        assert_eq!((value.checkpoint_id, value.checkpoint_position), (1, position));
        assert_eq!(checkpoint_row(&mut fabric), Some((1, position)));

        // No second backup, ever.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backup.taken().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_create_echoes_current_not_requested() {
        let mut fabric = TestFabric::new(1);

        let accepted = fabric.submit(1, create_checkpoint(10)).await.unwrap();
        let position = accepted.position;

        let stale = fabric.submit(1, with_request(create_checkpoint(1))).await.unwrap();
        assert_eq!(stale.records[1].intent, Intent::Checkpoint(CheckpointIntent::Ignored));
        let RecordValue::Checkpoint(value) = &stale.records[1].value else {
            panic!("expected checkpoint value");
        };
        // Echoes the *current* checkpoint, not the rejected request.
        assert_eq!((value.checkpoint_id, value.checkpoint_position), (10, position));
        assert_eq!(checkpoint_row(&mut fabric), Some((10, position)));

        let response = stale.response.unwrap();
        assert_eq!(response.intent, Intent::Checkpoint(CheckpointIntent::Ignored));
    }

    #[tokio::test]
    async fn test_monotonicity_over_a_sequence() {
        let mut fabric = TestFabric::new(1);

        for id in [1u64, 3, 2, 3, 5, 4] {
            fabric.submit(1, create_checkpoint(id)).await.unwrap();
        }
        let (id, _) = checkpoint_row(&mut fabric).unwrap();
        assert_eq!(id, 5);

        let metrics = fabric.engine(1).metrics().snapshot();
        assert_eq!(metrics.checkpoints_created, 3); // 1, 3, 5
        assert_eq!(metrics.checkpoints_ignored, 3); // 2, 3, 4
    }

    #[tokio::test]
    async fn test_listener_registered_after_commit_sees_current_id() {
        let mut fabric = TestFabric::new(1);
        fabric.submit(1, create_checkpoint(5)).await.unwrap();

        let seen = Arc::new(AtomicU64::new(0));
        let clone = Arc::clone(&seen);
        fabric
            .engine(1)
            .checkpoint_coordinator()
            .register_listener(Box::new(move |id: u64| clone.store(id, Ordering::SeqCst)));

        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_listeners_are_notified_on_accept_only() {
        let mut fabric = TestFabric::new(1);

        let seen = Arc::new(AtomicU64::new(0));
        let notifications = Arc::new(AtomicU64::new(0));
        {
            let seen = Arc::clone(&seen);
            let notifications = Arc::clone(&notifications);
            fabric
                .engine(1)
                .checkpoint_coordinator()
                .register_listener(Box::new(move |id: u64| {
                    seen.store(id, Ordering::SeqCst);
                    notifications.fetch_add(1, Ordering::SeqCst);
                }));
        }

        fabric.submit(1, create_checkpoint(2)).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(notifications.load(Ordering::SeqCst), 1);

        // Ignored creates notify nobody.
        fabric.submit(1, create_checkpoint(1)).await.unwrap();
        assert_eq!(notifications.load(Ordering::SeqCst), 1);
    }
}
