mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::FakeRemote;
use futures::FutureExt;
use futures::future::BoxFuture;
use rune_sync::{
    DrainReport, LocalStore, OutcomeQueue, PendingOutcome, RemoteCallError, ReviewRemote,
    StorageError, StoreLocation,
};

fn apply_with(
    remote: Arc<FakeRemote>,
) -> impl FnMut(PendingOutcome) -> BoxFuture<'static, Result<(), RemoteCallError>> {
    move |outcome| {
        let remote = Arc::clone(&remote);
        async move {
            remote
                .apply_review_outcome(&outcome.user_id, &outcome.item_id, outcome.is_correct)
                .await
        }
        .boxed()
    }
}

#[tokio::test]
async fn everything_queued_offline_is_applied_once_in_order() {
    common::init_logging();
    let queue = OutcomeQueue::new(LocalStore::in_memory());
    let remote = FakeRemote::new();

    let answers = [("fire", true), ("ice", false), ("wind", true), ("stone", true)];
    for (item_id, is_correct) in answers {
        queue.enqueue("alice", item_id, is_correct).await.unwrap();
    }
    assert_eq!(remote.attempts(), 0);

    let report = queue
        .drain("alice", apply_with(remote.clone()))
        .await
        .unwrap();

    assert_eq!(
        report,
        DrainReport {
            succeeded: 4,
            failed: 0
        }
    );
    let expected: Vec<_> = answers
        .iter()
        .map(|(item, correct)| (item.to_string(), *correct))
        .collect();
    assert_eq!(remote.applied(), expected);
    assert_eq!(queue.len("alice").await.unwrap(), 0);

    let again = queue
        .drain("alice", apply_with(remote.clone()))
        .await
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(remote.attempts(), 4);
}

#[tokio::test]
async fn a_rejected_outcome_stays_queued_while_the_rest_drain() {
    let queue = OutcomeQueue::new(LocalStore::in_memory());
    let remote = FakeRemote::new();
    remote.reject_item("ice");

    for (item_id, is_correct) in [("fire", true), ("ice", false), ("wind", true)] {
        queue.enqueue("alice", item_id, is_correct).await.unwrap();
    }

    let report = queue
        .drain("alice", apply_with(remote.clone()))
        .await
        .unwrap();
    assert_eq!(
        report,
        DrainReport {
            succeeded: 2,
            failed: 1
        }
    );

    let left: Vec<_> = queue
        .pending("alice")
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.item_id)
        .collect();
    assert_eq!(left, vec!["ice"]);

    remote.accept_all();
    let retry = queue
        .drain("alice", apply_with(remote.clone()))
        .await
        .unwrap();
    assert_eq!(retry.succeeded, 1);
    assert_eq!(queue.len("alice").await.unwrap(), 0);
}

#[tokio::test]
async fn drains_only_touch_the_requested_user() {
    let queue = OutcomeQueue::new(LocalStore::in_memory());
    let remote = FakeRemote::new();
    queue.enqueue("alice", "fire", true).await.unwrap();
    queue.enqueue("bob", "ice", true).await.unwrap();

    let report = queue
        .drain("alice", apply_with(remote.clone()))
        .await
        .unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(queue.len("bob").await.unwrap(), 1);
}

#[tokio::test]
async fn a_concurrent_drain_for_the_same_user_is_a_no_op() {
    let queue = OutcomeQueue::new(LocalStore::in_memory());
    for item_id in ["fire", "ice", "wind"] {
        queue.enqueue("alice", item_id, true).await.unwrap();
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let counting = |calls: Arc<AtomicUsize>| {
        move |_outcome: PendingOutcome| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok::<(), RemoteCallError>(())
            }
        }
    };

    let (first, second) = tokio::join!(
        queue.drain("alice", counting(calls.clone())),
        queue.drain("alice", counting(calls.clone())),
    );
    let mut reports = [first.unwrap(), second.unwrap()];
    reports.sort_by_key(|r| r.processed());

    assert_eq!(reports[0], DrainReport::default());
    assert_eq!(reports[1].succeeded, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn queues_sharing_a_store_never_drain_the_same_user_twice() {
    let store = LocalStore::in_memory();
    let first = OutcomeQueue::new(store.clone());
    let second = OutcomeQueue::new(store.clone());
    let remote = FakeRemote::new();
    for item_id in ["fire", "ice", "wind"] {
        first.enqueue("alice", item_id, true).await.unwrap();
    }

    let (a, b) = tokio::join!(
        first.drain("alice", apply_with(remote.clone())),
        second.drain("alice", apply_with(remote.clone())),
    );
    let mut reports = [a.unwrap(), b.unwrap()];
    reports.sort_by_key(|r| r.processed());

    assert_eq!(reports[0], DrainReport::default());
    assert_eq!(reports[1].succeeded, 3);
    assert_eq!(remote.attempts(), 3);
    assert_eq!(
        remote.applied(),
        vec![
            ("fire".to_string(), true),
            ("ice".to_string(), true),
            ("wind".to_string(), true)
        ]
    );
    assert_eq!(second.len("alice").await.unwrap(), 0);
}

#[tokio::test]
async fn a_failed_dequeue_stops_the_drain_and_reports_what_was_applied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reviews.db");
    let queue = OutcomeQueue::new(LocalStore::new(StoreLocation::File(path.clone())));
    for item_id in ["fire", "ice", "wind"] {
        queue.enqueue("alice", item_id, true).await.unwrap();
    }
    common::run_sql(
        &path,
        "CREATE TRIGGER pin_ice BEFORE DELETE ON sync_queue WHEN OLD.item_id = 'ice'
         BEGIN SELECT RAISE(ABORT, 'ice is pinned'); END;",
    );
    let remote = FakeRemote::new();

    let err = queue
        .drain("alice", apply_with(remote.clone()))
        .await
        .unwrap_err();

    assert_eq!(
        err.report,
        DrainReport {
            succeeded: 1,
            failed: 0
        }
    );
    assert!(matches!(err.source, StorageError::Sqlite { .. }), "{err}");
    assert_eq!(remote.attempts(), 2, "wind is never attempted");
    let left: Vec<_> = queue
        .pending("alice")
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.item_id)
        .collect();
    assert_eq!(left, vec!["ice", "wind"]);
}
