//! Admission-control tests for the task queue
//!
//! Run with: cargo test -p orator-worker --test queue_test

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use orator_worker::{QueueError, TaskQueue};
use parking_lot::Mutex;

#[test_log::test(tokio::test(start_paused = true))]
async fn pending_tasks_start_by_priority() {
    let queue = TaskQueue::new(1);
    let order = Arc::new(Mutex::new(Vec::new()));

    let record = |name: &'static str, work: Duration| {
        let order = Arc::clone(&order);
        move || async move {
            order.lock().push(name);
            tokio::time::sleep(work).await;
        }
    };

    let a = queue.submit("A", 0, record("A", Duration::from_millis(100)));
    let c = queue.submit("C", 3, record("C", Duration::from_millis(10)));
    let b = queue.submit("B", 5, record("B", Duration::from_millis(10)));

    assert_eq!(queue.active_count(), 1);
    assert_eq!(queue.pending_ids(), vec!["B", "C"]);

    let results = join_all([a, b, c]).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(*order.lock(), vec!["A", "B", "C"]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn never_runs_more_than_the_limit() {
    let queue = TaskQueue::new(3);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            queue.submit(format!("task-{i}"), 0, move || async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                i
            })
        })
        .collect();

    assert_eq!(queue.active_count(), 3);
    assert_eq!(queue.queue_length(), 7);

    let results: Vec<usize> = join_all(handles)
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .collect();

    assert_eq!(results, (0..10).collect::<Vec<_>>());
    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert_eq!(queue.active_count(), 0);
    assert_eq!(queue.queue_length(), 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn failed_task_releases_its_slot() {
    let queue = TaskQueue::new(1);
    let failing = queue.submit("failing", 0, || async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Err::<u32, _>("provider unavailable")
    });
    let next = queue.submit("next", 0, || async { Ok::<_, &str>(1) });

    assert_eq!(failing.await, Ok(Err("provider unavailable")));
    assert_eq!(next.await, Ok(Ok(1)));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn clear_leaves_running_tasks_and_accepts_new_work() {
    let queue = TaskQueue::new(2);
    let first = queue.submit("first", 0, || async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        "first"
    });
    let second = queue.submit("second", 0, || async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        "second"
    });
    let waiting: Vec<_> = (0..3)
        .map(|i| queue.submit(format!("waiting-{i}"), 1, || async { "waiting" }))
        .collect();

    assert_eq!(queue.clear(), 3);
    for handle in waiting {
        assert!(matches!(handle.await, Err(QueueError::Cleared(_))));
    }

    assert_eq!(first.await, Ok("first"));
    assert_eq!(second.await, Ok("second"));

    let later = queue.submit("later", 0, || async { "later" });
    assert_eq!(later.await, Ok("later"));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn clones_share_slots() {
    let queue = TaskQueue::new(1);
    let other = queue.clone();

    let _busy = queue.submit("busy", 0, || async {
        tokio::time::sleep(Duration::from_secs(1)).await
    });
    let _waiting = other.submit("waiting", 0, || async {});

    assert_eq!(other.active_count(), 1);
    assert_eq!(queue.queue_length(), 1);
}
