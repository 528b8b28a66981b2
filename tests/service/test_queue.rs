//! Tests for the bounded FIFO task queue.

use std::sync::Arc;
use std::time::Duration;

use git_mcp_server::{ErrorKind, QueueFullPolicy, TaskQueue};
use uuid::Uuid;

#[tokio::test]
async fn dequeue_preserves_enqueue_order() {
    let queue = TaskQueue::new(10, QueueFullPolicy::Reject);
    let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
    for id in &ids {
        queue.enqueue(*id).await.expect("enqueue");
    }
    assert_eq!(queue.len(), 5);

    for expected in &ids {
        assert_eq!(queue.dequeue().await, Some(*expected));
    }
    assert!(queue.is_empty());
}

#[tokio::test]
async fn reject_policy_fails_fast_at_capacity() {
    let queue = TaskQueue::new(2, QueueFullPolicy::Reject);
    queue.enqueue(Uuid::new_v4()).await.expect("first");
    queue.enqueue(Uuid::new_v4()).await.expect("second");

    let err = queue.enqueue(Uuid::new_v4()).await.expect_err("third");
    assert_eq!(err.kind, ErrorKind::QueueFull);
    assert_eq!(queue.len(), 2);
}

#[tokio::test]
async fn block_policy_waits_for_a_slot() {
    let queue = Arc::new(TaskQueue::new(1, QueueFullPolicy::Block));
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    queue.enqueue(first).await.expect("first fits");

    let blocked = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.enqueue(second).await })
    };
    // The blocked enqueue must not complete while the queue is full.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());

    assert_eq!(queue.dequeue().await, Some(first));
    tokio::time::timeout(Duration::from_secs(1), blocked)
        .await
        .expect("unblocks")
        .expect("join")
        .expect("enqueue succeeds");
    assert_eq!(queue.dequeue().await, Some(second));
}

#[tokio::test]
async fn close_drains_then_signals_end() {
    let queue = TaskQueue::new(10, QueueFullPolicy::Reject);
    let id = Uuid::new_v4();
    queue.enqueue(id).await.expect("enqueue");
    queue.close();

    let err = queue.enqueue(Uuid::new_v4()).await.expect_err("closed");
    assert_eq!(err.kind, ErrorKind::QueueFull);

    // Remaining items drain, then the queue reports end-of-stream.
    assert_eq!(queue.dequeue().await, Some(id));
    assert_eq!(queue.dequeue().await, None);
}
