//! Persistent store tests: transitions, claims, immutability, GC,
//! restart recovery.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use git_mcp_server::{
    ErrorKind, Operation, RestartRecovery, ServiceError, TaskRecord, TaskStatus, TaskStore,
    WorkspaceRecord,
};
use serde_json::json;
use uuid::Uuid;

fn store() -> TaskStore {
    TaskStore::in_memory().expect("in-memory store")
}

fn task(op: Operation) -> TaskRecord {
    TaskRecord::new(op, json!({"workspace_id": "w"}), Some(Uuid::new_v4()), Duration::from_secs(300))
}

fn workspace(path: &str) -> WorkspaceRecord {
    WorkspaceRecord {
        id: Uuid::new_v4(),
        path: PathBuf::from(path),
        created_at: Utc::now(),
        last_accessed_at: Utc::now(),
        size_bytes: 0,
        dirty: false,
    }
}

#[tokio::test]
async fn task_roundtrip_preserves_fields() {
    let store = store();
    let task = task(Operation::Fetch);
    store.insert_task(&task).await.expect("insert");

    let loaded = store.get_task(task.id).await.expect("get").expect("present");
    assert_eq!(loaded.id, task.id);
    assert_eq!(loaded.operation, Operation::Fetch);
    assert_eq!(loaded.status, TaskStatus::Queued);
    assert_eq!(loaded.attempt, 1);
    assert_eq!(loaded.progress, 0);
    assert_eq!(loaded.params, task.params);
    assert!(loaded.started_at.is_none());
    assert!(loaded.result.is_none());
}

#[tokio::test]
async fn claim_succeeds_exactly_once() {
    let store = store();
    let task = task(Operation::Clone);
    store.insert_task(&task).await.expect("insert");

    assert!(store.claim_task(task.id).await.expect("first claim"));
    assert!(!store.claim_task(task.id).await.expect("second claim"));

    let loaded = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Running);
    assert!(loaded.started_at.is_some());
}

#[tokio::test]
async fn terminal_status_is_immutable() {
    let store = store();
    let task = task(Operation::Push);
    store.insert_task(&task).await.expect("insert");
    store.claim_task(task.id).await.expect("claim");

    let sealed = store
        .finish_task(task.id, TaskStatus::Completed, Some(json!({"ok": true})), None)
        .await
        .expect("finish");
    assert!(sealed);

    // A later terminal write must not land.
    let overwrite = store
        .finish_task(
            task.id,
            TaskStatus::Failed,
            None,
            Some(ServiceError::new(ErrorKind::Internal, "late")),
        )
        .await
        .expect("no error");
    assert!(!overwrite);

    let loaded = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Completed);
    assert_eq!(loaded.progress, 100);
    assert_eq!(loaded.result, Some(json!({"ok": true})));
    assert!(loaded.error.is_none());
    assert!(loaded.completed_at.is_some());
}

#[tokio::test]
async fn progress_is_monotone_and_running_only() {
    let store = store();
    let task = task(Operation::Clone);
    store.insert_task(&task).await.expect("insert");

    // Not RUNNING yet: progress writes are dropped.
    store.update_progress(task.id, 40).await.expect("noop");
    assert_eq!(store.get_task(task.id).await.unwrap().unwrap().progress, 0);

    store.claim_task(task.id).await.expect("claim");
    store.update_progress(task.id, 50).await.expect("advance");
    store.update_progress(task.id, 30).await.expect("regress dropped");
    assert_eq!(store.get_task(task.id).await.unwrap().unwrap().progress, 50);

    store.update_progress(task.id, 80).await.expect("advance");
    assert_eq!(store.get_task(task.id).await.unwrap().unwrap().progress, 80);
}

#[tokio::test]
async fn requeue_bumps_attempt_and_resets_progress() {
    let store = store();
    let task = task(Operation::Fetch);
    store.insert_task(&task).await.expect("insert");
    store.claim_task(task.id).await.expect("claim");
    store.update_progress(task.id, 60).await.expect("progress");

    assert!(store.requeue_task(task.id, 2).await.expect("requeue"));
    let loaded = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TaskStatus::Queued);
    assert_eq!(loaded.attempt, 2);
    assert_eq!(loaded.progress, 0);
    assert!(loaded.started_at.is_none());

    // Requeue only applies to RUNNING tasks.
    assert!(!store.requeue_task(task.id, 3).await.expect("no-op"));
}

#[tokio::test]
async fn retention_gc_only_touches_old_terminal_tasks() {
    let store = store();
    let done = task(Operation::Fetch);
    let live = task(Operation::Clone);
    store.insert_task(&done).await.unwrap();
    store.insert_task(&live).await.unwrap();
    store.claim_task(done.id).await.unwrap();
    store
        .finish_task(done.id, TaskStatus::Completed, None, None)
        .await
        .unwrap();

    // Cutoff in the past keeps everything.
    let kept = store
        .delete_tasks_older_than(Utc::now() - chrono::Duration::hours(1))
        .await
        .expect("gc");
    assert_eq!(kept, 0);

    // Cutoff in the future reaps the completed task but never the
    // queued one.
    let reaped = store
        .delete_tasks_older_than(Utc::now() + chrono::Duration::seconds(5))
        .await
        .expect("gc");
    assert_eq!(reaped, 1);
    assert!(store.get_task(done.id).await.unwrap().is_none());
    assert!(store.get_task(live.id).await.unwrap().is_some());
}

#[tokio::test]
async fn overdue_lists_running_tasks_past_deadline() {
    let store = store();
    let mut overdue = task(Operation::Clone);
    overdue.deadline = Utc::now() - chrono::Duration::seconds(10);
    let fresh = task(Operation::Clone);
    store.insert_task(&overdue).await.unwrap();
    store.insert_task(&fresh).await.unwrap();
    store.claim_task(overdue.id).await.unwrap();
    store.claim_task(fresh.id).await.unwrap();

    let listed = store.overdue_tasks(Utc::now()).await.expect("overdue");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, overdue.id);
}

#[tokio::test]
async fn restart_recovery_requeues_idempotent_fails_the_rest() {
    let store = store();
    let fetch = task(Operation::Fetch);
    let push = task(Operation::Push);
    store.insert_task(&fetch).await.unwrap();
    store.insert_task(&push).await.unwrap();
    store.claim_task(fetch.id).await.unwrap();
    store.claim_task(push.id).await.unwrap();

    let requeued = store
        .recover_running_tasks(RestartRecovery::RequeueIdempotent)
        .await
        .expect("recover");
    assert_eq!(requeued.len(), 1);
    assert_eq!(requeued[0].id, fetch.id);

    let fetch_after = store.get_task(fetch.id).await.unwrap().unwrap();
    assert_eq!(fetch_after.status, TaskStatus::Queued);

    let push_after = store.get_task(push.id).await.unwrap().unwrap();
    assert_eq!(push_after.status, TaskStatus::Failed);
    assert_eq!(push_after.error.as_ref().map(|e| e.kind), Some(ErrorKind::Internal));
}

#[tokio::test]
async fn restart_recovery_fail_policy_fails_everything() {
    let store = store();
    let fetch = task(Operation::Fetch);
    store.insert_task(&fetch).await.unwrap();
    store.claim_task(fetch.id).await.unwrap();

    let requeued = store
        .recover_running_tasks(RestartRecovery::Fail)
        .await
        .expect("recover");
    assert!(requeued.is_empty());
    assert_eq!(
        store.get_task(fetch.id).await.unwrap().unwrap().status,
        TaskStatus::Failed
    );
}

#[tokio::test]
async fn workspace_records_roundtrip_and_order() {
    let store = store();
    let mut first = workspace("/tmp/ws-a");
    let mut second = workspace("/tmp/ws-b");
    // Deterministic ordering: first is older on both axes.
    first.created_at = Utc::now() - chrono::Duration::minutes(10);
    first.last_accessed_at = Utc::now() - chrono::Duration::minutes(5);
    second.created_at = Utc::now() - chrono::Duration::minutes(1);
    second.last_accessed_at = Utc::now();

    store.insert_workspace(&first).await.unwrap();
    store.insert_workspace(&second).await.unwrap();

    let by_access = store.list_workspaces(false).await.unwrap();
    assert_eq!(by_access[0].id, first.id);
    let by_created = store.list_workspaces(true).await.unwrap();
    assert_eq!(by_created[0].id, first.id);

    store.update_workspace_size(first.id, 4096).await.unwrap();
    store.set_workspace_dirty(first.id, true).await.unwrap();
    let loaded = store.get_workspace(first.id).await.unwrap().unwrap();
    assert_eq!(loaded.size_bytes, 4096);
    assert!(loaded.dirty);

    assert_eq!(store.total_workspace_bytes().await.unwrap(), 4096);

    assert!(store.delete_workspace(first.id).await.unwrap());
    assert!(!store.delete_workspace(first.id).await.unwrap());
}

#[tokio::test]
async fn operation_log_appends_in_order() {
    let store = store();
    let id = Uuid::new_v4();
    for (level, msg) in [
        (git_mcp_server::task::LogLevel::Info, "queued"),
        (git_mcp_server::task::LogLevel::Warn, "retrying"),
        (git_mcp_server::task::LogLevel::Error, "failed"),
    ] {
        store
            .append_log(git_mcp_server::task::OperationLogEntry {
                task_id: id,
                level,
                message: msg.to_string(),
                timestamp: Utc::now(),
            })
            .await
            .expect("append");
    }

    let entries = store.list_logs(id, 10).await.expect("list");
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].message, "queued");
    assert_eq!(entries[2].message, "failed");
}
