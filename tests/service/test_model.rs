//! Operation and task-record model tests.

use std::time::Duration;

use git_mcp_server::{Operation, TaskRecord, TaskStatus};
use serde_json::json;

#[test]
fn operation_wire_names_roundtrip() {
    for op in [
        Operation::Clone,
        Operation::BranchCreate,
        Operation::CherryPick,
        Operation::SparseCheckout,
        Operation::SubmoduleUpdate,
        Operation::LfsFetch,
        Operation::StashSave,
    ] {
        let name = op.as_str();
        assert_eq!(Operation::parse(name), Some(op), "`{name}`");
    }
    assert_eq!(Operation::parse("cherry-pick"), Some(Operation::CherryPick));
    assert_eq!(Operation::parse("no-such-op"), None);
}

#[test]
fn execution_classes_are_consistent() {
    // Every remote operation is async; merge/rebase are async but local.
    for op in [
        Operation::Clone,
        Operation::Fetch,
        Operation::Pull,
        Operation::Push,
        Operation::SubmoduleUpdate,
        Operation::LfsPull,
    ] {
        assert!(op.is_async(), "{op}");
        assert!(op.is_remote(), "{op}");
    }
    for op in [Operation::Merge, Operation::Rebase] {
        assert!(op.is_async(), "{op}");
        assert!(!op.is_remote(), "{op}");
    }
    for op in [Operation::Status, Operation::Commit, Operation::Blame] {
        assert!(!op.is_async(), "{op}");
        assert!(!op.is_remote(), "{op}");
    }
}

#[test]
fn idempotent_set_matches_the_recovery_contract() {
    for op in [
        Operation::Clone,
        Operation::Fetch,
        Operation::Log,
        Operation::Status,
        Operation::Diff,
        Operation::Blame,
    ] {
        assert!(op.is_idempotent(), "{op}");
    }
    for op in [Operation::Push, Operation::Merge, Operation::Commit] {
        assert!(!op.is_idempotent(), "{op}");
    }
}

#[test]
fn read_only_operations_are_not_mutating() {
    for op in [
        Operation::Status,
        Operation::Log,
        Operation::Diff,
        Operation::Blame,
        Operation::BranchList,
        Operation::TagList,
        Operation::RemoteList,
    ] {
        assert!(!op.is_mutating(), "{op}");
    }
    for op in [Operation::Clone, Operation::Add, Operation::Reset] {
        assert!(op.is_mutating(), "{op}");
    }
}

#[test]
fn new_task_record_shape() {
    let task = TaskRecord::new(
        Operation::Clone,
        json!({"url": "https://git.example/x.git"}),
        None,
        Duration::from_secs(300),
    );
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.attempt, 1);
    assert_eq!(task.progress, 0);
    assert!(task.deadline > task.created_at);
    assert!(task.started_at.is_none());
}

#[test]
fn status_terminality_and_wire_names() {
    for status in [
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::TimedOut,
    ] {
        assert!(status.is_terminal());
        assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
    }
    for status in [TaskStatus::Queued, TaskStatus::Running] {
        assert!(!status.is_terminal());
    }
    assert_eq!(TaskStatus::TimedOut.as_str(), "TIMED_OUT");

    // Serde uses the same representation as the store.
    let json = serde_json::to_value(TaskStatus::TimedOut).unwrap();
    assert_eq!(json, "TIMED_OUT");
}
