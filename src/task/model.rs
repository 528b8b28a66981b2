//! Task records and the closed operation set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;

/// Every Git operation the service schedules or runs directly.
///
/// Wire names are kebab-case (`submodule-update`, `cherry-pick`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    // Remote, long-running (queued)
    Clone,
    Fetch,
    Pull,
    Push,
    Merge,
    Rebase,
    SubmoduleUpdate,
    SubmoduleAdd,
    LfsFetch,
    LfsPull,

    // Local, fast (synchronous)
    Status,
    Add,
    Commit,
    Checkout,
    BranchList,
    BranchCreate,
    BranchDelete,
    Log,
    Diff,
    Blame,
    StashSave,
    StashPop,
    StashList,
    TagCreate,
    TagDelete,
    TagList,
    RemoteList,
    RemoteAdd,
    RemoteRemove,
    Reset,
    CherryPick,
    Revert,
    Clean,
    SparseCheckout,
    SubmoduleList,
    LfsTrack,
}

impl Operation {
    /// Wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Clone => "clone",
            Operation::Fetch => "fetch",
            Operation::Pull => "pull",
            Operation::Push => "push",
            Operation::Merge => "merge",
            Operation::Rebase => "rebase",
            Operation::SubmoduleUpdate => "submodule-update",
            Operation::SubmoduleAdd => "submodule-add",
            Operation::LfsFetch => "lfs-fetch",
            Operation::LfsPull => "lfs-pull",
            Operation::Status => "status",
            Operation::Add => "add",
            Operation::Commit => "commit",
            Operation::Checkout => "checkout",
            Operation::BranchList => "branch-list",
            Operation::BranchCreate => "branch-create",
            Operation::BranchDelete => "branch-delete",
            Operation::Log => "log",
            Operation::Diff => "diff",
            Operation::Blame => "blame",
            Operation::StashSave => "stash-save",
            Operation::StashPop => "stash-pop",
            Operation::StashList => "stash-list",
            Operation::TagCreate => "tag-create",
            Operation::TagDelete => "tag-delete",
            Operation::TagList => "tag-list",
            Operation::RemoteList => "remote-list",
            Operation::RemoteAdd => "remote-add",
            Operation::RemoteRemove => "remote-remove",
            Operation::Reset => "reset",
            Operation::CherryPick => "cherry-pick",
            Operation::Revert => "revert",
            Operation::Clean => "clean",
            Operation::SparseCheckout => "sparse-checkout",
            Operation::SubmoduleList => "submodule-list",
            Operation::LfsTrack => "lfs-track",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }

    /// Long-running network-bound operations go through the task queue.
    pub fn is_async(self) -> bool {
        matches!(
            self,
            Operation::Clone
                | Operation::Fetch
                | Operation::Pull
                | Operation::Push
                | Operation::Merge
                | Operation::Rebase
                | Operation::SubmoduleUpdate
                | Operation::SubmoduleAdd
                | Operation::LfsFetch
                | Operation::LfsPull
        )
    }

    /// Operations that talk to a remote and need credential resolution.
    pub fn is_remote(self) -> bool {
        matches!(
            self,
            Operation::Clone
                | Operation::Fetch
                | Operation::Pull
                | Operation::Push
                | Operation::SubmoduleUpdate
                | Operation::SubmoduleAdd
                | Operation::LfsFetch
                | Operation::LfsPull
        )
    }

    /// Safe to re-run from scratch: crashed instances may be re-enqueued
    /// and partial failures do not dirty the workspace.
    pub fn is_idempotent(self) -> bool {
        matches!(
            self,
            Operation::Clone
                | Operation::Fetch
                | Operation::Log
                | Operation::Status
                | Operation::Diff
                | Operation::Blame
        )
    }

    /// Whether the operation mutates the workspace tree.
    pub fn is_mutating(self) -> bool {
        !matches!(
            self,
            Operation::Status
                | Operation::Log
                | Operation::Diff
                | Operation::Blame
                | Operation::BranchList
                | Operation::StashList
                | Operation::TagList
                | Operation::RemoteList
                | Operation::SubmoduleList
        )
    }

    /// Clone allocates its own workspace; everything else targets an
    /// existing one.
    pub fn requires_workspace(self) -> bool {
        !matches!(self, Operation::Clone)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle states. Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::TimedOut => "TIMED_OUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(TaskStatus::Queued),
            "RUNNING" => Some(TaskStatus::Running),
            "COMPLETED" => Some(TaskStatus::Completed),
            "FAILED" => Some(TaskStatus::Failed),
            "CANCELLED" => Some(TaskStatus::Cancelled),
            "TIMED_OUT" => Some(TaskStatus::TimedOut),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::TimedOut
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scheduled (or directly executed) unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub operation: Operation,
    /// Opaque, handler-validated parameter payload.
    pub params: serde_json::Value,
    pub workspace_id: Option<Uuid>,
    pub status: TaskStatus,
    /// 0..=100, monotonically non-decreasing while RUNNING.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceError>,
    /// 1-based; incremented on every retry re-enqueue.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub deadline: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(
        operation: Operation,
        params: serde_json::Value,
        workspace_id: Option<Uuid>,
        timeout: std::time::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            operation,
            params,
            workspace_id,
            status: TaskStatus::Queued,
            progress: 0,
            result: None,
            error: None,
            attempt: 1,
            created_at: now,
            started_at: None,
            completed_at: None,
            deadline: now + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::seconds(300)),
        }
    }
}

/// Filter for task listings.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub operation: Option<Operation>,
    pub workspace_id: Option<Uuid>,
}

/// Operation-log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Append-only audit entry tied to a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub task_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
