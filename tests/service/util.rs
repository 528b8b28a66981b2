//! Shared fixtures: fast test configuration, a scriptable adapter, and
//! polling helpers.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use git_mcp_server::{
    ErrorKind, GitAdapter, OpRequest, ServiceConfig, ServiceContext, ServiceError, ServiceResult,
    TaskRecord, TaskStatus, TaskStore,
};

/// Config tuned for tests: temp root, tight sweeper intervals, fast
/// retry backoff.
pub fn test_config(root: &Path) -> ServiceConfig {
    ServiceConfig {
        workspace_root: root.to_path_buf(),
        store_path: root.join("test.db"),
        task_timeout: Duration::from_secs(30),
        timeout_check_interval: Duration::from_millis(50),
        retention_check_interval: Duration::from_secs(3600),
        cleanup_interval: Duration::from_secs(3600),
        retry_base_delay: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        cancel_grace: Duration::from_millis(500),
        ..ServiceConfig::default()
    }
}

/// Wire a context over an in-memory store and the given adapter.
pub async fn ctx_with(config: ServiceConfig, adapter: Arc<dyn GitAdapter>) -> ServiceContext {
    let store = TaskStore::in_memory().expect("in-memory store");
    ServiceContext::init_with(config, store, adapter)
        .await
        .expect("context init")
}

/// Poll a task until it reaches a terminal status.
pub async fn wait_terminal(ctx: &ServiceContext, id: Uuid, budget: Duration) -> TaskRecord {
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        let task = ctx.tasks.status(id).await.expect("task exists");
        if task.status.is_terminal() {
            return task;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {id} stuck in {:?}",
            task.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn wait_status(ctx: &ServiceContext, id: Uuid, status: TaskStatus, budget: Duration) {
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        let task = ctx.tasks.status(id).await.expect("task exists");
        if task.status == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {id} never reached {status:?}, still {:?}",
            task.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Scripted adapter behaviors for scheduler tests. Every behavior
/// honors the request's cancel token and timeout budget the way a
/// compliant adapter must.
pub enum MockBehavior {
    /// Return this payload immediately.
    Instant(serde_json::Value),
    /// Report progress, sleep, then return the payload.
    Sleep(Duration, serde_json::Value),
    /// Fail with the given kind `n` times, then succeed.
    FailTimes(AtomicU32, ErrorKind),
    /// Block until cancelled (or the budget runs out).
    HangUntilCancel,
    /// Ignore cancellation and the budget entirely; only the timeout
    /// sweeper's grace machinery can deal with this one.
    Unresponsive,
    /// Panic inside the adapter call.
    Panic,
}

pub struct MockAdapter {
    behavior: MockBehavior,
}

impl MockAdapter {
    pub fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self { behavior })
    }

    pub fn instant(value: serde_json::Value) -> Arc<Self> {
        Self::new(MockBehavior::Instant(value))
    }

    pub fn fail_times(n: u32, kind: ErrorKind) -> Arc<Self> {
        Self::new(MockBehavior::FailTimes(AtomicU32::new(n), kind))
    }
}

#[async_trait]
impl GitAdapter for MockAdapter {
    async fn execute(&self, req: OpRequest) -> ServiceResult<serde_json::Value> {
        match &self.behavior {
            MockBehavior::Instant(value) => {
                req.progress.emit(100);
                Ok(value.clone())
            }
            MockBehavior::Sleep(duration, value) => {
                req.progress.emit(0);
                tokio::select! {
                    () = tokio::time::sleep(*duration) => {
                        req.progress.emit(100);
                        Ok(value.clone())
                    }
                    () = req.cancel.cancelled() => {
                        Err(ServiceError::new(ErrorKind::TaskCancelled, "cancelled"))
                    }
                    () = tokio::time::sleep(req.timeout) => {
                        Err(ServiceError::new(ErrorKind::Timeout, "budget exhausted"))
                    }
                }
            }
            MockBehavior::FailTimes(remaining, kind) => {
                let before = remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .unwrap_or(0);
                if before > 0 {
                    Err(ServiceError::new(*kind, "injected failure"))
                } else {
                    Ok(serde_json::json!({ "ok": true }))
                }
            }
            MockBehavior::HangUntilCancel => {
                tokio::select! {
                    () = req.cancel.cancelled() => {
                        Err(ServiceError::new(ErrorKind::TaskCancelled, "cancelled"))
                    }
                    () = tokio::time::sleep(req.timeout) => {
                        Err(ServiceError::new(ErrorKind::Timeout, "budget exhausted"))
                    }
                }
            }
            MockBehavior::Unresponsive => {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(serde_json::json!({ "unreachable": true }))
            }
            MockBehavior::Panic => panic!("scripted adapter panic"),
        }
    }
}

// ---------------------------------------------------------------------
// Real-git fixtures
// ---------------------------------------------------------------------

pub fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn run_git(dir: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Fixture")
        .env("GIT_AUTHOR_EMAIL", "fixture@example.com")
        .env("GIT_COMMITTER_NAME", "Fixture")
        .env("GIT_COMMITTER_EMAIL", "fixture@example.com")
        .args(args)
        .status()
        .expect("git runs");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

/// Build a small repository with one commit and return its path.
pub fn fixture_repo(parent: &Path) -> PathBuf {
    let repo = parent.join("origin-repo");
    std::fs::create_dir_all(&repo).expect("fixture dir");
    run_git(&repo, &["init", "--initial-branch=main"]);
    std::fs::write(repo.join("seed.txt"), "seed\n").expect("seed file");
    run_git(&repo, &["add", "."]);
    run_git(&repo, &["commit", "-m", "seed"]);
    repo
}
