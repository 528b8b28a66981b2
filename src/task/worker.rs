//! Worker pool executing queued tasks.
//!
//! Each worker runs an identical cooperative loop: dequeue, claim,
//! acquire a concurrency permit, resolve credential and workspace,
//! invoke the adapter, and write the terminal state. A panicking
//! adapter call fails the task and never kills the worker; a crashed
//! worker is restarted by its supervisor until shutdown.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::credentials::{CredentialHandle, CredentialManager};
use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::{GitAdapter, OpRequest, ProgressSink};
use crate::store::TaskStore;
use crate::task::model::{LogLevel, OperationLogEntry, TaskRecord, TaskStatus};
use crate::task::queue::TaskQueue;
use crate::workspace::WorkspaceManager;

/// Minimum spacing between persisted progress updates.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Shared state every worker borrows.
pub struct WorkerContext {
    pub store: TaskStore,
    pub workspaces: Arc<WorkspaceManager>,
    pub credentials: Arc<CredentialManager>,
    pub adapter: Arc<dyn GitAdapter>,
    pub cancels: Arc<DashMap<Uuid, CancellationToken>>,
    pub permits: Arc<Semaphore>,
    pub config: ServiceConfig,
}

impl WorkerContext {
    /// Cancel token for a task, created on first use.
    pub fn cancel_token(&self, id: Uuid) -> CancellationToken {
        self.cancels.entry(id).or_default().clone()
    }

    async fn audit(&self, id: Uuid, level: LogLevel, message: String) {
        let entry = OperationLogEntry {
            task_id: id,
            level,
            message: self.credentials.redact(&message),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.append_log(entry).await {
            warn!("op-log append failed for {id}: {e}");
        }
    }
}

/// Supervisor over `worker_count` restartable workers.
pub struct WorkerPool {
    supervisors: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        ctx: Arc<WorkerContext>,
        queue: Arc<TaskQueue>,
        shutdown: CancellationToken,
    ) -> Self {
        let count = ctx.config.worker_count;
        let supervisors = (0..count)
            .map(|idx| {
                let ctx = Arc::clone(&ctx);
                let queue = Arc::clone(&queue);
                let shutdown = shutdown.clone();
                tokio::spawn(supervise(ctx, queue, shutdown, idx))
            })
            .collect();
        Self { supervisors }
    }

    /// Wait for every worker to exit (after queue close / shutdown).
    pub async fn join(self) {
        futures::future::join_all(self.supervisors).await;
    }
}

async fn supervise(
    ctx: Arc<WorkerContext>,
    queue: Arc<TaskQueue>,
    shutdown: CancellationToken,
    idx: usize,
) {
    loop {
        let handle = tokio::spawn(worker_loop(
            Arc::clone(&ctx),
            Arc::clone(&queue),
            shutdown.clone(),
            idx,
        ));
        match handle.await {
            Ok(()) => break,
            Err(e) => {
                error!("worker {idx} died: {e}; restarting");
                if shutdown.is_cancelled() {
                    break;
                }
            }
        }
    }
}

async fn worker_loop(
    ctx: Arc<WorkerContext>,
    queue: Arc<TaskQueue>,
    shutdown: CancellationToken,
    idx: usize,
) {
    debug!("worker {idx} up");
    loop {
        let id = tokio::select! {
            () = shutdown.cancelled() => break,
            id = queue.dequeue() => match id {
                Some(id) => id,
                None => break,
            },
        };
        process_task(&ctx, &queue, id).await;
    }
    debug!("worker {idx} exiting");
}

/// Drive one task from claim to terminal state. Infallible by design:
/// every error path ends in a terminal store write.
async fn process_task(ctx: &Arc<WorkerContext>, queue: &Arc<TaskQueue>, id: Uuid) {
    // Atomically QUEUED -> RUNNING; a task cancelled while queued loses
    // the race here and is simply skipped.
    match ctx.store.claim_task(id).await {
        Ok(true) => {}
        Ok(false) => {
            debug!("task {id} no longer claimable, skipping");
            ctx.cancels.remove(&id);
            return;
        }
        Err(e) => {
            warn!("claim of {id} failed: {e}");
            return;
        }
    }

    let task = match ctx.store.get_task(id).await {
        Ok(Some(task)) => task,
        Ok(None) | Err(_) => {
            let _ = ctx
                .store
                .finish_task(
                    id,
                    TaskStatus::Failed,
                    None,
                    Some(ServiceError::internal("task record vanished after claim")),
                )
                .await;
            return;
        }
    };

    let cancel = ctx.cancel_token(id);
    ctx.audit(
        id,
        LogLevel::Info,
        format!("attempt {} of {} started", task.attempt, task.operation),
    )
    .await;

    // Concurrency permit; cancellation is honored while waiting.
    let permit = tokio::select! {
        permit = Arc::clone(&ctx.permits).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
        () = cancel.cancelled() => {
            finish(ctx, &task, TaskStatus::Cancelled, None, Some(cancelled_error())).await;
            return;
        }
    };

    let outcome = execute_attempt(ctx, &task, &cancel).await;
    drop(permit);

    match outcome {
        Ok(result) => {
            finish(ctx, &task, TaskStatus::Completed, Some(result), None).await;
        }
        Err(err) => {
            handle_failure(ctx, queue, &task, err, &cancel).await;
        }
    }
}

/// Resolve resources and run the adapter once, isolating panics.
async fn execute_attempt(
    ctx: &Arc<WorkerContext>,
    task: &TaskRecord,
    cancel: &CancellationToken,
) -> ServiceResult<serde_json::Value> {
    let remaining = remaining_budget(task)?;

    let workspace_id = task.workspace_id.ok_or_else(|| {
        ServiceError::new(ErrorKind::WorkspaceNotFound, "task has no workspace")
    })?;
    let for_write = task.operation.is_mutating();
    let workspace = ctx.workspaces.acquire(workspace_id, for_write).await?;

    let credential = match resolve_credential(ctx, task) {
        Ok(credential) => credential,
        Err(e) => {
            ctx.workspaces.release(workspace_id, for_write);
            return Err(e);
        }
    };

    let req = OpRequest {
        operation: task.operation,
        params: task.params.clone(),
        workspace_id: Some(workspace_id),
        workspace_path: workspace.path.clone(),
        credential,
        progress: throttled_sink(ctx, task.id),
        cancel: cancel.clone(),
        timeout: remaining,
    };

    // The adapter runs in its own tokio task so a panic inside it is
    // contained to this attempt.
    let adapter = Arc::clone(&ctx.adapter);
    let result = match tokio::spawn(async move { adapter.execute(req).await }).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(ServiceError::internal(format!(
            "adapter panicked: {}",
            panic_message(e)
        ))),
        Err(_) => Err(cancelled_error()),
    };

    if result.is_ok() {
        // Opportunistic size refresh; failures are non-fatal.
        let workspaces = Arc::clone(&ctx.workspaces);
        tokio::spawn(async move {
            let _ = workspaces.refresh_size(workspace_id).await;
        });
    }
    ctx.workspaces.release(workspace_id, for_write);
    result
}

/// Map one failed attempt to retry, CANCELLED, TIMED_OUT, or FAILED.
async fn handle_failure(
    ctx: &Arc<WorkerContext>,
    queue: &Arc<TaskQueue>,
    task: &TaskRecord,
    err: ServiceError,
    cancel: &CancellationToken,
) {
    let past_deadline = Utc::now() >= task.deadline;

    match err.kind {
        ErrorKind::TaskCancelled if past_deadline => {
            // The cancel signal came from the timeout sweeper.
            quarantine_interrupted(ctx, task).await;
            finish(ctx, task, TaskStatus::TimedOut, None, Some(timeout_error(task))).await;
        }
        ErrorKind::TaskCancelled => {
            quarantine_interrupted(ctx, task).await;
            finish(ctx, task, TaskStatus::Cancelled, None, Some(err)).await;
        }
        ErrorKind::Timeout if past_deadline => {
            quarantine_interrupted(ctx, task).await;
            finish(ctx, task, TaskStatus::TimedOut, None, Some(err)).await;
        }
        kind if kind.retryable() && task.attempt < ctx.config.max_retries => {
            retry(ctx, queue, task, err, cancel).await;
        }
        _ => {
            quarantine_if_touched(ctx, task, err.kind).await;
            finish(ctx, task, TaskStatus::Failed, None, Some(err)).await;
        }
    }
}

async fn retry(
    ctx: &Arc<WorkerContext>,
    queue: &Arc<TaskQueue>,
    task: &TaskRecord,
    err: ServiceError,
    cancel: &CancellationToken,
) {
    let delay = backoff_delay(
        ctx.config.retry_base_delay,
        task.attempt,
        ctx.config.max_backoff,
    );
    ctx.audit(
        task.id,
        LogLevel::Warn,
        format!(
            "attempt {} failed ({}); retrying in {:.1}s",
            task.attempt,
            err.message,
            delay.as_secs_f64()
        ),
    )
    .await;

    tokio::select! {
        () = tokio::time::sleep(delay) => {}
        () = cancel.cancelled() => {
            finish(ctx, task, TaskStatus::Cancelled, None, Some(cancelled_error())).await;
            return;
        }
    }

    let next_attempt = task.attempt + 1;
    match ctx.store.requeue_task(task.id, next_attempt).await {
        Ok(true) => {
            if let Err(e) = queue.enqueue(task.id).await {
                // No slot for the retry: the attempt's error stands.
                let _ = ctx
                    .store
                    .finish_task(task.id, TaskStatus::Failed, None, Some(e))
                    .await;
            }
        }
        Ok(false) => {
            // Cancelled (or timed out) between failure and requeue.
            debug!("task {} left RUNNING state during backoff", task.id);
        }
        Err(e) => {
            let _ = ctx
                .store
                .finish_task(task.id, TaskStatus::Failed, None, Some(e))
                .await;
        }
    }
}

/// Write a terminal state and release the cancel registration.
async fn finish(
    ctx: &Arc<WorkerContext>,
    task: &TaskRecord,
    status: TaskStatus,
    result: Option<serde_json::Value>,
    error: Option<ServiceError>,
) {
    let error = error.map(|e| ctx.credentials.redact_error(e));
    let level = if status == TaskStatus::Completed {
        LogLevel::Info
    } else {
        LogLevel::Error
    };
    let detail = error
        .as_ref()
        .map(|e| format!(": {}", e.message))
        .unwrap_or_default();

    match ctx
        .store
        .finish_task(task.id, status, result, error)
        .await
    {
        Ok(true) => {
            ctx.audit(task.id, level, format!("task {status}{detail}")).await;
        }
        Ok(false) => {
            // Someone else (cancel, timeout sweeper) already sealed it.
            debug!("task {} already terminal, dropping {status}", task.id);
        }
        Err(e) => {
            error!("terminal write for {} failed: {e}", task.id);
        }
    }
    ctx.cancels.remove(&task.id);
}

/// Mutating operations that died mid-flight leave the tree in an
/// unknown state; quarantine so the workspace is not reused. Orderly
/// typed failures (conflicts are aborted by the adapter, validation
/// errors never reach the tree) keep the workspace clean.
async fn quarantine_if_touched(ctx: &Arc<WorkerContext>, task: &TaskRecord, kind: ErrorKind) {
    let interrupted_mid_flight = matches!(kind, ErrorKind::Internal | ErrorKind::Timeout);
    if !interrupted_mid_flight || !task.operation.is_mutating() || task.operation.is_idempotent() {
        return;
    }
    quarantine_interrupted(ctx, task).await;
}

/// A killed transfer can leave a half-written tree; the workspace stays
/// on disk but is excluded from reuse until an operator deletes it.
async fn quarantine_interrupted(ctx: &Arc<WorkerContext>, task: &TaskRecord) {
    if !task.operation.is_mutating() {
        return;
    }
    if let Some(ws) = task.workspace_id {
        info!("quarantining workspace {ws} after interrupted {}", task.operation);
        let _ = ctx.workspaces.set_dirty(ws, true).await;
    }
}

fn resolve_credential(
    ctx: &Arc<WorkerContext>,
    task: &TaskRecord,
) -> ServiceResult<Option<CredentialHandle>> {
    if !task.operation.is_remote() {
        return Ok(None);
    }
    let url = task
        .params
        .get("url")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    match ctx.credentials.resolve(url)? {
        Some(handle) => Ok(Some(handle)),
        // Named-remote operations carry no URL; give the ssh methods a
        // chance before going unauthenticated.
        None if url.is_empty() => ctx.credentials.resolve("ssh://remote"),
        None => Ok(None),
    }
}

/// Progress sink persisting at most one update per 250 ms, with the
/// store enforcing monotonicity.
fn throttled_sink(ctx: &Arc<WorkerContext>, id: Uuid) -> ProgressSink {
    let store = ctx.store.clone();
    let last_write: Mutex<Option<Instant>> = Mutex::new(None);
    ProgressSink::new(move |pct| {
        {
            let mut last = last_write.lock().unwrap_or_else(|e| e.into_inner());
            let due = last.map(|t| t.elapsed() >= PROGRESS_INTERVAL).unwrap_or(true);
            if !due && pct < 100 {
                return;
            }
            *last = Some(Instant::now());
        }
        let store = store.clone();
        tokio::spawn(async move {
            let _ = store.update_progress(id, pct).await;
        });
    })
}

fn remaining_budget(task: &TaskRecord) -> ServiceResult<Duration> {
    let remaining = task.deadline.signed_duration_since(Utc::now());
    remaining
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| timeout_error(task))
}

fn timeout_error(task: &TaskRecord) -> ServiceError {
    ServiceError::new(
        ErrorKind::Timeout,
        format!("task deadline {} exceeded", task.deadline.to_rfc3339()),
    )
}

fn cancelled_error() -> ServiceError {
    ServiceError::new(ErrorKind::TaskCancelled, "task cancelled")
}

/// Exponential backoff with ±25% jitter, capped.
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let exp = base.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1).min(16) as i32);
    let jitter = 0.75 + fastrand::f64() * 0.5;
    Duration::from_secs_f64((exp * jitter).min(cap.as_secs_f64()))
}

fn panic_message(e: tokio::task::JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "opaque panic payload".to_string()),
        Err(e) => e.to_string(),
    }
}
