//! Task manager facade: submission, synchronous execution, status,
//! cancellation, listing, and the background sweepers (timeout,
//! retention GC).

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::credentials::CredentialManager;
use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::{GitAdapter, OpRequest, ProgressSink};
use crate::ratelimit::RateLimiter;
use crate::store::TaskStore;
use crate::task::model::{
    Operation, OperationLogEntry, TaskFilter, TaskRecord, TaskStatus,
};
use crate::task::queue::TaskQueue;
use crate::task::worker::{WorkerContext, WorkerPool};
use crate::workspace::WorkspaceManager;

pub struct TaskManager {
    store: TaskStore,
    queue: Arc<TaskQueue>,
    workspaces: Arc<WorkspaceManager>,
    credentials: Arc<CredentialManager>,
    adapter: Arc<dyn GitAdapter>,
    config: ServiceConfig,
    cancels: Arc<DashMap<Uuid, CancellationToken>>,
    limiter: RateLimiter,
    shutdown: CancellationToken,
}

impl TaskManager {
    /// Wire the scheduler together: restart recovery, worker pool, and
    /// both sweepers. The returned manager is ready to accept work.
    pub async fn start(
        store: TaskStore,
        workspaces: Arc<WorkspaceManager>,
        credentials: Arc<CredentialManager>,
        adapter: Arc<dyn GitAdapter>,
        config: ServiceConfig,
    ) -> ServiceResult<Arc<Self>> {
        let queue = Arc::new(TaskQueue::new(config.queue_capacity, config.queue_full_policy));
        let cancels: Arc<DashMap<Uuid, CancellationToken>> = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();

        // Tasks stranded in RUNNING by a previous process.
        let recovered = store.recover_running_tasks(config.restart_recovery).await?;
        for task in &recovered {
            info!("re-enqueueing recovered {} task {}", task.operation, task.id);
            queue.enqueue(task.id).await.ok();
        }

        let ctx = Arc::new(WorkerContext {
            store: store.clone(),
            workspaces: Arc::clone(&workspaces),
            credentials: Arc::clone(&credentials),
            adapter: Arc::clone(&adapter),
            cancels: Arc::clone(&cancels),
            permits: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
            config: config.clone(),
        });
        WorkerPool::spawn(Arc::clone(&ctx), Arc::clone(&queue), shutdown.clone());

        let manager = Arc::new(Self {
            store,
            queue,
            workspaces,
            credentials,
            adapter,
            limiter: RateLimiter::new(config.rate_limit_requests, config.rate_limit_window),
            config,
            cancels,
            shutdown,
        });

        Self::spawn_timeout_sweeper(&manager);
        Self::spawn_retention_gc(&manager);
        WorkspaceManager::spawn_sweeper(
            &manager.workspaces,
            manager.config.cleanup_interval,
            manager.shutdown.clone(),
        );

        Ok(manager)
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub fn workspaces(&self) -> &Arc<WorkspaceManager> {
        &self.workspaces
    }

    /// Queue depth, for introspection.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Create a task record for a long-running operation and enqueue it.
    /// Returns immediately with the task id.
    pub async fn submit(&self, operation: Operation, mut params: Value) -> ServiceResult<Uuid> {
        self.limiter.try_acquire()?;
        if !operation.is_async() {
            return Err(ServiceError::invalid_params(format!(
                "{operation} is a synchronous operation"
            )));
        }

        let workspace_id = self.resolve_submit_workspace(operation, &mut params).await?;
        let task = TaskRecord::new(operation, params, Some(workspace_id), self.config.task_timeout);
        let id = task.id;
        self.store.insert_task(&task).await?;

        if let Err(e) = self.queue.enqueue(id).await {
            // No queue slot: seal the record so nothing dangles in QUEUED.
            let _ = self
                .store
                .finish_task(id, TaskStatus::Failed, None, Some(e.clone()))
                .await;
            return Err(e);
        }

        self.audit(id, format!("queued {operation}")).await;

        // Enqueue doubles as quota-pressure trigger.
        let workspaces = Arc::clone(&self.workspaces);
        tokio::spawn(async move {
            if let Err(e) = workspaces.evict_until_under_quota().await {
                warn!("eviction pass failed: {e}");
            }
        });

        Ok(id)
    }

    /// Execute a local, fast operation directly, bypassing the queue.
    /// Same workspace and credential contract as the async path.
    pub async fn run_sync(&self, operation: Operation, params: Value) -> ServiceResult<Value> {
        if operation.is_async() {
            return Err(ServiceError::invalid_params(format!(
                "{operation} must be submitted as a task"
            )));
        }

        let workspace_id = required_workspace_id(&params)?;
        let for_write = operation.is_mutating();
        let workspace = self.workspaces.acquire(workspace_id, for_write).await?;

        let req = OpRequest {
            operation,
            params,
            workspace_id: Some(workspace_id),
            workspace_path: workspace.path.clone(),
            credential: None,
            progress: ProgressSink::noop(),
            cancel: CancellationToken::new(),
            timeout: self.config.task_timeout,
        };
        let result = self.adapter.execute(req).await;
        self.workspaces.release(workspace_id, for_write);
        result.map_err(|e| self.credentials.redact_error(e))
    }

    // ------------------------------------------------------------------
    // Introspection & control
    // ------------------------------------------------------------------

    pub async fn status(&self, id: Uuid) -> ServiceResult<TaskRecord> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| ServiceError::new(ErrorKind::TaskNotFound, format!("task {id} not found")))
    }

    pub async fn list(&self, filter: TaskFilter, limit: u32) -> ServiceResult<Vec<TaskRecord>> {
        self.store.list_tasks(filter, limit).await
    }

    pub async fn logs(&self, id: Uuid, limit: u32) -> ServiceResult<Vec<OperationLogEntry>> {
        self.store.list_logs(id, limit).await
    }

    /// Fire a task's cancel signal.
    ///
    /// QUEUED tasks are sealed CANCELLED immediately (the worker later
    /// skips the dead reference); RUNNING tasks flip once the adapter
    /// returns; terminal tasks are untouched and report `false`.
    pub async fn cancel(&self, id: Uuid) -> ServiceResult<bool> {
        let task = self.status(id).await?;
        if task.status.is_terminal() {
            return Ok(false);
        }

        if let Some(token) = self.cancels.get(&id) {
            token.cancel();
        } else {
            let token = CancellationToken::new();
            token.cancel();
            self.cancels.insert(id, token);
        }

        match task.status {
            TaskStatus::Queued => {
                let sealed = self
                    .store
                    .finish_task(
                        id,
                        TaskStatus::Cancelled,
                        None,
                        Some(ServiceError::new(
                            ErrorKind::TaskCancelled,
                            "cancelled before start",
                        )),
                    )
                    .await?;
                if sealed {
                    self.audit(id, "cancelled while queued".to_string()).await;
                }
                Ok(sealed)
            }
            // RUNNING: the worker observes the token and writes the
            // terminal state when the adapter yields.
            _ => {
                self.audit(id, "cancel requested".to_string()).await;
                Ok(true)
            }
        }
    }

    /// Stop accepting work and let workers drain.
    pub fn shutdown(&self) {
        self.queue.close();
        self.shutdown.cancel();
    }

    // ------------------------------------------------------------------
    // Background sweepers
    // ------------------------------------------------------------------

    fn spawn_timeout_sweeper(manager: &Arc<Self>) {
        let manager = Arc::clone(manager);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = manager.shutdown.cancelled() => break,
                    () = tokio::time::sleep(manager.config.timeout_check_interval) => {}
                }
                if let Err(e) = Self::sweep_timeouts(&manager).await {
                    warn!("timeout sweep failed: {e}");
                }
            }
        });
    }

    async fn sweep_timeouts(manager: &Arc<Self>) -> ServiceResult<()> {
        for task in manager.store.overdue_tasks(Utc::now()).await? {
            debug!("task {} is past its deadline", task.id);
            let token = manager
                .cancels
                .entry(task.id)
                .or_default()
                .clone();
            token.cancel();

            // Give the adapter its grace window; if it has not sealed the
            // task by then, seal it here and quarantine the workspace.
            let manager = Arc::clone(manager);
            tokio::spawn(async move {
                tokio::time::sleep(manager.config.cancel_grace).await;
                let overran = manager
                    .store
                    .finish_task(
                        task.id,
                        TaskStatus::TimedOut,
                        None,
                        Some(ServiceError::new(
                            ErrorKind::Timeout,
                            format!(
                                "task exceeded its {}s deadline and overran the cancel grace window",
                                manager.config.task_timeout.as_secs()
                            ),
                        )),
                    )
                    .await
                    .unwrap_or(false);
                if overran {
                    if let Some(ws) = task.workspace_id {
                        warn!("adapter overran cancel grace; quarantining workspace {ws}");
                        let _ = manager.workspaces.set_dirty(ws, true).await;
                    }
                    manager.cancels.remove(&task.id);
                }
            });
        }
        Ok(())
    }

    fn spawn_retention_gc(manager: &Arc<Self>) {
        let manager = Arc::clone(manager);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = manager.shutdown.cancelled() => break,
                    () = tokio::time::sleep(manager.config.retention_check_interval) => {}
                }
                let cutoff = Utc::now()
                    - chrono::Duration::from_std(manager.config.result_retention)
                        .unwrap_or_else(|_| chrono::Duration::seconds(3600));
                match manager.store.delete_tasks_older_than(cutoff).await {
                    Ok(0) => {}
                    Ok(n) => debug!("retention GC dropped {n} terminal tasks"),
                    Err(e) => warn!("retention GC failed: {e}"),
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Work out the workspace for an async submission: clone allocates
    /// on demand, everything else targets an existing workspace.
    async fn resolve_submit_workspace(
        &self,
        operation: Operation,
        params: &mut Value,
    ) -> ServiceResult<Uuid> {
        let provided = params
            .get("workspace_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| {
                Uuid::parse_str(s).map_err(|_| {
                    ServiceError::invalid_params(format!("`{s}` is not a workspace id"))
                })
            })
            .transpose()?;

        match provided {
            Some(id) => {
                // Fail fast on unknown targets rather than queueing a
                // doomed task.
                self.workspaces
                    .get(id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::new(
                            ErrorKind::WorkspaceNotFound,
                            format!("workspace {id} not found"),
                        )
                    })?;
                Ok(id)
            }
            None if operation == Operation::Clone => {
                let ws = self.workspaces.allocate().await?;
                if let Some(obj) = params.as_object_mut() {
                    obj.insert(
                        "workspace_id".to_string(),
                        Value::String(ws.id.to_string()),
                    );
                }
                Ok(ws.id)
            }
            None => Err(ServiceError::invalid_params(format!(
                "{operation} requires a workspace_id"
            ))),
        }
    }

    async fn audit(&self, id: Uuid, message: String) {
        let entry = OperationLogEntry {
            task_id: id,
            level: crate::task::model::LogLevel::Info,
            message: self.credentials.redact(&message),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.append_log(entry).await {
            warn!("op-log append failed for {id}: {e}");
        }
    }
}

fn required_workspace_id(params: &Value) -> ServiceResult<Uuid> {
    let raw = params
        .get("workspace_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ServiceError::invalid_params("workspace_id is required"))?;
    Uuid::parse_str(raw)
        .map_err(|_| ServiceError::invalid_params(format!("`{raw}` is not a workspace id")))
}
