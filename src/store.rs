//! Durable task, workspace, and operation-log store over SQLite.
//!
//! A single connection guarded by a mutex serializes all writes; calls
//! run on the blocking pool. Busy/locked errors are retried with
//! exponential backoff up to `max_storage_retries`, then surfaced as
//! kind STORAGE.
//!
//! Status transitions are conditional updates so racing writers cannot
//! both win: a claim requires `status='QUEUED'`, a terminal write
//! requires the row to still be live. Terminal rows are immutable.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use log::warn;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::config::RestartRecovery;
use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::task::model::{
    Operation, OperationLogEntry, TaskFilter, TaskRecord, TaskStatus,
};
use crate::workspace::WorkspaceRecord;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
  id            TEXT PRIMARY KEY,
  operation     TEXT NOT NULL,
  params        TEXT NOT NULL,
  workspace_id  TEXT,
  status        TEXT NOT NULL,
  progress      INTEGER NOT NULL DEFAULT 0,
  result        TEXT,
  error         TEXT,
  attempt       INTEGER NOT NULL DEFAULT 1,
  created_at    INTEGER NOT NULL,
  started_at    INTEGER,
  completed_at  INTEGER,
  deadline      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at);

CREATE TABLE IF NOT EXISTS workspaces (
  id               TEXT PRIMARY KEY,
  path             TEXT NOT NULL UNIQUE,
  created_at       INTEGER NOT NULL,
  last_accessed_at INTEGER NOT NULL,
  size_bytes       INTEGER NOT NULL DEFAULT 0,
  dirty            INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_workspaces_last_accessed
  ON workspaces(last_accessed_at);

CREATE TABLE IF NOT EXISTS operation_logs (
  id        INTEGER PRIMARY KEY AUTOINCREMENT,
  task_id   TEXT NOT NULL,
  level     TEXT NOT NULL,
  message   TEXT NOT NULL,
  timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_operation_logs_task_id
  ON operation_logs(task_id);
"#;

const TERMINAL_SQL: &str = "('COMPLETED','FAILED','CANCELLED','TIMED_OUT')";

struct StoreInner {
    conn: Mutex<Connection>,
    max_retries: u32,
}

/// Handle to the store. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct TaskStore {
    inner: Arc<StoreInner>,
}

impl TaskStore {
    /// Open (or create) the store at `path` and apply the schema.
    pub fn open(path: &Path, max_retries: u32) -> ServiceResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        Self::init(conn, max_retries)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> ServiceResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn, 3)
    }

    fn init(conn: Connection, max_retries: u32) -> ServiceResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON").ok();
        conn.busy_timeout(Duration::from_millis(250)).map_err(storage_err)?;
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                max_retries,
            }),
        })
    }

    /// Run `f` on the blocking pool with busy-retry.
    async fn call<T, F>(&self, f: F) -> ServiceResult<T>
    where
        T: Send + 'static,
        F: Fn(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut attempt = 0u32;
            loop {
                let mut conn = inner.conn.lock().unwrap_or_else(|e| e.into_inner());
                match f(&mut conn) {
                    Ok(v) => return Ok(v),
                    Err(e) if is_busy(&e) && attempt < inner.max_retries => {
                        drop(conn);
                        attempt += 1;
                        std::thread::sleep(Duration::from_millis(25u64 << attempt.min(6)));
                    }
                    Err(e) => return Err(storage_err(e)),
                }
            }
        })
        .await
        .map_err(|e| ServiceError::internal(format!("store worker died: {e}")))?
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    pub async fn insert_task(&self, task: &TaskRecord) -> ServiceResult<()> {
        let task = task.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO tasks (id, operation, params, workspace_id, status, progress, \
                 result, error, attempt, created_at, started_at, completed_at, deadline) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    task.id.to_string(),
                    task.operation.as_str(),
                    task.params.to_string(),
                    task.workspace_id.map(|w| w.to_string()),
                    task.status.as_str(),
                    task.progress as i64,
                    task.result.as_ref().map(|r| r.to_string()),
                    task.error.as_ref().and_then(|e| serde_json::to_string(e).ok()),
                    task.attempt as i64,
                    task.created_at.timestamp_millis(),
                    task.started_at.map(|t| t.timestamp_millis()),
                    task.completed_at.map(|t| t.timestamp_millis()),
                    task.deadline.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_task(&self, id: Uuid) -> ServiceResult<Option<TaskRecord>> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT id, operation, params, workspace_id, status, progress, result, \
                 error, attempt, created_at, started_at, completed_at, deadline \
                 FROM tasks WHERE id = ?1",
                params![id.to_string()],
                task_from_row,
            )
            .optional()
        })
        .await
    }

    pub async fn list_tasks(&self, filter: TaskFilter, limit: u32) -> ServiceResult<Vec<TaskRecord>> {
        self.call(move |conn| {
            let mut sql = String::from(
                "SELECT id, operation, params, workspace_id, status, progress, result, \
                 error, attempt, created_at, started_at, completed_at, deadline FROM tasks",
            );
            let mut clauses = Vec::new();
            let mut args: Vec<String> = Vec::new();
            if let Some(status) = filter.status {
                args.push(status.as_str().to_string());
                clauses.push(format!("status = ?{}", args.len()));
            }
            if let Some(op) = filter.operation {
                args.push(op.as_str().to_string());
                clauses.push(format!("operation = ?{}", args.len()));
            }
            if let Some(ws) = filter.workspace_id {
                args.push(ws.to_string());
                clauses.push(format!("workspace_id = ?{}", args.len()));
            }
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY created_at DESC LIMIT ");
            sql.push_str(&limit.to_string());

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), task_from_row)?;
            rows.collect()
        })
        .await
    }

    /// Atomic QUEUED -> RUNNING transition. Returns false when the task
    /// was cancelled (or otherwise moved) before a worker picked it up.
    pub async fn claim_task(&self, id: Uuid) -> ServiceResult<bool> {
        let now = Utc::now().timestamp_millis();
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE tasks SET status = 'RUNNING', started_at = ?2 \
                 WHERE id = ?1 AND status = 'QUEUED'",
                params![id.to_string(), now],
            )?;
            Ok(n == 1)
        })
        .await
    }

    /// Progress writes are monotone: a lower value than the stored one is
    /// silently dropped, and only RUNNING tasks accept progress.
    pub async fn update_progress(&self, id: Uuid, progress: u8) -> ServiceResult<()> {
        let progress = progress.min(100) as i64;
        self.call(move |conn| {
            conn.execute(
                "UPDATE tasks SET progress = ?2 \
                 WHERE id = ?1 AND status = 'RUNNING' AND progress < ?2",
                params![id.to_string(), progress],
            )?;
            Ok(())
        })
        .await
    }

    /// Write a terminal status (one transaction: status + result/error +
    /// completed_at + progress). Refuses to touch rows that are already
    /// terminal; returns whether the write landed.
    pub async fn finish_task(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<ServiceError>,
    ) -> ServiceResult<bool> {
        debug_assert!(status.is_terminal());
        let now = Utc::now().timestamp_millis();
        let progress_sql = if status == TaskStatus::Completed { 100i64 } else { -1 };
        self.call(move |conn| {
            let n = conn.execute(
                &format!(
                    "UPDATE tasks SET status = ?2, result = ?3, error = ?4, \
                     completed_at = ?5, progress = CASE WHEN ?6 >= 0 THEN ?6 ELSE progress END \
                     WHERE id = ?1 AND status NOT IN {TERMINAL_SQL}"
                ),
                params![
                    id.to_string(),
                    status.as_str(),
                    result.as_ref().map(|r| r.to_string()),
                    error.as_ref().and_then(|e| serde_json::to_string(e).ok()),
                    now,
                    progress_sql,
                ],
            )?;
            Ok(n == 1)
        })
        .await
    }

    /// RUNNING -> QUEUED for a retry; bumps `attempt`, clears progress.
    pub async fn requeue_task(&self, id: Uuid, next_attempt: u32) -> ServiceResult<bool> {
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE tasks SET status = 'QUEUED', progress = 0, started_at = NULL, \
                 attempt = ?2 WHERE id = ?1 AND status = 'RUNNING'",
                params![id.to_string(), next_attempt as i64],
            )?;
            Ok(n == 1)
        })
        .await
    }

    /// RUNNING tasks whose deadline is in the past.
    pub async fn overdue_tasks(&self, now: DateTime<Utc>) -> ServiceResult<Vec<TaskRecord>> {
        let cutoff = now.timestamp_millis();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, operation, params, workspace_id, status, progress, result, \
                 error, attempt, created_at, started_at, completed_at, deadline \
                 FROM tasks WHERE status = 'RUNNING' AND deadline < ?1",
            )?;
            let rows = stmt.query_map(params![cutoff], task_from_row)?;
            rows.collect()
        })
        .await
    }

    /// Retention GC: drop terminal tasks completed before `cutoff`.
    pub async fn delete_tasks_older_than(&self, cutoff: DateTime<Utc>) -> ServiceResult<u64> {
        let cutoff = cutoff.timestamp_millis();
        self.call(move |conn| {
            let n = conn.execute(
                &format!(
                    "DELETE FROM tasks WHERE status IN {TERMINAL_SQL} \
                     AND completed_at IS NOT NULL AND completed_at < ?1"
                ),
                params![cutoff],
            )?;
            // Logs for dropped tasks go with them.
            conn.execute(
                "DELETE FROM operation_logs WHERE task_id NOT IN (SELECT id FROM tasks)",
                [],
            )?;
            Ok(n as u64)
        })
        .await
    }

    /// Startup recovery: every RUNNING row belonged to a crashed process.
    /// Depending on policy, idempotent operations are re-queued and the
    /// rest (or all) are failed. Returns the re-queued records.
    pub async fn recover_running_tasks(
        &self,
        policy: RestartRecovery,
    ) -> ServiceResult<Vec<TaskRecord>> {
        let now = Utc::now().timestamp_millis();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let crashed: Vec<TaskRecord> = {
                let mut stmt = tx.prepare(
                    "SELECT id, operation, params, workspace_id, status, progress, result, \
                     error, attempt, created_at, started_at, completed_at, deadline \
                     FROM tasks WHERE status = 'RUNNING'",
                )?;
                let rows = stmt.query_map([], task_from_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            let mut requeued = Vec::new();
            for task in crashed {
                let requeue =
                    policy == RestartRecovery::RequeueIdempotent && task.operation.is_idempotent();
                if requeue {
                    tx.execute(
                        "UPDATE tasks SET status = 'QUEUED', progress = 0, started_at = NULL \
                         WHERE id = ?1",
                        params![task.id.to_string()],
                    )?;
                    requeued.push(TaskRecord {
                        status: TaskStatus::Queued,
                        progress: 0,
                        started_at: None,
                        ..task
                    });
                } else {
                    let error = ServiceError::new(
                        ErrorKind::Internal,
                        "process restarted while task was running",
                    );
                    tx.execute(
                        "UPDATE tasks SET status = 'FAILED', error = ?2, completed_at = ?3 \
                         WHERE id = ?1",
                        params![
                            task.id.to_string(),
                            serde_json::to_string(&error).ok(),
                            now
                        ],
                    )?;
                }
            }
            tx.commit()?;
            Ok(requeued)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Workspaces
    // ------------------------------------------------------------------

    pub async fn insert_workspace(&self, ws: &WorkspaceRecord) -> ServiceResult<()> {
        let ws = ws.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO workspaces (id, path, created_at, last_accessed_at, size_bytes, dirty) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    ws.id.to_string(),
                    ws.path.to_string_lossy(),
                    ws.created_at.timestamp_millis(),
                    ws.last_accessed_at.timestamp_millis(),
                    ws.size_bytes as i64,
                    ws.dirty as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_workspace(&self, id: Uuid) -> ServiceResult<Option<WorkspaceRecord>> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT id, path, created_at, last_accessed_at, size_bytes, dirty \
                 FROM workspaces WHERE id = ?1",
                params![id.to_string()],
                workspace_from_row,
            )
            .optional()
        })
        .await
    }

    /// All workspaces, ordered by the given column ascending (eviction
    /// order), ties broken by id.
    pub async fn list_workspaces(&self, order_by_created: bool) -> ServiceResult<Vec<WorkspaceRecord>> {
        let order = if order_by_created { "created_at" } else { "last_accessed_at" };
        let sql = format!(
            "SELECT id, path, created_at, last_accessed_at, size_bytes, dirty \
             FROM workspaces ORDER BY {order} ASC, id ASC"
        );
        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], workspace_from_row)?;
            rows.collect()
        })
        .await
    }

    pub async fn touch_workspace(&self, id: Uuid, at: DateTime<Utc>) -> ServiceResult<bool> {
        let at = at.timestamp_millis();
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE workspaces SET last_accessed_at = ?2 WHERE id = ?1",
                params![id.to_string(), at],
            )?;
            Ok(n == 1)
        })
        .await
    }

    pub async fn update_workspace_size(&self, id: Uuid, size_bytes: u64) -> ServiceResult<()> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE workspaces SET size_bytes = ?2 WHERE id = ?1",
                params![id.to_string(), size_bytes as i64],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn set_workspace_dirty(&self, id: Uuid, dirty: bool) -> ServiceResult<()> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE workspaces SET dirty = ?2 WHERE id = ?1",
                params![id.to_string(), dirty as i64],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_workspace(&self, id: Uuid) -> ServiceResult<bool> {
        self.call(move |conn| {
            let n = conn.execute(
                "DELETE FROM workspaces WHERE id = ?1",
                params![id.to_string()],
            )?;
            Ok(n == 1)
        })
        .await
    }

    pub async fn total_workspace_bytes(&self) -> ServiceResult<u64> {
        self.call(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM workspaces",
                [],
                |row| row.get(0),
            )?;
            Ok(total.max(0) as u64)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Operation log
    // ------------------------------------------------------------------

    /// Append-only; callers are responsible for redacting `message`.
    pub async fn append_log(&self, entry: OperationLogEntry) -> ServiceResult<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO operation_logs (task_id, level, message, timestamp) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.task_id.to_string(),
                    entry.level.as_str(),
                    entry.message,
                    entry.timestamp.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn list_logs(&self, task_id: Uuid, limit: u32) -> ServiceResult<Vec<OperationLogEntry>> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT task_id, level, message, timestamp FROM operation_logs \
                 WHERE task_id = ?1 ORDER BY id ASC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![task_id.to_string(), limit as i64], |row| {
                let task_id: String = row.get(0)?;
                let level: String = row.get(1)?;
                Ok(OperationLogEntry {
                    task_id: Uuid::parse_str(&task_id).unwrap_or_default(),
                    level: match level.as_str() {
                        "DEBUG" => crate::task::model::LogLevel::Debug,
                        "WARN" => crate::task::model::LogLevel::Warn,
                        "ERROR" => crate::task::model::LogLevel::Error,
                        _ => crate::task::model::LogLevel::Info,
                    },
                    message: row.get(2)?,
                    timestamp: millis_to_utc(row.get(3)?),
                })
            })?;
            rows.collect()
        })
        .await
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::DatabaseBusy
                || f.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn storage_err(e: rusqlite::Error) -> ServiceError {
    ServiceError::new(ErrorKind::Storage, format!("store error: {e}"))
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let id: String = row.get(0)?;
    let operation: String = row.get(1)?;
    let params: String = row.get(2)?;
    let workspace_id: Option<String> = row.get(3)?;
    let status: String = row.get(4)?;
    let progress: i64 = row.get(5)?;
    let result: Option<String> = row.get(6)?;
    let error: Option<String> = row.get(7)?;
    let attempt: i64 = row.get(8)?;
    let created_at: i64 = row.get(9)?;
    let started_at: Option<i64> = row.get(10)?;
    let completed_at: Option<i64> = row.get(11)?;
    let deadline: i64 = row.get(12)?;

    let operation = Operation::parse(&operation).unwrap_or_else(|| {
        warn!("unknown operation `{operation}` in store, treating as status");
        Operation::Status
    });

    Ok(TaskRecord {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        operation,
        params: serde_json::from_str(&params).unwrap_or(serde_json::Value::Null),
        workspace_id: workspace_id.and_then(|w| Uuid::parse_str(&w).ok()),
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Failed),
        progress: progress.clamp(0, 100) as u8,
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
        error: error.and_then(|e| serde_json::from_str(&e).ok()),
        attempt: attempt.max(1) as u32,
        created_at: millis_to_utc(created_at),
        started_at: started_at.map(millis_to_utc),
        completed_at: completed_at.map(millis_to_utc),
        deadline: millis_to_utc(deadline),
    })
}

fn workspace_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkspaceRecord> {
    let id: String = row.get(0)?;
    let path: String = row.get(1)?;
    let created_at: i64 = row.get(2)?;
    let last_accessed_at: i64 = row.get(3)?;
    let size_bytes: i64 = row.get(4)?;
    let dirty: i64 = row.get(5)?;
    Ok(WorkspaceRecord {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        path: PathBuf::from(path),
        created_at: millis_to_utc(created_at),
        last_accessed_at: millis_to_utc(last_accessed_at),
        size_bytes: size_bytes.max(0) as u64,
        dirty: dirty != 0,
    })
}
