//! Environment-driven service configuration.
//!
//! Every knob has a default so the server starts with no environment at
//! all; unparseable values fall back to the default with a WARN line
//! rather than aborting startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

/// Workspace eviction selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupStrategy {
    /// Evict the workspace with the oldest `last_accessed_at` first.
    #[default]
    Lru,
    /// Evict the workspace with the oldest `created_at` first.
    Fifo,
}

impl FromStr for CleanupStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(CleanupStrategy::Lru),
            "fifo" => Ok(CleanupStrategy::Fifo),
            other => Err(format!("unknown cleanup strategy `{other}`")),
        }
    }
}

/// Behavior of `submit` when the task queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueFullPolicy {
    /// Fail the submit with QUEUE_FULL.
    #[default]
    Reject,
    /// Block until a slot frees up.
    Block,
}

impl FromStr for QueueFullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(QueueFullPolicy::Reject),
            "block" => Ok(QueueFullPolicy::Block),
            other => Err(format!("unknown queue-full policy `{other}`")),
        }
    }
}

/// What to do with tasks found RUNNING after a process restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartRecovery {
    /// Mark crashed tasks FAILED.
    #[default]
    Fail,
    /// Re-enqueue tasks whose operation is idempotent, fail the rest.
    RequeueIdempotent,
}

impl FromStr for RestartRecovery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(RestartRecovery::Fail),
            "requeue-idempotent" => Ok(RestartRecovery::RequeueIdempotent),
            other => Err(format!("unknown restart recovery policy `{other}`")),
        }
    }
}

/// Full service configuration, resolved once at startup and threaded
/// through component constructors.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root of all workspace paths.
    pub workspace_root: PathBuf,
    /// SQLite store file.
    pub store_path: PathBuf,
    /// Idle workspace eviction age.
    pub workspace_retention: Duration,
    /// Aggregate disk ceiling for workspaces.
    pub workspace_total_quota_bytes: u64,
    pub cleanup_strategy: CleanupStrategy,
    /// Period of the workspace sweeper.
    pub cleanup_interval: Duration,

    pub worker_count: usize,
    /// Concurrency permit count (simultaneously RUNNING tasks).
    pub max_concurrent_tasks: usize,
    pub queue_capacity: usize,
    pub queue_full_policy: QueueFullPolicy,

    /// Per-task deadline.
    pub task_timeout: Duration,
    pub timeout_check_interval: Duration,
    /// Terminal-task retention before GC.
    pub result_retention: Duration,
    pub retention_check_interval: Duration,

    pub max_retries: u32,
    /// Base delay for retry backoff.
    pub retry_base_delay: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Window the adapter gets to return after a cancel signal.
    pub cancel_grace: Duration,

    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,

    pub max_storage_retries: u32,
    pub restart_recovery: RestartRecovery,

    /// Shallow-by-default clone depth (0 disables the default).
    pub default_clone_depth: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let workspace_root = std::env::temp_dir().join("git-mcp-workspaces");
        let store_path = workspace_root.join("git-mcp.db");
        Self {
            workspace_root,
            store_path,
            workspace_retention: Duration::from_secs(3600),
            workspace_total_quota_bytes: 10 * 1024 * 1024 * 1024,
            cleanup_strategy: CleanupStrategy::Lru,
            cleanup_interval: Duration::from_secs(60),
            worker_count: 4,
            max_concurrent_tasks: 10,
            queue_capacity: 100,
            queue_full_policy: QueueFullPolicy::Reject,
            task_timeout: Duration::from_secs(300),
            timeout_check_interval: Duration::from_secs(5),
            result_retention: Duration::from_secs(3600),
            retention_check_interval: Duration::from_secs(60),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(10),
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            max_storage_retries: 3,
            restart_recovery: RestartRecovery::Fail,
            default_clone_depth: 1,
        }
    }
}

impl ServiceConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(root) = env_var("WORKSPACE_ROOT") {
            cfg.workspace_root = PathBuf::from(root);
            cfg.store_path = cfg.workspace_root.join("git-mcp.db");
        }
        if let Some(path) = env_var("STORE_PATH") {
            cfg.store_path = PathBuf::from(path);
        }

        env_secs("WORKSPACE_RETENTION_SECONDS", &mut cfg.workspace_retention);
        env_parse("WORKSPACE_TOTAL_QUOTA_BYTES", &mut cfg.workspace_total_quota_bytes);
        env_parse("WORKSPACE_CLEANUP_STRATEGY", &mut cfg.cleanup_strategy);
        env_secs("WORKSPACE_CLEANUP_INTERVAL_SECONDS", &mut cfg.cleanup_interval);

        env_parse("WORKER_COUNT", &mut cfg.worker_count);
        env_parse("MAX_CONCURRENT_TASKS", &mut cfg.max_concurrent_tasks);
        env_parse("QUEUE_CAPACITY", &mut cfg.queue_capacity);
        env_parse("QUEUE_FULL_POLICY", &mut cfg.queue_full_policy);

        env_secs("TASK_TIMEOUT_SECONDS", &mut cfg.task_timeout);
        env_secs("TIMEOUT_CHECK_INTERVAL_SECONDS", &mut cfg.timeout_check_interval);
        env_secs("RESULT_RETENTION_SECONDS", &mut cfg.result_retention);
        env_secs("RETENTION_CHECK_INTERVAL_SECONDS", &mut cfg.retention_check_interval);

        env_parse("MAX_RETRIES", &mut cfg.max_retries);
        env_millis("RETRY_BASE_DELAY_MS", &mut cfg.retry_base_delay);
        env_secs("MAX_BACKOFF_SECONDS", &mut cfg.max_backoff);
        env_secs("CANCEL_GRACE_SECONDS", &mut cfg.cancel_grace);

        env_parse("RATE_LIMIT_REQUESTS", &mut cfg.rate_limit_requests);
        env_secs("RATE_LIMIT_WINDOW", &mut cfg.rate_limit_window);

        env_parse("MAX_STORAGE_RETRIES", &mut cfg.max_storage_retries);
        env_parse("RESTART_RECOVERY", &mut cfg.restart_recovery);
        env_parse("DEFAULT_CLONE_DEPTH", &mut cfg.default_clone_depth);

        // A pool of zero workers is valid (used to exercise queue
        // saturation), but permits must stay positive.
        if cfg.max_concurrent_tasks == 0 {
            warn!("MAX_CONCURRENT_TASKS=0 is not usable, falling back to 1");
            cfg.max_concurrent_tasks = 1;
        }

        cfg
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str, slot: &mut T)
where
    T::Err: std::fmt::Display,
{
    if let Some(raw) = env_var(name) {
        match raw.trim().parse::<T>() {
            Ok(v) => *slot = v,
            Err(e) => warn!("ignoring {name}={raw}: {e}"),
        }
    }
}

fn env_secs(name: &str, slot: &mut Duration) {
    let mut secs = slot.as_secs();
    env_parse(name, &mut secs);
    *slot = Duration::from_secs(secs);
}

fn env_millis(name: &str, slot: &mut Duration) {
    let mut millis = slot.as_millis() as u64;
    env_parse(name, &mut millis);
    *slot = Duration::from_millis(millis);
}
