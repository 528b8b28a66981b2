//! Process-scoped service context.
//!
//! Constructed once in `main` and threaded through component
//! constructors; nothing in the crate reaches for globals.

use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::credentials::CredentialManager;
use crate::error::ServiceResult;
use crate::ops::{CliGitAdapter, GitAdapter};
use crate::store::TaskStore;
use crate::task::TaskManager;
use crate::workspace::WorkspaceManager;

/// Everything the tool layer needs, fully wired.
pub struct ServiceContext {
    pub config: ServiceConfig,
    pub tasks: Arc<TaskManager>,
}

impl ServiceContext {
    /// Build the production wiring: SQLite store, env credentials, the
    /// CLI-backed adapter, and the task manager with its worker pool.
    pub async fn init(config: ServiceConfig) -> ServiceResult<Self> {
        let store = TaskStore::open(&config.store_path, config.max_storage_retries)?;
        Self::init_with(config, store, Arc::new(CliGitAdapter::new())).await
    }

    /// Wiring seam for tests: any store and any adapter.
    pub async fn init_with(
        config: ServiceConfig,
        store: TaskStore,
        adapter: Arc<dyn GitAdapter>,
    ) -> ServiceResult<Self> {
        let credentials = Arc::new(CredentialManager::from_env());
        let workspaces = Arc::new(WorkspaceManager::new(store.clone(), &config)?);
        let tasks = TaskManager::start(store, workspaces, credentials, adapter, config.clone())
            .await?;
        Ok(Self { config, tasks })
    }
}
