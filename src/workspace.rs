//! Workspace lifecycle: allocation, leases, quota enforcement, eviction.
//!
//! A workspace is one directory under the configured root, owner-only
//! permissions, hosting at most one repository. The manager owns the
//! directories and their store records; workers borrow a lease for the
//! duration of one task. Cleanup is driven by an idle sweeper and by
//! quota-pressure eviction, never by lease release.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{CleanupStrategy, ServiceConfig};
use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::store::TaskStore;

/// Eviction stops once usage drops below quota × HYSTERESIS.
const HYSTERESIS: f64 = 0.9;

/// Store record for one workspace directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub id: Uuid,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Last observed on-disk size; refreshed opportunistically.
    pub size_bytes: u64,
    /// Quarantined after a cancel-grace overrun or partial failure.
    /// Excluded from eviction and from mutating reuse until deleted.
    pub dirty: bool,
}

/// Filesystem capacity report for the volume hosting the root.
#[derive(Debug, Clone, Serialize)]
pub struct DiskSpace {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_by_workspaces_bytes: u64,
}

#[derive(Default)]
struct LeaseState {
    /// At most one mutating task holds a workspace at a time.
    writers: u32,
    /// Read-only accessors (status display, listings) may share.
    readers: u32,
}

impl LeaseState {
    fn total(&self) -> u32 {
        self.writers + self.readers
    }
}

pub struct WorkspaceManager {
    store: TaskStore,
    root: PathBuf,
    quota_bytes: u64,
    retention: Duration,
    strategy: CleanupStrategy,
    /// Lease counts per workspace id. Entries are removed at zero.
    leases: Mutex<HashMap<Uuid, LeaseState>>,
}

impl WorkspaceManager {
    /// Create the root directory if needed and canonicalize it; every
    /// containment check is against this resolved root.
    pub fn new(store: TaskStore, config: &ServiceConfig) -> ServiceResult<Self> {
        std::fs::create_dir_all(&config.workspace_root)?;
        let root = config.workspace_root.canonicalize()?;
        Ok(Self {
            store,
            root,
            quota_bytes: config.workspace_total_quota_bytes,
            retention: config.workspace_retention,
            strategy: config.cleanup_strategy,
            leases: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh workspace directory (mode 0700) and record it.
    ///
    /// Fails with STORAGE_FULL once aggregate usage exceeds the quota;
    /// the caller is expected to retry after eviction.
    pub async fn allocate(&self) -> ServiceResult<WorkspaceRecord> {
        let used = self.store.total_workspace_bytes().await?;
        if used >= self.quota_bytes {
            return Err(ServiceError::new(
                ErrorKind::StorageFull,
                format!("workspace quota exhausted ({used} bytes in use)"),
            )
            .with_suggestion("delete unused workspaces or raise WORKSPACE_TOTAL_QUOTA_BYTES"));
        }

        let id = Uuid::new_v4();
        let path = self.root.join(id.to_string());
        create_private_dir(&path)?;

        let now = Utc::now();
        let record = WorkspaceRecord {
            id,
            path: path.clone(),
            created_at: now,
            last_accessed_at: now,
            size_bytes: 0,
            dirty: false,
        };
        if let Err(e) = self.store.insert_workspace(&record).await {
            let _ = std::fs::remove_dir_all(&path);
            return Err(e);
        }
        debug!("allocated workspace {id} at {}", path.display());
        Ok(record)
    }

    /// Validate and lease a workspace for one task.
    ///
    /// Verifies the directory still exists (reaping the record if it was
    /// removed externally) and that its resolved path is a descendant of
    /// the root. `for_write` refuses dirty workspaces, which are
    /// quarantined until an operator deletes them.
    pub async fn acquire(&self, id: Uuid, for_write: bool) -> ServiceResult<WorkspaceRecord> {
        let record = self
            .store
            .get_workspace(id)
            .await?
            .ok_or_else(|| not_found(id))?;

        if !record.path.is_dir() {
            // Removed behind our back; reap on touch.
            warn!("workspace {id} directory vanished, reaping record");
            self.store.delete_workspace(id).await?;
            return Err(not_found(id));
        }

        let resolved = record.path.canonicalize()?;
        if !resolved.starts_with(&self.root) {
            return Err(ServiceError::new(
                ErrorKind::PathEscape,
                format!("workspace {id} resolves outside the workspace root"),
            ));
        }

        if for_write && record.dirty {
            return Err(ServiceError::new(
                ErrorKind::ResourceExhausted,
                format!("workspace {id} is quarantined after a partial operation"),
            )
            .with_suggestion("delete the workspace and re-clone"));
        }

        {
            let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
            let state = leases.entry(id).or_default();
            if for_write && state.writers > 0 {
                return Err(ServiceError::new(
                    ErrorKind::ResourceExhausted,
                    format!("workspace {id} is held by another running task"),
                )
                .with_suggestion("wait for the current task to finish or poll it"));
            }
            if for_write {
                state.writers += 1;
            } else {
                state.readers += 1;
            }
        }
        self.store.touch_workspace(id, Utc::now()).await?;
        Ok(record)
    }

    /// Return a lease. Workspaces are never deleted here; cleanup is the
    /// sweeper's and evictor's job.
    pub fn release(&self, id: Uuid, for_write: bool) {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = leases.get_mut(&id) {
            if for_write {
                state.writers = state.writers.saturating_sub(1);
            } else {
                state.readers = state.readers.saturating_sub(1);
            }
            if state.total() == 0 {
                leases.remove(&id);
            }
        }
    }

    pub fn lease_count(&self, id: Uuid) -> u32 {
        let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.get(&id).map(LeaseState::total).unwrap_or(0)
    }

    /// Update `last_accessed_at` only.
    pub async fn touch(&self, id: Uuid) -> ServiceResult<()> {
        if !self.store.touch_workspace(id, Utc::now()).await? {
            return Err(not_found(id));
        }
        Ok(())
    }

    /// Flag a workspace as quarantined (or clear the flag).
    pub async fn set_dirty(&self, id: Uuid, dirty: bool) -> ServiceResult<()> {
        self.store.set_workspace_dirty(id, dirty).await
    }

    /// Operator delete: remove directory and record. Refused while leased.
    pub async fn delete(&self, id: Uuid) -> ServiceResult<()> {
        if self.lease_count(id) > 0 {
            return Err(ServiceError::new(
                ErrorKind::ResourceExhausted,
                format!("workspace {id} is in use by a running task"),
            ));
        }
        let record = self
            .store
            .get_workspace(id)
            .await?
            .ok_or_else(|| not_found(id))?;
        remove_dir_blocking(record.path).await?;
        self.store.delete_workspace(id).await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> ServiceResult<Option<WorkspaceRecord>> {
        self.store.get_workspace(id).await
    }

    pub async fn list(&self) -> ServiceResult<Vec<WorkspaceRecord>> {
        self.store.list_workspaces(false).await
    }

    /// Recompute a workspace's on-disk size and persist the observation.
    pub async fn refresh_size(&self, id: Uuid) -> ServiceResult<u64> {
        let record = self
            .store
            .get_workspace(id)
            .await?
            .ok_or_else(|| not_found(id))?;
        let size = dir_size_blocking(record.path).await;
        self.store.update_workspace_size(id, size).await?;
        Ok(size)
    }

    /// Remove idle, unleased, non-dirty workspaces past the retention
    /// age. Also reaps records whose directories were removed externally.
    pub async fn cleanup_expired(&self) -> ServiceResult<u32> {
        let now = Utc::now();
        let mut removed = 0u32;
        for ws in self.store.list_workspaces(false).await? {
            if !ws.path.is_dir() {
                self.store.delete_workspace(ws.id).await?;
                continue;
            }
            if ws.dirty || self.lease_count(ws.id) > 0 {
                continue;
            }
            let idle = now.signed_duration_since(ws.last_accessed_at);
            if idle.to_std().unwrap_or_default() > self.retention {
                info!("expiring idle workspace {}", ws.id);
                remove_dir_blocking(ws.path).await?;
                self.store.delete_workspace(ws.id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Evict one workspace at a time (LRU or FIFO order, ties by id)
    /// until usage is at or below quota × 0.9. Leased and dirty
    /// workspaces are skipped; if nothing is evictable the pass stops
    /// short and logs at WARN.
    pub async fn evict_until_under_quota(&self) -> ServiceResult<u32> {
        let target = (self.quota_bytes as f64 * HYSTERESIS) as u64;
        let mut evicted = 0u32;

        loop {
            let mut total = self.store.total_workspace_bytes().await?;
            if total <= target {
                break;
            }

            let order_by_created = self.strategy == CleanupStrategy::Fifo;
            let candidates = self.store.list_workspaces(order_by_created).await?;
            let victim = candidates
                .into_iter()
                .find(|ws| !ws.dirty && self.lease_count(ws.id) == 0);

            let Some(victim) = victim else {
                warn!(
                    "quota pressure ({total} > {target} bytes) but every workspace is leased or quarantined"
                );
                break;
            };

            info!(
                "evicting workspace {} ({} bytes, {:?})",
                victim.id, victim.size_bytes, self.strategy
            );
            remove_dir_blocking(victim.path).await?;
            self.store.delete_workspace(victim.id).await?;
            evicted += 1;
            total = total.saturating_sub(victim.size_bytes);
            if total <= target {
                break;
            }
        }
        Ok(evicted)
    }

    /// Capacity of the filesystem hosting the workspace root.
    pub async fn disk_space(&self) -> ServiceResult<DiskSpace> {
        let used = self.store.total_workspace_bytes().await?;
        let (total_bytes, free_bytes) = fs_capacity(&self.root)?;
        Ok(DiskSpace {
            total_bytes,
            free_bytes,
            used_by_workspaces_bytes: used,
        })
    }

    /// Periodic idle sweep until `shutdown` fires.
    pub fn spawn_sweeper(
        manager: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(manager);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = manager.cleanup_expired().await {
                    warn!("workspace sweep failed: {e}");
                }
            }
        })
    }
}

fn not_found(id: Uuid) -> ServiceError {
    ServiceError::new(ErrorKind::WorkspaceNotFound, format!("workspace {id} not found"))
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> ServiceResult<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new().mode(0o700).create(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> ServiceResult<()> {
    std::fs::create_dir(path)?;
    Ok(())
}

#[cfg(unix)]
fn fs_capacity(path: &Path) -> ServiceResult<(u64, u64)> {
    let stat = nix::sys::statvfs::statvfs(path)
        .map_err(|e| ServiceError::internal(format!("statvfs failed: {e}")))?;
    let frag = stat.fragment_size() as u64;
    Ok((
        stat.blocks() as u64 * frag,
        stat.blocks_available() as u64 * frag,
    ))
}

#[cfg(not(unix))]
fn fs_capacity(_path: &Path) -> ServiceResult<(u64, u64)> {
    Ok((0, 0))
}

async fn remove_dir_blocking(path: PathBuf) -> ServiceResult<()> {
    tokio::task::spawn_blocking(move || {
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        Ok::<_, std::io::Error>(())
    })
    .await
    .map_err(|e| ServiceError::internal(format!("remove task died: {e}")))??;
    Ok(())
}

async fn dir_size_blocking(path: PathBuf) -> u64 {
    tokio::task::spawn_blocking(move || {
        walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
            .filter_map(|entry| entry.metadata().ok())
            .filter(|md| md.is_file())
            .map(|md| md.len())
            .sum()
    })
    .await
    .unwrap_or(0)
}

/// Join an externally supplied relative path onto a workspace path and
/// prove the result stays inside it.
///
/// Rejection happens before any I/O at the target: absolute paths, NUL
/// bytes, and lexical `..` escapes fail immediately; the surviving path
/// is then resolved through its deepest existing ancestor so symlinks
/// cannot smuggle it outside.
pub fn resolve_within(workspace: &Path, relative: &str) -> ServiceResult<PathBuf> {
    let escape = |detail: &str| {
        ServiceError::new(
            ErrorKind::PathEscape,
            format!("path `{relative}` escapes the workspace: {detail}"),
        )
    };

    if relative.contains('\0') {
        return Err(escape("NUL byte"));
    }
    let rel = Path::new(relative);
    if rel.is_absolute() {
        return Err(escape("absolute path"));
    }

    let mut depth: i32 = 0;
    for component in rel.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(escape("`..` traversal"));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return Err(escape("rooted component")),
        }
    }

    let base = workspace
        .canonicalize()
        .map_err(|e| escape(&format!("workspace unresolvable: {e}")))?;
    let joined = base.join(rel);

    // Resolve through the deepest existing ancestor so a symlink planted
    // inside the workspace cannot point the tail outside it.
    let mut existing = joined.clone();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();
    while !existing.exists() {
        let Some(name) = existing.file_name() else {
            return Err(escape("unresolvable ancestry"));
        };
        tail.push(name.to_os_string());
        let Some(parent) = existing.parent() else {
            return Err(escape("unresolvable ancestry"));
        };
        existing = parent.to_path_buf();
    }
    let resolved = existing
        .canonicalize()
        .map_err(|e| escape(&format!("cannot resolve: {e}")))?;
    if !resolved.starts_with(&base) {
        return Err(escape("resolves outside the workspace"));
    }

    let mut full = resolved;
    for name in tail.into_iter().rev() {
        full.push(name);
    }
    Ok(full)
}
