//! Workspace manager tests: allocation, leases, quota eviction, path
//! safety.

use std::sync::Arc;
use std::time::Duration;

use git_mcp_server::{
    CleanupStrategy, ErrorKind, ServiceConfig, TaskStore, WorkspaceManager, resolve_within,
};

fn manager_with(config: ServiceConfig) -> (Arc<WorkspaceManager>, TaskStore) {
    let store = TaskStore::in_memory().expect("store");
    let manager = WorkspaceManager::new(store.clone(), &config).expect("manager");
    (Arc::new(manager), store)
}

fn base_config(root: &std::path::Path) -> ServiceConfig {
    ServiceConfig {
        workspace_root: root.to_path_buf(),
        ..ServiceConfig::default()
    }
}

#[tokio::test]
async fn allocate_creates_private_dir_under_root() {
    let tmp = tempfile::tempdir().expect("tmp");
    let (manager, _store) = manager_with(base_config(tmp.path()));

    let ws = manager.allocate().await.expect("allocate");
    assert!(ws.path.is_dir());
    assert!(ws.path.starts_with(manager.root()));
    assert!(!ws.dirty);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&ws.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}

#[tokio::test]
async fn acquire_release_tracks_leases() {
    let tmp = tempfile::tempdir().expect("tmp");
    let (manager, _store) = manager_with(base_config(tmp.path()));
    let ws = manager.allocate().await.expect("allocate");

    manager.acquire(ws.id, true).await.expect("writer lease");
    manager.acquire(ws.id, false).await.expect("reader lease");
    assert_eq!(manager.lease_count(ws.id), 2);

    manager.release(ws.id, true);
    manager.release(ws.id, false);
    assert_eq!(manager.lease_count(ws.id), 0);
}

#[tokio::test]
async fn mutating_lease_is_exclusive_readers_share() {
    let tmp = tempfile::tempdir().expect("tmp");
    let (manager, _store) = manager_with(base_config(tmp.path()));
    let ws = manager.allocate().await.expect("allocate");

    manager.acquire(ws.id, true).await.expect("writer");
    let err = manager.acquire(ws.id, true).await.expect_err("second writer");
    assert_eq!(err.kind, ErrorKind::ResourceExhausted);

    // Readers are unaffected by the writer.
    manager.acquire(ws.id, false).await.expect("reader");
    manager.acquire(ws.id, false).await.expect("another reader");

    manager.release(ws.id, true);
    manager.acquire(ws.id, true).await.expect("writer again");
}

#[tokio::test]
async fn acquire_unknown_workspace_is_not_found() {
    let tmp = tempfile::tempdir().expect("tmp");
    let (manager, _store) = manager_with(base_config(tmp.path()));

    let err = manager
        .acquire(uuid::Uuid::new_v4(), false)
        .await
        .expect_err("missing");
    assert_eq!(err.kind, ErrorKind::WorkspaceNotFound);
}

#[tokio::test]
async fn externally_removed_workspace_is_reaped_on_touch() {
    let tmp = tempfile::tempdir().expect("tmp");
    let (manager, store) = manager_with(base_config(tmp.path()));
    let ws = manager.allocate().await.expect("allocate");

    std::fs::remove_dir_all(&ws.path).expect("rm behind our back");
    let err = manager.acquire(ws.id, false).await.expect_err("gone");
    assert_eq!(err.kind, ErrorKind::WorkspaceNotFound);
    assert!(store.get_workspace(ws.id).await.unwrap().is_none());
}

#[tokio::test]
async fn dirty_workspace_refuses_mutating_acquire() {
    let tmp = tempfile::tempdir().expect("tmp");
    let (manager, _store) = manager_with(base_config(tmp.path()));
    let ws = manager.allocate().await.expect("allocate");
    manager.set_dirty(ws.id, true).await.expect("flag");

    let err = manager.acquire(ws.id, true).await.expect_err("quarantined");
    assert_eq!(err.kind, ErrorKind::ResourceExhausted);

    // Read-only access still works for inspection.
    manager.acquire(ws.id, false).await.expect("reader ok");
}

#[tokio::test]
async fn delete_refused_while_leased_then_removes() {
    let tmp = tempfile::tempdir().expect("tmp");
    let (manager, _store) = manager_with(base_config(tmp.path()));
    let ws = manager.allocate().await.expect("allocate");

    manager.acquire(ws.id, false).await.expect("lease");
    let err = manager.delete(ws.id).await.expect_err("held");
    assert_eq!(err.kind, ErrorKind::ResourceExhausted);

    manager.release(ws.id, false);
    manager.delete(ws.id).await.expect("delete");
    assert!(!ws.path.exists());

    let err = manager.acquire(ws.id, false).await.expect_err("gone");
    assert_eq!(err.kind, ErrorKind::WorkspaceNotFound);
}

#[tokio::test]
async fn allocate_fails_once_quota_is_reached() {
    let tmp = tempfile::tempdir().expect("tmp");
    let mut config = base_config(tmp.path());
    config.workspace_total_quota_bytes = 1024;
    let (manager, store) = manager_with(config);

    let ws = manager.allocate().await.expect("allocate");
    store.update_workspace_size(ws.id, 2048).await.expect("size");

    let err = manager.allocate().await.expect_err("over quota");
    assert_eq!(err.kind, ErrorKind::StorageFull);
}

#[tokio::test]
async fn eviction_prefers_lru_and_skips_leased() {
    let tmp = tempfile::tempdir().expect("tmp");
    let mut config = base_config(tmp.path());
    config.workspace_total_quota_bytes = 1000;
    config.cleanup_strategy = CleanupStrategy::Lru;
    let (manager, store) = manager_with(config);

    let old = manager.allocate().await.expect("old");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let young = manager.allocate().await.expect("young");
    store.update_workspace_size(old.id, 800).await.unwrap();
    store.update_workspace_size(young.id, 800).await.unwrap();
    // Re-touch young so LRU points at old.
    manager.touch(young.id).await.unwrap();

    let evicted = manager.evict_until_under_quota().await.expect("evict");
    assert_eq!(evicted, 1);
    assert!(store.get_workspace(old.id).await.unwrap().is_none());
    assert!(store.get_workspace(young.id).await.unwrap().is_some());

    // Now lease the survivor and push it over quota: nothing evictable.
    store.update_workspace_size(young.id, 5000).await.unwrap();
    manager.acquire(young.id, false).await.unwrap();
    let evicted = manager.evict_until_under_quota().await.expect("pass runs");
    assert_eq!(evicted, 0);
    assert!(store.get_workspace(young.id).await.unwrap().is_some());
}

#[tokio::test]
async fn cleanup_expired_removes_idle_unleased_workspaces() {
    let tmp = tempfile::tempdir().expect("tmp");
    let mut config = base_config(tmp.path());
    config.workspace_retention = Duration::from_millis(10);
    let (manager, store) = manager_with(config);

    let idle = manager.allocate().await.expect("idle");
    let held = manager.allocate().await.expect("held");
    manager.acquire(held.id, false).await.expect("lease");

    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.cleanup_expired().await.expect("sweep");

    assert!(store.get_workspace(idle.id).await.unwrap().is_none());
    assert!(!idle.path.exists());
    // Leased workspace survives even past retention (its access time was
    // refreshed by acquire, and the lease also protects it).
    assert!(store.get_workspace(held.id).await.unwrap().is_some());
}

#[tokio::test]
async fn disk_space_reports_capacity_and_usage() {
    let tmp = tempfile::tempdir().expect("tmp");
    let (manager, store) = manager_with(base_config(tmp.path()));
    let ws = manager.allocate().await.expect("allocate");
    store.update_workspace_size(ws.id, 1234).await.unwrap();

    let space = manager.disk_space().await.expect("statvfs");
    assert_eq!(space.used_by_workspaces_bytes, 1234);
    #[cfg(unix)]
    assert!(space.total_bytes > 0);
}

// ---------------------------------------------------------------------
// Path containment
// ---------------------------------------------------------------------

#[test]
fn resolve_within_accepts_normal_relative_paths() {
    let tmp = tempfile::tempdir().expect("tmp");
    std::fs::create_dir(tmp.path().join("src")).unwrap();

    let ok = resolve_within(tmp.path(), "src/lib.rs").expect("contained");
    assert!(ok.starts_with(tmp.path().canonicalize().unwrap()));

    resolve_within(tmp.path(), "new-file.txt").expect("nonexistent leaf ok");
    resolve_within(tmp.path(), "./src/../src/lib.rs").expect("balanced dotdot ok");
}

#[test]
fn resolve_within_rejects_escapes() {
    let tmp = tempfile::tempdir().expect("tmp");

    for bad in ["../../etc/passwd", "/etc/passwd", "..", "a/../../b", "nul\0byte"] {
        let err = resolve_within(tmp.path(), bad).expect_err("escape");
        assert_eq!(err.kind, ErrorKind::PathEscape, "case `{bad}`");
    }
}

#[cfg(unix)]
#[test]
fn resolve_within_rejects_symlink_escape() {
    let tmp = tempfile::tempdir().expect("tmp");
    let outside = tempfile::tempdir().expect("outside");
    std::os::unix::fs::symlink(outside.path(), tmp.path().join("link")).expect("symlink");

    let err = resolve_within(tmp.path(), "link/secret.txt").expect_err("escape via symlink");
    assert_eq!(err.kind, ErrorKind::PathEscape);
}
