//! End-to-end round trips against the real git binary, driven through
//! local `file://` remotes. Skipped when git is not installed.

use std::sync::Arc;
use std::time::Duration;

use git_mcp_server::{CliGitAdapter, ErrorKind, Operation, TaskStatus};
use serde_json::json;

use super::util::{ctx_with, fixture_repo, git_available, run_git, test_config, wait_terminal};

fn file_url(path: &std::path::Path) -> String {
    format!("file://{}", path.display())
}

#[tokio::test(flavor = "multi_thread")]
async fn clone_commit_push_round_trip() {
    if !git_available() {
        eprintln!("skipping: git not installed");
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let fixtures = tmp.path().join("fixtures");
    std::fs::create_dir_all(&fixtures).unwrap();
    let origin = fixture_repo(&fixtures);

    let ws_root = tmp.path().join("workspaces");
    let ctx = ctx_with(test_config(&ws_root), Arc::new(CliGitAdapter::new())).await;

    // Clone allocates its own workspace.
    let clone_id = ctx
        .tasks
        .submit(Operation::Clone, json!({ "url": file_url(&origin) }))
        .await
        .expect("submit clone");
    let clone_task = wait_terminal(&ctx, clone_id, Duration::from_secs(30)).await;
    assert_eq!(clone_task.status, TaskStatus::Completed, "{:?}", clone_task.error);

    let result = clone_task.result.expect("clone result");
    assert_eq!(result["branch"], "main");
    assert_eq!(result["commit"].as_str().unwrap().len(), 40);

    let ws_id = clone_task.workspace_id.expect("workspace");
    let ws = ctx.tasks.workspaces().get(ws_id).await.unwrap().expect("record");
    assert!(ws.path.join("seed.txt").is_file());

    // Stage and commit a new file.
    std::fs::write(ws.path.join("README.md"), "hello\n").unwrap();
    let staged = ctx
        .tasks
        .run_sync(
            Operation::Add,
            json!({ "workspace_id": ws_id.to_string(), "files": ["README.md"] }),
        )
        .await
        .expect("add");
    assert_eq!(staged["staged"], json!(["README.md"]));

    let committed = ctx
        .tasks
        .run_sync(
            Operation::Commit,
            json!({
                "workspace_id": ws_id.to_string(),
                "message": "init",
                "author": { "name": "T", "email": "t@e" },
            }),
        )
        .await
        .expect("commit");
    let oid = committed["oid"].as_str().expect("oid");
    assert_eq!(oid.len(), 40);
    assert!(oid.chars().all(|c| c.is_ascii_hexdigit()));

    // The tree is clean again and log shows the new commit first.
    let status = ctx
        .tasks
        .run_sync(Operation::Status, json!({ "workspace_id": ws_id.to_string() }))
        .await
        .expect("status");
    assert_eq!(status["branch"], "main");
    assert_eq!(status["modified"], json!([]));
    assert_eq!(status["untracked"], json!([]));

    let log = ctx
        .tasks
        .run_sync(Operation::Log, json!({ "workspace_id": ws_id.to_string() }))
        .await
        .expect("log");
    let commits = log["commits"].as_array().expect("commits");
    assert!(commits.len() >= 2);
    assert_eq!(commits[0]["summary"], "init");
    assert_eq!(commits[0]["oid"], oid);

    // Push to a fresh bare remote.
    let bare = fixtures.join("downstream.git");
    std::fs::create_dir_all(&bare).unwrap();
    run_git(&bare, &["init", "--bare", "--initial-branch=main"]);
    ctx.tasks
        .run_sync(
            Operation::RemoteAdd,
            json!({
                "workspace_id": ws_id.to_string(),
                "name": "downstream",
                "url": file_url(&bare),
            }),
        )
        .await
        .expect("remote add");

    let push_id = ctx
        .tasks
        .submit(
            Operation::Push,
            json!({
                "workspace_id": ws_id.to_string(),
                "remote": "downstream",
                "refspecs": ["main"],
            }),
        )
        .await
        .expect("submit push");
    let push_task = wait_terminal(&ctx, push_id, Duration::from_secs(30)).await;
    assert_eq!(push_task.status, TaskStatus::Completed, "{:?}", push_task.error);
    let pushed = &push_task.result.expect("push result")["pushed_refs"];
    assert!(pushed.as_array().unwrap().iter().any(|r| r == "main"));

    // The bare remote really has the commit.
    run_git(&bare, &["rev-parse", "main"]);

    // Blame attributes the new file to our author.
    let blame = ctx
        .tasks
        .run_sync(
            Operation::Blame,
            json!({ "workspace_id": ws_id.to_string(), "file": "README.md" }),
        )
        .await
        .expect("blame");
    let lines = blame["lines"].as_array().expect("lines");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["author"], "T");
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_conflict_reports_paths_and_rolls_back() {
    if !git_available() {
        eprintln!("skipping: git not installed");
        return;
    }

    let tmp = tempfile::tempdir().unwrap();
    let fixtures = tmp.path().join("fixtures");
    std::fs::create_dir_all(&fixtures).unwrap();
    let origin = fixture_repo(&fixtures);

    let ws_root = tmp.path().join("workspaces");
    let ctx = ctx_with(test_config(&ws_root), Arc::new(CliGitAdapter::new())).await;

    let clone_id = ctx
        .tasks
        .submit(Operation::Clone, json!({ "url": file_url(&origin) }))
        .await
        .expect("submit clone");
    let clone_task = wait_terminal(&ctx, clone_id, Duration::from_secs(30)).await;
    assert_eq!(clone_task.status, TaskStatus::Completed, "{:?}", clone_task.error);
    let ws_id = clone_task.workspace_id.unwrap();
    let ws = ctx.tasks.workspaces().get(ws_id).await.unwrap().unwrap();

    let commit_all = |message: &'static str| {
        let ctx = &ctx;
        async move {
            ctx.tasks
                .run_sync(
                    Operation::Add,
                    json!({ "workspace_id": ws_id.to_string() }),
                )
                .await
                .expect("add");
            ctx.tasks
                .run_sync(
                    Operation::Commit,
                    json!({
                        "workspace_id": ws_id.to_string(),
                        "message": message,
                        "author": { "name": "T", "email": "t@e" },
                    }),
                )
                .await
                .expect("commit");
        }
    };

    // Diverge `feature` and `main` on the same file.
    ctx.tasks
        .run_sync(
            Operation::Checkout,
            json!({ "workspace_id": ws_id.to_string(), "rev": "feature", "create": true }),
        )
        .await
        .expect("branch off");
    std::fs::write(ws.path.join("seed.txt"), "feature version\n").unwrap();
    commit_all("feature change").await;

    ctx.tasks
        .run_sync(
            Operation::Checkout,
            json!({ "workspace_id": ws_id.to_string(), "rev": "main" }),
        )
        .await
        .expect("back to main");
    std::fs::write(ws.path.join("seed.txt"), "main version\n").unwrap();
    commit_all("main change").await;

    let merge_id = ctx
        .tasks
        .submit(
            Operation::Merge,
            json!({ "workspace_id": ws_id.to_string(), "rev": "feature" }),
        )
        .await
        .expect("submit merge");
    let merge_task = wait_terminal(&ctx, merge_id, Duration::from_secs(30)).await;

    assert_eq!(merge_task.status, TaskStatus::Failed);
    let error = merge_task.error.expect("conflict error");
    assert_eq!(error.kind, ErrorKind::MergeConflict);
    let conflicts = error.context.expect("context")["conflicts"]
        .as_array()
        .expect("list")
        .clone();
    assert!(conflicts.iter().any(|c| c["path"] == "seed.txt"));

    // The merge was aborted: tree is clean and the workspace stays
    // usable (no quarantine for an orderly conflict report).
    let status = ctx
        .tasks
        .run_sync(Operation::Status, json!({ "workspace_id": ws_id.to_string() }))
        .await
        .expect("status");
    assert_eq!(status["conflicted"], json!([]));
    assert_eq!(status["modified"], json!([]));
    let ws_after = ctx.tasks.workspaces().get(ws_id).await.unwrap().unwrap();
    assert!(!ws_after.dirty);
}
