//! Clone a remote repository into a workspace.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceResult;
use crate::ops::{GitCli, ProgressSink};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CloneParams {
    /// Remote repository URL (https, ssh, or scp-style).
    pub url: String,
    /// Existing workspace to clone into; a fresh one is allocated when
    /// omitted.
    #[serde(default)]
    pub workspace_id: Option<String>,
    /// Branch to check out instead of the remote default.
    #[serde(default)]
    pub branch: Option<String>,
    /// Shallow history depth (>= 1).
    #[serde(default)]
    pub depth: Option<u32>,
    /// Fetch only the selected branch.
    #[serde(default)]
    pub single_branch: Option<bool>,
    /// Partial-clone filter spec, e.g. `blob:none`.
    #[serde(default)]
    pub filter: Option<String>,
    /// Initial sparse-checkout path set.
    #[serde(default)]
    pub sparse_paths: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CloneResult {
    pub workspace_id: Option<Uuid>,
    pub path: String,
    pub branch: String,
    pub commit: String,
    pub shallow: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
}

/// Clone into the (empty) workspace directory.
pub async fn clone_repo(
    cli: &GitCli,
    params: CloneParams,
    workspace_id: Option<Uuid>,
    progress: &ProgressSink,
) -> ServiceResult<CloneResult> {
    progress.emit(0);

    let mut args: Vec<String> = vec!["clone".into(), "--progress".into()];
    if let Some(depth) = params.depth {
        args.push(format!("--depth={}", depth.max(1)));
    }
    if params.single_branch.unwrap_or(params.depth.is_some()) {
        args.push("--single-branch".into());
    }
    if let Some(ref branch) = params.branch {
        args.push("--branch".into());
        args.push(branch.clone());
    }
    if let Some(ref filter) = params.filter {
        args.push(format!("--filter={filter}"));
    }
    if params.sparse_paths.is_some() {
        args.push("--sparse".into());
    }
    args.push(params.url.clone());
    args.push(".".into());

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    cli.run_with_progress(&arg_refs, progress).await?;

    if let Some(paths) = params.sparse_paths.as_deref() {
        let mut sparse: Vec<&str> = vec!["sparse-checkout", "set"];
        sparse.extend(paths.iter().map(String::as_str));
        cli.run(&sparse).await?;
    }

    let commit = cli.run(&["rev-parse", "HEAD"]).await?.stdout.trim().to_string();
    let branch = cli
        .run(&["rev-parse", "--abbrev-ref", "HEAD"])
        .await?
        .stdout
        .trim()
        .to_string();

    Ok(CloneResult {
        workspace_id,
        path: cli.work_dir.display().to_string(),
        branch,
        commit,
        shallow: params.depth.is_some(),
        depth: params.depth,
    })
}
