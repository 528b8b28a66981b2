//! Merge and rebase, with structured conflict reporting.
//!
//! Conflicts are reported, never mediated: on conflict the half-applied
//! integration is aborted so the workspace stays fully rolled back, and
//! the conflicting paths (with their index-stage kind) ride back in the
//! error context.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::GitCli;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConflictEntry {
    pub path: String,
    /// both-modified | both-added | deleted-by-us | deleted-by-them | unknown
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MergeParams {
    pub workspace_id: String,
    /// Branch or commit to merge into HEAD.
    pub rev: String,
    /// Always create a merge commit.
    #[serde(default)]
    pub no_ff: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MergeResult {
    pub fast_forward: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub conflicts: Vec<ConflictEntry>,
}

pub async fn merge(cli: &GitCli, params: MergeParams) -> ServiceResult<MergeResult> {
    let mut args: Vec<String> = vec!["merge".into()];
    if params.no_ff.unwrap_or(false) {
        args.push("--no-ff".into());
    }
    if let Some(ref message) = params.message {
        args.push("-m".into());
        args.push(message.clone());
    }
    args.push(params.rev.clone());

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cli.run_unchecked(&arg_refs).await?;

    if !output.success() {
        let combined = format!("{}\n{}", output.stdout, output.stderr);
        if combined.contains("CONFLICT") || combined.contains("Automatic merge failed") {
            let conflicts = conflict_entries(cli).await?;
            let _ = cli.run_unchecked(&["merge", "--abort"]).await;
            return Err(ServiceError::new(
                ErrorKind::MergeConflict,
                format!(
                    "merging `{}` produced {} conflicting paths",
                    params.rev,
                    conflicts.len()
                ),
            )
            .with_suggestion("resolve locally or merge a different revision")
            .with_context(serde_json::json!({ "conflicts": conflicts })));
        }
        return Err(crate::ops::runner::classify_git_failure(&["merge"], &output));
    }

    let commit = cli.run(&["rev-parse", "HEAD"]).await?.stdout.trim().to_string();
    Ok(MergeResult {
        fast_forward: output.stdout.contains("Fast-forward"),
        commit: Some(commit),
        conflicts: Vec::new(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RebaseParams {
    pub workspace_id: String,
    /// Upstream to replay onto.
    pub upstream: String,
    /// Replay onto a different base.
    #[serde(default)]
    pub onto: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RebaseResult {
    pub rebased: bool,
    pub commits_replayed: u32,
    pub conflicts: Vec<ConflictEntry>,
}

pub async fn rebase(cli: &GitCli, params: RebaseParams) -> ServiceResult<RebaseResult> {
    // Count what will be replayed before moving anything.
    let ahead = cli
        .run_unchecked(&["rev-list", "--count", &format!("{}..HEAD", params.upstream)])
        .await?
        .stdout
        .trim()
        .parse::<u32>()
        .unwrap_or(0);

    let mut args: Vec<String> = vec!["rebase".into()];
    if let Some(ref onto) = params.onto {
        args.push("--onto".into());
        args.push(onto.clone());
    }
    args.push(params.upstream.clone());

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cli.run_unchecked(&arg_refs).await?;

    if !output.success() {
        let combined = format!("{}\n{}", output.stdout, output.stderr);
        if combined.contains("CONFLICT") || combined.contains("could not apply") {
            let conflicts = conflict_entries(cli).await?;
            let _ = cli.run_unchecked(&["rebase", "--abort"]).await;
            return Err(ServiceError::new(
                ErrorKind::RebaseConflict,
                format!(
                    "rebasing onto `{}` produced {} conflicting paths",
                    params.upstream,
                    conflicts.len()
                ),
            )
            .with_context(serde_json::json!({ "conflicts": conflicts })));
        }
        return Err(crate::ops::runner::classify_git_failure(&["rebase"], &output));
    }

    Ok(RebaseResult {
        rebased: true,
        commits_replayed: ahead,
        conflicts: Vec::new(),
    })
}

/// Conflicting paths with their kind, read from the unmerged index
/// entries (`git status --porcelain=v2` `u` lines).
pub async fn conflict_entries(cli: &GitCli) -> ServiceResult<Vec<ConflictEntry>> {
    let output = cli.run(&["status", "--porcelain=v2"]).await?;
    Ok(parse_conflicts(&output.stdout))
}

pub fn parse_conflicts(porcelain: &str) -> Vec<ConflictEntry> {
    porcelain
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix("u ")?;
            let xy = rest.split(' ').next().unwrap_or_default();
            let path = line.split(' ').nth(10)?.to_string();
            let kind = match xy {
                "UU" => "both-modified",
                "AA" => "both-added",
                "UD" => "deleted-by-them",
                "DU" => "deleted-by-us",
                _ => "unknown",
            };
            Some(ConflictEntry {
                path,
                kind: kind.to_string(),
            })
        })
        .collect()
}
