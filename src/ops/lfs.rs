//! Git LFS tracking and object transfer.
//!
//! Requires the `git-lfs` extension to be installed; a missing
//! extension surfaces as GIT_COMMAND_FAILED with a suggestion.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::GitCli;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LfsTrackParams {
    pub workspace_id: String,
    /// Glob patterns to manage with LFS, e.g. `*.bin`.
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LfsTrackResult {
    pub patterns: Vec<String>,
}

pub async fn lfs_track(cli: &GitCli, params: LfsTrackParams) -> ServiceResult<LfsTrackResult> {
    if params.patterns.is_empty() {
        return Err(ServiceError::new(
            ErrorKind::InvalidParams,
            "lfs-track needs at least one pattern",
        ));
    }

    let mut args: Vec<&str> = vec!["lfs", "track"];
    args.extend(params.patterns.iter().map(String::as_str));
    run_lfs(cli, &args).await?;
    Ok(LfsTrackResult {
        patterns: params.patterns,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LfsFetchParams {
    pub workspace_id: String,
    #[serde(default)]
    pub remote: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LfsFetchResult {
    /// Objects transferred, when the lfs output reports a count.
    pub objects: u32,
    /// Whether working-tree files were also replaced (pull vs fetch).
    pub checked_out: bool,
}

pub async fn lfs_fetch(
    cli: &GitCli,
    params: LfsFetchParams,
    pull: bool,
) -> ServiceResult<LfsFetchResult> {
    let subcommand = if pull { "pull" } else { "fetch" };
    let mut args: Vec<String> = vec!["lfs".into(), subcommand.into()];
    if let Some(ref remote) = params.remote {
        args.push(remote.clone());
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = run_lfs(cli, &arg_refs).await?;

    Ok(LfsFetchResult {
        objects: parse_object_count(&format!("{}\n{}", output.stdout, output.stderr)),
        checked_out: pull,
    })
}

async fn run_lfs(cli: &GitCli, args: &[&str]) -> ServiceResult<crate::ops::GitOutput> {
    let output = cli.run_unchecked(args).await?;
    if !output.success() {
        if output.stderr.contains("lfs' is not a git command")
            || output.stderr.contains("git-lfs")
                && output.stderr.contains("not")
                && output.stderr.contains("found")
        {
            return Err(ServiceError::new(
                ErrorKind::GitCommandFailed,
                "git-lfs is not installed",
            )
            .with_suggestion("install git-lfs on the server host"));
        }
        return Err(crate::ops::runner::classify_git_failure(&["lfs"], &output));
    }
    Ok(output)
}

/// Leniently pull a count out of lines like
/// `Downloading LFS objects: 100% (12/12), ...`.
fn parse_object_count(text: &str) -> u32 {
    for line in text.lines() {
        if !line.contains("LFS objects") {
            continue;
        }
        if let Some(open) = line.find('(') {
            let rest = &line[open + 1..];
            if let Some(slash) = rest.find('/') {
                if let Ok(n) = rest[..slash].parse::<u32>() {
                    return n;
                }
            }
        }
    }
    0
}
