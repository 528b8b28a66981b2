//! Pull (fetch + integrate) from a remote.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::merge::conflict_entries;
use crate::ops::{GitCli, ProgressSink};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PullParams {
    pub workspace_id: String,
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    /// Rebase local commits instead of merging.
    #[serde(default)]
    pub rebase: Option<bool>,
    /// Refuse anything that is not a fast-forward.
    #[serde(default)]
    pub ff_only: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PullResult {
    pub remote: String,
    pub fast_forward: bool,
    pub commit: String,
    pub files_changed: u32,
}

pub async fn pull(
    cli: &GitCli,
    params: PullParams,
    progress: &ProgressSink,
) -> ServiceResult<PullResult> {
    progress.emit(0);
    let remote = params.remote.unwrap_or_else(|| "origin".to_string());

    let mut args: Vec<String> = vec!["pull".into(), "--progress".into()];
    if params.rebase.unwrap_or(false) {
        args.push("--rebase".into());
    }
    if params.ff_only.unwrap_or(false) {
        args.push("--ff-only".into());
    }
    args.push(remote.clone());
    if let Some(ref branch) = params.branch {
        args.push(branch.clone());
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cli.run_unchecked(&arg_refs).await?;

    if !output.success() {
        let combined = format!("{}\n{}", output.stdout, output.stderr);
        if combined.contains("CONFLICT") || combined.contains("needs merge") {
            let conflicts = conflict_entries(cli).await?;
            // Roll the half-applied integration back so the tree stays
            // recoverable.
            if params.rebase.unwrap_or(false) {
                let _ = cli.run_unchecked(&["rebase", "--abort"]).await;
            } else {
                let _ = cli.run_unchecked(&["merge", "--abort"]).await;
            }
            return Err(ServiceError::new(
                ErrorKind::MergeConflict,
                format!("pull from {remote} hit {} conflicting paths", conflicts.len()),
            )
            .with_context(serde_json::json!({ "conflicts": conflicts })));
        }
        return Err(crate::ops::runner::classify_git_failure(&["pull"], &output));
    }

    let commit = cli.run(&["rev-parse", "HEAD"]).await?.stdout.trim().to_string();
    let combined = format!("{}\n{}", output.stdout, output.stderr);

    Ok(PullResult {
        remote,
        fast_forward: combined.contains("Fast-forward"),
        commit,
        files_changed: parse_files_changed(&combined),
    })
}

/// `" 3 files changed, 10 insertions(+), 2 deletions(-)"`
fn parse_files_changed(text: &str) -> u32 {
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.split_once(" file") {
            if rest.1.starts_with("s changed") || rest.1.starts_with(" changed") {
                if let Ok(n) = rest.0.parse::<u32>() {
                    return n;
                }
            }
        }
    }
    0
}
