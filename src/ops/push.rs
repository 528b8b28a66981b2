//! Push to a remote repository.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::{GitCli, ProgressSink};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PushParams {
    pub workspace_id: String,
    #[serde(default)]
    pub remote: Option<String>,
    /// Explicit refspecs; the current branch when empty.
    #[serde(default)]
    pub refspecs: Option<Vec<String>>,
    #[serde(default)]
    pub force: Option<bool>,
    /// Also push tags.
    #[serde(default)]
    pub tags: Option<bool>,
    /// Set the upstream for the pushed branch.
    #[serde(default)]
    pub set_upstream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PushResult {
    pub remote: String,
    pub pushed_refs: Vec<String>,
    pub forced: bool,
}

pub async fn push(
    cli: &GitCli,
    params: PushParams,
    progress: &ProgressSink,
) -> ServiceResult<PushResult> {
    progress.emit(0);
    let remote = params.remote.unwrap_or_else(|| "origin".to_string());
    let force = params.force.unwrap_or(false);

    let mut args: Vec<String> = vec!["push".into(), "--progress".into()];
    if force {
        args.push("--force".into());
    }
    if params.tags.unwrap_or(false) {
        args.push("--tags".into());
    }
    if params.set_upstream.unwrap_or(false) {
        args.push("--set-upstream".into());
    }
    args.push(remote.clone());
    for refspec in params.refspecs.iter().flatten() {
        args.push(refspec.clone());
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cli.run_unchecked(&arg_refs).await?;
    let combined = format!("{}\n{}", output.stdout, output.stderr);

    if !output.success() {
        if combined.contains("[rejected]") || combined.contains("non-fast-forward") {
            return Err(ServiceError::new(
                ErrorKind::PushRejected,
                format!("push to {remote} rejected"),
            )
            .with_suggestion("pull the remote changes first, or force-push intentionally")
            .with_context(serde_json::json!({
                "rejected_refs": rejected_refs(&combined),
            })));
        }
        return Err(crate::ops::runner::classify_git_failure(&["push"], &output));
    }

    Ok(PushResult {
        remote,
        pushed_refs: pushed_refs(&combined),
        forced: force,
    })
}

/// Count successful ref updates from the push summary. Matches
/// `abc123..def456  main -> main`, `* [new branch] x -> x`, and forced
/// `+ abc...def x -> x` lines while skipping rejections.
pub fn pushed_refs(combined: &str) -> Vec<String> {
    combined
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            let (_, right) = trimmed.split_once(" -> ")?;
            if trimmed.starts_with('!')
                || trimmed.starts_with("error:")
                || trimmed.contains("[rejected]")
            {
                return None;
            }
            let updated = trimmed.starts_with(|c: char| c.is_ascii_hexdigit())
                || trimmed.starts_with("* [new")
                || trimmed.starts_with('+');
            updated.then(|| right.trim().to_string())
        })
        .collect()
}

fn rejected_refs(combined: &str) -> Vec<String> {
    combined
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            if !trimmed.starts_with('!') {
                return None;
            }
            trimmed
                .split_once(" -> ")
                .map(|(_, right)| right.split_whitespace().next().unwrap_or("").to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}
