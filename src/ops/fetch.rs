//! Fetch from a remote.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::ops::{GitCli, ProgressSink};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchParams {
    pub workspace_id: String,
    /// Remote name, defaulting to `origin`.
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default)]
    pub prune: Option<bool>,
    #[serde(default)]
    pub tags: Option<bool>,
    /// Deepen a shallow clone to this depth.
    #[serde(default)]
    pub depth: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RefUpdate {
    pub name: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchResult {
    pub remote: String,
    pub updated_refs: Vec<RefUpdate>,
}

pub async fn fetch(
    cli: &GitCli,
    params: FetchParams,
    progress: &ProgressSink,
) -> ServiceResult<FetchResult> {
    progress.emit(0);
    let remote = params.remote.unwrap_or_else(|| "origin".to_string());

    let mut args: Vec<String> = vec!["fetch".into(), "--progress".into()];
    if params.prune.unwrap_or(false) {
        args.push("--prune".into());
    }
    if params.tags.unwrap_or(false) {
        args.push("--tags".into());
    }
    if let Some(depth) = params.depth {
        args.push(format!("--depth={}", depth.max(1)));
    }
    args.push(remote.clone());

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cli.run_with_progress(&arg_refs, progress).await?;

    Ok(FetchResult {
        remote,
        updated_refs: parse_ref_updates(&output.stderr),
    })
}

/// Parse fetch summary lines:
/// `   abc1234..def5678  main       -> origin/main`
/// ` + abc1234...def5678 force      -> origin/force  (forced update)`
/// ` * [new branch]      feature    -> origin/feature`
/// ` - [deleted]         (none)     -> origin/gone`
pub fn parse_ref_updates(stderr: &str) -> Vec<RefUpdate> {
    let mut updates = Vec::new();
    for line in stderr.lines() {
        let trimmed = line.trim();
        let Some((left, right)) = trimmed.split_once(" -> ") else {
            continue;
        };
        // Annotations like `(forced update)` trail the ref name.
        let name = right
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        if name.is_empty() || trimmed.starts_with('!') {
            continue;
        }

        // Forced updates carry a `+` flag, prunes a `-`, tag updates a
        // `t`; the ref range is then the second field.
        let mut fields = left.split_whitespace();
        let mut first = fields.next().unwrap_or_default();
        if matches!(first, "+" | "-" | "t") {
            first = fields.next().unwrap_or_default();
        }

        if let Some((old, new)) = first.split_once("..") {
            let old = old.trim_end_matches('.');
            let new = new.trim_start_matches('.');
            if !old.is_empty() && old.chars().all(|c| c.is_ascii_hexdigit()) {
                updates.push(RefUpdate {
                    name,
                    old: Some(old.to_string()),
                    new: Some(new.to_string()),
                });
                continue;
            }
        }
        if trimmed.starts_with('*') || trimmed.starts_with('-') || trimmed.starts_with('t') {
            updates.push(RefUpdate {
                name,
                old: None,
                new: None,
            });
        }
    }
    updates
}
