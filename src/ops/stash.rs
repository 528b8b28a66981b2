//! Stash save, pop, and listing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::GitCli;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StashSaveParams {
    pub workspace_id: String,
    #[serde(default)]
    pub message: Option<String>,
    /// Include untracked files.
    #[serde(default)]
    pub include_untracked: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StashSaveResult {
    pub name: String,
    pub message: String,
}

pub async fn stash_save(cli: &GitCli, params: StashSaveParams) -> ServiceResult<StashSaveResult> {
    let mut args: Vec<String> = vec!["stash".into(), "push".into()];
    if params.include_untracked.unwrap_or(false) {
        args.push("-u".into());
    }
    if let Some(ref message) = params.message {
        args.push("-m".into());
        args.push(message.clone());
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cli.run(&arg_refs).await?;
    if output.stdout.contains("No local changes to save") {
        return Err(ServiceError::new(
            ErrorKind::GitNoChanges,
            "no local changes to stash",
        ));
    }

    let message = cli
        .run(&["stash", "list", "-1", "--format=%gs"])
        .await?
        .stdout
        .trim()
        .to_string();
    Ok(StashSaveResult {
        name: "stash@{0}".to_string(),
        message,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StashPopParams {
    pub workspace_id: String,
    /// Stash index; the most recent when omitted.
    #[serde(default)]
    pub index: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StashPopResult {
    pub applied: bool,
    pub dropped: bool,
}

pub async fn stash_pop(cli: &GitCli, params: StashPopParams) -> ServiceResult<StashPopResult> {
    let reference = format!("stash@{{{}}}", params.index.unwrap_or(0));
    let output = cli.run_unchecked(&["stash", "pop", &reference]).await?;
    if !output.success() {
        let combined = format!("{}\n{}", output.stdout, output.stderr);
        if combined.contains("CONFLICT") {
            // The stash entry is kept on conflict; report and leave the
            // tree for the caller to inspect.
            return Err(ServiceError::new(
                ErrorKind::MergeConflict,
                "stash pop produced conflicts; the stash entry was kept",
            ));
        }
        if combined.contains("No stash entries") || combined.contains("is not a valid reference") {
            return Err(ServiceError::new(
                ErrorKind::GitNoChanges,
                format!("{reference} does not exist"),
            ));
        }
        return Err(crate::ops::runner::classify_git_failure(&["stash"], &output));
    }
    Ok(StashPopResult {
        applied: true,
        dropped: true,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StashListParams {
    pub workspace_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StashInfo {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StashListResult {
    pub stashes: Vec<StashInfo>,
}

pub async fn stash_list(cli: &GitCli) -> ServiceResult<StashListResult> {
    let output = cli.run(&["stash", "list", "--format=%gd\x1f%gs"]).await?;
    let stashes = output
        .stdout
        .lines()
        .filter_map(|line| {
            let (name, message) = line.split_once('\x1f')?;
            Some(StashInfo {
                name: name.to_string(),
                message: message.to_string(),
            })
        })
        .collect();
    Ok(StashListResult { stashes })
}
