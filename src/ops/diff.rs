//! Diff statistics between revisions, the index, or the working tree.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::ops::GitCli;
use crate::workspace::resolve_within;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DiffParams {
    pub workspace_id: String,
    /// Base revision; the index/worktree comparison when omitted.
    #[serde(default)]
    pub base: Option<String>,
    /// Target revision, requires `base`.
    #[serde(default)]
    pub target: Option<String>,
    /// Compare the index instead of the working tree.
    #[serde(default)]
    pub staged: Option<bool>,
    /// Restrict to one path inside the workspace.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FileDiff {
    pub path: String,
    /// added | modified | deleted | renamed | copied
    pub change: String,
    pub insertions: u32,
    pub deletions: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DiffResult {
    pub files: Vec<FileDiff>,
    pub insertions: u32,
    pub deletions: u32,
}

pub async fn diff(cli: &GitCli, params: DiffParams) -> ServiceResult<DiffResult> {
    let mut common: Vec<String> = Vec::new();
    if params.staged.unwrap_or(false) {
        common.push("--cached".into());
    }
    if let Some(ref base) = params.base {
        common.push(base.clone());
        if let Some(ref target) = params.target {
            common.push(target.clone());
        }
    }
    if let Some(ref path) = params.path {
        resolve_within(&cli.work_dir, path)?;
        common.push("--".into());
        common.push(path.clone());
    }

    let mut numstat_args: Vec<&str> = vec!["diff", "--numstat"];
    numstat_args.extend(common.iter().map(String::as_str));
    let numstat = cli.run(&numstat_args).await?;

    let mut status_args: Vec<&str> = vec!["diff", "--name-status"];
    status_args.extend(common.iter().map(String::as_str));
    let name_status = cli.run(&status_args).await?;

    Ok(merge_stats(&numstat.stdout, &name_status.stdout))
}

pub fn merge_stats(numstat: &str, name_status: &str) -> DiffResult {
    let mut changes: HashMap<String, String> = HashMap::new();
    for line in name_status.lines() {
        let mut fields = line.split('\t');
        let Some(code) = fields.next() else { continue };
        // Renames/copies list old and new paths; key on the new one.
        let path = fields.last().unwrap_or_default().to_string();
        if path.is_empty() {
            continue;
        }
        let change = match code.chars().next() {
            Some('A') => "added",
            Some('D') => "deleted",
            Some('R') => "renamed",
            Some('C') => "copied",
            _ => "modified",
        };
        changes.insert(path, change.to_string());
    }

    let mut files = Vec::new();
    let mut total_ins = 0u32;
    let mut total_del = 0u32;
    for line in numstat.lines() {
        let mut fields = line.split('\t');
        let (Some(ins), Some(del)) = (fields.next(), fields.next()) else {
            continue;
        };
        let path = fields.last().unwrap_or_default().to_string();
        if path.is_empty() {
            continue;
        }
        // Binary files report `-`.
        let insertions: u32 = ins.parse().unwrap_or(0);
        let deletions: u32 = del.parse().unwrap_or(0);
        total_ins += insertions;
        total_del += deletions;
        let change = changes
            .get(&path)
            .cloned()
            .unwrap_or_else(|| "modified".to_string());
        files.push(FileDiff {
            path,
            change,
            insertions,
            deletions,
        });
    }

    DiffResult {
        files,
        insertions: total_ins,
        deletions: total_del,
    }
}
