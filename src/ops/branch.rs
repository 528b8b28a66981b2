//! Branch listing, creation, and deletion.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::GitCli;

const BRANCH_FORMAT: &str = "%(refname:short)\x1f%(objectname)\x1f%(upstream:short)\x1f%(HEAD)";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BranchListParams {
    pub workspace_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BranchInfo {
    pub name: String,
    pub current: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
    pub oid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BranchListResult {
    pub branches: Vec<BranchInfo>,
}

pub async fn list_branches(cli: &GitCli) -> ServiceResult<BranchListResult> {
    let output = cli
        .run(&["branch", "--list", &format!("--format={BRANCH_FORMAT}")])
        .await?;
    let branches = output
        .stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\x1f');
            let name = fields.next()?.to_string();
            if name.is_empty() {
                return None;
            }
            let oid = fields.next().unwrap_or_default().to_string();
            let upstream = fields.next().filter(|s| !s.is_empty()).map(str::to_string);
            let current = fields.next() == Some("*");
            Some(BranchInfo {
                name,
                current,
                upstream,
                oid,
            })
        })
        .collect();
    Ok(BranchListResult { branches })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BranchCreateParams {
    pub workspace_id: String,
    pub name: String,
    /// Commit or branch to start from; HEAD when omitted.
    #[serde(default)]
    pub start_point: Option<String>,
    /// Check the new branch out immediately.
    #[serde(default)]
    pub checkout: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BranchNameResult {
    pub name: String,
}

pub async fn create_branch(
    cli: &GitCli,
    params: BranchCreateParams,
) -> ServiceResult<BranchNameResult> {
    let mut args: Vec<String> = if params.checkout.unwrap_or(false) {
        vec!["checkout".into(), "-b".into(), params.name.clone()]
    } else {
        vec!["branch".into(), params.name.clone()]
    };
    if let Some(ref start) = params.start_point {
        args.push(start.clone());
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cli.run_unchecked(&arg_refs).await?;
    if !output.success() {
        if output.stderr.contains("already exists") {
            return Err(ServiceError::new(
                ErrorKind::InvalidBranchName,
                format!("branch `{}` already exists", params.name),
            ));
        }
        return Err(crate::ops::runner::classify_git_failure(&["branch"], &output));
    }
    Ok(BranchNameResult { name: params.name })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BranchDeleteParams {
    pub workspace_id: String,
    pub name: String,
    /// Delete even when not merged.
    #[serde(default)]
    pub force: Option<bool>,
}

pub async fn delete_branch(
    cli: &GitCli,
    params: BranchDeleteParams,
) -> ServiceResult<BranchNameResult> {
    let flag = if params.force.unwrap_or(false) { "-D" } else { "-d" };
    let output = cli.run_unchecked(&["branch", flag, &params.name]).await?;
    if !output.success() {
        if output.stderr.contains("not found") {
            return Err(ServiceError::new(
                ErrorKind::InvalidBranchName,
                format!("branch `{}` not found", params.name),
            ));
        }
        if output.stderr.contains("not fully merged") {
            return Err(ServiceError::new(
                ErrorKind::GitCommandFailed,
                format!("branch `{}` is not fully merged", params.name),
            )
            .with_suggestion("pass force=true to delete anyway"));
        }
        return Err(crate::ops::runner::classify_git_failure(&["branch"], &output));
    }
    Ok(BranchNameResult { name: params.name })
}
