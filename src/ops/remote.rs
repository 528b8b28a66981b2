//! Remote configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::credentials::redact_url;
use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::GitCli;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemoteListParams {
    pub workspace_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemoteInfo {
    pub name: String,
    /// Fetch URL with any embedded userinfo redacted.
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemoteListResult {
    pub remotes: Vec<RemoteInfo>,
}

pub async fn list_remotes(cli: &GitCli) -> ServiceResult<RemoteListResult> {
    let output = cli.run(&["remote", "-v"]).await?;
    let mut remotes: Vec<RemoteInfo> = Vec::new();
    for line in output.stdout.lines() {
        let mut fields = line.split_whitespace();
        let (Some(name), Some(url)) = (fields.next(), fields.next()) else {
            continue;
        };
        // `remote -v` prints fetch and push rows; keep the first.
        if remotes.iter().any(|r| r.name == name) {
            continue;
        }
        remotes.push(RemoteInfo {
            name: name.to_string(),
            url: redact_url(url),
        });
    }
    Ok(RemoteListResult { remotes })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemoteAddParams {
    pub workspace_id: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemoteNameResult {
    pub name: String,
}

pub async fn add_remote(cli: &GitCli, params: RemoteAddParams) -> ServiceResult<RemoteNameResult> {
    let output = cli
        .run_unchecked(&["remote", "add", &params.name, &params.url])
        .await?;
    if !output.success() {
        if output.stderr.contains("already exists") {
            return Err(ServiceError::new(
                ErrorKind::InvalidParams,
                format!("remote `{}` already exists", params.name),
            ));
        }
        return Err(crate::ops::runner::classify_git_failure(&["remote"], &output));
    }
    Ok(RemoteNameResult { name: params.name })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemoteRemoveParams {
    pub workspace_id: String,
    pub name: String,
}

pub async fn remove_remote(
    cli: &GitCli,
    params: RemoteRemoveParams,
) -> ServiceResult<RemoteNameResult> {
    let output = cli.run_unchecked(&["remote", "remove", &params.name]).await?;
    if !output.success() {
        if output.stderr.contains("No such remote") {
            return Err(ServiceError::new(
                ErrorKind::InvalidParams,
                format!("remote `{}` not found", params.name),
            ));
        }
        return Err(crate::ops::runner::classify_git_failure(&["remote"], &output));
    }
    Ok(RemoteNameResult { name: params.name })
}
