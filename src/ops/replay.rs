//! Cherry-pick and revert.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::GitCli;
use crate::ops::merge::conflict_entries;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CherryPickParams {
    pub workspace_id: String,
    /// Commit to apply onto HEAD.
    pub commit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RevertParams {
    pub workspace_id: String,
    /// Commit whose changes to undo.
    pub commit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReplayResult {
    /// New HEAD commit.
    pub oid: String,
}

pub async fn cherry_pick(cli: &GitCli, params: CherryPickParams) -> ServiceResult<ReplayResult> {
    replay(cli, "cherry-pick", &params.commit).await
}

pub async fn revert(cli: &GitCli, params: RevertParams) -> ServiceResult<ReplayResult> {
    replay(cli, "revert", &params.commit).await
}

async fn replay(cli: &GitCli, subcommand: &str, commit: &str) -> ServiceResult<ReplayResult> {
    let no_edit = "--no-edit";
    let output = cli.run_unchecked(&[subcommand, no_edit, commit]).await?;

    if !output.success() {
        let combined = format!("{}\n{}", output.stdout, output.stderr);
        if combined.contains("CONFLICT") || combined.contains("could not apply") {
            let conflicts = conflict_entries(cli).await?;
            let _ = cli.run_unchecked(&[subcommand, "--abort"]).await;
            return Err(ServiceError::new(
                ErrorKind::MergeConflict,
                format!("{subcommand} of `{commit}` produced {} conflicting paths", conflicts.len()),
            )
            .with_context(serde_json::json!({ "conflicts": conflicts })));
        }
        return Err(crate::ops::runner::classify_git_failure(&[subcommand], &output));
    }

    let oid = cli.run(&["rev-parse", "HEAD"]).await?.stdout.trim().to_string();
    Ok(ReplayResult { oid })
}
