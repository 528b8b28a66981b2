//! Switch branches or restore a detached revision.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::ops::GitCli;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CheckoutParams {
    pub workspace_id: String,
    /// Branch name, tag, or commit.
    pub rev: String,
    /// Create the branch first.
    #[serde(default)]
    pub create: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CheckoutResult {
    pub branch: String,
    pub created: bool,
}

pub async fn checkout(cli: &GitCli, params: CheckoutParams) -> ServiceResult<CheckoutResult> {
    let create = params.create.unwrap_or(false);
    if create {
        cli.run(&["checkout", "-b", &params.rev]).await?;
    } else {
        cli.run(&["checkout", &params.rev]).await?;
    }

    let branch = cli
        .run(&["rev-parse", "--abbrev-ref", "HEAD"])
        .await?
        .stdout
        .trim()
        .to_string();
    Ok(CheckoutResult { branch, created: create })
}
