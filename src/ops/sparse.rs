//! Sparse-checkout path selection.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::GitCli;
use crate::workspace::resolve_within;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SparseCheckoutParams {
    pub workspace_id: String,
    /// Directories to materialize.
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SparseCheckoutResult {
    pub paths: Vec<String>,
}

pub async fn sparse_checkout(
    cli: &GitCli,
    params: SparseCheckoutParams,
) -> ServiceResult<SparseCheckoutResult> {
    if params.paths.is_empty() {
        return Err(ServiceError::new(
            ErrorKind::InvalidParams,
            "sparse-checkout needs at least one path",
        ));
    }
    for path in &params.paths {
        resolve_within(&cli.work_dir, path)?;
    }

    let mut args: Vec<&str> = vec!["sparse-checkout", "set"];
    args.extend(params.paths.iter().map(String::as_str));
    cli.run(&args).await?;

    let listed = cli
        .run(&["sparse-checkout", "list"])
        .await?
        .stdout
        .lines()
        .map(str::to_string)
        .filter(|l| !l.is_empty())
        .collect();
    Ok(SparseCheckoutResult { paths: listed })
}
