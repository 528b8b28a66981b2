//! Reset and clean.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::GitCli;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResetMode {
    Soft,
    Mixed,
    Hard,
}

impl ResetMode {
    fn flag(self) -> &'static str {
        match self {
            ResetMode::Soft => "--soft",
            ResetMode::Mixed => "--mixed",
            ResetMode::Hard => "--hard",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ResetMode::Soft => "soft",
            ResetMode::Mixed => "mixed",
            ResetMode::Hard => "hard",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResetParams {
    pub workspace_id: String,
    #[serde(default)]
    pub mode: Option<ResetMode>,
    /// Commit to reset to; HEAD when omitted.
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResetResult {
    pub mode: String,
    pub target: String,
}

pub async fn reset(cli: &GitCli, params: ResetParams) -> ServiceResult<ResetResult> {
    let mode = params.mode.unwrap_or(ResetMode::Mixed);
    let target = params.target.unwrap_or_else(|| "HEAD".to_string());
    cli.run(&["reset", mode.flag(), &target]).await?;
    Ok(ResetResult {
        mode: mode.as_str().to_string(),
        target,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CleanParams {
    pub workspace_id: String,
    /// Required acknowledgement; clean refuses to run without it.
    pub force: bool,
    /// Also remove untracked directories.
    #[serde(default)]
    pub directories: Option<bool>,
    /// Report what would be removed without touching anything.
    #[serde(default)]
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CleanResult {
    pub removed: Vec<String>,
    pub dry_run: bool,
}

pub async fn clean(cli: &GitCli, params: CleanParams) -> ServiceResult<CleanResult> {
    if !params.force {
        return Err(ServiceError::new(
            ErrorKind::InvalidParams,
            "clean requires force=true",
        ));
    }
    let dry_run = params.dry_run.unwrap_or(false);

    let mut args: Vec<&str> = vec!["clean"];
    args.push(if dry_run { "-n" } else { "-f" });
    if params.directories.unwrap_or(false) {
        args.push("-d");
    }

    let output = cli.run(&args).await?;
    let removed = output
        .stdout
        .lines()
        .filter_map(|line| {
            line.strip_prefix("Removing ")
                .or_else(|| line.strip_prefix("Would remove "))
        })
        .map(str::to_string)
        .collect();
    Ok(CleanResult { removed, dry_run })
}
