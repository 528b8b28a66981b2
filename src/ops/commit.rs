//! Staging and committing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::GitCli;
use crate::workspace::resolve_within;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddParams {
    pub workspace_id: String,
    /// Paths (or glob-free patterns) relative to the workspace. `None`
    /// stages everything.
    #[serde(default)]
    pub files: Option<Vec<String>>,
    /// Also stage deletions of tracked files.
    #[serde(default)]
    pub update: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddResult {
    pub staged: Vec<String>,
}

pub async fn add(cli: &GitCli, params: AddParams) -> ServiceResult<AddResult> {
    let mut args: Vec<String> = vec!["add".into()];
    if params.update.unwrap_or(false) {
        args.push("--update".into());
    }
    match params.files.as_deref() {
        Some(files) if !files.is_empty() => {
            // Containment check before git sees the paths.
            for file in files {
                resolve_within(&cli.work_dir, file)?;
            }
            args.push("--".into());
            args.extend(files.iter().cloned());
        }
        _ => args.push("--all".into()),
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    cli.run(&arg_refs).await?;

    let staged = cli
        .run(&["diff", "--cached", "--name-only"])
        .await?
        .stdout
        .lines()
        .map(str::to_string)
        .filter(|l| !l.is_empty())
        .collect();
    Ok(AddResult { staged })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SignatureParams {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommitParams {
    pub workspace_id: String,
    pub message: String,
    #[serde(default)]
    pub author: Option<SignatureParams>,
    /// Stage all tracked modifications first (`git commit -a`).
    #[serde(default)]
    pub all: Option<bool>,
    #[serde(default)]
    pub amend: Option<bool>,
    #[serde(default)]
    pub allow_empty: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommitResult {
    /// Full 40-hex commit id.
    pub oid: String,
    pub message: String,
    pub author: String,
}

pub async fn commit(cli: &GitCli, params: CommitParams) -> ServiceResult<CommitResult> {
    let mut cli_env = GitCli {
        work_dir: cli.work_dir.clone(),
        env: cli.env.clone(),
        config: cli.config.clone(),
        cancel: cli.cancel.clone(),
        timeout: cli.timeout,
    };
    if let Some(ref author) = params.author {
        for key in ["GIT_AUTHOR", "GIT_COMMITTER"] {
            cli_env.env.push((format!("{key}_NAME"), author.name.clone()));
            cli_env.env.push((format!("{key}_EMAIL"), author.email.clone()));
        }
    }

    let mut args: Vec<String> = vec!["commit".into(), "-m".into(), params.message.clone()];
    if params.all.unwrap_or(false) {
        args.push("--all".into());
    }
    if params.amend.unwrap_or(false) {
        args.push("--amend".into());
    }
    if params.allow_empty.unwrap_or(false) {
        args.push("--allow-empty".into());
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cli_env.run_unchecked(&arg_refs).await?;
    if !output.success() {
        let combined = format!("{}\n{}", output.stdout, output.stderr);
        if combined.contains("nothing to commit")
            || combined.contains("nothing added to commit")
        {
            return Err(ServiceError::new(
                ErrorKind::GitNoChanges,
                "nothing to commit",
            )
            .with_suggestion("stage changes with git_add first"));
        }
        return Err(crate::ops::runner::classify_git_failure(&["commit"], &output));
    }

    let oid = cli.run(&["rev-parse", "HEAD"]).await?.stdout.trim().to_string();
    let author = cli
        .run(&["log", "-1", "--pretty=format:%an <%ae>"])
        .await?
        .stdout
        .trim()
        .to_string();

    Ok(CommitResult {
        oid,
        message: params.message,
        author,
    })
}
