//! Submodule listing, update, and registration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::ops::{GitCli, ProgressSink};
use crate::workspace::resolve_within;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmoduleListParams {
    pub workspace_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmoduleInfo {
    pub name: String,
    pub path: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmoduleListResult {
    pub submodules: Vec<SubmoduleInfo>,
}

pub async fn list_submodules(cli: &GitCli) -> ServiceResult<SubmoduleListResult> {
    // No .gitmodules means no submodules, not an error.
    let config = cli
        .run_unchecked(&[
            "config",
            "--file",
            ".gitmodules",
            "--get-regexp",
            r"^submodule\..*\.(path|url)$",
        ])
        .await?;

    let mut by_name: Vec<SubmoduleInfo> = Vec::new();
    for line in config.stdout.lines() {
        let Some((key, value)) = line.split_once(' ') else { continue };
        let Some(rest) = key.strip_prefix("submodule.") else { continue };
        let Some((name, field)) = rest.rsplit_once('.') else { continue };

        let idx = match by_name.iter().position(|s| s.name == name) {
            Some(idx) => idx,
            None => {
                by_name.push(SubmoduleInfo {
                    name: name.to_string(),
                    path: String::new(),
                    url: String::new(),
                    oid: None,
                });
                by_name.len() - 1
            }
        };
        match field {
            "path" => by_name[idx].path = value.to_string(),
            "url" => by_name[idx].url = value.to_string(),
            _ => {}
        }
    }

    // `submodule status` supplies the pinned commit where initialized.
    let status = cli.run_unchecked(&["submodule", "status"]).await?;
    for line in status.stdout.lines() {
        let trimmed = line.trim_start_matches(['-', '+', 'U', ' ']);
        let mut fields = trimmed.split_whitespace();
        let (Some(oid), Some(path)) = (fields.next(), fields.next()) else {
            continue;
        };
        if let Some(entry) = by_name.iter_mut().find(|s| s.path == path) {
            entry.oid = Some(oid.to_string());
        }
    }

    Ok(SubmoduleListResult { submodules: by_name })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmoduleUpdateParams {
    pub workspace_id: String,
    #[serde(default)]
    pub init: Option<bool>,
    #[serde(default)]
    pub recursive: Option<bool>,
    /// Restrict to specific submodule paths.
    #[serde(default)]
    pub paths: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmoduleUpdateResult {
    pub updated: Vec<String>,
}

pub async fn update_submodules(
    cli: &GitCli,
    params: SubmoduleUpdateParams,
    progress: &ProgressSink,
) -> ServiceResult<SubmoduleUpdateResult> {
    progress.emit(0);

    let mut args: Vec<String> = vec!["submodule".into(), "update".into(), "--progress".into()];
    if params.init.unwrap_or(true) {
        args.push("--init".into());
    }
    if params.recursive.unwrap_or(false) {
        args.push("--recursive".into());
    }
    if let Some(paths) = params.paths.as_deref() {
        for path in paths {
            resolve_within(&cli.work_dir, path)?;
        }
        args.push("--".into());
        args.extend(paths.iter().cloned());
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cli.run_with_progress(&arg_refs, progress).await?;

    let updated = output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .filter_map(|line| {
            let rest = line.strip_prefix("Submodule path '")?;
            rest.split_once('\'').map(|(path, _)| path.to_string())
        })
        .collect();
    Ok(SubmoduleUpdateResult { updated })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmoduleAddParams {
    pub workspace_id: String,
    pub url: String,
    /// Mount point relative to the workspace.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmoduleAddResult {
    pub name: String,
    pub updated: Vec<String>,
}

pub async fn add_submodule(
    cli: &GitCli,
    params: SubmoduleAddParams,
) -> ServiceResult<SubmoduleAddResult> {
    resolve_within(&cli.work_dir, &params.path)?;
    cli.run(&["submodule", "add", &params.url, &params.path]).await?;
    Ok(SubmoduleAddResult {
        name: params.path.clone(),
        updated: vec![params.path],
    })
}
