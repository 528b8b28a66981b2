//! Working-tree status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::ops::GitCli;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StatusParams {
    pub workspace_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StatusResult {
    pub branch: String,
    pub ahead: i64,
    pub behind: i64,
    pub modified: Vec<String>,
    pub staged: Vec<String>,
    pub untracked: Vec<String>,
    pub conflicted: Vec<String>,
}

/// `git status --porcelain=v2 --branch` read into the status schema.
pub async fn status(cli: &GitCli) -> ServiceResult<StatusResult> {
    let output = cli.run(&["status", "--porcelain=v2", "--branch"]).await?;
    Ok(parse_porcelain_v2(&output.stdout))
}

pub fn parse_porcelain_v2(text: &str) -> StatusResult {
    let mut result = StatusResult {
        branch: "HEAD".to_string(),
        ..StatusResult::default()
    };

    for line in text.lines() {
        let mut fields = line.split(' ');
        match fields.next() {
            Some("#") => match fields.next() {
                Some("branch.head") => {
                    if let Some(name) = fields.next() {
                        result.branch = name.to_string();
                    }
                }
                Some("branch.ab") => {
                    for field in fields {
                        if let Some(n) = field.strip_prefix('+') {
                            result.ahead = n.parse().unwrap_or(0);
                        } else if let Some(n) = field.strip_prefix('-') {
                            result.behind = n.parse().unwrap_or(0);
                        }
                    }
                }
                _ => {}
            },
            // Ordinary changed entry: `1 XY sub mH mI mW hH hI path`.
            // Rename/copy entry: `2 XY sub mH mI mW hH hI Xscore path<TAB>origPath`,
            // where `Xscore` (e.g. `R100`) precedes the new path.
            Some(kind @ ("1" | "2")) => {
                let Some(xy) = fields.next() else { continue };
                let path = if kind == "1" {
                    line.split(' ').nth(8).unwrap_or_default().to_string()
                } else {
                    line.split(' ')
                        .nth(9)
                        .unwrap_or_default()
                        .split('\t')
                        .next()
                        .unwrap_or_default()
                        .to_string()
                };
                if path.is_empty() {
                    continue;
                }
                let mut chars = xy.chars();
                let x = chars.next().unwrap_or('.');
                let y = chars.next().unwrap_or('.');
                if x != '.' {
                    result.staged.push(path.clone());
                }
                if y != '.' {
                    result.modified.push(path);
                }
            }
            // Unmerged entry: `u XY sub m1 m2 m3 mW h1 h2 h3 path`
            Some("u") => {
                if let Some(path) = line.split(' ').nth(10) {
                    result.conflicted.push(path.to_string());
                }
            }
            Some("?") => {
                if let Some(path) = line.strip_prefix("? ") {
                    result.untracked.push(path.to_string());
                }
            }
            _ => {}
        }
    }

    result
}
