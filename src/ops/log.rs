//! Commit history listing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::ops::GitCli;
use crate::workspace::resolve_within;

/// Unit-separator / record-separator framed pretty format; immune to
/// newlines and tabs in commit messages.
const LOG_FORMAT: &str = "%H\x1f%an\x1f%ae\x1f%aI\x1f%s\x1e";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogParams {
    pub workspace_id: String,
    /// Maximum number of commits (default 50).
    #[serde(default)]
    pub max_count: Option<u32>,
    /// Ref to walk from; HEAD when omitted.
    #[serde(default)]
    pub rev: Option<String>,
    /// Restrict history to one path inside the workspace.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommitSummary {
    pub oid: String,
    pub author: String,
    pub email: String,
    pub time: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LogResult {
    pub commits: Vec<CommitSummary>,
}

pub async fn log(cli: &GitCli, params: LogParams) -> ServiceResult<LogResult> {
    let max = params.max_count.unwrap_or(50).clamp(1, 1000);
    let mut args: Vec<String> = vec![
        "log".into(),
        format!("--pretty=format:{LOG_FORMAT}"),
        format!("-n{max}"),
    ];
    if let Some(ref rev) = params.rev {
        args.push(rev.clone());
    }
    if let Some(ref path) = params.path {
        resolve_within(&cli.work_dir, path)?;
        args.push("--".into());
        args.push(path.clone());
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cli.run(&arg_refs).await?;
    Ok(LogResult {
        commits: parse_log(&output.stdout),
    })
}

pub fn parse_log(stdout: &str) -> Vec<CommitSummary> {
    stdout
        .split('\x1e')
        .filter_map(|record| {
            let record = record.trim_matches(['\n', '\r']);
            let mut fields = record.split('\x1f');
            let oid = fields.next()?.trim().to_string();
            if oid.len() != 40 || !oid.chars().all(|c| c.is_ascii_hexdigit()) {
                return None;
            }
            Some(CommitSummary {
                oid,
                author: fields.next().unwrap_or_default().to_string(),
                email: fields.next().unwrap_or_default().to_string(),
                time: fields.next().unwrap_or_default().to_string(),
                summary: fields.next().unwrap_or_default().to_string(),
            })
        })
        .collect()
}
