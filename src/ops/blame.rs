//! Line-by-line authorship.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::ops::GitCli;
use crate::workspace::resolve_within;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BlameParams {
    pub workspace_id: String,
    /// File path relative to the workspace.
    pub file: String,
    /// Optional 1-based inclusive line range.
    #[serde(default)]
    pub start_line: Option<u32>,
    #[serde(default)]
    pub end_line: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BlameLine {
    pub line_no: u32,
    pub oid: String,
    pub author: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BlameResult {
    pub lines: Vec<BlameLine>,
}

pub async fn blame(cli: &GitCli, params: BlameParams) -> ServiceResult<BlameResult> {
    resolve_within(&cli.work_dir, &params.file)?;

    let mut args: Vec<String> = vec!["blame".into(), "--porcelain".into()];
    if let (Some(start), Some(end)) = (params.start_line, params.end_line) {
        args.push("-L".into());
        args.push(format!("{start},{end}"));
    }
    args.push("--".into());
    args.push(params.file.clone());

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = cli.run(&arg_refs).await?;
    Ok(BlameResult {
        lines: parse_porcelain_blame(&output.stdout),
    })
}

/// Porcelain blame: each hunk starts with `<oid> <orig> <final> [count]`,
/// followed by header lines (`author ...`, `summary ...`) the first time
/// a commit appears, then the content line prefixed with a TAB.
pub fn parse_porcelain_blame(stdout: &str) -> Vec<BlameLine> {
    struct CommitMeta {
        author: String,
        summary: String,
    }

    let mut commits: HashMap<String, CommitMeta> = HashMap::new();
    let mut lines = Vec::new();
    let mut current_oid = String::new();
    let mut current_line: u32 = 0;

    for line in stdout.lines() {
        if line.starts_with('\t') {
            if let Some(meta) = commits.get(&current_oid) {
                lines.push(BlameLine {
                    line_no: current_line,
                    oid: current_oid.clone(),
                    author: meta.author.clone(),
                    summary: meta.summary.clone(),
                });
            }
            continue;
        }

        let mut fields = line.split(' ');
        let first = fields.next().unwrap_or_default();
        if first.len() == 40 && first.chars().all(|c| c.is_ascii_hexdigit()) {
            current_oid = first.to_string();
            current_line = fields.nth(1).and_then(|f| f.parse().ok()).unwrap_or(0);
            commits.entry(current_oid.clone()).or_insert(CommitMeta {
                author: String::new(),
                summary: String::new(),
            });
        } else if let Some(author) = line.strip_prefix("author ") {
            if let Some(meta) = commits.get_mut(&current_oid) {
                meta.author = author.to_string();
            }
        } else if let Some(summary) = line.strip_prefix("summary ") {
            if let Some(meta) = commits.get_mut(&current_oid) {
                meta.summary = summary.to_string();
            }
        }
    }

    lines
}
