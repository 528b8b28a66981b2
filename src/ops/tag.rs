//! Tag creation, deletion, and listing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::ops::GitCli;

const TAG_FORMAT: &str = "%(refname:short)\x1f%(objectname)\x1f%(subject)";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TagCreateParams {
    pub workspace_id: String,
    pub name: String,
    /// Annotation message; a lightweight tag when omitted.
    #[serde(default)]
    pub message: Option<String>,
    /// Commit to tag; HEAD when omitted.
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TagCreateResult {
    pub name: String,
    pub oid: String,
}

pub async fn create_tag(cli: &GitCli, params: TagCreateParams) -> ServiceResult<TagCreateResult> {
    let mut args: Vec<String> = vec!["tag".into()];
    if let Some(ref message) = params.message {
        args.push("-a".into());
        args.push("-m".into());
        args.push(message.clone());
    }
    args.push(params.name.clone());
    if let Some(ref target) = params.target {
        args.push(target.clone());
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    cli.run(&arg_refs).await?;

    let oid = cli
        .run(&["rev-parse", &format!("{}^{{commit}}", params.name)])
        .await?
        .stdout
        .trim()
        .to_string();
    Ok(TagCreateResult {
        name: params.name,
        oid,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TagDeleteParams {
    pub workspace_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TagDeleteResult {
    pub name: String,
}

pub async fn delete_tag(cli: &GitCli, params: TagDeleteParams) -> ServiceResult<TagDeleteResult> {
    cli.run(&["tag", "-d", &params.name]).await?;
    Ok(TagDeleteResult { name: params.name })
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TagListParams {
    pub workspace_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TagInfo {
    pub name: String,
    pub oid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TagListResult {
    pub tags: Vec<TagInfo>,
}

pub async fn list_tags(cli: &GitCli) -> ServiceResult<TagListResult> {
    let output = cli
        .run(&[
            "for-each-ref",
            "refs/tags",
            &format!("--format={TAG_FORMAT}"),
        ])
        .await?;
    let tags = output
        .stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\x1f');
            let name = fields.next()?.to_string();
            if name.is_empty() {
                return None;
            }
            Some(TagInfo {
                name,
                oid: fields.next().unwrap_or_default().to_string(),
                message: fields.next().filter(|s| !s.is_empty()).map(str::to_string),
            })
        })
        .collect();
    Ok(TagListResult { tags })
}
