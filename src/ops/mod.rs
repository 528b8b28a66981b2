//! Git operation adapter.
//!
//! Workers talk to Git through the [`GitAdapter`] trait: one dispatch
//! entry point taking an operation tag plus its opaque parameter
//! payload, a workspace path, optional credentials, a progress sink,
//! and a cancellation token. The production implementation,
//! [`CliGitAdapter`], shells out to the `git` binary through the
//! runner; tests substitute scripted adapters.

pub mod auth;
pub mod runner;

pub mod blame;
pub mod branch;
pub mod checkout;
pub mod clone;
pub mod commit;
pub mod diff;
pub mod fetch;
pub mod lfs;
pub mod log;
pub mod merge;
pub mod pull;
pub mod push;
pub mod remote;
pub mod replay;
pub mod reset;
pub mod sparse;
pub mod stash;
pub mod status;
pub mod submodule;
pub mod tag;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::credentials::CredentialHandle;
use crate::error::{ServiceError, ServiceResult};
use crate::task::model::Operation;

pub use runner::{GitCli, GitOutput};

// Re-export operation parameter/result types for the tool layer.
pub use blame::{BlameLine, BlameParams, BlameResult};
pub use branch::{
    BranchCreateParams, BranchDeleteParams, BranchInfo, BranchListParams, BranchListResult,
    BranchNameResult,
};
pub use checkout::{CheckoutParams, CheckoutResult};
pub use clone::{CloneParams, CloneResult};
pub use commit::{AddParams, AddResult, CommitParams, CommitResult, SignatureParams};
pub use diff::{DiffParams, DiffResult, FileDiff};
pub use fetch::{FetchParams, FetchResult, RefUpdate};
pub use lfs::{LfsFetchParams, LfsFetchResult, LfsTrackParams, LfsTrackResult};
pub use log::{CommitSummary, LogParams, LogResult};
pub use merge::{ConflictEntry, MergeParams, MergeResult, RebaseParams, RebaseResult};
pub use pull::{PullParams, PullResult};
pub use push::{PushParams, PushResult};
pub use remote::{
    RemoteAddParams, RemoteInfo, RemoteListParams, RemoteListResult, RemoteNameResult,
    RemoteRemoveParams,
};
pub use replay::{CherryPickParams, ReplayResult, RevertParams};
pub use reset::{CleanParams, CleanResult, ResetMode, ResetParams, ResetResult};
pub use sparse::{SparseCheckoutParams, SparseCheckoutResult};
pub use stash::{
    StashInfo, StashListParams, StashListResult, StashPopParams, StashPopResult, StashSaveParams,
    StashSaveResult,
};
pub use status::{StatusParams, StatusResult};
pub use submodule::{
    SubmoduleAddParams, SubmoduleAddResult, SubmoduleInfo, SubmoduleListParams,
    SubmoduleListResult, SubmoduleUpdateParams, SubmoduleUpdateResult,
};
pub use tag::{
    TagCreateParams, TagCreateResult, TagDeleteParams, TagDeleteResult, TagInfo, TagListParams,
    TagListResult,
};

/// Progress callback handed to long-running operations. Emitting is
/// cheap and non-blocking; throttling and persistence are the caller's
/// concern.
#[derive(Clone)]
pub struct ProgressSink(Arc<dyn Fn(u8) + Send + Sync>);

impl ProgressSink {
    pub fn new(f: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn noop() -> Self {
        Self(Arc::new(|_| {}))
    }

    pub fn emit(&self, percent: u8) {
        (self.0)(percent.min(100));
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProgressSink")
    }
}

/// Everything an adapter needs to execute one operation.
pub struct OpRequest {
    pub operation: Operation,
    /// Handler-validated payload, deserialized again by the operation.
    pub params: serde_json::Value,
    pub workspace_id: Option<Uuid>,
    pub workspace_path: PathBuf,
    pub credential: Option<CredentialHandle>,
    pub progress: ProgressSink,
    pub cancel: CancellationToken,
    /// Remaining deadline budget for the whole operation.
    pub timeout: Duration,
}

/// Abstract Git capability surface.
#[async_trait]
pub trait GitAdapter: Send + Sync {
    /// Execute `req.operation`, returning the operation's result payload
    /// or a typed error. Implementations must observe `req.cancel` at
    /// safe boundaries and leave the workspace recoverable.
    async fn execute(&self, req: OpRequest) -> ServiceResult<serde_json::Value>;
}

/// Production adapter backed by the `git` command-line tool.
pub struct CliGitAdapter;

impl CliGitAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CliGitAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitAdapter for CliGitAdapter {
    async fn execute(&self, req: OpRequest) -> ServiceResult<serde_json::Value> {
        let mut cli = GitCli::new(req.workspace_path.clone(), req.cancel.clone(), req.timeout);
        if req.operation.is_remote() {
            let material = auth::auth_material(req.credential.as_ref());
            cli.env = material.env;
            cli.config = material.config;
        }
        // Sideband progress is only meaningful for transfer commands.
        cli.config.push("color.ui=false".into());

        let params = &req.params;
        let progress = &req.progress;

        match req.operation {
            Operation::Clone => {
                to_value(clone::clone_repo(&cli, parse(params)?, req.workspace_id, progress).await?)
            }
            Operation::Fetch => to_value(fetch::fetch(&cli, parse(params)?, progress).await?),
            Operation::Pull => to_value(pull::pull(&cli, parse(params)?, progress).await?),
            Operation::Push => to_value(push::push(&cli, parse(params)?, progress).await?),
            Operation::Merge => to_value(merge::merge(&cli, parse(params)?).await?),
            Operation::Rebase => to_value(merge::rebase(&cli, parse(params)?).await?),
            Operation::SubmoduleUpdate => {
                to_value(submodule::update_submodules(&cli, parse(params)?, progress).await?)
            }
            Operation::SubmoduleAdd => {
                to_value(submodule::add_submodule(&cli, parse(params)?).await?)
            }
            Operation::LfsFetch => to_value(lfs::lfs_fetch(&cli, parse(params)?, false).await?),
            Operation::LfsPull => to_value(lfs::lfs_fetch(&cli, parse(params)?, true).await?),

            Operation::Status => to_value(status::status(&cli).await?),
            Operation::Add => to_value(commit::add(&cli, parse(params)?).await?),
            Operation::Commit => to_value(commit::commit(&cli, parse(params)?).await?),
            Operation::Checkout => to_value(checkout::checkout(&cli, parse(params)?).await?),
            Operation::BranchList => to_value(branch::list_branches(&cli).await?),
            Operation::BranchCreate => to_value(branch::create_branch(&cli, parse(params)?).await?),
            Operation::BranchDelete => to_value(branch::delete_branch(&cli, parse(params)?).await?),
            Operation::Log => to_value(log::log(&cli, parse(params)?).await?),
            Operation::Diff => to_value(diff::diff(&cli, parse(params)?).await?),
            Operation::Blame => to_value(blame::blame(&cli, parse(params)?).await?),
            Operation::StashSave => to_value(stash::stash_save(&cli, parse(params)?).await?),
            Operation::StashPop => to_value(stash::stash_pop(&cli, parse(params)?).await?),
            Operation::StashList => to_value(stash::stash_list(&cli).await?),
            Operation::TagCreate => to_value(tag::create_tag(&cli, parse(params)?).await?),
            Operation::TagDelete => to_value(tag::delete_tag(&cli, parse(params)?).await?),
            Operation::TagList => to_value(tag::list_tags(&cli).await?),
            Operation::RemoteList => to_value(remote::list_remotes(&cli).await?),
            Operation::RemoteAdd => to_value(remote::add_remote(&cli, parse(params)?).await?),
            Operation::RemoteRemove => to_value(remote::remove_remote(&cli, parse(params)?).await?),
            Operation::Reset => to_value(reset::reset(&cli, parse(params)?).await?),
            Operation::CherryPick => to_value(replay::cherry_pick(&cli, parse(params)?).await?),
            Operation::Revert => to_value(replay::revert(&cli, parse(params)?).await?),
            Operation::Clean => to_value(reset::clean(&cli, parse(params)?).await?),
            Operation::SparseCheckout => {
                to_value(sparse::sparse_checkout(&cli, parse(params)?).await?)
            }
            Operation::SubmoduleList => to_value(submodule::list_submodules(&cli).await?),
            Operation::LfsTrack => to_value(lfs::lfs_track(&cli, parse(params)?).await?),
        }
    }
}

fn parse<T: DeserializeOwned>(params: &serde_json::Value) -> ServiceResult<T> {
    serde_json::from_value(params.clone()).map_err(ServiceError::from)
}

fn to_value<T: Serialize>(result: T) -> ServiceResult<serde_json::Value> {
    serde_json::to_value(result).map_err(ServiceError::from)
}
