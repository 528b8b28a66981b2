//! MCP tool surface.
//!
//! Each tool maps to exactly one core call: long-running operations are
//! submitted to the task manager and answer `{task_id, status}`, local
//! operations run synchronously, and the control tools read or poke
//! task and workspace state. Input schemas are validated here — shape
//! by serde/schemars, lexical safety by [`validate`] — and handlers
//! never touch the adapter directly.

pub mod validate;

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, ErrorCode, Implementation, ProtocolVersion, ServerCapabilities,
        ServerInfo,
    },
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::context::ServiceContext;
use crate::error::{ErrorKind, ServiceError};
use crate::ops::{
    AddParams, BlameParams, BranchCreateParams, BranchDeleteParams, BranchListParams,
    CheckoutParams, CherryPickParams, CleanParams, CloneParams, CommitParams, DiffParams,
    FetchParams, LfsFetchParams, LfsTrackParams, LogParams, MergeParams, PullParams, PushParams,
    RebaseParams, RemoteAddParams, RemoteListParams, RemoteRemoveParams, ResetParams,
    RevertParams, SparseCheckoutParams, StashListParams, StashPopParams, StashSaveParams,
    StatusParams, SubmoduleAddParams, SubmoduleListParams, SubmoduleUpdateParams, TagCreateParams,
    TagDeleteParams, TagListParams,
};
use crate::task::model::{Operation, TaskFilter, TaskStatus};
use validate::{clamp_limit, validate_ref_name, validate_rel_path, validate_rev, validate_url};

// ---------------------------------------------------------------------
// Control-tool argument schemas
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskIdArgs {
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListTasksArgs {
    /// QUEUED | RUNNING | COMPLETED | FAILED | CANCELLED | TIMED_OUT
    #[serde(default)]
    pub status: Option<String>,
    /// Operation wire name, e.g. `clone`.
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkspaceIdArgs {
    pub workspace_id: String,
}

// ---------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------

#[derive(Clone)]
pub struct GitToolServer {
    ctx: Arc<ServiceContext>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl GitToolServer {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    fn err(&self, e: ServiceError) -> McpError {
        let e = self.ctx.tasks.credentials().redact_error(e);
        let code = match e.kind {
            ErrorKind::InvalidParams
            | ErrorKind::InvalidRemoteUrl
            | ErrorKind::InvalidBranchName
            | ErrorKind::InvalidPath
            | ErrorKind::PathEscape
            | ErrorKind::TaskNotFound
            | ErrorKind::WorkspaceNotFound => ErrorCode::INVALID_PARAMS,
            _ => ErrorCode::INTERNAL_ERROR,
        };
        let data = serde_json::to_value(&e).ok();
        McpError::new(code, e.message, data)
    }

    fn reply<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
        let text = serde_json::to_string_pretty(value)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    /// Submit an async operation; the answer is the queued task reference.
    async fn submit<T: Serialize>(
        &self,
        operation: Operation,
        args: &T,
    ) -> Result<CallToolResult, McpError> {
        let params = serde_json::to_value(args)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let id = self
            .ctx
            .tasks
            .submit(operation, params)
            .await
            .map_err(|e| self.err(e))?;
        Self::reply(&json!({ "task_id": id, "status": "queued" }))
    }

    /// Run a local operation directly and answer its result payload.
    async fn sync<T: Serialize>(
        &self,
        operation: Operation,
        args: &T,
    ) -> Result<CallToolResult, McpError> {
        let params = serde_json::to_value(args)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let result = self
            .ctx
            .tasks
            .run_sync(operation, params)
            .await
            .map_err(|e| self.err(e))?;
        Self::reply(&result)
    }

    fn check(&self, r: Result<(), ServiceError>) -> Result<(), McpError> {
        r.map_err(|e| self.err(e))
    }

    fn parse_id(&self, raw: &str, what: &str) -> Result<Uuid, McpError> {
        Uuid::parse_str(raw)
            .map_err(|_| self.err(ServiceError::invalid_params(format!("`{raw}` is not a {what}"))))
    }

    // -----------------------------------------------------------------
    // Long-running operations (queued)
    // -----------------------------------------------------------------

    #[tool(
        description = "Clone a remote repository into an isolated workspace. Long-running: returns a task_id to poll with git_get_task. Shallow by default; supports branch selection, partial-clone filters, and an initial sparse-checkout set."
    )]
    async fn git_clone(
        &self,
        Parameters(mut args): Parameters<CloneParams>,
    ) -> Result<CallToolResult, McpError> {
        self.check(validate_url(&args.url))?;
        if let Some(ref branch) = args.branch {
            self.check(validate_ref_name(branch))?;
        }
        for path in args.sparse_paths.iter().flatten() {
            self.check(validate_rel_path(path))?;
        }
        if args.depth.is_none() && self.ctx.config.default_clone_depth > 0 {
            args.depth = Some(self.ctx.config.default_clone_depth);
        }
        self.submit(Operation::Clone, &args).await
    }

    #[tool(description = "Fetch refs from a remote into a workspace. Long-running task.")]
    async fn git_fetch(
        &self,
        Parameters(args): Parameters<FetchParams>,
    ) -> Result<CallToolResult, McpError> {
        if let Some(ref remote) = args.remote {
            self.check(validate_ref_name(remote))?;
        }
        self.submit(Operation::Fetch, &args).await
    }

    #[tool(description = "Fetch and integrate remote changes (merge or rebase). Long-running task.")]
    async fn git_pull(
        &self,
        Parameters(args): Parameters<PullParams>,
    ) -> Result<CallToolResult, McpError> {
        if let Some(ref remote) = args.remote {
            self.check(validate_ref_name(remote))?;
        }
        if let Some(ref branch) = args.branch {
            self.check(validate_ref_name(branch))?;
        }
        self.submit(Operation::Pull, &args).await
    }

    #[tool(description = "Push local commits to a remote. Long-running task.")]
    async fn git_push(
        &self,
        Parameters(args): Parameters<PushParams>,
    ) -> Result<CallToolResult, McpError> {
        if let Some(ref remote) = args.remote {
            self.check(validate_ref_name(remote))?;
        }
        for refspec in args.refspecs.iter().flatten() {
            self.check(validate_rev(refspec.trim_start_matches('+')))?;
        }
        self.submit(Operation::Push, &args).await
    }

    #[tool(
        description = "Merge a branch or commit into HEAD. Long-running task; conflicts are reported as a structured list, never auto-resolved."
    )]
    async fn git_merge(
        &self,
        Parameters(args): Parameters<MergeParams>,
    ) -> Result<CallToolResult, McpError> {
        self.check(validate_rev(&args.rev))?;
        self.submit(Operation::Merge, &args).await
    }

    #[tool(
        description = "Rebase HEAD onto an upstream. Long-running task; conflicts abort the rebase and are reported."
    )]
    async fn git_rebase(
        &self,
        Parameters(args): Parameters<RebaseParams>,
    ) -> Result<CallToolResult, McpError> {
        self.check(validate_rev(&args.upstream))?;
        if let Some(ref onto) = args.onto {
            self.check(validate_rev(onto))?;
        }
        self.submit(Operation::Rebase, &args).await
    }

    #[tool(description = "Initialize and update submodules. Long-running task.")]
    async fn git_submodule_update(
        &self,
        Parameters(args): Parameters<SubmoduleUpdateParams>,
    ) -> Result<CallToolResult, McpError> {
        for path in args.paths.iter().flatten() {
            self.check(validate_rel_path(path))?;
        }
        self.submit(Operation::SubmoduleUpdate, &args).await
    }

    #[tool(description = "Add a submodule at a path inside the workspace. Long-running task.")]
    async fn git_submodule_add(
        &self,
        Parameters(args): Parameters<SubmoduleAddParams>,
    ) -> Result<CallToolResult, McpError> {
        self.check(validate_url(&args.url))?;
        self.check(validate_rel_path(&args.path))?;
        self.submit(Operation::SubmoduleAdd, &args).await
    }

    #[tool(description = "Download Git LFS objects without touching the working tree. Long-running task.")]
    async fn git_lfs_fetch(
        &self,
        Parameters(args): Parameters<LfsFetchParams>,
    ) -> Result<CallToolResult, McpError> {
        self.submit(Operation::LfsFetch, &args).await
    }

    #[tool(description = "Download Git LFS objects and check them out. Long-running task.")]
    async fn git_lfs_pull(
        &self,
        Parameters(args): Parameters<LfsFetchParams>,
    ) -> Result<CallToolResult, McpError> {
        self.submit(Operation::LfsPull, &args).await
    }

    // -----------------------------------------------------------------
    // Local operations (synchronous)
    // -----------------------------------------------------------------

    #[tool(
        description = "Working-tree status: current branch, ahead/behind counts, staged, modified, untracked, and conflicted files."
    )]
    async fn git_status(
        &self,
        Parameters(args): Parameters<StatusParams>,
    ) -> Result<CallToolResult, McpError> {
        self.sync(Operation::Status, &args).await
    }

    #[tool(description = "Stage files. Omit `files` to stage everything.")]
    async fn git_add(
        &self,
        Parameters(args): Parameters<AddParams>,
    ) -> Result<CallToolResult, McpError> {
        for file in args.files.iter().flatten() {
            self.check(validate_rel_path(file))?;
        }
        self.sync(Operation::Add, &args).await
    }

    #[tool(description = "Create a commit from the staged changes.")]
    async fn git_commit(
        &self,
        Parameters(args): Parameters<CommitParams>,
    ) -> Result<CallToolResult, McpError> {
        if args.message.trim().is_empty() {
            return Err(self.err(ServiceError::invalid_params("commit message is empty")));
        }
        if let Some(ref author) = args.author {
            if author.name.trim().is_empty() || !author.email.contains('@') {
                return Err(self.err(ServiceError::invalid_params("invalid author signature")));
            }
        }
        self.sync(Operation::Commit, &args).await
    }

    #[tool(description = "Check out a branch, tag, or commit; optionally create the branch.")]
    async fn git_checkout(
        &self,
        Parameters(args): Parameters<CheckoutParams>,
    ) -> Result<CallToolResult, McpError> {
        if args.create.unwrap_or(false) {
            self.check(validate_ref_name(&args.rev))?;
        } else {
            self.check(validate_rev(&args.rev))?;
        }
        self.sync(Operation::Checkout, &args).await
    }

    #[tool(description = "List local branches with upstream and head commit.")]
    async fn git_branch_list(
        &self,
        Parameters(args): Parameters<BranchListParams>,
    ) -> Result<CallToolResult, McpError> {
        self.sync(Operation::BranchList, &args).await
    }

    #[tool(description = "Create a branch, optionally checking it out.")]
    async fn git_branch_create(
        &self,
        Parameters(args): Parameters<BranchCreateParams>,
    ) -> Result<CallToolResult, McpError> {
        self.check(validate_ref_name(&args.name))?;
        if let Some(ref start) = args.start_point {
            self.check(validate_rev(start))?;
        }
        self.sync(Operation::BranchCreate, &args).await
    }

    #[tool(description = "Delete a branch. Unmerged branches need force=true.")]
    async fn git_branch_delete(
        &self,
        Parameters(args): Parameters<BranchDeleteParams>,
    ) -> Result<CallToolResult, McpError> {
        self.check(validate_ref_name(&args.name))?;
        self.sync(Operation::BranchDelete, &args).await
    }

    #[tool(description = "Commit history with author, time, and summary per commit.")]
    async fn git_log(
        &self,
        Parameters(args): Parameters<LogParams>,
    ) -> Result<CallToolResult, McpError> {
        if let Some(ref rev) = args.rev {
            self.check(validate_rev(rev))?;
        }
        if let Some(ref path) = args.path {
            self.check(validate_rel_path(path))?;
        }
        self.sync(Operation::Log, &args).await
    }

    #[tool(description = "Diff statistics between revisions, the index, or the working tree.")]
    async fn git_diff(
        &self,
        Parameters(args): Parameters<DiffParams>,
    ) -> Result<CallToolResult, McpError> {
        if let Some(ref base) = args.base {
            self.check(validate_rev(base))?;
        }
        if let Some(ref target) = args.target {
            self.check(validate_rev(target))?;
        }
        if let Some(ref path) = args.path {
            self.check(validate_rel_path(path))?;
        }
        self.sync(Operation::Diff, &args).await
    }

    #[tool(description = "Line-by-line authorship for one file.")]
    async fn git_blame(
        &self,
        Parameters(args): Parameters<BlameParams>,
    ) -> Result<CallToolResult, McpError> {
        self.check(validate_rel_path(&args.file))?;
        if let (Some(start), Some(end)) = (args.start_line, args.end_line) {
            if start == 0 || end < start {
                return Err(self.err(ServiceError::invalid_params("invalid line range")));
            }
        }
        self.sync(Operation::Blame, &args).await
    }

    #[tool(description = "Stash the working-tree changes.")]
    async fn git_stash_save(
        &self,
        Parameters(args): Parameters<StashSaveParams>,
    ) -> Result<CallToolResult, McpError> {
        self.sync(Operation::StashSave, &args).await
    }

    #[tool(description = "Apply and drop a stash entry.")]
    async fn git_stash_pop(
        &self,
        Parameters(args): Parameters<StashPopParams>,
    ) -> Result<CallToolResult, McpError> {
        self.sync(Operation::StashPop, &args).await
    }

    #[tool(description = "List stash entries.")]
    async fn git_stash_list(
        &self,
        Parameters(args): Parameters<StashListParams>,
    ) -> Result<CallToolResult, McpError> {
        self.sync(Operation::StashList, &args).await
    }

    #[tool(description = "Create a lightweight or annotated tag.")]
    async fn git_tag_create(
        &self,
        Parameters(args): Parameters<TagCreateParams>,
    ) -> Result<CallToolResult, McpError> {
        self.check(validate_ref_name(&args.name))?;
        if let Some(ref target) = args.target {
            self.check(validate_rev(target))?;
        }
        self.sync(Operation::TagCreate, &args).await
    }

    #[tool(description = "Delete a tag.")]
    async fn git_tag_delete(
        &self,
        Parameters(args): Parameters<TagDeleteParams>,
    ) -> Result<CallToolResult, McpError> {
        self.check(validate_ref_name(&args.name))?;
        self.sync(Operation::TagDelete, &args).await
    }

    #[tool(description = "List tags with target commit and message.")]
    async fn git_tag_list(
        &self,
        Parameters(args): Parameters<TagListParams>,
    ) -> Result<CallToolResult, McpError> {
        self.sync(Operation::TagList, &args).await
    }

    #[tool(description = "List configured remotes (URLs are credential-redacted).")]
    async fn git_remote_list(
        &self,
        Parameters(args): Parameters<RemoteListParams>,
    ) -> Result<CallToolResult, McpError> {
        self.sync(Operation::RemoteList, &args).await
    }

    #[tool(description = "Add a remote.")]
    async fn git_remote_add(
        &self,
        Parameters(args): Parameters<RemoteAddParams>,
    ) -> Result<CallToolResult, McpError> {
        self.check(validate_ref_name(&args.name))?;
        self.check(validate_url(&args.url))?;
        self.sync(Operation::RemoteAdd, &args).await
    }

    #[tool(description = "Remove a remote.")]
    async fn git_remote_remove(
        &self,
        Parameters(args): Parameters<RemoteRemoveParams>,
    ) -> Result<CallToolResult, McpError> {
        self.check(validate_ref_name(&args.name))?;
        self.sync(Operation::RemoteRemove, &args).await
    }

    #[tool(description = "Reset HEAD (soft, mixed, or hard) to a target revision.")]
    async fn git_reset(
        &self,
        Parameters(args): Parameters<ResetParams>,
    ) -> Result<CallToolResult, McpError> {
        if let Some(ref target) = args.target {
            self.check(validate_rev(target))?;
        }
        self.sync(Operation::Reset, &args).await
    }

    #[tool(description = "Apply one commit onto HEAD.")]
    async fn git_cherry_pick(
        &self,
        Parameters(args): Parameters<CherryPickParams>,
    ) -> Result<CallToolResult, McpError> {
        self.check(validate_rev(&args.commit))?;
        self.sync(Operation::CherryPick, &args).await
    }

    #[tool(description = "Create a commit that undoes an earlier commit.")]
    async fn git_revert(
        &self,
        Parameters(args): Parameters<RevertParams>,
    ) -> Result<CallToolResult, McpError> {
        self.check(validate_rev(&args.commit))?;
        self.sync(Operation::Revert, &args).await
    }

    #[tool(description = "Remove untracked files. Requires force=true; supports dry_run.")]
    async fn git_clean(
        &self,
        Parameters(args): Parameters<CleanParams>,
    ) -> Result<CallToolResult, McpError> {
        self.sync(Operation::Clean, &args).await
    }

    #[tool(description = "Restrict the working tree to a sparse-checkout path set.")]
    async fn git_sparse_checkout(
        &self,
        Parameters(args): Parameters<SparseCheckoutParams>,
    ) -> Result<CallToolResult, McpError> {
        for path in &args.paths {
            self.check(validate_rel_path(path))?;
        }
        self.sync(Operation::SparseCheckout, &args).await
    }

    #[tool(description = "List submodules with path, URL, and pinned commit.")]
    async fn git_submodule_list(
        &self,
        Parameters(args): Parameters<SubmoduleListParams>,
    ) -> Result<CallToolResult, McpError> {
        self.sync(Operation::SubmoduleList, &args).await
    }

    #[tool(description = "Track glob patterns with Git LFS.")]
    async fn git_lfs_track(
        &self,
        Parameters(args): Parameters<LfsTrackParams>,
    ) -> Result<CallToolResult, McpError> {
        for pattern in &args.patterns {
            if pattern.is_empty() || pattern.starts_with('-') || pattern.contains('\0') {
                return Err(self.err(ServiceError::invalid_params("invalid LFS pattern")));
            }
        }
        self.sync(Operation::LfsTrack, &args).await
    }

    // -----------------------------------------------------------------
    // Task control & introspection
    // -----------------------------------------------------------------

    #[tool(
        description = "Full record of a task: status, progress, attempt, timestamps, result or error. Poll this after submitting a long-running operation."
    )]
    async fn git_get_task(
        &self,
        Parameters(args): Parameters<TaskIdArgs>,
    ) -> Result<CallToolResult, McpError> {
        let id = self.parse_id(&args.task_id, "task id")?;
        let task = self.ctx.tasks.status(id).await.map_err(|e| self.err(e))?;
        Self::reply(&task)
    }

    #[tool(
        description = "Cancel a queued or running task. Returns cancelled=false when the task already reached a terminal state."
    )]
    async fn git_cancel_task(
        &self,
        Parameters(args): Parameters<TaskIdArgs>,
    ) -> Result<CallToolResult, McpError> {
        let id = self.parse_id(&args.task_id, "task id")?;
        let cancelled = self.ctx.tasks.cancel(id).await.map_err(|e| self.err(e))?;
        Self::reply(&json!({ "cancelled": cancelled }))
    }

    #[tool(description = "List tasks, optionally filtered by status, operation, or workspace.")]
    async fn git_list_tasks(
        &self,
        Parameters(args): Parameters<ListTasksArgs>,
    ) -> Result<CallToolResult, McpError> {
        let mut filter = TaskFilter::default();
        if let Some(ref status) = args.status {
            filter.status = Some(TaskStatus::parse(status).ok_or_else(|| {
                self.err(ServiceError::invalid_params(format!(
                    "`{status}` is not a task status"
                )))
            })?);
        }
        if let Some(ref op) = args.operation {
            filter.operation = Some(Operation::parse(op).ok_or_else(|| {
                self.err(ServiceError::invalid_params(format!(
                    "`{op}` is not an operation"
                )))
            })?);
        }
        if let Some(ref ws) = args.workspace_id {
            filter.workspace_id = Some(self.parse_id(ws, "workspace id")?);
        }
        let limit = clamp_limit(args.limit, 50, 500);
        let tasks = self
            .ctx
            .tasks
            .list(filter, limit)
            .await
            .map_err(|e| self.err(e))?;
        Self::reply(&json!({ "tasks": tasks }))
    }

    #[tool(description = "Allocate a fresh, empty workspace directory and return its id and path.")]
    async fn git_workspace_allocate(&self) -> Result<CallToolResult, McpError> {
        let ws = self
            .ctx
            .tasks
            .workspaces()
            .allocate()
            .await
            .map_err(|e| self.err(e))?;
        Self::reply(&json!({
            "workspace_id": ws.id,
            "path": ws.path.display().to_string(),
        }))
    }

    #[tool(description = "List workspaces with size, access time, and quarantine flag.")]
    async fn git_workspace_list(&self) -> Result<CallToolResult, McpError> {
        let workspaces = self
            .ctx
            .tasks
            .workspaces()
            .list()
            .await
            .map_err(|e| self.err(e))?;
        Self::reply(&json!({ "workspaces": workspaces }))
    }

    #[tool(description = "Delete a workspace directory and its record. Refused while a task holds it.")]
    async fn git_workspace_delete(
        &self,
        Parameters(args): Parameters<WorkspaceIdArgs>,
    ) -> Result<CallToolResult, McpError> {
        let id = self.parse_id(&args.workspace_id, "workspace id")?;
        self.ctx
            .tasks
            .workspaces()
            .delete(id)
            .await
            .map_err(|e| self.err(e))?;
        Self::reply(&json!({ "deleted": true }))
    }

    #[tool(description = "Disk capacity of the volume hosting the workspace root, plus aggregate workspace usage.")]
    async fn git_disk_space(&self) -> Result<CallToolResult, McpError> {
        let space = self
            .ctx
            .tasks
            .workspaces()
            .disk_space()
            .await
            .map_err(|e| self.err(e))?;
        Self::reply(&space)
    }
}

#[tool_handler]
impl ServerHandler for GitToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Git operations over isolated workspaces. Long-running operations \
                 (clone, fetch, pull, push, merge, rebase, submodule and LFS \
                 transfers) return a task_id immediately; poll git_get_task until \
                 the task reaches a terminal status and read its result there. \
                 Local operations return their result directly."
                    .to_string(),
            ),
            ..Default::default()
        }
    }
}
