//! Service error taxonomy.
//!
//! Every failure that crosses a component boundary is a [`ServiceError`]:
//! a closed [`ErrorKind`] plus a message, an optional user-facing
//! suggestion, and optional structured context (e.g. a merge conflict
//! list). Numeric codes are contiguous per category so callers can
//! classify errors without string matching.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of error kinds, grouped by category.
///
/// Code ranges: 1xxx parameter validation, 2xxx git operation,
/// 3xxx repository access, 4xxx network, 5xxx system, 6xxx task
/// execution, 9xxx internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // Parameter validation
    InvalidParams,
    InvalidRemoteUrl,
    InvalidBranchName,
    InvalidPath,

    // Git operation
    GitCommandFailed,
    GitNoChanges,
    MergeConflict,
    RebaseConflict,
    PushRejected,

    // Repository access
    RepoNotFound,
    RepoAccessDenied,

    // Network
    NetworkError,
    Timeout,
    AuthFailed,

    // System
    PermissionDenied,
    ResourceExhausted,
    PathEscape,
    Storage,
    StorageFull,

    // Task execution
    TaskNotFound,
    TaskCancelled,
    TaskTimeout,
    QueueFull,
    RateLimited,
    WorkspaceNotFound,

    // Internal
    Internal,
}

impl ErrorKind {
    /// Stable numeric code for this kind.
    pub fn code(self) -> u16 {
        match self {
            ErrorKind::InvalidParams => 1000,
            ErrorKind::InvalidRemoteUrl => 1001,
            ErrorKind::InvalidBranchName => 1002,
            ErrorKind::InvalidPath => 1003,

            ErrorKind::GitCommandFailed => 2000,
            ErrorKind::GitNoChanges => 2001,
            ErrorKind::MergeConflict => 2002,
            ErrorKind::RebaseConflict => 2003,
            ErrorKind::PushRejected => 2004,

            ErrorKind::RepoNotFound => 3000,
            ErrorKind::RepoAccessDenied => 3001,

            ErrorKind::NetworkError => 4000,
            ErrorKind::Timeout => 4001,
            ErrorKind::AuthFailed => 4002,

            ErrorKind::PermissionDenied => 5000,
            ErrorKind::ResourceExhausted => 5001,
            ErrorKind::PathEscape => 5002,
            ErrorKind::Storage => 5003,
            ErrorKind::StorageFull => 5004,

            ErrorKind::TaskNotFound => 6000,
            ErrorKind::TaskCancelled => 6001,
            ErrorKind::TaskTimeout => 6002,
            ErrorKind::QueueFull => 6003,
            ErrorKind::RateLimited => 6004,
            ErrorKind::WorkspaceNotFound => 6005,

            ErrorKind::Internal => 9000,
        }
    }

    /// Whether the worker retry policy re-enqueues this kind by default.
    ///
    /// Only transient network-class failures qualify. Storage errors are
    /// retried inside the store layer, not by re-enqueueing the task.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError | ErrorKind::Timeout | ErrorKind::AuthFailed
        )
    }
}

/// Error envelope shared by every component.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{}] {}", self.kind.code(), self.message)]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            suggestion: None,
            context: None,
        }
    }

    /// Attach a user-facing suggestion.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach structured context (conflict lists, offending paths, ...).
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::NotFound => ErrorKind::RepoNotFound,
            _ => ErrorKind::Internal,
        };
        ServiceError::new(kind, format!("I/O error: {e}"))
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::new(ErrorKind::InvalidParams, format!("malformed payload: {e}"))
    }
}

/// Convenience result alias.
pub type ServiceResult<T> = Result<T, ServiceError>;
