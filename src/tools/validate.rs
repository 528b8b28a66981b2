//! Handler-boundary lexical validation.
//!
//! Everything here rejects before any core call: URL shape, ref and
//! branch-name safety, and relative-path hygiene. Filesystem-level
//! containment is enforced again inside the workspace manager; these
//! checks exist so malformed input never reaches the queue.

use crate::error::{ErrorKind, ServiceError, ServiceResult};

/// Accepted remote URL forms: `http(s)://`, `ssh://`, `git://`,
/// `file://`, or scp-style `user@host:path`.
pub fn validate_url(url: &str) -> ServiceResult<()> {
    let bad = |detail: &str| {
        Err(ServiceError::new(
            ErrorKind::InvalidRemoteUrl,
            format!("invalid remote URL: {detail}"),
        )
        .with_suggestion("use https://, ssh://, git://, file://, or user@host:path"))
    };

    if url.is_empty() || url.len() > 2048 {
        return bad("empty or oversized");
    }
    if url.chars().any(|c| c.is_whitespace() || c == '\0') {
        return bad("contains whitespace or NUL");
    }
    if url.starts_with('-') {
        return bad("leading dash");
    }

    if let Some((scheme, rest)) = url.split_once("://") {
        if !matches!(scheme, "http" | "https" | "ssh" | "git" | "file") {
            return bad("unsupported scheme");
        }
        if rest.is_empty() {
            return bad("missing host");
        }
        return Ok(());
    }

    // scp-style remote
    if url.contains('@') && url.contains(':') {
        return Ok(());
    }
    bad("not a recognized URL form")
}

/// Branch and tag names: the subset of git's ref-format rules that can
/// be checked lexically.
pub fn validate_ref_name(name: &str) -> ServiceResult<()> {
    let bad = |detail: &str| {
        Err(ServiceError::new(
            ErrorKind::InvalidBranchName,
            format!("invalid ref name `{name}`: {detail}"),
        ))
    };

    if name.is_empty() || name.len() > 255 {
        return bad("empty or oversized");
    }
    if name.starts_with('-') || name.starts_with('/') || name.starts_with('.') {
        return bad("bad leading character");
    }
    if name.ends_with('/') || name.ends_with('.') || name.ends_with(".lock") {
        return bad("bad trailing component");
    }
    if name.contains("..") || name.contains("@{") || name.contains("//") {
        return bad("forbidden sequence");
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c))
    {
        return bad("forbidden character");
    }
    Ok(())
}

/// Revision expressions (`HEAD~2`, `abc123`, `main^`): looser than
/// branch names but still immune to option injection.
pub fn validate_rev(rev: &str) -> ServiceResult<()> {
    if rev.is_empty()
        || rev.len() > 255
        || rev.starts_with('-')
        || rev.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(ServiceError::new(
            ErrorKind::InvalidParams,
            format!("invalid revision `{rev}`"),
        ));
    }
    Ok(())
}

/// Relative paths handed to operations: component-wise lexical safety.
/// The workspace manager re-checks with symlinks resolved.
pub fn validate_rel_path(path: &str) -> ServiceResult<()> {
    let bad = |detail: &str| {
        Err(ServiceError::new(
            ErrorKind::PathEscape,
            format!("invalid path `{path}`: {detail}"),
        ))
    };

    if path.is_empty() || path.len() > 4096 {
        return bad("empty or oversized");
    }
    if path.contains('\0') {
        return bad("NUL byte");
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return bad("absolute path");
    }
    if path.starts_with('-') {
        return bad("leading dash");
    }
    if path.split(['/', '\\']).any(|component| component == "..") {
        return bad("parent traversal");
    }
    Ok(())
}

/// List parameters are clamped to keep responses bounded.
pub fn clamp_limit(limit: Option<u32>, default: u32, max: u32) -> u32 {
    limit.unwrap_or(default).clamp(1, max)
}
