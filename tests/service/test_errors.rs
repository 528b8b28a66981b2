//! Error taxonomy tests: code ranges, retryability, serde envelope.

use git_mcp_server::{ErrorKind, ServiceError};

#[test]
fn codes_sit_in_their_category_ranges() {
    let cases = [
        (ErrorKind::InvalidParams, 1000..2000),
        (ErrorKind::InvalidRemoteUrl, 1000..2000),
        (ErrorKind::GitCommandFailed, 2000..3000),
        (ErrorKind::MergeConflict, 2000..3000),
        (ErrorKind::RepoNotFound, 3000..4000),
        (ErrorKind::RepoAccessDenied, 3000..4000),
        (ErrorKind::NetworkError, 4000..5000),
        (ErrorKind::AuthFailed, 4000..5000),
        (ErrorKind::PathEscape, 5000..6000),
        (ErrorKind::Storage, 5000..6000),
        (ErrorKind::TaskNotFound, 6000..7000),
        (ErrorKind::QueueFull, 6000..7000),
        (ErrorKind::RateLimited, 6000..7000),
        (ErrorKind::Internal, 9000..10000),
    ];
    for (kind, range) in cases {
        assert!(
            range.contains(&kind.code()),
            "{kind:?} -> {} not in {range:?}",
            kind.code()
        );
    }
}

#[test]
fn only_network_class_errors_are_retryable() {
    for kind in [ErrorKind::NetworkError, ErrorKind::Timeout, ErrorKind::AuthFailed] {
        assert!(kind.retryable(), "{kind:?}");
    }
    for kind in [
        ErrorKind::InvalidParams,
        ErrorKind::MergeConflict,
        ErrorKind::RepoNotFound,
        ErrorKind::PathEscape,
        ErrorKind::Storage,
        ErrorKind::QueueFull,
        ErrorKind::TaskCancelled,
        ErrorKind::Internal,
    ] {
        assert!(!kind.retryable(), "{kind:?}");
    }
}

#[test]
fn envelope_serde_roundtrip() {
    let err = ServiceError::new(ErrorKind::MergeConflict, "3 conflicting paths")
        .with_suggestion("resolve locally")
        .with_context(serde_json::json!({"conflicts": [{"path": "a.txt", "kind": "both-modified"}]}));

    let json = serde_json::to_value(&err).expect("serialize");
    assert_eq!(json["kind"], "MERGE_CONFLICT");
    assert_eq!(json["message"], "3 conflicting paths");

    let back: ServiceError = serde_json::from_value(json).expect("deserialize");
    assert_eq!(back.kind, ErrorKind::MergeConflict);
    assert_eq!(back.suggestion.as_deref(), Some("resolve locally"));
    assert!(back.context.is_some());
}

#[test]
fn display_carries_the_numeric_code() {
    let err = ServiceError::new(ErrorKind::QueueFull, "queue is full");
    let text = format!("{err}");
    assert!(text.contains("6003"));
    assert!(text.contains("queue is full"));
}
