//! Git output parser tests: progress sideband, porcelain status, log
//! framing, blame, diff stats, push/fetch summaries, failure
//! classification, and retry backoff.

use std::time::Duration;

use git_mcp_server::ErrorKind;
use git_mcp_server::ops::runner::{GitOutput, classify_git_failure, parse_progress_line};
use git_mcp_server::ops::{
    blame::parse_porcelain_blame, diff::merge_stats, fetch::parse_ref_updates,
    log::parse_log, merge::parse_conflicts, push::pushed_refs, status::parse_porcelain_v2,
};
use git_mcp_server::task::worker::backoff_delay;

#[test]
fn progress_phases_map_to_one_monotone_scale() {
    let counting = parse_progress_line("remote: Counting objects:  50% (5/10)").unwrap();
    let receiving_early = parse_progress_line("Receiving objects:  10% (10/100)").unwrap();
    let receiving_late = parse_progress_line("Receiving objects:  90% (90/100)").unwrap();
    let deltas = parse_progress_line("Resolving deltas: 100% (40/40), done.").unwrap();

    assert!(counting < receiving_early);
    assert!(receiving_early < receiving_late);
    assert!(receiving_late < deltas);
    assert!(deltas <= 99);

    assert_eq!(parse_progress_line("Cloning into 'repo'..."), None);
    assert_eq!(parse_progress_line("Writing objects:  45% (45/100)"), Some(46));
}

#[test]
fn porcelain_v2_status_parses_all_entry_kinds() {
    let text = "\
# branch.head main
# branch.ab +2 -1
1 .M N... 100644 100644 100644 aaaa bbbb worktree-only.rs
1 M. N... 100644 100644 100644 aaaa bbbb staged-only.rs
1 MM N... 100644 100644 100644 aaaa bbbb both.rs
2 R. N... 100644 100644 100644 aaaa bbbb R100 renamed-to.rs\trenamed-from.rs
u UU N... 100644 100644 100644 100644 aaaa bbbb cccc conflicted.rs
? untracked.txt
";
    let status = parse_porcelain_v2(text);
    assert_eq!(status.branch, "main");
    assert_eq!(status.ahead, 2);
    assert_eq!(status.behind, 1);
    assert_eq!(status.modified, vec!["worktree-only.rs", "both.rs"]);
    // The rename entry reports the new path, not the similarity score.
    assert_eq!(
        status.staged,
        vec!["staged-only.rs", "both.rs", "renamed-to.rs"]
    );
    assert_eq!(status.untracked, vec!["untracked.txt"]);
    assert_eq!(status.conflicted, vec!["conflicted.rs"]);
}

#[test]
fn conflict_entries_carry_their_kind() {
    let text = "\
u UU N... 100644 100644 100644 100644 aaaa bbbb cccc both-mod.rs
u AA N... 100644 100644 100644 100644 aaaa bbbb cccc both-add.rs
u UD N... 100644 100644 100644 100644 aaaa bbbb cccc gone-theirs.rs
";
    let conflicts = parse_conflicts(text);
    assert_eq!(conflicts.len(), 3);
    assert_eq!(conflicts[0].kind, "both-modified");
    assert_eq!(conflicts[1].kind, "both-added");
    assert_eq!(conflicts[2].kind, "deleted-by-them");
    assert_eq!(conflicts[2].path, "gone-theirs.rs");
}

#[test]
fn log_framing_survives_awkward_summaries() {
    let oid_a = "a".repeat(40);
    let oid_b = "b".repeat(40);
    let raw = format!(
        "{oid_a}\x1fAlice\x1falice@example.com\x1f2025-06-01T10:00:00+00:00\x1ffix: a thing\x1e\n\
         {oid_b}\x1fBob\x1fbob@example.com\x1f2025-06-02T10:00:00+00:00\x1fmessage with\ttab\x1e"
    );
    let commits = parse_log(&raw);
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].oid, oid_a);
    assert_eq!(commits[0].author, "Alice");
    assert_eq!(commits[1].summary, "message with\ttab");

    assert!(parse_log("not-a-log").is_empty());
}

#[test]
fn porcelain_blame_attributes_lines_to_commits() {
    let oid = "c".repeat(40);
    let raw = format!(
        "{oid} 1 1 2\n\
         author Carol\n\
         summary seed commit\n\
         \tfirst line\n\
         {oid} 2 2\n\
         \tsecond line\n"
    );
    let lines = parse_porcelain_blame(&raw);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].line_no, 1);
    assert_eq!(lines[1].line_no, 2);
    assert_eq!(lines[0].author, "Carol");
    assert_eq!(lines[1].summary, "seed commit");
    assert_eq!(lines[1].oid, oid);
}

#[test]
fn diff_stats_merge_numstat_with_change_kind() {
    let numstat = "3\t1\tsrc/lib.rs\n5\t0\tnew.txt\n-\t-\tblob.bin\n";
    let name_status = "M\tsrc/lib.rs\nA\tnew.txt\nM\tblob.bin\n";
    let result = merge_stats(numstat, name_status);

    assert_eq!(result.files.len(), 3);
    assert_eq!(result.insertions, 8);
    assert_eq!(result.deletions, 1);

    let new = result.files.iter().find(|f| f.path == "new.txt").unwrap();
    assert_eq!(new.change, "added");
    assert_eq!(new.insertions, 5);

    let bin = result.files.iter().find(|f| f.path == "blob.bin").unwrap();
    assert_eq!(bin.insertions, 0);
}

#[test]
fn push_summary_counts_updates_not_rejections() {
    let combined = "\
To https://git.example/x.git
   ab12cd3..ef45ab6  main -> main
 * [new branch]      feature -> feature
 + ab12cd3...ef45ab6 forced -> forced
 ! [rejected]        stale -> stale (non-fast-forward)
";
    let refs = pushed_refs(combined);
    assert_eq!(refs.len(), 3);
    assert!(refs.contains(&"main".to_string()));
    assert!(refs.contains(&"feature".to_string()));
    assert!(!refs.iter().any(|r| r.contains("stale")));
}

#[test]
fn fetch_summary_yields_ref_updates() {
    let stderr = "\
From https://git.example/x
   ab12cd3..ef45ab6  main       -> origin/main
 + ab12cd3...ef45ab6 force      -> origin/force  (forced update)
 * [new branch]      feature    -> origin/feature
 - [deleted]         (none)     -> origin/gone
 ! [rejected]        stale      -> origin/stale
";
    let updates = parse_ref_updates(stderr);
    assert_eq!(updates.len(), 4);

    assert_eq!(updates[0].name, "origin/main");
    assert_eq!(updates[0].old.as_deref(), Some("ab12cd3"));
    assert_eq!(updates[0].new.as_deref(), Some("ef45ab6"));

    // Forced updates keep their old/new range and drop the annotation.
    assert_eq!(updates[1].name, "origin/force");
    assert_eq!(updates[1].old.as_deref(), Some("ab12cd3"));
    assert_eq!(updates[1].new.as_deref(), Some("ef45ab6"));

    assert_eq!(updates[2].name, "origin/feature");
    assert!(updates[2].old.is_none());

    assert_eq!(updates[3].name, "origin/gone");
    assert!(updates[3].old.is_none());
}

#[test]
fn stderr_classification_matches_the_taxonomy() {
    let cases = [
        ("fatal: Authentication failed for 'https://x'", ErrorKind::AuthFailed),
        ("fatal: could not read Username for 'https://x'", ErrorKind::AuthFailed),
        ("Permission denied (publickey).", ErrorKind::AuthFailed),
        ("ERROR: Repository not found.", ErrorKind::RepoNotFound),
        ("fatal: could not resolve host: git.example", ErrorKind::NetworkError),
        ("fatal: the remote end hung up unexpectedly", ErrorKind::NetworkError),
        ("error: failed to push some refs\n ! [rejected] main -> main", ErrorKind::PushRejected),
        ("fatal: not a git repository (or any of the parent directories)", ErrorKind::RepoNotFound),
        ("fatal: something completely else", ErrorKind::GitCommandFailed),
    ];
    for (stderr, expected) in cases {
        let output = GitOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            status_code: 128,
        };
        let err = classify_git_failure(&["push"], &output);
        assert_eq!(err.kind, expected, "stderr: {stderr}");
    }
}

#[test]
fn backoff_grows_exponentially_with_bounded_jitter() {
    let base = Duration::from_millis(100);
    let cap = Duration::from_secs(60);
    for attempt in 1..=4u32 {
        let expected = 100f64 * 2f64.powi(attempt as i32 - 1);
        let delay = backoff_delay(base, attempt, cap).as_secs_f64() * 1000.0;
        assert!(
            delay >= expected * 0.75 - 1.0 && delay <= expected * 1.25 + 1.0,
            "attempt {attempt}: {delay}ms outside jitter band around {expected}ms"
        );
    }

    // The cap wins over growth.
    let capped = backoff_delay(base, 10, Duration::from_millis(300));
    assert!(capped <= Duration::from_millis(300));
}
