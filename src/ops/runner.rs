//! Git CLI execution.
//!
//! This is the single place where `git` child processes are spawned.
//! Handles:
//! - `GIT_TERMINAL_PROMPT=0` so missing credentials fail instead of hang
//! - `LC_ALL=C` for locale-independent output parsing
//! - deadline and cancellation via `tokio::select!`, killing the child
//! - sideband progress parsing from stderr for network operations
//! - mapping git's stderr to the service error taxonomy

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use log::debug;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::ops::ProgressSink;

/// Output of one git invocation.
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    pub status_code: i32,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

/// One task's execution context for git commands: working directory,
/// auth material, cancellation, and the remaining deadline budget.
pub struct GitCli {
    pub work_dir: PathBuf,
    /// Extra environment (credential helper inputs, GIT_SSH_COMMAND).
    pub env: Vec<(String, String)>,
    /// `-c key=value` pairs injected before the subcommand.
    pub config: Vec<String>,
    pub cancel: CancellationToken,
    pub timeout: Duration,
}

impl GitCli {
    pub fn new(work_dir: PathBuf, cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            work_dir,
            env: Vec::new(),
            config: Vec::new(),
            cancel,
            timeout,
        }
    }

    /// Run git and require a zero exit, mapping failures to the taxonomy.
    pub async fn run(&self, args: &[&str]) -> ServiceResult<GitOutput> {
        let output = self.spawn(args, None).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(classify_git_failure(args, &output))
        }
    }

    /// Run git, tolerating a non-zero exit (callers inspect the output).
    pub async fn run_unchecked(&self, args: &[&str]) -> ServiceResult<GitOutput> {
        self.spawn(args, None).await
    }

    /// Run a network operation, streaming sideband percentages from
    /// stderr into `progress`.
    pub async fn run_with_progress(
        &self,
        args: &[&str],
        progress: &ProgressSink,
    ) -> ServiceResult<GitOutput> {
        let output = self.spawn(args, Some(progress.clone())).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(classify_git_failure(args, &output))
        }
    }

    async fn spawn(&self, args: &[&str], progress: Option<ProgressSink>) -> ServiceResult<GitOutput> {
        debug!("git {}", args.join(" "));

        let mut cmd = Command::new("git");
        cmd.current_dir(&self.work_dir);
        for pair in &self.config {
            cmd.arg("-c").arg(pair);
        }
        cmd.args(args);

        // Never prompt; never localize.
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.env("LC_ALL", "C");
        cmd.env("LANG", "C");
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ServiceError::new(ErrorKind::GitCommandFailed, format!("failed to spawn git: {e}"))
        })?;

        // Both pipes are drained by background readers so the child can
        // never block on a full pipe while we wait on it.
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stdout_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut parser = progress.map(SidebandProgress::new);
            if let Some(mut pipe) = stderr_pipe {
                let mut chunk = [0u8; 4096];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            buf.extend_from_slice(&chunk[..n]);
                            if let Some(parser) = parser.as_mut() {
                                parser.feed(&chunk[..n]);
                            }
                        }
                    }
                }
            }
            buf
        });

        let status = tokio::select! {
            result = child.wait() => result.map_err(|e| {
                ServiceError::new(ErrorKind::GitCommandFailed, format!("git wait failed: {e}"))
            })?,
            () = self.cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ServiceError::new(
                    ErrorKind::TaskCancelled,
                    "git operation cancelled",
                ));
            }
            () = tokio::time::sleep(self.timeout) => {
                let _ = child.kill().await;
                return Err(ServiceError::new(
                    ErrorKind::Timeout,
                    format!("git operation exceeded {}s", self.timeout.as_secs()),
                ));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(GitOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            status_code: status.code().unwrap_or(-1),
        })
    }
}

/// Incremental parser for git's sideband progress lines
/// (`Receiving objects:  42% (...)`), which are delimited by `\r`.
///
/// Phases are weighted into one 0..100 scale so the reported percentage
/// never moves backwards across phase changes.
struct SidebandProgress {
    sink: ProgressSink,
    pending: Vec<u8>,
    best: u8,
}

impl SidebandProgress {
    fn new(sink: ProgressSink) -> Self {
        Self {
            sink,
            pending: Vec::new(),
            best: 0,
        }
    }

    fn feed(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\r' || b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Ok(text) = std::str::from_utf8(&line[..line.len() - 1]) {
                if let Some(pct) = parse_progress_line(text) {
                    if pct > self.best {
                        self.best = pct;
                        self.sink.emit(pct);
                    }
                }
            }
        }
    }
}

/// Map one progress line to the weighted 0..100 scale.
pub fn parse_progress_line(line: &str) -> Option<u8> {
    let (phase, span) = if line.contains("Counting objects") {
        (0u32, 5u32)
    } else if line.contains("Compressing objects") {
        (5, 5)
    } else if line.contains("Receiving objects") || line.contains("Writing objects") {
        (10, 80)
    } else if line.contains("Resolving deltas") {
        (90, 9)
    } else {
        return None;
    };

    let percent_pos = line.find('%')?;
    let digits: String = line[..percent_pos]
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .chars()
        .rev()
        .collect();
    let raw: u32 = digits.parse().ok()?;
    Some((phase + span * raw.min(100) / 100).min(99) as u8)
}

/// Map a failing git invocation to the error taxonomy by inspecting its
/// stderr. Mirrors the auth/network patterns git actually prints with
/// `LC_ALL=C`.
pub fn classify_git_failure(args: &[&str], output: &GitOutput) -> ServiceError {
    let stderr = output.stderr.to_lowercase();
    let summary = first_error_line(&output.stderr);

    let kind = if stderr.contains("could not read username")
        || stderr.contains("could not read password")
        || stderr.contains("authentication failed")
        || stderr.contains("invalid username or password")
        || stderr.contains("permission denied (publickey")
        || stderr.contains("host key verification failed")
    {
        ErrorKind::AuthFailed
    } else if stderr.contains("repository") && stderr.contains("not found")
        || stderr.contains("does not appear to be a git repository")
    {
        ErrorKind::RepoNotFound
    } else if stderr.contains("permission to") && stderr.contains("denied")
        || stderr.contains("403")
    {
        ErrorKind::RepoAccessDenied
    } else if stderr.contains("could not resolve host")
        || stderr.contains("unable to access")
        || stderr.contains("connection refused")
        || stderr.contains("connection reset")
        || stderr.contains("operation timed out")
        || stderr.contains("early eof")
        || stderr.contains("the remote end hung up")
    {
        ErrorKind::NetworkError
    } else if stderr.contains("[rejected]") || stderr.contains("non-fast-forward") {
        ErrorKind::PushRejected
    } else if stderr.contains("not a git repository") {
        ErrorKind::RepoNotFound
    } else if stderr.contains("permission denied") {
        ErrorKind::PermissionDenied
    } else if stderr.contains("nothing to commit")
        || stderr.contains("no changes added to commit")
    {
        ErrorKind::GitNoChanges
    } else {
        ErrorKind::GitCommandFailed
    };

    let mut err = ServiceError::new(
        kind,
        format!("git {} failed: {summary}", args.first().copied().unwrap_or("?")),
    );
    if kind == ErrorKind::AuthFailed {
        err = err.with_suggestion(
            "check GIT_TOKEN / GIT_SSH_KEY_PATH configuration and repository permissions",
        );
    }
    err
}

fn first_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no output")
        .to_string()
}
