//! Subprocess executor.
//!
//! Layout under a session output directory:
//!
//! ```text
//! scripts/<attempt>.<ext>      archived analyst code, always written
//! .staging/<attempt>/          cwd, HOME, TMPDIR and OUTPUT_DIR of the child
//! .staging/<attempt>.run.<ext> transient script handed to the interpreter
//! runs/<attempt>/              staging promoted here on success only
//! ```
//!
//! On failure, timeout or cancellation the staging directory is deleted, so
//! partial artifacts never reach `runs/`. The child leads its own process
//! group, and the whole group is killed once the attempt ends, so nothing it
//! forked keeps running or writing after the result is returned.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use rigor_ledger::{ArtifactRef, CapturedOutput, ContentDigest, FailureKind, Outcome};

use super::cancel::CancelHandle;
use super::config::SandboxConfig;
use super::error::{SandboxError, SandboxResult};
use super::group::{self, ProcessGroup};
use super::prelude::compose_script;

pub const SCRIPTS_DIR: &str = "scripts";
pub const RUNS_DIR: &str = "runs";
pub const STAGING_DIR: &str = ".staging";

/// One accepted submission, ready to run.
#[derive(Debug, Clone)]
pub struct ExecutionRequest<'a> {
    pub attempt_id: Uuid,
    pub code: &'a str,
    /// Session output directory; the only place the child may write.
    pub output_dir: &'a Path,
}

/// What happened when the code ran.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub outcome: Outcome,
    pub failure: Option<FailureKind>,
    pub output: CapturedOutput,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::ExecutedSuccess
    }
}

/// Runs accepted code.
///
/// `Err` means the sandbox could not be used at all. Code that runs and
/// fails, times out or is cancelled is an `Ok` result with a failure kind.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(
        &self,
        request: ExecutionRequest<'_>,
        cancel: &CancelHandle,
    ) -> SandboxResult<ExecutionResult>;
}

/// Interpreter subprocess with a wall-clock limit and confined working dir.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    config: SandboxConfig,
}

enum Ended {
    Exited(std::process::ExitStatus),
    WaitFailed(std::io::Error),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> SandboxResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    fn unavailable(context: &str, err: impl std::fmt::Display) -> SandboxError {
        SandboxError::Unavailable {
            reason: format!("{context}: {err}"),
        }
    }

    fn build_command(&self, script: &Path, staging: &Path) -> Command {
        let exe = &self.config.interpreter[0];
        let mut cmd = Command::new(exe);
        cmd.args(&self.config.interpreter[1..])
            .arg(script)
            .current_dir(staging)
            .env_clear();
        for key in &self.config.env_passthrough {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.env("HOME", staging)
            .env("TMPDIR", staging)
            .env("OUTPUT_DIR", staging)
            .envs(&self.config.extra_env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        group::isolate(&mut cmd);
        cmd
    }

    /// Promote or discard the staging dir and classify the attempt.
    async fn settle(
        &self,
        ended: Ended,
        output_dir: &Path,
        attempt: &str,
        staging: &Path,
        output: &mut CapturedOutput,
    ) -> (Outcome, Option<FailureKind>) {
        match ended {
            Ended::Exited(status) if status.success() => {
                output.exit_code = status.code();
                let runs_dir = output_dir.join(RUNS_DIR);
                let run_dir = runs_dir.join(attempt);
                let promoted = async {
                    tokio::fs::create_dir_all(&runs_dir).await?;
                    tokio::fs::rename(staging, &run_dir).await?;
                    collect_artifacts(&run_dir, &format!("{RUNS_DIR}/{attempt}"))
                }
                .await;
                match promoted {
                    Ok(artifacts) => {
                        output.artifacts = artifacts;
                        (Outcome::ExecutedSuccess, None)
                    }
                    Err(e) => {
                        remove_dir_quietly(staging).await;
                        remove_dir_quietly(&run_dir).await;
                        (
                            Outcome::ExecutedFailure,
                            Some(FailureKind::ExecutionFault {
                                exit_code: status.code(),
                                message: format!("failed to collect artifacts: {e}"),
                            }),
                        )
                    }
                }
            }
            Ended::Exited(status) => {
                output.exit_code = status.code();
                remove_dir_quietly(staging).await;
                (
                    Outcome::ExecutedFailure,
                    Some(FailureKind::ExecutionFault {
                        exit_code: status.code(),
                        message: failure_message(&output.stderr, &status),
                    }),
                )
            }
            Ended::WaitFailed(e) => {
                remove_dir_quietly(staging).await;
                (
                    Outcome::ExecutedFailure,
                    Some(FailureKind::ExecutionFault {
                        exit_code: None,
                        message: format!("failed to wait for interpreter: {e}"),
                    }),
                )
            }
            Ended::TimedOut => {
                remove_dir_quietly(staging).await;
                (
                    Outcome::ExecutedFailure,
                    Some(FailureKind::ExecutionTimeout {
                        limit_ms: self.config.timeout_ms,
                    }),
                )
            }
            Ended::Cancelled => {
                remove_dir_quietly(staging).await;
                (Outcome::ExecutedFailure, Some(FailureKind::Cancelled))
            }
        }
    }
}

/// Read a pipe to the end, keeping at most `cap` bytes.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> Capture {
    let mut capture = Capture::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let room = cap.saturating_sub(capture.bytes.len());
        if n <= room {
            capture.bytes.extend_from_slice(&chunk[..n]);
        } else {
            capture.bytes.extend_from_slice(&chunk[..room]);
            capture.truncated = true;
        }
    }
    capture
}

async fn join_capture(task: Option<tokio::task::JoinHandle<Capture>>, grace: Duration) -> Capture {
    let Some(mut task) = task else {
        return Capture::default();
    };
    match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(capture)) => capture,
        _ => {
            // A grandchild may still hold the pipe open.
            task.abort();
            Capture {
                bytes: Vec::new(),
                truncated: true,
            }
        }
    }
}

/// Every regular file under `run_dir`, sorted by relative path.
fn collect_artifacts(run_dir: &Path, rel_prefix: &str) -> std::io::Result<Vec<ArtifactRef>> {
    let mut out = Vec::new();
    let mut stack = vec![run_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                let data = std::fs::read(&path)?;
                let name = path
                    .strip_prefix(run_dir)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(ArtifactRef {
                    path: format!("{rel_prefix}/{name}"),
                    name,
                    bytes: data.len() as u64,
                    sha256: ContentDigest::from_bytes(&data).to_string(),
                });
            }
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

fn failure_message(stderr: &str, status: &std::process::ExitStatus) -> String {
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
        .unwrap_or_else(|| format!("interpreter exited with {status}"))
}

async fn remove_dir_quietly(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), error = %e, "failed to remove staging directory");
        }
    }
}

#[async_trait]
impl CodeExecutor for ProcessSandbox {
    async fn execute(
        &self,
        request: ExecutionRequest<'_>,
        cancel: &CancelHandle,
    ) -> SandboxResult<ExecutionResult> {
        let ext = &self.config.script_extension;
        let attempt = request.attempt_id.to_string();
        let scripts_dir = request.output_dir.join(SCRIPTS_DIR);
        let staging_root = request.output_dir.join(STAGING_DIR);
        let staging = staging_root.join(&attempt);
        let run_script: PathBuf = staging_root.join(format!("{attempt}.run.{ext}"));

        tokio::fs::create_dir_all(&scripts_dir)
            .await
            .map_err(|e| Self::unavailable("create scripts dir", e))?;
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| Self::unavailable("create staging dir", e))?;
        tokio::fs::write(scripts_dir.join(format!("{attempt}.{ext}")), request.code)
            .await
            .map_err(|e| Self::unavailable("archive script", e))?;

        let inject = self.config.inject_sanity_checks && self.config.is_python();
        tokio::fs::write(&run_script, compose_script(request.code, inject))
            .await
            .map_err(|e| Self::unavailable("write run script", e))?;

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut child = match self.build_command(&run_script, &staging).spawn() {
            Ok(child) => child,
            Err(e) => {
                remove_dir_quietly(&staging).await;
                let _ = tokio::fs::remove_file(&run_script).await;
                return Err(Self::unavailable(
                    &format!("spawn {}", self.config.interpreter[0]),
                    e,
                ));
            }
        };
        let mut group = ProcessGroup::adopt(child.id());
        debug!(attempt_id = %attempt, pid = ?child.id(), "sandbox child spawned");

        let cap = self.config.max_output_bytes;
        let stdout_task = child
            .stdout
            .take()
            .map(|s| tokio::spawn(read_capped(s, cap)));
        let stderr_task = child
            .stderr
            .take()
            .map(|s| tokio::spawn(read_capped(s, cap)));

        let limit = Duration::from_millis(self.config.timeout_ms);
        let ended = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Ended::Exited(status),
                Err(e) => Ended::WaitFailed(e),
            },
            _ = tokio::time::sleep(limit) => Ended::TimedOut,
            _ = cancel.cancelled() => Ended::Cancelled,
        };
        // Background children die with the attempt, even after a clean exit.
        group.kill();
        if !matches!(ended, Ended::Exited(_)) {
            // Usually already dead from the group kill.
            if let Err(e) = child.start_kill() {
                debug!(attempt_id = %attempt, error = %e, "sandbox child kill skipped");
            }
            let _ = child.wait().await;
        }

        let grace = Duration::from_millis(self.config.drain_grace_ms);
        let stdout = join_capture(stdout_task, grace).await;
        let stderr = join_capture(stderr_task, grace).await;
        let duration_ms = clock.elapsed().as_millis() as u64;
        let _ = tokio::fs::remove_file(&run_script).await;

        let mut output = CapturedOutput {
            stdout: String::from_utf8_lossy(&stdout.bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr.bytes).into_owned(),
            exit_code: None,
            truncated: stdout.truncated || stderr.truncated,
            artifacts: Vec::new(),
            duration_ms,
        };

        let (outcome, failure) = self
            .settle(ended, request.output_dir, &attempt, &staging, &mut output)
            .await;

        Ok(ExecutionResult {
            outcome,
            failure,
            output,
            started_at,
            ended_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox(timeout_ms: u64) -> ProcessSandbox {
        ProcessSandbox::new(SandboxConfig::shell().with_timeout_ms(timeout_ms)).unwrap()
    }

    async fn run(sb: &ProcessSandbox, dir: &Path, code: &str) -> (Uuid, ExecutionResult) {
        let attempt_id = Uuid::new_v4();
        let res = sb
            .execute(
                ExecutionRequest {
                    attempt_id,
                    code,
                    output_dir: dir,
                },
                &CancelHandle::new(),
            )
            .await
            .unwrap();
        (attempt_id, res)
    }

    #[tokio::test]
    async fn test_success_promotes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let (attempt, res) = run(
            &sandbox(10_000),
            dir.path(),
            "echo hello\nmkdir -p figs\necho 1,2 > \"$OUTPUT_DIR/figs/table.csv\"\n",
        )
        .await;

        assert!(res.succeeded(), "{res:?}");
        assert_eq!(res.output.stdout.trim(), "hello");
        assert_eq!(res.output.exit_code, Some(0));
        assert_eq!(res.output.artifacts.len(), 1);
        let art = &res.output.artifacts[0];
        assert_eq!(art.name, "figs/table.csv");
        assert_eq!(art.path, format!("runs/{attempt}/figs/table.csv"));
        assert!(dir.path().join(&art.path).exists());
        assert!(dir.path().join("scripts").join(format!("{attempt}.sh")).exists());
        assert!(!dir.path().join(STAGING_DIR).join(attempt.to_string()).exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_fault_and_discards_files() {
        let dir = tempfile::tempdir().unwrap();
        let (attempt, res) = run(
            &sandbox(10_000),
            dir.path(),
            "echo partial > out.txt\necho 'bad input' >&2\nexit 3\n",
        )
        .await;

        assert_eq!(res.outcome, Outcome::ExecutedFailure);
        match res.failure {
            Some(FailureKind::ExecutionFault { exit_code, message }) => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(message, "bad input");
            }
            other => panic!("unexpected failure: {other:?}"),
        }
        assert!(!dir.path().join(RUNS_DIR).join(attempt.to_string()).exists());
        assert!(!dir.path().join(STAGING_DIR).join(attempt.to_string()).exists());
    }

    #[tokio::test]
    async fn test_timeout_kills_and_discards() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let (attempt, res) = run(
            &sandbox(200),
            dir.path(),
            "echo started > partial.txt\nexec sleep 10\n",
        )
        .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            res.failure,
            Some(FailureKind::ExecutionTimeout { limit_ms: 200 })
        );
        assert!(res.output.artifacts.is_empty());
        assert!(!dir.path().join(STAGING_DIR).join(attempt.to_string()).exists());
        assert!(!dir.path().join(RUNS_DIR).join(attempt.to_string()).exists());
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let late = outside.path().join("late.txt");
        let code = format!(
            "( sleep 1; echo after-timeout > '{}' ) &\nexec sleep 10\n",
            late.display()
        );
        let (_, res) = run(&sandbox(300), dir.path(), &code).await;
        assert_eq!(
            res.failure,
            Some(FailureKind::ExecutionTimeout { limit_ms: 300 })
        );

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!late.exists(), "background child outlived the attempt");
    }

    #[tokio::test]
    async fn test_clean_exit_reaps_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let late = outside.path().join("late.txt");
        let code = format!(
            "( sleep 1; echo detached > '{}' ) &\necho done\n",
            late.display()
        );
        let started = Instant::now();
        let (_, res) = run(&sandbox(10_000), dir.path(), &code).await;
        assert!(res.succeeded(), "{res:?}");
        assert_eq!(res.output.stdout.trim(), "done");
        assert!(started.elapsed() < Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!late.exists(), "background child outlived the attempt");
    }

    #[tokio::test]
    async fn test_wait_failure_discards_staging() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join(STAGING_DIR).join("a1");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("partial.txt"), "x").unwrap();

        let mut output = CapturedOutput::default();
        let (outcome, failure) = sandbox(1_000)
            .settle(
                Ended::WaitFailed(std::io::Error::other("wait interrupted")),
                dir.path(),
                "a1",
                &staging,
                &mut output,
            )
            .await;

        assert_eq!(outcome, Outcome::ExecutedFailure);
        match failure {
            Some(FailureKind::ExecutionFault { exit_code, message }) => {
                assert_eq!(exit_code, None);
                assert!(message.contains("wait interrupted"));
            }
            other => panic!("unexpected failure: {other:?}"),
        }
        assert!(!staging.exists());
        assert!(!dir.path().join(RUNS_DIR).join("a1").exists());
    }

    #[tokio::test]
    async fn test_cancel_during_run() {
        let dir = tempfile::tempdir().unwrap();
        let sb = sandbox(10_000);
        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let res = sb
            .execute(
                ExecutionRequest {
                    attempt_id: Uuid::new_v4(),
                    code: "exec sleep 10\n",
                    output_dir: dir.path(),
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(res.failure, Some(FailureKind::Cancelled));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SandboxConfig::shell();
        cfg.max_output_bytes = 16;
        let sb = ProcessSandbox::new(cfg).unwrap();
        let (_, res) = run(&sb, dir.path(), "i=0\nwhile [ $i -lt 100 ]; do echo line$i; i=$((i+1)); done\n").await;
        assert!(res.succeeded());
        assert_eq!(res.output.stdout.len(), 16);
        assert!(res.output.truncated);
    }

    #[tokio::test]
    async fn test_environment_is_scrubbed() {
        std::env::set_var("RIGOR_TEST_SECRET", "s3cr3t");
        let dir = tempfile::tempdir().unwrap();
        let (_, res) = run(
            &sandbox(10_000),
            dir.path(),
            "echo \"secret=${RIGOR_TEST_SECRET:-unset}\"\necho \"home=$HOME\"\n",
        )
        .await;
        assert!(res.output.stdout.contains("secret=unset"));
        assert!(res.output.stdout.contains(STAGING_DIR));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SandboxConfig::shell();
        cfg.interpreter = vec!["/nonexistent/interpreter".into()];
        let sb = ProcessSandbox::new(cfg).unwrap();
        let err = sb
            .execute(
                ExecutionRequest {
                    attempt_id: Uuid::new_v4(),
                    code: "true",
                    output_dir: dir.path(),
                },
                &CancelHandle::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Unavailable { .. }));
    }
}
