//! Worker process backend.
//!
//! The worker program is a black box: it receives a prompt and a working
//! directory and emits text. `WorkerBackend` is the seam the session
//! manager executes through, and `ProcessBackend` is the production
//! implementation spawning one external process per call.

use crate::error::{Error, Result};
use crate::{clog_debug, clog_warn};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// Grace period after SIGTERM before SIGKILL.
const GRACE_PERIOD_SECS: u64 = 5;

/// Shared liveness marker, bumped on every line of worker output.
///
/// The session manager's heartbeat monitor reads `elapsed()` to detect
/// workers that have gone silent.
#[derive(Debug, Clone)]
pub struct Heartbeat(Arc<Mutex<Instant>>);

impl Heartbeat {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    pub fn beat(&self) {
        if let Ok(mut last) = self.0.lock() {
            *last = Instant::now();
        }
    }

    /// Time since the last beat.
    pub fn elapsed(&self) -> Duration {
        self.0
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw outcome of one worker execution.
#[derive(Debug, Clone)]
pub struct RawResult {
    pub success: bool,
    /// Captured stdout; partial output is kept on timeout.
    pub output: String,
    pub error: Option<String>,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

/// The execution seam between the session manager and the worker program.
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    /// Run the worker once with the given prompt in the given directory.
    ///
    /// Implementations must enforce the timeout themselves and report it
    /// through `RawResult::timed_out` rather than hanging.
    async fn execute(
        &self,
        prompt: &str,
        workdir: &Path,
        timeout: Duration,
        heartbeat: &Heartbeat,
    ) -> Result<RawResult>;
}

/// Production backend: one external worker process per call.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    binary: PathBuf,
    /// Arguments placed before the prompt.
    args: Vec<String>,
}

impl ProcessBackend {
    /// Discover the default worker binary on PATH.
    pub fn new() -> Result<Self> {
        Self::from_command("claude -p")
    }

    /// Build from a command line; the first token is resolved on PATH
    /// and the rest become leading arguments. The prompt is appended as
    /// the final argument.
    pub fn from_command(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::WorkerBinaryNotFound("<empty command>".to_string()))?;
        let binary = which::which(program)
            .map_err(|_| Error::WorkerBinaryNotFound(program.to_string()))?;
        Ok(Self {
            binary,
            args: parts.map(String::from).collect(),
        })
    }

    /// Bypass PATH discovery; used by tests.
    pub fn with_command(binary: PathBuf, args: Vec<String>) -> Self {
        Self { binary, args }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl WorkerBackend for ProcessBackend {
    async fn execute(
        &self,
        prompt: &str,
        workdir: &Path,
        timeout: Duration,
        heartbeat: &Heartbeat,
    ) -> Result<RawResult> {
        clog_debug!(
            "ProcessBackend::execute binary={} workdir={} timeout={:?}",
            self.binary.display(),
            workdir.display(),
            timeout
        );
        let started = Instant::now();

        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .arg(prompt)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::SpawnFailed(format!("{}: {}", self.binary.display(), e)))?;

        heartbeat.beat();
        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();

        let waited = tokio::time::timeout(
            timeout,
            pump_child(&mut child, heartbeat, &mut stdout_buf, &mut stderr_buf),
        )
        .await;

        let duration = started.elapsed();
        match waited {
            Ok(Ok(status)) => {
                let success = status.success();
                let error = if success {
                    None
                } else if !stderr_buf.trim().is_empty() {
                    Some(stderr_buf.trim().to_string())
                } else {
                    Some(format!(
                        "worker exited with code {}",
                        status.code().unwrap_or(-1)
                    ))
                };
                Ok(RawResult {
                    success,
                    output: stdout_buf,
                    error,
                    timed_out: false,
                    exit_code: status.code(),
                    duration,
                })
            }
            Ok(Err(e)) => {
                clog_warn!("ProcessBackend: wait error: {}", e);
                terminate_process(&mut child).await;
                Ok(RawResult {
                    success: false,
                    output: stdout_buf,
                    error: Some(format!("process error: {}", e)),
                    timed_out: false,
                    exit_code: None,
                    duration,
                })
            }
            Err(_) => {
                clog_warn!(
                    "ProcessBackend: worker exceeded timeout {:?}, terminating",
                    timeout
                );
                terminate_process(&mut child).await;
                Ok(RawResult {
                    success: false,
                    output: stdout_buf,
                    error: Some(format!("worker timed out after {:?}", timeout)),
                    timed_out: true,
                    exit_code: None,
                    duration,
                })
            }
        }
    }
}

/// Drain stdout/stderr line by line, then reap the child.
///
/// Both pipes are read concurrently so a full stderr buffer cannot
/// deadlock a chatty worker. Each stdout line bumps the heartbeat.
async fn pump_child(
    child: &mut Child,
    heartbeat: &Heartbeat,
    stdout_buf: &mut String,
    stderr_buf: &mut String,
) -> std::io::Result<std::process::ExitStatus> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let out_fut = async {
        if let Some(stream) = stdout {
            let mut lines = BufReader::new(stream).lines();
            while let Some(line) = lines.next_line().await? {
                heartbeat.beat();
                stdout_buf.push_str(&line);
                stdout_buf.push('\n');
            }
        }
        Ok::<(), std::io::Error>(())
    };
    let err_fut = async {
        if let Some(stream) = stderr {
            let mut lines = BufReader::new(stream).lines();
            while let Some(line) = lines.next_line().await? {
                stderr_buf.push_str(&line);
                stderr_buf.push('\n');
            }
        }
        Ok::<(), std::io::Error>(())
    };

    let (out_res, err_res) = tokio::join!(out_fut, err_fut);
    out_res?;
    err_res?;
    child.wait().await
}

/// Terminate a process: SIGTERM, wait grace period, then SIGKILL.
pub(crate) async fn terminate_process(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                clog_warn!("Failed to send SIGTERM to pid {}: {}", pid, err);
            }
        }
    }

    if tokio::time::timeout(Duration::from_secs(GRACE_PERIOD_SECS), child.wait())
        .await
        .is_err()
    {
        clog_warn!("Grace period expired, sending SIGKILL");
        let _ = child.kill().await;
    }
}
