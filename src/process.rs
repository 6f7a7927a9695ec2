use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::sys;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const POLL_INTERVAL_MS: u64 = 50;
pub const KILL_SETTLE_MS: u64 = 100;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("executable not found: {0}")]
    ExecutableMissing(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process exited, gracefully or after escalation.
    Stopped,
    /// No live process to stop. Treated as success by callers so stop
    /// stays idempotent.
    NothingToStop,
}

// ---------------------------------------------------------------------------
// Launch spec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub executable_path: String,
    pub arguments: Option<String>,
    pub working_directory: Option<String>,
}

// ---------------------------------------------------------------------------
// ProcessController
// ---------------------------------------------------------------------------

/// Starts and stops native OS processes. Stop is graceful-first: ask the
/// process to exit, poll for the deadline, then force-kill.
pub struct ProcessController {
    graceful_stop_timeout: Duration,
    restart_settle: Duration,
}

impl ProcessController {
    pub fn new(graceful_stop_timeout: Duration, restart_settle: Duration) -> Self {
        Self {
            graceful_stop_timeout,
            restart_settle,
        }
    }

    pub async fn start(&self, spec: &LaunchSpec) -> Result<u32, ProcessError> {
        let exe = Path::new(&spec.executable_path);
        if !exe.exists() {
            return Err(ProcessError::ExecutableMissing(
                spec.executable_path.clone(),
            ));
        }

        let args = match &spec.arguments {
            Some(raw) => shell_words::split(raw)
                .map_err(|e| ProcessError::InvalidArguments(e.to_string()))?,
            None => Vec::new(),
        };

        // Default the working directory to the executable's own directory,
        // matching what most service binaries expect.
        let cwd: PathBuf = match &spec.working_directory {
            Some(dir) => PathBuf::from(dir),
            None => exe
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let mut cmd = Command::new(exe);
        cmd.args(&args);
        cmd.current_dir(&cwd);
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::null());
        cmd.stderr(std::process::Stdio::null());

        let mut child = cmd.spawn().map_err(ProcessError::SpawnFailed)?;
        let pid = child.id().ok_or_else(|| {
            ProcessError::SpawnFailed(std::io::Error::other("child exited before pid was read"))
        })?;

        // Reap the child when it exits so it never lingers as a zombie.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(pid)
    }

    pub async fn stop(&self, pid: Option<u32>) -> Result<StopOutcome, ProcessError> {
        let pid = match pid {
            Some(p) if sys::is_pid_alive(p) => p,
            _ => return Ok(StopOutcome::NothingToStop),
        };

        let _ = sys::request_exit(pid);

        let deadline = tokio::time::Instant::now() + self.graceful_stop_timeout;
        while sys::is_pid_alive(pid) {
            if tokio::time::Instant::now() >= deadline {
                // Timeout — escalate to a forced kill
                let _ = sys::force_kill(pid);
                // Brief wait for the kill to take effect
                tokio::time::sleep(Duration::from_millis(KILL_SETTLE_MS)).await;
                break;
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }

        Ok(StopOutcome::Stopped)
    }

    /// Stop, let the OS settle, start again. A failed stop aborts the
    /// restart; the caller never ends up with two copies running.
    pub async fn restart(
        &self,
        pid: Option<u32>,
        spec: &LaunchSpec,
    ) -> Result<u32, ProcessError> {
        self.stop(pid).await?;
        tokio::time::sleep(self.restart_settle).await;
        self.start(spec).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
