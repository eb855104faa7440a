// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launcher trait definitions.
//!
//! Defines the abstract interface for starting server and utility processes.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::node::NodeSpec;

/// Errors from launcher operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LaunchError {
    /// Executable was not found.
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),

    /// The working directory does not exist.
    #[error("Working directory does not exist: {0}")]
    WorkingDirMissing(PathBuf),

    /// The OS refused to spawn the process.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Process exited right after being spawned.
    #[error("Process start failed: {0}")]
    StartFailed(String),

    /// Process exited with non-zero code.
    #[error("{program} exited with code {exit_code}")]
    ExitCode {
        /// Program that was run.
        program: String,
        /// Exit code from the process.
        exit_code: i32,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for launcher operations.
pub type Result<T> = std::result::Result<T, LaunchError>;

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExit {
    pub code: Option<i32>,
    /// Terminating signal, when killed by one.
    pub signal: Option<i32>,
}

impl ProcessExit {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            signal: None,
        }
    }

    pub fn killed() -> Self {
        Self {
            code: None,
            signal: Some(Signal::SIGKILL as i32),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => write!(f, "unknown exit"),
        }
    }
}

/// Whether a launched server outlives the launching process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LaunchMode {
    /// Output is streamed into the log and the server dies with us.
    #[default]
    Attached,
    /// Output goes to files under `<home>/logs` and the server keeps running
    /// after we exit.
    Detached,
}

/// Number of stderr lines kept for failure reports.
pub const STDERR_TAIL_LINES: usize = 20;

/// Where the last lines a server wrote to stderr can be found.
#[derive(Debug, Clone, Default)]
pub enum StderrTail {
    #[default]
    None,
    /// Detached servers write stderr to a file.
    File(PathBuf),
    /// Attached servers keep the most recent lines in memory.
    Lines(Arc<Mutex<VecDeque<String>>>),
}

impl StderrTail {
    pub fn buffer() -> Self {
        StderrTail::Lines(Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES))))
    }

    /// Remember a line, dropping the oldest beyond the limit.
    pub fn push(&self, line: &str) {
        if let StderrTail::Lines(lines) = self
            && let Ok(mut lines) = lines.lock()
        {
            if lines.len() == STDERR_TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line.to_string());
        }
    }

    /// The last lines, joined with newlines; empty when nothing was written.
    pub fn read(&self) -> String {
        match self {
            StderrTail::None => String::new(),
            StderrTail::File(path) => {
                let content = std::fs::read_to_string(path).unwrap_or_default();
                let lines: Vec<&str> = content.trim().lines().collect();
                let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
                lines[start..].join("\n")
            }
            StderrTail::Lines(lines) => match lines.lock() {
                Ok(lines) => lines.iter().cloned().collect::<Vec<_>>().join("\n"),
                Err(_) => String::new(),
            },
        }
    }
}

/// Handle for a started server process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    /// Unique identifier for this launch
    pub handle_id: String,
    /// OS process id, when there is a real process
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    exit: watch::Receiver<Option<ProcessExit>>,
    stderr: StderrTail,
}

impl ProcessHandle {
    pub fn new(
        handle_id: impl Into<String>,
        pid: Option<u32>,
        exit: watch::Receiver<Option<ProcessExit>>,
    ) -> Self {
        Self {
            handle_id: handle_id.into(),
            pid,
            started_at: Utc::now(),
            exit,
            stderr: StderrTail::None,
        }
    }

    pub fn with_stderr(mut self, stderr: StderrTail) -> Self {
        self.stderr = stderr;
        self
    }

    /// The last lines the process wrote to stderr.
    pub fn stderr_tail(&self) -> String {
        self.stderr.read()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.exit.borrow().is_none()
    }

    /// The exit status, if the process has already ended.
    pub fn try_exit(&self) -> Option<ProcessExit> {
        *self.exit.borrow()
    }

    /// Wait until the process ends.
    pub async fn wait_for_exit(&self) -> ProcessExit {
        let mut exit = self.exit.clone();
        match exit.wait_for(Option::is_some).await {
            Ok(value) => (*value).unwrap_or(ProcessExit {
                code: None,
                signal: None,
            }),
            // waiter went away without reporting
            Err(_) => ProcessExit {
                code: None,
                signal: None,
            },
        }
    }

    /// Send SIGKILL. A process that is already gone is not an error.
    pub fn kill(&self) -> Result<()> {
        let Some(pid) = self.pid else {
            debug!(handle_id = %self.handle_id, "No pid to kill");
            return Ok(());
        };
        if !self.is_running() {
            return Ok(());
        }
        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => {
                debug!(pid = pid, "Sent SIGKILL to process");
                Ok(())
            }
            Err(nix::errno::Errno::ESRCH) => {
                debug!(pid = pid, "Process already dead (ESRCH)");
                Ok(())
            }
            Err(e) => {
                warn!(pid = pid, error = %e, "Failed to send SIGKILL to process");
                Err(LaunchError::Io(std::io::Error::from(e)))
            }
        }
    }
}

/// Recorded in `<home>/ringmaster-node.json` when a server starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub node: String,
    pub pid: Option<u32>,
    pub listen_address: std::net::IpAddr,
    pub rpc_address: std::net::IpAddr,
    pub native_transport_port: u16,
    pub stop_port: u16,
    pub jmx_port: u16,
    pub started_at: DateTime<Utc>,
}

impl NodeState {
    pub const FILE_NAME: &'static str = "ringmaster-node.json";

    pub fn new(node: &NodeSpec, handle: &ProcessHandle) -> Self {
        Self {
            node: node.name(),
            pid: handle.pid,
            listen_address: node.listen_address,
            rpc_address: node.rpc_address,
            native_transport_port: node.native_transport_port,
            stop_port: node.stop_port,
            jmx_port: node.jmx_port,
            started_at: handle.started_at,
        }
    }

    pub fn path(home: &Path) -> PathBuf {
        home.join(Self::FILE_NAME)
    }

    /// Read the state left by a previous start, if any.
    pub fn load(home: &Path) -> Option<Self> {
        let bytes = std::fs::read(Self::path(home)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Trait for process launchers.
///
/// Launchers only spawn and watch processes. Readiness and shutdown are
/// handled by the caller.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launcher type identifier (e.g., "process", "mock")
    fn launcher_type(&self) -> &'static str;

    /// Start the server for `node` from its home directory.
    async fn start(
        &self,
        node: &NodeSpec,
        command: &CommandSpec,
        env: &HashMap<String, String>,
    ) -> Result<ProcessHandle>;

    /// Run a utility to completion, streaming its output into the log.
    async fn run_to_completion(
        &self,
        command: &CommandSpec,
        env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<ProcessExit>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_display() {
        assert_eq!(ProcessExit::success().to_string(), "exit code 0");
        assert_eq!(ProcessExit::killed().to_string(), "signal 9");
        assert!(!ProcessExit::killed().is_success());
    }

    #[tokio::test]
    async fn test_handle_observes_exit() {
        let (tx, rx) = watch::channel(None);
        let handle = ProcessHandle::new("h1", None, rx);
        assert!(handle.is_running());
        assert_eq!(handle.try_exit(), None);

        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.wait_for_exit().await });
        tx.send(Some(ProcessExit::success())).unwrap();

        assert_eq!(task.await.unwrap(), ProcessExit::success());
        assert!(!handle.is_running());
        // no pid: nothing to signal
        handle.kill().unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_unknown_exit() {
        let (tx, rx) = watch::channel(None);
        let handle = ProcessHandle::new("h2", None, rx);
        drop(tx);
        let exit = handle.wait_for_exit().await;
        assert_eq!(exit.code, None);
        assert_eq!(exit.signal, None);
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let tail = StderrTail::buffer();
        for i in 0..STDERR_TAIL_LINES + 5 {
            tail.push(&format!("line {i}"));
        }
        let read = tail.read();
        assert!(read.starts_with("line 5\n"));
        assert!(read.ends_with(&format!("line {}", STDERR_TAIL_LINES + 4)));
        assert_eq!(StderrTail::None.read(), "");
    }

    #[test]
    fn test_stderr_tail_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stderr.log");
        std::fs::write(&path, "first\nsecond\n").unwrap();
        assert_eq!(StderrTail::File(path).read(), "first\nsecond");
        assert_eq!(StderrTail::File(dir.path().join("missing")).read(), "");
    }
}
