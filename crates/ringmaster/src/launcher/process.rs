// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launcher backed by real child processes.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::traits::*;
use crate::command::CommandSpec;
use crate::node::NodeSpec;

/// How long an exit report waits for the last output lines.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Spawns servers and utilities with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    mode: LaunchMode,
}

impl ProcessLauncher {
    pub fn new(mode: LaunchMode) -> Self {
        Self { mode }
    }

    pub fn attached() -> Self {
        Self::new(LaunchMode::Attached)
    }

    pub fn detached() -> Self {
        Self::new(LaunchMode::Detached)
    }

    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    fn base_command(
        command: &CommandSpec,
        env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<Command> {
        if !working_dir.is_dir() {
            return Err(LaunchError::WorkingDirMissing(working_dir.to_path_buf()));
        }
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(working_dir)
            .env_clear()
            .envs(env)
            .stdin(Stdio::null());
        Ok(cmd)
    }

    /// Attached children die with us: dropped handles and a dead parent both kill them.
    fn attach(cmd: &mut Command) {
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        set_parent_death_signal(cmd);
    }

    fn spawn(cmd: &mut Command, command: &CommandSpec) -> Result<Child> {
        cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LaunchError::ExecutableNotFound(command.program_name())
            } else {
                LaunchError::Spawn {
                    program: command.program_name(),
                    source: e,
                }
            }
        })
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    fn launcher_type(&self) -> &'static str {
        "process"
    }

    async fn start(
        &self,
        node: &NodeSpec,
        command: &CommandSpec,
        env: &HashMap<String, String>,
    ) -> Result<ProcessHandle> {
        let mut cmd = Self::base_command(command, env, &node.home_dir)?;

        let stderr = match self.mode {
            LaunchMode::Attached => {
                Self::attach(&mut cmd);
                StderrTail::buffer()
            }
            LaunchMode::Detached => {
                let stderr_log = node.logs_dir().join("stderr.log");
                // Files rather than pipes: the server outlives the reading end.
                std::fs::create_dir_all(node.logs_dir())?;
                let stdout = std::fs::File::create(node.logs_dir().join("stdout.log"))?;
                let stderr = std::fs::File::create(&stderr_log)?;
                cmd.stdout(Stdio::from(stdout))
                    .stderr(Stdio::from(stderr))
                    .process_group(0);
                StderrTail::File(stderr_log)
            }
        };

        let mut child = Self::spawn(&mut cmd, command)?;
        let pid = child.id();
        let name = node.name();

        let drains = match self.mode {
            LaunchMode::Attached => drain_output(&mut child, &name, &stderr),
            LaunchMode::Detached => Vec::new(),
        };

        // Check for immediate startup failures
        match child.try_wait() {
            Ok(Some(status)) if !status.success() => {
                let tail = stderr.read();
                let error_msg = if tail.is_empty() {
                    format!("{} exited with status: {}", command.program_name(), status)
                } else {
                    format!("{} failed: {}", command.program_name(), tail)
                };
                error!(node = %name, error = %error_msg, "Cassandra failed to start");
                return Err(LaunchError::StartFailed(error_msg));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(node = %name, error = %e, "Could not check process status");
            }
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let handle_id = format!("{}-{}", name, pid.unwrap_or_default());
        let handle = ProcessHandle::new(handle_id, pid, exit_rx).with_stderr(stderr);

        info!(
            node = %name,
            pid = ?pid,
            mode = ?self.mode,
            home = %node.home_dir.display(),
            "Launched Cassandra"
        );

        let state = NodeState::new(node, &handle);
        match serde_json::to_vec_pretty(&state) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(NodeState::path(&node.home_dir), bytes).await {
                    warn!(node = %name, error = %e, "Failed to write node state file");
                }
            }
            Err(e) => warn!(node = %name, error = %e, "Failed to serialize node state"),
        }

        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ProcessExit::from(status),
                Err(e) => {
                    warn!(node = %name, error = %e, "Failed to wait for Cassandra process");
                    ProcessExit {
                        code: None,
                        signal: None,
                    }
                }
            };
            // let the last stderr lines land before anyone reads the tail
            for drain in drains {
                let _ = tokio::time::timeout(DRAIN_GRACE, drain).await;
            }
            info!(node = %name, pid = ?pid, exit = %exit, "Cassandra process exited");
            let _ = exit_tx.send(Some(exit));
        });

        Ok(handle)
    }

    async fn run_to_completion(
        &self,
        command: &CommandSpec,
        env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<ProcessExit> {
        let mut cmd = Self::base_command(command, env, working_dir)?;
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = Self::spawn(&mut cmd, command)?;
        let program = command
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| command.program_name());
        let drains = drain_output(&mut child, &program, &StderrTail::None);

        let status = child.wait().await?;
        for drain in drains {
            let _ = drain.await;
        }

        let exit = ProcessExit::from(status);
        if !exit.is_success() {
            return Err(LaunchError::ExitCode {
                program: command.program_name(),
                exit_code: exit.code.unwrap_or(-1),
            });
        }
        Ok(exit)
    }
}

/// Have the kernel SIGKILL the child when its parent dies.
#[cfg(target_os = "linux")]
pub fn set_parent_death_signal(cmd: &mut Command) {
    // SAFETY: prctl is async-signal-safe and touches no parent state.
    unsafe {
        cmd.pre_exec(|| {
            nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGKILL)
                .map_err(std::io::Error::from)
        });
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_parent_death_signal(_cmd: &mut Command) {}

/// Forward each line of the child's stdout and stderr to the log, keeping
/// the stderr lines in `tail`.
fn drain_output(
    child: &mut Child,
    source: &str,
    tail: &StderrTail,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut tasks = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        tasks.push(tokio::spawn(forward_lines(
            stdout,
            source.to_string(),
            "stdout",
            StderrTail::None,
        )));
    }
    if let Some(stderr) = child.stderr.take() {
        tasks.push(tokio::spawn(forward_lines(
            stderr,
            source.to_string(),
            "stderr",
            tail.clone(),
        )));
    }
    tasks
}

async fn forward_lines<R>(stream: R, source: String, stream_name: &'static str, tail: StderrTail)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tail.push(&line);
                info!(target: "ringmaster::server", source = %source, stream = stream_name, "{line}")
            }
            Ok(None) => break,
            Err(e) => {
                warn!(source = %source, stream = stream_name, error = %e, "Output stream failed");
                break;
            }
        }
    }
}
