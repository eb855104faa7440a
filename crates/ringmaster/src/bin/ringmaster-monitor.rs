// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ringmaster Monitor - hosts the control socket for a Cassandra process
//!
//! Runs the command after `--` as a child and listens on a loopback port for
//! the keyed stop command. On `stop` the child is killed and the monitor
//! exits 0; if the child exits first, the monitor exits with its status.
//!
//! ```text
//! ringmaster-monitor --stop-host 127.0.0.1 --stop-port 8081 -- java ... CassandraDaemon
//! ```

use std::net::IpAddr;
use std::process::ExitStatus;

use anyhow::Context;
use clap::Parser;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tracing::{debug, error, info, warn};

use ringmaster::command::MONITOR_STOP_KEY_VAR;
use ringmaster::control_socket::ControlSocketServer;
use ringmaster::launcher::process::set_parent_death_signal;

#[derive(Parser)]
#[command(name = "ringmaster-monitor")]
#[command(about = "Run a Cassandra process behind a loopback stop socket", long_about = None)]
struct Args {
    /// Loopback address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    stop_host: IpAddr,

    /// Port to listen on
    #[arg(long)]
    stop_port: u16,

    /// Shared key expected before the stop command
    #[arg(long, env = MONITOR_STOP_KEY_VAR, hide_env_values = true)]
    stop_key: String,

    /// Command to run
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ringmaster=info".into()),
        )
        .init();

    let Some((program, program_args)) = args.command.split_first() else {
        anyhow::bail!("no command given");
    };

    // Bind before spawning so a taken port never leaves an orphaned server.
    let (pid_tx, pid_rx) = std::sync::mpsc::channel::<u32>();
    let control = ControlSocketServer::bind(
        args.stop_host,
        args.stop_port,
        args.stop_key,
        Box::new(move || {
            if let Ok(pid) = pid_rx.try_recv() {
                kill(pid, Signal::SIGKILL);
            }
            std::process::exit(0);
        }),
    )
    .await?;

    let mut cmd = Command::new(program);
    cmd.args(program_args)
        .env_remove(MONITOR_STOP_KEY_VAR)
        .kill_on_drop(true);
    set_parent_death_signal(&mut cmd);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;
    let Some(pid) = child.id() else {
        anyhow::bail!("{program} exited before it could be monitored");
    };
    // the receiver lives in the control socket callback
    let _ = pid_tx.send(pid);

    info!(
        pid,
        addr = %control.local_addr()?,
        "Monitoring Cassandra"
    );
    control.spawn();

    let mut terminate = unix_signal(SignalKind::terminate())?;
    let status = loop {
        tokio::select! {
            status = child.wait() => break status?,
            _ = tokio::signal::ctrl_c() => {
                info!(pid, "Interrupted, forwarding SIGINT");
                kill(pid, Signal::SIGINT);
            }
            _ = terminate.recv() => {
                info!(pid, "Terminated, forwarding SIGTERM");
                kill(pid, Signal::SIGTERM);
            }
        }
    };

    let code = exit_code(status);
    if code == 0 {
        info!(pid, "Cassandra exited");
    } else {
        warn!(pid, code, "Cassandra exited with failure");
    }
    std::process::exit(code);
}

fn kill(pid: u32, sig: Signal) {
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => debug!(pid, signal = ?sig, "Signal sent"),
        Err(nix::errno::Errno::ESRCH) => debug!(pid, "Process already dead (ESRCH)"),
        Err(e) => error!(pid, error = %e, "Failed to signal process"),
    }
}

/// Shell convention: the child's code, or 128 + signal when it was killed.
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(1)
}
