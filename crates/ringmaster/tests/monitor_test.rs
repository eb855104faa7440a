// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the `ringmaster-monitor` wrapper binary.
//!
//! Each test runs the real binary around a shell command and talks to its
//! control socket over loopback TCP.

mod common;

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use common::*;
use ringmaster::command::MONITOR_STOP_KEY_VAR;
use ringmaster::control_socket::StopCommand;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

const KEY: &str = "monitor-key";

fn spawn_monitor(stop_port: u16, script: &str) -> Child {
    Command::new(monitor_bin())
        .arg("--stop-port")
        .arg(stop_port.to_string())
        .arg("--")
        .arg("sh")
        .arg("-c")
        .arg(script)
        .env(MONITOR_STOP_KEY_VAR, KEY)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn monitor")
}

async fn wait_exit(monitor: &mut Child) -> ExitStatus {
    tokio::time::timeout(Duration::from_secs(10), monitor.wait())
        .await
        .expect("monitor did not exit")
        .expect("Failed to wait for monitor")
}

/// Wait for the child to write its pid (the control socket is bound first).
async fn read_pid(path: &Path) -> i32 {
    for _ in 0..200 {
        if let Ok(raw) = std::fs::read_to_string(path)
            && let Ok(pid) = raw.trim().parse()
        {
            return pid;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("child never wrote {}", path.display());
}

/// Alive means present in /proc and not a zombie.
fn is_alive(pid: i32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(") ")
            .and_then(|(_, rest)| rest.chars().next())
            .is_some_and(|state| state != 'Z'),
        Err(_) => false,
    }
}

async fn send(port: u16, payload: &[u8]) {
    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .expect("Failed to connect to control socket");
    stream.write_all(payload).await.unwrap();
    stream.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_key_kills_child_and_exits_zero() {
    let temp = tempfile::tempdir().unwrap();
    let pid_file = temp.path().join("child.pid");
    let port = free_port();
    let mut monitor = spawn_monitor(
        port,
        &format!("echo $$ > {}; exec sleep 30", pid_file.display()),
    );

    let child = read_pid(&pid_file).await;
    assert!(is_alive(child));

    send(port, b"wrong\r\nstop\r\n").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(monitor.try_wait().unwrap().is_none());
    assert!(is_alive(child));

    send(port, &StopCommand::new(KEY).encode()).await;
    let status = wait_exit(&mut monitor).await;
    assert_eq!(status.code(), Some(0));

    let mut gone = false;
    for _ in 0..100 {
        if !is_alive(child) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(gone, "child {child} survived the stop command");
}

#[tokio::test]
async fn test_child_exit_code_is_propagated() {
    let mut monitor = spawn_monitor(free_port(), "exit 7");
    let status = wait_exit(&mut monitor).await;
    assert_eq!(status.code(), Some(7));
}

#[tokio::test]
async fn test_child_signal_maps_to_shell_code() {
    let mut monitor = spawn_monitor(free_port(), "kill -9 $$");
    let status = wait_exit(&mut monitor).await;
    assert_eq!(status.code(), Some(128 + 9));
}

#[tokio::test]
async fn test_stop_key_is_hidden_from_child() {
    let mut monitor = spawn_monitor(
        free_port(),
        &format!("test -z \"${MONITOR_STOP_KEY_VAR}\""),
    );
    let status = wait_exit(&mut monitor).await;
    assert_eq!(status.code(), Some(0));
}

#[tokio::test]
async fn test_missing_command_fails() {
    let mut monitor = Command::new(monitor_bin())
        .arg("--stop-port")
        .arg(free_port().to_string())
        .arg("--")
        .arg("/nonexistent/java")
        .env(MONITOR_STOP_KEY_VAR, KEY)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let status = wait_exit(&mut monitor).await;
    assert!(!status.success());

    let mut stderr = String::new();
    tokio::io::AsyncReadExt::read_to_string(monitor.stderr.as_mut().unwrap(), &mut stderr)
        .await
        .unwrap();
    assert!(stderr.contains("failed to start /nonexistent/java"), "{stderr}");
}
