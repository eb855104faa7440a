// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock launcher for testing.
//!
//! Instead of spawning a JVM, each "server" is an in-process CQL stub bound
//! to the node's native transport address plus a real control socket, so
//! readiness polling and shutdown run over actual TCP.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ringmaster_protocol::StubServer;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use super::traits::*;
use crate::command::CommandSpec;
use crate::control_socket::{ControlSocketServer, TerminationCallback};
use crate::node::NodeSpec;

type ExitSender = watch::Sender<Option<ProcessExit>>;

/// Mock launcher for testing.
pub struct MockLauncher {
    /// Cluster name reported by the stub servers
    pub cluster_name: String,
    /// If true, every start fails immediately
    pub fail_start: bool,
    /// If true, no stub is bound so nodes never become ready
    pub never_ready: bool,
    /// Indexes of nodes that never become ready
    pub unready_nodes: Vec<usize>,
    /// If set, every server exits with this status shortly after starting
    pub crash_exit: Option<ProcessExit>,
    /// Exit code reported by `run_to_completion`
    pub utility_exit_code: i32,
    started: Arc<Mutex<Vec<String>>>,
    stopped: Arc<Mutex<Vec<String>>>,
    completions: Arc<Mutex<Vec<CommandSpec>>>,
    stubs: Arc<Mutex<HashMap<String, Arc<StubServer>>>>,
    /// Nodes without a control socket stay up until the launcher is dropped.
    unmanaged: Arc<Mutex<Vec<ExitSender>>>,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    /// Create a new mock launcher.
    pub fn new() -> Self {
        Self {
            cluster_name: "Test Cluster".to_string(),
            fail_start: false,
            never_ready: false,
            unready_nodes: Vec::new(),
            crash_exit: None,
            utility_exit_code: 0,
            started: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(Mutex::new(Vec::new())),
            completions: Arc::new(Mutex::new(Vec::new())),
            stubs: Arc::new(Mutex::new(HashMap::new())),
            unmanaged: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock launcher whose starts fail.
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::new()
        }
    }

    /// Create a mock launcher whose nodes never accept client connections.
    pub fn never_ready() -> Self {
        Self {
            never_ready: true,
            ..Self::new()
        }
    }

    /// Create a mock launcher whose servers exit before accepting connections.
    pub fn crashing(exit: ProcessExit) -> Self {
        Self {
            crash_exit: Some(exit),
            ..Self::new()
        }
    }

    /// Keep the node with this index from ever becoming ready.
    pub fn with_unready_node(mut self, index: usize) -> Self {
        self.unready_nodes.push(index);
        self
    }

    pub fn with_cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = name.into();
        self
    }

    /// Node names in the order they were started.
    pub async fn started_nodes(&self) -> Vec<String> {
        self.started.lock().await.clone()
    }

    /// Node names in the order their stop command arrived.
    pub async fn stopped_nodes(&self) -> Vec<String> {
        self.stopped.lock().await.clone()
    }

    /// Statements the node's stub has executed.
    pub async fn executed(&self, node: &str) -> Vec<String> {
        let stub = self.stubs.lock().await.get(node).cloned();
        match stub {
            Some(stub) => stub.executed().await,
            None => Vec::new(),
        }
    }

    /// Utility commands passed to `run_to_completion`.
    pub async fn completions(&self) -> Vec<CommandSpec> {
        self.completions.lock().await.clone()
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    fn launcher_type(&self) -> &'static str {
        "mock"
    }

    async fn start(
        &self,
        node: &NodeSpec,
        command: &CommandSpec,
        _env: &HashMap<String, String>,
    ) -> Result<ProcessHandle> {
        let name = node.name();
        self.started.lock().await.push(name.clone());

        if self.fail_start {
            return Err(LaunchError::StartFailed(format!(
                "{} exited with status: exit status: 1",
                command.program_name()
            )));
        }

        if let Some(exit) = self.crash_exit {
            let (exit_tx, exit_rx) = watch::channel(None);
            let stderr = StderrTail::buffer();
            stderr.push("Error: Could not find or load main class");
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let _ = exit_tx.send(Some(exit));
            });
            return Ok(ProcessHandle::new(format!("mock_{name}"), None, exit_rx).with_stderr(stderr));
        }

        let stub = if self.never_ready || self.unready_nodes.contains(&node.index) {
            None
        } else {
            let addr = SocketAddr::new(node.rpc_address, node.native_transport_port);
            let stub = StubServer::builder()
                .cluster_name(self.cluster_name.clone())
                .bind(addr)
                .await?;
            let stub = Arc::new(stub);
            self.stubs.lock().await.insert(name.clone(), stub.clone());
            Some(stub)
        };

        let (exit_tx, exit_rx) = watch::channel(None);
        let handle = ProcessHandle::new(format!("mock_{name}"), None, exit_rx);

        if !node.control_socket_enabled() {
            self.unmanaged.lock().await.push(exit_tx);
            return Ok(handle);
        }

        let stopped = self.stopped.clone();
        let node_name = name.clone();
        let on_stop: TerminationCallback = Box::new(move || {
            tokio::spawn(async move {
                stopped.lock().await.push(node_name);
                if let Some(stub) = stub {
                    stub.shutdown().await;
                }
                let _ = exit_tx.send(Some(ProcessExit::killed()));
            });
        });

        let control = ControlSocketServer::bind(
            node.stop_address(),
            node.stop_port,
            node.stop_key.clone(),
            on_stop,
        )
        .await
        .map_err(|e| LaunchError::StartFailed(e.to_string()))?;
        control.spawn();

        info!(node = %name, "Launched mock Cassandra");
        Ok(handle)
    }

    async fn run_to_completion(
        &self,
        command: &CommandSpec,
        _env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<ProcessExit> {
        debug!(command = %command, dir = %working_dir.display(), "Mock utility run");
        self.completions.lock().await.push(command.clone());

        if self.utility_exit_code != 0 {
            return Err(LaunchError::ExitCode {
                program: command.program_name(),
                exit_code: self.utility_exit_code,
            });
        }
        Ok(ProcessExit::success())
    }
}
