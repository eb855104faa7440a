// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster orchestration.
//!
//! Starts one node or a whole topology in index order, waits for each to
//! answer CQL, and stops them again in reverse.
//!
//! ```text
//!  start:  materialize(n0) -> launch(n0) -> ... -> launch(nN)
//!          wait_ready(n0) -> ... -> wait_ready(nN)
//!  stop:   stop(nN) -> ... -> stop(n0)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::command::ServiceCommandBuilder;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::launcher::{LaunchError, Launcher, ProcessExit, ProcessHandle};
use crate::materializer::ConfigMaterializer;
use crate::node::{ClusterTopology, NodeSpec};
use crate::readiness::{ReadinessPoller, StartWait};
use crate::shutdown::{DEFAULT_STOP_CEILING, ShutdownCoordinator, StopReport};

/// What to do with nodes that did start when a later one fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RollbackPolicy {
    /// Leave them running; only the failing node is stopped.
    #[default]
    LeaveRunning,
    /// Stop every started node, last started first.
    StopStarted,
}

/// Outcome of a successful start.
#[derive(Debug)]
pub struct ClusterStart {
    /// One handle per node, in node order
    pub handles: Vec<ProcessHandle>,
    /// No node home existed before this start.
    pub clean: bool,
    pub elapsed: Duration,
}

/// Builder for creating a [`ClusterOrchestrator`].
pub struct ClusterOrchestratorBuilder {
    config: Option<Config>,
    launcher: Option<Arc<dyn Launcher>>,
    poller: ReadinessPoller,
    materializer: Option<ConfigMaterializer>,
    start_wait: Option<StartWait>,
    rollback: Option<RollbackPolicy>,
    stop_ceiling: Duration,
}

impl Default for ClusterOrchestratorBuilder {
    fn default() -> Self {
        Self {
            config: None,
            launcher: None,
            poller: ReadinessPoller::cql(),
            materializer: None,
            start_wait: None,
            rollback: None,
            stop_ceiling: DEFAULT_STOP_CEILING,
        }
    }
}

impl ClusterOrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the process launcher (required).
    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Set the readiness poller.
    ///
    /// Default: CQL handshake every 500ms
    pub fn poller(mut self, poller: ReadinessPoller) -> Self {
        self.poller = poller;
        self
    }

    /// Set the config materializer.
    ///
    /// Default: built from the configuration's overrides file.
    pub fn materializer(mut self, materializer: ConfigMaterializer) -> Self {
        self.materializer = Some(materializer);
        self
    }

    /// Override the configured start wait.
    pub fn start_wait(mut self, wait: StartWait) -> Self {
        self.start_wait = Some(wait);
        self
    }

    /// Override the configured rollback policy.
    pub fn rollback(mut self, policy: RollbackPolicy) -> Self {
        self.rollback = Some(policy);
        self
    }

    /// How long each stop waits for a node to go away.
    ///
    /// Default: 30 seconds
    pub fn stop_ceiling(mut self, ceiling: Duration) -> Self {
        self.stop_ceiling = ceiling;
        self
    }

    /// Build the orchestrator.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> anyhow::Result<ClusterOrchestrator> {
        let config = self
            .config
            .ok_or_else(|| anyhow!("config is required"))?;
        let launcher = self
            .launcher
            .ok_or_else(|| anyhow!("launcher is required"))?;
        let materializer = match self.materializer {
            Some(m) => m,
            None => ConfigMaterializer::new(&config)?,
        };

        Ok(ClusterOrchestrator {
            commands: ServiceCommandBuilder::new(&config),
            start_wait: self.start_wait.unwrap_or(config.start_wait),
            rollback: self.rollback.unwrap_or(config.rollback),
            shutdown: ShutdownCoordinator::new(self.poller.clone()).with_ceiling(self.stop_ceiling),
            poller: self.poller,
            launcher,
            materializer,
        })
    }
}

/// Starts and stops nodes.
pub struct ClusterOrchestrator {
    launcher: Arc<dyn Launcher>,
    poller: ReadinessPoller,
    shutdown: ShutdownCoordinator,
    materializer: ConfigMaterializer,
    commands: ServiceCommandBuilder,
    start_wait: StartWait,
    rollback: RollbackPolicy,
}

impl ClusterOrchestrator {
    pub fn builder() -> ClusterOrchestratorBuilder {
        ClusterOrchestratorBuilder::new()
    }

    pub fn start_wait(&self) -> StartWait {
        self.start_wait
    }

    pub fn launcher_type(&self) -> &'static str {
        self.launcher.launcher_type()
    }

    /// Start a single node and wait for it.
    pub async fn start_node(&self, node: &NodeSpec) -> Result<ClusterStart> {
        self.start_nodes(std::slice::from_ref(node)).await
    }

    /// Start every node of the topology, then wait for each in order.
    pub async fn start_cluster(&self, topology: &ClusterTopology) -> Result<ClusterStart> {
        self.start_nodes(topology.nodes()).await
    }

    async fn start_nodes(&self, nodes: &[NodeSpec]) -> Result<ClusterStart> {
        let started_at = Instant::now();
        let clean = nodes.iter().all(NodeSpec::is_fresh);
        let mut handles = Vec::with_capacity(nodes.len());

        for node in nodes {
            match self.launch(node).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(node = %node.name(), error = %e, "Failed to launch node");
                    self.roll_back(&nodes[..handles.len()], None).await;
                    return Err(e);
                }
            }
        }

        if self.start_wait != StartWait::NoWait {
            for (index, node) in nodes.iter().enumerate() {
                let host = node.rpc_address.to_string();
                let handle = &handles[index];
                let ready = tokio::select! {
                    ready = self.poller.wait_until_ready(
                        &host,
                        node.native_transport_port,
                        self.start_wait,
                    ) => ready,
                    exit = handle.wait_for_exit() => Err(exited_before_ready(node, handle, exit)),
                };
                match ready {
                    Ok(true) => {}
                    Ok(false) => {
                        let seconds = self.start_wait.as_secs().unwrap_or_default();
                        error!(node = %node.name(), seconds, "Cassandra failed to start in time");
                        self.roll_back(nodes, Some(index)).await;
                        return Err(Error::StartTimeout { seconds });
                    }
                    Err(e) => {
                        error!(node = %node.name(), error = %e, "Cassandra failed to start");
                        self.roll_back(nodes, Some(index)).await;
                        return Err(e);
                    }
                }
            }
        }

        let elapsed = started_at.elapsed();
        info!(
            nodes = nodes.len(),
            clean,
            "Cassandra started in {:.1}s",
            elapsed.as_secs_f64()
        );

        Ok(ClusterStart {
            handles,
            clean,
            elapsed,
        })
    }

    /// Materialize and launch one node without waiting.
    async fn launch(&self, node: &NodeSpec) -> Result<ProcessHandle> {
        let home = self.materializer.materialize(node)?;
        debug!(
            node = %node.name(),
            config = %home.config_file.display(),
            fresh = home.fresh,
            "Node home ready"
        );

        let command = self.commands.service_command(node)?;
        let env = self.commands.environment(node);
        debug!(node = %node.name(), command = %command, "Starting Cassandra");
        Ok(self.launcher.start(node, &command, &env).await?)
    }

    /// Stop the failed node, and the rest when the policy says so.
    async fn roll_back(&self, nodes: &[NodeSpec], failed: Option<usize>) {
        if let Some(index) = failed {
            self.shutdown.stop(&nodes[index]).await;
        }
        if self.rollback == RollbackPolicy::LeaveRunning {
            let running = nodes.len() - usize::from(failed.is_some());
            if running > 0 {
                warn!(running, "Leaving started nodes running after failed start");
            }
            return;
        }
        for (index, node) in nodes.iter().enumerate().rev() {
            if Some(index) != failed {
                self.shutdown.stop(node).await;
            }
        }
    }

    pub async fn stop_node(&self, node: &NodeSpec) -> StopReport {
        self.shutdown.stop(node).await
    }

    /// Stop every node, highest index first.
    pub async fn stop_cluster(&self, topology: &ClusterTopology) -> Vec<StopReport> {
        let mut reports = Vec::with_capacity(topology.len());
        for node in topology.nodes().iter().rev() {
            reports.push(self.shutdown.stop(node).await);
        }
        reports.reverse();
        reports
    }

    /// Run `nodetool <args>` against the management node.
    pub async fn nodetool(&self, node: &NodeSpec, args: &[String]) -> Result<ProcessExit> {
        let command = self.commands.nodetool_command(node, args)?;
        let env = self.commands.environment(node);
        info!(node = %node.name(), command = %args.join(" "), "Running nodetool");
        Ok(self
            .launcher
            .run_to_completion(&command, &env, &node.home_dir)
            .await?)
    }
}

/// The server (or its monitor) ended while we were waiting for it.
fn exited_before_ready(node: &NodeSpec, handle: &ProcessHandle, exit: ProcessExit) -> Error {
    let tail = handle.stderr_tail();
    let message = if tail.is_empty() {
        format!("{} exited with {exit} before accepting connections", node.name())
    } else {
        format!(
            "{} exited with {exit} before accepting connections: {tail}",
            node.name()
        )
    };
    LaunchError::StartFailed(message).into()
}
