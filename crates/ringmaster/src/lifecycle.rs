// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command-level operations behind the `ringmaster` CLI.
//!
//! Each operation honours `skip`, builds what it needs from [`Config`] and
//! reports progress through `tracing`.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ringmaster_protocol::QueryResult;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::console::StopTrigger;
use crate::cql::CqlRunner;
use crate::launcher::{Launcher, NodeState, ProcessExit};
use crate::materializer::ConfigMaterializer;
use crate::node::{ClusterTopology, NodeSpec};
use crate::orchestrator::{ClusterOrchestrator, ClusterStart};
use crate::readiness::{ReadinessPoller, StartWait};
use crate::shutdown::{DEFAULT_STOP_CEILING, ShutdownCoordinator, StopReport};

/// `nodetool` operations exposed as commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodetoolOp {
    Compact,
    Flush,
    Repair,
    Cleanup,
}

impl NodetoolOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodetoolOp::Compact => "compact",
            NodetoolOp::Flush => "flush",
            NodetoolOp::Repair => "repair",
            NodetoolOp::Cleanup => "cleanup",
        }
    }

    fn done_message(&self) -> &'static str {
        match self {
            NodetoolOp::Compact => "Compact triggered.",
            NodetoolOp::Flush => "Flush triggered.",
            NodetoolOp::Repair => "Repair triggered.",
            NodetoolOp::Cleanup => "Cleanup triggered.",
        }
    }
}

impl fmt::Display for NodetoolOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs CLI commands against one configuration.
#[derive(Clone)]
pub struct Lifecycle {
    config: Config,
    poller: ReadinessPoller,
    stop_ceiling: Duration,
}

impl Lifecycle {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            poller: ReadinessPoller::cql(),
            stop_ceiling: DEFAULT_STOP_CEILING,
        }
    }

    pub fn with_poller(mut self, poller: ReadinessPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_stop_ceiling(mut self, ceiling: Duration) -> Self {
        self.stop_ceiling = ceiling;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn skipped(&self) -> bool {
        if self.config.skip {
            info!("Skipping cassandra: skip==true");
        }
        self.config.skip
    }

    fn orchestrator(
        &self,
        launcher: Arc<dyn Launcher>,
        start_wait: StartWait,
    ) -> anyhow::Result<ClusterOrchestrator> {
        ClusterOrchestrator::builder()
            .config(self.config.clone())
            .launcher(launcher)
            .poller(self.poller.clone())
            .start_wait(start_wait)
            .stop_ceiling(self.stop_ceiling)
            .build()
    }

    fn shutdown(&self) -> ShutdownCoordinator {
        ShutdownCoordinator::new(self.poller.clone()).with_ceiling(self.stop_ceiling)
    }

    fn runner(&self, node: &NodeSpec) -> CqlRunner {
        CqlRunner::for_node(node).with_keyspace(self.config.keyspace.clone())
    }

    /// Load the configured script after a clean start.
    async fn load_after_start(&self, node: &NodeSpec, clean: bool) -> anyhow::Result<()> {
        if !clean || !self.config.load_after_first_start {
            return Ok(());
        }
        if let Some(script) = &self.config.load_script {
            self.runner(node)
                .load_script(script, self.config.load_failure_ignore)
                .await?;
        }
        Ok(())
    }

    /// Start a single node and leave it running.
    pub async fn start(&self, launcher: Arc<dyn Launcher>) -> anyhow::Result<Option<ClusterStart>> {
        if self.skipped() {
            return Ok(None);
        }
        let topology = ClusterTopology::single(&self.config);
        let node = topology.management_node();
        debug!(
            home = %node.home_dir.display(),
            "{}",
            if node.is_fresh() {
                "First start of Cassandra instance"
            } else {
                "Re-using existing Cassandra instance"
            }
        );

        let orchestrator = self.orchestrator(launcher, self.config.start_wait)?;
        info!(wait = %self.config.start_wait, "Starting Cassandra...");
        let started = orchestrator.start_node(node).await?;
        self.load_after_start(node, started.clean).await?;
        Ok(Some(started))
    }

    /// Stop the single node through its control socket.
    pub async fn stop(&self) -> anyhow::Result<Option<StopReport>> {
        if self.skipped() {
            return Ok(None);
        }
        self.config.validate_stop()?;
        let topology = ClusterTopology::single(&self.config);
        let node = topology.management_node();
        if let Some(state) = NodeState::load(&node.home_dir) {
            debug!(pid = ?state.pid, started_at = %state.started_at, "Stopping Cassandra");
        }
        Ok(Some(self.shutdown().stop(node).await))
    }

    /// Run a node in the foreground until `stop_requested` fires or the
    /// server exits on its own, then stop it.
    pub async fn run<F>(
        &self,
        launcher: Arc<dyn Launcher>,
        stop_requested: F,
    ) -> anyhow::Result<Option<ProcessExit>>
    where
        F: Future<Output = StopTrigger>,
    {
        if self.skipped() {
            return Ok(None);
        }
        let topology = ClusterTopology::single(&self.config);
        let node = topology.management_node();

        let orchestrator = self.orchestrator(launcher, StartWait::Unbounded)?;
        info!("Waiting for Cassandra to start...");
        let started = orchestrator.start_node(node).await?;
        self.load_after_start(node, started.clean).await?;

        let Some(handle) = started.handles.into_iter().next() else {
            anyhow::bail!("no process handle for {}", node.name());
        };

        tokio::select! {
            trigger = stop_requested => {
                info!(trigger = ?trigger, "Stopping Cassandra...");
            }
            exit = handle.wait_for_exit() => {
                warn!(exit = %exit, "Cassandra exited before it was asked to stop");
                return Ok(Some(exit));
            }
        }

        let report = orchestrator.stop_node(node).await;
        if report != StopReport::Stopped && handle.is_running() {
            warn!(report = ?report, "Stop command did not take effect, killing Cassandra");
            handle.kill()?;
        }

        match tokio::time::timeout(self.stop_ceiling, handle.wait_for_exit()).await {
            Ok(exit) => {
                info!(exit = %exit, "Cassandra process finished");
                Ok(Some(exit))
            }
            Err(_) => {
                warn!("Cassandra process did not exit in time");
                Ok(None)
            }
        }
    }

    /// Start `cluster_size` nodes and leave them running.
    pub async fn start_cluster(
        &self,
        launcher: Arc<dyn Launcher>,
    ) -> anyhow::Result<Option<ClusterStart>> {
        if self.skipped() {
            return Ok(None);
        }
        let topology = ClusterTopology::plan(&self.config)?;
        info!(
            nodes = topology.len(),
            wait = %self.config.start_wait,
            "Starting Cassandra cluster..."
        );
        let orchestrator = self.orchestrator(launcher, self.config.start_wait)?;
        let started = orchestrator.start_cluster(&topology).await?;
        self.load_after_start(topology.management_node(), started.clean)
            .await?;
        Ok(Some(started))
    }

    /// Stop every cluster node, highest index first.
    pub async fn stop_cluster(&self) -> anyhow::Result<Option<Vec<StopReport>>> {
        if self.skipped() {
            return Ok(None);
        }
        self.config.validate_stop()?;
        let topology = ClusterTopology::plan(&self.config)?;
        let shutdown = self.shutdown();
        let mut reports = Vec::with_capacity(topology.len());
        for node in topology.nodes().iter().rev() {
            reports.push(shutdown.stop(node).await);
        }
        reports.reverse();
        Ok(Some(reports))
    }

    /// Remove the node home directory.
    pub async fn delete(&self) -> anyhow::Result<()> {
        if self.skipped() {
            return Ok(());
        }
        let home = &self.config.home_dir;
        info!("Deleting {}", home.display());
        match remove_dir(home).await {
            Ok(()) => Ok(()),
            Err(e) if self.config.fail_on_error => {
                Err(e).with_context(|| format!("Failed to delete {}", home.display()))
            }
            Err(e) => {
                warn!(error = %e, "Failed to delete {}", home.display());
                Ok(())
            }
        }
    }

    /// Execute a statement or a script file against the running node.
    pub async fn cql_exec(
        &self,
        statement: Option<&str>,
        script: Option<&Path>,
    ) -> anyhow::Result<Vec<QueryResult>> {
        if self.skipped() {
            return Ok(Vec::new());
        }
        let topology = ClusterTopology::single(&self.config);
        let runner = self.runner(topology.management_node());

        if let Some(path) = script
            && !path.is_file()
        {
            warn!("CQL script {} does not exist, ignoring it.", path.display());
        }
        let results = match (script, statement) {
            (Some(path), _) if path.is_file() => runner.execute_file(path).await?,
            (_, Some(statement)) => runner.execute(statement).await?,
            _ => runner.execute("").await?,
        };
        print_results(&results);
        Ok(results)
    }

    /// Load a script (the configured one unless `script` is given).
    pub async fn load(&self, script: Option<PathBuf>) -> anyhow::Result<()> {
        if self.skipped() {
            return Ok(());
        }
        let Some(script) = script.or_else(|| self.config.load_script.clone()) else {
            warn!("No CQL script configured. Nothing to do.");
            return Ok(());
        };
        let topology = ClusterTopology::single(&self.config);
        self.runner(topology.management_node())
            .load_script(&script, self.config.load_failure_ignore)
            .await?;
        Ok(())
    }

    /// Drop the listed tables, or the whole keyspace when none are given.
    pub async fn drop_tables(&self, tables: &[String]) -> anyhow::Result<()> {
        if self.skipped() {
            return Ok(());
        }
        let keyspace = self.require_keyspace("drop tables from")?;
        let topology = ClusterTopology::single(&self.config);
        let runner = CqlRunner::for_node(topology.management_node());

        if tables.is_empty() {
            runner
                .execute(&format!("DROP KEYSPACE IF EXISTS {keyspace}"))
                .await?;
            info!("Dropped keyspace \"{keyspace}\".");
            return Ok(());
        }
        for table in tables {
            runner
                .execute(&format!("DROP TABLE IF EXISTS {keyspace}.{table}"))
                .await?;
            info!("Dropped table \"{table}\".");
        }
        Ok(())
    }

    /// Remove every row from one table.
    pub async fn truncate(&self, table: &str) -> anyhow::Result<()> {
        if self.skipped() {
            return Ok(());
        }
        let keyspace = self.require_keyspace("truncate")?;
        if table.trim().is_empty() {
            anyhow::bail!("The table to truncate cannot be empty");
        }
        let topology = ClusterTopology::single(&self.config);
        CqlRunner::for_node(topology.management_node())
            .execute(&format!("TRUNCATE {keyspace}.{table}"))
            .await?;
        info!("Truncated {keyspace}.{table}.");
        Ok(())
    }

    fn require_keyspace(&self, action: &str) -> anyhow::Result<&str> {
        match self.config.keyspace.as_deref().map(str::trim) {
            Some(keyspace) if !keyspace.is_empty() => Ok(keyspace),
            _ => anyhow::bail!("The keyspace to {action} cannot be empty"),
        }
    }

    /// Run `nodetool <op> [keyspace [tables...]]` against the running node.
    pub async fn nodetool(
        &self,
        launcher: Arc<dyn Launcher>,
        op: NodetoolOp,
        keyspace: Option<String>,
        tables: Vec<String>,
    ) -> anyhow::Result<Option<ProcessExit>> {
        if self.skipped() {
            return Ok(None);
        }
        let topology = ClusterTopology::single(&self.config);
        let node = topology.management_node();
        ConfigMaterializer::new(&self.config)?.materialize(node)?;

        let mut args = vec![op.as_str().to_string()];
        if let Some(keyspace) = keyspace.or_else(|| self.config.keyspace.clone()) {
            args.push(keyspace);
            args.extend(tables);
        }

        let orchestrator = self.orchestrator(launcher, StartWait::NoWait)?;
        let exit = orchestrator.nodetool(node, &args).await?;
        info!("{}", op.done_message());
        Ok(Some(exit))
    }
}

async fn remove_dir(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn print_results(results: &[QueryResult]) {
    info!("-----------------------------------------------");
    for result in results {
        match result {
            QueryResult::Rows(rows) => {
                let header: Vec<&str> = rows.columns.iter().map(|c| c.name.as_str()).collect();
                info!(" {}", header.join(" | "));
                info!("-----------------------------------------------");
                for index in 0..rows.rows.len() {
                    info!(" {}", rows.render_row(index).join(" | "));
                }
                info!("-----------------------------------------------");
            }
            QueryResult::SchemaChange {
                change_type,
                target,
                keyspace,
            } => info!(" {change_type} {target} {keyspace}"),
            QueryResult::SetKeyspace(keyspace) => debug!(keyspace = %keyspace, "Keyspace set"),
            QueryResult::Void | QueryResult::Prepared => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_skip_short_circuits_everything() {
        let lifecycle = Lifecycle::new(Config {
            skip: true,
            cluster_size: 0,
            ..Config::default()
        });
        assert!(lifecycle.stop().await.unwrap().is_none());
        // an invalid cluster size is never looked at
        assert!(lifecycle.stop_cluster().await.unwrap().is_none());
        lifecycle.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_home_is_ok() {
        let dir = TempDir::new().unwrap();
        let lifecycle = Lifecycle::new(Config {
            home_dir: dir.path().join("never-created"),
            ..Config::default()
        });
        lifecycle.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_removes_home() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("cassandra");
        std::fs::create_dir_all(home.join("data")).unwrap();
        let lifecycle = Lifecycle::new(Config {
            home_dir: home.clone(),
            ..Config::default()
        });
        lifecycle.delete().await.unwrap();
        assert!(!home.exists());
    }

    #[tokio::test]
    async fn test_stop_requires_key() {
        let lifecycle = Lifecycle::new(Config {
            stop_key: String::new(),
            ..Config::default()
        });
        let err = lifecycle.stop().await.unwrap_err();
        assert!(err.to_string().contains("Missing stop key"));
    }

    #[tokio::test]
    async fn test_stop_cluster_validates_size() {
        let lifecycle = Lifecycle::new(Config {
            cluster_size: 255,
            ..Config::default()
        });
        let err = lifecycle.stop_cluster().await.unwrap_err();
        assert!(err.to_string().contains("Invalid cluster size of 255"));
    }

    #[test]
    fn test_nodetool_op_names() {
        assert_eq!(NodetoolOp::Compact.to_string(), "compact");
        assert_eq!(NodetoolOp::Cleanup.done_message(), "Cleanup triggered.");
    }

    #[tokio::test]
    async fn test_drop_and_truncate_require_keyspace() {
        let lifecycle = Lifecycle::new(Config {
            keyspace: Some("  ".to_string()),
            ..Config::default()
        });
        let err = lifecycle.drop_tables(&[]).await.unwrap_err();
        assert!(err.to_string().contains("keyspace to drop tables from cannot be empty"));
        let err = lifecycle.truncate("users").await.unwrap_err();
        assert!(err.to_string().contains("keyspace to truncate cannot be empty"));
    }
}
