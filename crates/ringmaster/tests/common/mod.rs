// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for ringmaster E2E tests.
//!
//! Provides TestContext with a scratch node home, a fake Cassandra
//! distribution and free loopback ports.

#![allow(dead_code)]

use std::net::TcpListener;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ringmaster::config::Config;
use ringmaster::launcher::{Launcher, MockLauncher};
use ringmaster::lifecycle::Lifecycle;
use ringmaster::orchestrator::{ClusterOrchestrator, RollbackPolicy};
use ringmaster::readiness::{ReadinessPoller, StartWait};

/// Test context holding a config whose directories live in a tempdir.
pub struct TestContext {
    pub config: Config,
    pub data_dir: PathBuf,
    _temp_dir: tempfile::TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let data_dir = temp_dir.path().to_path_buf();

        let cassandra_home = data_dir.join("apache-cassandra");
        std::fs::create_dir_all(cassandra_home.join("lib")).expect("Failed to create lib dir");

        let config = Config {
            home_dir: data_dir.join("cassandra"),
            cassandra_home: Some(cassandra_home),
            storage_port: free_port(),
            native_transport_port: free_port(),
            jmx_port: free_port(),
            stop_port: free_port(),
            stop_key: "test-key".to_string(),
            start_wait: StartWait::Bounded(Duration::from_secs(30)),
            ..Config::default()
        };

        Self {
            config,
            data_dir,
            _temp_dir: temp_dir,
        }
    }

    pub fn with_cluster_size(mut self, size: u32) -> Self {
        self.config.cluster_size = size;
        self
    }

    pub fn with_start_wait(mut self, wait: StartWait) -> Self {
        self.config.start_wait = wait;
        self
    }

    /// Orchestrator over the mock launcher with fast polling.
    pub fn orchestrator(
        &self,
        launcher: Arc<MockLauncher>,
        rollback: RollbackPolicy,
    ) -> ClusterOrchestrator {
        self.orchestrator_with(launcher, rollback)
    }

    pub fn orchestrator_with(
        &self,
        launcher: Arc<dyn Launcher>,
        rollback: RollbackPolicy,
    ) -> ClusterOrchestrator {
        ClusterOrchestrator::builder()
            .config(self.config.clone())
            .launcher(launcher)
            .poller(fast_poller())
            .start_wait(self.config.start_wait)
            .rollback(rollback)
            .stop_ceiling(Duration::from_secs(5))
            .build()
            .expect("Failed to build orchestrator")
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::new(self.config.clone())
            .with_poller(fast_poller())
            .with_stop_ceiling(Duration::from_secs(5))
    }

    /// Write a file into the scratch directory and return its path.
    pub fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.data_dir.join(name);
        std::fs::write(&path, contents).expect("Failed to write file");
        path
    }
}

/// A JDK whose `java` is the given shell script.
pub fn fake_jdk(dir: &Path, script: &str) -> PathBuf {
    let jdk = dir.join("jdk");
    let bin = jdk.join("bin");
    std::fs::create_dir_all(&bin).expect("Failed to create jdk dir");
    let java = bin.join("java");
    std::fs::write(&java, format!("#!/bin/sh\n{script}\n")).expect("Failed to write java");
    std::fs::set_permissions(&java, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to make java executable");
    jdk
}

/// Path of the monitor binary built alongside these tests.
pub fn monitor_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ringmaster-monitor"))
}

/// CQL readiness poller tuned for in-process stubs.
pub fn fast_poller() -> ReadinessPoller {
    ReadinessPoller::cql()
        .with_poll_interval(Duration::from_millis(50))
        .with_attempt_timeout(Duration::from_secs(1))
}

/// Wait until the mock has received `count` stop commands.
pub async fn wait_for_stops(launcher: &MockLauncher, count: usize) -> Vec<String> {
    for _ in 0..100 {
        let stopped = launcher.stopped_nodes().await;
        if stopped.len() >= count {
            return stopped;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    launcher.stopped_nodes().await
}

/// A port nothing is listening on right now.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    listener.local_addr().expect("Failed to read address").port()
}
