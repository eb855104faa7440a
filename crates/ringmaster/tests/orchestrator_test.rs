// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for starting and stopping nodes.
//!
//! Nodes are served by MockLauncher: an in-process CQL stub on the native
//! transport port and a real control socket, so readiness and shutdown go
//! over loopback TCP exactly as they would against Cassandra.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use ringmaster::console::StopTrigger;
use ringmaster::error::Error;
use ringmaster::launcher::{LaunchError, Launcher, MockLauncher, ProcessExit};
use ringmaster::lifecycle::NodetoolOp;
use ringmaster::node::ClusterTopology;
use ringmaster::orchestrator::RollbackPolicy;
use ringmaster::readiness::StartWait;
use ringmaster::shutdown::StopReport;
use ringmaster_protocol::StubServer;

#[tokio::test]
async fn test_single_node_start_and_stop() {
    let ctx = TestContext::new();
    let launcher = Arc::new(MockLauncher::new());
    let orchestrator = ctx.orchestrator(launcher.clone(), RollbackPolicy::LeaveRunning);
    let topology = ClusterTopology::single(&ctx.config);
    let node = topology.management_node();

    let started = orchestrator.start_node(node).await.unwrap();
    assert_eq!(started.handles.len(), 1);
    assert!(started.clean);
    assert!(started.elapsed < Duration::from_secs(30));
    assert!(node.config_file().is_file());

    let handle = &started.handles[0];
    assert!(handle.is_running());

    let report = orchestrator.stop_node(node).await;
    assert_eq!(report, StopReport::Stopped);

    let exit = handle.wait_for_exit().await;
    assert!(!exit.is_success());
    assert_eq!(launcher.stopped_nodes().await, vec!["node1"]);
}

#[tokio::test]
async fn test_restart_reuses_home() {
    let ctx = TestContext::new();
    let launcher = Arc::new(MockLauncher::new());
    let orchestrator = ctx.orchestrator(launcher.clone(), RollbackPolicy::LeaveRunning);
    let topology = ClusterTopology::single(&ctx.config);
    let node = topology.management_node();

    let first = orchestrator.start_node(node).await.unwrap();
    assert!(first.clean);
    assert_eq!(orchestrator.stop_node(node).await, StopReport::Stopped);

    let second = orchestrator.start_node(node).await.unwrap();
    assert!(!second.clean);
    assert_eq!(orchestrator.stop_node(node).await, StopReport::Stopped);
}

#[tokio::test]
async fn test_stop_when_nothing_runs() {
    let ctx = TestContext::new();
    let launcher = Arc::new(MockLauncher::new());
    let orchestrator = ctx.orchestrator(launcher, RollbackPolicy::LeaveRunning);
    let topology = ClusterTopology::single(&ctx.config);

    let report = orchestrator.stop_node(topology.management_node()).await;
    assert_eq!(report, StopReport::NotRunning);
}

#[tokio::test]
async fn test_cluster_starts_in_order_and_stops_in_reverse() {
    let ctx = TestContext::new().with_cluster_size(3);
    let launcher = Arc::new(MockLauncher::new());
    let orchestrator = ctx.orchestrator(launcher.clone(), RollbackPolicy::LeaveRunning);
    let topology = ClusterTopology::plan(&ctx.config).unwrap();

    let started = orchestrator.start_cluster(&topology).await.unwrap();
    assert_eq!(started.handles.len(), 3);
    assert_eq!(
        launcher.started_nodes().await,
        vec!["node1", "node2", "node3"]
    );
    for node in topology.nodes() {
        assert!(node.config_file().is_file(), "{} not materialized", node.name());
    }

    let reports = orchestrator.stop_cluster(&topology).await;
    assert_eq!(reports, vec![StopReport::Stopped; 3]);
    assert_eq!(
        launcher.stopped_nodes().await,
        vec!["node3", "node2", "node1"]
    );
}

#[tokio::test]
async fn test_start_timeout_stops_the_node() {
    let ctx = TestContext::new().with_start_wait(StartWait::Bounded(Duration::from_secs(1)));
    let launcher = Arc::new(MockLauncher::never_ready());
    let orchestrator = ctx.orchestrator(launcher.clone(), RollbackPolicy::LeaveRunning);
    let topology = ClusterTopology::single(&ctx.config);

    let err = orchestrator
        .start_node(topology.management_node())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StartTimeout { seconds: 1 }));
    assert_eq!(wait_for_stops(&launcher, 1).await, vec!["node1"]);
}

#[tokio::test]
async fn test_no_wait_returns_before_ready() {
    let ctx = TestContext::new().with_start_wait(StartWait::NoWait);
    let launcher = Arc::new(MockLauncher::never_ready());
    let orchestrator = ctx.orchestrator(launcher.clone(), RollbackPolicy::LeaveRunning);
    let topology = ClusterTopology::single(&ctx.config);
    let node = topology.management_node();

    let started = orchestrator.start_node(node).await.unwrap();
    assert_eq!(started.handles.len(), 1);
    assert!(launcher.stopped_nodes().await.is_empty());

    orchestrator.stop_node(node).await;
}

#[tokio::test]
async fn test_failed_cluster_start_leaves_others_running() {
    let ctx = TestContext::new()
        .with_cluster_size(2)
        .with_start_wait(StartWait::Bounded(Duration::from_secs(1)));
    let launcher = Arc::new(MockLauncher::new().with_unready_node(1));
    let orchestrator = ctx.orchestrator(launcher.clone(), RollbackPolicy::LeaveRunning);
    let topology = ClusterTopology::plan(&ctx.config).unwrap();

    let err = orchestrator.start_cluster(&topology).await.unwrap_err();
    assert!(matches!(err, Error::StartTimeout { .. }));
    assert_eq!(wait_for_stops(&launcher, 1).await, vec!["node2"]);

    // node1 is still serving
    let node1 = &topology.nodes()[0];
    assert_eq!(orchestrator.stop_node(node1).await, StopReport::Stopped);
}

#[tokio::test]
async fn test_failed_cluster_start_rolls_back() {
    let ctx = TestContext::new()
        .with_cluster_size(2)
        .with_start_wait(StartWait::Bounded(Duration::from_secs(1)));
    let launcher = Arc::new(MockLauncher::new().with_unready_node(1));
    let orchestrator = ctx.orchestrator(launcher.clone(), RollbackPolicy::StopStarted);
    let topology = ClusterTopology::plan(&ctx.config).unwrap();

    let err = orchestrator.start_cluster(&topology).await.unwrap_err();
    assert!(matches!(err, Error::StartTimeout { .. }));

    let mut stopped = wait_for_stops(&launcher, 2).await;
    stopped.sort();
    assert_eq!(stopped, vec!["node1", "node2"]);
}

#[tokio::test]
async fn test_launch_failure_surfaces() {
    let ctx = TestContext::new();
    let launcher = Arc::new(MockLauncher::failing());
    let orchestrator = ctx.orchestrator(launcher.clone(), RollbackPolicy::StopStarted);
    let topology = ClusterTopology::single(&ctx.config);

    let err = orchestrator
        .start_node(topology.management_node())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Launch(_)));
    assert_eq!(launcher.started_nodes().await, vec!["node1"]);
}

#[tokio::test]
async fn test_invalid_cluster_size_spawns_nothing() {
    let ctx = TestContext::new().with_cluster_size(0);
    let launcher = Arc::new(MockLauncher::new());
    let lifecycle = ctx.lifecycle();

    let result = lifecycle.start_cluster(launcher.clone()).await;
    assert!(result.is_err());
    assert!(launcher.started_nodes().await.is_empty());
    assert!(!ctx.data_dir.join("cassandra-node1").exists());
}

#[tokio::test]
async fn test_lifecycle_loads_script_after_clean_start() {
    let mut ctx = TestContext::new();
    let script = ctx.write_file(
        "load.cql",
        "CREATE KEYSPACE ks WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 1};\n\
         -- seed data\n\
         INSERT INTO ks.t (id) VALUES (1);\n",
    );
    ctx.config.load_script = Some(script);

    let launcher = Arc::new(MockLauncher::new());
    let lifecycle = ctx.lifecycle();
    let started = lifecycle.start(launcher.clone()).await.unwrap().unwrap();
    assert!(started.clean);

    let executed = launcher.executed("node1").await;
    assert!(executed.iter().any(|s| s.starts_with("CREATE KEYSPACE ks")));
    assert!(executed.iter().any(|s| s.starts_with("INSERT INTO ks.t")));
    assert!(!executed.iter().any(|s| s.contains("seed data")));

    let report = lifecycle.stop().await.unwrap();
    assert_eq!(report, Some(StopReport::Stopped));
}

#[tokio::test]
async fn test_lifecycle_run_until_stop_requested() {
    let ctx = TestContext::new();
    let launcher = Arc::new(MockLauncher::new());
    let lifecycle = ctx.lifecycle();

    let exit = lifecycle
        .run(launcher.clone(), async { StopTrigger::Enter })
        .await
        .unwrap()
        .unwrap();
    assert!(!exit.is_success());
    assert_eq!(launcher.stopped_nodes().await, vec!["node1"]);
}

#[tokio::test]
async fn test_lifecycle_skip_does_nothing() {
    let mut ctx = TestContext::new();
    ctx.config.skip = true;
    let launcher = Arc::new(MockLauncher::new());
    let lifecycle = ctx.lifecycle();

    assert!(lifecycle.start(launcher.clone()).await.unwrap().is_none());
    assert!(lifecycle.stop().await.unwrap().is_none());
    assert!(launcher.started_nodes().await.is_empty());
}

#[tokio::test]
async fn test_nodetool_runs_against_management_node() {
    let mut ctx = TestContext::new();
    ctx.config.keyspace = Some("ks".to_string());
    let launcher = Arc::new(MockLauncher::new());
    let lifecycle = ctx.lifecycle();

    let exit = lifecycle
        .nodetool(
            launcher.clone(),
            NodetoolOp::Compact,
            None,
            vec!["users".to_string()],
        )
        .await
        .unwrap();
    assert!(exit.unwrap().is_success());

    let completions = launcher.completions().await;
    assert_eq!(completions.len(), 1);
    let args = &completions[0].args;
    assert!(args.iter().any(|a| a == ringmaster::command::NODETOOL_MAIN_CLASS));
    assert_eq!(&args[args.len() - 3..], ["compact", "ks", "users"]);
    assert!(ctx.config.home_dir.join("conf").is_dir());
}

#[tokio::test]
async fn test_nodetool_failure_is_error() {
    let ctx = TestContext::new();
    let mut launcher = MockLauncher::new();
    launcher.utility_exit_code = 2;
    let launcher: Arc<dyn Launcher> = Arc::new(launcher);

    let result = ctx
        .lifecycle()
        .nodetool(launcher, NodetoolOp::Flush, None, Vec::new())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cql_exec_against_running_node() {
    let ctx = TestContext::new();
    let addr = SocketAddr::new(ctx.config.rpc_address, ctx.config.native_transport_port);
    let stub = StubServer::builder()
        .fail_statements_containing("broken")
        .bind(addr)
        .await
        .unwrap();
    let lifecycle = ctx.lifecycle();

    let results = lifecycle
        .cql_exec(Some("SELECT release_version FROM system.local; SELECT now() FROM system.local"), None)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(stub.executed().await.len(), 2);

    let err = lifecycle
        .cql_exec(Some("SELECT * FROM broken"), None)
        .await
        .unwrap_err();
    assert!(
        format!("{err:#}").contains("There was a problem calling Apache Cassandra's CQL API"),
        "unexpected error: {err:#}"
    );

    stub.shutdown().await;
}

#[tokio::test]
async fn test_load_failure_can_be_ignored() {
    let mut ctx = TestContext::new();
    let script = ctx.write_file("broken.cql", "CREATE TABLE broken (id int PRIMARY KEY);\n");
    let addr = SocketAddr::new(ctx.config.rpc_address, ctx.config.native_transport_port);
    let stub = StubServer::builder()
        .fail_statements_containing("broken")
        .bind(addr)
        .await
        .unwrap();

    let strict = ctx.lifecycle();
    assert!(strict.load(Some(script.clone())).await.is_err());

    ctx.config.load_failure_ignore = true;
    let lenient = ctx.lifecycle();
    lenient.load(Some(script)).await.unwrap();

    stub.shutdown().await;
}

#[tokio::test]
async fn test_server_exit_before_ready_is_start_failure() {
    let ctx = TestContext::new();
    let launcher = Arc::new(MockLauncher::crashing(ProcessExit {
        code: Some(1),
        signal: None,
    }));
    let orchestrator = ctx.orchestrator(launcher, RollbackPolicy::LeaveRunning);
    let topology = ClusterTopology::single(&ctx.config);

    let started = Instant::now();
    let err = orchestrator
        .start_node(topology.management_node())
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    match err {
        Error::Launch(LaunchError::StartFailed(message)) => {
            assert!(message.starts_with("node1 exited with exit code 1"), "{message}");
            assert!(message.contains("Could not find or load main class"), "{message}");
        }
        other => panic!("expected StartFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_java_home_launches_nothing() {
    let mut ctx = TestContext::new();
    ctx.config.java_home = Some(ctx.data_dir.join("missing-jdk"));
    let launcher = Arc::new(MockLauncher::new());
    let orchestrator = ctx.orchestrator(launcher.clone(), RollbackPolicy::LeaveRunning);
    let topology = ClusterTopology::single(&ctx.config);

    let err = orchestrator
        .start_node(topology.management_node())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Launch(LaunchError::ExecutableNotFound(_))
    ));
    assert!(launcher.started_nodes().await.is_empty());
}

#[tokio::test]
async fn test_cql_exec_missing_script_falls_back_to_statement() {
    let ctx = TestContext::new();
    let addr = SocketAddr::new(ctx.config.rpc_address, ctx.config.native_transport_port);
    let stub = StubServer::builder().bind(addr).await.unwrap();
    let missing = ctx.data_dir.join("missing.cql");

    let results = ctx
        .lifecycle()
        .cql_exec(Some("SELECT release_version FROM system.local"), Some(&missing))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(
        stub.executed().await,
        vec!["SELECT release_version FROM system.local"]
    );

    stub.shutdown().await;
}

#[tokio::test]
async fn test_drop_tables_and_keyspace() {
    let mut ctx = TestContext::new();
    ctx.config.keyspace = Some("ks".to_string());
    let addr = SocketAddr::new(ctx.config.rpc_address, ctx.config.native_transport_port);
    let stub = StubServer::builder().bind(addr).await.unwrap();
    let lifecycle = ctx.lifecycle();

    lifecycle
        .drop_tables(&["users".to_string(), "events".to_string()])
        .await
        .unwrap();
    lifecycle.drop_tables(&[]).await.unwrap();

    assert_eq!(
        stub.executed().await,
        vec![
            "DROP TABLE IF EXISTS ks.users",
            "DROP TABLE IF EXISTS ks.events",
            "DROP KEYSPACE IF EXISTS ks",
        ]
    );

    stub.shutdown().await;
}

#[tokio::test]
async fn test_truncate_table() {
    let mut ctx = TestContext::new();
    ctx.config.keyspace = Some("ks".to_string());
    let addr = SocketAddr::new(ctx.config.rpc_address, ctx.config.native_transport_port);
    let stub = StubServer::builder().bind(addr).await.unwrap();

    ctx.lifecycle().truncate("users").await.unwrap();
    assert_eq!(stub.executed().await, vec!["TRUNCATE ks.users"]);

    stub.shutdown().await;
}

#[tokio::test]
async fn test_drop_without_keyspace_sends_nothing() {
    let ctx = TestContext::new();
    let addr = SocketAddr::new(ctx.config.rpc_address, ctx.config.native_transport_port);
    let stub = StubServer::builder().bind(addr).await.unwrap();

    assert!(ctx.lifecycle().drop_tables(&[]).await.is_err());
    assert!(ctx.lifecycle().truncate("users").await.is_err());
    assert!(stub.executed().await.is_empty());

    stub.shutdown().await;
}
