// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client tests against the in-process stub server.

use std::net::SocketAddr;
use std::time::Duration;

use ringmaster_protocol::{
    ClientConfig, CqlClient, ErrorCode, ProtocolError, QueryResult, StubServer,
};

fn any_port() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

fn quick() -> ClientConfig {
    ClientConfig {
        connect_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_secs(2),
    }
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_startup_and_cluster_name() {
    let stub = StubServer::builder()
        .cluster_name("ringmaster-it")
        .bind(any_port())
        .await
        .unwrap();

    let mut client = CqlClient::connect(stub.local_addr(), quick()).await.unwrap();
    client.startup().await.unwrap();
    assert_eq!(client.cluster_name().await.unwrap(), "ringmaster-it");

    stub.shutdown().await;
}

#[tokio::test]
async fn test_options_lists_cql_version() {
    let stub = StubServer::builder().bind(any_port()).await.unwrap();
    let mut client = CqlClient::connect(stub.local_addr(), quick()).await.unwrap();

    let supported = client.options().await.unwrap();
    assert!(supported.contains_key("CQL_VERSION"));

    stub.shutdown().await;
}

#[tokio::test]
async fn test_query_before_startup_is_protocol_error() {
    let stub = StubServer::builder().bind(any_port()).await.unwrap();
    let mut client = CqlClient::connect(stub.local_addr(), quick()).await.unwrap();

    let err = client.query("SELECT now() FROM system.local").await.unwrap_err();
    assert_eq!(err.server_code(), Some(ErrorCode::Protocol));
    assert!(!err.is_transport());

    stub.shutdown().await;
}

#[tokio::test]
async fn test_startup_error_is_reported_as_server_error() {
    let stub = StubServer::builder()
        .startup_error(ErrorCode::IsBootstrapping, "still joining the ring")
        .bind(any_port())
        .await
        .unwrap();
    let mut client = CqlClient::connect(stub.local_addr(), quick()).await.unwrap();

    match client.startup().await {
        Err(ProtocolError::Server { code, message }) => {
            assert_eq!(code, ErrorCode::IsBootstrapping);
            assert!(message.contains("joining"));
        }
        other => panic!("expected server error, got {other:?}"),
    }

    stub.shutdown().await;
}

// ============================================================================
// Statements
// ============================================================================

#[tokio::test]
async fn test_use_keyspace_and_void_statements() {
    let stub = StubServer::builder().bind(any_port()).await.unwrap();
    let mut client = CqlClient::connect(stub.local_addr(), quick()).await.unwrap();
    client.startup().await.unwrap();

    client.use_keyspace("inventory").await.unwrap();
    let result = client
        .query("INSERT INTO items (id) VALUES (1)")
        .await
        .unwrap();
    assert!(matches!(result, QueryResult::Void));

    let executed = stub.executed().await;
    assert_eq!(
        executed,
        vec!["USE inventory", "INSERT INTO items (id) VALUES (1)"]
    );

    stub.shutdown().await;
}

#[tokio::test]
async fn test_failing_statement_carries_invalid_code() {
    let stub = StubServer::builder()
        .fail_statements_containing("no_such_table")
        .bind(any_port())
        .await
        .unwrap();
    let mut client = CqlClient::connect(stub.local_addr(), quick()).await.unwrap();
    client.startup().await.unwrap();

    let err = client
        .query("SELECT * FROM no_such_table")
        .await
        .unwrap_err();
    assert_eq!(err.server_code(), Some(ErrorCode::Invalid));

    // the connection stays usable after a server error
    assert_eq!(client.cluster_name().await.unwrap(), "Test Cluster");

    stub.shutdown().await;
}

// ============================================================================
// Transport failures
// ============================================================================

#[tokio::test]
async fn test_connect_refused_is_transport_error() {
    let err = CqlClient::connect(free_addr(), quick()).await.err().unwrap();
    assert!(err.is_transport(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_shutdown_refuses_new_connections() {
    let stub = StubServer::builder().bind(any_port()).await.unwrap();
    let addr = stub.local_addr();
    assert!(stub.is_running());

    stub.shutdown().await;
    assert!(!stub.is_running());

    let err = CqlClient::connect(addr, quick()).await.err().unwrap();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_shutdown_drops_open_connections() {
    let stub = StubServer::builder().bind(any_port()).await.unwrap();
    let mut client = CqlClient::connect(stub.local_addr(), quick()).await.unwrap();
    client.startup().await.unwrap();

    stub.shutdown().await;

    let err = client.cluster_name().await.unwrap_err();
    assert!(err.is_transport(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_resolve_failure() {
    let err = CqlClient::connect_host("host.invalid", 9042, quick())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ProtocolError::Resolve(_)));
}
