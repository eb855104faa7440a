// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process CQL responder.
//!
//! Speaks just enough of the protocol for readiness probing and statement
//! execution: OPTIONS, STARTUP and QUERY. Used by tests and by the mock
//! launcher in place of a real node.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::codec::{get_long_string, put_bytes, put_string, put_string_multimap};
use crate::error::ErrorCode;
use crate::frame::{Frame, FrameError, Opcode, read_frame, write_frame};
use crate::result::ColumnType;

const KIND_VOID: i32 = 0x0001;
const KIND_ROWS: i32 = 0x0002;
const KIND_SET_KEYSPACE: i32 = 0x0003;
const FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;

#[derive(Debug, Clone)]
struct Behaviour {
    cluster_name: String,
    startup_error: Option<(ErrorCode, String)>,
    fail_marker: Option<String>,
}

/// Builder for [`StubServer`].
#[derive(Debug, Clone)]
pub struct StubServerBuilder {
    behaviour: Behaviour,
}

impl Default for StubServerBuilder {
    fn default() -> Self {
        Self {
            behaviour: Behaviour {
                cluster_name: "Test Cluster".to_string(),
                startup_error: None,
                fail_marker: None,
            },
        }
    }
}

impl StubServerBuilder {
    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.behaviour.cluster_name = name.into();
        self
    }

    /// Answer every STARTUP with an error frame instead of READY.
    pub fn startup_error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
        self.behaviour.startup_error = Some((code, message.into()));
        self
    }

    /// Fail any statement containing `marker` with an `Invalid` error.
    pub fn fail_statements_containing(mut self, marker: impl Into<String>) -> Self {
        self.behaviour.fail_marker = Some(marker.into());
        self
    }

    /// Bind and start accepting connections.
    pub async fn bind(self, addr: SocketAddr) -> std::io::Result<StubServer> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let executed = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn(accept_loop(
            listener,
            Arc::new(self.behaviour),
            executed.clone(),
            shutdown_rx,
        ));

        debug!(addr = %local_addr, "Stub CQL server listening");
        Ok(StubServer {
            addr: local_addr,
            shutdown_tx,
            task: Mutex::new(Some(task)),
            executed,
        })
    }
}

/// A running stub server.
pub struct StubServer {
    addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub fn builder() -> StubServerBuilder {
        StubServerBuilder::default()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Statements received so far, in arrival order.
    pub async fn executed(&self) -> Vec<String> {
        self.executed.lock().await.clone()
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown_tx.borrow()
    }

    /// Close the listener and every open connection. Returns once new
    /// connection attempts are refused.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.lock().await.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Stub server task failed");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    behaviour: Arc<Behaviour>,
    executed: Arc<Mutex<Vec<String>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Stub accepted connection");
                    connections.spawn(serve_connection(
                        stream,
                        behaviour.clone(),
                        executed.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "Stub accept failed"),
            },

            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    drop(listener);
    connections.shutdown().await;
}

async fn serve_connection(
    stream: TcpStream,
    behaviour: Arc<Behaviour>,
    executed: Arc<Mutex<Vec<String>>>,
) {
    let (read, mut write) = stream.into_split();
    let mut read = BufReader::new(read);
    let mut started = false;

    loop {
        let request = match read_frame(&mut read).await {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => break,
            Err(e) => {
                debug!(error = %e, "Stub read failed");
                break;
            }
        };

        let (opcode, body) = respond(&behaviour, &executed, &mut started, &request).await;
        let response = Frame::response(request.stream, opcode, body);
        if let Err(e) = write_frame(&mut write, &response).await {
            debug!(error = %e, "Stub write failed");
            break;
        }
    }
}

async fn respond(
    behaviour: &Behaviour,
    executed: &Mutex<Vec<String>>,
    started: &mut bool,
    request: &Frame,
) -> (Opcode, Bytes) {
    match request.opcode {
        Opcode::Options => {
            let mut body = BytesMut::new();
            put_string_multimap(
                &mut body,
                &[("CQL_VERSION", &["3.4.5"][..]), ("COMPRESSION", &[][..])],
            );
            (Opcode::Supported, body.freeze())
        }
        Opcode::Startup => match &behaviour.startup_error {
            Some((code, message)) => error_body(*code, message),
            None => {
                *started = true;
                (Opcode::Ready, Bytes::new())
            }
        },
        Opcode::Query if !*started => error_body(
            ErrorCode::Protocol,
            "STARTUP must be the first message on a connection",
        ),
        Opcode::Query => {
            let mut body = request.body.clone();
            let statement = match get_long_string(&mut body) {
                Ok(statement) => statement,
                Err(e) => return error_body(ErrorCode::Protocol, &e.to_string()),
            };
            executed.lock().await.push(statement.clone());
            query_response(behaviour, &statement)
        }
        other => error_body(
            ErrorCode::Protocol,
            &format!("stub does not handle {other:?}"),
        ),
    }
}

fn query_response(behaviour: &Behaviour, statement: &str) -> (Opcode, Bytes) {
    if let Some(marker) = &behaviour.fail_marker
        && statement.contains(marker.as_str())
    {
        return error_body(ErrorCode::Invalid, &format!("rejected statement: {statement}"));
    }

    let normalized = statement.trim().to_ascii_lowercase();
    let mut body = BytesMut::new();
    if normalized.starts_with("select") && normalized.contains("cluster_name") {
        body.put_i32(KIND_ROWS);
        body.put_i32(FLAG_GLOBAL_TABLES_SPEC);
        body.put_i32(1);
        put_string(&mut body, "system");
        put_string(&mut body, "local");
        put_string(&mut body, "cluster_name");
        body.put_u16(ColumnType::Varchar.id());
        body.put_i32(1);
        put_bytes(&mut body, Some(behaviour.cluster_name.as_bytes()));
    } else if let Some(keyspace) = normalized.strip_prefix("use ") {
        body.put_i32(KIND_SET_KEYSPACE);
        put_string(&mut body, keyspace.trim().trim_matches('"'));
    } else {
        body.put_i32(KIND_VOID);
    }
    (Opcode::Result, body.freeze())
}

fn error_body(code: ErrorCode, message: &str) -> (Opcode, Bytes) {
    let mut body = BytesMut::new();
    body.put_i32(code.code());
    put_string(&mut body, message);
    (Opcode::Error, body.freeze())
}
