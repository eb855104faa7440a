// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Loopback control socket for stopping a node.
//!
//! The process hosting a node listens on a loopback port for a two-line,
//! `\r\n`-terminated request:
//!
//! ```text
//! <stop key>
//! stop
//! ```
//!
//! Nothing is ever written back. A wrong key or an unknown command just
//! closes the connection and the listener keeps waiting. A correct key
//! followed by `stop` closes the listener and runs the termination callback.
//!
//! The key is a shared secret that keeps stray clients (or a second node's
//! stop command) from killing the wrong process. It is not authentication:
//! anything on the local host able to read the key can stop the node, which
//! is why the listener refuses to bind anywhere but loopback.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::error::Result;

/// The only command the control socket understands.
pub const STOP_COMMAND: &str = "stop";

/// How long a client may take to send each line.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_LINE_LEN: u64 = 4096;

/// Invoked once, after the listener has been closed.
pub type TerminationCallback = Box<dyn FnOnce() + Send + 'static>;

/// A stop request as written on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopCommand {
    stop_key: String,
}

impl StopCommand {
    pub fn new(stop_key: impl Into<String>) -> Self {
        Self {
            stop_key: stop_key.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        format!("{}\r\n{}\r\n", self.stop_key, STOP_COMMAND).into_bytes()
    }
}

/// What a single connection asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Request {
    Stop,
    WrongKey,
    Unsupported(String),
    Incomplete,
}

/// Serves stop requests for the process it lives in.
pub struct ControlSocketServer {
    listener: TcpListener,
    stop_key: String,
    on_stop: TerminationCallback,
    read_timeout: Duration,
}

impl ControlSocketServer {
    /// Bind `host:port`. `host` must be a loopback address and the key must
    /// not be empty.
    pub async fn bind(
        host: IpAddr,
        port: u16,
        stop_key: impl Into<String>,
        on_stop: TerminationCallback,
    ) -> Result<Self> {
        if !host.is_loopback() {
            return Err(ConfigError::NonLoopbackControlHost(host).into());
        }
        let stop_key = stop_key.into();
        if stop_key.is_empty() {
            return Err(ConfigError::MissingStopKey.into());
        }

        let socket = match host {
            IpAddr::V4(_) => tokio::net::TcpSocket::new_v4()?,
            IpAddr::V6(_) => tokio::net::TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(SocketAddr::new(host, port))?;
        // one pending client is plenty for a stop channel
        let listener = socket.listen(1)?;

        Ok(Self {
            listener,
            stop_key,
            on_stop,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections one at a time until a valid stop request arrives.
    pub async fn run(self) {
        let Self {
            listener,
            stop_key,
            on_stop,
            read_timeout,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            debug!(%addr, "Control socket listening");
        }

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Control socket accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            match read_request(stream, &stop_key, read_timeout).await {
                Request::Stop => {
                    drop(listener);
                    info!(%peer, "Killing Cassandra");
                    on_stop();
                    return;
                }
                Request::WrongKey => debug!(%peer, "Ignoring control request with wrong key"),
                Request::Unsupported(command) => {
                    warn!(%peer, command = %command, "Unsupported monitor operation")
                }
                Request::Incomplete => debug!(%peer, "Control connection closed early"),
            }
        }
    }

    /// Run on a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

async fn read_request(stream: TcpStream, stop_key: &str, timeout: Duration) -> Request {
    let mut reader = BufReader::new(stream);

    let Some(key) = read_line(&mut reader, timeout).await else {
        return Request::Incomplete;
    };
    if key != stop_key {
        return Request::WrongKey;
    }

    match read_line(&mut reader, timeout).await {
        Some(command) if command == STOP_COMMAND => Request::Stop,
        Some(command) => Request::Unsupported(command),
        None => Request::Incomplete,
    }
}

/// One line without its terminator; `None` on EOF, timeout or error.
async fn read_line(reader: &mut BufReader<TcpStream>, timeout: Duration) -> Option<String> {
    let mut line = String::new();
    let mut limited = (&mut *reader).take(MAX_LINE_LEN);
    match tokio::time::timeout(timeout, limited.read_line(&mut line)).await {
        Ok(Ok(0)) => None,
        Ok(Ok(_)) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        Ok(Err(e)) => {
            debug!(error = %e, "Control socket read failed");
            None
        }
        Err(_) => {
            debug!("Control socket read timed out");
            None
        }
    }
}
