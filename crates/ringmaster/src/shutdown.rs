// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Coordinated node shutdown.
//!
//! Sends the stop command over the node's control socket, then polls the
//! native transport port until it stops accepting connections. Shutdown is
//! advisory: every outcome is reported, none is an error.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{error, info, warn};

use crate::control_socket::StopCommand;
use crate::node::NodeSpec;
use crate::readiness::ReadinessPoller;

/// How long to wait for a node to go away after the stop command.
pub const DEFAULT_STOP_CEILING: Duration = Duration::from_secs(30);

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened when stopping a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReport {
    /// Nothing was listening on the control port.
    NotRunning,
    /// The node stopped accepting client connections.
    Stopped,
    /// The node was still reachable when the ceiling passed.
    GaveUp,
    /// The stop command could not be sent.
    DeliveryFailed,
}

/// Stops nodes through their control socket.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    poller: ReadinessPoller,
    connect_timeout: Duration,
    ceiling: Duration,
}

impl ShutdownCoordinator {
    pub fn new(poller: ReadinessPoller) -> Self {
        Self {
            poller,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ceiling: DEFAULT_STOP_CEILING,
        }
    }

    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Stop one node. Stopping a node that is not running is not an error.
    pub async fn stop(&self, node: &NodeSpec) -> StopReport {
        let control = SocketAddr::new(node.stop_address(), node.stop_port);
        let command = StopCommand::new(node.stop_key.as_str());

        match self.deliver(control, &command).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                info!(node = %node.name(), addr = %control, "Cassandra not running!");
                return StopReport::NotRunning;
            }
            Err(e) => {
                error!(
                    node = %node.name(),
                    addr = %control,
                    error = %e,
                    "Could not send stop command"
                );
                return StopReport::DeliveryFailed;
            }
        }

        let host = node.rpc_address.to_string();
        if self
            .poller
            .wait_until_stopped(&host, node.native_transport_port, self.ceiling)
            .await
        {
            info!(node = %node.name(), "Cassandra has stopped.");
            StopReport::Stopped
        } else {
            warn!(
                node = %node.name(),
                ceiling_secs = self.ceiling.as_secs(),
                "Gave up waiting for Cassandra to stop."
            );
            StopReport::GaveUp
        }
    }

    async fn deliver(&self, addr: SocketAddr, command: &StopCommand) -> std::io::Result<()> {
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                )
            })??;
        stream.write_all(&command.encode()).await?;
        stream.flush().await?;
        stream.shutdown().await?;
        Ok(())
    }
}
