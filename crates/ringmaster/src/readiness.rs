// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Readiness polling.
//!
//! A node counts as ready once it completes a CQL handshake and names its
//! cluster. Transport failures and protocol errors after connect both mean
//! "not yet" and are retried every poll interval; only conditions retrying
//! cannot fix end the wait early.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ringmaster_protocol::{ClientConfig, CqlClient, ProtocolError};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::error::{Error, Result};

/// Default pause between readiness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default upper bound on a single readiness check.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for a node to become ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartWait {
    /// Do not poll at all.
    NoWait,
    /// Poll until the node answers, however long that takes.
    Unbounded,
    /// Poll until the node answers or the duration elapses.
    Bounded(Duration),
}

impl StartWait {
    /// Legacy seconds convention: negative means no wait, zero means forever.
    pub fn from_seconds(seconds: i64) -> Self {
        match seconds {
            s if s < 0 => StartWait::NoWait,
            0 => StartWait::Unbounded,
            s => StartWait::Bounded(Duration::from_secs(s as u64)),
        }
    }

    /// Wait window in whole seconds, when bounded.
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            StartWait::Bounded(d) => Some(d.as_secs()),
            _ => None,
        }
    }
}

impl fmt::Display for StartWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartWait::NoWait => write!(f, "no wait"),
            StartWait::Unbounded => write!(f, "unbounded"),
            StartWait::Bounded(d) => write!(f, "{}s", d.as_secs()),
        }
    }
}

/// Why a readiness check did not see a ready node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckFailure {
    /// Nothing accepted the connection, or it dropped or went silent.
    Unreachable(String),
    /// Something answered but could not complete the handshake or query.
    Protocol(String),
}

/// Result of one readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessOutcome {
    /// The node answered with its cluster name.
    Ready(String),
    /// Retry later.
    NotReadyYet(CheckFailure),
    /// Retrying will not help.
    Failed(String),
}

/// A single readiness check against `host:port`.
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    async fn check(&self, host: &str, port: u16, timeout: Duration) -> ReadinessOutcome;
}

/// Check over the CQL native protocol: STARTUP, then read the cluster name.
#[derive(Debug, Clone, Copy, Default)]
pub struct CqlCheck;

#[async_trait]
impl ReadinessCheck for CqlCheck {
    async fn check(&self, host: &str, port: u16, timeout: Duration) -> ReadinessOutcome {
        let config = ClientConfig {
            connect_timeout: timeout,
            request_timeout: timeout,
        };
        let attempt = async {
            let mut client = CqlClient::connect_host(host, port, config).await?;
            client.startup().await?;
            client.cluster_name().await
        };
        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(name)) => ReadinessOutcome::Ready(name),
            Ok(Err(e)) => classify(e),
            Err(_) => ReadinessOutcome::NotReadyYet(CheckFailure::Unreachable(format!(
                "readiness check timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

fn classify(err: ProtocolError) -> ReadinessOutcome {
    match err {
        ProtocolError::Resolve(_) | ProtocolError::AuthenticationRequired(_) => {
            ReadinessOutcome::Failed(err.to_string())
        }
        e if e.is_transport() => {
            ReadinessOutcome::NotReadyYet(CheckFailure::Unreachable(e.to_string()))
        }
        e => ReadinessOutcome::NotReadyYet(CheckFailure::Protocol(e.to_string())),
    }
}

/// Repeats a [`ReadinessCheck`] until a node is ready, or, in reverse, until it is gone.
#[derive(Clone)]
pub struct ReadinessPoller {
    check: Arc<dyn ReadinessCheck>,
    poll_interval: Duration,
    attempt_timeout: Duration,
}

impl ReadinessPoller {
    pub fn new(check: Arc<dyn ReadinessCheck>) -> Self {
        Self {
            check,
            poll_interval: DEFAULT_POLL_INTERVAL,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Poller using the CQL handshake.
    pub fn cql() -> Self {
        Self::new(Arc::new(CqlCheck))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait until the node at `host:port` answers.
    ///
    /// Returns `Ok(true)` as soon as a check succeeds (or immediately for
    /// [`StartWait::NoWait`]), `Ok(false)` once the wait window has passed,
    /// and `Err` only when a check reports a failure retrying cannot fix.
    /// [`StartWait::Unbounded`] can block forever.
    pub async fn wait_until_ready(&self, host: &str, port: u16, wait: StartWait) -> Result<bool> {
        let deadline = match wait {
            StartWait::NoWait => return Ok(true),
            StartWait::Unbounded => None,
            StartWait::Bounded(window) => Some(Instant::now() + window),
        };

        let mut attempt: u32 = 0;
        while deadline.is_none_or(|d| Instant::now() < d) {
            attempt += 1;
            let timeout = self.attempt_budget(deadline);
            match self.check.check(host, port, timeout).await {
                ReadinessOutcome::Ready(cluster_name) => {
                    info!(
                        host,
                        port,
                        attempt,
                        "Cassandra cluster \"{}\" started.",
                        cluster_name
                    );
                    return Ok(true);
                }
                ReadinessOutcome::NotReadyYet(CheckFailure::Unreachable(reason)) => {
                    trace!(host, port, attempt, reason = %reason, "Node not accepting connections yet");
                }
                ReadinessOutcome::NotReadyYet(CheckFailure::Protocol(reason)) => {
                    debug!(host, port, attempt, reason = %reason, "Node answered but is not ready");
                }
                ReadinessOutcome::Failed(reason) => {
                    return Err(Error::Readiness(format!("{host}:{port}: {reason}")));
                }
            }
            self.pause(deadline).await;
        }

        debug!(host, port, attempt, wait = %wait, "Gave up waiting for node");
        Ok(false)
    }

    /// Poll until `host:port` stops accepting connections, for at most `ceiling`.
    ///
    /// Returns `true` once a check finds nothing listening, `false` if the
    /// node still answered when the ceiling passed.
    pub async fn wait_until_stopped(&self, host: &str, port: u16, ceiling: Duration) -> bool {
        let deadline = Some(Instant::now() + ceiling);
        while deadline.is_some_and(|d| Instant::now() < d) {
            let timeout = self.attempt_budget(deadline);
            match self.check.check(host, port, timeout).await {
                ReadinessOutcome::NotReadyYet(CheckFailure::Unreachable(reason)) => {
                    debug!(host, port, reason = %reason, "Node no longer reachable");
                    return true;
                }
                ReadinessOutcome::Ready(_) => {
                    trace!(host, port, "Node still answering");
                }
                ReadinessOutcome::NotReadyYet(CheckFailure::Protocol(reason))
                | ReadinessOutcome::Failed(reason) => {
                    debug!(host, port, reason = %reason, "Node still accepting connections");
                }
            }
            self.pause(deadline).await;
        }
        false
    }

    fn attempt_budget(&self, deadline: Option<Instant>) -> Duration {
        match deadline {
            Some(d) => self
                .attempt_timeout
                .min(d.saturating_duration_since(Instant::now()))
                .max(Duration::from_millis(1)),
            None => self.attempt_timeout,
        }
    }

    async fn pause(&self, deadline: Option<Instant>) {
        let pause = match deadline {
            Some(d) => self.poll_interval.min(d.saturating_duration_since(Instant::now())),
            None => self.poll_interval,
        };
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}
