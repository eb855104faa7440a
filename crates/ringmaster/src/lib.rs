// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ringmaster - local Cassandra lifecycle management
//!
//! Launches, configures, health-checks and tears down Apache Cassandra nodes (one
//! node or a small loopback cluster) around a build or test run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       ringmaster (CLI / Lifecycle)                   │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        ClusterOrchestrator                           │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌─────────┐  │
//! │  │    Config    │  │   Process    │  │  Readiness   │  │Shutdown │  │
//! │  │ Materializer │  │   Launcher   │  │   Poller     │  │  Coord. │  │
//! │  └──────────────┘  └──────────────┘  └──────────────┘  └─────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//!          │                  │                 │ CQL            │ key\r\nstop\r\n
//!          ▼                  ▼                 ▼                ▼
//! ┌──────────────────┐  ┌───────────────────────────────────────────────┐
//! │ <home>/conf/*.yaml│  │ ringmaster-monitor ─► java CassandraDaemon    │
//! │ <home>/data ...   │  │ (ControlSocketServer)     (native transport)  │
//! └──────────────────┘  └───────────────────────────────────────────────┘
//! ```
//!
//! # Node layout
//!
//! A single node lives in `<home_dir>`. Cluster node `N` lives in
//! `<home_dir>-nodeN`, listens on `<base>.N` and gets the initial token
//! `floor(2^127 * (N-1) / size)`. Only the first node exposes JMX.
//!
//! # Configuration
//!
//! See [`config::Config`]; every field has a `RINGMASTER_*` environment
//! variable and most have a CLI flag.

pub mod command;
pub mod config;
pub mod console;
pub mod control_socket;
pub mod cql;
pub mod error;
pub mod launcher;
pub mod lifecycle;
pub mod materializer;
pub mod node;
pub mod orchestrator;
pub mod readiness;
pub mod shutdown;

pub use config::{Config, ConfigError};
pub use control_socket::{ControlSocketServer, StopCommand};
pub use error::{Error, Result};
pub use launcher::{LaunchError, LaunchMode, Launcher, MockLauncher, ProcessHandle, ProcessLauncher};
pub use lifecycle::{Lifecycle, NodetoolOp};
pub use node::{ClusterTopology, NodeSpec, Token};
pub use orchestrator::{ClusterOrchestrator, ClusterStart, RollbackPolicy};
pub use readiness::{ReadinessOutcome, ReadinessPoller, StartWait};
pub use shutdown::{ShutdownCoordinator, StopReport};
