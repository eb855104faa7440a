// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ringmaster Protocol - minimal CQL native protocol (v4)
//!
//! Just enough of the Cassandra client protocol to tell whether a node is up
//! and to push simple statements at it:
//!
//! - Readiness probing: connect, STARTUP, `SELECT cluster_name FROM system.local`
//! - Statement execution for schema/data load scripts
//! - A stub responder that stands in for a node in tests
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │              ringmaster-protocol              │
//! ├───────────────────────────────────────────────┤
//! │  Client: STARTUP / OPTIONS / QUERY            │
//! ├───────────────────────────────────────────────┤
//! │  Bodies: [string] [bytes] maps, RESULT rows   │
//! ├───────────────────────────────────────────────┤
//! │  Frames: 9-byte header over TCP (tokio)       │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ringmaster_protocol::{ClientConfig, CqlClient};
//!
//! let mut client = CqlClient::connect_host("127.0.0.1", 9042, ClientConfig::default()).await?;
//! client.startup().await?;
//! let name = client.cluster_name().await?;
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod frame;
pub mod result;
pub mod stub;

pub use client::{ClientConfig, CqlClient};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{Frame, FrameError, Opcode};
pub use result::{ColumnSpec, ColumnType, QueryResult, Rows};
pub use stub::{StubServer, StubServerBuilder};
