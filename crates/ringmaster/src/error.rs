// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for ringmaster.

use thiserror::Error;

/// Orchestration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading or validation failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse or render failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Launching a process failed.
    #[error("Launch error: {0}")]
    Launch(#[from] crate::launcher::LaunchError),

    /// A statement could not be executed.
    #[error(transparent)]
    Cql(#[from] crate::cql::CqlExecutionError),

    /// A readiness check hit a condition that retrying cannot fix.
    #[error("Readiness check failed: {0}")]
    Readiness(String),

    /// A node did not become ready within the wait window.
    #[error("Cassandra failed to start within {seconds}s")]
    StartTimeout {
        /// Wait window in seconds.
        seconds: u64,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the ringmaster Error.
pub type Result<T> = std::result::Result<T, Error>;
