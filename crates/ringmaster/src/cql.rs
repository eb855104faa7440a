// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! CQL statement execution against a running node.

use std::path::Path;
use std::time::Duration;

use ringmaster_protocol::{ClientConfig, CqlClient, ErrorCode, ProtocolError, QueryResult};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::node::NodeSpec;

/// A statement (or the session it needed) failed.
#[derive(Debug, Error)]
#[error("There was a problem calling Apache Cassandra's CQL API. Details: {classification}")]
pub struct CqlExecutionError {
    /// One-line description of what went wrong
    pub classification: String,
    /// The statement being executed, if the failure was not during connect
    pub statement: Option<String>,
    #[source]
    pub source: ProtocolError,
}

impl CqlExecutionError {
    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    /// Server error code, when the node rejected the request.
    pub fn server_code(&self) -> Option<ErrorCode> {
        self.source.server_code()
    }
}

impl From<ProtocolError> for CqlExecutionError {
    fn from(source: ProtocolError) -> Self {
        Self {
            classification: classify(&source),
            statement: None,
            source,
        }
    }
}

fn classify(err: &ProtocolError) -> String {
    match err {
        ProtocolError::Server { code, message } => {
            format!("{code}, {}. {message}", code.describe())
        }
        ProtocolError::RequestTimeout(ms) => format!("query timed out after {ms}ms"),
        ProtocolError::ConnectTimeout(ms) => {
            format!("node did not accept the connection within {ms}ms")
        }
        ProtocolError::Resolve(target) => format!("could not resolve {target}"),
        ProtocolError::AuthenticationRequired(authenticator) => {
            format!("node requires authentication ({authenticator}), which is not supported")
        }
        e if e.is_transport() => format!("node is unreachable: {e}"),
        e => format!("protocol failure: {e}"),
    }
}

/// Split a script into statements on `;`, ignoring semicolons inside
/// single-quoted literals and dropping `--` and `//` comment lines.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for line in script.lines() {
        let trimmed = line.trim_start();
        if !in_quote && (trimmed.starts_with("--") || trimmed.starts_with("//")) {
            continue;
        }
        for ch in line.chars() {
            match ch {
                '\'' => {
                    in_quote = !in_quote;
                    current.push(ch);
                }
                ';' if !in_quote => {
                    push_statement(&mut statements, &mut current);
                }
                _ => current.push(ch),
            }
        }
        current.push('\n');
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

/// Runs statements over a single session.
#[derive(Debug, Clone)]
pub struct CqlRunner {
    host: String,
    port: u16,
    keyspace: Option<String>,
    client_config: ClientConfig,
}

impl CqlRunner {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            keyspace: None,
            client_config: ClientConfig::default(),
        }
    }

    /// Runner for a node's native transport address.
    pub fn for_node(node: &NodeSpec) -> Self {
        Self::new(node.rpc_address.to_string(), node.native_transport_port)
    }

    pub fn with_keyspace(mut self, keyspace: Option<String>) -> Self {
        self.keyspace = keyspace.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.client_config.request_timeout = timeout;
        self
    }

    async fn session(&self) -> std::result::Result<CqlClient, CqlExecutionError> {
        let mut client =
            CqlClient::connect_host(&self.host, self.port, self.client_config.clone()).await?;
        client.startup().await?;
        if let Some(keyspace) = &self.keyspace {
            info!(keyspace = %keyspace, "setting keyspace: {}", keyspace);
            client.use_keyspace(keyspace).await?;
        }
        Ok(client)
    }

    /// Execute every statement in `script`, stopping at the first failure.
    pub async fn execute(&self, script: &str) -> Result<Vec<QueryResult>> {
        let statements = split_statements(script);
        if statements.is_empty() {
            warn!("No CQL provided. Nothing to do.");
            return Ok(Vec::new());
        }

        let mut client = self.session().await?;
        let mut results = Vec::with_capacity(statements.len());
        for statement in &statements {
            debug!(statement = %statement, "Executing cql statement");
            let result = client.query(statement).await.map_err(|e| {
                debug!(statement = %statement, error = %e, "Statement failed");
                CqlExecutionError::from(e).with_statement(statement.as_str())
            })?;
            results.push(result);
        }
        Ok(results)
    }

    /// Execute a script file.
    pub async fn execute_file(&self, path: &Path) -> Result<Vec<QueryResult>> {
        if !path.is_file() {
            return Err(Error::Other(format!(
                "script {} does not exist.",
                path.display()
            )));
        }
        let script = tokio::fs::read_to_string(path).await?;
        self.execute(&script).await
    }

    /// Load a script file; with `ignore_failures`, a failing script is only logged.
    pub async fn load_script(&self, path: &Path, ignore_failures: bool) -> Result<()> {
        info!("Running {}...", path.display());
        match self.execute_file(path).await {
            Ok(_) => {
                info!("Finished {}.", path.display());
                Ok(())
            }
            Err(e) if ignore_failures => {
                error!("Script execution failed with {}. Ignoring.", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
