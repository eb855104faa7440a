// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Ringmaster - launch and tear down local Cassandra nodes
//!
//! Commands:
//! - `start` / `stop`: a single detached node
//! - `run`: a single node in the foreground until ENTER or Ctrl-C
//! - `start-cluster` / `stop-cluster`: a loopback cluster
//! - `delete`, `cql-exec`, `load`, `drop`, `truncate`
//! - `compact`, `flush`, `repair`, `cleanup`

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use ringmaster::config::Config;
use ringmaster::console;
use ringmaster::launcher::{Launcher, ProcessLauncher};
use ringmaster::lifecycle::{Lifecycle, NodetoolOp};
use ringmaster::readiness::StartWait;

#[derive(Parser)]
#[command(name = "ringmaster")]
#[command(about = "Launch, health-check and tear down local Cassandra nodes", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

/// Flags that take precedence over `RINGMASTER_*` variables.
#[derive(Args)]
struct Overrides {
    /// Node home directory
    #[arg(long, global = true)]
    home_dir: Option<PathBuf>,

    /// Cassandra distribution directory
    #[arg(long, global = true)]
    cassandra_home: Option<PathBuf>,

    /// CQL native transport port
    #[arg(long, global = true)]
    native_port: Option<u16>,

    /// Control socket port (0 disables it)
    #[arg(long, global = true)]
    stop_port: Option<u16>,

    /// Seconds to wait for startup: -1 no wait, 0 forever
    #[arg(long, global = true, allow_negative_numbers = true)]
    start_wait_seconds: Option<i64>,

    /// Number of cluster nodes
    #[arg(long, global = true)]
    cluster_size: Option<u32>,

    /// Keyspace for CQL and nodetool commands
    #[arg(long, global = true)]
    keyspace: Option<String>,

    /// Skip the command entirely
    #[arg(long, global = true)]
    skip: bool,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(dir) = self.home_dir {
            config.home_dir = dir;
        }
        if let Some(dir) = self.cassandra_home {
            config.cassandra_home = Some(dir);
        }
        if let Some(port) = self.native_port {
            config.native_transport_port = port;
        }
        if let Some(port) = self.stop_port {
            config.stop_port = port;
        }
        if let Some(seconds) = self.start_wait_seconds {
            config.start_wait = StartWait::from_seconds(seconds);
        }
        if let Some(size) = self.cluster_size {
            config.cluster_size = size;
        }
        if self.keyspace.is_some() {
            config.keyspace = self.keyspace;
        }
        if self.skip {
            config.skip = true;
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Start a single node in the background
    Start,
    /// Stop the single node
    Stop,
    /// Run a single node in the foreground until ENTER or Ctrl-C
    Run,
    /// Start a loopback cluster in the background
    StartCluster,
    /// Stop every cluster node
    StopCluster,
    /// Delete the node home directory
    Delete,
    /// Execute CQL against the running node
    CqlExec {
        /// Statements separated by `;`
        #[arg(long)]
        statement: Option<String>,
        /// Script file, used instead of --statement when it exists
        #[arg(long)]
        script: Option<PathBuf>,
    },
    /// Load a CQL script into the running node
    Load {
        /// Script file (defaults to RINGMASTER_LOAD_SCRIPT)
        #[arg(long)]
        script: Option<PathBuf>,
    },
    /// Drop tables, or the whole keyspace when no tables are given
    Drop {
        /// Comma-separated table names
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },
    /// Remove every row from a table in the keyspace
    Truncate {
        #[arg(long)]
        table: String,
    },
    /// Trigger a major compaction
    Compact(NodetoolArgs),
    /// Flush memtables to disk
    Flush(NodetoolArgs),
    /// Run an anti-entropy repair
    Repair(NodetoolArgs),
    /// Remove data the node no longer owns
    Cleanup(NodetoolArgs),
}

#[derive(Args)]
struct NodetoolArgs {
    /// Keyspace to operate on (defaults to all, or RINGMASTER_KEYSPACE)
    keyspace: Option<String>,
    /// Tables within the keyspace
    tables: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "ringmaster=debug"
    } else {
        "ringmaster=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let mut config = Config::from_env()?;
    cli.overrides.apply(&mut config);

    info!(
        home_dir = %config.home_dir.display(),
        native_port = config.native_transport_port,
        stop_port = config.stop_port,
        "Ringmaster configured"
    );

    let lifecycle = Lifecycle::new(config);
    match cli.command {
        Command::Start => {
            let launcher: Arc<dyn Launcher> = Arc::new(ProcessLauncher::detached());
            lifecycle.start(launcher).await?;
        }
        Command::Stop => {
            lifecycle.stop().await?;
        }
        Command::Run => {
            let launcher: Arc<dyn Launcher> = Arc::new(ProcessLauncher::attached());
            lifecycle
                .run(launcher, console::wait_for_console_stop())
                .await?;
        }
        Command::StartCluster => {
            let launcher: Arc<dyn Launcher> = Arc::new(ProcessLauncher::detached());
            lifecycle.start_cluster(launcher).await?;
        }
        Command::StopCluster => {
            lifecycle.stop_cluster().await?;
        }
        Command::Delete => lifecycle.delete().await?,
        Command::CqlExec { statement, script } => {
            lifecycle
                .cql_exec(statement.as_deref(), script.as_deref())
                .await?;
        }
        Command::Load { script } => lifecycle.load(script).await?,
        Command::Drop { tables } => lifecycle.drop_tables(&tables).await?,
        Command::Truncate { table } => lifecycle.truncate(&table).await?,
        Command::Compact(args) => nodetool(&lifecycle, NodetoolOp::Compact, args).await?,
        Command::Flush(args) => nodetool(&lifecycle, NodetoolOp::Flush, args).await?,
        Command::Repair(args) => nodetool(&lifecycle, NodetoolOp::Repair, args).await?,
        Command::Cleanup(args) => nodetool(&lifecycle, NodetoolOp::Cleanup, args).await?,
    }

    Ok(())
}

async fn nodetool(lifecycle: &Lifecycle, op: NodetoolOp, args: NodetoolArgs) -> anyhow::Result<()> {
    let launcher: Arc<dyn Launcher> = Arc::new(ProcessLauncher::attached());
    lifecycle
        .nodetool(launcher, op, args.keyspace, args.tables)
        .await?;
    Ok(())
}
