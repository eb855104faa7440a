// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for ringmaster.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use crate::orchestrator::RollbackPolicy;
use crate::readiness::StartWait;

/// Largest cluster the `127.0.0.x` address scheme can hold.
pub const MAX_CLUSTER_SIZE: u32 = 254;

/// Orchestrator configuration loaded from environment variables.
///
/// CLI flags override individual fields after loading.
#[derive(Debug, Clone)]
pub struct Config {
    /// Node home directory. Cluster nodes live in `<home_dir>-node<N>`.
    pub home_dir: PathBuf,
    /// Cassandra distribution providing `lib/*.jar`
    pub cassandra_home: Option<PathBuf>,
    /// JDK to launch with instead of the one on PATH
    pub java_home: Option<PathBuf>,
    /// Explicit path of the `ringmaster-monitor` wrapper
    pub monitor_executable: Option<PathBuf>,
    pub listen_address: IpAddr,
    pub rpc_address: IpAddr,
    pub storage_port: u16,
    pub native_transport_port: u16,
    pub start_native_transport: bool,
    pub jmx_port: u16,
    /// Control socket port; 0 disables the control socket
    pub stop_port: u16,
    /// Shared secret for the control socket; empty disables it
    pub stop_key: String,
    /// JVM heap (-Xmx) in megabytes
    pub max_memory_mb: u32,
    /// Server log level written into logback.xml
    pub log_level: String,
    /// User YAML merged over the defaults
    pub yaml_overrides: Option<PathBuf>,
    pub add_jdk11_options: bool,
    /// Extra `-D` system properties for the server JVM
    pub system_properties: BTreeMap<String, String>,
    pub extra_classpath: Vec<PathBuf>,
    pub start_wait: StartWait,
    pub cluster_size: u32,
    /// First three octets of cluster node addresses
    pub cluster_base_address: [u8; 3],
    pub rollback: RollbackPolicy,
    /// CQL script applied after a clean start
    pub load_script: Option<PathBuf>,
    pub load_after_first_start: bool,
    pub load_failure_ignore: bool,
    pub keyspace: Option<String>,
    /// Skip every command
    pub skip: bool,
    /// Whether `delete` failures abort the run
    pub fail_on_error: bool,
}

impl Default for Config {
    fn default() -> Self {
        let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self {
            home_dir: PathBuf::from("target/cassandra"),
            cassandra_home: None,
            java_home: None,
            monitor_executable: None,
            listen_address: loopback,
            rpc_address: loopback,
            storage_port: 7000,
            native_transport_port: 9042,
            start_native_transport: true,
            jmx_port: 7199,
            stop_port: 8081,
            stop_key: "ringmaster".to_string(),
            max_memory_mb: 512,
            log_level: "ERROR".to_string(),
            yaml_overrides: None,
            add_jdk11_options: false,
            system_properties: BTreeMap::new(),
            extra_classpath: Vec::new(),
            start_wait: StartWait::Bounded(std::time::Duration::from_secs(180)),
            cluster_size: 4,
            cluster_base_address: [127, 0, 0],
            rollback: RollbackPolicy::LeaveRunning,
            load_script: None,
            load_after_first_start: true,
            load_failure_ignore: false,
            keyspace: None,
            skip: false,
            fail_on_error: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(dir) = var("RINGMASTER_HOME_DIR") {
            config.home_dir = PathBuf::from(dir);
        }
        config.cassandra_home = var("CASSANDRA_HOME").map(PathBuf::from);
        config.java_home = var("RINGMASTER_JAVA_HOME").map(PathBuf::from);
        config.monitor_executable = var("RINGMASTER_MONITOR_BIN").map(PathBuf::from);

        if let Some(v) = var("RINGMASTER_LISTEN_ADDRESS") {
            config.listen_address = parse_value("RINGMASTER_LISTEN_ADDRESS", &v)?;
        }
        if let Some(v) = var("RINGMASTER_RPC_ADDRESS") {
            config.rpc_address = parse_value("RINGMASTER_RPC_ADDRESS", &v)?;
        }
        if let Some(v) = var("RINGMASTER_STORAGE_PORT") {
            config.storage_port = parse_port("RINGMASTER_STORAGE_PORT", &v)?;
        }
        if let Some(v) = var("RINGMASTER_NATIVE_PORT") {
            config.native_transport_port = parse_port("RINGMASTER_NATIVE_PORT", &v)?;
        }
        if let Some(v) = var("RINGMASTER_START_NATIVE_TRANSPORT") {
            config.start_native_transport = parse_bool(&v);
        }
        if let Some(v) = var("RINGMASTER_JMX_PORT") {
            config.jmx_port = parse_port("RINGMASTER_JMX_PORT", &v)?;
        }
        if let Some(v) = var("RINGMASTER_STOP_PORT") {
            config.stop_port = parse_port("RINGMASTER_STOP_PORT", &v)?;
        }
        if let Some(v) = lookup("RINGMASTER_STOP_KEY") {
            config.stop_key = v;
        }
        if let Some(v) = var("RINGMASTER_MAX_MEMORY_MB") {
            config.max_memory_mb = parse_value("RINGMASTER_MAX_MEMORY_MB", &v)?;
        }
        if let Some(v) = var("RINGMASTER_LOG_LEVEL") {
            config.log_level = v.trim().to_ascii_uppercase();
        }
        config.yaml_overrides = var("RINGMASTER_YAML").map(PathBuf::from);
        if let Some(v) = var("RINGMASTER_ADD_JDK11_OPTIONS") {
            config.add_jdk11_options = parse_bool(&v);
        }
        if let Some(v) = var("RINGMASTER_SYSTEM_PROPERTIES") {
            config.system_properties = parse_properties("RINGMASTER_SYSTEM_PROPERTIES", &v)?;
        }
        if let Some(v) = var("RINGMASTER_EXTRA_CLASSPATH") {
            config.extra_classpath = std::env::split_paths(&v).collect();
        }
        if let Some(v) = var("RINGMASTER_START_WAIT_SECONDS") {
            let seconds: i64 = parse_value("RINGMASTER_START_WAIT_SECONDS", &v)?;
            config.start_wait = StartWait::from_seconds(seconds);
        }
        if let Some(v) = var("RINGMASTER_CLUSTER_SIZE") {
            config.cluster_size = parse_value("RINGMASTER_CLUSTER_SIZE", &v)?;
        }
        if let Some(v) = var("RINGMASTER_CLUSTER_BASE_ADDRESS") {
            config.cluster_base_address = parse_base_address(&v)?;
        }
        if let Some(v) = var("RINGMASTER_ROLLBACK_ON_FAILURE") {
            config.rollback = if parse_bool(&v) {
                RollbackPolicy::StopStarted
            } else {
                RollbackPolicy::LeaveRunning
            };
        }
        config.load_script = var("RINGMASTER_LOAD_SCRIPT").map(PathBuf::from);
        if let Some(v) = var("RINGMASTER_LOAD_AFTER_FIRST_START") {
            config.load_after_first_start = parse_bool(&v);
        }
        if let Some(v) = var("RINGMASTER_LOAD_FAILURE_IGNORE") {
            config.load_failure_ignore = parse_bool(&v);
        }
        config.keyspace = var("RINGMASTER_KEYSPACE");
        if let Some(v) = var("RINGMASTER_SKIP") {
            config.skip = parse_bool(&v);
        }
        if let Some(v) = var("RINGMASTER_FAIL_ON_ERROR") {
            config.fail_on_error = parse_bool(&v);
        }

        Ok(config)
    }

    /// Whether the server should be wrapped with a control socket.
    pub fn control_socket_enabled(&self) -> bool {
        self.stop_port > 0 && !self.stop_key.is_empty()
    }

    /// Requirements for talking to a running node's control socket.
    pub fn validate_stop(&self) -> Result<(), ConfigError> {
        if self.stop_port == 0 {
            return Err(ConfigError::InvalidPort("RINGMASTER_STOP_PORT"));
        }
        if self.stop_key.is_empty() {
            return Err(ConfigError::MissingStopKey);
        }
        Ok(())
    }

    pub fn validate_cluster_size(&self) -> Result<(), ConfigError> {
        validate_cluster_size(self.cluster_size)
    }

    /// Cassandra distribution directory, checked for a `lib` folder.
    pub fn require_cassandra_home(&self) -> Result<&Path, ConfigError> {
        let home = self
            .cassandra_home
            .as_deref()
            .ok_or(ConfigError::MissingEnvVar("CASSANDRA_HOME"))?;
        if !home.join("lib").is_dir() {
            return Err(ConfigError::InvalidCassandraHome(home.to_path_buf()));
        }
        Ok(home)
    }
}

pub fn validate_cluster_size(size: u32) -> Result<(), ConfigError> {
    if !(1..=MAX_CLUSTER_SIZE).contains(&size) {
        return Err(ConfigError::InvalidClusterSize(size));
    }
    Ok(())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn parse_port(var: &'static str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidPort(var))
}

fn parse_value<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        })
}

/// `key=value` pairs separated by commas.
fn parse_properties(
    var: &'static str,
    value: &str,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut properties = BTreeMap::new();
    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, val)) = pair.split_once('=') else {
            return Err(ConfigError::InvalidValue {
                var,
                value: pair.to_string(),
            });
        };
        properties.insert(key.trim().to_string(), val.trim().to_string());
    }
    Ok(properties)
}

fn parse_base_address(value: &str) -> Result<[u8; 3], ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        var: "RINGMASTER_CLUSTER_BASE_ADDRESS",
        value: value.to_string(),
    };
    let octets: Vec<u8> = value
        .trim()
        .split('.')
        .map(|o| o.parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;
    octets.try_into().map_err(|_| invalid())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number in {0}")]
    InvalidPort(&'static str),
    /// A variable could not be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
    /// Cluster size outside the addressable range.
    #[error("Invalid cluster size of {0} specified. Must be between 1 and {MAX_CLUSTER_SIZE}")]
    InvalidClusterSize(u32),
    /// The control socket needs a shared key.
    #[error("Missing stop key")]
    MissingStopKey,
    /// The control socket only listens on loopback.
    #[error("Control socket must bind to a loopback address, got {0}")]
    NonLoopbackControlHost(IpAddr),
    /// The Cassandra distribution has no lib directory.
    #[error("Not a Cassandra distribution (no lib directory): {0}")]
    InvalidCassandraHome(PathBuf),
}
