// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node specifications and cluster topology.
//!
//! A [`NodeSpec`] is built once per node before launch and never changes
//! afterwards. [`ClusterTopology`] owns the ordered node list; node 0 is the
//! only one with JMX enabled.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError, validate_cluster_size};

/// Position on the RandomPartitioner ring (`0..2^127`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Token(pub u128);

const RING_SIZE: u128 = 1 << 127;

impl Token {
    /// `floor(2^127 * index / count)`, computed without overflowing u128.
    ///
    /// Splits `2^127` into `q * count + r` so the product never exceeds
    /// `2^127`: `floor(2^127 * i / n) = q * i + floor(r * i / n)`.
    pub fn for_node(index: u32, count: u32) -> Self {
        debug_assert!(count > 0, "token ring needs at least one node");
        let count = count.max(1);
        let index = index as u128;
        let count = count as u128;
        let quotient = RING_SIZE / count;
        let remainder = RING_SIZE % count;
        Token(quotient * index + (remainder * index) / count)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to configure, launch, poll and stop one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    /// Position in the topology, 0-based
    pub index: usize,
    pub listen_address: IpAddr,
    pub rpc_address: IpAddr,
    pub storage_port: u16,
    pub native_transport_port: u16,
    pub start_native_transport: bool,
    /// JMX port; 0 when JMX is disabled
    pub jmx_port: u16,
    pub jmx_enabled: bool,
    pub stop_port: u16,
    pub stop_key: String,
    pub initial_token: Option<Token>,
    pub seeds: Vec<IpAddr>,
    pub home_dir: PathBuf,
}

impl NodeSpec {
    /// Display name used in logs: `node1`, `node2`, ...
    pub fn name(&self) -> String {
        format!("node{}", self.index + 1)
    }

    pub fn conf_dir(&self) -> PathBuf {
        self.home_dir.join("conf")
    }

    pub fn config_file(&self) -> PathBuf {
        self.conf_dir().join("cassandra.yaml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join("logs")
    }

    /// Where the control socket listens: the listen address when it is a
    /// loopback address, `127.0.0.1` otherwise.
    pub fn stop_address(&self) -> IpAddr {
        if self.listen_address.is_loopback() {
            self.listen_address
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }

    pub fn control_socket_enabled(&self) -> bool {
        self.stop_port > 0 && !self.stop_key.is_empty()
    }

    /// Whether this node has been started from this home before.
    pub fn is_fresh(&self) -> bool {
        !self.home_dir.is_dir()
    }
}

/// Ordered set of nodes; node 0 is the management (JMX) node.
#[derive(Debug, Clone)]
pub struct ClusterTopology {
    nodes: Vec<NodeSpec>,
}

impl ClusterTopology {
    /// One node using the configured addresses and ports directly.
    pub fn single(config: &Config) -> Self {
        let node = NodeSpec {
            index: 0,
            listen_address: config.listen_address,
            rpc_address: config.rpc_address,
            storage_port: config.storage_port,
            native_transport_port: config.native_transport_port,
            start_native_transport: config.start_native_transport,
            jmx_port: config.jmx_port,
            jmx_enabled: true,
            stop_port: config.stop_port,
            stop_key: config.stop_key.clone(),
            initial_token: None,
            seeds: vec![config.listen_address],
            home_dir: config.home_dir.clone(),
        };
        Self { nodes: vec![node] }
    }

    /// `cluster_size` nodes on `<base>.1 ..= <base>.N`, each with its own
    /// home directory and an evenly spaced initial token.
    ///
    /// Fails before anything touches the filesystem when the size is out of range.
    pub fn plan(config: &Config) -> Result<Self, ConfigError> {
        validate_cluster_size(config.cluster_size)?;
        let size = config.cluster_size;
        let [a, b, c] = config.cluster_base_address;

        let addresses: Vec<IpAddr> = (0..size)
            .map(|i| IpAddr::V4(Ipv4Addr::new(a, b, c, (i + 1) as u8)))
            .collect();

        let nodes = (0..size)
            .map(|i| {
                let address = addresses[i as usize];
                let management = i == 0;
                Ok(NodeSpec {
                    index: i as usize,
                    listen_address: address,
                    rpc_address: address,
                    storage_port: config.storage_port,
                    native_transport_port: config.native_transport_port,
                    start_native_transport: config.start_native_transport,
                    jmx_port: if management { config.jmx_port } else { 0 },
                    jmx_enabled: management,
                    stop_port: config.stop_port,
                    stop_key: config.stop_key.clone(),
                    initial_token: Some(Token::for_node(i, size)),
                    seeds: addresses.clone(),
                    home_dir: node_home(&config.home_dir, i + 1)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self { nodes })
    }

    /// Build from explicit node specs, enforcing the topology invariants.
    pub fn from_nodes(nodes: Vec<NodeSpec>) -> Result<Self, ConfigError> {
        validate_cluster_size(nodes.len() as u32)?;
        for (i, node) in nodes.iter().enumerate() {
            let duplicate = nodes[..i]
                .iter()
                .any(|other| other.listen_address == node.listen_address);
            if duplicate {
                return Err(ConfigError::InvalidValue {
                    var: "listen_address",
                    value: node.listen_address.to_string(),
                });
            }
            if node.jmx_enabled != (i == 0) {
                return Err(ConfigError::InvalidValue {
                    var: "jmx_enabled",
                    value: format!("node {} of {}", i + 1, nodes.len()),
                });
            }
        }
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The node with JMX enabled.
    pub fn management_node(&self) -> &NodeSpec {
        &self.nodes[0]
    }

    /// A topology is clean when none of its home directories exist yet.
    pub fn is_fresh(&self) -> bool {
        self.nodes.iter().all(NodeSpec::is_fresh)
    }
}

fn node_home(home: &Path, number: u32) -> Result<PathBuf, ConfigError> {
    let name = home
        .file_name()
        .ok_or_else(|| ConfigError::InvalidValue {
            var: "RINGMASTER_HOME_DIR",
            value: home.display().to_string(),
        })?
        .to_string_lossy();
    Ok(home.with_file_name(format!("{name}-node{number}")))
}
