// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node home directory and configuration file generation.
//!
//! Produces the tree a node is launched from:
//!
//! ```text
//! <home>/
//!   bin/ conf/ data/ commitlog/ saved_caches/ cdc_raw/ logs/
//!   conf/cassandra.yaml
//!   conf/logback.xml
//! ```
//!
//! `cassandra.yaml` is a top-level key merge of the bundled defaults, the
//! user overrides file and the per-node computed values, later sources
//! winning.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::node::NodeSpec;

const DEFAULT_YAML: &str = include_str!("../resources/cassandra.yaml");
const LOGBACK_TEMPLATE: &str = include_str!("../resources/logback.xml");

const SEED_PROVIDER_CLASS: &str = "org.apache.cassandra.locator.SimpleSeedProvider";

/// Subdirectories created under every node home.
pub const HOME_SUBDIRS: [&str; 7] = [
    "bin",
    "conf",
    "data",
    "commitlog",
    "saved_caches",
    "cdc_raw",
    "logs",
];

/// Result of preparing a node home.
#[derive(Debug, Clone)]
pub struct MaterializedHome {
    pub home_dir: PathBuf,
    pub config_file: PathBuf,
    /// The home directory did not exist before this call.
    pub fresh: bool,
    /// `cassandra.yaml` was (re)written by this call.
    pub config_written: bool,
}

/// Writes node homes and their configuration.
#[derive(Debug, Clone)]
pub struct ConfigMaterializer {
    defaults: Mapping,
    overrides: Mapping,
    /// Generated files older than this are regenerated.
    reference: Option<PathBuf>,
    log_level: String,
}

impl ConfigMaterializer {
    /// Build from configuration, reading the user overrides file if set.
    pub fn new(config: &Config) -> Result<Self> {
        let mut materializer = Self::with_defaults(&config.log_level)?;
        if let Some(path) = &config.yaml_overrides {
            let text = std::fs::read_to_string(path)?;
            materializer.overrides = parse_mapping(&text)?;
            materializer.reference = Some(path.clone());
        }
        Ok(materializer)
    }

    /// Bundled defaults only.
    pub fn with_defaults(log_level: &str) -> Result<Self> {
        Ok(Self {
            defaults: parse_mapping(DEFAULT_YAML)?,
            overrides: Mapping::new(),
            reference: None,
            log_level: log_level.to_string(),
        })
    }

    /// Replace the user overrides with an inline YAML document.
    pub fn with_overrides(mut self, yaml: &str) -> Result<Self> {
        self.overrides = parse_mapping(yaml)?;
        Ok(self)
    }

    /// Create the node home and write stale or missing configuration files.
    pub fn materialize(&self, node: &NodeSpec) -> Result<MaterializedHome> {
        let home = &node.home_dir;
        let fresh = !home.is_dir();

        ensure_dir(home)?;
        for sub in HOME_SUBDIRS {
            ensure_dir(&home.join(sub))?;
        }

        let config_file = node.config_file();
        let config_written = if should_generate(&config_file, self.reference.as_deref()) {
            debug!(
                node = %node.name(),
                path = %config_file.display(),
                "{}",
                if config_file.is_file() { "Updating" } else { "Creating" }
            );
            std::fs::write(&config_file, self.render_yaml(node)?)?;
            true
        } else {
            false
        };

        let logback = node.conf_dir().join("logback.xml");
        if should_generate(&logback, self.reference.as_deref()) {
            std::fs::write(&logback, self.render_logback(node))?;
        }

        Ok(MaterializedHome {
            home_dir: home.clone(),
            config_file,
            fresh,
            config_written,
        })
    }

    /// The merged `cassandra.yaml` for a node.
    pub fn render_yaml(&self, node: &NodeSpec) -> Result<String> {
        let merged = merge(
            merge(self.defaults.clone(), self.overrides.clone()),
            computed_values(node),
        );
        Ok(serde_yaml::to_string(&Value::Mapping(merged))?)
    }

    pub fn render_logback(&self, node: &NodeSpec) -> String {
        let logs = absolute(&node.logs_dir());
        LOGBACK_TEMPLATE
            .replace("{{LOG_LEVEL}}", &self.log_level)
            .replace("{{LOG_DIR}}", &logs.display().to_string())
    }
}

/// A generated file needs writing when it is missing, when there is nothing
/// to compare it against, or when it is older than the reference file.
pub fn should_generate(resource: &Path, reference: Option<&Path>) -> bool {
    if !resource.is_file() {
        return true;
    }
    let Some(reference) = reference else {
        return true;
    };
    let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified());
    match (modified(resource), modified(reference)) {
        (Ok(resource_time), Ok(reference_time)) => resource_time < reference_time,
        _ => true,
    }
}

/// Top-level key overwrite: every key of `overlay` replaces the one in `base`.
pub fn merge(mut base: Mapping, overlay: Mapping) -> Mapping {
    for (key, value) in overlay {
        base.insert(key, value);
    }
    base
}

/// Keys that are always derived from the node spec.
pub fn computed_values(node: &NodeSpec) -> Mapping {
    let home = absolute(&node.home_dir);
    let path = |sub: &str| Value::String(home.join(sub).display().to_string());

    let mut values = Mapping::new();
    values.insert(
        "data_file_directories".into(),
        Value::Sequence(vec![path("data")]),
    );
    values.insert("commitlog_directory".into(), path("commitlog"));
    values.insert("cdc_raw_directory".into(), path("cdc_raw"));
    values.insert("saved_caches_directory".into(), path("saved_caches"));
    values.insert(
        "initial_token".into(),
        node.initial_token
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
    );
    values.insert(
        "listen_address".into(),
        Value::String(node.listen_address.to_string()),
    );
    values.insert("storage_port".into(), number(node.storage_port));
    values.insert(
        "rpc_address".into(),
        Value::String(node.rpc_address.to_string()),
    );
    values.insert(
        "native_transport_port".into(),
        number(node.native_transport_port),
    );
    values.insert(
        "start_native_transport".into(),
        Value::Bool(node.start_native_transport),
    );

    if !node.seeds.is_empty() {
        let seeds = node
            .seeds
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let mut parameters = Mapping::new();
        parameters.insert("seeds".into(), Value::String(seeds));
        let mut provider = Mapping::new();
        provider.insert("class_name".into(), SEED_PROVIDER_CLASS.into());
        provider.insert(
            "parameters".into(),
            Value::Sequence(vec![Value::Mapping(parameters)]),
        );
        values.insert(
            "seed_provider".into(),
            Value::Sequence(vec![Value::Mapping(provider)]),
        );
    }

    values
}

fn number(n: u16) -> Value {
    Value::Number(u64::from(n).into())
}

fn parse_mapping(text: &str) -> Result<Mapping> {
    match serde_yaml::from_str::<Value>(text)? {
        Value::Mapping(mapping) => Ok(mapping),
        Value::Null => Ok(Mapping::new()),
        other => Err(Error::Other(format!(
            "configuration YAML must be a mapping, got {other:?}"
        ))),
    }
}

/// Make sure `dir` is a directory, deleting a regular file in its way.
fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.is_file() {
        debug!(path = %dir.display(), "Deleting file in place of a directory");
        if let Err(e) = std::fs::remove_file(dir) {
            warn!(path = %dir.display(), error = %e, "Could not delete file");
        }
    }
    if !dir.is_dir() {
        debug!(path = %dir.display(), "Creating directory");
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ClusterTopology, Token};
    use tempfile::TempDir;

    fn node_in(dir: &TempDir) -> NodeSpec {
        let config = Config {
            home_dir: dir.path().join("cassandra"),
            ..Config::default()
        };
        ClusterTopology::single(&config).management_node().clone()
    }

    #[test]
    fn test_materialize_creates_layout() {
        let dir = TempDir::new().unwrap();
        let node = node_in(&dir);
        let materializer = ConfigMaterializer::with_defaults("INFO").unwrap();

        let home = materializer.materialize(&node).unwrap();
        assert!(home.fresh);
        assert!(home.config_written);
        for sub in HOME_SUBDIRS {
            assert!(node.home_dir.join(sub).is_dir(), "{sub} missing");
        }
        assert!(node.config_file().is_file());
        let logback = std::fs::read_to_string(node.conf_dir().join("logback.xml")).unwrap();
        assert!(logback.contains("level=\"INFO\""));

        let again = materializer.materialize(&node).unwrap();
        assert!(!again.fresh);
    }

    #[test]
    fn test_file_in_place_of_directory_is_replaced() {
        let dir = TempDir::new().unwrap();
        let node = node_in(&dir);
        std::fs::create_dir_all(&node.home_dir).unwrap();
        std::fs::write(node.home_dir.join("data"), b"squatter").unwrap();

        ConfigMaterializer::with_defaults("ERROR")
            .unwrap()
            .materialize(&node)
            .unwrap();
        assert!(node.home_dir.join("data").is_dir());
    }

    #[test]
    fn test_merge_precedence() {
        let dir = TempDir::new().unwrap();
        let node = node_in(&dir);
        let yaml = ConfigMaterializer::with_defaults("ERROR")
            .unwrap()
            .with_overrides("cluster_name: Overridden\nlisten_address: 10.9.9.9\nnum_tokens: 16\n")
            .unwrap()
            .render_yaml(&node)
            .unwrap();
        let value: Value = serde_yaml::from_str(&yaml).unwrap();

        // user beats defaults
        assert_eq!(value["cluster_name"].as_str(), Some("Overridden"));
        assert_eq!(value["num_tokens"].as_u64(), Some(16));
        // computed beats user
        assert_eq!(value["listen_address"].as_str(), Some("127.0.0.1"));
        // defaults survive
        assert_eq!(value["endpoint_snitch"].as_str(), Some("SimpleSnitch"));
    }

    #[test]
    fn test_seed_provider_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            home_dir: dir.path().join("cassandra"),
            cluster_size: 3,
            ..Config::default()
        };
        let topology = ClusterTopology::plan(&config).unwrap();
        let node = &topology.nodes()[1];

        let yaml = ConfigMaterializer::with_defaults("ERROR")
            .unwrap()
            .render_yaml(node)
            .unwrap();
        let value: Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(value["listen_address"].as_str(), Some("127.0.0.2"));
        assert_eq!(value["storage_port"].as_u64(), Some(7000));
        assert_eq!(
            value["initial_token"].as_str(),
            Some(Token::for_node(1, 3).to_string().as_str())
        );

        let provider = &value["seed_provider"][0];
        assert_eq!(provider["class_name"].as_str(), Some(SEED_PROVIDER_CLASS));
        let seeds = provider["parameters"][0]["seeds"].as_str().unwrap();
        let parsed: Vec<String> = seeds.split(", ").map(str::to_string).collect();
        let expected: Vec<String> = node.seeds.iter().map(ToString::to_string).collect();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_single_node_token_is_null() {
        let dir = TempDir::new().unwrap();
        let yaml = ConfigMaterializer::with_defaults("ERROR")
            .unwrap()
            .render_yaml(&node_in(&dir))
            .unwrap();
        let value: Value = serde_yaml::from_str(&yaml).unwrap();
        assert!(value["initial_token"].is_null());
    }

    #[test]
    fn test_should_generate() {
        let dir = TempDir::new().unwrap();
        let resource = dir.path().join("cassandra.yaml");
        let reference = dir.path().join("overrides.yaml");

        assert!(should_generate(&resource, None));
        std::fs::write(&resource, "a: 1").unwrap();
        assert!(should_generate(&resource, None));

        std::fs::write(&reference, "b: 2").unwrap();
        let old = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&reference)
            .unwrap()
            .set_modified(old)
            .unwrap();
        assert!(!should_generate(&resource, Some(&reference)));

        std::fs::File::options()
            .write(true)
            .open(&resource)
            .unwrap()
            .set_modified(old - std::time::Duration::from_secs(60))
            .unwrap();
        assert!(should_generate(&resource, Some(&reference)));
    }

    #[test]
    fn test_overrides_must_be_mapping() {
        let result = ConfigMaterializer::with_defaults("ERROR")
            .unwrap()
            .with_overrides("- just\n- a list\n");
        assert!(result.is_err());
    }
}
