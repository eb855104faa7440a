// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Command lines and environment for server and utility processes.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::launcher::LaunchError;
use crate::node::NodeSpec;

/// Main class of the Cassandra server.
pub const SERVER_MAIN_CLASS: &str = "org.apache.cassandra.service.CassandraDaemon";

/// Main class of `nodetool`.
pub const NODETOOL_MAIN_CLASS: &str = "org.apache.cassandra.tools.NodeTool";

/// Environment variable pointing the server at its configuration directory.
pub const CASSANDRA_CONF_VAR: &str = "CASSANDRA_CONF";

/// Environment variable carrying the stop key to `ringmaster-monitor`, so it
/// never shows up in the process list.
pub const MONITOR_STOP_KEY_VAR: &str = "RINGMASTER_MONITOR_STOP_KEY";

const MONITOR_BIN: &str = "ringmaster-monitor";

const JDK11_OPTIONS: &[&str] = &[
    "-Djdk.attach.allowAttachSelf=true",
    "--add-exports=java.base/jdk.internal.misc=ALL-UNNAMED",
    "--add-exports=java.base/jdk.internal.ref=ALL-UNNAMED",
    "--add-exports=java.base/sun.nio.ch=ALL-UNNAMED",
    "--add-exports=java.management.rmi/com.sun.jmx.remote.internal.rmi=ALL-UNNAMED",
    "--add-exports=java.rmi/sun.rmi.registry=ALL-UNNAMED",
    "--add-exports=java.rmi/sun.rmi.server=ALL-UNNAMED",
    "--add-exports=java.sql/java.sql=ALL-UNNAMED",
    "--add-opens=java.base/java.lang.module=ALL-UNNAMED",
    "--add-opens=java.base/jdk.internal.loader=ALL-UNNAMED",
    "--add-opens=java.base/jdk.internal.ref=ALL-UNNAMED",
    "--add-opens=java.base/jdk.internal.reflect=ALL-UNNAMED",
    "--add-opens=java.base/jdk.internal.math=ALL-UNNAMED",
    "--add-opens=java.base/jdk.internal.module=ALL-UNNAMED",
    "--add-opens=java.base/jdk.internal.util.jar=ALL-UNNAMED",
    "--add-opens=jdk.management/com.sun.management.internal=ALL-UNNAMED",
    "--add-opens=java.base/java.io=ALL-UNNAMED",
    "--add-opens=java.base/java.nio=ALL-UNNAMED",
    "--add-opens=java.base/sun.nio.ch=ALL-UNNAMED",
    "--add-opens=java.base/java.util.concurrent=ALL-UNNAMED",
    "--add-opens=java.base/java.util.concurrent.atomic=ALL-UNNAMED",
    "--add-opens=java.base/java.util=ALL-UNNAMED",
    "--add-opens=java.xml/jdk.xml.internal=ALL-UNNAMED",
];

/// A fully resolved argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program name for logs and errors.
    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Resolve an executable: toolchain override, then PATH, then the bare name.
pub fn resolve_executable(
    name: &str,
    toolchain_home: Option<&Path>,
    search_path: Option<OsString>,
) -> PathBuf {
    let file_name = format!("{name}{}", std::env::consts::EXE_SUFFIX);

    if let Some(home) = toolchain_home {
        return home.join("bin").join(&file_name);
    }

    if let Some(path) = search_path {
        for dir in std::env::split_paths(&path) {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                return candidate;
            }
        }
    }

    PathBuf::from(file_name)
}

/// Builds server, nodetool and monitor command lines from configuration.
#[derive(Debug, Clone)]
pub struct ServiceCommandBuilder {
    config: Config,
}

impl ServiceCommandBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// `java` from the configured toolchain, which must exist, or from PATH.
    pub fn java_executable(&self) -> Result<PathBuf> {
        let java = resolve_executable(
            "java",
            self.config.java_home.as_deref(),
            std::env::var_os("PATH"),
        );
        if self.config.java_home.is_some() && !java.is_file() {
            return Err(LaunchError::ExecutableNotFound(java.display().to_string()).into());
        }
        Ok(java)
    }

    /// `ringmaster-monitor`: explicit path, then next to the running binary,
    /// then the bare name.
    pub fn monitor_executable(&self) -> PathBuf {
        if let Some(path) = &self.config.monitor_executable {
            return path.clone();
        }
        let file_name = format!("{MONITOR_BIN}{}", std::env::consts::EXE_SUFFIX);
        if let Ok(current) = std::env::current_exe()
            && let Some(dir) = current.parent()
        {
            let sibling = dir.join(&file_name);
            if sibling.is_file() {
                return sibling;
            }
        }
        PathBuf::from(file_name)
    }

    /// `conf` directory, the distribution jars and any extra entries.
    pub fn classpath(&self, node: &NodeSpec) -> Result<String> {
        let cassandra_home = self.config.require_cassandra_home()?;
        let mut entries = vec![absolute(&node.conf_dir()), cassandra_home.join("lib").join("*")];
        entries.extend(self.config.extra_classpath.iter().cloned());
        let joined = std::env::join_paths(entries)
            .map_err(|e| Error::Other(format!("invalid classpath entry: {e}")))?;
        Ok(joined.to_string_lossy().into_owned())
    }

    /// JVM invocation of the server for `node`, without any wrapper.
    pub fn server_command(&self, node: &NodeSpec) -> Result<CommandSpec> {
        let home = absolute(&node.home_dir);
        let conf = home.join("conf");
        let mut args = vec![format!("-Xmx{}m", self.config.max_memory_mb)];

        if self.config.add_jdk11_options {
            args.extend(JDK11_OPTIONS.iter().map(|s| s.to_string()));
        }

        args.push(format!("-Dcassandra.storagedir={}", home.display()));
        args.push(format!(
            "-Dcassandra.config={}",
            file_url(&conf.join("cassandra.yaml"))
        ));
        args.push(format!("-Dcassandra.logdir={}", home.join("logs").display()));
        args.push(format!(
            "-Dlogback.configurationFile={}",
            conf.join("logback.xml").display()
        ));
        args.push("-Dcassandra-foreground=yes".to_string());
        args.push(format!("-Dcom.sun.management.jmxremote={}", node.jmx_enabled));
        args.push(format!("-DcassandraLogLevel={}", self.config.log_level));
        if node.jmx_enabled {
            args.push(format!(
                "-Dcom.sun.management.jmxremote.port={}",
                node.jmx_port
            ));
            args.push("-Dcom.sun.management.jmxremote.ssl=false".to_string());
            args.push("-Dcom.sun.management.jmxremote.authenticate=false".to_string());
        }
        for (key, value) in &self.config.system_properties {
            args.push(format!("-D{key}={value}"));
        }
        args.push("-cp".to_string());
        args.push(self.classpath(node)?);
        args.push(SERVER_MAIN_CLASS.to_string());

        Ok(CommandSpec::new(self.java_executable()?).args(args))
    }

    /// The command that launches `node`: the server, wrapped in
    /// `ringmaster-monitor` when the node has a control socket.
    pub fn service_command(&self, node: &NodeSpec) -> Result<CommandSpec> {
        let server = self.server_command(node)?;
        if !node.control_socket_enabled() {
            return Ok(server);
        }

        Ok(CommandSpec::new(self.monitor_executable())
            .args([
                "--stop-host".to_string(),
                node.stop_address().to_string(),
                "--stop-port".to_string(),
                node.stop_port.to_string(),
                "--".to_string(),
                server.program_name(),
            ])
            .args(server.args))
    }

    /// `nodetool <args>` against the node's JMX port.
    pub fn nodetool_command(&self, node: &NodeSpec, args: &[String]) -> Result<CommandSpec> {
        Ok(CommandSpec::new(self.java_executable()?)
            .args([
                "-Xmx128m".to_string(),
                "-cp".to_string(),
                self.classpath(node)?,
                NODETOOL_MAIN_CLASS.to_string(),
                "--host".to_string(),
                node.listen_address.to_string(),
                "--port".to_string(),
                self.config.jmx_port.to_string(),
            ])
            .args(args.iter().cloned()))
    }

    /// The current environment plus the node's configuration directory
    /// (and the monitor's stop key when a control socket is used).
    pub fn environment(&self, node: &NodeSpec) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.insert(
            CASSANDRA_CONF_VAR.to_string(),
            absolute(&node.conf_dir()).display().to_string(),
        );
        if node.control_socket_enabled() {
            env.insert(MONITOR_STOP_KEY_VAR.to_string(), node.stop_key.clone());
        }
        env
    }
}

fn file_url(path: &Path) -> String {
    let raw = path.display().to_string().replace('\\', "/");
    if raw.starts_with('/') {
        format!("file://{raw}")
    } else {
        format!("file:///{raw}")
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
