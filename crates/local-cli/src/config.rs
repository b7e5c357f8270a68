//! Command-line arguments and what they resolve to.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser};
use mango_mongod::{FlagValue, NodeDescriptor};

use crate::Error;

#[derive(Clone, Debug, Parser)]
#[command(about = "Run a local MongoDB replica set", long_about = None)]
pub struct Args {
    /// Path to the mongod binary
    #[arg(long, env = "MANGO_MONGOD")]
    pub mongod: Option<PathBuf>,

    /// Installed version to run from <base-dir>/installs
    #[arg(long, env = "MANGO_VERSION")]
    pub version: Option<String>,

    /// Directory holding installs and data
    #[arg(long, env = "MANGO_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// Address every node binds to and advertises
    #[arg(long, default_value_t = default_bind_ip(), env = "MANGO_BIND_IP")]
    pub bind_ip: String,

    /// One port per node, in member order
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "27017,27018,27019",
        env = "MANGO_PORTS"
    )]
    pub ports: Vec<u16>,

    /// Replica-set name
    #[arg(long, default_value = "rs", env = "MANGO_REPLICA_SET")]
    pub replica_set: String,

    /// Wipe all data before starting
    #[arg(long, default_value_t = false, env = "MANGO_FRESH")]
    pub fresh: bool,

    /// Pass --ipv6 to every node
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "MANGO_IPV6")]
    pub ipv6: bool,

    /// Wait between starting the nodes and initiating the set
    #[arg(long, default_value_t = 5000, env = "MANGO_SETTLE_DELAY_MS")]
    pub settle_delay_ms: u64,

    /// Extra engine flag as KEY or KEY=VALUE, repeatable
    #[arg(long = "engine-flag", value_parser = parse_engine_flag)]
    pub engine_flags: Vec<(String, FlagValue)>,

    /// Re-emit engine output through the logger
    #[arg(long, default_value_t = false, env = "MANGO_FORWARD_LOGS")]
    pub forward_logs: bool,

    /// Log at debug level
    #[arg(long, default_value_t = false, env = "MANGO_VERBOSE")]
    pub verbose: bool,
}

impl Args {
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// One descriptor per port, each with its own directory under `data_dir`.
    pub fn node_descriptors(&self, data_dir: &Path) -> Vec<NodeDescriptor> {
        self.ports
            .iter()
            .map(|port| {
                let mut descriptor = NodeDescriptor::new(
                    self.bind_ip.as_str(),
                    *port,
                    data_dir.join(port.to_string()),
                )
                .with_flag("ipv6", self.ipv6);

                for (name, value) in &self.engine_flags {
                    descriptor = descriptor.with_flag(name.as_str(), value.clone());
                }

                descriptor
            })
            .collect()
    }
}

/// The machine's hostname on Windows, `localhost` elsewhere.
#[cfg(windows)]
fn default_bind_ip() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

#[cfg(not(windows))]
fn default_bind_ip() -> String {
    "localhost".to_string()
}

/// Parses `KEY` or `KEY=VALUE`. `true`/`false` and integers keep their type.
fn parse_engine_flag(raw: &str) -> Result<(String, FlagValue), String> {
    let (name, value) = match raw.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (raw, None),
    };

    let name = name.trim_start_matches("--");
    if name.is_empty() {
        return Err(format!("missing flag name in `{raw}`"));
    }

    let value = match value {
        None | Some("true") => FlagValue::Bool(true),
        Some("false") => FlagValue::Bool(false),
        Some(value) => value
            .parse::<i64>()
            .map_or_else(|_| FlagValue::Str(value.to_string()), FlagValue::Int),
    };

    Ok((name.to_string(), value))
}

/// `$HOME/.mango-rs`, or the application support directory on macOS.
pub fn default_base_dir() -> Result<PathBuf, Error> {
    if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|dir| dir.join("mango-rs"))
            .ok_or(Error::HomeDirNotFound)
    } else {
        dirs::home_dir()
            .map(|dir| dir.join(".mango-rs"))
            .ok_or(Error::HomeDirNotFound)
    }
}

/// Picks the engine binary: explicit path, then an installed version, then
/// whatever `mongod` is on the `PATH`.
pub fn resolve_mongod(
    explicit: Option<&Path>,
    version: Option<&str>,
    base_dir: &Path,
) -> Result<PathBuf, Error> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(version) = version {
        let path = base_dir.join("installs").join(version).join("mongod");
        if path.is_file() {
            return Ok(path);
        }

        return Err(Error::BinaryNotFound(format!(
            "version {version} is not installed at {}",
            path.display()
        )));
    }

    which::which("mongod")
        .map_err(|e| Error::BinaryNotFound(format!("mongod is not on the PATH: {e}")))
}
