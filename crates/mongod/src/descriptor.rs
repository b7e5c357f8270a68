//! Node descriptors and command-line flag encoding.

use std::fmt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Flags derived from dedicated descriptor fields.
pub const RESERVED_FLAGS: [&str; 4] = ["bind_ip", "port", "dbpath", "replSet"];

/// Value of one engine flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlagValue {
    /// No value. Emits nothing.
    Absent,
    /// `true` emits a bare flag, `false` nothing.
    Bool(bool),
    /// Integer argument. Zero emits nothing.
    Int(i64),
    /// String argument. Empty emits nothing.
    Str(String),
}

impl FlagValue {
    /// Whether the flag is left off the command line entirely.
    #[must_use]
    pub fn is_omitted(&self) -> bool {
        match self {
            Self::Absent | Self::Bool(false) | Self::Int(0) => true,
            Self::Str(s) => s.is_empty(),
            Self::Bool(true) | Self::Int(_) => false,
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u16> for FlagValue {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&Path> for FlagValue {
    fn from(value: &Path) -> Self {
        Self::Str(value.to_string_lossy().into_owned())
    }
}

impl<T: Into<Self>> From<Option<T>> for FlagValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Absent, Into::into)
    }
}

/// Engine flags in the order they are passed.
pub type EngineFlags = IndexMap<String, FlagValue>;

/// Encodes `flags` as an argument vector: `true` becomes `--flag`, omitted
/// values vanish, anything else becomes `--flag value`.
#[must_use]
pub fn encode_args<'a, I>(flags: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a String, &'a FlagValue)>,
{
    flags
        .into_iter()
        .filter(|(_, value)| !value.is_omitted())
        .flat_map(|(name, value)| match value {
            FlagValue::Bool(true) => vec![format!("--{name}")],
            _ => vec![format!("--{name}"), value.to_string()],
        })
        .collect()
}

/// Everything needed to launch one engine process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// Address the engine listens on and advertises to its peers.
    pub bind_ip: String,

    /// The directory to store data in.
    pub dbpath: PathBuf,

    /// Additional flags, appended after the dedicated ones.
    pub extra_flags: EngineFlags,

    /// The port to listen on.
    pub port: u16,

    /// Replica-set name. Stamped by the coordinator.
    pub replica_set: Option<String>,
}

impl NodeDescriptor {
    /// Creates a descriptor with no extra flags and no replica set.
    #[must_use]
    pub fn new(bind_ip: impl Into<String>, port: u16, dbpath: impl Into<PathBuf>) -> Self {
        Self {
            bind_ip: bind_ip.into(),
            dbpath: dbpath.into(),
            extra_flags: EngineFlags::new(),
            port,
            replica_set: None,
        }
    }

    /// Adds an extra engine flag.
    #[must_use]
    pub fn with_flag(mut self, name: impl Into<String>, value: impl Into<FlagValue>) -> Self {
        self.extra_flags.insert(name.into(), value.into());
        self
    }

    /// Sets the replica-set name.
    #[must_use]
    pub fn with_replica_set(mut self, name: impl Into<String>) -> Self {
        self.replica_set = Some(name.into());
        self
    }

    /// `bind_ip:port`, the address peers use for this node.
    #[must_use]
    pub fn host(&self) -> String {
        format!("{}:{}", self.bind_ip, self.port)
    }

    /// Checks the descriptor can be launched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDataDir`] if `dbpath` is empty, or
    /// [`Error::ReservedFlag`] if an extra flag shadows a dedicated field.
    pub fn validate(&self) -> Result<()> {
        if self.dbpath.as_os_str().is_empty() {
            return Err(Error::MissingDataDir);
        }

        if let Some(name) = self
            .extra_flags
            .keys()
            .find(|name| RESERVED_FLAGS.contains(&name.as_str()))
        {
            return Err(Error::ReservedFlag(name.clone()));
        }

        Ok(())
    }

    /// Full ordered flag map: dedicated fields first, then extras.
    #[must_use]
    pub fn flags(&self) -> EngineFlags {
        let mut flags = EngineFlags::with_capacity(RESERVED_FLAGS.len() + self.extra_flags.len());

        flags.insert("bind_ip".to_string(), self.bind_ip.as_str().into());
        flags.insert("port".to_string(), self.port.into());
        flags.insert("dbpath".to_string(), self.dbpath.as_path().into());
        flags.insert("replSet".to_string(), self.replica_set.as_deref().into());

        for (name, value) in &self.extra_flags {
            flags.insert(name.clone(), value.clone());
        }

        flags
    }

    /// Command-line arguments for this node.
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        encode_args(&self.flags())
    }
}
