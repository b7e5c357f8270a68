use std::path::PathBuf;

use thiserror::Error;

/// Result type for engine process operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// `start` called while a process is running.
    #[error("mongod is already running")]
    AlreadyRunning,

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// Descriptor has no data directory.
    #[error("missing required option: dbpath")]
    MissingDataDir,

    /// The monitor task panicked or was cancelled.
    #[error("process monitor failed: {0}")]
    Monitor(#[from] tokio::task::JoinError),

    /// `stop` called while no process is running.
    #[error("mongod is not running")]
    NotRunning,

    /// An extra flag reuses a name set from a dedicated descriptor field.
    #[error("flag --{0} is set by the node descriptor and cannot be overridden")]
    ReservedFlag(String),

    /// The executable could not be launched.
    #[error("failed to spawn {executable:?}: {source}")]
    Spawn {
        /// Path that was executed.
        executable: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}
