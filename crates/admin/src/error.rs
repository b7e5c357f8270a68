//! Error types for administrative commands.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::client::{Endpoint, Phase};
use crate::initiate::ALREADY_INITIALIZED;

/// Result type for administrative commands.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running an administrative command.
#[derive(Debug, Error)]
pub enum Error {
    /// The node replied with `ok: 0`.
    #[error("command failed with code {code} ({code_name}): {message}")]
    Command {
        /// Server error code.
        code: i32,
        /// Symbolic name of the code, if the server sent one.
        code_name: String,
        /// Server error message.
        message: String,
    },

    /// The TCP connection could not be established.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// The endpoint we tried to reach.
        endpoint: Endpoint,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The node closed the connection before replying.
    #[error("connection closed before a reply was received")]
    ConnectionClosed,

    /// I/O error on an established connection.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Malformed wire message or document.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A bounded phase of the exchange did not finish in time.
    #[error("timed out while {phase} after {after:?}")]
    Timeout {
        /// Phase that timed out.
        phase: Phase,
        /// The limit that was exceeded.
        after: Duration,
    },
}

impl Error {
    /// Whether this is the reply sent when the replica set has already been
    /// initiated.
    #[must_use]
    pub const fn is_already_initialized(&self) -> bool {
        matches!(self, Self::Command { code, .. } if *code == ALREADY_INITIALIZED)
    }
}
