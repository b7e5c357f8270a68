use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for replica-set operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Every node started but the initiate handshake failed.
    #[error("failed to initiate replica set: {0}")]
    Admin(#[from] mango_admin::Error),

    /// Two descriptors share a data directory.
    #[error("data directory {0:?} is used by more than one node")]
    DuplicateDataDir(PathBuf),

    /// Two descriptors share a port.
    #[error("port {0} is used by more than one node")]
    DuplicatePort(u16),

    /// A descriptor was rejected.
    #[error("invalid node on port {port}: {source}")]
    InvalidNode {
        /// Port of the rejected descriptor.
        port: u16,
        /// Why it was rejected.
        #[source]
        source: mango_mongod::Error,
    },

    /// The replica set has no nodes.
    #[error("a replica set needs at least one node")]
    NoNodes,

    /// One or more nodes failed a fleet-wide operation.
    #[error(transparent)]
    Nodes(NodeFailures),
}

/// A node that failed a fleet-wide operation.
#[derive(Debug)]
pub struct NodeFailure {
    /// Node name.
    pub node: String,
    /// What went wrong.
    pub error: mango_mongod::Error,
}

/// Per-node failures of one fleet-wide operation.
#[derive(Debug)]
pub struct NodeFailures {
    /// Nodes the operation ran on.
    pub attempted: usize,
    /// Nodes that failed, in node order.
    pub failures: Vec<NodeFailure>,
}

impl NodeFailures {
    /// Iterates over the per-node errors.
    pub fn errors(&self) -> impl Iterator<Item = &mango_mongod::Error> {
        self.failures.iter().map(|f| &f.error)
    }
}

impl fmt::Display for NodeFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} nodes failed", self.failures.len(), self.attempted)?;

        for failure in &self.failures {
            write!(f, "; {}: {}", failure.node, failure.error)?;
        }

        Ok(())
    }
}

impl std::error::Error for NodeFailures {}
