//! Runs a local `mongod` replica set: starts, stops and purges every node
//! together and performs the one-time initiate handshake.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;
mod shutdown;

pub use error::{Error, NodeFailure, NodeFailures, Result};
pub use shutdown::ShutdownGuard;

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use mango_admin::{
    AdminClient, Endpoint, ReplSetInitiate, ReplicaSetMember, TcpAdminClient,
    initiate_replica_set,
};
use mango_bootable::Bootable;
use mango_mongod::{Mongod, MongodOptions, NodeDescriptor, OutputMode};
use tracing::{debug, info, warn};

/// Default wait between starting the nodes and initiating the set.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Options for configuring a `ReplicaSet`.
pub struct ReplicaSetOptions<C = TcpAdminClient> {
    /// Client used for the initiate handshake.
    pub admin_client: C,

    /// Path to the `mongod` executable.
    pub executable: PathBuf,

    /// Replica-set name, stamped onto every node.
    pub name: String,

    /// Nodes in member order. Node 0 receives the initiate command.
    pub nodes: Vec<NodeDescriptor>,

    /// Where the engines' output goes.
    pub output: OutputMode,

    /// Wait between starting the nodes and initiating the set.
    pub settle_delay: Duration,

    /// Grace period between SIGTERM and SIGKILL for each node.
    pub shutdown_timeout: Duration,
}

impl ReplicaSetOptions {
    /// Options using the TCP admin client and default timings.
    #[must_use]
    pub fn new(
        executable: impl Into<PathBuf>,
        name: impl Into<String>,
        nodes: Vec<NodeDescriptor>,
    ) -> Self {
        Self {
            admin_client: TcpAdminClient::default(),
            executable: executable.into(),
            name: name.into(),
            nodes,
            output: OutputMode::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            shutdown_timeout: mango_mongod::DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl<C> ReplicaSetOptions<C> {
    /// Swaps the admin client.
    #[must_use]
    pub fn with_admin_client<D>(self, admin_client: D) -> ReplicaSetOptions<D> {
        ReplicaSetOptions {
            admin_client,
            executable: self.executable,
            name: self.name,
            nodes: self.nodes,
            output: self.output,
            settle_delay: self.settle_delay,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

/// A set of `mongod` processes sharing one replica-set name.
pub struct ReplicaSet<C = TcpAdminClient> {
    admin_client: C,
    name: String,
    nodes: Vec<Mongod>,
    settle_delay: Duration,
}

impl<C> ReplicaSet<C>
where
    C: AdminClient,
{
    /// Creates a new instance of `ReplicaSet`.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no nodes, two nodes share a port or data
    /// directory, or a descriptor is invalid.
    pub fn new(
        ReplicaSetOptions {
            admin_client,
            executable,
            name,
            nodes,
            output,
            settle_delay,
            shutdown_timeout,
        }: ReplicaSetOptions<C>,
    ) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::NoNodes);
        }

        let mut ports = HashSet::new();
        let mut dbpaths = HashSet::new();
        for descriptor in &nodes {
            if !ports.insert(descriptor.port) {
                return Err(Error::DuplicatePort(descriptor.port));
            }
            if !dbpaths.insert(descriptor.dbpath.clone()) {
                return Err(Error::DuplicateDataDir(descriptor.dbpath.clone()));
            }
        }

        let nodes = nodes
            .into_iter()
            .map(|descriptor| {
                let port = descriptor.port;
                let mut options =
                    MongodOptions::new(&executable, descriptor.with_replica_set(name.as_str()));
                options.output = output;
                options.shutdown_timeout = shutdown_timeout;

                Mongod::new(options).map_err(|source| Error::InvalidNode { port, source })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            admin_client,
            name,
            nodes,
            settle_delay,
        })
    }

    /// Replica-set name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The nodes, in member order.
    #[must_use]
    pub fn nodes(&self) -> &[Mongod] {
        &self.nodes
    }

    /// Members as they are sent in the initiate command.
    #[must_use]
    pub fn members(&self) -> Vec<ReplicaSetMember> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(position, node)| ReplicaSetMember::at_position(position, &endpoint(node)))
            .collect()
    }

    /// Client connection string covering every member.
    #[must_use]
    pub fn connection_string(&self) -> String {
        let hosts = self
            .nodes
            .iter()
            .map(|node| node.descriptor().host())
            .collect::<Vec<_>>();

        format!("mongodb://{}/?replicaSet={}", hosts.join(","), self.name)
    }

    /// Starts every node, waits for them to settle, then initiates the set on
    /// node 0.
    ///
    /// Nodes that started are left running if another node fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Nodes`] if any node failed to start, in which case the
    /// initiate command is not sent, or [`Error::Admin`] if the nodes started
    /// but the handshake failed.
    pub async fn start(&self) -> Result<()> {
        info!(set = %self.name, nodes = self.nodes.len(), "starting replica set...");

        let results = join_all(self.nodes.iter().map(Mongod::start)).await;
        self.check("start", results)?;

        // TODO: poll each node with `hello` instead of sleeping a fixed interval
        debug!(set = %self.name, "waiting {:?} for nodes to settle", self.settle_delay);
        tokio::time::sleep(self.settle_delay).await;

        let primary = endpoint(&self.nodes[0]);
        let command = ReplSetInitiate::new(self.name.as_str(), self.members());
        initiate_replica_set(&self.admin_client, &primary, &command).await?;

        info!(set = %self.name, "replica set running at {}", self.connection_string());

        Ok(())
    }

    /// Stops every node and waits for all of them to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Nodes`] listing the nodes that could not be stopped.
    pub async fn stop(&self) -> Result<()> {
        info!(set = %self.name, "replica set shutting down...");

        let results = join_all(self.nodes.iter().map(Mongod::stop)).await;
        self.check("stop", results)?;

        info!(set = %self.name, "replica set shutdown");

        Ok(())
    }

    /// Removes every node's data directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Nodes`] listing the nodes whose directory could not
    /// be removed.
    pub async fn purge(&self) -> Result<()> {
        info!(set = %self.name, "purging replica set data...");

        let results = join_all(self.nodes.iter().map(Mongod::purge)).await;
        self.check("purge", results)
    }

    fn check(&self, operation: &str, results: Vec<mango_mongod::Result<()>>) -> Result<()> {
        let failures = self
            .nodes
            .iter()
            .zip(results)
            .filter_map(|(node, result)| {
                result.err().map(|error| NodeFailure {
                    node: node.name().to_string(),
                    error,
                })
            })
            .collect::<Vec<_>>();

        if failures.is_empty() {
            return Ok(());
        }

        for failure in &failures {
            warn!(set = %self.name, node = %failure.node, "{} failed: {}", operation, failure.error);
        }

        Err(Error::Nodes(NodeFailures {
            attempted: self.nodes.len(),
            failures,
        }))
    }
}

fn endpoint(node: &Mongod) -> Endpoint {
    let descriptor = node.descriptor();
    Endpoint::new(descriptor.bind_ip.as_str(), descriptor.port)
}

#[async_trait]
impl<C> Bootable for ReplicaSet<C>
where
    C: AdminClient,
{
    type Error = Error;

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<()> {
        Self::start(self).await
    }

    async fn stop(&self) -> Result<()> {
        Self::stop(self).await
    }

    async fn purge(&self) -> Result<()> {
        Self::purge(self).await
    }
}
