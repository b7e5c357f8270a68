//! Common setup for integration tests

use std::path::Path;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use mango_admin::{AdminClient, Document, Endpoint};
use mango_mongod::NodeDescriptor;
use mango_mongod::test_utils::FakeEngine;
use mango_replica_set::{ReplicaSet, ReplicaSetOptions};

static INIT: Once = Once::new();

pub const PORTS: [u16; 3] = [27017, 27018, 27019];

/// Initialize the global tracing subscriber once per test binary
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    });
}

pub type Calls = Arc<Mutex<Vec<(Endpoint, Document)>>>;

/// Admin client that records every command and answers from a script.
pub struct RecordingClient {
    pub reply: fn() -> mango_admin::Result<Document>,
    pub calls: Calls,
}

impl RecordingClient {
    pub fn new(reply: fn() -> mango_admin::Result<Document>) -> (Self, Calls) {
        let calls = Calls::default();
        let client = Self {
            reply,
            calls: calls.clone(),
        };

        (client, calls)
    }

    pub fn ok() -> (Self, Calls) {
        Self::new(|| Ok(Document::new().with("ok", 1.0)))
    }
}

#[async_trait]
impl AdminClient for RecordingClient {
    async fn run_command(
        &self,
        endpoint: &Endpoint,
        command: Document,
    ) -> mango_admin::Result<Document> {
        self.calls.lock().unwrap().push((endpoint.clone(), command));
        (self.reply)()
    }
}

pub fn descriptors(base: &Path) -> Vec<NodeDescriptor> {
    PORTS
        .iter()
        .map(|port| NodeDescriptor::new("localhost", *port, base.join(port.to_string())))
        .collect()
}

pub fn replica_set(
    engine: &FakeEngine,
    nodes: Vec<NodeDescriptor>,
    client: RecordingClient,
) -> ReplicaSet<RecordingClient> {
    let mut options = ReplicaSetOptions::new(engine.path(), "rs", nodes).with_admin_client(client);
    options.settle_delay = Duration::from_millis(100);
    options.shutdown_timeout = Duration::from_secs(10);

    ReplicaSet::new(options).unwrap()
}
