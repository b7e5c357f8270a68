//! One connection, one command, one reply.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::bson::{Bson, Document};
use crate::error::{Error, Result};
use crate::wire::{OpMsg, OpMsgCodec};

/// Database every administrative command runs against.
pub const ADMIN_DB: &str = "admin";

/// Default bound on establishing the TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Host and port of one node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Progress of a single command exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Establishing the TCP connection.
    Connecting,
    /// Command sent, waiting for the reply.
    AwaitingReply,
    /// Reply received or exchange abandoned; connection closed.
    Settled,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::AwaitingReply => f.write_str("awaiting reply"),
            Self::Settled => f.write_str("settled"),
        }
    }
}

/// Runs a single administrative command against a single node.
///
/// This is the only way the orchestration layer talks to the engine, so the
/// wire client behind it can be replaced without touching the coordinator.
#[async_trait]
pub trait AdminClient
where
    Self: Send + Sync + 'static,
{
    /// Runs `command` against the admin database of `endpoint` and returns the
    /// reply document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Command`] if the node replied with `ok: 0`, or a
    /// connection, timeout or protocol error.
    async fn run_command(&self, endpoint: &Endpoint, command: Document) -> Result<Document>;
}

/// Options for configuring a `TcpAdminClient`.
#[derive(Clone, Debug)]
pub struct AdminClientOptions {
    /// Bound on establishing the connection.
    pub connect_timeout: Duration,

    /// Bound on the command round trip. `None` waits indefinitely.
    pub operation_timeout: Option<Duration>,
}

impl Default for AdminClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: None,
        }
    }
}

/// [`AdminClient`] speaking OP_MSG over a fresh TCP connection per command.
#[derive(Debug)]
pub struct TcpAdminClient {
    next_request_id: AtomicI32,
    options: AdminClientOptions,
}

impl TcpAdminClient {
    /// Creates a new `TcpAdminClient`.
    #[must_use]
    pub const fn new(options: AdminClientOptions) -> Self {
        Self {
            next_request_id: AtomicI32::new(1),
            options,
        }
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<TcpStream> {
        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));

        let stream = tokio::time::timeout(self.options.connect_timeout, connect)
            .await
            .map_err(|_| Error::Timeout {
                phase: Phase::Connecting,
                after: self.options.connect_timeout,
            })?
            .map_err(|source| Error::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;

        stream.set_nodelay(true)?;

        Ok(stream)
    }

    async fn exchange(
        framed: &mut Framed<TcpStream, OpMsgCodec>,
        request: OpMsg,
    ) -> Result<OpMsg> {
        let request_id = request.request_id;
        framed.send(request).await?;

        let reply = framed.next().await.ok_or(Error::ConnectionClosed)??;

        if reply.response_to != request_id {
            return Err(Error::Protocol(format!(
                "reply answers request {} instead of {request_id}",
                reply.response_to
            )));
        }

        Ok(reply)
    }
}

impl Default for TcpAdminClient {
    fn default() -> Self {
        Self::new(AdminClientOptions::default())
    }
}

#[async_trait]
impl AdminClient for TcpAdminClient {
    async fn run_command(&self, endpoint: &Endpoint, command: Document) -> Result<Document> {
        let name = command.first_key().unwrap_or_default().to_string();
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);

        debug!(%endpoint, command = %name, phase = %Phase::Connecting, "opening admin connection");
        let stream = self.connect(endpoint).await?;
        let mut framed = Framed::new(stream, OpMsgCodec::new());

        debug!(%endpoint, command = %name, phase = %Phase::AwaitingReply, "sending admin command");
        let request = OpMsg::request(request_id, command.with("$db", ADMIN_DB));
        let outcome = match self.options.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, Self::exchange(&mut framed, request))
                .await
                .unwrap_or(Err(Error::Timeout {
                    phase: Phase::AwaitingReply,
                    after: limit,
                })),
            None => Self::exchange(&mut framed, request).await,
        };

        // the connection never outlives the call, whatever the outcome
        if let Err(e) = SinkExt::<OpMsg>::close(&mut framed).await {
            trace!(%endpoint, "error closing admin connection: {}", e);
        }
        drop(framed);
        trace!(%endpoint, command = %name, phase = %Phase::Settled, "admin connection closed");

        let body = outcome?.body;
        check_reply(body).inspect_err(|e| warn!(%endpoint, command = %name, "admin command failed: {}", e))
    }
}

/// Turns an `ok: 0` reply into [`Error::Command`].
fn check_reply(body: Document) -> Result<Document> {
    if body.get("ok").is_some_and(Bson::is_truthy) {
        return Ok(body);
    }

    Err(Error::Command {
        code: body.get("code").and_then(Bson::as_i32).unwrap_or_default(),
        code_name: body
            .get("codeName")
            .and_then(Bson::as_str)
            .unwrap_or_default()
            .to_string(),
        message: body
            .get("errmsg")
            .and_then(Bson::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}
