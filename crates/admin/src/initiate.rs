//! The one-time `replSetInitiate` handshake.

use tracing::{info, warn};

use crate::bson::{Bson, Document};
use crate::client::{AdminClient, Endpoint};
use crate::error::Result;

/// Server error code meaning the replica set was already initiated.
pub const ALREADY_INITIALIZED: i32 = 23;

/// One member of the initial replica-set configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicaSetMember {
    /// 1-based ordinal.
    pub id: i32,
    /// `host:port` other members use to reach this one.
    pub host: String,
}

impl ReplicaSetMember {
    /// Member for the node at zero-based `position` in the node list.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn at_position(position: usize, endpoint: &Endpoint) -> Self {
        Self {
            id: position as i32 + 1,
            host: endpoint.to_string(),
        }
    }

    fn to_document(&self) -> Document {
        Document::new()
            .with("_id", self.id)
            .with("host", self.host.as_str())
    }
}

/// The `replSetInitiate` command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplSetInitiate {
    /// Replica-set name, sent as the config `_id`.
    pub set_name: String,
    /// Configuration version. Always 1 on first bootstrap.
    pub version: i32,
    /// Members in ordinal order.
    pub members: Vec<ReplicaSetMember>,
}

impl ReplSetInitiate {
    /// Creates a first-bootstrap command.
    #[must_use]
    pub fn new(set_name: impl Into<String>, members: Vec<ReplicaSetMember>) -> Self {
        Self {
            set_name: set_name.into(),
            version: 1,
            members,
        }
    }

    /// Builds `{ replSetInitiate: { _id, version, members: [...] } }`.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let members = self
            .members
            .iter()
            .map(|m| Bson::from(m.to_document()))
            .collect::<Vec<_>>();

        let config = Document::new()
            .with("_id", self.set_name.as_str())
            .with("version", self.version)
            .with("members", members);

        Document::new().with("replSetInitiate", config)
    }
}

/// Sends `command` to `endpoint`, treating an already-initiated set as
/// success so the handshake can be retried.
///
/// # Errors
///
/// Returns any other error from [`AdminClient::run_command`].
pub async fn initiate_replica_set<C>(
    client: &C,
    endpoint: &Endpoint,
    command: &ReplSetInitiate,
) -> Result<()>
where
    C: AdminClient + ?Sized,
{
    info!(
        %endpoint,
        set = %command.set_name,
        members = command.members.len(),
        "initiating replica set"
    );

    match client.run_command(endpoint, command.to_document()).await {
        Ok(_) => {
            info!(set = %command.set_name, "replica set initiated");
            Ok(())
        }
        Err(e) if e.is_already_initialized() => {
            warn!(set = %command.set_name, "replica set already initiated");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::Error;

    struct ScriptedClient {
        reply: fn() -> Result<Document>,
        seen: Mutex<Vec<(Endpoint, Document)>>,
    }

    #[async_trait]
    impl AdminClient for ScriptedClient {
        async fn run_command(&self, endpoint: &Endpoint, command: Document) -> Result<Document> {
            self.seen.lock().unwrap().push((endpoint.clone(), command));
            (self.reply)()
        }
    }

    fn members() -> Vec<ReplicaSetMember> {
        [27017, 27018]
            .iter()
            .enumerate()
            .map(|(i, port)| ReplicaSetMember::at_position(i, &Endpoint::new("localhost", *port)))
            .collect()
    }

    #[test]
    fn test_command_shape() {
        let doc = ReplSetInitiate::new("rs", members()).to_document();

        assert_eq!(doc.first_key(), Some("replSetInitiate"));
        let config = doc.get("replSetInitiate").and_then(Bson::as_document).unwrap();
        assert_eq!(config.get("_id").and_then(Bson::as_str), Some("rs"));
        assert_eq!(config.get("version").and_then(Bson::as_i32), Some(1));

        let Some(Bson::Array(members)) = config.get("members") else {
            panic!("members is not an array");
        };
        let hosts: Vec<_> = members
            .iter()
            .map(|m| {
                let m = m.as_document().unwrap();
                (
                    m.get("_id").and_then(Bson::as_i32).unwrap(),
                    m.get("host").and_then(Bson::as_str).unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            hosts,
            vec![
                (1, "localhost:27017".to_string()),
                (2, "localhost:27018".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_already_initialized_is_success() {
        let client = ScriptedClient {
            reply: || {
                Err(Error::Command {
                    code: ALREADY_INITIALIZED,
                    code_name: "AlreadyInitialized".to_string(),
                    message: "already initialized".to_string(),
                })
            },
            seen: Mutex::default(),
        };
        let endpoint = Endpoint::new("localhost", 27017);

        initiate_replica_set(&client, &endpoint, &ReplSetInitiate::new("rs", members()))
            .await
            .unwrap();

        assert_eq!(client.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_other_command_errors_propagate() {
        let client = ScriptedClient {
            reply: || {
                Err(Error::Command {
                    code: 93,
                    code_name: "InvalidReplicaSetConfig".to_string(),
                    message: "bad config".to_string(),
                })
            },
            seen: Mutex::default(),
        };

        let err = initiate_replica_set(
            &client,
            &Endpoint::new("localhost", 27017),
            &ReplSetInitiate::new("rs", members()),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Command { code: 93, .. }));
    }
}
