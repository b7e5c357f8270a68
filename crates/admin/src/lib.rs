//! Runs single administrative commands against a database engine node.
//!
//! The client opens one connection per command, speaks just enough of the
//! OP_MSG wire protocol to send a command document and read its reply, and
//! closes the connection before returning.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod bson;
mod client;
mod error;
mod initiate;
mod wire;

pub use bson::{Bson, Document, MAX_NESTING_DEPTH};
pub use client::{
    ADMIN_DB, AdminClient, AdminClientOptions, DEFAULT_CONNECT_TIMEOUT, Endpoint, Phase,
    TcpAdminClient,
};
pub use error::{Error, Result};
pub use initiate::{ALREADY_INITIALIZED, ReplSetInitiate, ReplicaSetMember, initiate_replica_set};
pub use wire::{OpMsg, OpMsgCodec};
