//! Lifecycle shared by a single engine process and a whole replica set.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use async_trait::async_trait;

/// Something that can be started, stopped and have its on-disk state purged.
#[async_trait]
pub trait Bootable
where
    Self: Send + Sync + 'static,
{
    /// Error returned by lifecycle operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Name used in logs.
    fn name(&self) -> &str;

    /// Start the service. Returns once the start has been issued, not once the
    /// service is ready.
    async fn start(&self) -> Result<(), Self::Error>;

    /// Stop the service and wait for it to exit.
    async fn stop(&self) -> Result<(), Self::Error>;

    /// Remove persisted state. Callers must not purge a running service.
    async fn purge(&self) -> Result<(), Self::Error>;
}
