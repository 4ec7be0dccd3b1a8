use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::datalayer::Locality;
use crate::queue::{QueueDelivery, QueueError};

/// Producer/consumer contract of the queue backend.
/// Implementations: ordered keyed streams (redis), framed RPC, memory (tests).
///
/// The dispatcher and the result listener only see this trait, so either
/// transport can back either side.
#[async_trait]
pub trait QueuePort: Send + Sync {
    /// Append one message keyed by its execution token to `topic`.
    async fn enqueue(&self, topic: &str, key: &str, payload: &Bytes) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the next message on `topic`.
    ///
    /// Returns `Ok(None)` when the wait elapses without a message. The
    /// delivery stays at the backend until [`ack`](QueuePort::ack) is called,
    /// unless the transport removes on receive.
    async fn dequeue_blocking(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<QueueDelivery>, QueueError>;

    /// Remove a received delivery so it is not delivered again.
    async fn ack(&self, topic: &str, delivery: &QueueDelivery) -> Result<(), QueueError>;

    /// Release the underlying connection. Later calls fail with `QueueError::Closed`.
    async fn close(&self) -> Result<(), QueueError>;
}

/// Durable key/value store holding execution results and checkpoints.
/// Implementations: redis, memory (tests and local runs).
#[async_trait]
pub trait Datalayer: Send + Sync {
    /// Read a single row. `None` when the key is absent or its value is empty.
    async fn get(
        &self,
        keyspace: &str,
        table: &str,
        key: &str,
        locality: Locality,
    ) -> anyhow::Result<Option<Bytes>>;

    /// Upsert one entry of a named map stored in `map_table`.
    async fn put_into_map(
        &self,
        keyspace: &str,
        map_table: &str,
        map_name: &str,
        key: &str,
        value: &[u8],
        locality: Locality,
    ) -> anyhow::Result<bool>;

    /// Insert a single row. Used by tests and tooling to stage results.
    async fn insert_row(
        &self,
        keyspace: &str,
        table: &str,
        key: &str,
        value: &[u8],
        locality: Locality,
    ) -> anyhow::Result<bool>;

    /// Release the underlying connection.
    async fn close(&self) -> anyhow::Result<()>;
}
