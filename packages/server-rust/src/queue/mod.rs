//! Queue backend adapters behind the [`QueuePort`](crate::traits::QueuePort)
//! contract.
//!
//! - [`StreamQueue`]: ordered, topic-named redis streams (`XADD`/`XREAD`/`XDEL`)
//! - [`FramedRpcQueue`]: length-delimited RPC over TCP carrying framed payloads
//! - [`MemoryQueue`]: in-process queue for tests and embedding

pub mod framed;
pub mod memory;
pub mod stream;

pub use framed::FramedRpcQueue;
pub use memory::MemoryQueue;
pub use stream::StreamQueue;

use std::time::Duration;

use bytes::Bytes;

/// A message taken from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDelivery {
    /// Backend-assigned entry id; empty when the transport removes on receive.
    pub id: String,
    /// Execution token the producer keyed the message with.
    pub key: String,
    /// Serialized invocation message.
    pub payload: Bytes,
}

/// Errors returned by queue transports.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue transport is closed")]
    Closed,
    #[error("queue backend rejected the request: {0}")]
    Rejected(String),
    #[error("queue operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed queue reply: {0}")]
    Protocol(String),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
