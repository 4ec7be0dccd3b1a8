//! Hands invocation messages to the queue backend.

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use gateway_core::{InvocationMessage, WireError};
use tracing::{debug, warn};

use super::checkpoint::CheckpointWriter;
use crate::queue::QueueError;
use crate::traits::QueuePort;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] WireError),
    #[error("queue transport failed: {0}")]
    Transport(#[from] QueueError),
}

/// Timestamps bracketing a successful send.
#[derive(Debug, Clone, Copy)]
pub struct DispatchReceipt {
    pub send_started_at: SystemTime,
    pub sent_at: SystemTime,
}

/// Serializes messages and enqueues them on a transport-agnostic [`QueuePort`].
///
/// A failed serialization or send is final; nothing is retried.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<dyn QueuePort>,
    checkpoints: CheckpointWriter,
}

impl Dispatcher {
    #[must_use]
    pub fn new(queue: Arc<dyn QueuePort>, checkpoints: CheckpointWriter) -> Self {
        Self { queue, checkpoints }
    }

    /// Sends `message` to `topic`. With `checkpoint` set, a successful send
    /// also spawns a checkpoint write of the payload.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Serialize`] before anything is sent, or
    /// [`DispatchError::Transport`] when the backend refuses the message.
    pub async fn dispatch(
        &self,
        message: &InvocationMessage,
        topic: &str,
        checkpoint: bool,
    ) -> Result<DispatchReceipt, DispatchError> {
        let payload = Bytes::from(message.encode()?);
        let id = message.execution_id();

        let send_started_at = SystemTime::now();
        if let Err(e) = self.queue.enqueue(topic, id.as_str(), &payload).await {
            warn!(execution_id = %id, %topic, error = %e, "dispatch failed");
            return Err(e.into());
        }
        let sent_at = SystemTime::now();
        debug!(execution_id = %id, %topic, bytes = payload.len(), "dispatched");

        if checkpoint {
            self.checkpoints.spawn(id.clone(), payload);
        }
        Ok(DispatchReceipt {
            send_started_at,
            sent_at,
        })
    }

    #[must_use]
    pub fn checkpoints(&self) -> &CheckpointWriter {
        &self.checkpoints
    }

    /// Closes the outbound transport.
    ///
    /// # Errors
    ///
    /// Propagates the transport's close failure.
    pub async fn close(&self) -> Result<(), QueueError> {
        self.queue.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gateway_core::ExecutionId;

    use super::*;
    use crate::datalayer::{DatalayerTables, MemoryDatalayer, SandboxStore};
    use crate::queue::MemoryQueue;
    use crate::service::checkpoint::CheckpointMode;

    fn setup() -> (Arc<MemoryQueue>, Arc<MemoryDatalayer>, Dispatcher) {
        let queue = Arc::new(MemoryQueue::new());
        let dl = Arc::new(MemoryDatalayer::new());
        let store = SandboxStore::new(dl.clone(), DatalayerTables::for_sandbox("s"));
        let writer = CheckpointWriter::new(CheckpointMode::Datalayer, store, "entry");
        (queue.clone(), dl, Dispatcher::new(queue, writer))
    }

    #[tokio::test]
    async fn dispatch_enqueues_keyed_payload_and_checkpoints() {
        let (queue, dl, dispatcher) = setup();
        let msg = InvocationMessage::new(ExecutionId::from("e1"), false, "{\"x\":1}");

        let receipt = dispatcher.dispatch(&msg, "entry", true).await.unwrap();
        assert!(receipt.sent_at >= receipt.send_started_at);

        let delivery = queue
            .dequeue_blocking("entry", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.key, "e1");
        assert_eq!(InvocationMessage::decode(&delivery.payload).unwrap(), msg);

        dispatcher.checkpoints().drain().await;
        assert_eq!(dl.map_entry_count(), 2);
    }

    #[tokio::test]
    async fn control_dispatch_skips_checkpoint() {
        let (_queue, dl, dispatcher) = setup();
        let msg = InvocationMessage::new(ExecutionId::from("e2"), true, "x");
        dispatcher.dispatch(&msg, "other", false).await.unwrap();
        dispatcher.checkpoints().drain().await;
        assert_eq!(dl.map_entry_count(), 0);
    }

    #[tokio::test]
    async fn transport_failure_is_reported_without_checkpoint() {
        let (queue, dl, dispatcher) = setup();
        queue.close().await.unwrap();
        let msg = InvocationMessage::new(ExecutionId::from("e3"), false, "x");
        let err = dispatcher.dispatch(&msg, "entry", true).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(QueueError::Closed)));
        dispatcher.checkpoints().drain().await;
        assert_eq!(dl.map_entry_count(), 0);
    }
}
