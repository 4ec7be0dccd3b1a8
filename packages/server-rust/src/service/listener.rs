//! Result listener: drains the result topic and completes registry entries.

use std::sync::Arc;
use std::time::Duration;

use gateway_core::InvocationMessage;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::registry::{CompleteOutcome, ExecutionRegistry};
use crate::queue::QueueError;
use crate::traits::QueuePort;

/// Pause after a transport error before receiving again.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

pub struct ResultListener {
    queue: Arc<dyn QueuePort>,
    registry: ExecutionRegistry,
    topic: String,
    receive_timeout: Duration,
}

/// Handle to a running listener.
pub struct ListenerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ListenerHandle {
    /// Signals the loop to stop at its next boundary and waits for it to
    /// close its transport and exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "result listener task failed");
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl ResultListener {
    #[must_use]
    pub fn new(
        queue: Arc<dyn QueuePort>,
        registry: ExecutionRegistry,
        topic: impl Into<String>,
        receive_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            registry,
            topic: topic.into(),
            receive_timeout,
        }
    }

    #[must_use]
    pub fn spawn(self) -> ListenerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(stop_rx));
        ListenerHandle { stop_tx, join }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        info!(topic = %self.topic, "result listener started");
        while !*stop_rx.borrow() {
            match self.receive_one().await {
                Ok(()) => {}
                Err(QueueError::Closed) => {
                    debug!("result transport closed");
                    break;
                }
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "result receive failed");
                    tokio::select! {
                        () = tokio::time::sleep(ERROR_BACKOFF) => {}
                        _ = stop_rx.changed() => {}
                    }
                }
            }
        }
        if let Err(e) = self.queue.close().await {
            warn!(error = %e, "closing result transport failed");
        }
        info!(topic = %self.topic, "result listener stopped");
    }

    /// One bounded receive. Decode and correlation problems are logged here;
    /// only transport errors are returned.
    async fn receive_one(&self) -> Result<(), QueueError> {
        let Some(delivery) = self
            .queue
            .dequeue_blocking(&self.topic, self.receive_timeout)
            .await?
        else {
            return Ok(());
        };

        if let Err(e) = self.queue.ack(&self.topic, &delivery).await {
            // Someone else took it; handling it here would double-deliver.
            warn!(entry = %delivery.id, error = %e, "result ack failed, skipping");
            return Ok(());
        }

        let message = match InvocationMessage::decode(&delivery.payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(key = %delivery.key, error = %e, "undecodable result dropped");
                return Ok(());
            }
        };
        let id = message.execution_id().clone();
        if self.registry.complete(&id, message) == CompleteOutcome::Delivered {
            debug!(execution_id = %id, "result completed");
        }
        Ok(())
    }
}
