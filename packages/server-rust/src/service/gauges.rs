//! In-flight request accounting.
//!
//! Request handlers only push [`InFlightEvent`]s onto a channel; a single
//! [`InFlightAggregator`] running on a [`BackgroundWorker`] owns the counts
//! and publishes them through the `metrics` facade.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::worker::{BackgroundRunnable, BackgroundWorker};

pub const REQUESTS_STARTED: &str = "knix_workflow_requests_started_count";
pub const REQUESTS_FINISHED: &str = "knix_workflow_requests_finished_count";
pub const REQUESTS_IN_FLIGHT: &str = "knix_workflow_requests_in_flight_count";

const EVENT_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlightEvent {
    Started,
    Finished,
}

/// Counts as last published by the aggregator.
#[derive(Debug, Default)]
pub struct InFlightStats {
    started: AtomicU64,
    finished: AtomicU64,
}

impl InFlightStats {
    #[must_use]
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.started().saturating_sub(self.finished())
    }
}

/// Single consumer of in-flight events.
pub struct InFlightAggregator {
    user: String,
    workflow: String,
    started: u64,
    finished: u64,
    stats: Arc<InFlightStats>,
}

impl InFlightAggregator {
    #[must_use]
    pub fn new(user: impl Into<String>, workflow: impl Into<String>, stats: Arc<InFlightStats>) -> Self {
        Self {
            user: user.into(),
            workflow: workflow.into(),
            started: 0,
            finished: 0,
            stats,
        }
    }

    fn publish(&self) {
        let labels = [
            ("knix_user", self.user.clone()),
            ("knix_workflow", self.workflow.clone()),
        ];
        metrics::counter!(REQUESTS_STARTED, &labels).absolute(self.started);
        metrics::counter!(REQUESTS_FINISHED, &labels).absolute(self.finished);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(REQUESTS_IN_FLIGHT, &labels)
            .set(self.started.saturating_sub(self.finished) as f64);

        self.stats.started.store(self.started, Ordering::Release);
        self.stats.finished.store(self.finished, Ordering::Release);
    }
}

#[async_trait]
impl BackgroundRunnable for InFlightAggregator {
    type Task = InFlightEvent;

    async fn run(&mut self, task: InFlightEvent) {
        match task {
            InFlightEvent::Started => self.started += 1,
            InFlightEvent::Finished => self.finished += 1,
        }
        self.publish();
    }

    async fn shutdown(&mut self) {
        debug!(
            started = self.started,
            finished = self.finished,
            "in-flight aggregator stopped"
        );
    }
}

/// Starts the aggregator and returns it with the producer handle.
#[must_use]
pub fn start_aggregator(aggregator: InFlightAggregator) -> (BackgroundWorker<InFlightAggregator>, InFlightCounter) {
    let worker = BackgroundWorker::start_with_capacity(aggregator, 60_000, EVENT_CAPACITY);
    let counter = InFlightCounter { tx: worker.sender() };
    (worker, counter)
}

/// Producer side, cloned into every request handler.
#[derive(Debug, Clone, Default)]
pub struct InFlightCounter {
    tx: Option<mpsc::Sender<InFlightEvent>>,
}

impl InFlightCounter {
    /// A counter that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Records a request start; the returned guard records its finish.
    #[must_use]
    pub fn track(&self) -> InFlightGuard {
        self.send(InFlightEvent::Started);
        InFlightGuard {
            counter: self.clone(),
        }
    }

    fn send(&self, event: InFlightEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                debug!(?event, error = %e, "in-flight event dropped");
            }
        }
    }
}

pub struct InFlightGuard {
    counter: InFlightCounter,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.send(InFlightEvent::Finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guard_pairs_start_and_finish() {
        let stats = Arc::new(InFlightStats::default());
        let (mut worker, counter) = start_aggregator(InFlightAggregator::new("u", "wf", stats.clone()));

        let first = counter.track();
        let second = counter.clone().track();
        drop(first);
        worker.stop().await;

        assert_eq!(stats.started(), 2);
        assert_eq!(stats.finished(), 1);
        assert_eq!(stats.in_flight(), 1);
        drop(second);
    }

    #[test]
    fn disabled_counter_is_inert() {
        let counter = InFlightCounter::disabled();
        let guard = counter.track();
        drop(guard);
    }
}
