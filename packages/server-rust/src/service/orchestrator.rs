//! Ordered, bounded shutdown.
//!
//! Steps run one at a time in the order they were added. A step that fails
//! is logged and the sequence moves on; a step that outlives its bound aborts
//! the sequence, since there is no state to resume from.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

type StepFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("shutdown step '{step}' exceeded {bound:?}")]
    StepTimedOut { step: &'static str, bound: Duration },
}

struct Step {
    name: &'static str,
    bound: Duration,
    fut: StepFuture,
}

/// Builder and runner for the shutdown sequence.
#[derive(Default)]
pub struct ShutdownOrchestrator {
    steps: Vec<Step>,
}

impl ShutdownOrchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step. `fut` is not polled until the step's turn.
    #[must_use]
    pub fn step<F>(mut self, name: &'static str, bound: Duration, fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.steps.push(Step {
            name,
            bound,
            fut: Box::pin(fut),
        });
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step in order.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError::StepTimedOut`] for the first step that
    /// exceeds its bound; later steps are not run.
    pub async fn run(self) -> Result<(), ShutdownError> {
        let started = Instant::now();
        for Step { name, bound, fut } in self.steps {
            let step_started = Instant::now();
            match tokio::time::timeout(bound, fut).await {
                Ok(Ok(())) => {
                    info!(step = name, elapsed_ms = step_started.elapsed().as_millis(), "shutdown step done");
                }
                Ok(Err(e)) => {
                    warn!(step = name, error = %e, "shutdown step failed");
                }
                Err(_) => {
                    error!(step = name, ?bound, "shutdown step timed out");
                    return Err(ShutdownError::StepTimedOut { step: name, bound });
                }
            }
        }
        info!(elapsed_ms = started.elapsed().as_millis(), "shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    fn done() -> anyhow::Result<()> {
        Ok(())
    }

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn steps_run_in_order() {
        let log = recorder();
        let mut orchestrator = ShutdownOrchestrator::new();
        for name in ["http", "dispatcher", "listener", "datalayer"] {
            let log = Arc::clone(&log);
            orchestrator = orchestrator.step(name, Duration::from_secs(1), async move {
                log.lock().push(name);
                done()
            });
        }
        assert_eq!(orchestrator.len(), 4);
        orchestrator.run().await.unwrap();
        assert_eq!(*log.lock(), vec!["http", "dispatcher", "listener", "datalayer"]);
    }

    #[tokio::test]
    async fn failing_step_does_not_stop_the_sequence() {
        let log = recorder();
        let tail = Arc::clone(&log);
        ShutdownOrchestrator::new()
            .step("broken", Duration::from_secs(1), async { Err::<(), _>(anyhow::anyhow!("boom")) })
            .step("after", Duration::from_secs(1), async move {
                tail.lock().push("after");
                done()
            })
            .run()
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[tokio::test]
    async fn timeout_aborts_remaining_steps() {
        let log = recorder();
        let tail = Arc::clone(&log);
        let err = ShutdownOrchestrator::new()
            .step("stuck", Duration::from_millis(20), async {
                std::future::pending::<()>().await;
                done()
            })
            .step("never", Duration::from_secs(1), async move {
                tail.lock().push("never");
                done()
            })
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, ShutdownError::StepTimedOut { step: "stuck", .. }));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn steps_are_lazy() {
        let log = recorder();
        let inner = Arc::clone(&log);
        let orchestrator = ShutdownOrchestrator::new().step("lazy", Duration::from_secs(1), async move {
            inner.lock().push("ran");
            done()
        });
        assert!(log.lock().is_empty());
        orchestrator.run().await.unwrap();
        assert_eq!(log.lock().len(), 1);
    }
}
