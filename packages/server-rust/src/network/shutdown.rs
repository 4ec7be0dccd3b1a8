//! Health state and the shutdown signal shared by the HTTP server.
//!
//! Uses `ArcSwap` for lock-free health state transitions. In-flight request
//! counting lives with the invocation gauges, not here.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Server health state, transitioned by the shutdown controller.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Server is initializing (not yet accepting requests).
    Starting,
    /// Server is fully operational and accepting requests.
    Ready,
    /// Graceful shutdown has begun; no new connections are accepted.
    Draining,
    /// The HTTP server has returned.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates health state and the graceful-shutdown signal.
///
/// 1. Health probes check `health_state()` to report readiness
/// 2. The server awaits `wait_for_shutdown()` as its graceful-shutdown future
/// 3. `trigger_shutdown()` moves to Draining and wakes every waiter
/// 4. The server calls `set_stopped()` once it has returned
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    health_state: Arc<ArcSwap<HealthState>>,
}

impl ShutdownController {
    /// Creates a new shutdown controller in the `Starting` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            health_state: Arc::new(ArcSwap::from_pointee(HealthState::Starting)),
        }
    }

    /// Transitions to the `Ready` state, indicating the server can accept requests.
    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
    }

    pub fn set_stopped(&self) {
        self.health_state.store(Arc::new(HealthState::Stopped));
    }

    /// Returns a receiver that will be notified when shutdown is triggered.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Initiates graceful shutdown.
    ///
    /// Transitions to `Draining` state and signals all shutdown receivers.
    pub fn trigger_shutdown(&self) {
        self.health_state.store(Arc::new(HealthState::Draining));
        // send_replace stores the value even with no live receivers, so a
        // later wait_for_shutdown still observes it.
        self.shutdown_signal.send_replace(true);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    /// Resolves once `trigger_shutdown()` has been called, including calls
    /// made before this future was created.
    pub fn wait_for_shutdown(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown_signal.subscribe();
        async move {
            // An Err means the controller is gone, which is as final as a signal.
            let _ = rx.wait_for(|triggered| *triggered).await;
        }
    }

    /// Returns the current health state.
    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Returns a shared handle to the health state for use by middleware/handlers.
    #[must_use]
    pub fn health_state_handle(&self) -> Arc<ArcSwap<HealthState>> {
        Arc::clone(&self.health_state)
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn initial_state_is_starting() {
        let controller = ShutdownController::new();
        assert_eq!(controller.health_state(), HealthState::Starting);
        assert!(!controller.is_shutting_down());
    }

    #[test]
    fn health_state_transitions_starting_ready_draining_stopped() {
        let controller = ShutdownController::new();
        assert_eq!(controller.health_state().as_str(), "starting");

        controller.set_ready();
        assert_eq!(controller.health_state(), HealthState::Ready);

        controller.trigger_shutdown();
        assert_eq!(controller.health_state(), HealthState::Draining);
        assert!(controller.is_shutting_down());

        controller.set_stopped();
        assert_eq!(controller.health_state().as_str(), "stopped");
    }

    #[tokio::test]
    async fn shutdown_receiver_notified() {
        let controller = ShutdownController::new();
        let mut rx = controller.shutdown_receiver();
        assert!(!*rx.borrow());

        controller.trigger_shutdown();

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn wait_for_shutdown_resolves_after_trigger() {
        let controller = Arc::new(ShutdownController::new());
        let waiter = tokio::spawn(controller.wait_for_shutdown());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        controller.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wait_for_shutdown_sees_an_earlier_trigger() {
        let controller = ShutdownController::new();
        controller.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(1), controller.wait_for_shutdown())
            .await
            .unwrap();
    }

    #[test]
    fn health_state_handle_shares_state() {
        let controller = ShutdownController::new();
        let handle = controller.health_state_handle();

        assert_eq!(**handle.load(), HealthState::Starting);

        controller.set_ready();
        assert_eq!(**handle.load(), HealthState::Ready);
    }
}
