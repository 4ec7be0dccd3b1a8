//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates resources,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. Binding early lets startup fail before the listener and
//! background workers are left running against a server that never came up.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::info;

use super::config::NetworkConfig;
use super::handlers::{
    health_handler, invoke_handler, liveness_handler, metrics_handler, readiness_handler,
    AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::{InFlightStats, InvocationRouter};

/// Manages the HTTP server lifecycle.
///
/// 1. `new()` -- allocates shared state (shutdown controller, app state)
/// 2. `start()` -- binds TCP listener to the configured address
/// 3. `serve()` -- accepts connections until `trigger_shutdown()` is called
///    on the shared controller, then drains in-flight requests
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    state: AppState,
}

impl NetworkModule {
    /// Creates a new network module without binding any port.
    #[must_use]
    pub fn new(config: NetworkConfig, router: InvocationRouter, stats: Arc<InFlightStats>) -> Self {
        Self {
            config,
            listener: None,
            state: AppState {
                router,
                shutdown: Arc::new(ShutdownController::new()),
                stats,
                metrics: None,
                start_time: Instant::now(),
            },
        }
    }

    /// Serves `handle` on `GET /metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Returns a shared reference to the shutdown controller.
    ///
    /// The shutdown orchestrator triggers it to begin the HTTP drain.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health` -- detailed health JSON
    /// - `GET /health/live` -- Kubernetes liveness probe
    /// - `GET /health/ready` -- Kubernetes readiness probe
    /// - `GET /metrics` -- Prometheus exposition
    /// - anything else -- invocation endpoint
    ///
    /// Request bodies are unbounded unless `max_body_bytes` is configured.
    pub fn build_router(&self) -> Router {
        let body_limit = match self.config.max_body_bytes {
            Some(max) => DefaultBodyLimit::max(max),
            None => DefaultBodyLimit::disable(),
        };
        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .fallback(invoke_handler)
            .layer(body_limit)
            .layer(build_http_layers(&self.config))
            .with_state(self.state.clone())
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until the shutdown controller is triggered.
    ///
    /// New connections stop being accepted once shutdown begins; the call
    /// returns after in-flight requests finish and the state is `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first, or if the server
    /// encounters a fatal I/O error.
    pub async fn serve(self) -> anyhow::Result<()> {
        let router = self.build_router();
        let Some(listener) = self.listener else {
            anyhow::bail!("start() must be called before serve()");
        };
        let shutdown = Arc::clone(&self.state.shutdown);

        // Transition to Ready so readiness probes pass.
        shutdown.set_ready();
        info!("Serving HTTP connections");

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.wait_for_shutdown())
            .await;
        shutdown.set_stopped();
        info!("HTTP server stopped");
        served.map_err(Into::into)
    }
}
