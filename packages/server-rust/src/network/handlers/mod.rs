//! HTTP handler definitions for the gateway.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod health;
pub mod invoke;
pub mod metrics;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use invoke::invoke_handler;
pub use metrics::metrics_handler;

use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;

use super::ShutdownController;
use crate::service::{InFlightStats, InvocationRouter};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Per-request state machine over the registry, dispatcher and datalayer.
    pub router: InvocationRouter,
    /// Graceful shutdown controller with health state.
    pub shutdown: Arc<ShutdownController>,
    /// Request counts as last published by the in-flight aggregator.
    pub stats: Arc<InFlightStats>,
    /// Prometheus recorder handle; `None` when no recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

/// State over in-memory backends with nothing consuming the entry topic.
#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use std::time::Duration;

    use crate::datalayer::{DatalayerTables, MemoryDatalayer, SandboxStore};
    use crate::queue::MemoryQueue;
    use crate::service::{
        CheckpointMode, CheckpointWriter, Dispatcher, ExecutionRegistry, GatewayConfig,
        InFlightCounter,
    };

    let store = SandboxStore::new(
        Arc::new(MemoryDatalayer::new()),
        DatalayerTables::for_sandbox("test"),
    );
    let config = GatewayConfig {
        entry_topic: "entry".to_string(),
        result_timeout: Some(Duration::from_millis(100)),
        ..GatewayConfig::default()
    };
    let writer = CheckpointWriter::new(CheckpointMode::Datalayer, store.clone(), "entry");
    let dispatcher = Dispatcher::new(Arc::new(MemoryQueue::new()), writer);
    AppState {
        router: InvocationRouter::new(
            ExecutionRegistry::new(),
            dispatcher,
            store,
            Arc::new(config),
            InFlightCounter::disabled(),
        ),
        shutdown: Arc::new(ShutdownController::new()),
        stats: Arc::new(InFlightStats::default()),
        metrics: None,
        start_time: Instant::now(),
    }
}
