//! Gateway assembly.
//!
//! [`GatewayPorts`] holds the three backend connections; [`Gateway::start`]
//! wires them into the registry, router, result listener and background
//! workers, and [`Gateway::shutdown_sequence`] tears them down in order.

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use crate::datalayer::{DatalayerTables, MemoryDatalayer, RedisDatalayer, SandboxStore};
use crate::queue::{FramedRpcQueue, MemoryQueue, StreamQueue};
use crate::service::{
    start_aggregator, BackgroundWorker, CheckpointWriter, DatalayerBackend, Dispatcher,
    ExecutionRegistry, GatewayConfig, InFlightAggregator, InFlightStats, InvocationRouter,
    ListenerHandle, QueueTransport, RegistryReaper, ResultListener, ShutdownOrchestrator,
};
use crate::traits::{Datalayer, QueuePort};

/// Backend connections the gateway runs on.
///
/// The producer and consumer are separate so a blocking receive on the
/// result topic never holds up a dispatch.
pub struct GatewayPorts {
    pub producer: Arc<dyn QueuePort>,
    pub consumer: Arc<dyn QueuePort>,
    pub datalayer: Arc<dyn Datalayer>,
}

impl GatewayPorts {
    /// Connects the configured queue transport and datalayer backend.
    ///
    /// # Errors
    ///
    /// Returns the first connection failure; nothing is left running.
    pub async fn connect(config: &GatewayConfig) -> anyhow::Result<Self> {
        let datalayer: Arc<dyn Datalayer> = match config.datalayer_backend {
            DatalayerBackend::Redis => Arc::new(RedisDatalayer::connect(&config.datalayer_addr).await?),
            DatalayerBackend::Memory => Arc::new(MemoryDatalayer::new()),
        };
        let (producer, consumer): (Arc<dyn QueuePort>, Arc<dyn QueuePort>) = match config.queue_transport {
            QueueTransport::Stream => (
                Arc::new(StreamQueue::connect(&config.queue_addr).await?),
                Arc::new(StreamQueue::connect(&config.queue_addr).await?),
            ),
            QueueTransport::Framed => (
                Arc::new(FramedRpcQueue::connect(&config.queue_addr).await?),
                Arc::new(FramedRpcQueue::connect(&config.queue_addr).await?),
            ),
            QueueTransport::Memory => {
                let queue = Arc::new(MemoryQueue::new());
                (queue.clone(), queue)
            }
        };
        info!(
            transport = %config.queue_transport,
            queue = %config.queue_addr,
            datalayer = %config.datalayer_backend,
            "backends connected"
        );
        Ok(Self {
            producer,
            consumer,
            datalayer,
        })
    }

    /// One shared in-memory queue for both directions.
    #[must_use]
    pub fn in_memory(queue: Arc<MemoryQueue>, datalayer: Arc<MemoryDatalayer>) -> Self {
        Self {
            producer: queue.clone(),
            consumer: queue,
            datalayer,
        }
    }
}

/// A running gateway minus its HTTP server.
pub struct Gateway {
    config: Arc<GatewayConfig>,
    router: InvocationRouter,
    dispatcher: Dispatcher,
    store: SandboxStore,
    stats: Arc<InFlightStats>,
    listener: ListenerHandle,
    aggregator: BackgroundWorker<InFlightAggregator>,
    reaper: BackgroundWorker<RegistryReaper>,
}

impl Gateway {
    /// Spawns the result listener, the in-flight aggregator and the registry
    /// reaper. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn start(config: GatewayConfig, ports: GatewayPorts) -> Self {
        let config = Arc::new(config);
        let registry = ExecutionRegistry::new();
        let store = SandboxStore::new(ports.datalayer, DatalayerTables::for_sandbox(&config.sandbox_id));

        let checkpoints = CheckpointWriter::new(config.checkpoint_mode, store.clone(), config.entry_topic.clone());
        let dispatcher = Dispatcher::new(ports.producer, checkpoints);

        let stats = Arc::new(InFlightStats::default());
        let (aggregator, in_flight) = start_aggregator(InFlightAggregator::new(
            config.user_id.clone(),
            config.workflow_name.clone(),
            Arc::clone(&stats),
        ));
        let reap_tick_ms = u64::try_from(config.reap_interval.as_millis()).unwrap_or(u64::MAX);
        let reaper = BackgroundWorker::start(
            RegistryReaper::new(registry.clone(), config.registry_entry_ttl),
            reap_tick_ms,
        );
        let listener = ResultListener::new(
            ports.consumer,
            registry.clone(),
            config.result_topic.clone(),
            config.receive_timeout,
        )
        .spawn();

        let router = InvocationRouter::new(
            registry,
            dispatcher.clone(),
            store.clone(),
            Arc::clone(&config),
            in_flight,
        );
        info!(
            entry_topic = %config.entry_topic,
            result_topic = %config.result_topic,
            checkpoint = %config.checkpoint_mode,
            "gateway started"
        );

        Self {
            config,
            router,
            dispatcher,
            store,
            stats,
            listener,
            aggregator,
            reaper,
        }
    }

    #[must_use]
    pub fn router(&self) -> InvocationRouter {
        self.router.clone()
    }

    #[must_use]
    pub fn stats(&self) -> Arc<InFlightStats> {
        Arc::clone(&self.stats)
    }

    #[must_use]
    pub fn registry(&self) -> &ExecutionRegistry {
        self.router.registry()
    }

    /// Builds the ordered teardown, starting with `http`, which should
    /// trigger the server's graceful shutdown and resolve once it returns.
    pub fn shutdown_sequence<F>(self, http: F) -> ShutdownOrchestrator
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let Self {
            config,
            dispatcher,
            store,
            listener,
            mut aggregator,
            mut reaper,
            ..
        } = self;
        let bounds = &config.shutdown;
        let checkpoints = dispatcher.checkpoints().clone();

        ShutdownOrchestrator::new()
            .step("http", bounds.http, http)
            .step("dispatcher", bounds.dispatcher, async move {
                dispatcher.close().await?;
                anyhow::Ok(())
            })
            .step("listener", config.listener_stop_timeout(), async move {
                listener.stop().await;
                anyhow::Ok(())
            })
            .step("background", bounds.background, async move {
                checkpoints.drain().await;
                aggregator.stop().await;
                reaper.stop().await;
                anyhow::Ok(())
            })
            .step("datalayer", bounds.datalayer, async move { store.close().await })
    }
}
