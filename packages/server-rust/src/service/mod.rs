//! Invocation pipeline.
//!
//! 1. **Classification** (`classify`): HTTP parts -> [`RequestKind`]
//! 2. **Routing** (`router`): acts on the kind, registering and waiting on results
//! 3. **Dispatch** (`dispatcher`): publishes to the entry topic, spawns checkpoints
//! 4. **Listening** (`listener`): drains the result topic into the registry
//! 5. **Background workers** (`worker`): in-flight gauges and registry reaping
//! 6. **Shutdown** (`orchestrator`): ordered, bounded teardown

pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod dispatcher;
pub mod gauges;
pub mod listener;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod worker;

// Re-export key types for convenient access.
pub use checkpoint::{CheckpointMode, CheckpointWriter};
pub use classify::{classify, ClassifyError, InvocationRequest, RequestKind};
pub use config::{DatalayerBackend, GatewayConfig, QueueTransport, ShutdownTimeouts};
pub use dispatcher::{DispatchError, DispatchReceipt, Dispatcher};
pub use gauges::{start_aggregator, InFlightAggregator, InFlightCounter, InFlightStats};
pub use listener::{ListenerHandle, ResultListener};
pub use orchestrator::{ShutdownError, ShutdownOrchestrator};
pub use registry::{
    CompleteOutcome, Completion, ExecutionRegistry, ReapNow, Registration, RegistryReaper,
    WaitError,
};
pub use router::{GatewayError, GatewayReply, InvocationRouter};
pub use worker::{BackgroundRunnable, BackgroundWorker};
