//! Gateway configuration: backend selection, topics, sandbox identity and
//! the timeouts bounding result waits and shutdown steps.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::checkpoint::CheckpointMode;

/// Queue transport used for both the entry and the result topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueueTransport {
    /// Redis streams.
    #[default]
    Stream,
    /// Length-delimited RPC over TCP.
    Framed,
    /// In-process queue; only meaningful when a worker shares the process.
    Memory,
}

impl FromStr for QueueTransport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" | "redis" => Ok(Self::Stream),
            "framed" | "rpc" => Ok(Self::Framed),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown queue transport '{other}'")),
        }
    }
}

impl fmt::Display for QueueTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stream => "stream",
            Self::Framed => "framed",
            Self::Memory => "memory",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DatalayerBackend {
    #[default]
    Redis,
    Memory,
}

impl FromStr for DatalayerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown datalayer backend '{other}'")),
        }
    }
}

impl fmt::Display for DatalayerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
        })
    }
}

/// Bounds for each shutdown step.
#[derive(Debug, Clone)]
pub struct ShutdownTimeouts {
    pub http: Duration,
    pub dispatcher: Duration,
    /// Added to the listener's receive timeout, which bounds its last iteration.
    pub listener_grace: Duration,
    pub background: Duration,
    pub datalayer: Duration,
}

impl Default for ShutdownTimeouts {
    fn default() -> Self {
        Self {
            http: Duration::from_secs(30),
            dispatcher: Duration::from_secs(5),
            listener_grace: Duration::from_secs(5),
            background: Duration::from_secs(10),
            datalayer: Duration::from_secs(5),
        }
    }
}

/// Gateway-level configuration: topics, identities, backends and timeouts.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Default destination of new invocations.
    pub entry_topic: String,
    /// Topic the result listener drains.
    pub result_topic: String,
    /// Origin stamped on invocations so continuations route back here.
    pub internal_endpoint: String,
    pub external_endpoint: String,
    pub sandbox_id: String,
    pub user_id: String,
    pub workflow_name: String,
    pub queue_transport: QueueTransport,
    /// `host:port` of the queue backend.
    pub queue_addr: String,
    pub datalayer_backend: DatalayerBackend,
    pub datalayer_addr: String,
    pub checkpoint_mode: CheckpointMode,
    /// Bound on a synchronous wait for a result. `None` waits indefinitely.
    pub result_timeout: Option<Duration>,
    /// Bound on one blocking receive of the result listener.
    pub receive_timeout: Duration,
    /// Age after which a detached registry entry is reaped.
    pub registry_entry_ttl: Duration,
    pub reap_interval: Duration,
    pub shutdown: ShutdownTimeouts,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            entry_topic: String::new(),
            result_topic: String::new(),
            internal_endpoint: String::new(),
            external_endpoint: String::new(),
            sandbox_id: String::new(),
            user_id: String::new(),
            workflow_name: String::new(),
            queue_transport: QueueTransport::default(),
            queue_addr: "127.0.0.1:6379".to_string(),
            datalayer_backend: DatalayerBackend::default(),
            datalayer_addr: "127.0.0.1:6379".to_string(),
            checkpoint_mode: CheckpointMode::default(),
            result_timeout: Some(Duration::from_secs(300)),
            receive_timeout: Duration::from_secs(10),
            registry_entry_ttl: Duration::from_secs(3600),
            reap_interval: Duration::from_secs(60),
            shutdown: ShutdownTimeouts::default(),
        }
    }
}

impl GatewayConfig {
    /// Bound for stopping the result listener.
    #[must_use]
    pub fn listener_stop_timeout(&self) -> Duration {
        self.receive_timeout + self.shutdown.listener_grace
    }
}
