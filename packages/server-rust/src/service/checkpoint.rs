//! Best-effort checkpointing of dispatched input.
//!
//! After a successful dispatch the payload is recorded twice in the
//! execution's info map (as its input and as the pending next step) so a
//! workflow can be audited or restarted. Writes run on tracked background
//! tasks; their failures are logged and never reach the caller.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use gateway_core::ExecutionId;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::datalayer::SandboxStore;

/// Where checkpoints go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CheckpointMode {
    /// Upserts into the datalayer's checkpoint map.
    #[default]
    Datalayer,
    /// A local log line per record; the datalayer is not written.
    AuditLog,
}

impl CheckpointMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Datalayer => "datalayer",
            Self::AuditLog => "audit-log",
        }
    }
}

impl fmt::Display for CheckpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "datalayer" => Ok(Self::Datalayer),
            "audit-log" | "audit_log" | "log" => Ok(Self::AuditLog),
            other => Err(format!("unknown checkpoint mode '{other}'")),
        }
    }
}

/// Spawns and tracks checkpoint writes.
#[derive(Clone)]
pub struct CheckpointWriter {
    mode: CheckpointMode,
    store: SandboxStore,
    entry_topic: String,
    tracker: TaskTracker,
}

impl CheckpointWriter {
    #[must_use]
    pub fn new(mode: CheckpointMode, store: SandboxStore, entry_topic: impl Into<String>) -> Self {
        Self {
            mode,
            store,
            entry_topic: entry_topic.into(),
            tracker: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> CheckpointMode {
        self.mode
    }

    /// Fire-and-forget checkpoint of `payload` for `id`.
    pub fn spawn(&self, id: ExecutionId, payload: Bytes) {
        let writer = self.clone();
        self.tracker.spawn(async move { writer.write(&id, &payload).await });
    }

    /// Writes one checkpoint inline. Failures are logged.
    pub async fn write(&self, id: &ExecutionId, payload: &[u8]) {
        match self.mode {
            CheckpointMode::Datalayer => {
                if let Err(e) = self.store.put_checkpoint(id, &self.entry_topic, payload).await {
                    warn!(execution_id = %id, error = %e, "checkpoint write failed");
                }
            }
            CheckpointMode::AuditLog => {
                let payload = String::from_utf8_lossy(payload);
                info!(
                    execution_id = %id,
                    map = %format!("execution_info_map_{id}"),
                    key = %format!("input_{id}_{}", self.entry_topic),
                    %payload,
                    "checkpoint"
                );
                info!(
                    execution_id = %id,
                    map = %format!("execution_info_map_{id}"),
                    key = %format!("next_{id}_frontend"),
                    %payload,
                    "checkpoint"
                );
            }
        }
    }

    /// Number of checkpoint tasks still running.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Stops accepting new tasks and waits for the running ones.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
