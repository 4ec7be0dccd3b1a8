//! Invocation messages exchanged between the gateway and the execution
//! pipeline.
//!
//! The JSON shape is shared with the function workers, so field names are
//! fixed by the wire format rather than by Rust naming conventions:
//!
//! ```json
//! {"__mfnmetadata": {"__execution_id": "...", "__async_execution": false, ...},
//!  "__mfnuserdata": "..."}
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::id::ExecutionId;
use crate::wire::WireError;

/// System metadata carried alongside the user payload.
///
/// Fields other than the ones modelled here (workers add e.g.
/// `__result_topic`) are kept in `extra` so a decoded result re-encodes
/// without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "__execution_id")]
    execution_id: ExecutionId,
    #[serde(rename = "__function_execution_id", default)]
    function_execution_id: ExecutionId,
    #[serde(rename = "__async_execution", default)]
    async_execution: bool,
    #[serde(
        rename = "__client_origin_frontend",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    client_origin_frontend: String,
    #[serde(rename = "__timestamp_frontend_entry", default)]
    timestamp_frontend_entry: f64,
    #[serde(
        rename = "__state_action",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    state_action: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// The unit of work (or result) travelling through the pipeline.
///
/// Once constructed, the execution id and entry timestamp never change.
/// The user payload is opaque to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationMessage {
    #[serde(rename = "__mfnmetadata")]
    metadata: Metadata,
    #[serde(rename = "__mfnuserdata", default)]
    user_data: String,
}

impl InvocationMessage {
    /// Creates a message for `id`, stamping the current time as the
    /// frontend entry timestamp. The id doubles as the function execution id.
    #[must_use]
    pub fn new(id: ExecutionId, async_execution: bool, user_data: impl Into<String>) -> Self {
        Self {
            metadata: Metadata {
                function_execution_id: id.clone(),
                execution_id: id,
                async_execution,
                client_origin_frontend: String::new(),
                timestamp_frontend_entry: now_secs(),
                state_action: None,
                extra: serde_json::Map::new(),
            },
            user_data: user_data.into(),
        }
    }

    /// Sets the origin used to route continuations back to this gateway.
    #[must_use]
    pub fn with_client_origin(mut self, origin: impl Into<String>) -> Self {
        self.metadata.client_origin_frontend = origin.into();
        self
    }

    /// Tags the message with a workflow-continuation state action.
    #[must_use]
    pub fn with_state_action(mut self, action: impl Into<String>) -> Self {
        self.metadata.state_action = Some(action.into());
        self
    }

    #[must_use]
    pub fn execution_id(&self) -> &ExecutionId {
        &self.metadata.execution_id
    }

    #[must_use]
    pub fn function_execution_id(&self) -> &ExecutionId {
        &self.metadata.function_execution_id
    }

    #[must_use]
    pub fn is_async(&self) -> bool {
        self.metadata.async_execution
    }

    #[must_use]
    pub fn client_origin_frontend(&self) -> &str {
        &self.metadata.client_origin_frontend
    }

    /// Fractional seconds since the Unix epoch at which the gateway created
    /// the message.
    #[must_use]
    pub fn timestamp_frontend_entry(&self) -> f64 {
        self.metadata.timestamp_frontend_entry
    }

    #[must_use]
    pub fn state_action(&self) -> Option<&str> {
        self.metadata.state_action.as_deref()
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn user_data(&self) -> &str {
        &self.user_data
    }

    /// Consumes the message, returning the user payload.
    #[must_use]
    pub fn into_user_data(self) -> String {
        self.user_data
    }

    /// Serializes the message to its JSON wire payload.
    ///
    /// # Errors
    ///
    /// Returns `WireError::Json` if serialization fails (e.g. a non-finite
    /// timestamp).
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a JSON wire payload.
    ///
    /// # Errors
    ///
    /// Returns `WireError::Json` if the payload is not a valid message.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Metadata {
    /// Metadata fields not modelled explicitly, as written by workers.
    #[must_use]
    pub fn extra(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.extra
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}
