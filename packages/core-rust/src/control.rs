//! Control messages.
//!
//! A request carrying both the `x-mfn-action` and `x-mfn-action-data`
//! headers is a control message rather than a plain invocation. Each action
//! has its own payload shape; [`ControlAction::parse`] turns the header pair
//! into a typed variant so callers dispatch with an exhaustive `match`.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::message::InvocationMessage;
use crate::wire::WireError;

/// Header naming the control action.
pub const ACTION_HEADER: &str = "x-mfn-action";

/// Header carrying the action-specific payload.
pub const ACTION_DATA_HEADER: &str = "x-mfn-action-data";

/// Recognized control actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    SessionUpdate,
    PostParallel,
    PostMap,
    GlobalPub,
    TriggerEvent,
    RemoteResult,
}

impl ActionKind {
    /// Header value for this action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionUpdate => "session-update",
            Self::PostParallel => "post-parallel",
            Self::PostMap => "post-map",
            Self::GlobalPub => "global-pub",
            Self::TriggerEvent => "trigger-event",
            Self::RemoteResult => "remote-result",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session-update" => Ok(Self::SessionUpdate),
            "post-parallel" => Ok(Self::PostParallel),
            "post-map" => Ok(Self::PostMap),
            "global-pub" => Ok(Self::GlobalPub),
            "trigger-event" => Ok(Self::TriggerEvent),
            "remote-result" => Ok(Self::RemoteResult),
            other => Err(ControlError::UnknownAction {
                action: other.to_string(),
            }),
        }
    }
}

/// Errors from parsing a control message.
///
/// All of these are scoped to the offending request.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("unknown control action `{action}`")]
    UnknownAction { action: String },
    #[error("malformed {action} action data: {source}")]
    MalformedData {
        action: ActionKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed remote result message: {0}")]
    MalformedResult(#[source] WireError),
}

/// Payload of a `session-update` action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionUpdate {
    #[serde(alias = "Topic")]
    pub topic: String,
    #[serde(alias = "Key")]
    pub key: String,
    #[serde(alias = "Value", default)]
    pub value: String,
    #[serde(default)]
    pub client_origin_frontend: String,
}

/// Payload of a `post-parallel` action, emitted by workers when a parallel
/// branch finishes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostParallel {
    #[serde(rename = "Key", alias = "key")]
    pub key: String,
    #[serde(rename = "Topic", alias = "topic")]
    pub topic: String,
    #[serde(rename = "__state_action", default)]
    pub state_action: String,
    #[serde(rename = "__async_execution", default)]
    pub async_execution: bool,
    #[serde(rename = "CounterValue", default)]
    pub counter_value: i64,
    #[serde(rename = "WorkflowInstanceMetadataStorageKey", default)]
    pub workflow_instance_metadata_storage_key: String,
}

#[derive(Deserialize)]
struct RemoteResultData {
    #[serde(alias = "Key", default)]
    key: String,
    #[serde(alias = "Value")]
    value: String,
}

/// A parsed control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlAction {
    SessionUpdate(SessionUpdate),
    /// The raw action data travels on as the user payload.
    PostParallel { payload: PostParallel, raw: String },
    /// The action data is the destination topic, verbatim.
    TriggerEvent { topic: String },
    /// A result produced elsewhere, to be delivered to a local waiter.
    RemoteResult {
        key: String,
        message: Box<InvocationMessage>,
    },
    PostMap,
    GlobalPub,
}

impl ControlAction {
    /// Parses the header pair into a typed action.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::UnknownAction` for unrecognized action names,
    /// `ControlError::MalformedData` when the JSON payload of a
    /// session-update, post-parallel, or remote-result action does not
    /// parse, and `ControlError::MalformedResult` when the embedded remote
    /// result is not a valid invocation message.
    pub fn parse(action: &str, data: &str) -> Result<Self, ControlError> {
        let kind: ActionKind = action.parse()?;
        let malformed = |source: serde_json::Error| ControlError::MalformedData {
            action: kind,
            source,
        };
        match kind {
            ActionKind::SessionUpdate => serde_json::from_str(data)
                .map(Self::SessionUpdate)
                .map_err(malformed),
            ActionKind::PostParallel => serde_json::from_str(data)
                .map(|payload| Self::PostParallel {
                    payload,
                    raw: data.to_string(),
                })
                .map_err(malformed),
            ActionKind::TriggerEvent => Ok(Self::TriggerEvent {
                topic: data.to_string(),
            }),
            ActionKind::RemoteResult => {
                let parsed: RemoteResultData = serde_json::from_str(data).map_err(malformed)?;
                let message = InvocationMessage::decode(parsed.value.as_bytes())
                    .map_err(ControlError::MalformedResult)?;
                Ok(Self::RemoteResult {
                    key: parsed.key,
                    message: Box::new(message),
                })
            }
            ActionKind::PostMap => Ok(Self::PostMap),
            ActionKind::GlobalPub => Ok(Self::GlobalPub),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::SessionUpdate(_) => ActionKind::SessionUpdate,
            Self::PostParallel { .. } => ActionKind::PostParallel,
            Self::TriggerEvent { .. } => ActionKind::TriggerEvent,
            Self::RemoteResult { .. } => ActionKind::RemoteResult,
            Self::PostMap => ActionKind::PostMap,
            Self::GlobalPub => ActionKind::GlobalPub,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::id::ExecutionId;

    #[test]
    fn action_names_round_trip_through_from_str() {
        for kind in [
            ActionKind::SessionUpdate,
            ActionKind::PostParallel,
            ActionKind::PostMap,
            ActionKind::GlobalPub,
            ActionKind::TriggerEvent,
            ActionKind::RemoteResult,
        ] {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = ControlAction::parse("teleport", "{}").unwrap_err();
        assert!(matches!(err, ControlError::UnknownAction { action } if action == "teleport"));
    }

    #[test]
    fn parses_session_update() {
        let data = json!({
            "topic": "wf-topic",
            "key": "abc",
            "value": "hello",
            "client_origin_frontend": "10.0.0.2:8080"
        })
        .to_string();
        let action = ControlAction::parse("session-update", &data).unwrap();
        let ControlAction::SessionUpdate(update) = action else {
            panic!("expected session update");
        };
        assert_eq!(update.topic, "wf-topic");
        assert_eq!(update.key, "abc");
        assert_eq!(update.value, "hello");
        assert_eq!(update.client_origin_frontend, "10.0.0.2:8080");
    }

    #[test]
    fn parses_post_parallel_and_keeps_raw_data() {
        let data = json!({
            "Key": "abc",
            "Topic": "join-topic",
            "__state_action": "post_parallel_processing",
            "__async_execution": true,
            "CounterValue": 3,
            "WorkflowInstanceMetadataStorageKey": "meta-key"
        })
        .to_string();
        let action = ControlAction::parse("post-parallel", &data).unwrap();
        let ControlAction::PostParallel { payload, raw } = action else {
            panic!("expected post-parallel");
        };
        assert_eq!(payload.key, "abc");
        assert_eq!(payload.topic, "join-topic");
        assert_eq!(payload.state_action, "post_parallel_processing");
        assert!(payload.async_execution);
        assert_eq!(payload.counter_value, 3);
        assert_eq!(payload.workflow_instance_metadata_storage_key, "meta-key");
        assert_eq!(raw, data);
    }

    #[test]
    fn trigger_event_takes_topic_verbatim() {
        let action = ControlAction::parse("trigger-event", "other-entry-topic").unwrap();
        assert_eq!(
            action,
            ControlAction::TriggerEvent {
                topic: "other-entry-topic".to_string()
            }
        );
    }

    #[test]
    fn parses_remote_result_with_embedded_message() {
        let inner = InvocationMessage::new(ExecutionId::from("abc"), false, "42");
        let data = json!({
            "key": "abc",
            "value": String::from_utf8(inner.encode().unwrap()).unwrap(),
        })
        .to_string();
        let action = ControlAction::parse("remote-result", &data).unwrap();
        let ControlAction::RemoteResult { key, message } = action else {
            panic!("expected remote result");
        };
        assert_eq!(key, "abc");
        assert_eq!(*message, inner);
    }

    #[test]
    fn malformed_json_is_a_request_error() {
        for action in ["session-update", "post-parallel", "remote-result"] {
            let err = ControlAction::parse(action, "{not json").unwrap_err();
            assert!(matches!(err, ControlError::MalformedData { .. }), "{action}");
        }
    }

    #[test]
    fn remote_result_with_bad_inner_message_is_rejected() {
        let data = json!({"key": "abc", "value": "nope"}).to_string();
        let err = ControlAction::parse("remote-result", &data).unwrap_err();
        assert!(matches!(err, ControlError::MalformedResult(_)));
    }

    #[test]
    fn reserved_actions_parse_to_unit_variants() {
        assert_eq!(ControlAction::parse("post-map", "x").unwrap(), ControlAction::PostMap);
        assert_eq!(ControlAction::parse("global-pub", "x").unwrap(), ControlAction::GlobalPub);
    }
}
