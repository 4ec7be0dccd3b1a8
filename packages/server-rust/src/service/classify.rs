//! Request classification: turns the parts of an HTTP request into a
//! [`RequestKind`] the router acts on.
//!
//! Evaluated in priority order: preflight, retrieval by id, content-type
//! check, control message, plain invocation.

use axum::http::{header, HeaderMap, Method};
use bytes::Bytes;
use gateway_core::control::{ACTION_DATA_HEADER, ACTION_HEADER};
use gateway_core::{ControlAction, ControlError, ExecutionId};

/// Content type every non-retrieval request must carry.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// The parts of an HTTP request the router looks at.
#[derive(Debug, Clone, Default)]
pub struct InvocationRequest {
    pub preflight: bool,
    /// First non-empty `executionId` query value.
    pub execution_id: Option<String>,
    pub async_execution: bool,
    pub content_type: Option<String>,
    pub action: Option<String>,
    pub action_data: Option<String>,
    pub body: Bytes,
}

impl InvocationRequest {
    #[must_use]
    pub fn from_parts(method: &Method, query: &[(String, String)], headers: &HeaderMap, body: Bytes) -> Self {
        let first = |name: &str| {
            query
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            preflight: *method == Method::OPTIONS,
            execution_id: first("executionId")
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            async_execution: first("async").is_some_and(is_truthy),
            content_type: header_str(header::CONTENT_TYPE.as_str()),
            action: header_str(ACTION_HEADER),
            action_data: header_str(ACTION_DATA_HEADER),
            body,
        }
    }

    /// Both control headers present and non-empty.
    fn control_headers(&self) -> Option<(&str, &str)> {
        match (self.action.as_deref(), self.action_data.as_deref()) {
            (Some(action), Some(data)) if !action.is_empty() && !data.is_empty() => {
                Some((action, data))
            }
            _ => None,
        }
    }
}

/// `async` query values are truthy unless empty, `false` (any case), or `0`.
#[must_use]
pub fn is_truthy(value: &str) -> bool {
    !value.is_empty() && !value.eq_ignore_ascii_case("false") && value != "0"
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Preflight,
    Retrieve { id: ExecutionId },
    Control(ControlAction),
    Invoke,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Only accepting JSON for now")]
    UnsupportedMediaType,
    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Classifies a request.
///
/// # Errors
///
/// [`ClassifyError::UnsupportedMediaType`] for a non-retrieval request without
/// a JSON content type, [`ClassifyError::Control`] for an unknown action or
/// malformed action data.
pub fn classify(req: &InvocationRequest) -> Result<RequestKind, ClassifyError> {
    if req.preflight {
        return Ok(RequestKind::Preflight);
    }
    if let Some(id) = &req.execution_id {
        return Ok(RequestKind::Retrieve {
            id: ExecutionId::from(id.as_str()),
        });
    }
    let json = req
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.contains(JSON_CONTENT_TYPE));
    if !json {
        return Err(ClassifyError::UnsupportedMediaType);
    }
    match req.control_headers() {
        Some((action, data)) => Ok(RequestKind::Control(ControlAction::parse(action, data)?)),
        None => Ok(RequestKind::Invoke),
    }
}
