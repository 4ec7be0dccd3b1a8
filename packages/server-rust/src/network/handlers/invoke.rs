//! Invocation endpoint: every method and path not claimed by another route.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::{error, warn};

use super::AppState;
use crate::service::{GatewayError, GatewayReply, InvocationRequest};

const JSON: &str = crate::service::classify::JSON_CONTENT_TYPE;

/// Hands the request to the invocation router and renders its outcome.
pub async fn invoke_handler(
    State(state): State<AppState>,
    method: Method,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<GatewayReply, GatewayError> {
    let request = InvocationRequest::from_parts(&method, &query, &headers, body);
    state.router.handle(request).await
}

impl IntoResponse for GatewayReply {
    fn into_response(self) -> Response {
        match self {
            Self::Preflight => (StatusCode::OK, [(header::CONTENT_TYPE, JSON)]).into_response(),
            Self::Empty => StatusCode::OK.into_response(),
            Self::Token(id) => (StatusCode::OK, id.into_string()).into_response(),
            Self::Payload(payload) => {
                (StatusCode::OK, [(header::CONTENT_TYPE, JSON)], payload).into_response()
            }
            Self::Placeholder(id) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, JSON)],
                GatewayReply::placeholder_body(&id),
            )
                .into_response(),
        }
    }
}

impl GatewayError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::UnreadableBody | Self::Control(_) => StatusCode::BAD_REQUEST,
            Self::Dispatch(_) | Self::Datalayer(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ResultTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = ?self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gateway_core::{ControlError, ExecutionId};

    use super::*;
    use crate::service::WaitError;

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn placeholder_renders_null_result() {
        let response = GatewayReply::Placeholder(ExecutionId::from("abc")).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["executionId"], "abc");
        assert!(json["result"].is_null());
    }

    #[tokio::test]
    async fn token_body_is_the_bare_id() {
        let response = GatewayReply::Token(ExecutionId::from("abc")).into_response();
        assert_eq!(body_string(response).await, "abc");
    }

    #[tokio::test]
    async fn empty_reply_has_no_body() {
        let response = GatewayReply::Empty.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.is_empty());
    }

    #[test]
    fn errors_map_to_statuses() {
        assert_eq!(
            GatewayError::UnsupportedMediaType.status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(GatewayError::UnreadableBody.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            GatewayError::Control(ControlError::UnknownAction {
                action: "x".to_string()
            })
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Datalayer(anyhow::anyhow!("down")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::ResultTimeout(WaitError::TimedOut(Duration::from_secs(1))).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[tokio::test]
    async fn error_body_is_the_message() {
        let response = GatewayError::UnsupportedMediaType.into_response();
        assert_eq!(body_string(response).await, "Only accepting JSON for now");
    }
}
