//! Invocation routing: the per-request state machine between the HTTP layer,
//! the registry, the dispatcher, and the datalayer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use gateway_core::{ControlAction, ControlError, ExecutionId, InvocationMessage};
use tower::Service;
use tracing::{debug, info, warn};

use super::classify::{classify, ClassifyError, InvocationRequest, RequestKind};
use super::config::GatewayConfig;
use super::dispatcher::{DispatchError, Dispatcher};
use super::gauges::InFlightCounter;
use super::registry::{ExecutionRegistry, WaitError};
use crate::datalayer::SandboxStore;

// ---------------------------------------------------------------------------
// Replies and errors
// ---------------------------------------------------------------------------

/// Successful outcome of a request, rendered by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayReply {
    /// CORS preflight acknowledgement.
    Preflight,
    /// Control message accepted; no body.
    Empty,
    /// Async invocation accepted; the body is the execution token.
    Token(ExecutionId),
    /// A result's user payload.
    Payload(String),
    /// Async retrieval with no result yet: `{"executionId": ..., "result": null}`.
    Placeholder(ExecutionId),
}

impl GatewayReply {
    #[must_use]
    pub fn placeholder_body(id: &ExecutionId) -> String {
        serde_json::json!({ "executionId": id.as_str(), "result": null }).to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Only accepting JSON for now")]
    UnsupportedMediaType,
    #[error("can't read body")]
    UnreadableBody,
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("Error submitting event to system")]
    Dispatch(#[from] DispatchError),
    #[error("Can't fetch result")]
    Datalayer(#[source] anyhow::Error),
    #[error("Result not available in time")]
    ResultTimeout(#[from] WaitError),
}

impl From<ClassifyError> for GatewayError {
    fn from(e: ClassifyError) -> Self {
        match e {
            ClassifyError::UnsupportedMediaType => Self::UnsupportedMediaType,
            ClassifyError::Control(c) => Self::Control(c),
        }
    }
}

fn epoch_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// ---------------------------------------------------------------------------
// InvocationRouter
// ---------------------------------------------------------------------------

/// Drives one request through classification, dispatch, and correlation.
///
/// Cheap to clone; every clone shares the same registry and transports.
#[derive(Clone)]
pub struct InvocationRouter {
    registry: ExecutionRegistry,
    dispatcher: Dispatcher,
    store: SandboxStore,
    config: Arc<GatewayConfig>,
    in_flight: InFlightCounter,
}

/// How a message reached the dispatch step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// A new invocation; registered for retrieval and checkpointed.
    Invocation,
    /// A session update or workflow continuation.
    Control,
}

impl InvocationRouter {
    #[must_use]
    pub fn new(
        registry: ExecutionRegistry,
        dispatcher: Dispatcher,
        store: SandboxStore,
        config: Arc<GatewayConfig>,
        in_flight: InFlightCounter,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            store,
            config,
            in_flight,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    /// Handles one request.
    ///
    /// # Errors
    ///
    /// See [`GatewayError`]; each variant maps to one HTTP status.
    pub async fn handle(&self, req: InvocationRequest) -> Result<GatewayReply, GatewayError> {
        let entered_at = SystemTime::now();
        match classify(&req)? {
            RequestKind::Preflight => Ok(GatewayReply::Preflight),
            RequestKind::Retrieve { id } => self.retrieve(id, req.async_execution).await,
            RequestKind::Control(action) => self.control(action, &req, entered_at).await,
            RequestKind::Invoke => {
                let message = self.new_invocation(&req)?;
                let topic = self.config.entry_topic.clone();
                self.submit(message, &topic, Origin::Invocation, entered_at).await
            }
        }
    }

    async fn retrieve(&self, id: ExecutionId, async_execution: bool) -> Result<GatewayReply, GatewayError> {
        if async_execution {
            return match self.fetch(&id).await? {
                Some(message) => Ok(GatewayReply::Payload(message.into_user_data())),
                None => {
                    debug!(execution_id = %id, "result not yet available");
                    Ok(GatewayReply::Placeholder(id))
                }
            };
        }

        // Register before reading the store so a result landing in between
        // is delivered to the waiter instead of dropped.
        let registration = self.registry.register(&id);
        if let Some(message) = self.fetch(&id).await? {
            return Ok(GatewayReply::Payload(message.into_user_data()));
        }
        debug!(execution_id = %id, "result not yet available, waiting");
        let done = registration.wait(self.config.result_timeout).await?;
        Ok(GatewayReply::Payload(done.message.into_user_data()))
    }

    async fn fetch(&self, id: &ExecutionId) -> Result<Option<InvocationMessage>, GatewayError> {
        self.store.fetch_result(id).await.map_err(|e| {
            warn!(execution_id = %id, error = %e, "couldn't fetch result");
            GatewayError::Datalayer(e)
        })
    }

    async fn control(
        &self,
        action: ControlAction,
        req: &InvocationRequest,
        entered_at: SystemTime,
    ) -> Result<GatewayReply, GatewayError> {
        debug!(action = %action.kind(), "control message");
        match action {
            ControlAction::SessionUpdate(update) => {
                let message = InvocationMessage::new(
                    ExecutionId::from(update.key),
                    req.async_execution,
                    update.value,
                )
                .with_client_origin(update.client_origin_frontend);
                self.submit(message, &update.topic, Origin::Control, entered_at).await
            }
            ControlAction::PostParallel { payload, raw } => {
                let mut message = InvocationMessage::new(
                    ExecutionId::from(payload.key),
                    payload.async_execution,
                    raw,
                );
                if !payload.state_action.is_empty() {
                    message = message.with_state_action(payload.state_action);
                }
                self.submit(message, &payload.topic, Origin::Control, entered_at).await
            }
            ControlAction::TriggerEvent { topic } => {
                let message = self.new_invocation(req)?;
                self.submit(message, &topic, Origin::Invocation, entered_at).await
            }
            ControlAction::RemoteResult { key, message } => {
                let id = message.execution_id().clone();
                debug!(execution_id = %id, %key, "remote result");
                self.registry.complete(&id, *message);
                Ok(GatewayReply::Empty)
            }
            ControlAction::PostMap | ControlAction::GlobalPub => Ok(GatewayReply::Empty),
        }
    }

    fn new_invocation(&self, req: &InvocationRequest) -> Result<InvocationMessage, GatewayError> {
        let body = std::str::from_utf8(&req.body).map_err(|_| GatewayError::UnreadableBody)?;
        Ok(
            InvocationMessage::new(ExecutionId::generate(), req.async_execution, body)
                .with_client_origin(self.config.internal_endpoint.as_str()),
        )
    }

    async fn submit(
        &self,
        message: InvocationMessage,
        topic: &str,
        origin: Origin,
        entered_at: SystemTime,
    ) -> Result<GatewayReply, GatewayError> {
        let id = message.execution_id().clone();
        let checkpoint = origin == Origin::Invocation;

        if message.is_async() {
            // Registered before the send so a fast result is not dropped; the
            // guard cleans up if the send fails.
            let registration = checkpoint.then(|| self.registry.register(&id));
            self.dispatcher.dispatch(&message, topic, checkpoint).await?;
            if let Some(registration) = registration {
                registration.detach();
            }
            return Ok(GatewayReply::Token(id));
        }

        let _in_flight = self.in_flight.track();
        let registration = self.registry.register(&id);
        let receipt = self.dispatcher.dispatch(&message, topic, checkpoint).await?;
        let done = registration.wait(self.config.result_timeout).await?;
        drop(registration);

        let exited_at = SystemTime::now();
        let send = epoch_millis(receipt.send_started_at);
        let received = epoch_millis(done.received_at);
        info!(
            execution_id = %id,
            tfe_entry = epoch_millis(entered_at),
            tfe_sendlq = send,
            tfe_sentlq = epoch_millis(receipt.sent_at),
            tfe_rcvdlq = received,
            tfe_exit = epoch_millis(exited_at),
            latency_roundtrip_ms = received.saturating_sub(send),
            "ResumedUserSession"
        );
        Ok(GatewayReply::Payload(done.message.into_user_data()))
    }
}

type BoxedFuture = Pin<Box<dyn Future<Output = Result<GatewayReply, GatewayError>> + Send>>;

impl Service<InvocationRequest> for InvocationRouter {
    type Response = GatewayReply;
    type Error = GatewayError;
    type Future = BoxedFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: InvocationRequest) -> Self::Future {
        let router = self.clone();
        Box::pin(async move { router.handle(req).await })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
