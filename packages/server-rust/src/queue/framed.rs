//! Framed RPC queue transport.
//!
//! Talks to a queue service over TCP. Each request and reply is one
//! length-delimited frame holding a `MsgPack` envelope (`rmp_serde::to_vec_named()`).
//! Queue payloads are [`FramedMessage`] frames, so the execution token travels
//! inside the payload and the server never inspects it.
//!
//! The service removes a message when it hands it out, so [`QueuePort::ack`]
//! has nothing left to do here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use gateway_core::{ExecutionId, FramedMessage};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};

use super::{QueueDelivery, QueueError};
use crate::traits::QueuePort;

/// Extra time granted to the service beyond a dequeue's own blocking window.
const DEQUEUE_GRACE: Duration = Duration::from_secs(2);

/// Default bound on a single enqueue round trip.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests understood by the queue service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcRequest {
    AddMessage { topic: String, payload: ByteBuf },
    GetAndRemoveMessage { topic: String, timeout_ms: u64 },
}

/// Replies sent by the queue service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcResponse {
    Added {
        success: bool,
        error: Option<String>,
    },
    Message {
        payload: Option<ByteBuf>,
    },
}

type Connection = Framed<TcpStream, LengthDelimitedCodec>;

/// Queue client speaking the framed RPC protocol.
///
/// Holds at most one connection, opened lazily and dropped after any I/O
/// error or timeout so the next call reconnects.
pub struct FramedRpcQueue {
    addr: String,
    conn: Mutex<Option<Connection>>,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl FramedRpcQueue {
    /// Opens the first connection to `addr` eagerly so startup fails fast.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Io`] if the service cannot be reached.
    pub async fn connect(addr: &str) -> Result<Self, QueueError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(%addr, "framed queue connected");
        Ok(Self {
            addr: addr.to_string(),
            conn: Mutex::new(Some(Framed::new(stream, LengthDelimitedCodec::new()))),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn call(&self, request: &RpcRequest, bound: Duration) -> Result<RpcResponse, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let frame = rmp_serde::to_vec_named(request)
            .map_err(|e| QueueError::Protocol(format!("encode request: {e}")))?;

        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let stream = TcpStream::connect(&self.addr).await?;
            stream.set_nodelay(true)?;
            debug!(addr = %self.addr, "framed queue reconnected");
            *guard = Some(Framed::new(stream, LengthDelimitedCodec::new()));
        }
        let Some(conn) = guard.as_mut() else {
            return Err(QueueError::Closed);
        };

        let exchange = async {
            conn.send(Bytes::from(frame)).await?;
            let reply = conn.next().await.ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "queue service closed the connection",
                )
            })??;
            Ok::<_, QueueError>(reply)
        };
        let outcome = match tokio::time::timeout(bound, exchange).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout(bound)),
        };

        match outcome {
            Ok(reply) => rmp_serde::from_slice(&reply)
                .map_err(|e| QueueError::Protocol(format!("decode reply: {e}"))),
            Err(e) => {
                warn!(addr = %self.addr, error = %e, "dropping queue connection");
                guard.take();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl QueuePort for FramedRpcQueue {
    async fn enqueue(&self, topic: &str, key: &str, payload: &Bytes) -> Result<(), QueueError> {
        let frame = FramedMessage::new(&ExecutionId::from(key), payload.clone())
            .encode()
            .map_err(|e| QueueError::Protocol(e.to_string()))?;
        let request = RpcRequest::AddMessage {
            topic: topic.to_string(),
            payload: ByteBuf::from(frame.to_vec()),
        };
        match self.call(&request, self.request_timeout).await? {
            RpcResponse::Added { success: true, .. } => Ok(()),
            RpcResponse::Added { error, .. } => Err(QueueError::Rejected(
                error.unwrap_or_else(|| "enqueue refused".to_string()),
            )),
            RpcResponse::Message { .. } => {
                Err(QueueError::Protocol("unexpected reply to ADD_MESSAGE".to_string()))
            }
        }
    }

    async fn dequeue_blocking(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<QueueDelivery>, QueueError> {
        let request = RpcRequest::GetAndRemoveMessage {
            topic: topic.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
        match self.call(&request, timeout + DEQUEUE_GRACE).await? {
            RpcResponse::Message { payload: None } => Ok(None),
            RpcResponse::Message {
                payload: Some(payload),
            } => {
                let frame = FramedMessage::decode(Bytes::from(payload.into_vec()))
                    .map_err(|e| QueueError::Protocol(e.to_string()))?;
                let key = String::from_utf8(frame.key.to_vec())
                    .map_err(|e| QueueError::Protocol(format!("non-UTF-8 key: {e}")))?;
                Ok(Some(QueueDelivery {
                    id: String::new(),
                    key,
                    payload: frame.payload,
                }))
            }
            RpcResponse::Added { .. } => Err(QueueError::Protocol(
                "unexpected reply to GET_AND_REMOVE_MESSAGE".to_string(),
            )),
        }
    }

    async fn ack(&self, _topic: &str, _delivery: &QueueDelivery) -> Result<(), QueueError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        if let Some(mut conn) = self.conn.lock().await.take() {
            if let Err(e) = SinkExt::<Bytes>::close(&mut conn).await {
                debug!(error = %e, "error closing queue connection");
            }
        }
        Ok(())
    }
}
