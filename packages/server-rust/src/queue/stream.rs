//! Redis-streams queue transport.
//!
//! Each topic is a stream. Producers `XADD` entries carrying the execution
//! token and the serialized message; the consumer reads the oldest entry with
//! a bounded `XREAD BLOCK` and removes it with `XDEL` once taken.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gateway_core::wire::{STREAM_KEY_FIELD, STREAM_VALUE_FIELD};
use redis::aio::ConnectionManager;
use redis::streams::StreamReadReply;
use tokio::sync::Mutex;
use tracing::debug;

use super::{QueueDelivery, QueueError};
use crate::traits::QueuePort;

/// Stream queue over a single managed redis connection.
///
/// Commands are serialized through the connection mutex, so a consumer
/// blocked in `XREAD` holds it for up to the receive timeout. Producer and
/// consumer therefore use separate instances.
pub struct StreamQueue {
    conn: Mutex<Option<ConnectionManager>>,
}

impl StreamQueue {
    /// Connects to `addr`, accepting either `host:port` or a full `redis://` URL.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Redis`] when the address is invalid or the
    /// server is unreachable.
    pub async fn connect(addr: &str) -> Result<Self, QueueError> {
        let url = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("redis://{addr}")
        };
        let client = redis::Client::open(url.as_str())?;
        let conn = client.get_connection_manager().await?;
        debug!(%url, "stream queue connected");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }
}

fn block_millis(timeout: Duration) -> u64 {
    // BLOCK 0 waits forever.
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn into_delivery(reply: Option<StreamReadReply>) -> Result<Option<QueueDelivery>, QueueError> {
    let Some(reply) = reply else {
        return Ok(None);
    };
    let Some(entry) = reply.keys.into_iter().flat_map(|k| k.ids).next() else {
        return Ok(None);
    };
    let key: String = entry.get(STREAM_KEY_FIELD).ok_or_else(|| {
        QueueError::Protocol(format!("entry {} has no '{STREAM_KEY_FIELD}' field", entry.id))
    })?;
    let payload: Vec<u8> = entry.get(STREAM_VALUE_FIELD).ok_or_else(|| {
        QueueError::Protocol(format!(
            "entry {} has no '{STREAM_VALUE_FIELD}' field",
            entry.id
        ))
    })?;
    Ok(Some(QueueDelivery {
        id: entry.id,
        key,
        payload: Bytes::from(payload),
    }))
}

#[async_trait]
impl QueuePort for StreamQueue {
    async fn enqueue(&self, topic: &str, key: &str, payload: &Bytes) -> Result<(), QueueError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(QueueError::Closed)?;
        let _id: String = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg(STREAM_KEY_FIELD)
            .arg(key)
            .arg(STREAM_VALUE_FIELD)
            .arg(payload.as_ref())
            .query_async(conn)
            .await?;
        Ok(())
    }

    async fn dequeue_blocking(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<QueueDelivery>, QueueError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(QueueError::Closed)?;
        let reply: Option<StreamReadReply> = redis::cmd("XREAD")
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block_millis(timeout))
            .arg("STREAMS")
            .arg(topic)
            .arg("0")
            .query_async(conn)
            .await?;
        into_delivery(reply)
    }

    async fn ack(&self, topic: &str, delivery: &QueueDelivery) -> Result<(), QueueError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(QueueError::Closed)?;
        let removed: i64 = redis::cmd("XDEL")
            .arg(topic)
            .arg(&delivery.id)
            .query_async(conn)
            .await?;
        if removed == 1 {
            Ok(())
        } else {
            Err(QueueError::Rejected(format!(
                "XDEL {topic} {} removed {removed} entries",
                delivery.id
            )))
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.conn.lock().await.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use redis::streams::{StreamId, StreamKey};
    use redis::Value;

    use super::*;

    fn entry(id: &str, fields: &[(&str, &[u8])]) -> StreamId {
        let map: HashMap<String, Value> = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::BulkString(v.to_vec())))
            .collect();
        StreamId {
            id: id.to_string(),
            map,
        }
    }

    #[test]
    fn block_is_never_zero() {
        assert_eq!(block_millis(Duration::ZERO), 1);
        assert_eq!(block_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn nil_reply_is_no_delivery() {
        assert!(into_delivery(None).unwrap().is_none());
        let empty = StreamReadReply { keys: vec![] };
        assert!(into_delivery(Some(empty)).unwrap().is_none());
    }

    #[test]
    fn first_entry_becomes_delivery() {
        let reply = StreamReadReply {
            keys: vec![StreamKey {
                key: "results".to_string(),
                ids: vec![entry(
                    "1700000000000-0",
                    &[("key", b"abc"), ("value", b"{\"x\":1}")],
                )],
            }],
        };
        let delivery = into_delivery(Some(reply)).unwrap().unwrap();
        assert_eq!(delivery.id, "1700000000000-0");
        assert_eq!(delivery.key, "abc");
        assert_eq!(delivery.payload, Bytes::from_static(b"{\"x\":1}"));
    }

    #[test]
    fn entry_without_value_is_protocol_error() {
        let reply = StreamReadReply {
            keys: vec![StreamKey {
                key: "results".to_string(),
                ids: vec![entry("1-0", &[("key", b"abc")])],
            }],
        };
        assert!(matches!(
            into_delivery(Some(reply)),
            Err(QueueError::Protocol(_))
        ));
    }
}
