//! In-process [`QueuePort`] implementation.
//!
//! Mirrors the stream transport's semantics: a dequeue peeks at the oldest
//! entry and only [`ack`](QueuePort::ack) removes it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{QueueDelivery, QueueError};
use crate::traits::QueuePort;

#[derive(Default)]
struct Topic {
    entries: Mutex<VecDeque<QueueDelivery>>,
    appended: Notify,
}

/// Queue held entirely in memory, shared through `Arc`.
#[derive(Default)]
pub struct MemoryQueue {
    topics: DashMap<String, Arc<Topic>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held for `topic`.
    #[must_use]
    pub fn len(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |t| t.entries.lock().len())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        self.topics.entry(name.to_string()).or_default().clone()
    }

    fn check_open(&self) -> Result<(), QueueError> {
        if self.is_closed() {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl QueuePort for MemoryQueue {
    async fn enqueue(&self, topic: &str, key: &str, payload: &Bytes) -> Result<(), QueueError> {
        self.check_open()?;
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let topic = self.topic(topic);
        topic.entries.lock().push_back(QueueDelivery {
            id: format!("{seq}-0"),
            key: key.to_string(),
            payload: payload.clone(),
        });
        topic.appended.notify_waiters();
        Ok(())
    }

    async fn dequeue_blocking(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<Option<QueueDelivery>, QueueError> {
        let topic = self.topic(topic);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.check_open()?;
            let appended = topic.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if let Some(front) = topic.entries.lock().front() {
                return Ok(Some(front.clone()));
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, topic: &str, delivery: &QueueDelivery) -> Result<(), QueueError> {
        self.check_open()?;
        let topic = self.topic(topic);
        let mut entries = topic.entries.lock();
        match entries.iter().position(|e| e.id == delivery.id) {
            Some(pos) => {
                entries.remove(pos);
                Ok(())
            }
            None => Err(QueueError::Rejected(format!(
                "entry {} already removed",
                delivery.id
            ))),
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        for topic in &self.topics {
            topic.value().appended.notify_waiters();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test]
    async fn dequeue_returns_oldest_until_acked() {
        let queue = MemoryQueue::new();
        queue.enqueue("t", "a", &payload("1")).await.unwrap();
        queue.enqueue("t", "b", &payload("2")).await.unwrap();

        let first = queue
            .dequeue_blocking("t", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.key, "a");

        let again = queue
            .dequeue_blocking("t", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again, first);

        queue.ack("t", &first).await.unwrap();
        let second = queue
            .dequeue_blocking("t", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.key, "b");
        assert_eq!(second.payload, payload("2"));
    }

    #[tokio::test]
    async fn dequeue_times_out_on_empty_topic() {
        let queue = MemoryQueue::new();
        let got = queue
            .dequeue_blocking("empty", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn blocked_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(MemoryQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue_blocking("t", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue("t", "k", &payload("v")).await.unwrap();

        let got = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(got.key, "k");
    }

    #[tokio::test]
    async fn double_ack_is_rejected() {
        let queue = MemoryQueue::new();
        queue.enqueue("t", "a", &payload("1")).await.unwrap();
        let d = queue
            .dequeue_blocking("t", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        queue.ack("t", &d).await.unwrap();
        assert!(matches!(queue.ack("t", &d).await, Err(QueueError::Rejected(_))));
        assert_eq!(queue.len("t"), 0);
    }

    #[tokio::test]
    async fn closed_queue_rejects_operations() {
        let queue = MemoryQueue::new();
        queue.close().await.unwrap();
        assert!(matches!(
            queue.enqueue("t", "a", &payload("1")).await,
            Err(QueueError::Closed)
        ));
        assert!(matches!(
            queue.dequeue_blocking("t", Duration::from_millis(10)).await,
            Err(QueueError::Closed)
        ));
    }
}
