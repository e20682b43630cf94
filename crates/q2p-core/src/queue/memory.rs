//! In-memory queue with visibility timeouts.
//!
//! Behaves like SQS for the purposes of the worker: received messages stay
//! invisible until acknowledged, released, or their visibility timeout
//! lapses, and every delivery gets a fresh lease token. Used by tests and by
//! `memory://` queue URLs for local runs.
//!
//! ## Limitations
//!
//! - No persistence, single process only
//! - Ordering is FIFO among visible messages, which SQS does not promise
//! - Per-message acknowledgment counts are kept for the most recent
//!   `ACK_HISTORY` messages only

use super::{LeaseToken, QueueDepth, QueueGateway, RawRecord};
use crate::error::QueueError;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug)]
struct StoredMessage {
    id: String,
    body: String,
    arrived_at: DateTime<Utc>,
    delivery_count: u32,
    visible_at: Instant,
    lease: Option<String>,
}

/// Acknowledged message ids remembered for `acknowledgments`.
const ACK_HISTORY: usize = 4096;

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    acknowledgments: HashMap<String, u32>,
    acknowledged_order: VecDeque<String>,
    acknowledged_total: u32,
    releases: u64,
}

impl QueueState {
    fn record_acknowledgment(&mut self, message_id: String) {
        self.acknowledged_total += 1;
        match self.acknowledgments.get_mut(&message_id) {
            Some(count) => *count += 1,
            None => {
                if self.acknowledged_order.len() == ACK_HISTORY {
                    if let Some(oldest) = self.acknowledged_order.pop_front() {
                        self.acknowledgments.remove(&oldest);
                    }
                }
                self.acknowledgments.insert(message_id.clone(), 1);
                self.acknowledged_order.push_back(message_id);
            }
        }
    }
}

/// Process-local queue gateway.
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    visibility_timeout: Duration,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryQueue {
    /// Create a queue whose leases expire after `visibility_timeout`.
    pub fn new(name: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            visibility_timeout,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Enqueue a message body, returning its message id.
    pub fn publish(&self, body: impl Into<String>) -> String {
        self.publish_delayed(body, Duration::ZERO)
    }

    /// Enqueue a message that becomes visible after `delay`.
    pub fn publish_delayed(&self, body: impl Into<String>, delay: Duration) -> String {
        let id = Uuid::new_v4().to_string();
        self.state.lock().messages.push_back(StoredMessage {
            id: id.clone(),
            body: body.into(),
            arrived_at: Utc::now(),
            delivery_count: 0,
            visible_at: Instant::now() + delay,
            lease: None,
        });
        self.notify.notify_waiters();
        id
    }

    /// How many times the message was acknowledged, if it is among the
    /// most recently acknowledged messages.
    pub fn acknowledgments(&self, message_id: &str) -> u32 {
        self.state
            .lock()
            .acknowledgments
            .get(message_id)
            .copied()
            .unwrap_or(0)
    }

    /// Total successful acknowledgments across all messages.
    pub fn total_acknowledgments(&self) -> u32 {
        self.state.lock().acknowledged_total
    }

    /// Number of explicit releases.
    pub fn releases(&self) -> u64 {
        self.state.lock().releases
    }

    /// Messages not yet acknowledged, leased or not.
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lease_visible(&self, max_messages: usize) -> (Vec<RawRecord>, Option<Instant>) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let mut batch = Vec::new();
        let mut next_visible: Option<Instant> = None;

        for message in state.messages.iter_mut() {
            if message.visible_at > now {
                next_visible = Some(match next_visible {
                    Some(current) => current.min(message.visible_at),
                    None => message.visible_at,
                });
                continue;
            }
            if batch.len() >= max_messages {
                break;
            }

            let token = Uuid::new_v4().to_string();
            message.lease = Some(token.clone());
            message.delivery_count += 1;
            message.visible_at = now + self.visibility_timeout;

            batch.push(RawRecord {
                message_id: message.id.clone(),
                body: message.body.clone(),
                arrived_at: message.arrived_at,
                lease: LeaseToken::new(token),
                delivery_count: message.delivery_count,
            });
        }

        (batch, next_visible)
    }
}

#[async_trait]
impl QueueGateway for InMemoryQueue {
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<RawRecord>> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (batch, next_visible) = self.lease_visible(max_messages.max(1));
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }

            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn acknowledge(&self, lease: &LeaseToken) -> Result<()> {
        let mut state = self.state.lock();
        let position = state
            .messages
            .iter()
            .position(|m| m.lease.as_deref() == Some(lease.as_str()))
            .ok_or_else(|| QueueError::InvalidLease(lease.to_string()))?;

        if let Some(message) = state.messages.remove(position) {
            state.record_acknowledgment(message.id);
        }
        Ok(())
    }

    async fn release(&self, lease: &LeaseToken, delay: Duration) -> Result<()> {
        {
            let mut state = self.state.lock();
            let message = state
                .messages
                .iter_mut()
                .find(|m| m.lease.as_deref() == Some(lease.as_str()))
                .ok_or_else(|| QueueError::InvalidLease(lease.to_string()))?;
            message.lease = None;
            message.visible_at = Instant::now() + delay;
            state.releases += 1;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn send(&self, body: &str) -> Result<String> {
        Ok(self.publish(body))
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let state = self.state.lock();
        let now = Instant::now();
        let mut depth = QueueDepth::default();
        for message in &state.messages {
            if message.visible_at <= now {
                depth.available += 1;
            } else if message.lease.is_some() {
                depth.in_flight += 1;
            } else {
                depth.delayed += 1;
            }
        }
        Ok(depth)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_receive_leases_message() {
        let queue = InMemoryQueue::new("q", Duration::from_secs(30));
        let id = queue.publish("raw/a.jsonl");

        let records = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message_id, id);
        assert_eq!(records[0].delivery_count, 1);

        // Leased: invisible to a second receive.
        assert!(queue.receive(10, Duration::ZERO).await.unwrap().is_empty());
        let depth = queue.depth().await.unwrap();
        assert_eq!(depth.in_flight, 1);
        assert_eq!(depth.available, 0);
    }

    #[tokio::test]
    async fn test_acknowledge_removes_message() {
        let queue = InMemoryQueue::new("q", Duration::from_secs(30));
        let id = queue.publish("raw/a.jsonl");

        let record = queue.receive(1, Duration::ZERO).await.unwrap().remove(0);
        queue.acknowledge(&record.lease).await.unwrap();

        assert!(queue.is_empty());
        assert_eq!(queue.acknowledgments(&id), 1);
        assert!(queue.acknowledge(&record.lease).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_timeout_redelivers_with_new_lease() {
        let queue = InMemoryQueue::new("q", Duration::from_secs(5));
        queue.publish("raw/a.jsonl");

        let first = queue.receive(1, Duration::ZERO).await.unwrap().remove(0);
        tokio::time::advance(Duration::from_secs(6)).await;

        let second = queue.receive(1, Duration::ZERO).await.unwrap().remove(0);
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.delivery_count, 2);
        assert_ne!(second.lease, first.lease);

        // The stale lease no longer owns the record.
        assert!(queue.acknowledge(&first.lease).await.is_err());
        queue.acknowledge(&second.lease).await.unwrap();
        assert_eq!(queue.total_acknowledgments(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_with_delay() {
        let queue = InMemoryQueue::new("q", Duration::from_secs(300));
        queue.publish("raw/a.jsonl");

        let record = queue.receive(1, Duration::ZERO).await.unwrap().remove(0);
        queue
            .release(&record.lease, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(queue.releases(), 1);
        assert_eq!(queue.depth().await.unwrap().delayed, 1);
        assert!(queue.receive(1, Duration::ZERO).await.unwrap().is_empty());

        // Long poll wakes once the delay elapses.
        let redelivered = queue.receive(1, Duration::from_secs(5)).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_publish() {
        let queue = Arc::new(InMemoryQueue::new("q", Duration::from_secs(30)));
        let publisher = Arc::clone(&queue);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            publisher.publish("raw/late.jsonl");
        });

        let records = queue.receive(10, Duration::from_secs(5)).await.unwrap();
        handle.await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].body, "raw/late.jsonl");
    }

    #[tokio::test]
    async fn test_receive_respects_max_messages() {
        let queue = InMemoryQueue::new("q", Duration::from_secs(30));
        for i in 0..5 {
            queue.publish(format!("raw/{i}.jsonl"));
        }
        let records = queue.receive(3, Duration::ZERO).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(queue.depth().await.unwrap().available, 2);
    }

    #[tokio::test]
    async fn test_empty_receive_returns_after_wait() {
        let queue = InMemoryQueue::new("q", Duration::from_secs(30));
        let records = queue.receive(10, Duration::from_millis(20)).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_send_enqueues_visible_message() {
        let queue = InMemoryQueue::new("q", Duration::from_secs(30));
        let id = queue.send("raw/sent.jsonl").await.unwrap();

        let records = queue.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(records[0].message_id, id);
        assert_eq!(records[0].body, "raw/sent.jsonl");
    }

    #[tokio::test]
    async fn test_acknowledgment_history_is_bounded() {
        let queue = InMemoryQueue::new("q", Duration::from_secs(30));
        let first = queue.publish("raw/0.jsonl");
        for i in 1..=ACK_HISTORY {
            queue.publish(format!("raw/{i}.jsonl"));
        }

        loop {
            let records = queue.receive(10, Duration::ZERO).await.unwrap();
            if records.is_empty() {
                break;
            }
            for record in records {
                queue.acknowledge(&record.lease).await.unwrap();
            }
        }

        let state = queue.state.lock();
        assert_eq!(state.acknowledgments.len(), ACK_HISTORY);
        assert_eq!(state.acknowledged_order.len(), ACK_HISTORY);
        drop(state);

        assert_eq!(queue.total_acknowledgments() as usize, ACK_HISTORY + 1);
        assert_eq!(queue.acknowledgments(&first), 0);
    }
}
