//! Queue gateway: leased receive, acknowledge and release.
//!
//! Delivery is at-least-once. A record stays invisible to other consumers
//! while its lease is held; it becomes visible again when the lease is
//! released or its visibility timeout lapses. Acknowledging deletes it.

mod backoff;
mod memory;
mod notification;
mod sqs;

pub use backoff::RetryConfig;
pub use memory::InMemoryQueue;
pub use notification::{parse_notification, ObjectRef};
pub use sqs::{SqsQueue, SqsQueueBuilder};

use crate::config::QueueConfig;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Opaque proof of temporary ownership of a delivered record.
///
/// Unique per delivery attempt, not per message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Receipt handles are long; the tail is enough to correlate logs.
        let tail = self
            .0
            .char_indices()
            .rev()
            .nth(11)
            .map(|(idx, _)| &self.0[idx..])
            .unwrap_or(&self.0);
        write!(f, "…{tail}")
    }
}

/// One delivered notification.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Queue-assigned message id (stable across redeliveries)
    pub message_id: String,
    /// Notification body carrying bucket and key
    pub body: String,
    /// When the queue first accepted the message
    pub arrived_at: DateTime<Utc>,
    /// Lease for this delivery attempt
    pub lease: LeaseToken,
    /// Number of times this message has been delivered, starting at 1
    pub delivery_count: u32,
}

/// Approximate queue depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    /// Messages available for receive
    pub available: u64,
    /// Messages leased and not yet acknowledged
    pub in_flight: u64,
    /// Messages waiting out a delay
    pub delayed: u64,
}

/// Capability interface over a single logical queue.
#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Long-poll for up to `max_messages` records, waiting at most `wait`.
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<RawRecord>>;

    /// Permanently remove a delivered record.
    async fn acknowledge(&self, lease: &LeaseToken) -> Result<()>;

    /// Make a record visible again after `delay`.
    async fn release(&self, lease: &LeaseToken, delay: Duration) -> Result<()>;

    /// Enqueue a message body, returning the queue-assigned message id.
    async fn send(&self, body: &str) -> Result<String>;

    /// Approximate depth for dashboards.
    async fn depth(&self) -> Result<QueueDepth>;

    /// Identifier used in logs.
    fn name(&self) -> &str;
}

/// Create a queue gateway from configuration.
///
/// `memory://name` yields a process-local queue; anything else is treated as
/// an SQS queue URL.
pub async fn create_queue(config: &QueueConfig) -> Result<Arc<dyn QueueGateway>> {
    if let Some(name) = config.url.strip_prefix("memory://") {
        return Ok(Arc::new(InMemoryQueue::new(
            name,
            config.visibility_timeout(),
        )));
    }

    let queue = SqsQueueBuilder::new(config.url.clone())
        .with_region(config.region.clone())
        .with_visibility_timeout(config.visibility_timeout())
        .build()
        .await?;
    Ok(Arc::new(queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_token_display_truncates() {
        let token = LeaseToken::new("AQEBzbVv0123456789abcdefghijkl");
        let shown = token.to_string();
        assert!(shown.starts_with('…'));
        assert!(shown.ends_with("abcdefghijkl"));
        assert_eq!(token.as_str(), "AQEBzbVv0123456789abcdefghijkl");

        let short = LeaseToken::new("abc");
        assert_eq!(short.to_string(), "…abc");
    }

    #[tokio::test]
    async fn test_create_memory_queue() {
        let config = QueueConfig {
            url: "memory://local".into(),
            region: None,
            wait_time_seconds: 0,
            max_messages: 10,
            visibility_timeout_seconds: 30,
        };
        let queue = create_queue(&config).await.unwrap();
        assert_eq!(queue.name(), "local");
        assert_eq!(queue.depth().await.unwrap(), QueueDepth::default());
    }
}
