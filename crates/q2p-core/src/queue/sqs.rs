//! Amazon SQS queue gateway.
//!
//! Receive uses long polling and requests system attributes so the worker
//! sees the delivery count (`ApproximateReceiveCount`) and first-send time
//! (`SentTimestamp`). Release maps to `ChangeMessageVisibility`.

use super::{LeaseToken, QueueDepth, QueueGateway, RawRecord};
use crate::aws::{is_access_denied_code, load_sdk_config, StaticCredentials};
use crate::error::QueueError;
use crate::Result;
use async_trait::async_trait;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client as SqsClient;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// SQS hard limits.
const MAX_BATCH: usize = 10;
const MAX_WAIT_SECONDS: u64 = 20;
const MAX_VISIBILITY_SECONDS: u64 = 12 * 60 * 60;

/// Builder for [`SqsQueue`].
pub struct SqsQueueBuilder {
    queue_url: String,
    region: Option<String>,
    credentials: Option<StaticCredentials>,
    endpoint: Option<String>,
    visibility_timeout: Duration,
}

impl SqsQueueBuilder {
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            region: None,
            credentials: None,
            endpoint: None,
            visibility_timeout: Duration::from_secs(300),
        }
    }

    /// Region override; otherwise taken from the queue URL host.
    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn with_credentials(mut self, credentials: Option<StaticCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Custom endpoint (LocalStack, ElasticMQ).
    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    pub async fn build(self) -> Result<SqsQueue> {
        let region = self
            .region
            .clone()
            .or_else(|| region_from_url(&self.queue_url));

        let sdk_config =
            load_sdk_config(region.as_deref(), self.credentials, self.endpoint.as_deref()).await;

        let name = self
            .queue_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        info!(
            queue = %name,
            region = region.as_deref().unwrap_or("default"),
            "SQS queue gateway initialized"
        );

        Ok(SqsQueue {
            client: SqsClient::new(&sdk_config),
            queue_url: self.queue_url,
            name,
            visibility_timeout: self.visibility_timeout,
            consecutive_failures: AtomicU32::new(0),
        })
    }
}

/// Queue gateway backed by Amazon SQS.
pub struct SqsQueue {
    client: SqsClient,
    queue_url: String,
    name: String,
    visibility_timeout: Duration,
    consecutive_failures: AtomicU32,
}

impl SqsQueue {
    /// Consecutive failed calls since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    fn observe<T>(&self, result: std::result::Result<T, QueueError>) -> Result<T> {
        match result {
            Ok(value) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                Ok(value)
            }
            Err(e) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(queue = %self.name, failures, error = %e, "SQS call failed");
                Err(e.into())
            }
        }
    }

    fn to_record(message: &Message) -> Option<RawRecord> {
        let lease = message.receipt_handle()?;
        let attributes = message.attributes();
        let attribute = |name: MessageSystemAttributeName| {
            attributes.and_then(|attrs| attrs.get(&name)).map(String::as_str)
        };

        let delivery_count = attribute(MessageSystemAttributeName::ApproximateReceiveCount)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1)
            .max(1);

        let arrived_at = attribute(MessageSystemAttributeName::SentTimestamp)
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(epoch_millis)
            .unwrap_or_else(Utc::now);

        Some(RawRecord {
            message_id: message.message_id().unwrap_or_default().to_string(),
            body: message.body().unwrap_or_default().to_string(),
            arrived_at,
            lease: LeaseToken::new(lease),
            delivery_count,
        })
    }
}

#[async_trait]
impl QueueGateway for SqsQueue {
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<RawRecord>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.clamp(1, MAX_BATCH) as i32)
            .wait_time_seconds(wait.as_secs().min(MAX_WAIT_SECONDS) as i32)
            .visibility_timeout(self.visibility_timeout.as_secs().min(MAX_VISIBILITY_SECONDS) as i32)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| classify("receive", e));
        let output = self.observe(result)?;

        let records: Vec<RawRecord> = output.messages().iter().filter_map(Self::to_record).collect();
        if !records.is_empty() {
            debug!(queue = %self.name, count = records.len(), "Received messages");
        }
        Ok(records)
    }

    async fn acknowledge(&self, lease: &LeaseToken) -> Result<()> {
        let result = self
            .client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(lease.as_str())
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify("acknowledge", e));
        self.observe(result)
    }

    async fn release(&self, lease: &LeaseToken, delay: Duration) -> Result<()> {
        let result = self
            .client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(lease.as_str())
            .visibility_timeout(delay.as_secs().min(MAX_VISIBILITY_SECONDS) as i32)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify("release", e));
        self.observe(result)
    }

    async fn send(&self, body: &str) -> Result<String> {
        let result = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| classify("send", e));
        let output = self.observe(result)?;
        Ok(output.message_id().unwrap_or_default().to_string())
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let result = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesDelayed)
            .send()
            .await
            .map_err(|e| classify("depth", e));
        let output = self.observe(result)?;

        let count = |name: QueueAttributeName| {
            output
                .attributes()
                .and_then(|attrs| attrs.get(&name))
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };

        Ok(QueueDepth {
            available: count(QueueAttributeName::ApproximateNumberOfMessages),
            in_flight: count(QueueAttributeName::ApproximateNumberOfMessagesNotVisible),
            delayed: count(QueueAttributeName::ApproximateNumberOfMessagesDelayed),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn classify<E, R>(operation: &str, err: SdkError<E, R>) -> QueueError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_string);
    let message = DisplayErrorContext(&err).to_string();

    if is_access_denied_code(code.as_deref()) {
        return QueueError::AccessDenied(format!("{operation}: {message}"));
    }

    match code.as_deref() {
        Some("ReceiptHandleIsInvalid") | Some("MessageNotInflight") => {
            QueueError::InvalidLease(message)
        }
        _ => QueueError::transport(operation, message),
    }
}

/// `https://sqs.eu-west-1.amazonaws.com/123/queue` → `eu-west-1`
fn region_from_url(url: &str) -> Option<String> {
    let host = url.split("://").nth(1)?.split('/').next()?;
    let mut parts = host.split('.');
    match (parts.next(), parts.next()) {
        (Some("sqs"), Some(region)) if region != "amazonaws" => Some(region.to_string()),
        _ => None,
    }
}

fn epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_from_url() {
        assert_eq!(
            region_from_url("https://sqs.eu-west-1.amazonaws.com/123456789012/raw-events"),
            Some("eu-west-1".to_string())
        );
        assert_eq!(region_from_url("http://localhost:4566/000000000000/q"), None);
        assert_eq!(region_from_url("not a url"), None);
    }

    #[test]
    fn test_to_record_reads_system_attributes() {
        let message = Message::builder()
            .message_id("m-1")
            .receipt_handle("handle-1")
            .body("raw/a.jsonl")
            .attributes(MessageSystemAttributeName::ApproximateReceiveCount, "3")
            .attributes(MessageSystemAttributeName::SentTimestamp, "1792137600000")
            .build();

        let record = SqsQueue::to_record(&message).unwrap();
        assert_eq!(record.message_id, "m-1");
        assert_eq!(record.lease.as_str(), "handle-1");
        assert_eq!(record.delivery_count, 3);
        assert_eq!(record.arrived_at.timestamp_millis(), 1_792_137_600_000);
    }

    #[test]
    fn test_to_record_requires_receipt_handle() {
        let message = Message::builder().message_id("m-2").body("x").build();
        assert!(SqsQueue::to_record(&message).is_none());
    }

    #[tokio::test]
    #[ignore = "requires AWS credentials and an SQS queue"]
    async fn test_sqs_depth_live() {
        let url = std::env::var("Q2P_TEST_QUEUE_URL").unwrap();
        let queue = SqsQueueBuilder::new(url).build().await.unwrap();
        queue.depth().await.unwrap();
    }
}
