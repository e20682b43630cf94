//! Notification payload parsing.
//!
//! Accepted body shapes:
//!
//! - S3 event notification: `{"Records":[{"eventTime":..,"s3":{"bucket":{"name":..},"object":{"key":..}}}]}`
//! - the same event wrapped in an SNS envelope (`{"Type":"Notification","Message":"<json>"}`)
//! - a direct shape: `{"bucket":"raw-events","key":"raw/a.jsonl"}` (`bucket` optional)
//! - a bare object key, optionally JSON-quoted
//!
//! Keys inside S3 events are URL-encoded with `+` for spaces.

use crate::error::NotificationError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Location of an object named by a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
    /// Event time reported by the store, when the payload carries one
    pub event_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct S3Event {
    #[serde(rename = "Records")]
    records: Vec<S3EventRecord>,
}

#[derive(Deserialize)]
struct S3EventRecord {
    #[serde(rename = "eventTime")]
    event_time: Option<DateTime<Utc>>,
    s3: S3Entity,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Deserialize)]
struct S3Object {
    key: String,
}

#[derive(Deserialize)]
struct DirectNotification {
    bucket: Option<String>,
    key: String,
}

/// Extract the objects a notification body refers to.
///
/// `default_bucket` is used by shapes that carry only a key.
pub fn parse_notification(
    body: &str,
    default_bucket: &str,
) -> Result<Vec<ObjectRef>, NotificationError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(NotificationError::EmptyBody);
    }

    match trimmed.as_bytes()[0] {
        b'{' => {
            let value: Value = serde_json::from_str(trimmed)
                .map_err(|e| NotificationError::InvalidJson(e.to_string()))?;
            parse_value(value, default_bucket)
        }
        b'"' => {
            let key: String = serde_json::from_str(trimmed)
                .map_err(|e| NotificationError::InvalidJson(e.to_string()))?;
            bare_key(key, default_bucket)
        }
        _ => bare_key(trimmed.to_string(), default_bucket),
    }
}

fn parse_value(value: Value, default_bucket: &str) -> Result<Vec<ObjectRef>, NotificationError> {
    if value.get("Type").and_then(Value::as_str) == Some("Notification") {
        let message = value
            .get("Message")
            .and_then(Value::as_str)
            .ok_or(NotificationError::MissingField("Message"))?;
        return parse_notification(message, default_bucket);
    }

    if value.get("Records").is_some() {
        let event: S3Event = serde_json::from_value(value)
            .map_err(|e| NotificationError::InvalidJson(e.to_string()))?;
        if event.records.is_empty() {
            return Err(NotificationError::MissingField("Records"));
        }
        return event
            .records
            .into_iter()
            .map(|record| {
                Ok(ObjectRef {
                    bucket: record.s3.bucket.name,
                    key: decode_event_key(&record.s3.object.key)?,
                    event_time: record.event_time,
                })
            })
            .collect();
    }

    if value.get("key").is_some() {
        let direct: DirectNotification = serde_json::from_value(value)
            .map_err(|e| NotificationError::InvalidJson(e.to_string()))?;
        if direct.key.is_empty() {
            return Err(NotificationError::MissingField("key"));
        }
        return Ok(vec![ObjectRef {
            bucket: direct.bucket.unwrap_or_else(|| default_bucket.to_string()),
            key: direct.key,
            event_time: None,
        }]);
    }

    // Includes the `s3:TestEvent` probe S3 sends when notifications are configured.
    Err(NotificationError::MissingField("key"))
}

fn bare_key(key: String, default_bucket: &str) -> Result<Vec<ObjectRef>, NotificationError> {
    if key.trim().is_empty() || key.contains('\n') {
        return Err(NotificationError::MissingField("key"));
    }
    Ok(vec![ObjectRef {
        bucket: default_bucket.to_string(),
        key,
        event_time: None,
    }])
}

fn decode_event_key(raw: &str) -> Result<String, NotificationError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|e| NotificationError::InvalidJson(format!("undecodable key {raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_s3_event_shape() {
        let body = json!({
            "Records": [{
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "eventTime": "2026-10-16T08:30:00.000Z",
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": {"name": "raw-bucket"},
                    "object": {"key": "raw/events/incoming/test.jsonl", "size": 120}
                }
            }]
        })
        .to_string();

        let refs = parse_notification(&body, "ignored").unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].bucket, "raw-bucket");
        assert_eq!(refs[0].key, "raw/events/incoming/test.jsonl");
        assert_eq!(
            refs[0].event_time.unwrap().to_rfc3339(),
            "2026-10-16T08:30:00+00:00"
        );
    }

    #[test]
    fn test_s3_event_key_is_url_decoded() {
        let body = json!({
            "Records": [{
                "s3": {
                    "bucket": {"name": "raw-bucket"},
                    "object": {"key": "raw/my+events/day%3D1.jsonl"}
                }
            }]
        })
        .to_string();

        let refs = parse_notification(&body, "raw-bucket").unwrap();
        assert_eq!(refs[0].key, "raw/my events/day=1.jsonl");
        assert!(refs[0].event_time.is_none());
    }

    #[test]
    fn test_multiple_records() {
        let body = json!({
            "Records": [
                {"s3": {"bucket": {"name": "b"}, "object": {"key": "raw/a.jsonl"}}},
                {"s3": {"bucket": {"name": "b"}, "object": {"key": "raw/b.jsonl"}}}
            ]
        })
        .to_string();

        let keys: Vec<_> = parse_notification(&body, "b")
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["raw/a.jsonl", "raw/b.jsonl"]);
    }

    #[test]
    fn test_sns_envelope() {
        let inner = json!({
            "Records": [{"s3": {"bucket": {"name": "b"}, "object": {"key": "raw/x.jsonl"}}}]
        })
        .to_string();
        let body = json!({"Type": "Notification", "Message": inner}).to_string();

        let refs = parse_notification(&body, "b").unwrap();
        assert_eq!(refs[0].key, "raw/x.jsonl");
    }

    #[test]
    fn test_direct_shape() {
        let refs = parse_notification(r#"{"bucket":"raw-bucket","key":"raw/a.jsonl"}"#, "x").unwrap();
        assert_eq!(refs[0].bucket, "raw-bucket");

        let refs = parse_notification(r#"{"key":"raw/a.jsonl"}"#, "default").unwrap();
        assert_eq!(refs[0].bucket, "default");
    }

    #[test]
    fn test_bare_key() {
        let refs = parse_notification("raw/events/incoming/test.jsonl\n", "raw-bucket").unwrap();
        assert_eq!(refs[0].key, "raw/events/incoming/test.jsonl");
        assert_eq!(refs[0].bucket, "raw-bucket");

        let refs = parse_notification("\"raw/q.jsonl\"", "raw-bucket").unwrap();
        assert_eq!(refs[0].key, "raw/q.jsonl");
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(matches!(
            parse_notification("   ", "b"),
            Err(NotificationError::EmptyBody)
        ));
        assert!(matches!(
            parse_notification("{not json", "b"),
            Err(NotificationError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_notification(r#"{"Records":[]}"#, "b"),
            Err(NotificationError::MissingField("Records"))
        ));
        assert!(matches!(
            parse_notification(r#"{"Service":"Amazon S3","Event":"s3:TestEvent"}"#, "b"),
            Err(NotificationError::MissingField("key"))
        ));
        assert!(matches!(
            parse_notification(r#"{"Records":[{"s3":{}}]}"#, "b"),
            Err(NotificationError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_notification(r#"{"key":""}"#, "b"),
            Err(NotificationError::MissingField("key"))
        ));
    }
}
