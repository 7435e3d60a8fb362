//! Invocation payloads.
//!
//! The transformer is driven by S3-style object-created notifications:
//!
//! ```json
//! {"Records":[{"s3":{"bucket":{"name":"lake"},"object":{"key":"raw-data/input.csv"}}}]}
//! ```
//!
//! Object keys arrive form-urlencoded (`+` for space, `%XX` escapes) and are decoded by
//! [`EventRecord::file`]. The result of an invocation is an [`InvocationOutcome`], serialized
//! in the `{"statusCode":..,"body":..}` shape callers expect.

use crate::namespace::RawFileRef;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records")]
    pub records: Vec<EventRecord>,
}

impl S3Event {
    /// Build an event for already-decoded `(bucket, key)` pairs.
    pub fn for_objects<I, B, K>(objects: I) -> Self
    where
        I: IntoIterator<Item = (B, K)>,
        B: Into<String>,
        K: AsRef<str>,
    {
        let records = objects
            .into_iter()
            .map(|(bucket, key)| EventRecord {
                event_name: Some("ObjectCreated:Put".to_string()),
                s3: S3Entity {
                    bucket: BucketEntity {
                        name: bucket.into(),
                    },
                    object: ObjectEntity {
                        key: encode_key(key.as_ref()),
                        size: None,
                    },
                },
            })
            .collect();
        Self { records }
    }

    /// Parse a JSON payload.
    ///
    /// # Errors
    /// Returns an error if the payload is not JSON or has no `Records` array.
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "eventName", default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    pub s3: S3Entity,
}

impl EventRecord {
    /// The raw file this record refers to, with its key decoded.
    #[must_use]
    pub fn file(&self) -> RawFileRef {
        RawFileRef::new(self.s3.bucket.name.clone(), decode_key(&self.s3.object.key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Entity {
    pub bucket: BucketEntity,
    pub object: ObjectEntity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketEntity {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntity {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Decode a notification key. Invalid escapes leave the key as delivered.
#[must_use]
pub fn decode_key(key: &str) -> String {
    let spaced = key.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|k| k.into_owned())
        .unwrap_or(spaced)
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).replace("%20", "+"))
        .collect::<Vec<_>>()
        .join("/")
}

/// What an invocation reports back to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationOutcome {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

impl InvocationOutcome {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status_code: 200,
            body: body.into(),
        }
    }

    pub fn failed(body: impl Into<String>) -> Self {
        Self {
            status_code: 500,
            body: body.into(),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status_code == 200
    }

    /// # Errors
    /// Never fails in practice; serialization of two plain fields cannot error.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_notification_and_decodes_key() {
        let payload = r#"{
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": {"name": "lake"},
                    "object": {"key": "raw-data/sales+2024%2B.csv", "size": 42}
                }
            }]
        }"#;
        let event = S3Event::from_json(payload).unwrap();
        let file = event.records[0].file();
        assert_eq!(file.bucket, "lake");
        assert_eq!(file.key, "raw-data/sales 2024+.csv");
        assert_eq!(event.records[0].s3.object.size, Some(42));
    }

    #[test]
    fn missing_records_is_rejected() {
        assert!(S3Event::from_json(r#"{"detail": {}}"#).is_err());
    }

    #[test]
    fn built_events_decode_to_the_same_key() {
        let event = S3Event::for_objects([("lake", "raw-data/my file+v2.csv")]);
        assert_eq!(event.records[0].file().key, "raw-data/my file+v2.csv");
    }

    #[test]
    fn outcome_uses_status_code_field_name() {
        let json = InvocationOutcome::ok("done").to_json().unwrap();
        assert_eq!(json, r#"{"statusCode":200,"body":"done"}"#);
        assert!(!InvocationOutcome::failed("x").is_success());
    }
}
