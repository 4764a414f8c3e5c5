//! Elasticsearch `_bulk` request bodies and response classification.

use super::client::Destination;
use crate::buffer::Batch;
use crate::domain::LogEvent;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use thiserror::Error;

const ECS_VERSION: &str = "8.11.0";
const ESTIMATED_DOCUMENT_SIZE: usize = 384;

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error during serialization: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Batch is empty")]
    EmptyBatch,
}

#[derive(Serialize)]
struct EcsDocument<'a> {
    #[serde(rename = "@timestamp")]
    timestamp: String,
    #[serde(rename = "log.level")]
    level: &'static str,
    message: String,
    message_template: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata: &'a BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorField<'a>>,
    host: HostField<'a>,
    #[serde(rename = "ecs.version")]
    ecs_version: &'static str,
}

#[derive(Serialize)]
struct ErrorField<'a> {
    message: &'a str,
}

#[derive(Serialize)]
struct HostField<'a> {
    hostname: &'a str,
}

/// Builds NDJSON bulk bodies: one action line plus one document line per event.
#[derive(Debug, Clone)]
pub struct BulkSerializer {
    action_line: String,
    hostname: String,
}

impl BulkSerializer {
    pub fn new(destination: &Destination) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self::with_hostname(destination, hostname)
    }

    pub fn with_hostname(destination: &Destination, hostname: impl Into<String>) -> Self {
        Self {
            action_line: format!("{{\"{}\":{{}}}}\n", destination.bulk_action()),
            hostname: hostname.into(),
        }
    }

    pub fn serialize_ndjson(&self, batch: &Batch) -> Result<Vec<u8>, SerializationError> {
        if batch.is_empty() {
            return Err(SerializationError::EmptyBatch);
        }

        let mut buffer =
            Vec::with_capacity(batch.size() * (ESTIMATED_DOCUMENT_SIZE + self.action_line.len()));

        for event in batch.events() {
            buffer.extend_from_slice(self.action_line.as_bytes());
            serde_json::to_writer(&mut buffer, &self.document(event))?;
            buffer.push(b'\n');
        }

        Ok(buffer)
    }

    pub fn serialize_compressed(&self, batch: &Batch) -> Result<Vec<u8>, SerializationError> {
        let raw = self.serialize_ndjson(batch)?;
        let mut encoder = GzEncoder::new(Vec::with_capacity(raw.len() / 4), Compression::fast());
        encoder.write_all(&raw)?;
        Ok(encoder.finish()?)
    }

    fn document<'a>(&'a self, event: &'a LogEvent) -> EcsDocument<'a> {
        EcsDocument {
            timestamp: event
                .timestamp()
                .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            level: event.level().as_str(),
            message: event.render(),
            message_template: event.message_template(),
            metadata: event.properties(),
            error: event.exception().map(|message| ErrorField { message }),
            host: HostField {
                hostname: &self.hostname,
            },
            ecs_version: ECS_VERSION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRejection {
    pub position: usize,
    pub status: u16,
    pub reason: String,
}

/// Per-event result of one bulk request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOutcome {
    pub accepted: usize,
    /// Positions (within the sent batch) worth sending again.
    pub retryable: Vec<usize>,
    /// Events the destination refused permanently.
    pub rejected: Vec<ItemRejection>,
}

impl ExportOutcome {
    pub fn all_accepted(count: usize) -> Self {
        Self {
            accepted: count,
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.retryable.is_empty()
    }
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Deserialize)]
struct BulkItem {
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Classifies a successful (2xx) bulk response body for a batch of `sent` events.
///
/// A body that cannot be parsed, or that reports `"errors": false`, counts
/// as full acceptance. Positions missing from `items` are treated as retryable.
pub fn classify_bulk_response(body: &[u8], sent: usize) -> ExportOutcome {
    let Ok(response) = serde_json::from_slice::<BulkResponse>(body) else {
        return ExportOutcome::all_accepted(sent);
    };

    if !response.errors {
        return ExportOutcome::all_accepted(sent);
    }

    let mut outcome = ExportOutcome::default();
    for position in 0..sent {
        let item = response
            .items
            .get(position)
            .and_then(|entry| entry.values().next());

        match item {
            Some(item) if (200..300).contains(&item.status) => outcome.accepted += 1,
            Some(item) if is_retryable_status(item.status) => outcome.retryable.push(position),
            Some(item) => outcome.rejected.push(ItemRejection {
                position,
                status: item.status,
                reason: error_reason(item.error.as_ref()),
            }),
            None => outcome.retryable.push(position),
        }
    }
    outcome
}

fn error_reason(error: Option<&Value>) -> String {
    match error {
        Some(Value::Object(map)) => {
            let kind = map.get("type").and_then(Value::as_str).unwrap_or("error");
            match map.get("reason").and_then(Value::as_str) {
                Some(reason) => format!("{kind}: {reason}"),
                None => kind.to_string(),
            }
        }
        Some(other) => other.to_string(),
        None => "unknown error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SealReason;
    use crate::domain::Severity;
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;

    fn batch() -> Batch {
        Batch::new(
            vec![
                LogEvent::new(Severity::Information, "user {User} logged in")
                    .with_property("User", "ada"),
                LogEvent::new(Severity::Error, "payment failed").with_exception("timeout"),
            ],
            SealReason::Flush,
        )
    }

    #[test]
    fn test_ndjson_layout() {
        let serializer = BulkSerializer::with_hostname(&Destination::default(), "web-1");
        let body = String::from_utf8(serializer.serialize_ndjson(&batch()).unwrap()).unwrap();
        let lines: Vec<&str> = body.lines().collect();

        assert!(body.ends_with('\n'));
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], r#"{"create":{}}"#);
        assert_eq!(lines[2], r#"{"create":{}}"#);

        let first: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first["message"], "user ada logged in");
        assert_eq!(first["message_template"], "user {User} logged in");
        assert_eq!(first["log.level"], "Information");
        assert_eq!(first["metadata"]["User"], "ada");
        assert_eq!(first["host"]["hostname"], "web-1");
        assert!(first.get("error").is_none());

        let second: Value = serde_json::from_str(lines[3]).unwrap();
        assert_eq!(second["error"]["message"], "timeout");
        assert!(second.get("metadata").is_none());
    }

    #[test]
    fn test_index_destination_uses_index_action() {
        let serializer =
            BulkSerializer::with_hostname(&Destination::Index("app".to_string()), "h");
        let body = String::from_utf8(serializer.serialize_ndjson(&batch()).unwrap()).unwrap();
        assert!(body.starts_with(r#"{"index":{}}"#));
    }

    #[test]
    fn test_empty_batch_is_error() {
        let serializer = BulkSerializer::with_hostname(&Destination::default(), "h");
        let empty = Batch::new(Vec::new(), SealReason::Flush);
        assert!(matches!(
            serializer.serialize_ndjson(&empty),
            Err(SerializationError::EmptyBatch)
        ));
    }

    #[test]
    fn test_compressed_roundtrip_matches_plain() {
        let serializer = BulkSerializer::with_hostname(&Destination::default(), "h");
        let batch = batch();
        let compressed = serializer.serialize_compressed(&batch).unwrap();

        let mut decoded = String::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        let plain: Vec<Value> = String::from_utf8(serializer.serialize_ndjson(&batch).unwrap())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let unpacked: Vec<Value> = decoded.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(plain.len(), unpacked.len());
        assert_eq!(plain[0], unpacked[0]);
    }

    #[test]
    fn test_classify_partial_failure() {
        let body = json!({
            "errors": true,
            "items": [
                {"create": {"status": 201}},
                {"create": {"status": 429, "error": {"type": "es_rejected_execution_exception"}}},
                {"create": {"status": 400, "error": {"type": "mapper_parsing_exception", "reason": "bad field"}}},
                {"create": {"status": 503}}
            ]
        });
        let outcome = classify_bulk_response(body.to_string().as_bytes(), 5);

        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.retryable, vec![1, 3, 4]);
        assert_eq!(
            outcome.rejected,
            vec![ItemRejection {
                position: 2,
                status: 400,
                reason: "mapper_parsing_exception: bad field".to_string(),
            }]
        );
        assert!(!outcome.is_complete());
    }

    #[test]
    fn test_classify_success_and_garbage() {
        let ok = json!({"errors": false, "items": []});
        assert_eq!(
            classify_bulk_response(ok.to_string().as_bytes(), 3),
            ExportOutcome::all_accepted(3)
        );
        assert_eq!(
            classify_bulk_response(b"not json", 2),
            ExportOutcome::all_accepted(2)
        );
    }
}
