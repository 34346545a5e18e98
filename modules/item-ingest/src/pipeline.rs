//! Per-delivery processing: decode → validate → merge-upsert
//!
//! Decode and validate are pure; the store write is the only yielding point.
//! Every failure is terminal for the attempt and maps to a negative ack at
//! the runner; there is no in-process retry here, redelivery is the
//! channel's job.

use crate::models::ItemEvent;
use crate::store::{ItemStore, StoreError};
use crate::validation::{validate_item, ValidationError};
use chrono::{DateTime, Utc};
use event_channel::Delivery;
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload must be a JSON object")]
    NotAnObject,
}

/// Per-delivery failure taxonomy; `kind` feeds the structured failure log
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Decode(_) => "decode",
            PipelineError::Validation(_) => "validation",
            PipelineError::Store(_) => "store",
        }
    }
}

/// Parse raw payload bytes into a JSON object
pub fn decode_payload(payload: &[u8]) -> Result<Value, DecodeError> {
    let value: Value = serde_json::from_slice(payload)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    Ok(value)
}

/// Build the stored document: the full event object plus processing metadata
///
/// Starting from the decoded payload (not the typed view) preserves fields
/// the producer sends that this consumer does not model.
pub fn build_document(
    event_payload: &Value,
    delivery: &Delivery,
    processed_by: &str,
    processed_at: DateTime<Utc>,
) -> Value {
    let mut doc = event_payload
        .as_object()
        .cloned()
        .unwrap_or_default();

    doc.insert(
        "processedAt".to_string(),
        json!(processed_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
    );
    doc.insert("processedBy".to_string(), json!(processed_by));
    doc.insert("messageId".to_string(), json!(delivery.id));
    doc.insert("messageAttributes".to_string(), json!(delivery.attributes));

    Value::Object(doc)
}

/// Run one delivery through the full pipeline
///
/// Returns the validated event on success so the caller can log its identity;
/// the caller owns the terminal ack/nack and the stats record.
pub async fn process_delivery(
    delivery: &Delivery,
    store: &dyn ItemStore,
    processed_by: &str,
) -> Result<ItemEvent, PipelineError> {
    let payload = decode_payload(&delivery.payload)?;
    let event = validate_item(&payload)?;

    let document = build_document(&payload, delivery, processed_by, Utc::now());
    store.upsert_merge(&event.id, document).await?;

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use event_channel::{AckHandle, ChannelResult};
    use std::collections::HashMap;

    struct NoopHandle;

    #[async_trait::async_trait]
    impl AckHandle for NoopHandle {
        async fn ack(&self) -> ChannelResult<()> {
            Ok(())
        }
        async fn nack(&self) -> ChannelResult<()> {
            Ok(())
        }
        async fn extend_deadline(&self) -> ChannelResult<()> {
            Ok(())
        }
    }

    fn delivery(payload: &[u8]) -> Delivery {
        let mut attributes = HashMap::new();
        attributes.insert("eventType".to_string(), "item.created".to_string());
        Delivery::new(
            "7".to_string(),
            payload.to_vec(),
            attributes,
            0,
            Box::new(NoopHandle),
        )
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        assert!(matches!(
            decode_payload(b"not json"),
            Err(DecodeError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        assert!(matches!(decode_payload(b"[1,2,3]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode_payload(b"\"text\""), Err(DecodeError::NotAnObject)));
    }

    #[test]
    fn test_document_carries_processing_metadata_and_unknown_fields() {
        let payload = serde_json::json!({
            "id": "a1",
            "name": "Chew Toy",
            "category": "toys",
            "batchCode": "B-17"
        });
        let delivery = delivery(b"{}");
        let doc = build_document(&payload, &delivery, "item-ingest", Utc::now());

        assert_eq!(doc["id"], "a1");
        assert_eq!(doc["batchCode"], "B-17");
        assert_eq!(doc["processedBy"], "item-ingest");
        assert_eq!(doc["messageId"], "7");
        assert_eq!(doc["messageAttributes"]["eventType"], "item.created");
        assert!(doc["processedAt"].is_string());
    }

    #[tokio::test]
    async fn test_process_valid_delivery_stores_document() {
        let store = InMemoryStore::new();
        let delivery = delivery(br#"{"id":"a1","name":"Chew Toy","category":"toys"}"#);

        let event = process_delivery(&delivery, &store, "item-ingest")
            .await
            .unwrap();

        assert_eq!(event.id, "a1");
        let doc = store.fetch("a1").await.unwrap().unwrap();
        assert_eq!(doc["category"], "toys");
        assert_eq!(doc["messageId"], "7");
    }

    #[tokio::test]
    async fn test_validation_failure_leaves_store_untouched() {
        let store = InMemoryStore::new();
        let delivery = delivery(br#"{"id":"a2","category":"invalid"}"#);

        let err = process_delivery(&delivery, &store, "item-ingest")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "validation");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_decode_failure_happens_before_validation() {
        let store = InMemoryStore::new();
        let delivery = delivery(b"\x00\x01 not utf8 json");

        let err = process_delivery(&delivery, &store, "item-ingest")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "decode");
        assert!(store.is_empty().await);
    }
}
