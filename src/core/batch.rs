//! Partial-failure processing for queue and stream batches.

use crate::domain::model::{
    BatchItemFailure, BatchResponse, DynamoDbStreamEvent, DynamoDbStreamRecord, EventEntry,
    SqsEvent, SqsMessage,
};
use crate::domain::ports::{EventPublisher, ItemKey, ItemStore};
use crate::utils::error::{PatternError, Result};
use chrono::Utc;
use serde_json::{json, Map, Number, Value};
use std::future::Future;
use std::sync::Arc;

/// A record that the event source can redeliver by identifier.
pub trait BatchRecord {
    fn item_identifier(&self) -> &str;
}

impl BatchRecord for SqsMessage {
    fn item_identifier(&self) -> &str {
        &self.message_id
    }
}

impl BatchRecord for DynamoDbStreamRecord {
    fn item_identifier(&self) -> &str {
        &self.dynamodb.sequence_number
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Records are independent; only failed records are redelivered.
    Standard,
    /// Order matters (FIFO queues, streams): everything from the first failure on is redelivered.
    Ordered,
}

impl BatchMode {
    pub fn for_queue(messages: &[SqsMessage]) -> Self {
        let fifo = messages
            .first()
            .and_then(|m| m.event_source_arn.as_deref())
            .is_some_and(|arn| arn.ends_with(".fifo"));
        if fifo {
            BatchMode::Ordered
        } else {
            BatchMode::Standard
        }
    }
}

pub async fn process_batch<R, F, Fut>(records: Vec<R>, mode: BatchMode, handler: F) -> BatchResponse
where
    R: BatchRecord,
    F: Fn(R) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let total = records.len();
    let mut failures = Vec::new();
    let mut halted = false;

    for record in records {
        let identifier = record.item_identifier().to_string();
        if halted {
            failures.push(BatchItemFailure {
                item_identifier: identifier,
            });
            continue;
        }

        if let Err(e) = handler(record).await {
            tracing::warn!(item = %identifier, "Record failed: {}", e);
            failures.push(BatchItemFailure {
                item_identifier: identifier,
            });
            if mode == BatchMode::Ordered {
                halted = true;
            }
        }
    }

    if failures.is_empty() {
        tracing::info!("✅ Processed {} records", total);
    } else {
        tracing::warn!("⚠️ {} of {} records reported as failed", failures.len(), total);
    }

    BatchResponse {
        batch_item_failures: failures,
    }
}

/// Buffers queue messages into a table, one item per message.
pub struct SqsToTable {
    store: Arc<dyn ItemStore>,
    table: String,
}

impl SqsToTable {
    pub fn new(store: Arc<dyn ItemStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub async fn handle(&self, event: SqsEvent) -> BatchResponse {
        let mode = BatchMode::for_queue(&event.records);
        process_batch(event.records, mode, |message| self.store_message(message)).await
    }

    async fn store_message(&self, message: SqsMessage) -> Result<()> {
        let mut item = match serde_json::from_str::<Value>(&message.body)? {
            Value::Object(map) => map,
            _ => {
                return Err(PatternError::validation(
                    "Message body must be a JSON object",
                ))
            }
        };

        let event_id = item
            .get("eventId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| message.message_id.clone());
        item.insert("receivedAt".to_string(), json!(Utc::now().to_rfc3339()));

        self.store
            .put_item(&self.table, &ItemKey::new("eventId", event_id.clone()), item)
            .await?;
        tracing::debug!("Stored event {} from message {}", event_id, message.message_id);
        Ok(())
    }
}

/// Publishes table changes from a DynamoDB stream to the event bus.
pub struct StreamForwarder {
    publisher: Arc<dyn EventPublisher>,
    event_bus_name: String,
    source: String,
}

impl StreamForwarder {
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        event_bus_name: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            event_bus_name: event_bus_name.into(),
            source: source.into(),
        }
    }

    pub async fn handle(&self, event: DynamoDbStreamEvent) -> BatchResponse {
        process_batch(event.records, BatchMode::Ordered, |record| {
            self.forward(record)
        })
        .await
    }

    async fn forward(&self, record: DynamoDbStreamRecord) -> Result<()> {
        match record.event_name.as_str() {
            "INSERT" | "MODIFY" | "REMOVE" => {}
            other => {
                return Err(PatternError::validation(format!(
                    "Unsupported stream event {}",
                    other
                )))
            }
        }

        let image = |image: &Option<Value>| -> Result<Value> {
            image.as_ref().map(unmarshal_image).unwrap_or(Ok(Value::Null))
        };
        let detail = json!({
            "eventId": record.event_id,
            "eventName": record.event_name,
            "keys": unmarshal_image(&record.dynamodb.keys)?,
            "newImage": image(&record.dynamodb.new_image)?,
            "oldImage": image(&record.dynamodb.old_image)?,
            "sequenceNumber": record.dynamodb.sequence_number,
        });

        let entry = EventEntry {
            source: self.source.clone(),
            detail_type: record.event_name.clone(),
            detail: detail.to_string(),
            event_bus_name: self.event_bus_name.clone(),
        };
        let outcome = self.publisher.put_events(vec![entry]).await?;
        if outcome.failed_entry_count > 0 {
            return Err(PatternError::PublishError {
                message: format!("Event for record {} was rejected", record.event_id),
            });
        }
        Ok(())
    }
}

/// Converts a DynamoDB JSON image (`{"name": {"S": "x"}}`) into plain JSON.
pub fn unmarshal_image(image: &Value) -> Result<Value> {
    match image {
        Value::Null => Ok(Value::Null),
        Value::Object(attributes) => {
            let mut plain = Map::with_capacity(attributes.len());
            for (name, attribute) in attributes {
                plain.insert(name.clone(), unmarshal_attribute(attribute)?);
            }
            Ok(Value::Object(plain))
        }
        _ => Err(PatternError::validation("Stream image must be an object")),
    }
}

pub fn unmarshal_attribute(attribute: &Value) -> Result<Value> {
    let (tag, value) = attribute
        .as_object()
        .filter(|typed| typed.len() == 1)
        .and_then(|typed| typed.iter().next())
        .ok_or_else(|| PatternError::validation(format!("Malformed attribute {}", attribute)))?;

    match (tag.as_str(), value) {
        ("S", Value::String(_)) | ("B", Value::String(_)) | ("BOOL", Value::Bool(_)) => {
            Ok(value.clone())
        }
        ("NULL", _) => Ok(Value::Null),
        ("N", Value::String(number)) => Ok(parse_number(number)),
        ("SS", Value::Array(_)) | ("BS", Value::Array(_)) => Ok(value.clone()),
        ("NS", Value::Array(numbers)) => Ok(Value::Array(
            numbers
                .iter()
                .map(|n| n.as_str().map(parse_number).unwrap_or(Value::Null))
                .collect(),
        )),
        ("L", Value::Array(items)) => items
            .iter()
            .map(unmarshal_attribute)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        ("M", map @ Value::Object(_)) => unmarshal_image(map),
        _ => Err(PatternError::validation(format!(
            "Unsupported attribute type {}",
            tag
        ))),
    }
}

pub(crate) fn parse_number(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(raw.to_string()))
}
