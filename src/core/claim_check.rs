//! Claim check: park large payloads in object storage and pass a reference on the bus.

use crate::core::batch::{process_batch, BatchMode};
use crate::domain::model::{BatchResponse, ClaimCheck, EventEntry, SqsEvent, SqsMessage};
use crate::domain::ports::{EventPublisher, Storage};
use crate::domain::settings::ClaimCheckSettings;
use crate::utils::error::{PatternError, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Detail type used for payloads small enough to travel inline.
pub const INLINE_DETAIL_TYPE: &str = "InlinePayload";

pub struct ClaimCheckSplitter {
    storage: Arc<dyn Storage>,
    publisher: Arc<dyn EventPublisher>,
    event_bus_name: String,
    settings: ClaimCheckSettings,
}

impl ClaimCheckSplitter {
    pub fn new(
        storage: Arc<dyn Storage>,
        publisher: Arc<dyn EventPublisher>,
        event_bus_name: impl Into<String>,
        settings: ClaimCheckSettings,
    ) -> Self {
        Self {
            storage,
            publisher,
            event_bus_name: event_bus_name.into(),
            settings,
        }
    }

    pub async fn handle(&self, event: SqsEvent) -> BatchResponse {
        let mode = BatchMode::for_queue(&event.records);
        process_batch(event.records, mode, |message| self.split(message)).await
    }

    async fn split(&self, message: SqsMessage) -> Result<()> {
        let payload = message.body.as_bytes();
        let inline = self
            .settings
            .inline_limit_bytes
            .is_some_and(|limit| payload.len() <= limit);

        let entry = if inline {
            tracing::debug!("Message {} travels inline ({} bytes)", message.message_id, payload.len());
            self.entry(INLINE_DETAIL_TYPE, inline_detail(&message.body))
        } else {
            let claim = self.check_in(payload).await?;
            tracing::info!(
                "📦 Message {} stored at {} ({} bytes)",
                message.message_id,
                claim.location,
                claim.size_bytes
            );
            self.entry(&self.settings.detail_type, serde_json::to_string(&claim)?)
        };

        let outcome = self.publisher.put_events(vec![entry]).await?;
        if outcome.failed_entry_count > 0 {
            return Err(PatternError::PublishError {
                message: format!("Event for message {} was rejected", message.message_id),
            });
        }
        Ok(())
    }

    async fn check_in(&self, payload: &[u8]) -> Result<ClaimCheck> {
        let id = Uuid::new_v4().to_string();
        let location = format!("{}/{}.json", self.settings.prefix.trim_end_matches('/'), id);
        self.storage.write_file(&location, payload).await?;
        Ok(ClaimCheck {
            id,
            location,
            size_bytes: payload.len(),
            created_at: Utc::now(),
        })
    }

    fn entry(&self, detail_type: &str, detail: String) -> EventEntry {
        EventEntry {
            source: self.settings.source.clone(),
            detail_type: detail_type.to_string(),
            detail,
            event_bus_name: self.event_bus_name.clone(),
        }
    }
}

/// The bus only takes JSON objects as detail.
fn inline_detail(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Value::Object(map).to_string(),
        Ok(other) => json!({ "payload": other }).to_string(),
        Err(_) => json!({ "payload": body }).to_string(),
    }
}

/// Resolves a claim check event back into the stored payload.
pub struct ClaimCheckRetriever {
    storage: Arc<dyn Storage>,
}

impl ClaimCheckRetriever {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn handle(&self, event: Value) -> Result<Value> {
        let claim = parse_claim(&event)?;
        let bytes = self.storage.read_file(&claim.location).await?;
        tracing::info!("Retrieved claim {} from {}", claim.id, claim.location);

        match serde_json::from_slice(&bytes) {
            Ok(payload) => Ok(payload),
            Err(_) => Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        }
    }
}

fn parse_claim(event: &Value) -> Result<ClaimCheck> {
    let detail = event
        .get("detail")
        .ok_or_else(|| PatternError::validation("Event has no detail"))?;
    let claim = match detail {
        // Some consumers receive the detail still serialized.
        Value::String(raw) => serde_json::from_str(raw)?,
        other => serde_json::from_value(other.clone())?,
    };
    Ok(claim)
}
