//! Stripe webhook receiver that verifies signatures and forwards events to the bus.

use crate::domain::model::{ApiRequest, ApiResponse, EventEntry};
use crate::domain::ports::EventPublisher;
use crate::domain::settings::WebhookSettings;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Parsed `Stripe-Signature` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: Option<i64>,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    /// Parses `t=<unix>,v1=<hex>[,v1=<hex>...]`; unknown schemes are ignored.
    pub fn parse(header: &str) -> Self {
        let mut parsed = SignatureHeader::default();
        for element in header.split(',') {
            let Some((key, value)) = element.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => parsed.timestamp = value.parse().ok(),
                "v1" => parsed.signatures.push(value.to_string()),
                _ => {}
            }
        }
        parsed
    }
}

/// Hex HMAC-SHA256 of `"<timestamp>.<payload>"`, as Stripe signs it.
pub fn compute_signature(secret: &str, timestamp: i64, payload: &str) -> String {
    signer(secret, timestamp, payload)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

fn signer(secret: &str, timestamp: i64, payload: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    Some(mac)
}

fn contains_valid_signature(secret: &str, timestamp: i64, payload: &str, signatures: &[String]) -> bool {
    signatures.iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        signer(secret, timestamp, payload).is_some_and(|mac| mac.verify_slice(&expected).is_ok())
    })
}

enum Rejection {
    BadRequest(&'static str),
    Unauthorized,
}

pub struct StripeWebhook {
    publisher: Arc<dyn EventPublisher>,
    event_bus_name: String,
    settings: WebhookSettings,
}

impl StripeWebhook {
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        event_bus_name: impl Into<String>,
        settings: WebhookSettings,
    ) -> Self {
        Self {
            publisher,
            event_bus_name: event_bus_name.into(),
            settings,
        }
    }

    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        let payload = match json_payload(&request) {
            Ok(payload) => payload,
            Err(reason) => {
                tracing::error!("400 Bad Request - {}", reason);
                return ApiResponse::text(400, reason);
            }
        };

        let Some(secret) = self.settings.secret.as_deref() else {
            tracing::error!("500 Webhook secret is not configured");
            return ApiResponse::text(500, "Internal Server Error");
        };

        match self.verify(&request, secret, &payload) {
            Ok(()) => {}
            Err(Rejection::BadRequest(reason)) => {
                tracing::error!("400 Bad Request - {}", reason);
                return ApiResponse::text(400, reason);
            }
            Err(Rejection::Unauthorized) => {
                tracing::error!("401 Unauthorized - Invalid Signature");
                return ApiResponse::text(401, "Invalid Signature");
            }
        }

        let detail_type = serde_json::from_str::<Value>(&payload)
            .ok()
            .and_then(|event| event.get("type").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| self.settings.default_detail_type.clone());

        let entry = EventEntry {
            source: self.settings.source.clone(),
            detail_type: detail_type.clone(),
            detail: payload,
            event_bus_name: self.event_bus_name.clone(),
        };

        match self.publisher.put_events(vec![entry]).await {
            Ok(outcome) if outcome.failed_entry_count > 0 => {
                tracing::error!("500 FailedEntry Error - {} event not forwarded", detail_type);
                ApiResponse::text(
                    500,
                    "FailedEntry Error - The entry could not be successfully forwarded to Amazon EventBridge",
                )
            }
            Ok(_) => {
                tracing::info!("📨 Forwarded {} event", detail_type);
                ApiResponse::text(202, "Message forwarded to Amazon EventBridge")
            }
            Err(e) => {
                tracing::error!("500 Put Events Error - {}", e);
                ApiResponse::text(
                    500,
                    "Internal Server Error - The request was rejected by Amazon EventBridge API",
                )
            }
        }
    }

    fn verify(&self, request: &ApiRequest, secret: &str, payload: &str) -> Result<(), Rejection> {
        let header = request
            .header(SIGNATURE_HEADER)
            .map(SignatureHeader::parse)
            .unwrap_or_default();

        let timestamp = header
            .timestamp
            .filter(|t| {
                // An age that overflows is stale.
                Utc::now()
                    .timestamp()
                    .checked_sub(*t)
                    .is_some_and(|age| age < self.settings.tolerance_seconds)
            })
            .ok_or(Rejection::BadRequest("Invalid timestamp"))?;

        if contains_valid_signature(secret, timestamp, payload, &header.signatures) {
            Ok(())
        } else {
            Err(Rejection::Unauthorized)
        }
    }
}

fn json_payload(request: &ApiRequest) -> Result<String, &'static str> {
    let content_type = request
        .header("content-type")
        .and_then(|raw| raw.split(';').next())
        .map(|media| media.trim().to_ascii_lowercase());
    if content_type.as_deref() != Some("application/json") {
        return Err("Unsupported content-type");
    }

    let raw = request.body.as_deref().ok_or("Missing event body")?;
    let payload = if request.is_base64_encoded {
        let bytes = STANDARD.decode(raw).map_err(|_| "Invalid base64 body")?;
        String::from_utf8(bytes).map_err(|_| "Invalid base64 body")?
    } else {
        raw.to_string()
    };

    serde_json::from_str::<Value>(&payload).map_err(|_| "Invalid JSON payload")?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signature_header() {
        let header = SignatureHeader::parse("t=1492774577,v1=abc,v0=zzz,v1=def");
        assert_eq!(header.timestamp, Some(1492774577));
        assert_eq!(header.signatures, vec!["abc", "def"]);

        let junk = SignatureHeader::parse("garbage");
        assert_eq!(junk, SignatureHeader::default());
    }

    #[test]
    fn test_signature_matches_any_candidate() {
        let signature = compute_signature("whsec_test", 100, "{}");
        assert_eq!(signature.len(), 64);

        let candidates = vec!["00ff".to_string(), "not-hex".to_string(), signature];
        assert!(contains_valid_signature("whsec_test", 100, "{}", &candidates));
        assert!(!contains_valid_signature("other", 100, "{}", &candidates));
        assert!(!contains_valid_signature("whsec_test", 101, "{}", &candidates));
    }

    #[test]
    fn test_content_type_parameters_are_ignored() {
        let request = ApiRequest {
            headers: [("Content-Type".to_string(), "application/json; charset=utf-8".to_string())]
                .into(),
            body: Some(r#"{"id":"evt_1"}"#.to_string()),
            ..ApiRequest::default()
        };
        assert_eq!(json_payload(&request).unwrap(), r#"{"id":"evt_1"}"#);
    }

    #[test]
    fn test_base64_body_is_decoded() {
        let request = ApiRequest {
            headers: [("content-type".to_string(), "application/json".to_string())].into(),
            body: Some(STANDARD.encode(r#"{"a":1}"#)),
            is_base64_encoded: true,
            ..ApiRequest::default()
        };
        assert_eq!(json_payload(&request).unwrap(), r#"{"a":1}"#);
    }
}
