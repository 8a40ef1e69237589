use crate::utils::error::PatternError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// API Gateway sends `null` instead of an empty map for absent headers and parameters.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

// ---------------------------------------------------------------------------
// HTTP proxy events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    #[serde(default)]
    pub http_method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub path_parameters: HashMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
    /// Function URL events carry the method here instead of `httpMethod`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_context: Option<Value>,
}

impl ApiRequest {
    pub fn method(&self) -> String {
        if !self.http_method.is_empty() {
            return self.http_method.to_ascii_uppercase();
        }
        self.request_context
            .as_ref()
            .and_then(|ctx| ctx.pointer("/http/method"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_uppercase()
    }

    /// Header names are case-insensitive; API Gateway preserves the client's casing.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn path_parameter(&self, name: &str) -> Option<&str> {
        self.path_parameters
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: Serialize>(status_code: u16, body: &T) -> Self {
        match serde_json::to_string(body) {
            Ok(body) => Self {
                status_code,
                headers: HashMap::from([(
                    "Content-Type".to_string(),
                    "application/json".to_string(),
                )]),
                body,
            },
            Err(e) => {
                tracing::error!("Failed to serialize response body: {}", e);
                Self::message(500, "Internal Server Error")
            }
        }
    }

    pub fn message(status_code: u16, message: impl Into<String>) -> Self {
        Self::json(status_code, &serde_json::json!({ "message": message.into() }))
    }

    pub fn text(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            headers: HashMap::from([("Content-Type".to_string(), "text/plain".to_string())]),
            body: body.into(),
        }
    }

    /// Client errors keep their message; anything else is logged and masked.
    pub fn from_error(err: &PatternError) -> Self {
        let status = err.status_code();
        if err.is_client_error() {
            tracing::warn!("{} {}", status, err);
            Self::message(status, err.to_string())
        } else {
            tracing::error!("{} {}", status, err);
            Self::message(status, "Internal Server Error")
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

// ---------------------------------------------------------------------------
// Queue and stream batches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqsEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<SqsMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqsMessage {
    pub message_id: String,
    #[serde(default)]
    pub receipt_handle: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attributes: HashMap<String, String>,
    #[serde(rename = "eventSourceARN", default)]
    pub event_source_arn: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamoDbStreamEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<DynamoDbStreamRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamoDbStreamRecord {
    #[serde(rename = "eventID")]
    pub event_id: String,
    #[serde(rename = "eventName")]
    pub event_name: String,
    pub dynamodb: StreamData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamData {
    #[serde(default)]
    pub keys: Value,
    #[serde(default)]
    pub new_image: Option<Value>,
    #[serde(default)]
    pub old_image: Option<Value>,
    pub sequence_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

impl BatchResponse {
    pub fn failed_identifiers(&self) -> Vec<&str> {
        self.batch_item_failures
            .iter()
            .map(|f| f.item_identifier.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Travel booking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TripRequest {
    pub passenger_name: String,
    pub flight_number: String,
    pub departure: String,
    pub destination: String,
    pub flight_price: f64,
    pub guest_name: String,
    pub hotel_name: String,
    pub room_type: String,
    pub check_in: String,
    pub check_out: String,
    pub hotel_price: f64,
    pub driver_name: String,
    pub car_type: String,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub pickup_date: String,
    pub dropoff_date: String,
    pub car_price: f64,
    pub fail_book_flight: bool,
    pub fail_book_hotel: bool,
    pub fail_book_car: bool,
}

impl Default for TripRequest {
    fn default() -> Self {
        let today = Utc::now().date_naive().to_string();
        let flight_suffix = uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase();
        Self {
            passenger_name: "John Doe".to_string(),
            flight_number: format!("FL{}", flight_suffix),
            departure: "JFK".to_string(),
            destination: "LAX".to_string(),
            flight_price: 299.99,
            guest_name: "John Doe".to_string(),
            hotel_name: "Grand Hotel".to_string(),
            room_type: "Deluxe Suite".to_string(),
            check_in: today.clone(),
            check_out: today.clone(),
            hotel_price: 199.99,
            driver_name: "John Doe".to_string(),
            car_type: "Sedan".to_string(),
            pickup_location: "Airport".to_string(),
            dropoff_location: "Airport".to_string(),
            pickup_date: today.clone(),
            dropoff_date: today,
            car_price: 89.99,
            fail_book_flight: false,
            fail_book_hotel: false,
            fail_book_car: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightBooking {
    pub booking_id: String,
    pub passenger_name: String,
    pub flight_number: String,
    pub departure: String,
    pub destination: String,
    pub price: f64,
    #[serde(default)]
    pub fail_book_flight: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotelReservation {
    pub reservation_id: String,
    pub guest_name: String,
    pub hotel_name: String,
    pub room_type: String,
    pub check_in: String,
    pub check_out: String,
    pub price: f64,
    #[serde(default)]
    pub fail_book_hotel: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarRental {
    pub rental_id: String,
    pub driver_name: String,
    pub car_type: String,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub pickup_date: String,
    pub dropoff_date: String,
    pub price: f64,
    #[serde(default)]
    pub fail_book_car: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripConfirmation {
    pub success: bool,
    pub transaction_id: String,
    pub message: String,
    pub bookings: TripBookings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripBookings {
    pub flight: String,
    pub hotel: String,
    pub car: String,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub quantity: u32,
    pub price: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    Validated,
    InventoryChecked,
    PaymentProcessed,
    InventoryReserved,
    FraudChecked,
    InvoiceGenerated,
    AwaitingWarehouse,
    ItemsPicked,
    QualityChecked,
    Packaged,
    AwaitingPickup,
    Shipped,
    Completed,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Validated => "validated",
            OrderStatus::InventoryChecked => "inventory-checked",
            OrderStatus::PaymentProcessed => "payment-processed",
            OrderStatus::InventoryReserved => "inventory-reserved",
            OrderStatus::FraudChecked => "fraud-checked",
            OrderStatus::InvoiceGenerated => "invoice-generated",
            OrderStatus::AwaitingWarehouse => "awaiting-warehouse",
            OrderStatus::ItemsPicked => "items-picked",
            OrderStatus::QualityChecked => "quality-checked",
            OrderStatus::Packaged => "packaged",
            OrderStatus::AwaitingPickup => "awaiting-pickup",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    #[serde(default)]
    pub person_id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gov_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gov_id_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

// ---------------------------------------------------------------------------
// Event bus and claim checks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventEntry {
    pub source: String,
    pub detail_type: String,
    /// JSON document, serialized the way the bus expects it.
    pub detail: String,
    pub event_bus_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutEventsOutcome {
    pub failed_entry_count: usize,
    pub event_ids: Vec<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimCheck {
    pub id: String,
    pub location: String,
    pub size_bytes: usize,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_request_tolerates_null_maps() {
        let request: ApiRequest = serde_json::from_value(serde_json::json!({
            "httpMethod": "get",
            "pathParameters": null,
            "headers": {"Content-Type": "application/json"},
            "body": null
        }))
        .unwrap();

        assert_eq!(request.method(), "GET");
        assert!(request.path_parameters.is_empty());
        assert_eq!(request.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_function_url_method_fallback() {
        let request: ApiRequest = serde_json::from_value(serde_json::json!({
            "requestContext": {"http": {"method": "POST"}},
            "body": "{}"
        }))
        .unwrap();
        assert_eq!(request.method(), "POST");
    }

    #[test]
    fn test_trip_request_defaults() {
        let trip: TripRequest =
            serde_json::from_value(serde_json::json!({"passengerName": "Ada"})).unwrap();
        assert_eq!(trip.passenger_name, "Ada");
        assert_eq!(trip.guest_name, "John Doe");
        assert_eq!(trip.departure, "JFK");
        assert!(trip.flight_number.starts_with("FL"));
        assert_eq!(trip.flight_number.len(), 8);
        assert!(!trip.fail_book_car);
    }

    #[test]
    fn test_stream_record_field_names() {
        let record: DynamoDbStreamRecord = serde_json::from_value(serde_json::json!({
            "eventID": "1",
            "eventName": "INSERT",
            "dynamodb": {
                "Keys": {"pk": {"S": "a"}},
                "NewImage": {"pk": {"S": "a"}},
                "SequenceNumber": "111"
            }
        }))
        .unwrap();
        assert_eq!(record.dynamodb.sequence_number, "111");
        assert!(record.dynamodb.old_image.is_none());
    }
}
