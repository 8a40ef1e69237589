//! Travel booking saga: flight, hotel and car reservations with cancellations as compensations.

use crate::adapters::memory::LocalInvoker;
use crate::core::saga::{CompensationOutcome, Saga, SagaStep};
use crate::domain::model::{
    ApiResponse, CarRental, FlightBooking, HotelReservation, TripBookings, TripConfirmation,
    TripRequest,
};
use crate::domain::ports::{FunctionInvoker, ItemKey, ItemStore};
use crate::domain::settings::SagaFunctions;
use crate::utils::error::{PatternError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationKind {
    Flight,
    Hotel,
    Car,
}

impl ReservationKind {
    pub fn label(&self) -> &'static str {
        match self {
            ReservationKind::Flight => "Flight",
            ReservationKind::Hotel => "Hotel",
            ReservationKind::Car => "Car",
        }
    }

    pub fn resource(&self) -> &'static str {
        match self {
            ReservationKind::Flight => "flight",
            ReservationKind::Hotel => "hotel",
            ReservationKind::Car => "car",
        }
    }

    pub fn id_field(&self) -> &'static str {
        match self {
            ReservationKind::Flight => "bookingId",
            ReservationKind::Hotel => "reservationId",
            ReservationKind::Car => "rentalId",
        }
    }

    fn step_name(&self) -> &'static str {
        match self {
            ReservationKind::Flight => "reserve_flight",
            ReservationKind::Hotel => "reserve_hotel",
            ReservationKind::Car => "reserve_car",
        }
    }

    fn from_step_name(step: &str) -> Option<Self> {
        [Self::Flight, Self::Hotel, Self::Car]
            .into_iter()
            .find(|kind| kind.step_name() == step)
    }
}

/// Pulls the reservation id out of an invoke result.
///
/// Reservation functions answer either with a proxy response (`statusCode` plus a
/// `body` that may itself be a JSON string) or with a bare object.
pub fn decode_reservation(kind: ReservationKind, function: &str, result: Value) -> Result<String> {
    let failure = |message: String| PatternError::InvocationError {
        function: function.to_string(),
        message,
    };

    let result = match result {
        Value::Null => {
            return Err(failure(format!(
                "{} reservation returned no result",
                kind.label()
            )))
        }
        Value::String(raw) => serde_json::from_str(&raw)?,
        other => other,
    };

    let Value::Object(mut object) = result else {
        return Err(failure(format!(
            "Unexpected {} result format",
            kind.resource()
        )));
    };

    let body = match object.remove("body") {
        Some(body) => {
            let body = match body {
                Value::String(raw) => serde_json::from_str(&raw)?,
                other => other,
            };
            let status = object.get("statusCode").and_then(Value::as_u64);
            if status != Some(200) {
                let message = body
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("no message");
                return Err(failure(format!(
                    "{} reservation failed: {}",
                    kind.label(),
                    message
                )));
            }
            body
        }
        None => Value::Object(object),
    };

    body.get(kind.id_field())
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| failure(format!("{} result is missing {}", kind.label(), kind.id_field())))
}

struct ReservationStep {
    kind: ReservationKind,
    reserve_function: String,
    cancel_function: String,
    payload: Value,
    invoker: Arc<dyn FunctionInvoker>,
}

#[async_trait]
impl SagaStep<()> for ReservationStep {
    fn name(&self) -> &str {
        self.kind.step_name()
    }

    async fn execute(&self, _ctx: &mut ()) -> Result<Value> {
        let result = self
            .invoker
            .invoke(&self.reserve_function, self.payload.clone())
            .await?;
        let id = decode_reservation(self.kind, &self.reserve_function, result)?;
        tracing::info!("{} reserved successfully: {}", self.kind.label(), id);
        Ok(Value::String(id))
    }

    fn has_compensation(&self) -> bool {
        true
    }

    async fn compensate(&self, _ctx: &(), output: &Value) -> Result<()> {
        tracing::info!("Compensating: cancelling {} {}", self.kind.resource(), output);
        let result = self
            .invoker
            .invoke(&self.cancel_function, json!({ self.kind.id_field(): output }))
            .await?;

        // A proxy response with an error status is still a failed cancellation.
        if let Some(status) = result.get("statusCode").and_then(Value::as_u64) {
            if !(200..300).contains(&status) {
                return Err(PatternError::InvocationError {
                    function: self.cancel_function.clone(),
                    message: format!("cancellation answered {}", status),
                });
            }
        }
        Ok(())
    }
}

pub struct TravelBookingSaga {
    invoker: Arc<dyn FunctionInvoker>,
    functions: SagaFunctions,
}

impl TravelBookingSaga {
    pub fn new(invoker: Arc<dyn FunctionInvoker>, functions: SagaFunctions) -> Self {
        Self { invoker, functions }
    }

    pub async fn handle(&self, event: Value) -> Result<Value> {
        tracing::info!("Received event: {}", event);
        let request: TripRequest = if event.is_null() {
            TripRequest::default()
        } else {
            serde_json::from_value(event)?
        };
        let confirmation = self.book(request).await?;
        Ok(serde_json::to_value(confirmation)?)
    }

    pub async fn book(&self, request: TripRequest) -> Result<TripConfirmation> {
        let flight = FlightBooking {
            booking_id: Uuid::new_v4().to_string(),
            passenger_name: request.passenger_name.clone(),
            flight_number: request.flight_number.clone(),
            departure: request.departure.clone(),
            destination: request.destination.clone(),
            price: request.flight_price,
            fail_book_flight: request.fail_book_flight,
        };
        let hotel = HotelReservation {
            reservation_id: Uuid::new_v4().to_string(),
            guest_name: request.guest_name.clone(),
            hotel_name: request.hotel_name.clone(),
            room_type: request.room_type.clone(),
            check_in: request.check_in.clone(),
            check_out: request.check_out.clone(),
            price: request.hotel_price,
            fail_book_hotel: request.fail_book_hotel,
        };
        let car = CarRental {
            rental_id: Uuid::new_v4().to_string(),
            driver_name: request.driver_name.clone(),
            car_type: request.car_type.clone(),
            pickup_location: request.pickup_location.clone(),
            dropoff_location: request.dropoff_location.clone(),
            pickup_date: request.pickup_date.clone(),
            dropoff_date: request.dropoff_date.clone(),
            price: request.car_price,
            fail_book_car: request.fail_book_car,
        };

        let saga = Saga::new("travel-booking")
            .step(self.reservation(
                ReservationKind::Flight,
                &self.functions.reserve_flight,
                &self.functions.cancel_flight,
                serde_json::to_value(flight)?,
            ))
            .step(self.reservation(
                ReservationKind::Hotel,
                &self.functions.reserve_hotel,
                &self.functions.cancel_hotel,
                serde_json::to_value(hotel)?,
            ))
            .step(self.reservation(
                ReservationKind::Car,
                &self.functions.reserve_car,
                &self.functions.cancel_car,
                serde_json::to_value(car)?,
            ));

        let report = saga.run(&mut ()).await;
        let id_of = |kind: ReservationKind| {
            report
                .output(kind.step_name())
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        if report.is_completed() {
            tracing::info!("All reservations completed successfully!");
            return Ok(TripConfirmation {
                success: true,
                transaction_id: report.transaction_id.clone(),
                message: "All travel arrangements completed successfully".to_string(),
                bookings: TripBookings {
                    flight: id_of(ReservationKind::Flight),
                    hotel: id_of(ReservationKind::Hotel),
                    car: id_of(ReservationKind::Car),
                },
            });
        }

        let original_error = report
            .failure
            .as_ref()
            .map(|f| f.error.clone())
            .unwrap_or_default();

        let compensations: Vec<Value> = report
            .compensations
            .iter()
            .filter_map(|record| {
                let kind = ReservationKind::from_step_name(&record.step)?;
                let mut entry = Map::new();
                match &record.outcome {
                    CompensationOutcome::Compensated => {
                        entry.insert(kind.resource().into(), "cancelled".into());
                        entry.insert(kind.id_field().into(), id_of(kind).into());
                    }
                    CompensationOutcome::Failed { error } => {
                        entry.insert(kind.resource().into(), "cancellation_failed".into());
                        entry.insert("error".into(), error.clone().into());
                    }
                }
                Some(Value::Object(entry))
            })
            .collect();

        let details = json!({
            "transactionId": report.transaction_id,
            "status": report.status,
            "originalError": original_error,
            "compensations": compensations,
            "message": format!("Transaction failed and rolled back: {}", original_error),
        });

        Err(PatternError::SagaAborted {
            transaction_id: report.transaction_id.clone(),
            details,
        })
    }

    fn reservation(
        &self,
        kind: ReservationKind,
        reserve_function: &str,
        cancel_function: &str,
        payload: Value,
    ) -> ReservationStep {
        ReservationStep {
            kind,
            reserve_function: reserve_function.to_string(),
            cancel_function: cancel_function.to_string(),
            payload,
            invoker: Arc::clone(&self.invoker),
        }
    }
}

/// The six reservation functions the saga calls, backed by a bookings table.
#[derive(Clone)]
pub struct ReservationDesk {
    store: Arc<dyn ItemStore>,
    table: String,
}

impl ReservationDesk {
    pub fn new(store: Arc<dyn ItemStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub async fn reserve(&self, kind: ReservationKind, payload: Value) -> ApiResponse {
        match self.try_reserve(kind, payload).await {
            Ok(response) => response,
            Err(e) => ApiResponse::from_error(&e),
        }
    }

    pub async fn cancel(&self, kind: ReservationKind, payload: Value) -> ApiResponse {
        match self.try_cancel(kind, payload).await {
            Ok(response) => response,
            Err(e) => ApiResponse::from_error(&e),
        }
    }

    async fn try_reserve(&self, kind: ReservationKind, payload: Value) -> Result<ApiResponse> {
        let (id, fail, record) = match kind {
            ReservationKind::Flight => {
                let booking: FlightBooking = serde_json::from_value(payload)?;
                (booking.booking_id.clone(), booking.fail_book_flight, serde_json::to_value(booking)?)
            }
            ReservationKind::Hotel => {
                let reservation: HotelReservation = serde_json::from_value(payload)?;
                (
                    reservation.reservation_id.clone(),
                    reservation.fail_book_hotel,
                    serde_json::to_value(reservation)?,
                )
            }
            ReservationKind::Car => {
                let rental: CarRental = serde_json::from_value(payload)?;
                (rental.rental_id.clone(), rental.fail_book_car, serde_json::to_value(rental)?)
            }
        };

        if fail {
            tracing::warn!("{} reservation {} failed on request", kind.label(), id);
            return Ok(ApiResponse::message(
                500,
                format!("{} reservation failed", kind.label()),
            ));
        }
        if id.trim().is_empty() {
            return Err(PatternError::validation(format!("{} is required", kind.id_field())));
        }

        let mut item = match record {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        item.insert("type".into(), kind.resource().into());
        item.insert("status".into(), "CONFIRMED".into());
        item.insert("createdAt".into(), Utc::now().to_rfc3339().into());

        self.store
            .put_item(&self.table, &ItemKey::new("id", &id), item)
            .await?;

        tracing::info!("{} reserved: {}", kind.label(), id);
        Ok(ApiResponse::json(
            200,
            &json!({
                "message": format!("{} reserved", kind.label()),
                kind.id_field(): id,
            }),
        ))
    }

    async fn try_cancel(&self, kind: ReservationKind, payload: Value) -> Result<ApiResponse> {
        let id = payload
            .get(kind.id_field())
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PatternError::validation(format!("{} is required", kind.id_field())))?
            .to_string();

        let key = ItemKey::new("id", &id);
        let existing = self.store.get_item(&self.table, &key).await?;
        match existing {
            Some(item) if item.get("type").and_then(Value::as_str) == Some(kind.resource()) => {}
            _ => return Err(PatternError::not_found(kind.label(), id)),
        }

        let mut changes = Map::new();
        changes.insert("status".into(), "CANCELLED".into());
        changes.insert("cancelledAt".into(), Utc::now().to_rfc3339().into());
        self.store.update_item(&self.table, &key, changes).await?;

        tracing::info!("{} cancelled: {}", kind.label(), id);
        Ok(ApiResponse::json(
            200,
            &json!({
                "message": format!("{} cancelled", kind.label()),
                kind.id_field(): id,
            }),
        ))
    }

    /// Exposes the desk's functions through a local invoker under the configured names.
    pub fn register(&self, invoker: &LocalInvoker, functions: &SagaFunctions) {
        let routes = [
            (&functions.reserve_flight, ReservationKind::Flight, true),
            (&functions.cancel_flight, ReservationKind::Flight, false),
            (&functions.reserve_hotel, ReservationKind::Hotel, true),
            (&functions.cancel_hotel, ReservationKind::Hotel, false),
            (&functions.reserve_car, ReservationKind::Car, true),
            (&functions.cancel_car, ReservationKind::Car, false),
        ];

        for (name, kind, reserve) in routes {
            let desk = self.clone();
            invoker.register(name.clone(), move |payload| {
                let desk = desk.clone();
                async move {
                    let response = if reserve {
                        desk.reserve(kind, payload).await
                    } else {
                        desk.cancel(kind, payload).await
                    };
                    serde_json::to_value(response).map_err(PatternError::from)
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_proxy_response_with_string_body() {
        let result = json!({
            "statusCode": 200,
            "body": "{\"bookingId\": \"b-1\"}"
        });
        let id = decode_reservation(ReservationKind::Flight, "reserve", result).unwrap();
        assert_eq!(id, "b-1");
    }

    #[test]
    fn test_decode_proxy_response_failure_uses_body_message() {
        let result = json!({
            "statusCode": 500,
            "body": {"message": "Hotel reservation failed"}
        });
        let err = decode_reservation(ReservationKind::Hotel, "reserve", result).unwrap_err();
        assert!(err
            .to_string()
            .contains("Hotel reservation failed: Hotel reservation failed"));
    }

    #[test]
    fn test_decode_bare_object_and_json_string() {
        let bare = json!({"rentalId": "r-9"});
        assert_eq!(
            decode_reservation(ReservationKind::Car, "reserve", bare).unwrap(),
            "r-9"
        );

        let raw = Value::String("{\"rentalId\":\"r-10\"}".into());
        assert_eq!(
            decode_reservation(ReservationKind::Car, "reserve", raw).unwrap(),
            "r-10"
        );
    }

    #[test]
    fn test_decode_rejects_null_and_scalars() {
        assert!(decode_reservation(ReservationKind::Car, "reserve", Value::Null).is_err());
        assert!(decode_reservation(ReservationKind::Car, "reserve", json!(42)).is_err());
        assert!(decode_reservation(ReservationKind::Car, "reserve", json!({"other": 1})).is_err());
    }
}
