use crate::adapters::memory::{
    LocalInvoker, MemoryEventBus, MemoryInventory, MemoryItemStore, SimulatedPayments,
};
use crate::core::batch::{SqsToTable, StreamForwarder};
use crate::core::claim_check::{ClaimCheckRetriever, ClaimCheckSplitter};
use crate::core::ledger::{InMemoryLedger, LedgerDriver};
use crate::core::order::OrderWorkflow;
use crate::core::person::PersonApi;
use crate::core::travel::{ReservationDesk, ReservationKind, TravelBookingSaga};
use crate::core::webhook::StripeWebhook;
use crate::domain::model::{ApiRequest, DynamoDbStreamEvent, SqsEvent};
use crate::domain::ports::{
    ConfigProvider, EventPublisher, FunctionInvoker, InventoryService, ItemStore, Ledger,
    PaymentGateway, Storage,
};
use crate::utils::error::{PatternError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Every handler this crate can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum PatternKind {
    TravelSaga,
    ReserveFlight,
    CancelFlight,
    ReserveHotel,
    CancelHotel,
    ReserveCar,
    CancelCar,
    OrderWorkflow,
    SqsToTable,
    StreamForwarder,
    ClaimCheckSplit,
    ClaimCheckRetrieve,
    StripeWebhook,
    PersonLedger,
}

impl PatternKind {
    pub const ALL: [PatternKind; 14] = [
        PatternKind::TravelSaga,
        PatternKind::ReserveFlight,
        PatternKind::CancelFlight,
        PatternKind::ReserveHotel,
        PatternKind::CancelHotel,
        PatternKind::ReserveCar,
        PatternKind::CancelCar,
        PatternKind::OrderWorkflow,
        PatternKind::SqsToTable,
        PatternKind::StreamForwarder,
        PatternKind::ClaimCheckSplit,
        PatternKind::ClaimCheckRetrieve,
        PatternKind::StripeWebhook,
        PatternKind::PersonLedger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::TravelSaga => "travel-saga",
            PatternKind::ReserveFlight => "reserve-flight",
            PatternKind::CancelFlight => "cancel-flight",
            PatternKind::ReserveHotel => "reserve-hotel",
            PatternKind::CancelHotel => "cancel-hotel",
            PatternKind::ReserveCar => "reserve-car",
            PatternKind::CancelCar => "cancel-car",
            PatternKind::OrderWorkflow => "order-workflow",
            PatternKind::SqsToTable => "sqs-to-table",
            PatternKind::StreamForwarder => "stream-forwarder",
            PatternKind::ClaimCheckSplit => "claim-check-split",
            PatternKind::ClaimCheckRetrieve => "claim-check-retrieve",
            PatternKind::StripeWebhook => "stripe-webhook",
            PatternKind::PersonLedger => "person-ledger",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PatternKind::TravelSaga => "Book flight, hotel and car; cancel in reverse on failure",
            PatternKind::ReserveFlight
            | PatternKind::ReserveHotel
            | PatternKind::ReserveCar => "Saga participant: create a reservation",
            PatternKind::CancelFlight | PatternKind::CancelHotel | PatternKind::CancelCar => {
                "Saga participant: cancel a reservation"
            }
            PatternKind::OrderWorkflow => "Multi-step order processing with refunds on failure",
            PatternKind::SqsToTable => "Buffer queue messages into a table",
            PatternKind::StreamForwarder => "Publish table stream changes to the event bus",
            PatternKind::ClaimCheckSplit => "Store payloads and publish claim checks",
            PatternKind::ClaimCheckRetrieve => "Resolve a claim check into its payload",
            PatternKind::StripeWebhook => "Verify Stripe webhooks and forward to the event bus",
            PatternKind::PersonLedger => "Person CRUD over an optimistic-concurrency ledger",
        }
    }

    fn reservation(&self) -> Option<(ReservationKind, bool)> {
        match self {
            PatternKind::ReserveFlight => Some((ReservationKind::Flight, true)),
            PatternKind::CancelFlight => Some((ReservationKind::Flight, false)),
            PatternKind::ReserveHotel => Some((ReservationKind::Hotel, true)),
            PatternKind::CancelHotel => Some((ReservationKind::Hotel, false)),
            PatternKind::ReserveCar => Some((ReservationKind::Car, true)),
            PatternKind::CancelCar => Some((ReservationKind::Car, false)),
            _ => None,
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternKind {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self> {
        PatternKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| PatternError::InvalidConfigValueError {
                field: "pattern".to_string(),
                value: s.to_string(),
                reason: "Unknown pattern".to_string(),
            })
    }
}

/// The adapters a dispatcher wires into the handlers.
#[derive(Clone)]
pub struct Components {
    pub store: Arc<dyn ItemStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub storage: Arc<dyn Storage>,
    pub invoker: Arc<dyn FunctionInvoker>,
    pub ledger: Arc<dyn Ledger>,
    pub payments: Arc<dyn PaymentGateway>,
    pub inventory: Arc<dyn InventoryService>,
}

/// Routes raw JSON events to the handler for a pattern.
pub struct Dispatcher {
    config: Arc<dyn ConfigProvider>,
    components: Components,
}

impl Dispatcher {
    pub fn new(config: Arc<dyn ConfigProvider>, components: Components) -> Self {
        Self { config, components }
    }

    /// In-memory adapters, with the reservation functions served in-process.
    pub fn local(config: Arc<dyn ConfigProvider>, storage: Arc<dyn Storage>) -> Self {
        let store = Arc::new(MemoryItemStore::new());
        let invoker = LocalInvoker::new();
        ReservationDesk::new(store.clone(), config.tables().bookings)
            .register(&invoker, &config.saga_functions());

        let components = Components {
            store,
            publisher: Arc::new(MemoryEventBus::new()),
            storage,
            invoker: Arc::new(invoker),
            ledger: Arc::new(InMemoryLedger::new()),
            payments: Arc::new(SimulatedPayments::new()),
            inventory: Arc::new(MemoryInventory::unlimited()),
        };
        Self::new(config, components)
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn FunctionInvoker>) -> Self {
        self.components.invoker = invoker;
        self
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    pub async fn dispatch(&self, kind: PatternKind, event: Value) -> Result<Value> {
        tracing::info!("🚀 Dispatching {} event", kind);
        let c = &self.components;
        let config = &self.config;

        if let Some((reservation, reserve)) = kind.reservation() {
            let desk = ReservationDesk::new(c.store.clone(), config.tables().bookings);
            let response = if reserve {
                desk.reserve(reservation, event).await
            } else {
                desk.cancel(reservation, event).await
            };
            return Ok(serde_json::to_value(response)?);
        }

        match kind {
            PatternKind::TravelSaga => {
                TravelBookingSaga::new(c.invoker.clone(), config.saga_functions())
                    .handle(event)
                    .await
            }
            PatternKind::OrderWorkflow => {
                OrderWorkflow::new(
                    c.store.clone(),
                    c.payments.clone(),
                    c.inventory.clone(),
                    config.tables().orders,
                    config.order_policy(),
                )
                .handle(event)
                .await
            }
            PatternKind::SqsToTable => {
                let batch: SqsEvent = serde_json::from_value(event)?;
                let response = SqsToTable::new(c.store.clone(), config.tables().events)
                    .handle(batch)
                    .await;
                Ok(serde_json::to_value(response)?)
            }
            PatternKind::StreamForwarder => {
                let batch: DynamoDbStreamEvent = serde_json::from_value(event)?;
                let response = StreamForwarder::new(
                    c.publisher.clone(),
                    config.event_bus_name(),
                    format!("{}.stream", config.service_name()),
                )
                .handle(batch)
                .await;
                Ok(serde_json::to_value(response)?)
            }
            PatternKind::ClaimCheckSplit => {
                let batch: SqsEvent = serde_json::from_value(event)?;
                let response = ClaimCheckSplitter::new(
                    c.storage.clone(),
                    c.publisher.clone(),
                    config.event_bus_name(),
                    config.claim_check(),
                )
                .handle(batch)
                .await;
                Ok(serde_json::to_value(response)?)
            }
            PatternKind::ClaimCheckRetrieve => {
                ClaimCheckRetriever::new(c.storage.clone())
                    .handle(event)
                    .await
            }
            PatternKind::StripeWebhook => {
                let request: ApiRequest = serde_json::from_value(event)?;
                let response =
                    StripeWebhook::new(c.publisher.clone(), config.event_bus_name(), config.webhook())
                        .handle(request)
                        .await;
                Ok(serde_json::to_value(response)?)
            }
            PatternKind::PersonLedger => {
                let request: ApiRequest = serde_json::from_value(event)?;
                let driver = LedgerDriver::new(c.ledger.clone(), config.retry_policy());
                let response = PersonApi::new(driver, config.tables().ledger)
                    .handle(request)
                    .await;
                Ok(serde_json::to_value(response)?)
            }
            PatternKind::ReserveFlight
            | PatternKind::CancelFlight
            | PatternKind::ReserveHotel
            | PatternKind::CancelHotel
            | PatternKind::ReserveCar
            | PatternKind::CancelCar => Err(PatternError::ConfigError {
                message: format!("{} is handled by the reservation desk", kind),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStorage;
    use crate::config::toml_config::TomlConfig;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        Dispatcher::local(Arc::new(TomlConfig::default()), Arc::new(MemoryStorage::new()))
    }

    #[test]
    fn test_pattern_names_round_trip() {
        for kind in PatternKind::ALL {
            assert_eq!(kind.as_str().parse::<PatternKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                Value::String(kind.to_string())
            );
        }
        assert!("nope".parse::<PatternKind>().is_err());
    }

    #[tokio::test]
    async fn test_local_travel_saga_books_everything() {
        let result = dispatcher()
            .dispatch(PatternKind::TravelSaga, json!({}))
            .await
            .unwrap();
        assert_eq!(result["success"], true);
    }

    #[tokio::test]
    async fn test_reservation_desk_is_reachable() {
        let response = dispatcher()
            .dispatch(PatternKind::CancelCar, json!({"rentalId": "missing"}))
            .await
            .unwrap();
        assert_eq!(response["statusCode"], 404);
    }

    #[tokio::test]
    async fn test_malformed_batch_is_error() {
        let err = dispatcher()
            .dispatch(PatternKind::SqsToTable, json!({"Records": "nope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, PatternError::SerializationError(_)));
    }
}
