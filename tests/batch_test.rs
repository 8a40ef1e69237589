use anyhow::Result;
use serde_json::{json, Value};
use serverless_patterns::adapters::memory::{
    LocalInvoker, MemoryEventBus, MemoryInventory, MemoryItemStore, MemoryStorage,
    SimulatedPayments,
};
use serverless_patterns::core::batch::{SqsToTable, StreamForwarder};
use serverless_patterns::core::ledger::InMemoryLedger;
use serverless_patterns::domain::model::{BatchResponse, DynamoDbStreamEvent, SqsEvent};
use serverless_patterns::{Components, Dispatcher, PatternKind, TomlConfig};
use std::sync::Arc;

fn sqs_event(arn: &str, messages: &[(&str, &str)]) -> Result<SqsEvent> {
    let records: Vec<Value> = messages
        .iter()
        .map(|(id, body)| {
            json!({
                "messageId": id,
                "receiptHandle": format!("handle-{}", id),
                "body": body,
                "attributes": {"ApproximateReceiveCount": "1"},
                "eventSourceARN": arn,
            })
        })
        .collect();
    Ok(serde_json::from_value(json!({ "Records": records }))?)
}

fn stream_event() -> Result<DynamoDbStreamEvent> {
    Ok(serde_json::from_value(json!({
        "Records": [
            {
                "eventID": "e-1",
                "eventName": "INSERT",
                "dynamodb": {
                    "Keys": {"orderId": {"S": "o-1"}},
                    "NewImage": {
                        "orderId": {"S": "o-1"},
                        "total": {"N": "42.5"},
                        "tags": {"SS": ["new", "web"]},
                        "express": {"BOOL": true}
                    },
                    "SequenceNumber": "100"
                }
            },
            {
                "eventID": "e-2",
                "eventName": "MODIFY",
                "dynamodb": {
                    "Keys": {"orderId": {"S": "o-1"}},
                    "OldImage": {"status": {"S": "new"}},
                    "NewImage": {"status": {"S": "shipped"}, "items": {"L": [{"N": "3"}]}},
                    "SequenceNumber": "101"
                }
            },
            {
                "eventID": "e-3",
                "eventName": "REMOVE",
                "dynamodb": {
                    "Keys": {"orderId": {"S": "o-1"}},
                    "OldImage": {"status": {"S": "shipped"}},
                    "SequenceNumber": "102"
                }
            }
        ]
    }))?)
}

#[tokio::test]
async fn test_standard_queue_reports_only_bad_messages() -> Result<()> {
    let store = Arc::new(MemoryItemStore::new());
    let handler = SqsToTable::new(store.clone(), "events");
    let event = sqs_event(
        "arn:aws:sqs:us-east-1:123456789012:events",
        &[
            ("m-1", r#"{"eventId": "evt-1", "kind": "signup"}"#),
            ("m-2", "not json"),
            ("m-3", r#"{"kind": "login"}"#),
            ("m-4", "[1, 2, 3]"),
        ],
    )?;

    let response = handler.handle(event).await;

    assert_eq!(response.failed_identifiers(), vec!["m-2", "m-4"]);
    let mut ids: Vec<String> = store
        .items("events")
        .into_iter()
        .map(|item| item["eventId"].as_str().unwrap_or_default().to_string())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["evt-1", "m-3"]);
    assert!(store
        .items("events")
        .iter()
        .all(|item| item.contains_key("receivedAt")));
    Ok(())
}

#[tokio::test]
async fn test_fifo_queue_stops_at_first_failure() -> Result<()> {
    let store = Arc::new(MemoryItemStore::new());
    let handler = SqsToTable::new(store.clone(), "events");
    let event = sqs_event(
        "arn:aws:sqs:us-east-1:123456789012:events.fifo",
        &[
            ("m-1", r#"{"eventId": "a"}"#),
            ("m-2", "broken"),
            ("m-3", r#"{"eventId": "c"}"#),
        ],
    )?;

    let response = handler.handle(event).await;

    assert_eq!(response.failed_identifiers(), vec!["m-2", "m-3"]);
    assert_eq!(store.items("events").len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_empty_batch_succeeds() {
    let handler = SqsToTable::new(Arc::new(MemoryItemStore::new()), "events");
    let response = handler.handle(SqsEvent::default()).await;
    assert_eq!(response, BatchResponse::default());
}

#[tokio::test]
async fn test_stream_changes_are_published_in_order() -> Result<()> {
    let bus = Arc::new(MemoryEventBus::new());
    let forwarder = StreamForwarder::new(bus.clone(), "orders-bus", "orders.stream");

    let response = forwarder.handle(stream_event()?).await;

    assert!(response.batch_item_failures.is_empty());
    let published = bus.published();
    let detail_types: Vec<&str> = published.iter().map(|e| e.detail_type.as_str()).collect();
    assert_eq!(detail_types, vec!["INSERT", "MODIFY", "REMOVE"]);
    assert!(published
        .iter()
        .all(|e| e.source == "orders.stream" && e.event_bus_name == "orders-bus"));

    let insert: Value = serde_json::from_str(&published[0].detail)?;
    assert_eq!(insert["keys"], json!({"orderId": "o-1"}));
    assert_eq!(insert["newImage"]["total"], 42.5);
    assert_eq!(insert["newImage"]["tags"], json!(["new", "web"]));
    assert_eq!(insert["newImage"]["express"], true);
    assert_eq!(insert["oldImage"], Value::Null);
    assert_eq!(insert["sequenceNumber"], "100");

    let modify: Value = serde_json::from_str(&published[1].detail)?;
    assert_eq!(modify["oldImage"]["status"], "new");
    assert_eq!(modify["newImage"]["items"], json!([3]));

    let remove: Value = serde_json::from_str(&published[2].detail)?;
    assert_eq!(remove["newImage"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn test_rejected_stream_event_fails_rest_of_batch() -> Result<()> {
    let bus = Arc::new(MemoryEventBus::rejecting());
    let forwarder = StreamForwarder::new(bus, "default", "orders.stream");

    let response = forwarder.handle(stream_event()?).await;

    assert_eq!(response.failed_identifiers(), vec!["100", "101", "102"]);
    Ok(())
}

#[tokio::test]
async fn test_dispatcher_routes_raw_queue_event() -> Result<()> {
    let store = Arc::new(MemoryItemStore::new());
    let components = Components {
        store: store.clone(),
        publisher: Arc::new(MemoryEventBus::new()),
        storage: Arc::new(MemoryStorage::new()),
        invoker: Arc::new(LocalInvoker::new()),
        ledger: Arc::new(InMemoryLedger::new()),
        payments: Arc::new(SimulatedPayments::new()),
        inventory: Arc::new(MemoryInventory::unlimited()),
    };
    let dispatcher = Dispatcher::new(Arc::new(TomlConfig::default()), components);

    let response = dispatcher
        .dispatch(
            PatternKind::SqsToTable,
            json!({
                "Records": [
                    {"messageId": "m-1", "body": "{\"eventId\": \"x\"}"},
                    {"messageId": "m-2", "body": "oops"}
                ]
            }),
        )
        .await?;

    assert_eq!(
        response,
        json!({"batchItemFailures": [{"itemIdentifier": "m-2"}]})
    );
    assert_eq!(store.items("events").len(), 1);
    Ok(())
}
