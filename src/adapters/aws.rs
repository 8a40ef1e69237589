//! AWS-backed implementations of the ports, used by the `lambda` binary.

use crate::core::batch::parse_number;
use crate::domain::model::{EventEntry, OrderItem, PutEventsOutcome};
use crate::domain::ports::{
    Document, DocumentKey, EventPublisher, FunctionInvoker, InventoryService, ItemKey, ItemStore,
    Ledger, Storage,
};
use crate::utils::error::{PatternError, Result};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{
    AttributeValue, ConditionCheck, Delete, Put, ReturnValue, TransactWriteItem, Update,
};
use aws_sdk_s3::operation::get_object::GetObjectError;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                return Err(match err.into_service_error() {
                    GetObjectError::NoSuchKey(_) => PatternError::not_found("Object", path),
                    other => PatternError::storage(format!(
                        "Failed to read s3://{}/{}: {}",
                        self.bucket,
                        path,
                        DisplayErrorContext(&other)
                    )),
                })
            }
        };

        let data = resp.body.collect().await.map_err(|e| {
            PatternError::storage(format!("Failed to collect S3 data: {}", e))
        })?;
        Ok(data.into_bytes().to_vec())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(data.to_vec().into())
            .send()
            .await
            .map_err(|e| {
                PatternError::storage(format!(
                    "Failed to write s3://{}/{}: {}",
                    self.bucket,
                    path,
                    DisplayErrorContext(&e)
                ))
            })?;
        tracing::debug!("Wrote {} bytes to s3://{}/{}", data.len(), self.bucket, path);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DynamoDB
// ---------------------------------------------------------------------------

pub fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(to_item(map)),
    }
}

pub fn to_item(map: &Map<String, Value>) -> HashMap<String, AttributeValue> {
    map.iter()
        .map(|(name, value)| (name.clone(), to_attribute(value)))
        .collect()
}

pub fn from_attribute(attribute: &AttributeValue) -> Value {
    match attribute {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => parse_number(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::M(map) => Value::Object(from_item(map)),
        AttributeValue::L(items) => Value::Array(items.iter().map(from_attribute).collect()),
        AttributeValue::Ss(values) => values.iter().cloned().map(Value::String).collect(),
        AttributeValue::Ns(values) => values.iter().map(|n| parse_number(n)).collect(),
        AttributeValue::B(blob) => Value::String(STANDARD.encode(blob.as_ref())),
        AttributeValue::Bs(blobs) => blobs
            .iter()
            .map(|blob| Value::String(STANDARD.encode(blob.as_ref())))
            .collect(),
        _ => Value::Null,
    }
}

pub fn from_item(item: &HashMap<String, AttributeValue>) -> Map<String, Value> {
    item.iter()
        .map(|(name, value)| (name.clone(), from_attribute(value)))
        .collect()
}

fn dynamo_error(operation: &str, table: &str, err: impl std::error::Error) -> PatternError {
    PatternError::storage(format!(
        "DynamoDB {} on {} failed: {}",
        operation,
        table,
        DisplayErrorContext(&err)
    ))
}

#[derive(Debug, Clone)]
pub struct DynamoDbStore {
    client: aws_sdk_dynamodb::Client,
}

impl DynamoDbStore {
    pub fn new(client: aws_sdk_dynamodb::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ItemStore for DynamoDbStore {
    async fn put_item(&self, table: &str, key: &ItemKey, mut item: Map<String, Value>) -> Result<()> {
        item.insert(key.attribute.clone(), Value::String(key.value.clone()));
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(to_item(&item)))
            .send()
            .await
            .map_err(|e| dynamo_error("PutItem", table, e))?;
        Ok(())
    }

    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Map<String, Value>>> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .key(&key.attribute, AttributeValue::S(key.value.clone()))
            .send()
            .await
            .map_err(|e| dynamo_error("GetItem", table, e))?;
        Ok(output.item().map(from_item))
    }

    async fn update_item(
        &self,
        table: &str,
        key: &ItemKey,
        changes: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        if changes.is_empty() {
            return Ok(self.get_item(table, key).await?.unwrap_or_default());
        }

        let mut names = HashMap::new();
        let mut values = HashMap::new();
        let mut assignments = Vec::with_capacity(changes.len());
        for (index, (name, value)) in changes.iter().enumerate() {
            names.insert(format!("#a{}", index), name.clone());
            values.insert(format!(":v{}", index), to_attribute(value));
            assignments.push(format!("#a{} = :v{}", index, index));
        }

        let output = self
            .client
            .update_item()
            .table_name(table)
            .key(&key.attribute, AttributeValue::S(key.value.clone()))
            .update_expression(format!("SET {}", assignments.join(", ")))
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values(Some(values))
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(|e| dynamo_error("UpdateItem", table, e))?;
        Ok(output.attributes().map(from_item).unwrap_or_default())
    }
}

const PK: &str = "pk";
const VERSION: &str = "version";
const DOCUMENT: &str = "document";

/// Ledger over DynamoDB tables shaped `{pk, version, document}`.
///
/// A commit is one `TransactWriteItems` call: every write and every read-only
/// key carries a condition on the version observed by the transaction.
#[derive(Debug, Clone)]
pub struct DynamoDbLedger {
    client: aws_sdk_dynamodb::Client,
}

impl DynamoDbLedger {
    pub fn new(client: aws_sdk_dynamodb::Client) -> Self {
        Self { client }
    }
}

type ExpressionParts = (
    Option<String>,
    Option<HashMap<String, String>>,
    HashMap<String, AttributeValue>,
);

/// Condition expression, names and values for "still at `observed`".
fn version_condition(observed: Option<u64>) -> ExpressionParts {
    match observed {
        None => (None, None, HashMap::new()),
        Some(0) => (
            Some(format!("attribute_not_exists({})", PK)),
            None,
            HashMap::new(),
        ),
        Some(version) => (
            Some(format!("#{} = :expected", VERSION)),
            Some(HashMap::from([(format!("#{}", VERSION), VERSION.to_string())])),
            HashMap::from([(":expected".to_string(), AttributeValue::N(version.to_string()))]),
        ),
    }
}

fn build_error(err: impl std::fmt::Display) -> PatternError {
    PatternError::storage(format!("Invalid transaction item: {}", err))
}

#[async_trait]
impl Ledger for DynamoDbLedger {
    async fn read(&self, key: &DocumentKey) -> Result<Option<Document>> {
        let output = self
            .client
            .get_item()
            .table_name(&key.table)
            .key(PK, AttributeValue::S(key.id.clone()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| dynamo_error("GetItem", &key.table, e))?;

        let Some(item) = output.item() else {
            return Ok(None);
        };
        let version = match item.get(VERSION) {
            Some(AttributeValue::N(n)) => n.parse().unwrap_or(0),
            _ => 0,
        };
        let data = match item.get(DOCUMENT) {
            Some(AttributeValue::S(raw)) => serde_json::from_str(raw)?,
            _ => Value::Null,
        };
        Ok(Some(Document { data, version }))
    }

    async fn commit(
        &self,
        read_set: Vec<(DocumentKey, u64)>,
        writes: Vec<(DocumentKey, Option<Value>)>,
    ) -> Result<()> {
        let observed: HashMap<DocumentKey, u64> = read_set.into_iter().collect();
        let mut items = Vec::with_capacity(observed.len() + writes.len());

        for (key, data) in &writes {
            let (condition, names, mut values) = version_condition(observed.get(key).copied());
            let item = match data {
                Some(data) => {
                    values.insert(":doc".to_string(), AttributeValue::S(data.to_string()));
                    values.insert(":one".to_string(), AttributeValue::N("1".to_string()));
                    let update = Update::builder()
                        .table_name(&key.table)
                        .key(PK, AttributeValue::S(key.id.clone()))
                        .update_expression(format!("SET #{0} = :doc ADD #{1} :one", DOCUMENT, VERSION))
                        .set_condition_expression(condition)
                        .expression_attribute_names(format!("#{}", DOCUMENT), DOCUMENT)
                        .expression_attribute_names(format!("#{}", VERSION), VERSION)
                        .set_expression_attribute_values(Some(values))
                        .build()
                        .map_err(build_error)?;
                    TransactWriteItem::builder().update(update).build()
                }
                None => {
                    let delete = Delete::builder()
                        .table_name(&key.table)
                        .key(PK, AttributeValue::S(key.id.clone()))
                        .set_condition_expression(condition)
                        .set_expression_attribute_names(names)
                        .set_expression_attribute_values((!values.is_empty()).then_some(values))
                        .build()
                        .map_err(build_error)?;
                    TransactWriteItem::builder().delete(delete).build()
                }
            };
            items.push(item);
        }

        let written: Vec<&DocumentKey> = writes.iter().map(|(key, _)| key).collect();
        for (key, version) in &observed {
            if written.contains(&key) {
                continue;
            }
            let (condition, names, values) = version_condition(Some(*version));
            let check = ConditionCheck::builder()
                .table_name(&key.table)
                .key(PK, AttributeValue::S(key.id.clone()))
                .set_condition_expression(condition)
                .set_expression_attribute_names(names)
                .set_expression_attribute_values((!values.is_empty()).then_some(values))
                .build()
                .map_err(build_error)?;
            items.push(TransactWriteItem::builder().condition_check(check).build());
        }

        let conflict_key = writes
            .first()
            .map(|(key, _)| key.to_string())
            .unwrap_or_default();
        match self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => match err.into_service_error() {
                TransactWriteItemsError::TransactionCanceledException(_)
                | TransactWriteItemsError::TransactionConflictException(_) => {
                    Err(PatternError::OccConflict {
                        document: conflict_key,
                    })
                }
                other => Err(dynamo_error("TransactWriteItems", &conflict_key, other)),
            },
        }
    }
}

const PRODUCT_ID: &str = "productId";
const STOCK: &str = "stock";
const RESERVED_ITEMS: &str = "items";
const RESERVATION_PREFIX: &str = "reservation#";

/// Warehouse stock over one DynamoDB table keyed by `productId`.
///
/// Product rows carry a numeric `stock`. A reservation is stored in the same
/// table under `reservation#<id>` so releasing it knows what to put back.
#[derive(Debug, Clone)]
pub struct DynamoDbInventory {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoDbInventory {
    pub fn new(client: aws_sdk_dynamodb::Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    async fn stock_of(&self, product_id: &str) -> Result<u64> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(PRODUCT_ID, AttributeValue::S(product_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| dynamo_error("GetItem", &self.table, e))?;
        Ok(match output.item().and_then(|item| item.get(STOCK)) {
            Some(AttributeValue::N(n)) => n.parse().unwrap_or(0),
            _ => 0,
        })
    }

    async fn transact(
        &self,
        items: Vec<TransactWriteItem>,
    ) -> std::result::Result<(), TransactWriteItemsError> {
        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map(|_| ())
            .map_err(|err| err.into_service_error())
    }
}

/// Total quantity per product; an order may list the same product twice.
fn demand(items: &[OrderItem]) -> BTreeMap<&str, u64> {
    let mut totals = BTreeMap::new();
    for item in items {
        *totals.entry(item.product_id.as_str()).or_insert(0) += u64::from(item.quantity);
    }
    totals
}

fn reservation_key(reservation_id: &str) -> AttributeValue {
    AttributeValue::S(format!("{}{}", RESERVATION_PREFIX, reservation_id))
}

/// Takes `quantity` off a product, failing the transaction when stock is short.
fn take_stock(table: &str, product_id: &str, quantity: u64) -> Result<TransactWriteItem> {
    let update = Update::builder()
        .table_name(table)
        .key(PRODUCT_ID, AttributeValue::S(product_id.to_string()))
        .update_expression(format!("SET #{0} = #{0} - :qty", STOCK))
        .condition_expression(format!("#{} >= :qty", STOCK))
        .expression_attribute_names(format!("#{}", STOCK), STOCK)
        .expression_attribute_values(":qty", AttributeValue::N(quantity.to_string()))
        .build()
        .map_err(build_error)?;
    Ok(TransactWriteItem::builder().update(update).build())
}

fn return_stock(table: &str, product_id: &str, quantity: u64) -> Result<TransactWriteItem> {
    let update = Update::builder()
        .table_name(table)
        .key(PRODUCT_ID, AttributeValue::S(product_id.to_string()))
        .update_expression(format!("ADD #{} :qty", STOCK))
        .expression_attribute_names(format!("#{}", STOCK), STOCK)
        .expression_attribute_values(":qty", AttributeValue::N(quantity.to_string()))
        .build()
        .map_err(build_error)?;
    Ok(TransactWriteItem::builder().update(update).build())
}

#[async_trait]
impl InventoryService for DynamoDbInventory {
    async fn check(&self, items: &[OrderItem]) -> Result<bool> {
        for (product_id, quantity) in demand(items) {
            if self.stock_of(product_id).await? < quantity {
                tracing::debug!("{} has less than {} in stock", product_id, quantity);
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn reserve(&self, order_id: &str, items: &[OrderItem]) -> Result<String> {
        let reservation_id = format!("res-{}-{}", order_id, Uuid::new_v4().simple());

        let mut writes = demand(items)
            .into_iter()
            .map(|(product_id, quantity)| take_stock(&self.table, product_id, quantity))
            .collect::<Result<Vec<_>>>()?;
        let record = Put::builder()
            .table_name(&self.table)
            .item(PRODUCT_ID, reservation_key(&reservation_id))
            .item(RESERVED_ITEMS, to_attribute(&serde_json::to_value(items)?))
            .item("orderId", AttributeValue::S(order_id.to_string()))
            .condition_expression(format!("attribute_not_exists({})", PRODUCT_ID))
            .build()
            .map_err(build_error)?;
        writes.push(TransactWriteItem::builder().put(record).build());

        match self.transact(writes).await {
            Ok(()) => {
                tracing::debug!("Reserved stock for {} as {}", order_id, reservation_id);
                Ok(reservation_id)
            }
            Err(TransactWriteItemsError::TransactionCanceledException(_)) => Err(
                PatternError::validation(format!("Insufficient inventory for order {}", order_id)),
            ),
            Err(other) => Err(dynamo_error("TransactWriteItems", &self.table, other)),
        }
    }

    async fn release(&self, reservation_id: &str) -> Result<()> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key(PRODUCT_ID, reservation_key(reservation_id))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| dynamo_error("GetItem", &self.table, e))?;
        let reserved: Vec<OrderItem> = match output.item().and_then(|item| item.get(RESERVED_ITEMS)) {
            Some(attribute) => serde_json::from_value(from_attribute(attribute))?,
            None => return Err(PatternError::not_found("Reservation", reservation_id)),
        };

        let mut writes = demand(&reserved)
            .into_iter()
            .map(|(product_id, quantity)| return_stock(&self.table, product_id, quantity))
            .collect::<Result<Vec<_>>>()?;
        // Only the caller that deletes the record gets to put the stock back.
        let delete = Delete::builder()
            .table_name(&self.table)
            .key(PRODUCT_ID, reservation_key(reservation_id))
            .condition_expression(format!("attribute_exists({})", PRODUCT_ID))
            .build()
            .map_err(build_error)?;
        writes.push(TransactWriteItem::builder().delete(delete).build());

        match self.transact(writes).await {
            Ok(()) => Ok(()),
            Err(TransactWriteItemsError::TransactionCanceledException(_)) => {
                Err(PatternError::not_found("Reservation", reservation_id))
            }
            Err(other) => Err(dynamo_error("TransactWriteItems", &self.table, other)),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBridge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EventBridgePublisher {
    client: aws_sdk_eventbridge::Client,
}

impl EventBridgePublisher {
    pub fn new(client: aws_sdk_eventbridge::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventPublisher for EventBridgePublisher {
    async fn put_events(&self, entries: Vec<EventEntry>) -> Result<PutEventsOutcome> {
        let requests = entries
            .into_iter()
            .map(|entry| {
                aws_sdk_eventbridge::types::PutEventsRequestEntry::builder()
                    .source(entry.source)
                    .detail_type(entry.detail_type)
                    .detail(entry.detail)
                    .event_bus_name(entry.event_bus_name)
                    .build()
            })
            .collect();

        let output = self
            .client
            .put_events()
            .set_entries(Some(requests))
            .send()
            .await
            .map_err(|e| PatternError::PublishError {
                message: format!(
                    "PutEvents failed: {}",
                    aws_sdk_eventbridge::error::DisplayErrorContext(&e)
                ),
            })?;

        for failed in output.entries().iter().filter(|e| e.error_code().is_some()) {
            tracing::warn!(
                "Entry rejected: {} {}",
                failed.error_code().unwrap_or_default(),
                failed.error_message().unwrap_or_default()
            );
        }

        Ok(PutEventsOutcome {
            failed_entry_count: usize::try_from(output.failed_entry_count()).unwrap_or(0),
            event_ids: output
                .entries()
                .iter()
                .map(|e| e.event_id().map(str::to_string))
                .collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// Lambda
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LambdaInvoker {
    client: aws_sdk_lambda::Client,
}

impl LambdaInvoker {
    pub fn new(client: aws_sdk_lambda::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FunctionInvoker for LambdaInvoker {
    async fn invoke(&self, function: &str, payload: Value) -> Result<Value> {
        let body = serde_json::to_vec(&payload)?;
        let output = self
            .client
            .invoke()
            .function_name(function)
            .payload(aws_sdk_lambda::primitives::Blob::new(body))
            .send()
            .await
            .map_err(|e| PatternError::InvocationError {
                function: function.to_string(),
                message: aws_sdk_lambda::error::DisplayErrorContext(&e).to_string(),
            })?;

        let bytes = output.payload().map(|blob| blob.as_ref()).unwrap_or_default();
        if let Some(kind) = output.function_error() {
            return Err(PatternError::InvocationError {
                function: function.to_string(),
                message: format!("{}: {}", kind, String::from_utf8_lossy(bytes)),
            });
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}
