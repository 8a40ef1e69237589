use crate::domain::model::{EventEntry, OrderItem, PutEventsOutcome};
use crate::domain::settings::{
    ClaimCheckSettings, OrderPolicy, RetryPolicy, SagaFunctions, TableNames, WebhookSettings,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;

/// Object storage (S3 or a local directory).
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub attribute: String,
    pub value: String,
}

impl ItemKey {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }
}

/// Key-value table with a single string partition key.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Replaces the item; the key attribute is written into it.
    async fn put_item(&self, table: &str, key: &ItemKey, item: Map<String, Value>) -> Result<()>;

    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Map<String, Value>>>;

    /// Sets the given attributes, creating the item if absent, and returns the new item.
    async fn update_item(
        &self,
        table: &str,
        key: &ItemKey,
        changes: Map<String, Value>,
    ) -> Result<Map<String, Value>>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn put_events(&self, entries: Vec<EventEntry>) -> Result<PutEventsOutcome>;
}

/// Synchronous request/response invocation of another function.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, function: &str, payload: Value) -> Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
    pub table: String,
    pub id: String,
}

impl DocumentKey {
    pub fn new(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub data: Value,
    /// Starts at 1 and increases with every committed revision.
    pub version: u64,
}

/// A versioned document store that commits a read set and write set atomically.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn read(&self, key: &DocumentKey) -> Result<Option<Document>>;

    /// Applies `writes` (`None` deletes) only if every key in `read_set` is still at the
    /// observed version (`0` meaning absent); otherwise fails with `OccConflict`.
    async fn commit(
        &self,
        read_set: Vec<(DocumentKey, u64)>,
        writes: Vec<(DocumentKey, Option<Value>)>,
    ) -> Result<()>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, order_id: &str, amount: f64) -> Result<String>;
    async fn refund(&self, payment_id: &str) -> Result<()>;
}

#[async_trait]
pub trait InventoryService: Send + Sync {
    async fn check(&self, items: &[OrderItem]) -> Result<bool>;
    async fn reserve(&self, order_id: &str, items: &[OrderItem]) -> Result<String>;
    async fn release(&self, reservation_id: &str) -> Result<()>;
}

pub trait ConfigProvider: Send + Sync {
    fn service_name(&self) -> &str;
    fn tables(&self) -> TableNames;
    fn event_bus_name(&self) -> &str;
    fn saga_functions(&self) -> SagaFunctions;
    fn retry_policy(&self) -> RetryPolicy;
    fn claim_check(&self) -> ClaimCheckSettings;
    fn webhook(&self) -> WebhookSettings;
    fn order_policy(&self) -> OrderPolicy;
}
