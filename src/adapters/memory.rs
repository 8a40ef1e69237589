//! In-process stand-ins for the managed services, used by the local runner and tests.

use crate::domain::model::{EventEntry, OrderItem, PutEventsOutcome};
use crate::domain::ports::{
    EventPublisher, FunctionInvoker, InventoryService, ItemKey, ItemStore, PaymentGateway,
    Storage,
};
use crate::utils::error::{PatternError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

fn poisoned<T>(_: T) -> PatternError {
    PatternError::storage("in-memory state lock poisoned")
}

#[derive(Debug, Clone, Default)]
pub struct MemoryItemStore {
    tables: Arc<RwLock<HashMap<(String, String), Map<String, Value>>>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self, table: &str) -> Vec<Map<String, Value>> {
        self.tables
            .read()
            .map(|tables| {
                tables
                    .iter()
                    .filter(|((t, _), _)| t == table)
                    .map(|(_, item)| item.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn put_item(
        &self,
        table: &str,
        key: &ItemKey,
        mut item: Map<String, Value>,
    ) -> Result<()> {
        item.insert(key.attribute.clone(), Value::String(key.value.clone()));
        self.tables
            .write()
            .map_err(poisoned)?
            .insert((table.to_string(), key.value.clone()), item);
        Ok(())
    }

    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Map<String, Value>>> {
        Ok(self
            .tables
            .read()
            .map_err(poisoned)?
            .get(&(table.to_string(), key.value.clone()))
            .cloned())
    }

    async fn update_item(
        &self,
        table: &str,
        key: &ItemKey,
        changes: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let item = tables
            .entry((table.to_string(), key.value.clone()))
            .or_insert_with(|| {
                let mut fresh = Map::new();
                fresh.insert(key.attribute.clone(), Value::String(key.value.clone()));
                fresh
            });
        item.extend(changes);
        Ok(item.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryEventBus {
    published: Arc<Mutex<Vec<EventEntry>>>,
    reject: bool,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that accepts the call but reports every entry as failed.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<EventEntry> {
        self.published
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn put_events(&self, entries: Vec<EventEntry>) -> Result<PutEventsOutcome> {
        if self.reject {
            return Ok(PutEventsOutcome {
                failed_entry_count: entries.len(),
                event_ids: vec![None; entries.len()],
            });
        }

        let event_ids = entries
            .iter()
            .map(|_| Some(Uuid::new_v4().to_string()))
            .collect();
        self.published.lock().map_err(poisoned)?.extend(entries);
        Ok(PutEventsOutcome {
            failed_entry_count: 0,
            event_ids,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .map_err(poisoned)?
            .get(path)
            .cloned()
            .ok_or_else(|| PatternError::not_found("Object", path))
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        self.objects
            .write()
            .map_err(poisoned)?
            .insert(path.to_string(), data.to_vec());
        Ok(())
    }
}

pub type LocalFunction = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Registry of in-process functions addressed by name, standing in for Lambda invoke.
#[derive(Clone, Default)]
pub struct LocalInvoker {
    functions: Arc<RwLock<HashMap<String, LocalFunction>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl LocalInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let function: LocalFunction = Arc::new(move |payload| Box::pin(function(payload)));
        if let Ok(mut functions) = self.functions.write() {
            functions.insert(name.into(), function);
        }
    }

    /// Function names in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl FunctionInvoker for LocalInvoker {
    async fn invoke(&self, function: &str, payload: Value) -> Result<Value> {
        let handler = self
            .functions
            .read()
            .map_err(poisoned)?
            .get(function)
            .cloned()
            .ok_or_else(|| PatternError::InvocationError {
                function: function.to_string(),
                message: "Function not found".to_string(),
            })?;
        self.calls.lock().map_err(poisoned)?.push(function.to_string());
        handler(payload).await
    }
}

#[derive(Debug, Clone)]
struct Payment {
    amount: f64,
    refunded: bool,
}

/// Payment gateway that approves everything up to an optional decline threshold.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPayments {
    payments: Arc<Mutex<HashMap<String, Payment>>>,
    decline_above: Option<f64>,
}

impl SimulatedPayments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declining_above(limit: f64) -> Self {
        Self {
            decline_above: Some(limit),
            ..Self::default()
        }
    }

    pub fn is_refunded(&self, payment_id: &str) -> bool {
        self.payments
            .lock()
            .ok()
            .and_then(|payments| payments.get(payment_id).map(|p| p.refunded))
            .unwrap_or(false)
    }

    pub fn charged_total(&self) -> f64 {
        self.payments
            .lock()
            .map(|payments| {
                payments
                    .values()
                    .filter(|p| !p.refunded)
                    .map(|p| p.amount)
                    .sum()
            })
            .unwrap_or(0.0)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPayments {
    async fn charge(&self, order_id: &str, amount: f64) -> Result<String> {
        if matches!(self.decline_above, Some(limit) if amount > limit) {
            return Err(PatternError::validation(format!(
                "Payment declined for order {}",
                order_id
            )));
        }
        let payment_id = format!("pay-{}", Uuid::new_v4().simple());
        self.payments.lock().map_err(poisoned)?.insert(
            payment_id.clone(),
            Payment {
                amount,
                refunded: false,
            },
        );
        Ok(payment_id)
    }

    async fn refund(&self, payment_id: &str) -> Result<()> {
        let mut payments = self.payments.lock().map_err(poisoned)?;
        let payment = payments
            .get_mut(payment_id)
            .ok_or_else(|| PatternError::not_found("Payment", payment_id))?;
        payment.refunded = true;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InventoryState {
    /// `None` means every product is always in stock.
    stock: Option<HashMap<String, u32>>,
    reservations: HashMap<String, Vec<OrderItem>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryInventory {
    state: Arc<Mutex<InventoryState>>,
}

impl MemoryInventory {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_stock<I, S>(stock: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let stock = stock.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            state: Arc::new(Mutex::new(InventoryState {
                stock: Some(stock),
                reservations: HashMap::new(),
            })),
        }
    }

    pub fn available(&self, product_id: &str) -> Option<u32> {
        let state = self.state.lock().ok()?;
        state.stock.as_ref()?.get(product_id).copied()
    }
}

#[async_trait]
impl InventoryService for MemoryInventory {
    async fn check(&self, items: &[OrderItem]) -> Result<bool> {
        let state = self.state.lock().map_err(poisoned)?;
        Ok(match &state.stock {
            None => true,
            Some(stock) => items
                .iter()
                .all(|item| stock.get(&item.product_id).copied().unwrap_or(0) >= item.quantity),
        })
    }

    async fn reserve(&self, order_id: &str, items: &[OrderItem]) -> Result<String> {
        let mut state = self.state.lock().map_err(poisoned)?;
        if let Some(stock) = state.stock.as_mut() {
            for item in items {
                if stock.get(&item.product_id).copied().unwrap_or(0) < item.quantity {
                    return Err(PatternError::validation(format!(
                        "Insufficient inventory for {}",
                        item.product_id
                    )));
                }
            }
            for item in items {
                if let Some(level) = stock.get_mut(&item.product_id) {
                    *level -= item.quantity;
                }
            }
        }
        let reservation_id = format!("res-{}-{}", order_id, Uuid::new_v4().simple());
        state
            .reservations
            .insert(reservation_id.clone(), items.to_vec());
        Ok(reservation_id)
    }

    async fn release(&self, reservation_id: &str) -> Result<()> {
        let mut state = self.state.lock().map_err(poisoned)?;
        let items = state
            .reservations
            .remove(reservation_id)
            .ok_or_else(|| PatternError::not_found("Reservation", reservation_id))?;
        if let Some(stock) = state.stock.as_mut() {
            for item in items {
                *stock.entry(item.product_id).or_insert(0) += item.quantity;
            }
        }
        Ok(())
    }
}
