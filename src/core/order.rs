//! Multi-step order processing built on the saga runner.
//!
//! Each stage records its progress on the order item (`status`, `updatedAt`).
//! Payment and inventory reservation are undone if a later stage fails.
//! Credit scores and bin locations are derived from a hash of the customer and
//! product ids, so reruns of the same order take the same path.

use crate::core::saga::{Saga, SagaStep};
use crate::domain::model::{Order, OrderStatus};
use crate::domain::ports::{InventoryService, ItemKey, ItemStore, PaymentGateway};
use crate::domain::settings::OrderPolicy;
use crate::utils::error::{PatternError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const EXPRESS_CARRIER: &str = "ExpressShip";
pub const STANDARD_CARRIER: &str = "StandardShip";
pub const LABEL_BASE_URL: &str = "https://shipping.example.com/labels";
pub const DEFAULT_EMAIL: &str = "customer@example.com";
pub const DEFAULT_PHONE: &str = "+1234567890";
pub const MIN_CREDIT_SCORE: u32 = 600;
const POUNDS_PER_UNIT: u64 = 2;
const PACKAGE_DIMENSIONS: &str = "12x10x8 inches";
const DELIVERY_DAYS: i64 = 3;

/// State threaded through the workflow stages.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderContext {
    pub order: Order,
    pub payment_id: Option<String>,
    pub reservation_id: Option<String>,
    pub credit_check: Option<Value>,
    pub invoice: Option<Value>,
    pub picking: Option<Value>,
    pub quality_check: Option<Value>,
    pub packaging: Option<Value>,
    pub shipping_label: Option<Value>,
    pub shipment: Option<Value>,
    pub notifications: Option<Value>,
    pub loyalty_points: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Validate,
    CheckInventory,
    ProcessPayment,
    ReserveInventory,
    FraudCheck,
    CreditCheck,
    GenerateInvoice,
    AwaitWarehouse,
    PickItems,
    QualityCheck,
    PackageOrder,
    ShippingLabel,
    AwaitPickup,
    Ship,
    Notify,
    LoyaltyPoints,
    Complete,
}

impl Stage {
    const ALL: [Stage; 17] = [
        Stage::Validate,
        Stage::CheckInventory,
        Stage::ProcessPayment,
        Stage::ReserveInventory,
        Stage::FraudCheck,
        Stage::CreditCheck,
        Stage::GenerateInvoice,
        Stage::AwaitWarehouse,
        Stage::PickItems,
        Stage::QualityCheck,
        Stage::PackageOrder,
        Stage::ShippingLabel,
        Stage::AwaitPickup,
        Stage::Ship,
        Stage::Notify,
        Stage::LoyaltyPoints,
        Stage::Complete,
    ];

    fn name(&self) -> &'static str {
        match self {
            Stage::Validate => "validate-order",
            Stage::CheckInventory => "check-inventory",
            Stage::ProcessPayment => "process-payment",
            Stage::ReserveInventory => "reserve-inventory",
            Stage::FraudCheck => "fraud-check",
            Stage::CreditCheck => "credit-check",
            Stage::GenerateInvoice => "generate-invoice",
            Stage::AwaitWarehouse => "wait-for-warehouse",
            Stage::PickItems => "pick-items",
            Stage::QualityCheck => "quality-check",
            Stage::PackageOrder => "package-order",
            Stage::ShippingLabel => "generate-shipping-label",
            Stage::AwaitPickup => "wait-for-pickup",
            Stage::Ship => "ship-order",
            Stage::Notify => "send-notifications",
            Stage::LoyaltyPoints => "update-loyalty-points",
            Stage::Complete => "complete-order",
        }
    }
}

struct Services {
    store: Arc<dyn ItemStore>,
    payments: Arc<dyn PaymentGateway>,
    inventory: Arc<dyn InventoryService>,
    table: String,
    policy: OrderPolicy,
}

impl Services {
    async fn record(
        &self,
        order_id: &str,
        status: Option<OrderStatus>,
        mut changes: Map<String, Value>,
    ) -> Result<()> {
        if let Some(status) = status {
            changes.insert("status".to_string(), json!(status.as_str()));
        }
        changes.insert("updatedAt".to_string(), json!(Utc::now().to_rfc3339()));
        self.store
            .update_item(&self.table, &ItemKey::new("orderId", order_id), changes)
            .await?;
        Ok(())
    }

    /// Parks the order in `status` for `seconds`; zero only records the status.
    async fn wait(&self, order_id: &str, status: OrderStatus, seconds: u64) -> Result<Value> {
        self.record(order_id, Some(status), Map::new()).await?;
        if seconds > 0 {
            tracing::info!("⏳ Order {} {} for {}s", order_id, status.as_str(), seconds);
            tokio::time::sleep(Duration::from_secs(seconds)).await;
        }
        Ok(json!({ "status": status.as_str(), "waitedSeconds": seconds }))
    }
}

struct OrderStep {
    stage: Stage,
    services: Arc<Services>,
}

#[async_trait]
impl SagaStep<OrderContext> for OrderStep {
    fn name(&self) -> &str {
        self.stage.name()
    }

    async fn execute(&self, ctx: &mut OrderContext) -> Result<Value> {
        let svc = &self.services;
        let order_id = ctx.order.order_id.clone();

        match self.stage {
            Stage::Validate => {
                validate(&mut ctx.order)?;
                let mut item = match serde_json::to_value(&ctx.order)? {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                let now = Utc::now().to_rfc3339();
                item.insert("status".into(), json!(OrderStatus::Validated.as_str()));
                item.insert("validatedAt".into(), json!(now));
                item.insert("updatedAt".into(), json!(now));
                svc.store
                    .put_item(&svc.table, &ItemKey::new("orderId", order_id.as_str()), item)
                    .await?;
                Ok(json!({ "orderId": order_id, "total": ctx.order.total }))
            }
            Stage::CheckInventory => {
                if !svc.inventory.check(&ctx.order.items).await? {
                    return Err(PatternError::validation("Insufficient inventory"));
                }
                svc.record(&order_id, Some(OrderStatus::InventoryChecked), Map::new())
                    .await?;
                Ok(json!({ "available": true }))
            }
            Stage::ProcessPayment => {
                let payment_id = svc.payments.charge(&order_id, ctx.order.total).await?;
                ctx.payment_id = Some(payment_id.clone());
                svc.record(
                    &order_id,
                    Some(OrderStatus::PaymentProcessed),
                    single("paymentId", json!(payment_id)),
                )
                .await?;
                Ok(json!({ "paymentId": payment_id, "amount": ctx.order.total }))
            }
            Stage::ReserveInventory => {
                let reservation_id = svc.inventory.reserve(&order_id, &ctx.order.items).await?;
                ctx.reservation_id = Some(reservation_id.clone());
                svc.record(
                    &order_id,
                    Some(OrderStatus::InventoryReserved),
                    single("reservationId", json!(reservation_id)),
                )
                .await?;
                Ok(json!({ "reservationId": reservation_id }))
            }
            Stage::FraudCheck => {
                if ctx.order.total > svc.policy.fraud_limit {
                    return Err(PatternError::validation(format!(
                        "Order flagged as fraudulent: total {:.2} exceeds {:.2}",
                        ctx.order.total, svc.policy.fraud_limit
                    )));
                }
                svc.record(&order_id, Some(OrderStatus::FraudChecked), Map::new())
                    .await?;
                Ok(json!({ "status": "passed" }))
            }
            Stage::CreditCheck => {
                let total = ctx.order.total;
                if total <= svc.policy.credit_check_threshold {
                    let skipped = json!({ "skipped": true, "reason": "Order value below threshold" });
                    ctx.credit_check = Some(skipped.clone());
                    return Ok(skipped);
                }
                let customer_id = ctx.order.customer_id.clone().unwrap_or_default();
                let score = credit_score(&customer_id);
                if score < MIN_CREDIT_SCORE {
                    return Err(PatternError::validation(format!(
                        "Insufficient credit score: {} is below {}",
                        score, MIN_CREDIT_SCORE
                    )));
                }
                let approved = json!({
                    "creditScore": score,
                    "approved": true,
                    "checkedAt": Utc::now().to_rfc3339(),
                });
                ctx.credit_check = Some(approved.clone());
                svc.record(&order_id, None, single("creditScore", json!(score)))
                    .await?;
                Ok(approved)
            }
            Stage::GenerateInvoice => {
                let subtotal = ctx.order.total;
                let tax = round_cents(subtotal * svc.policy.tax_rate);
                let invoice = json!({
                    "invoiceId": format!("INV-{}", order_id),
                    "orderId": order_id,
                    "customerId": ctx.order.customer_id,
                    "items": ctx.order.items,
                    "subtotal": subtotal,
                    "tax": tax,
                    "total": round_cents(subtotal + tax),
                    "generatedAt": Utc::now().to_rfc3339(),
                });
                ctx.invoice = Some(invoice.clone());
                svc.record(
                    &order_id,
                    Some(OrderStatus::InvoiceGenerated),
                    single("invoiceId", invoice["invoiceId"].clone()),
                )
                .await?;
                Ok(invoice)
            }
            Stage::AwaitWarehouse => {
                svc.wait(&order_id, OrderStatus::AwaitingWarehouse, svc.policy.warehouse_wait_secs)
                    .await
            }
            Stage::PickItems => {
                let picked_at = Utc::now().to_rfc3339();
                let items: Vec<Value> = ctx
                    .order
                    .items
                    .iter()
                    .map(|item| {
                        json!({
                            "productId": item.product_id,
                            "quantity": item.quantity,
                            "price": item.price,
                            "binLocation": bin_location(&item.product_id),
                            "pickedAt": picked_at,
                        })
                    })
                    .collect();
                let picking = json!({ "items": items, "completedAt": picked_at });
                ctx.picking = Some(picking.clone());
                svc.record(&order_id, Some(OrderStatus::ItemsPicked), Map::new())
                    .await?;
                Ok(picking)
            }
            Stage::QualityCheck => {
                let picked = ctx
                    .picking
                    .as_ref()
                    .and_then(|picking| picking["items"].as_array())
                    .map_or(0, Vec::len);
                if picked != ctx.order.items.len() {
                    return Err(PatternError::validation(format!(
                        "Quality check failed - {} of {} lines picked",
                        picked,
                        ctx.order.items.len()
                    )));
                }
                let result = json!({
                    "passed": true,
                    "inspectedLines": picked,
                    "checkedAt": Utc::now().to_rfc3339(),
                });
                ctx.quality_check = Some(result.clone());
                svc.record(&order_id, Some(OrderStatus::QualityChecked), Map::new())
                    .await?;
                Ok(result)
            }
            Stage::PackageOrder => {
                let packaging = json!({
                    "packageId": format!("PKG-{}", order_id),
                    "weight": format!("{} lbs", package_weight(&ctx.order)),
                    "dimensions": PACKAGE_DIMENSIONS,
                    "packagedAt": Utc::now().to_rfc3339(),
                });
                ctx.packaging = Some(packaging.clone());
                svc.record(
                    &order_id,
                    Some(OrderStatus::Packaged),
                    single("packageId", packaging["packageId"].clone()),
                )
                .await?;
                Ok(packaging)
            }
            Stage::ShippingLabel => {
                let carrier = if ctx.order.total > svc.policy.express_threshold {
                    EXPRESS_CARRIER
                } else {
                    STANDARD_CARRIER
                };
                let tracking_number = format!(
                    "TRK-{}",
                    Uuid::new_v4().simple().to_string()[..10].to_uppercase()
                );
                let label = json!({
                    "trackingNumber": tracking_number,
                    "carrier": carrier,
                    "labelUrl": format!("{}/{}", LABEL_BASE_URL, tracking_number),
                    "generatedAt": Utc::now().to_rfc3339(),
                });
                ctx.shipping_label = Some(label.clone());
                let mut changes = single("trackingNumber", json!(tracking_number));
                changes.insert("carrier".to_string(), json!(carrier));
                svc.record(&order_id, None, changes).await?;
                Ok(label)
            }
            Stage::AwaitPickup => {
                svc.wait(&order_id, OrderStatus::AwaitingPickup, svc.policy.pickup_wait_secs)
                    .await
            }
            Stage::Ship => {
                let now = Utc::now();
                let mut shipment = match ctx.shipping_label.clone() {
                    Some(Value::Object(label)) => label,
                    _ => return Err(PatternError::validation("No shipping label for order")),
                };
                shipment.insert(
                    "estimatedDelivery".to_string(),
                    json!((now + chrono::Duration::days(DELIVERY_DAYS)).to_rfc3339()),
                );
                shipment.insert("shippedAt".to_string(), json!(now.to_rfc3339()));
                let shipment = Value::Object(shipment);
                ctx.shipment = Some(shipment.clone());
                svc.record(
                    &order_id,
                    Some(OrderStatus::Shipped),
                    single("shippedAt", json!(now.to_rfc3339())),
                )
                .await?;
                Ok(shipment)
            }
            Stage::Notify => {
                let tracking_number = ctx
                    .shipment
                    .as_ref()
                    .and_then(|shipment| shipment["trackingNumber"].as_str())
                    .unwrap_or_default();
                let sent_at = Utc::now().to_rfc3339();
                let notifications = json!({
                    "email": {
                        "type": "email",
                        "recipient": ctx.order.customer_email.as_deref().unwrap_or(DEFAULT_EMAIL),
                        "subject": format!("Order {} Shipped - Tracking: {}", order_id, tracking_number),
                        "sentAt": sent_at,
                    },
                    "sms": {
                        "type": "sms",
                        "recipient": ctx.order.customer_phone.as_deref().unwrap_or(DEFAULT_PHONE),
                        "message": format!("Your order {} has shipped! Track: {}", order_id, tracking_number),
                        "sentAt": sent_at,
                    },
                });
                tracing::debug!("Notified customer of order {}", order_id);
                ctx.notifications = Some(notifications.clone());
                Ok(notifications)
            }
            Stage::LoyaltyPoints => {
                let points = (ctx.order.total * svc.policy.loyalty_rate).floor().max(0.0) as u64;
                ctx.loyalty_points = Some(points);
                svc.record(&order_id, None, single("loyaltyPoints", json!(points)))
                    .await?;
                Ok(json!({ "customerId": ctx.order.customer_id, "pointsEarned": points }))
            }
            Stage::Complete => {
                svc.record(
                    &order_id,
                    Some(OrderStatus::Completed),
                    single("completedAt", json!(Utc::now().to_rfc3339())),
                )
                .await?;
                Ok(json!({ "status": OrderStatus::Completed.as_str() }))
            }
        }
    }

    fn has_compensation(&self) -> bool {
        matches!(self.stage, Stage::ProcessPayment | Stage::ReserveInventory)
    }

    async fn compensate(&self, _ctx: &OrderContext, output: &Value) -> Result<()> {
        match self.stage {
            Stage::ProcessPayment => {
                let payment_id = output["paymentId"].as_str().unwrap_or_default();
                tracing::info!("Refunding payment {}", payment_id);
                self.services.payments.refund(payment_id).await
            }
            Stage::ReserveInventory => {
                let reservation_id = output["reservationId"].as_str().unwrap_or_default();
                tracing::info!("Releasing reservation {}", reservation_id);
                self.services.inventory.release(reservation_id).await
            }
            _ => Ok(()),
        }
    }
}

fn single(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

fn hash_seed(text: &str) -> u32 {
    let digest = Sha256::digest(text.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Bureau-style score in `500..800`, stable per customer.
pub fn credit_score(customer_id: &str) -> u32 {
    500 + hash_seed(customer_id) % 300
}

fn bin_location(product_id: &str) -> String {
    format!("BIN-{:03}", hash_seed(product_id) % 1000)
}

/// Shipping weight in pounds.
pub fn package_weight(order: &Order) -> u64 {
    order
        .items
        .iter()
        .map(|item| u64::from(item.quantity) * POUNDS_PER_UNIT)
        .sum()
}

/// Checks the order and recomputes its total from the line items.
fn validate(order: &mut Order) -> Result<()> {
    if order.items.is_empty() {
        return Err(PatternError::validation("Order must contain at least one item"));
    }
    if order.customer_id.as_deref().map_or(true, str::is_empty) {
        return Err(PatternError::validation("Customer ID is required"));
    }
    if let Some(item) = order
        .items
        .iter()
        .find(|item| item.quantity == 0 || item.price < 0.0)
    {
        return Err(PatternError::validation(format!(
            "Invalid quantity or price for {}",
            item.product_id
        )));
    }
    order.total = round_cents(
        order
            .items
            .iter()
            .map(|item| item.price * f64::from(item.quantity))
            .sum(),
    );
    Ok(())
}

pub struct OrderWorkflow {
    saga: Saga<OrderContext>,
    services: Arc<Services>,
}

impl OrderWorkflow {
    pub fn new(
        store: Arc<dyn ItemStore>,
        payments: Arc<dyn PaymentGateway>,
        inventory: Arc<dyn InventoryService>,
        table: impl Into<String>,
        policy: OrderPolicy,
    ) -> Self {
        let services = Arc::new(Services {
            store,
            payments,
            inventory,
            table: table.into(),
            policy,
        });
        let saga = Stage::ALL.iter().fold(Saga::new("order-processing"), |saga, stage| {
            saga.step(OrderStep {
                stage: *stage,
                services: Arc::clone(&services),
            })
        });
        Self { saga, services }
    }

    /// Accepts either an order document or an API-style event with the order in `body`.
    pub async fn handle(&self, event: Value) -> Result<Value> {
        let order_id = event
            .get("orderId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let body = match event.get("body").cloned() {
            Some(Value::String(raw)) => serde_json::from_str(&raw)?,
            Some(body @ Value::Object(_)) => body,
            _ => event,
        };
        let mut order: Order = serde_json::from_value(body)?;
        if let Some(order_id) = order_id {
            order.order_id = order_id;
        }
        self.process(order).await
    }

    pub async fn process(&self, mut order: Order) -> Result<Value> {
        if order.order_id.is_empty() {
            order.order_id = format!("order-{}", Uuid::new_v4().simple());
        }
        let order_id = order.order_id.clone();
        tracing::info!("Starting order processing for {}", order_id);

        let mut ctx = OrderContext {
            order,
            ..OrderContext::default()
        };
        let report = self.saga.run(&mut ctx).await;

        if let Some(error) = report.failure_error() {
            let message = report
                .failure
                .as_ref()
                .map(|f| f.error.clone())
                .unwrap_or_default();
            let mut changes = single("errorMessage", json!(message));
            changes.insert(
                "compensations".to_string(),
                serde_json::to_value(&report.compensations)?,
            );
            if let Err(e) = self
                .services
                .record(&order_id, Some(OrderStatus::Failed), changes)
                .await
            {
                tracing::error!("Could not mark order {} as failed: {}", order_id, e);
            }
            tracing::error!("❌ Order {} failed: {}", order_id, message);
            return Err(error);
        }

        tracing::info!("✅ Order {} completed", order_id);
        Ok(json!({
            "orderId": order_id,
            "status": OrderStatus::Completed.as_str(),
            "transactionId": report.transaction_id,
            "order": ctx.order,
            "paymentId": ctx.payment_id,
            "reservationId": ctx.reservation_id,
            "creditCheck": ctx.credit_check,
            "invoice": ctx.invoice,
            "picking": ctx.picking,
            "qualityCheck": ctx.quality_check,
            "packaging": ctx.packaging,
            "shipment": ctx.shipment,
            "notifications": ctx.notifications,
            "loyaltyPoints": ctx.loyalty_points,
            "summary": {
                "totalSteps": Stage::ALL.len(),
                "completedSteps": report.completed.len(),
            },
        }))
    }
}
