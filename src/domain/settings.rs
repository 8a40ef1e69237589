use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub orders: String,
    pub bookings: String,
    pub events: String,
    pub ledger: String,
    pub inventory: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            orders: "orders".to_string(),
            bookings: "bookings".to_string(),
            events: "events".to_string(),
            ledger: "ledger".to_string(),
            inventory: "inventory".to_string(),
        }
    }
}

/// Function names (or ARNs) the travel saga invokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaFunctions {
    pub reserve_flight: String,
    pub cancel_flight: String,
    pub reserve_hotel: String,
    pub cancel_hotel: String,
    pub reserve_car: String,
    pub cancel_car: String,
}

impl Default for SagaFunctions {
    fn default() -> Self {
        Self {
            reserve_flight: "saga-reserve-flight".to_string(),
            cancel_flight: "saga-cancel-flight".to_string(),
            reserve_hotel: "saga-reserve-hotel".to_string(),
            cancel_hotel: "saga-cancel-hotel".to_string(),
            reserve_car: "saga-reserve-car".to_string(),
            cancel_car: "saga-cancel-car".to_string(),
        }
    }
}

impl SagaFunctions {
    pub fn all(&self) -> [&str; 6] {
        [
            &self.reserve_flight,
            &self.cancel_flight,
            &self.reserve_hotel,
            &self.cancel_hotel,
            &self.reserve_car,
            &self.cancel_car,
        ]
    }
}

/// Backoff schedule for re-running a transaction body after an OCC conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn no_delay(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimCheckSettings {
    pub prefix: String,
    pub source: String,
    pub detail_type: String,
    /// Payloads at or under this size travel inline; `None` claim-checks everything.
    pub inline_limit_bytes: Option<usize>,
}

impl Default for ClaimCheckSettings {
    fn default() -> Self {
        Self {
            prefix: "claim-check".to_string(),
            source: "claim-check.splitter".to_string(),
            detail_type: "ClaimCheck".to_string(),
            inline_limit_bytes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    pub secret: Option<String>,
    pub tolerance_seconds: i64,
    pub source: String,
    pub default_detail_type: String,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            secret: None,
            tolerance_seconds: 300,
            source: "stripe.com".to_string(),
            default_detail_type: "stripe-webhook-lambda".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderPolicy {
    pub tax_rate: f64,
    pub express_threshold: f64,
    pub loyalty_rate: f64,
    pub fraud_limit: f64,
    /// Orders above this total need an approved credit score.
    pub credit_check_threshold: f64,
    pub warehouse_wait_secs: u64,
    pub pickup_wait_secs: u64,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            tax_rate: 0.08,
            express_threshold: 500.0,
            loyalty_rate: 0.1,
            fraud_limit: 10_000.0,
            credit_check_threshold: 1_000.0,
            warehouse_wait_secs: 0,
            pickup_wait_secs: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(10));
        assert_eq!(policy.delay_after(2), Duration::from_millis(20));
        assert_eq!(policy.delay_after(3), Duration::from_millis(40));
        assert_eq!(policy.delay_after(4), Duration::from_millis(50));
        assert_eq!(policy.delay_after(40), Duration::from_millis(50));
    }

    #[test]
    fn test_no_delay_policy() {
        let policy = RetryPolicy::no_delay(3);
        assert_eq!(policy.delay_after(2), Duration::ZERO);
        assert_eq!(policy.max_attempts, 3);
    }
}
