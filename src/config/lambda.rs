use crate::domain::ports::ConfigProvider;
use crate::domain::settings::{
    ClaimCheckSettings, OrderPolicy, RetryPolicy, SagaFunctions, TableNames, WebhookSettings,
};
use crate::utils::error::{PatternError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_range, validate_required_field, validate_resource_name,
    Validate,
};
use std::env;

/// Settings for one deployed function, read from its environment.
#[derive(Debug, Clone)]
pub struct LambdaConfig {
    pub pattern: String,
    pub service_name: String,
    pub tables: TableNames,
    pub event_bus_name: String,
    pub saga_functions: SagaFunctions,
    pub payload_bucket: Option<String>,
    pub claim_check: ClaimCheckSettings,
    pub webhook: WebhookSettings,
    pub region: String,
    pub retry_policy: RetryPolicy,
}

impl LambdaConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        let tables = TableNames::default();
        let functions = SagaFunctions::default();
        let claim_defaults = ClaimCheckSettings::default();

        let pattern = lookup("PATTERN").ok_or_else(|| PatternError::MissingConfigError {
            field: "PATTERN".to_string(),
        })?;

        let max_attempts = match lookup("LEDGER_MAX_ATTEMPTS") {
            Some(raw) => raw
                .parse()
                .map_err(|_| PatternError::InvalidConfigValueError {
                    field: "LEDGER_MAX_ATTEMPTS".to_string(),
                    value: raw.clone(),
                    reason: "must be a positive integer".to_string(),
                })?,
            None => RetryPolicy::default().max_attempts,
        };

        Ok(Self {
            pattern,
            service_name: var("AWS_LAMBDA_FUNCTION_NAME", "serverless-patterns"),
            tables: TableNames {
                orders: var("ORDERS_TABLE", &tables.orders),
                bookings: var("BOOKINGS_TABLE", &tables.bookings),
                events: var("EVENTS_TABLE", &tables.events),
                ledger: var("LEDGER_TABLE", &tables.ledger),
                inventory: var("INVENTORY_TABLE", &tables.inventory),
            },
            event_bus_name: var("EVENT_BUS_NAME", "default"),
            saga_functions: SagaFunctions {
                reserve_flight: var("RESERVE_FLIGHT_FUNCTION", &functions.reserve_flight),
                cancel_flight: var("CANCEL_FLIGHT_FUNCTION", &functions.cancel_flight),
                reserve_hotel: var("RESERVE_HOTEL_FUNCTION", &functions.reserve_hotel),
                cancel_hotel: var("CANCEL_HOTEL_FUNCTION", &functions.cancel_hotel),
                reserve_car: var("RESERVE_CAR_FUNCTION", &functions.reserve_car),
                cancel_car: var("CANCEL_CAR_FUNCTION", &functions.cancel_car),
            },
            payload_bucket: lookup("PAYLOAD_BUCKET"),
            claim_check: ClaimCheckSettings {
                prefix: var("PAYLOAD_PREFIX", &claim_defaults.prefix),
                ..claim_defaults
            },
            webhook: WebhookSettings {
                secret: lookup("STRIPE_WEBHOOK_SECRET"),
                ..WebhookSettings::default()
            },
            region: var("AWS_REGION", "us-east-1"),
            retry_policy: RetryPolicy {
                max_attempts,
                ..RetryPolicy::default()
            },
        })
    }

    /// Patterns that park payloads in S3 need a bucket.
    pub fn needs_bucket(&self) -> bool {
        self.pattern.starts_with("claim-check")
    }
}

impl ConfigProvider for LambdaConfig {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn tables(&self) -> TableNames {
        self.tables.clone()
    }

    fn event_bus_name(&self) -> &str {
        &self.event_bus_name
    }

    fn saga_functions(&self) -> SagaFunctions {
        self.saga_functions.clone()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    fn claim_check(&self) -> ClaimCheckSettings {
        self.claim_check.clone()
    }

    fn webhook(&self) -> WebhookSettings {
        self.webhook.clone()
    }

    fn order_policy(&self) -> OrderPolicy {
        OrderPolicy::default()
    }
}

impl Validate for LambdaConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("PATTERN", &self.pattern)?;
        validate_resource_name("EVENT_BUS_NAME", &self.event_bus_name)?;
        for function in self.saga_functions.all() {
            validate_resource_name("saga function", function)?;
        }
        validate_aws_region("AWS_REGION", &self.region)?;
        validate_range("LEDGER_MAX_ATTEMPTS", self.retry_policy.max_attempts, 1, 20)?;

        if self.needs_bucket() {
            let bucket = validate_required_field("PAYLOAD_BUCKET", &self.payload_bucket)?;
            validate_s3_bucket_name("PAYLOAD_BUCKET", bucket)?;
        }
        if self.pattern == "stripe-webhook" {
            validate_required_field("STRIPE_WEBHOOK_SECRET", &self.webhook.secret)?;
        }

        tracing::info!("✅ Lambda configuration validation passed");
        Ok(())
    }
}

fn validate_s3_bucket_name(field_name: &str, bucket_name: &str) -> Result<()> {
    let invalid = |reason: &str| PatternError::InvalidConfigValueError {
        field: field_name.to_string(),
        value: bucket_name.to_string(),
        reason: reason.to_string(),
    };

    if bucket_name.len() < 3 || bucket_name.len() > 63 {
        return Err(invalid("S3 bucket name must be between 3 and 63 characters"));
    }

    if !bucket_name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(invalid(
            "S3 bucket name can only contain lowercase letters, numbers, hyphens, and dots",
        ));
    }

    if bucket_name.starts_with('-') || bucket_name.ends_with('-') {
        return Err(invalid("S3 bucket name cannot start or end with a hyphen"));
    }

    Ok(())
}

fn validate_aws_region(field_name: &str, region: &str) -> Result<()> {
    validate_non_empty_string(field_name, region)?;

    if !region
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(PatternError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: region.to_string(),
            reason: "AWS region can only contain lowercase letters, numbers, and hyphens"
                .to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<LambdaConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LambdaConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_pattern_is_required() {
        let err = config(&[]).unwrap_err();
        assert!(matches!(err, PatternError::MissingConfigError { .. }));
    }

    #[test]
    fn test_defaults_and_overrides() {
        let cfg = config(&[
            ("PATTERN", "order-workflow"),
            ("ORDERS_TABLE", "prod-orders"),
            ("CANCEL_HOTEL_FUNCTION", "cancel-hotel-prod"),
            ("LEDGER_MAX_ATTEMPTS", "7"),
        ])
        .unwrap();

        assert_eq!(cfg.tables.orders, "prod-orders");
        assert_eq!(cfg.tables.events, "events");
        assert_eq!(cfg.saga_functions.cancel_hotel, "cancel-hotel-prod");
        assert_eq!(cfg.saga_functions.reserve_hotel, "saga-reserve-hotel");
        assert_eq!(cfg.retry_policy().max_attempts, 7);
        assert_eq!(cfg.event_bus_name(), "default");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_bad_attempts_value() {
        let err = config(&[("PATTERN", "person-ledger"), ("LEDGER_MAX_ATTEMPTS", "many")])
            .unwrap_err();
        assert!(matches!(err, PatternError::InvalidConfigValueError { .. }));
    }

    #[test]
    fn test_claim_check_needs_valid_bucket() {
        let missing = config(&[("PATTERN", "claim-check-split")]).unwrap();
        assert!(missing.validate().is_err());

        let invalid = config(&[("PATTERN", "claim-check-split"), ("PAYLOAD_BUCKET", "Bad_Bucket")])
            .unwrap();
        assert!(invalid.validate().is_err());

        let valid = config(&[
            ("PATTERN", "claim-check-split"),
            ("PAYLOAD_BUCKET", "payload-bucket"),
            ("PAYLOAD_PREFIX", "large"),
        ])
        .unwrap();
        assert!(valid.validate().is_ok());
        assert_eq!(valid.claim_check().prefix, "large");
    }

    #[test]
    fn test_webhook_needs_secret() {
        let cfg = config(&[("PATTERN", "stripe-webhook")]).unwrap();
        assert!(cfg.validate().is_err());
    }
}
