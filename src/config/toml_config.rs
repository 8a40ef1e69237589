use crate::domain::ports::ConfigProvider;
use crate::domain::settings::{
    ClaimCheckSettings, OrderPolicy, RetryPolicy, SagaFunctions, TableNames, WebhookSettings,
};
use crate::utils::error::{PatternError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_range, validate_resource_name,
    validate_url, Validate,
};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// File-based configuration; every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub service: ServiceSection,
    pub tables: TableNames,
    pub events: EventsSection,
    pub saga: SagaFunctions,
    pub ledger: LedgerSection,
    pub claim_check: ClaimCheckSettings,
    pub webhook: WebhookSettings,
    pub orders: OrderPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub name: String,
    /// When set, the travel saga invokes its functions over HTTP instead of in-process.
    pub invoke_base_url: Option<String>,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: "serverless-patterns".to_string(),
            invoke_base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    pub bus_name: String,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            bus_name: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for LedgerSection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl TomlConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        tracing::debug!("Loaded configuration from {}", path.as_ref().display());
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| PatternError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables are left as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| PatternError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.into_owned())
    }
}

impl ConfigProvider for TomlConfig {
    fn service_name(&self) -> &str {
        &self.service.name
    }

    fn tables(&self) -> TableNames {
        self.tables.clone()
    }

    fn event_bus_name(&self) -> &str {
        &self.events.bus_name
    }

    fn saga_functions(&self) -> SagaFunctions {
        self.saga.clone()
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.ledger.max_attempts,
            base_delay: Duration::from_millis(self.ledger.base_delay_ms),
            max_delay: Duration::from_millis(self.ledger.max_delay_ms),
        }
    }

    fn claim_check(&self) -> ClaimCheckSettings {
        self.claim_check.clone()
    }

    fn webhook(&self) -> WebhookSettings {
        self.webhook.clone()
    }

    fn order_policy(&self) -> OrderPolicy {
        self.orders.clone()
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("service.name", &self.service.name)?;
        if let Some(url) = &self.service.invoke_base_url {
            validate_url("service.invoke_base_url", url)?;
        }

        for (field, table) in [
            ("tables.orders", &self.tables.orders),
            ("tables.bookings", &self.tables.bookings),
            ("tables.events", &self.tables.events),
            ("tables.ledger", &self.tables.ledger),
            ("tables.inventory", &self.tables.inventory),
        ] {
            validate_resource_name(field, table)?;
        }
        for function in self.saga.all() {
            validate_resource_name("saga", function)?;
        }
        validate_resource_name("events.bus_name", &self.events.bus_name)?;

        validate_range("ledger.max_attempts", self.ledger.max_attempts, 1, 20)?;
        if self.ledger.base_delay_ms > self.ledger.max_delay_ms {
            return Err(PatternError::InvalidConfigValueError {
                field: "ledger.base_delay_ms".to_string(),
                value: self.ledger.base_delay_ms.to_string(),
                reason: "must not exceed ledger.max_delay_ms".to_string(),
            });
        }

        validate_non_empty_string("claim_check.prefix", &self.claim_check.prefix)?;
        validate_range("webhook.tolerance_seconds", self.webhook.tolerance_seconds, 1, 3600)?;
        validate_range("orders.tax_rate", self.orders.tax_rate, 0.0, 1.0)?;
        validate_range("orders.loyalty_rate", self.orders.loyalty_rate, 0.0, 1.0)?;
        validate_range("orders.warehouse_wait_secs", self.orders.warehouse_wait_secs, 0, 900)?;
        validate_range("orders.pickup_wait_secs", self.orders.pickup_wait_secs, 0, 900)?;

        tracing::info!("✅ TOML configuration validation passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config.service_name(), "serverless-patterns");
        assert_eq!(config.event_bus_name(), "default");
        assert_eq!(config.tables().orders, "orders");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sections() {
        let toml_content = r#"
[service]
name = "travel"

[tables]
bookings = "trip-bookings"

[saga]
reserve_flight = "arn:aws:lambda:us-east-1:123:function:reserve-flight"

[ledger]
max_attempts = 6
base_delay_ms = 5
max_delay_ms = 50

[claim_check]
prefix = "payloads"
inline_limit_bytes = 1024

[orders]
tax_rate = 0.1
credit_check_threshold = 2500.0
pickup_wait_secs = 30
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.service_name(), "travel");
        assert_eq!(config.tables().bookings, "trip-bookings");
        assert_eq!(config.tables().orders, "orders");
        assert!(config.saga_functions().reserve_flight.ends_with("reserve-flight"));
        assert_eq!(config.saga_functions().cancel_car, "saga-cancel-car");
        assert_eq!(config.retry_policy().max_attempts, 6);
        assert_eq!(config.retry_policy().max_delay, Duration::from_millis(50));
        assert_eq!(config.claim_check().inline_limit_bytes, Some(1024));
        assert_eq!(config.order_policy().tax_rate, 0.1);
        assert_eq!(config.order_policy().credit_check_threshold, 2500.0);
        assert_eq!(config.order_policy().pickup_wait_secs, 30);
        assert_eq!(config.order_policy().warehouse_wait_secs, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("TEST_WEBHOOK_SECRET", "whsec_from_env");

        let toml_content = r#"
[webhook]
secret = "${TEST_WEBHOOK_SECRET}"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.webhook().secret.as_deref(), Some("whsec_from_env"));

        std::env::remove_var("TEST_WEBHOOK_SECRET");
    }

    #[test]
    fn test_config_validation() {
        let bad_url = TomlConfig::from_toml_str(
            r#"
[service]
invoke_base_url = "invalid-url"
"#,
        )
        .unwrap();
        assert!(bad_url.validate().is_err());

        let bad_delays = TomlConfig::from_toml_str(
            r#"
[ledger]
base_delay_ms = 100
max_delay_ms = 10
"#,
        )
        .unwrap();
        assert!(bad_delays.validate().is_err());
    }

    #[test]
    fn test_max_attempts_bounds() {
        for (attempts, valid) in [(0, false), (1, true), (20, true), (21, false)] {
            let config =
                TomlConfig::from_toml_str(&format!("[ledger]\nmax_attempts = {}\n", attempts))
                    .unwrap();
            match config.validate() {
                Ok(()) => assert!(valid, "max_attempts = {} should fail", attempts),
                Err(PatternError::InvalidConfigValueError { field, reason, .. }) => {
                    assert!(!valid, "max_attempts = {} should pass", attempts);
                    assert_eq!(field, "ledger.max_attempts");
                    assert_eq!(reason, "Value must be between 1 and 20");
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = TomlConfig::from_toml_str("[tables\norders = 1").unwrap_err();
        assert!(matches!(err, PatternError::ConfigValidationError { .. }));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[events]\nbus_name = \"orders-bus\"\n")
            .unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.event_bus_name(), "orders-bus");
    }
}
