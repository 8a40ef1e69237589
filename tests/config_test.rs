use anyhow::Result;
use serde_json::json;
use serverless_patterns::adapters::memory::MemoryStorage;
use serverless_patterns::domain::ports::ConfigProvider;
use serverless_patterns::utils::validation::Validate;
use serverless_patterns::{Dispatcher, LambdaConfig, PatternKind, TomlConfig};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_toml_file_drives_local_dispatch() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("patterns.toml");
    std::env::set_var("PATTERNS_TEST_BUS", "integration-bus");
    fs::write(
        &config_path,
        r#"
[service]
name = "travel-dev"

[events]
bus_name = "${PATTERNS_TEST_BUS}"

[tables]
bookings = "dev-bookings"

[saga]
reserve_flight = "dev-reserve-flight"
cancel_flight = "dev-cancel-flight"

[orders]
express_threshold = 50.0
"#,
    )?;

    let config = TomlConfig::from_file(&config_path)?;
    config.validate()?;
    assert_eq!(config.service_name(), "travel-dev");
    assert_eq!(config.event_bus_name(), "integration-bus");
    assert_eq!(config.saga_functions().reserve_hotel, "saga-reserve-hotel");

    let dispatcher = Dispatcher::local(Arc::new(config), Arc::new(MemoryStorage::new()));

    // The reservation functions are registered under the configured names.
    let trip = dispatcher
        .dispatch(PatternKind::TravelSaga, json!({"failBookHotel": true}))
        .await;
    let details = match trip {
        Err(serverless_patterns::PatternError::SagaAborted { details, .. }) => details,
        other => panic!("expected aborted saga, got {other:?}"),
    };
    assert_eq!(details["compensations"][0]["flight"], "cancelled");

    let order = dispatcher
        .dispatch(
            PatternKind::OrderWorkflow,
            json!({
                "customerId": "c-1",
                "items": [{"productId": "p", "quantity": 1, "price": 75.0}]
            }),
        )
        .await?;
    assert_eq!(order["shipment"]["carrier"], "ExpressShip");
    Ok(())
}

#[test]
fn test_invalid_toml_values_fail_validation() -> Result<()> {
    let config = TomlConfig::from_toml_str(
        r#"
[ledger]
max_attempts = 0
"#,
    )?;
    assert!(config.validate().is_err());

    let config = TomlConfig::from_toml_str(
        r#"
[service]
invoke_base_url = "not a url"
"#,
    )?;
    assert!(config.validate().is_err());

    assert!(TomlConfig::from_toml_str("[ledger\nmax_attempts = 3").is_err());
    Ok(())
}

#[test]
fn test_lambda_environment_overrides() -> Result<()> {
    let vars = HashMap::from([
        ("PATTERN", "stream-forwarder"),
        ("EVENT_BUS_NAME", "orders-bus"),
        ("AWS_LAMBDA_FUNCTION_NAME", "orders-stream"),
        ("AWS_REGION", "eu-west-1"),
    ]);
    let config = LambdaConfig::from_vars(|name| vars.get(name).map(|v| v.to_string()))?;

    config.validate()?;
    assert_eq!(config.pattern.parse::<PatternKind>()?, PatternKind::StreamForwarder);
    assert_eq!(config.event_bus_name(), "orders-bus");
    assert_eq!(config.service_name(), "orders-stream");
    assert!(!config.needs_bucket());
    Ok(())
}
