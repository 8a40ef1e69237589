use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;
use serverless_patterns::adapters::aws::{
    DynamoDbInventory, DynamoDbLedger, DynamoDbStore, EventBridgePublisher, LambdaInvoker,
    S3Storage,
};
use serverless_patterns::adapters::memory::{MemoryStorage, SimulatedPayments};
use serverless_patterns::domain::ports::{ConfigProvider, Storage};
use serverless_patterns::utils::{logger, validation::Validate};
use serverless_patterns::{Components, Dispatcher, LambdaConfig, PatternKind};
use std::sync::Arc;

/// Clients and settings are built once per container and reused across warm invocations.
async fn build() -> Result<(PatternKind, Dispatcher), Error> {
    let config = LambdaConfig::from_env()?;
    config.validate()?;
    let pattern: PatternKind = config.pattern.parse()?;

    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let storage: Arc<dyn Storage> = match &config.payload_bucket {
        Some(bucket) => Arc::new(S3Storage::new(aws_sdk_s3::Client::new(&sdk_config), bucket.clone())),
        None => Arc::new(MemoryStorage::new()),
    };
    let dynamodb = aws_sdk_dynamodb::Client::new(&sdk_config);

    let components = Components {
        store: Arc::new(DynamoDbStore::new(dynamodb.clone())),
        publisher: Arc::new(EventBridgePublisher::new(aws_sdk_eventbridge::Client::new(&sdk_config))),
        storage,
        invoker: Arc::new(LambdaInvoker::new(aws_sdk_lambda::Client::new(&sdk_config))),
        ledger: Arc::new(DynamoDbLedger::new(dynamodb.clone())),
        // No payment provider is wired in; charges are simulated.
        payments: Arc::new(SimulatedPayments::new()),
        inventory: Arc::new(DynamoDbInventory::new(dynamodb, config.tables().inventory)),
    };

    tracing::info!(pattern = %pattern, region = %config.region, "Handler initialised");
    Ok((pattern, Dispatcher::new(Arc::new(config), components)))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    logger::init_lambda_logger();

    let (pattern, dispatcher) = build().await?;
    let dispatcher = Arc::new(dispatcher);

    run(service_fn(move |event: LambdaEvent<Value>| {
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            tracing::info!(request_id = %event.context.request_id, "Invocation received");
            dispatcher
                .dispatch(pattern, event.payload)
                .await
                .map_err(Error::from)
        }
    }))
    .await
}
