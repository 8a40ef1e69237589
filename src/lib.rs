pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use app::{Components, Dispatcher, PatternKind};
pub use config::{cli::LocalStorage, lambda::LambdaConfig, toml_config::TomlConfig};

#[cfg(feature = "cli")]
pub use config::CliConfig;

#[cfg(feature = "lambda")]
pub use adapters::aws::{
    DynamoDbInventory, DynamoDbLedger, DynamoDbStore, EventBridgePublisher, LambdaInvoker,
    S3Storage,
};

pub use utils::error::{PatternError, Result};
