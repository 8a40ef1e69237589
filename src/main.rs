use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use serverless_patterns::adapters::http::HttpInvoker;
use serverless_patterns::config::Command;
use serverless_patterns::utils::logger;
use serverless_patterns::{CliConfig, Dispatcher, LocalStorage, PatternKind};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();
    logger::init_cli_logger(cli.verbose);

    tracing::info!("Starting serverless-patterns CLI");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let (pattern, event_path) = match &cli.command {
        Command::Patterns => {
            for kind in PatternKind::ALL {
                println!("{:<22} {}", kind.as_str(), kind.description());
            }
            return Ok(());
        }
        Command::Invoke { pattern, event } => (*pattern, event.clone()),
    };

    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };

    let event: Value = match &event_path {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading event file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing event file {}", path.display()))?
        }
        None => Value::Object(Default::default()),
    };

    let invoke_base_url = settings.service.invoke_base_url.clone();
    let storage = Arc::new(LocalStorage::new(cli.storage_dir.clone()));
    let mut dispatcher = Dispatcher::local(Arc::new(settings), storage);
    if let Some(base_url) = invoke_base_url {
        tracing::info!("Invoking saga functions over HTTP at {}", base_url);
        dispatcher = dispatcher.with_invoker(Arc::new(HttpInvoker::new(base_url)?));
    }

    match dispatcher.dispatch(pattern, event).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            tracing::info!("✅ {} completed", pattern);
            Ok(())
        }
        Err(e) => {
            tracing::error!("❌ {} failed: {}", pattern, e);
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    }
}
