use crate::domain::ports::FunctionInvoker;
use crate::utils::error::{PatternError, Result};
use crate::utils::validation::validate_url;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Invokes functions exposed over HTTP (function URLs or an API stage) as `POST <base>/<name>`.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: Client,
    base_url: String,
}

impl HttpInvoker {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        validate_url("invoke_base_url", &base_url)?;
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FunctionInvoker for HttpInvoker {
    async fn invoke(&self, function: &str, payload: Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, function);
        tracing::debug!("Invoking {} via {}", function, url);

        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();
        tracing::debug!("{} responded with {}", function, status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PatternError::InvocationError {
                function: function.to_string(),
                message: format!("HTTP {}: {}", status.as_u16(), body),
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}
