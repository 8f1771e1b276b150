//! reqwest-backed `CallHandler` for `call` tasks.
//!
//! The handler lives in infra and implements the trait defined in
//! serverflow-core, so the engine itself never links an HTTP client.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use serverflow_core::workflow::{CallError, CallHandler, CallRequest, CallResponse};
use serverflow_types::config::HttpConfig;

/// Performs `call` task requests with a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpCallHandler {
    client: reqwest::Client,
}

impl HttpCallHandler {
    /// Build a handler with the configured timeout and user agent.
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl CallHandler for HttpCallHandler {
    fn call(
        &self,
        request: CallRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CallResponse, CallError>> + Send + '_>> {
        Box::pin(async move {
            let method: reqwest::Method = request
                .method
                .to_uppercase()
                .parse()
                .map_err(|_| CallError::new(None, format!("invalid HTTP method: {}", request.method)))?;

            let mut builder = self.client.request(method, &request.endpoint);
            for (key, value) in &request.headers {
                builder = builder.header(key.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(|e| {
                CallError::new(
                    e.status().map(|s| s.as_u16()),
                    format!("request to '{}' failed: {e}", request.endpoint),
                )
            })?;

            let status = response.status().as_u16();
            let headers: HashMap<String, String> = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        v.to_str().unwrap_or("<binary>").to_string(),
                    )
                })
                .collect();
            let text = response.text().await.map_err(|e| {
                CallError::new(Some(status), format!("failed to read response body: {e}"))
            })?;

            tracing::debug!(
                method = request.method.as_str(),
                endpoint = request.endpoint.as_str(),
                status,
                "call completed"
            );

            if !(200..300).contains(&status) {
                return Err(CallError::new(
                    Some(status),
                    format!("{} {} returned {status}", request.method, request.endpoint),
                ));
            }

            Ok(CallResponse {
                status,
                headers,
                body: parse_body(&text),
            })
        })
    }
}

/// JSON bodies are parsed; anything else is kept as a string. Empty is null.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
