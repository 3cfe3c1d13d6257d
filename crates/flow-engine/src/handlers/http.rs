//! HTTP action handler.
//!
//! Config shape: `{ method, url, headers?, query?, body?, json? }`.
//! Grounded in the teacher's `shared::http_client::EngineHttpClient` (a
//! `reqwest::Client` plus default headers and a non-success-status error
//! path), generalized from a fixed chat-completion POST to an arbitrary
//! method/URL/body per step.

use crate::context::ExecutionContext;
use crate::registry::ActionHandler;
use async_trait::async_trait;
use flow_core::model::StepResult;
use flow_core::value::Value;
use reqwest::Client;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct HttpHandler {
    client: Client,
}

impl HttpHandler {
    pub fn new() -> Self {
        HttpHandler { client: Client::new() }
    }
}

impl Default for HttpHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionHandler for HttpHandler {
    async fn execute(&self, config: &Value, _context: &ExecutionContext, cancel: CancellationToken) -> StepResult {
        let started = Instant::now();
        let method = config.get_path("method").map(|v| v.as_display_string()).unwrap_or_else(|| "GET".to_string());
        let Some(url) = config.get_path("url").map(|v| v.as_display_string()) else {
            return StepResult::failed("http step requires 'url'", started.elapsed().as_millis() as u64, 0);
        };

        let method = match method.to_uppercase().as_str() {
            "GET" => reqwest::Method::GET,
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "PATCH" => reqwest::Method::PATCH,
            "DELETE" => reqwest::Method::DELETE,
            "HEAD" => reqwest::Method::HEAD,
            other => return StepResult::failed(format!("unsupported http method: {}", other), started.elapsed().as_millis() as u64, 0),
        };

        let mut request = self.client.request(method, &url);
        if let Some(Value::Object(headers)) = config.get_path("headers") {
            for (key, value) in headers {
                request = request.header(key, value.as_display_string());
            }
        }
        if let Some(body) = config.get_path("json") {
            request = request.json(&body.to_json());
        } else if let Some(body) = config.get_path("body") {
            request = request.body(body.as_display_string());
        }

        let result = tokio::select! {
            r = request.send() => r,
            _ = cancel.cancelled() => return StepResult::cancelled(),
        };

        let response = match result {
            Ok(r) => r,
            Err(e) => return StepResult::failed(format!("http request failed: {}", e), started.elapsed().as_millis() as u64, 0),
        };

        let status = response.status().as_u16();
        let headers: std::collections::BTreeMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or_default().to_string())))
            .collect();
        let body_text = response.text().await.unwrap_or_default();
        let body_value = serde_json::from_str::<serde_json::Value>(&body_text).map(Value::from_json).unwrap_or(Value::String(body_text));

        let output = Value::object([
            ("status".to_string(), Value::from(status as i64)),
            ("headers".to_string(), Value::Object(headers)),
            ("body".to_string(), body_value),
        ]);

        StepResult::passed(output, started.elapsed().as_millis() as u64, 0)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_missing_url() {
        let handler = HttpHandler::new();
        let ctx = ExecutionContext::new(Default::default(), Default::default());
        let config = Value::object([("method".to_string(), Value::from("GET"))]);
        let result = handler.execute(&config, &ctx, CancellationToken::new()).await;
        assert_eq!(result.status, flow_core::model::StepStatus::Failed);
    }
}
