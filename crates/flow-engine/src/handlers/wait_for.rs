//! Wait-For action handler: polls an HTTP endpoint or a TCP port until
//! ready, without executing nested steps (§4.6 WaitFor).
//!
//! Config shape: `{ type: "http"|"tcp", url?, host?, port?, status_code?,
//! body_contains?, json_path?, json_value?, interval_ms, timeout_ms }`.

use crate::context::ExecutionContext;
use crate::registry::ActionHandler;
use async_trait::async_trait;
use flow_core::model::StepResult;
use flow_core::value::Value;
use reqwest::Client;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

pub struct WaitForHandler {
    client: Client,
}

impl WaitForHandler {
    pub fn new() -> Self {
        WaitForHandler { client: Client::new() }
    }
}

impl Default for WaitForHandler {
    fn default() -> Self {
        Self::new()
    }
}

async fn probe_http(client: &Client, config: &Value) -> bool {
    let Some(url) = config.get_path("url").map(|v| v.as_display_string()) else { return false };
    let Ok(response) = client.get(&url).send().await else { return false };

    if let Some(expected_status) = config.get_path("status_code").and_then(|v| v.as_f64()) {
        if response.status().as_u16() as f64 != expected_status {
            return false;
        }
    }
    let needs_body_check = config.get_path("body_contains").is_some() || config.get_path("json_path").is_some();
    if !needs_body_check {
        return true;
    }
    let Ok(body) = response.text().await else { return false };
    if let Some(substring) = config.get_path("body_contains").map(|v| v.as_display_string()) {
        if !body.contains(&substring) {
            return false;
        }
    }
    if let Some(path) = config.get_path("json_path").map(|v| v.as_display_string()) {
        let expected = config.get_path("json_value").cloned().unwrap_or(Value::Null);
        let parsed = serde_json::from_str::<serde_json::Value>(&body).map(Value::from_json).unwrap_or(Value::Null);
        if parsed.get_path(&path) != Some(&expected) {
            return false;
        }
    }
    true
}

async fn probe_tcp(config: &Value) -> bool {
    let host = config.get_path("host").map(|v| v.as_display_string()).unwrap_or_default();
    let port = config.get_path("port").and_then(|v| v.as_f64()).unwrap_or(0.0) as u16;
    TcpStream::connect((host.as_str(), port)).await.is_ok()
}

#[async_trait]
impl ActionHandler for WaitForHandler {
    async fn execute(&self, config: &Value, _context: &ExecutionContext, cancel: CancellationToken) -> StepResult {
        let started = Instant::now();
        let kind = config.get_path("type").map(|v| v.as_display_string()).unwrap_or_else(|| "http".to_string());
        let interval_ms = config.get_path("interval_ms").and_then(|v| v.as_f64()).unwrap_or(500.0) as u64;
        let timeout_ms = config.get_path("timeout_ms").and_then(|v| v.as_f64()).unwrap_or(10_000.0) as u64;
        let deadline = started + Duration::from_millis(timeout_ms);

        loop {
            let ready = match kind.as_str() {
                "tcp" => probe_tcp(config).await,
                _ => probe_http(&self.client, config).await,
            };
            if ready {
                return StepResult::passed(Value::object([("ready".to_string(), Value::Bool(true))]), started.elapsed().as_millis() as u64, 0);
            }
            if Instant::now() >= deadline {
                return StepResult::failed("polling_timeout", started.elapsed().as_millis() as u64, 0);
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                _ = cancel.cancelled() => return StepResult::cancelled(),
            }
        }
    }

    fn name(&self) -> &'static str {
        "wait_for"
    }
}
