//! WebSocket action handler: connects, optionally sends one message, and
//! optionally waits for one message back, via `tokio-tungstenite`.
//!
//! Config shape: `{ url, send?, expect_response?, timeout_ms? }`.

use crate::context::ExecutionContext;
use crate::registry::ActionHandler;
use async_trait::async_trait;
use flow_core::model::StepResult;
use flow_core::value::Value;
use futures_util::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

pub struct WebSocketHandler;

#[async_trait]
impl ActionHandler for WebSocketHandler {
    async fn execute(&self, config: &Value, _context: &ExecutionContext, cancel: CancellationToken) -> StepResult {
        let started = Instant::now();
        let Some(url) = config.get_path("url").map(|v| v.as_display_string()) else {
            return StepResult::failed("websocket step requires 'url'", started.elapsed().as_millis() as u64, 0);
        };
        let timeout_ms = config.get_path("timeout_ms").and_then(|v| v.as_f64()).unwrap_or(5000.0) as u64;

        let connect = connect_async(&url);
        let (mut stream, _response) = tokio::select! {
            r = connect => match r {
                Ok(pair) => pair,
                Err(e) => return StepResult::failed(format!("websocket connect failed: {}", e), started.elapsed().as_millis() as u64, 0),
            },
            _ = cancel.cancelled() => return StepResult::cancelled(),
        };

        if let Some(send) = config.get_path("send").map(|v| v.as_display_string()) {
            if let Err(e) = stream.send(WsMessage::Text(send)).await {
                return StepResult::failed(format!("websocket send failed: {}", e), started.elapsed().as_millis() as u64, 0);
            }
        }

        let expect_response = config.get_path("expect_response").map(|v| matches!(v, Value::Bool(true))).unwrap_or(false);
        let mut received = Value::Null;
        if expect_response {
            let next = tokio::time::timeout(Duration::from_millis(timeout_ms), stream.next());
            match next.await {
                Ok(Some(Ok(WsMessage::Text(text)))) => {
                    received = serde_json::from_str::<serde_json::Value>(&text).map(Value::from_json).unwrap_or(Value::String(text));
                }
                Ok(Some(Ok(WsMessage::Binary(bytes)))) => {
                    received = Value::String(String::from_utf8_lossy(&bytes).to_string());
                }
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => return StepResult::failed(format!("websocket receive failed: {}", e), started.elapsed().as_millis() as u64, 0),
                Ok(None) => return StepResult::failed("websocket closed before a response arrived", started.elapsed().as_millis() as u64, 0),
                Err(_) => return StepResult::failed("polling_timeout", started.elapsed().as_millis() as u64, 0),
            }
        }

        let _ = stream.close(None).await;
        StepResult::passed(Value::object([("message".to_string(), received)]), started.elapsed().as_millis() as u64, 0)
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
