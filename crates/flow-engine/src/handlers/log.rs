//! Log action handler: emits a message through the `log` facade at a
//! configurable level. Exists mainly so flows can leave breadcrumbs
//! without a `save_as`/assertion round trip through a no-op protocol call.
//!
//! Config shape: `{ message, level? }`, `level` one of
//! `trace|debug|info|warn|error` (default `info`).

use crate::context::ExecutionContext;
use crate::registry::ActionHandler;
use async_trait::async_trait;
use flow_core::model::StepResult;
use flow_core::value::Value;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct LogHandler;

#[async_trait]
impl ActionHandler for LogHandler {
    async fn execute(&self, config: &Value, _context: &ExecutionContext, _cancel: CancellationToken) -> StepResult {
        let started = Instant::now();
        let message = config.get_path("message").map(|v| v.as_display_string()).unwrap_or_default();
        let level = config.get_path("level").map(|v| v.as_display_string()).unwrap_or_else(|| "info".to_string());

        match level.as_str() {
            "trace" => log::trace!("{}", message),
            "debug" => log::debug!("{}", message),
            "warn" => log::warn!("{}", message),
            "error" => log::error!("{}", message),
            _ => log::info!("{}", message),
        }

        StepResult::passed(Value::object([("message".to_string(), Value::String(message))]), started.elapsed().as_millis() as u64, 0)
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
