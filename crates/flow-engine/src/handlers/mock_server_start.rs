//! `mock_server_start` handler: thin adapter over `crate::mock_server`,
//! which owns the actual axum server lifecycle and registry. `mock_server_stop`
//! is not a registered handler — it carries only a `handle` string rather
//! than a `config`, so the Step Executor dispatches it directly.

use crate::context::ExecutionContext;
use crate::registry::ActionHandler;
use async_trait::async_trait;
use flow_core::model::StepResult;
use flow_core::value::Value;
use tokio_util::sync::CancellationToken;

pub struct MockServerStartHandler;

#[async_trait]
impl ActionHandler for MockServerStartHandler {
    async fn execute(&self, config: &Value, context: &ExecutionContext, _cancel: CancellationToken) -> StepResult {
        let result = crate::mock_server::start(config).await;
        if let Some(Value::String(handle)) = result.output.get_path("handle") {
            context.track_mock_server(handle.clone());
        }
        result
    }

    fn name(&self) -> &'static str {
        "mock_server_start"
    }
}
