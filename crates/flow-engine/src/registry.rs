//! Action Registry: maps an action tag to the `ActionHandler` that
//! executes it. Populated once at startup and read-only thereafter — the
//! only piece of global mutable state the engine carries (§5).

use crate::context::ExecutionContext;
use async_trait::async_trait;
use flow_core::model::StepResult;
use flow_core::value::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Every protocol/construct handler implements this uniform contract.
/// Handlers receive an already-resolved configuration; they never read
/// `context.variables` directly (§4.3).
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, config: &Value, context: &ExecutionContext, cancel: CancellationToken) -> StepResult;

    fn name(&self) -> &'static str;

    /// Optional JSON Schema for `config`, used by flow document validation.
    fn schema(&self) -> Option<serde_json::Value> {
        None
    }
}

#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<&'static str, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        ActionRegistry { handlers: HashMap::new() }
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.name(), handler);
    }

    pub fn get(&self, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action).cloned()
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    pub fn action_names(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl ActionHandler for EchoHandler {
        async fn execute(&self, config: &Value, _context: &ExecutionContext, _cancel: CancellationToken) -> StepResult {
            StepResult::passed(config.clone(), 0, 0)
        }

        fn name(&self) -> &'static str {
            "echo"
        }
    }

    #[test]
    fn registers_and_looks_up_by_name() {
        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(EchoHandler));
        assert!(registry.contains("echo"));
        assert!(registry.get("unknown_action").is_none());
    }
}
