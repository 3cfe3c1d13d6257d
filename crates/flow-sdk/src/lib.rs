//! Plugin surface for out-of-tree action handlers: re-exports the pieces
//! a third party needs to implement and register a new `ActionHandler`
//! without depending on flow-engine's internals directly, mirroring the
//! teacher's `fluent-sdk` re-export of engine-building traits for
//! out-of-tree AI engine implementations.

pub use async_trait::async_trait;
pub use flow_core::error::{CoreError, CoreResult};
pub use flow_core::model::{StepResult, StepStatus};
pub use flow_core::value::Value;
pub use flow_engine::context::ExecutionContext;
pub use flow_engine::registry::{ActionHandler, ActionRegistry};
pub use tokio_util::sync::CancellationToken;

/// Registers a set of third-party handlers into `registry`, alongside the
/// built-in ones from `flow_engine::handlers::default_registry`.
pub fn register_handlers(registry: &mut ActionRegistry, handlers: impl IntoIterator<Item = std::sync::Arc<dyn ActionHandler>>) {
    for handler in handlers {
        registry.register(handler);
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
            "plugin_echo"
        }
    }

    #[test]
    fn registers_a_third_party_handler() {
        let mut registry = flow_engine::handlers::default_registry();
        register_handlers(&mut registry, [std::sync::Arc::new(EchoHandler) as std::sync::Arc<dyn ActionHandler>]);
        assert!(registry.contains("plugin_echo"));
        assert!(registry.contains("http"));
    }
}
