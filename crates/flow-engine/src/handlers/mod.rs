//! Protocol and control-construct action handlers. Each implements
//! `ActionHandler` (§4.3) and is registered under its action tag.

pub mod browser;
pub mod database;
pub mod db_poll;
pub mod grpc;
pub mod http;
pub mod kafka;
pub mod log;
pub mod mock_server_start;
pub mod transform;
pub mod wait_for;
pub mod websocket;

use crate::registry::ActionRegistry;
use std::sync::Arc;

/// Builds the registry of all built-in handlers. `parallel`, `sub_flow`,
/// `wait_until`, and `mock_server_stop` are not registered here — the
/// Step Executor dispatches those directly since they need recursion into
/// nested steps rather than an opaque `config` (§4.3's contract covers
/// only the leaf/protocol handlers and the polling constructs).
pub fn default_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry.register(Arc::new(http::HttpHandler::new()));
    registry.register(Arc::new(database::DatabaseHandler));
    registry.register(Arc::new(kafka::KafkaProduceHandler));
    registry.register(Arc::new(kafka::KafkaConsumeHandler));
    registry.register(Arc::new(grpc::GrpcUnaryHandler));
    registry.register(Arc::new(grpc::GrpcStreamHandler));
    registry.register(Arc::new(websocket::WebSocketHandler));
    registry.register(Arc::new(browser::BrowserHandler));
    registry.register(Arc::new(transform::TransformHandler));
    registry.register(Arc::new(log::LogHandler));
    registry.register(Arc::new(wait_for::WaitForHandler::new()));
    registry.register(Arc::new(db_poll::DbPollHandler));
    registry.register(Arc::new(mock_server_start::MockServerStartHandler));
    registry
}
