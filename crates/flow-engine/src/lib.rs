//! Flow execution engine: action handlers, the step executor, the flow
//! runner, and the debug controller.

pub mod context;
pub mod debug_controller;
pub mod flow_provider;
pub mod flow_runner;
pub mod handlers;
pub mod mock_server;
pub mod registry;
pub mod step_executor;
pub mod validation;
