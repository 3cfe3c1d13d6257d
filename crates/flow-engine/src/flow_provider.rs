//! Flow Provider: how a `sub_flow` step resolves `flow_ref` to a `Flow`
//! definition. Left as a trait boundary — this core does not own flow
//! persistence (§1 out-of-scope, §11 generalizes the teacher's
//! `StateStore` trait to this narrower lookup).

use flow_core::model::Flow;

#[derive(Debug)]
pub struct FlowNotFound(pub String);

impl std::fmt::Display for FlowNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "flow not found: {}", self.0)
    }
}

impl std::error::Error for FlowNotFound {}

pub trait FlowProvider: Send + Sync {
    fn get_flow(&self, flow_ref: &str) -> Result<Flow, FlowNotFound>;
}

/// A fixed in-memory set of flows, useful for tests and for hosts that
/// load an entire flow bundle up front.
pub struct StaticFlowProvider {
    flows: std::collections::HashMap<String, Flow>,
}

impl StaticFlowProvider {
    pub fn new(flows: impl IntoIterator<Item = Flow>) -> Self {
        StaticFlowProvider { flows: flows.into_iter().map(|f| (f.id.clone(), f)).collect() }
    }
}

impl FlowProvider for StaticFlowProvider {
    fn get_flow(&self, flow_ref: &str) -> Result<Flow, FlowNotFound> {
        self.flows.get(flow_ref).cloned().ok_or_else(|| FlowNotFound(flow_ref.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(id: &str) -> Flow {
        Flow { id: id.to_string(), name: id.to_string(), environment: None, setup: vec![], steps: vec![], teardown: vec![] }
    }

    #[test]
    fn looks_up_registered_flows_and_reports_missing() {
        let provider = StaticFlowProvider::new([flow("a"), flow("b")]);
        assert!(provider.get_flow("a").is_ok());
        assert!(provider.get_flow("missing").is_err());
    }
}
