//! Execution Context: the tree-scoped, thread-safe record of variables,
//! step outputs, and the current step pointer for one execution.
//!
//! Variables and step outputs share a single `RwLock` rather than two
//! independent ones: `RwLock` already lets any number of concurrent
//! readers (e.g. sibling reads in a parallel group) proceed without
//! blocking each other, and a single lock is the only way to guarantee
//! `consistent_snapshot`'s atomic paired read — two separate locks can
//! always be interleaved by a writer landing between the two acquisitions
//! (§4.7: "one atomic read-lock covering variables + step_outputs;
//! tear-across is forbidden"). Mock servers started by this execution are
//! tracked here too, so the Flow Runner's teardown phase can sweep any
//! left running.
//!
//! Lock acquisition order (this lock, then the Debug Controller's) is
//! registered with `flow_core::deadlock_prevention`.

use flow_core::deadlock_prevention::LockOrderRegistry;
use flow_core::resolver::Scope;
use flow_core::value::Value;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

static LOCK_ORDER: Lazy<LockOrderRegistry> = Lazy::new(LockOrderRegistry::engine_default);

pub fn lock_order() -> &'static LockOrderRegistry {
    &LOCK_ORDER
}

#[derive(Default)]
struct State {
    variables: BTreeMap<String, Value>,
    step_outputs: BTreeMap<String, Value>,
}

/// A single execution's mutable state. Cheaply cloned (`Arc` internals) so
/// sub-flows and parallel children can each hold a handle.
#[derive(Clone)]
pub struct ExecutionContext {
    pub env: Arc<BTreeMap<String, String>>,
    state: Arc<RwLock<State>>,
    current_step_id: Arc<RwLock<Option<String>>>,
    cancelled: Arc<AtomicBool>,
    mock_servers: Arc<Mutex<Vec<String>>>,
}

impl ExecutionContext {
    pub fn new(env: BTreeMap<String, String>, variables: BTreeMap<String, Value>) -> Self {
        ExecutionContext {
            env: Arc::new(env),
            state: Arc::new(RwLock::new(State { variables, step_outputs: BTreeMap::new() })),
            current_step_id: Arc::new(RwLock::new(None)),
            cancelled: Arc::new(AtomicBool::new(false)),
            mock_servers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A fresh context for a sub-flow: always inherits `env`; `variables`
    /// either starts from `input` alone or from a copy of the parent's
    /// variables merged under `input`, depending on `inherit_env`.
    pub fn for_sub_flow(&self, input: BTreeMap<String, Value>, inherit_env: bool, base: BTreeMap<String, Value>) -> Self {
        let mut variables = if inherit_env { base } else { BTreeMap::new() };
        variables.extend(input);
        ExecutionContext {
            env: Arc::clone(&self.env),
            state: Arc::new(RwLock::new(State { variables, step_outputs: BTreeMap::new() })),
            current_step_id: Arc::new(RwLock::new(None)),
            cancelled: Arc::new(AtomicBool::new(false)),
            mock_servers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub async fn set_current_step(&self, step_id: Option<String>) {
        *self.current_step_id.write().await = step_id;
    }

    pub async fn current_step(&self) -> Option<String> {
        self.current_step_id.read().await.clone()
    }

    pub async fn get_variable(&self, name: &str) -> Option<Value> {
        self.state.read().await.variables.get(name).cloned()
    }

    pub async fn set_variable(&self, name: String, value: Value) {
        self.state.write().await.variables.insert(name, value);
    }

    pub async fn get_step_output(&self, step_id: &str) -> Option<Value> {
        self.state.read().await.step_outputs.get(step_id).cloned()
    }

    pub async fn set_step_output(&self, step_id: String, value: Value) {
        self.state.write().await.step_outputs.insert(step_id, value);
    }

    pub async fn variables_snapshot(&self) -> BTreeMap<String, Value> {
        self.state.read().await.variables.clone()
    }

    pub async fn step_outputs_snapshot(&self) -> BTreeMap<String, Value> {
        self.state.read().await.step_outputs.clone()
    }

    /// A single atomic read covering both maps, for debug snapshots where
    /// tearing across variables/step_outputs would be observable.
    pub async fn consistent_snapshot(&self) -> (BTreeMap<String, Value>, BTreeMap<String, Value>) {
        let state = self.state.read().await;
        (state.variables.clone(), state.step_outputs.clone())
    }

    pub async fn scope<'a>(&'a self, variables: &'a BTreeMap<String, Value>, step_outputs: &'a BTreeMap<String, Value>) -> Scope<'a> {
        Scope { env: &self.env, variables, step_outputs }
    }

    /// Records that this execution started a mock server under `handle`, so
    /// the Flow Runner's teardown phase can force-stop it if the flow never
    /// explicitly stopped it itself.
    pub fn track_mock_server(&self, handle: String) {
        self.mock_servers.lock().unwrap().push(handle);
    }

    /// Marks a handle as stopped so teardown doesn't try to stop it again.
    pub fn untrack_mock_server(&self, handle: &str) {
        self.mock_servers.lock().unwrap().retain(|h| h != handle);
    }

    /// Handles started by this execution that are still outstanding.
    pub fn outstanding_mock_servers(&self) -> Vec<String> {
        self.mock_servers.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn variables_and_step_outputs_are_both_readable() {
        let ctx = ExecutionContext::new(BTreeMap::new(), BTreeMap::new());
        ctx.set_variable("x".to_string(), Value::from(1i64)).await;
        ctx.set_step_output("s1".to_string(), Value::object([("a".to_string(), Value::from(true))])).await;
        assert_eq!(ctx.get_variable("x").await, Some(Value::from(1i64)));
        assert!(ctx.get_step_output("s1").await.is_some());
    }

    #[tokio::test]
    async fn mock_server_tracking_round_trips() {
        let ctx = ExecutionContext::new(BTreeMap::new(), BTreeMap::new());
        ctx.track_mock_server("h1".to_string());
        ctx.track_mock_server("h2".to_string());
        assert_eq!(ctx.outstanding_mock_servers(), vec!["h1".to_string(), "h2".to_string()]);
        ctx.untrack_mock_server("h1");
        assert_eq!(ctx.outstanding_mock_servers(), vec!["h2".to_string()]);
    }

    #[tokio::test]
    async fn sub_flow_context_isolates_variables_unless_inherited() {
        let parent = ExecutionContext::new(BTreeMap::new(), BTreeMap::new());
        parent.set_variable("x".to_string(), Value::from(1i64)).await;
        let base = parent.variables_snapshot().await;

        let mut input = BTreeMap::new();
        input.insert("x".to_string(), Value::from("overridden"));
        let child = parent.for_sub_flow(input.clone(), true, base);
        assert_eq!(child.get_variable("x").await, Some(Value::from("overridden")));

        child.set_variable("x".to_string(), Value::from("child-only")).await;
        assert_eq!(parent.get_variable("x").await, Some(Value::from(1i64)));
    }

    #[tokio::test]
    async fn cancellation_is_observed_across_clones() {
        let ctx = ExecutionContext::new(BTreeMap::new(), BTreeMap::new());
        let clone = ctx.clone();
        clone.cancel();
        assert!(ctx.is_cancelled());
    }
}
