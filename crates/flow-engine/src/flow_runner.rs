//! Flow Runner: executes one flow's setup/main/teardown phases and folds
//! per-step results into a `FlowResult` (§4.5).
//!
//! Setup failures abort the main phase but teardown always runs. Main
//! steps run sequentially and respect `depends_on`: a step whose
//! dependency did not pass is skipped rather than executed. The flow as a
//! whole passes iff every non-skipped main step passed.

use crate::context::ExecutionContext;
use crate::step_executor::{execute_step, StepEnv};
use flow_core::model::{FlowResult, FlowStatus, Step, StepResult, StepStatus};
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub async fn run_flow(flow: &flow_core::model::Flow, ctx: ExecutionContext, env: StepEnv, cancel: CancellationToken) -> FlowResult {
    let started = Instant::now();
    let mut step_results: BTreeMap<String, StepResult> = BTreeMap::new();

    let mut setup_failed = false;
    for step in &flow.setup {
        let result = execute_step(step, &ctx, &env, cancel.clone()).await;
        let failed = result.status == StepStatus::Failed || result.status == StepStatus::Cancelled;
        step_results.insert(step.id().to_string(), result);
        if failed {
            setup_failed = true;
            break;
        }
    }

    let mut any_main_failed = setup_failed;
    if !setup_failed {
        for step in &flow.steps {
            if cancel.is_cancelled() {
                step_results.insert(step.id().to_string(), StepResult::cancelled());
                any_main_failed = true;
                continue;
            }
            if dependency_unmet(step, &step_results) {
                step_results.insert(step.id().to_string(), StepResult::skipped());
                continue;
            }
            let result = execute_step(step, &ctx, &env, cancel.clone()).await;
            let failed = result.status == StepStatus::Failed || result.status == StepStatus::Cancelled;
            step_results.insert(step.id().to_string(), result);
            if failed {
                any_main_failed = true;
            }
        }
    }

    for step in &flow.teardown {
        let result = execute_step(step, &ctx, &env, CancellationToken::new()).await;
        step_results.insert(step.id().to_string(), result);
    }

    // Teardown always walks and closes any mock servers this execution
    // started but never explicitly stopped, even on failure paths (§5/§9).
    for handle in ctx.outstanding_mock_servers() {
        crate::mock_server::stop(&handle).await;
        ctx.untrack_mock_server(&handle);
    }

    let status = if any_main_failed { FlowStatus::Failed } else { FlowStatus::Passed };
    let error = if setup_failed {
        Some("setup phase failed".to_string())
    } else if any_main_failed {
        Some("one or more steps failed".to_string())
    } else {
        None
    };

    FlowResult {
        flow_id: flow.id.clone(),
        status,
        step_results,
        variables: ctx.variables_snapshot().await,
        duration_ms: started.elapsed().as_millis() as u64,
        error,
    }
}

fn dependency_unmet(step: &Step, step_results: &BTreeMap<String, StepResult>) -> bool {
    step.meta.depends_on.iter().any(|dep| !matches!(step_results.get(dep), Some(r) if r.status == StepStatus::Passed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_provider::StaticFlowProvider;
    use crate::registry::ActionRegistry;
    use flow_core::model::{Flow, OnError, RetryConfig, StepAction, StepMeta};
    use flow_core::resolver::ValueResolver;
    use flow_core::value::Value;
    use std::sync::Arc;

    fn log_step(id: &str, depends_on: Vec<String>) -> Step {
        Step {
            meta: StepMeta {
                id: id.to_string(),
                name: id.to_string(),
                timeout_ms: None,
                retry: RetryConfig::default(),
                assertions: vec![],
                save_as: BTreeMap::new(),
                on_error: OnError::Fail,
                error_steps: vec![],
                on_timeout: vec![],
                depends_on,
            },
            action: StepAction::Log { config: Value::object([("message".to_string(), Value::from("hi"))]) },
        }
    }

    fn env() -> StepEnv {
        StepEnv {
            registry: Arc::new(crate::handlers::default_registry()),
            flow_provider: Arc::new(StaticFlowProvider::new([])),
            debug: None,
            resolver: Arc::new(ValueResolver::default()),
        }
    }

    #[tokio::test]
    async fn skips_steps_whose_dependency_did_not_pass() {
        let flow = Flow {
            id: "f1".to_string(),
            name: "f1".to_string(),
            environment: None,
            setup: vec![],
            steps: vec![log_step("a", vec![]), log_step("b", vec!["missing".to_string()])],
            teardown: vec![],
        };
        let ctx = ExecutionContext::new(BTreeMap::new(), BTreeMap::new());
        let result = run_flow(&flow, ctx, env(), CancellationToken::new()).await;
        assert_eq!(result.step_results["b"].status, StepStatus::Skipped);
        assert_eq!(result.status, FlowStatus::Passed);
    }

    #[tokio::test]
    async fn teardown_runs_even_when_setup_fails() {
        let mut failing = log_step("setup1", vec![]);
        failing.action = StepAction::Http { config: Value::Null };
        let flow = Flow {
            id: "f1".to_string(),
            name: "f1".to_string(),
            environment: None,
            setup: vec![failing],
            steps: vec![log_step("a", vec![])],
            teardown: vec![log_step("cleanup", vec![])],
        };
        let ctx = ExecutionContext::new(BTreeMap::new(), BTreeMap::new());
        let result = run_flow(&flow, ctx, env(), CancellationToken::new()).await;
        assert_eq!(result.status, FlowStatus::Failed);
        assert!(result.step_results.contains_key("cleanup"));
        assert!(!result.step_results.contains_key("a"));
    }

    #[tokio::test]
    async fn teardown_sweeps_mock_servers_the_flow_never_stopped_itself() {
        let flow = Flow {
            id: "f1".to_string(),
            name: "f1".to_string(),
            environment: None,
            setup: vec![],
            steps: vec![log_step("a", vec![])],
            teardown: vec![],
        };
        let ctx = ExecutionContext::new(BTreeMap::new(), BTreeMap::new());
        ctx.track_mock_server("orphaned-handle".to_string());
        run_flow(&flow, ctx.clone(), env(), CancellationToken::new()).await;
        assert!(ctx.outstanding_mock_servers().is_empty());
    }
}
