//! Step Executor: orchestrates one step's lifecycle — resolve, dispatch,
//! retry, assert, save outputs, error/timeout branches (§4.4). Recursive
//! for control-flow steps, following the teacher's boxed-future recursion
//! pattern (`pipeline::step_executor::StepExecutor::execute_single_step`)
//! generalized from a flat command pipeline to this engine's tagged step
//! model.

use crate::context::ExecutionContext;
use crate::debug_controller::{BeforeStepOutcome, DebugController};
use crate::flow_provider::FlowProvider;
use crate::registry::ActionRegistry;
use flow_core::assertion;
use flow_core::model::{FlowStatus, OnError, Step, StepAction, StepResult, StepSnapshot, StepStatus, WaitUntilTimeout};
use flow_core::resolver::{Scope, ValueResolver};
use flow_core::value::Value;
use log::{debug, error, warn};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = StepResult> + Send + 'a>>;

/// Shared, cloneable collaborators every recursive step invocation needs.
#[derive(Clone)]
pub struct StepEnv {
    pub registry: Arc<ActionRegistry>,
    pub flow_provider: Arc<dyn FlowProvider>,
    pub debug: Option<Arc<DebugController>>,
    pub resolver: Arc<ValueResolver>,
}

pub fn execute_step<'a>(step: &'a Step, ctx: &'a ExecutionContext, env: &'a StepEnv, cancel: CancellationToken) -> StepFuture<'a> {
    Box::pin(async move {
        let started = Instant::now();
        ctx.set_current_step(Some(step.id().to_string())).await;

        if let Some(debug) = &env.debug {
            let (variables, step_outputs) = ctx.consistent_snapshot().await;
            match debug.on_before_step(step.id(), step.name(), step.action_name(), &env.resolver, &variables, &step_outputs, &cancel).await {
                BeforeStepOutcome::Cancelled => return finish_cancelled(step, ctx, env, started).await,
                BeforeStepOutcome::Continue => {}
            }
        }
        if ctx.is_cancelled() || cancel.is_cancelled() {
            return finish_cancelled(step, ctx, env, started).await;
        }

        let config_for_snapshot = resolved_config_for_snapshot(step);
        let input_for_snapshot = resolve_config(&config_for_snapshot, ctx, env).await;

        let result = dispatch_with_retry(step, ctx, env, &cancel).await;
        let result = apply_assertions(step, result, ctx, env).await;
        let result = extract_save_as(step, result, ctx, env).await;
        let result = handle_error_branch(step, result, ctx, env, &cancel).await;

        let snapshot = StepSnapshot {
            step_id: step.id().to_string(),
            step_name: step.name().to_string(),
            action: step.action_name().to_string(),
            config: redact_value(&config_for_snapshot),
            input: redact_value(&input_for_snapshot),
            output: redact_value(&result.output),
            error: result.error.clone(),
            duration_ms: result.duration_ms,
            captured_at_ms: now_ms(),
            variables_snapshot: ctx.variables_snapshot().await,
        };
        if let Some(debug) = &env.debug {
            debug.on_after_step(snapshot, result.status == StepStatus::Failed).await;
        }
        result
    })
}

async fn finish_cancelled(step: &Step, _ctx: &ExecutionContext, _env: &StepEnv, started: Instant) -> StepResult {
    debug!("step {} cancelled before dispatch", step.id());
    let mut r = StepResult::cancelled();
    r.duration_ms = started.elapsed().as_millis() as u64;
    r
}

/// Applies secret redaction to every string leaf before a value is captured
/// into a Step Snapshot, so tokens/keys resolved into step config or output
/// don't end up readable in debug history.
fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(flow_core::redaction::redact_secrets_in_text(s)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), redact_value(v))).collect()),
        other => other.clone(),
    }
}

fn resolved_config_for_snapshot(step: &Step) -> Value {
    match &step.action {
        StepAction::Http { config }
        | StepAction::Database { config }
        | StepAction::KafkaProduce { config }
        | StepAction::KafkaConsume { config }
        | StepAction::GrpcUnary { config }
        | StepAction::GrpcStream { config }
        | StepAction::WebSocket { config }
        | StepAction::Browser { config }
        | StepAction::Transform { config }
        | StepAction::Log { config }
        | StepAction::WaitFor { config }
        | StepAction::DbPoll { config }
        | StepAction::MockServerStart { config } => config.clone(),
        _ => Value::Null,
    }
}

async fn resolve_config(template: &Value, ctx: &ExecutionContext, env: &StepEnv) -> Value {
    let (variables, step_outputs) = ctx.consistent_snapshot().await;
    let scope = Scope { env: &ctx.env, variables: &variables, step_outputs: &step_outputs };
    resolve_value_deep(template, &env.resolver, &scope)
}

fn resolve_value_deep(value: &Value, resolver: &ValueResolver, scope: &Scope) -> Value {
    match value {
        Value::String(s) => resolver.resolve_nested(s, scope).unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value_deep(v, resolver, scope)).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), resolve_value_deep(v, resolver, scope))).collect()),
        other => other.clone(),
    }
}

async fn dispatch_with_retry(step: &Step, ctx: &ExecutionContext, env: &StepEnv, cancel: &CancellationToken) -> StepResult {
    match &step.action {
        StepAction::Parallel { children, wait_for_all, fail_fast, max_concurrent } => {
            return execute_parallel(step, children, *wait_for_all, *fail_fast, *max_concurrent, ctx, env, cancel).await;
        }
        StepAction::SubFlow { flow_ref, input, inherit_env } => {
            return execute_sub_flow(step, flow_ref, input, *inherit_env, ctx, env, cancel).await;
        }
        StepAction::WaitUntil { condition, max_duration_ms, interval_ms, on_timeout, children } => {
            return execute_wait_until(step, condition, *max_duration_ms, *interval_ms, *on_timeout, children, ctx, env, cancel).await;
        }
        StepAction::MockServerStop { handle } => {
            let resolved = resolve_config(&Value::String(handle.clone()), ctx, env).await;
            let resolved_handle = resolved.as_display_string();
            let result = crate::mock_server::stop(&resolved_handle).await;
            if result.status == StepStatus::Passed {
                ctx.untrack_mock_server(&resolved_handle);
            }
            return result;
        }
        _ => {}
    }

    let action_name = step.action_name();
    let Some(handler) = env.registry.get(action_name) else {
        return StepResult::failed(format!("unknown_action: {}", action_name), 0, 0);
    };
    let config_template = resolved_config_for_snapshot(step);

    let retry = &step.meta.retry;
    let mut attempt: u32 = 0;
    let max_attempts = retry.max_attempts.max(1);
    let started = Instant::now();
    loop {
        attempt += 1;
        let resolved = resolve_config(&config_template, ctx, env).await;
        let timeout_ms = step.meta.timeout_ms.unwrap_or(0);
        let attempt_cancel = cancel.child_token();

        let dispatch = handler.execute(&resolved, ctx, attempt_cancel.clone());
        let (outcome, timed_out) = if timeout_ms == 0 {
            (dispatch.await, false)
        } else {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), dispatch).await {
                Ok(r) => (r, false),
                Err(_) => {
                    attempt_cancel.cancel();
                    (StepResult::failed(format!("timeout after {}ms", timeout_ms), started.elapsed().as_millis() as u64, attempt - 1), true)
                }
            }
        };

        if outcome.status == StepStatus::Passed {
            let mut r = outcome;
            r.duration_ms = started.elapsed().as_millis() as u64;
            r.retries_used = attempt - 1;
            return r;
        }
        if outcome.status == StepStatus::Cancelled {
            return outcome;
        }

        let error_message = outcome.error.clone().unwrap_or_default();
        let retryable = attempt < max_attempts && retry.allows_retry(&error_message);
        if !retryable {
            // Only a timeout that is the step's final outcome (no retries
            // left to still succeed) is the "handler cancellation due to
            // timeout" on_timeout exists to react to.
            if timed_out {
                for on_timeout_step in &step.meta.on_timeout {
                    let _ = execute_step(on_timeout_step, ctx, env, cancel.clone()).await;
                }
            }
            let mut r = outcome;
            r.duration_ms = started.elapsed().as_millis() as u64;
            r.retries_used = attempt - 1;
            return r;
        }

        warn!("step {} attempt {} failed, retrying: {}", step.id(), attempt, error_message);
        let delay = retry.delay_for_attempt(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return StepResult::cancelled(),
        }
    }
}

async fn apply_assertions(step: &Step, mut result: StepResult, ctx: &ExecutionContext, env: &StepEnv) -> StepResult {
    if step.meta.assertions.is_empty() || result.status != StepStatus::Passed {
        return result;
    }
    let (variables, mut step_outputs) = ctx.consistent_snapshot().await;
    step_outputs.insert(step.id().to_string(), result.output.clone());
    let scope = Scope { env: &ctx.env, variables: &variables, step_outputs: &step_outputs };

    let mut failed = Vec::new();
    for assertion_cfg in &step.meta.assertions {
        match assertion::evaluate(&assertion_cfg.expression, &env.resolver, &scope) {
            Ok(true) => {}
            Ok(false) => failed.push(assertion_cfg.expression.clone()),
            Err(e) => failed.push(format!("{}: {}", assertion_cfg.expression, e.0)),
        }
    }
    if !failed.is_empty() {
        result.status = StepStatus::Failed;
        result.assertions_failed = failed;
        result.error = Some("assertion failed".to_string());
    }
    result
}

async fn extract_save_as(step: &Step, result: StepResult, ctx: &ExecutionContext, env: &StepEnv) -> StepResult {
    if step.meta.save_as.is_empty() {
        return result;
    }
    let (variables, mut step_outputs) = ctx.consistent_snapshot().await;
    step_outputs.insert(step.id().to_string(), result.output.clone());
    let scope = Scope { env: &ctx.env, variables: &variables, step_outputs: &step_outputs };

    for (name, expr) in &step.meta.save_as {
        let value = env.resolver.resolve_nested(expr, &scope).unwrap_or(Value::Null);
        ctx.set_variable(name.clone(), value).await;
    }
    result
}

async fn handle_error_branch(step: &Step, mut result: StepResult, ctx: &ExecutionContext, env: &StepEnv, cancel: &CancellationToken) -> StepResult {
    if result.status != StepStatus::Failed {
        ctx.set_step_output(step.id().to_string(), result.output.clone()).await;
        return result;
    }

    for error_step in &step.meta.error_steps {
        let _ = execute_step(error_step, ctx, env, cancel.clone()).await;
    }

    match step.meta.on_error {
        OnError::Continue => {
            let mut output = match result.output {
                Value::Object(map) => map,
                _ => BTreeMap::new(),
            };
            output.insert("error_recovered".to_string(), Value::Bool(true));
            result.output = Value::Object(output);
            result.status = StepStatus::Passed;
        }
        OnError::Fail | OnError::Retry => {}
    }

    ctx.set_step_output(step.id().to_string(), result.output.clone()).await;
    result
}

async fn execute_parallel(
    step: &Step,
    children: &[Step],
    wait_for_all: bool,
    fail_fast: bool,
    max_concurrent: u32,
    ctx: &ExecutionContext,
    env: &StepEnv,
    cancel: &CancellationToken,
) -> StepResult {
    let started = Instant::now();
    let group_cancel = cancel.child_token();
    let limit = if max_concurrent == 0 { children.len().max(1) } else { max_concurrent as usize };
    let semaphore = Arc::new(tokio::sync::Semaphore::new(limit));

    let ctx_owned = ctx.clone();
    let env_owned = env.clone();
    let mut set: JoinSet<(String, StepResult)> = JoinSet::new();
    for child in children.iter().cloned() {
        let permit_sem = Arc::clone(&semaphore);
        let ctx = ctx_owned.clone();
        let env = env_owned.clone();
        let child_cancel = group_cancel.child_token();
        set.spawn(async move {
            let _permit = permit_sem.acquire().await.ok();
            let child_id = child.id().to_string();
            let result = execute_step(&child, &ctx, &env, child_cancel).await;
            (child_id, result)
        });
    }

    let mut outputs = BTreeMap::new();
    let mut any_failed = false;
    let mut any_passed = false;
    while let Some(joined) = set.join_next().await {
        let (child_id, result) = match joined {
            Ok(pair) => pair,
            Err(e) => ("join_error".to_string(), StepResult::failed(e.to_string(), 0, 0)),
        };
        let failed = result.status == StepStatus::Failed;
        let passed = result.status == StepStatus::Passed;
        outputs.insert(child_id, serde_json::to_value(&result).map(Value::from_json).unwrap_or(Value::Null));
        any_failed |= failed;
        any_passed |= passed;

        if fail_fast && failed {
            group_cancel.cancel();
        }
        if !wait_for_all && passed {
            group_cancel.cancel();
            break;
        }
    }

    let status = if !wait_for_all {
        if any_passed { StepStatus::Passed } else { StepStatus::Failed }
    } else if any_failed {
        StepStatus::Failed
    } else {
        StepStatus::Passed
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    match status {
        StepStatus::Passed => StepResult::passed(Value::Object(outputs), duration_ms, 0),
        _ => {
            let mut r = StepResult::failed(format!("parallel step {} had a failing child", step.id()), duration_ms, 0);
            r.output = Value::Object(outputs);
            r
        }
    }
}

async fn execute_sub_flow(
    step: &Step,
    flow_ref: &str,
    input: &BTreeMap<String, String>,
    inherit_env: bool,
    ctx: &ExecutionContext,
    env: &StepEnv,
    cancel: &CancellationToken,
) -> StepResult {
    let started = Instant::now();
    let flow = match env.flow_provider.get_flow(flow_ref) {
        Ok(f) => f,
        Err(e) => return StepResult::failed(e.to_string(), started.elapsed().as_millis() as u64, 0),
    };

    let (variables, step_outputs) = ctx.consistent_snapshot().await;
    let scope = Scope { env: &ctx.env, variables: &variables, step_outputs: &step_outputs };
    let resolved_input: BTreeMap<String, Value> = input
        .iter()
        .map(|(k, v)| (k.clone(), env.resolver.resolve_nested(v, &scope).unwrap_or(Value::Null)))
        .collect();

    let sub_ctx = ctx.for_sub_flow(resolved_input, inherit_env, variables);
    let sub_result = crate::flow_runner::run_flow(&flow, sub_ctx.clone(), env.clone(), cancel.child_token()).await;

    let mut output = BTreeMap::new();
    output.insert("flow.status".to_string(), Value::String(format!("{:?}", sub_result.status).to_lowercase()));
    output.insert("flow.output".to_string(), Value::Object(sub_result.variables.clone()));
    output.insert("flow.duration".to_string(), Value::Number(sub_result.duration_ms as f64));

    let duration_ms = started.elapsed().as_millis() as u64;
    match sub_result.status {
        FlowStatus::Passed => StepResult::passed(Value::Object(output), duration_ms, 0),
        FlowStatus::Failed => {
            let mut r = StepResult::failed(format!("sub-flow '{}' failed", flow_ref), duration_ms, 0);
            r.output = Value::Object(output);
            r
        }
    }
}

async fn execute_wait_until(
    step: &Step,
    condition: &str,
    max_duration_ms: u64,
    interval_ms: u64,
    on_timeout: WaitUntilTimeout,
    children: &[Step],
    ctx: &ExecutionContext,
    env: &StepEnv,
    cancel: &CancellationToken,
) -> StepResult {
    let started = Instant::now();
    let deadline = started + Duration::from_millis(max_duration_ms);
    let mut iterations: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return StepResult::cancelled();
        }
        for child in children {
            let r = execute_step(child, ctx, env, cancel.child_token()).await;
            if r.status == StepStatus::Cancelled {
                return r;
            }
        }
        iterations += 1;

        let (variables, step_outputs) = ctx.consistent_snapshot().await;
        let scope = Scope { env: &ctx.env, variables: &variables, step_outputs: &step_outputs };
        let condition_true = assertion::evaluate(condition, &env.resolver, &scope).unwrap_or(false);
        if condition_true {
            return StepResult::passed(Value::object([("iterations".to_string(), Value::from(iterations as i64))]), started.elapsed().as_millis() as u64, 0);
        }

        if Instant::now() >= deadline {
            return match on_timeout {
                WaitUntilTimeout::Continue => StepResult::passed(
                    Value::object([("iterations".to_string(), Value::from(iterations as i64))]),
                    started.elapsed().as_millis() as u64,
                    0,
                ),
                WaitUntilTimeout::Fail => {
                    error!("wait_until step {} timed out after {} iterations", step.id(), iterations);
                    StepResult::failed("polling_timeout".to_string(), started.elapsed().as_millis() as u64, 0)
                }
            };
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
            _ = cancel.cancelled() => return StepResult::cancelled(),
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
