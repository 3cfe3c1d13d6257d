//! Flow/Step data model shared by the engine, the debugger, and the CLI.
//!
//! Mirrors the tagged-step-enum shape the pipeline executor used
//! (`PipelineStep`), generalized to the step kinds this engine dispatches:
//! protocol actions, assertions, and the control-flow constructs
//! (`parallel`, `sub_flow`, `wait_until`, `wait_for`, `db_poll`, mock server).

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    pub environment: Option<String>,
    #[serde(default)]
    pub setup: Vec<Step>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub teardown: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    pub expression: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    #[default]
    Fail,
    Continue,
    Retry,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Constant,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: Backoff,
    pub max_delay_ms: Option<u64>,
    /// Only retry when the error message matches one of these substrings.
    pub retry_on: Option<Vec<String>>,
    /// Never retry when the error message matches one of these substrings.
    pub retry_on_not: Option<Vec<String>>,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff() -> Backoff {
    Backoff::Constant
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            delay_ms: 0,
            backoff: default_backoff(),
            max_delay_ms: None,
            retry_on: None,
            retry_on_not: None,
        }
    }
}

impl RetryConfig {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.delay_ms as f64;
        let computed = match self.backoff {
            Backoff::Constant => base,
            Backoff::Linear => base * attempt as f64,
            Backoff::Exponential => base * 2f64.powi(attempt as i32 - 1),
        };
        let capped = self
            .max_delay_ms
            .map(|m| computed.min(m as f64))
            .unwrap_or(computed);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    pub fn allows_retry(&self, error_message: &str) -> bool {
        if let Some(deny) = &self.retry_on_not {
            if deny.iter().any(|pat| error_message.contains(pat)) {
                return false;
            }
        }
        if let Some(allow) = &self.retry_on {
            return allow.iter().any(|pat| error_message.contains(pat));
        }
        true
    }
}

/// Common fields every step carries, regardless of action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub save_as: BTreeMap<String, String>,
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default)]
    pub error_steps: Vec<Step>,
    #[serde(default)]
    pub on_timeout: Vec<Step>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A step's action and action-specific configuration.
///
/// `config` is resolved (variable-expanded) immediately before dispatch and
/// handed to the handler opaque; control-flow variants carry their nested
/// step lists directly rather than through `config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Http { config: Value },
    Database { config: Value },
    KafkaProduce { config: Value },
    KafkaConsume { config: Value },
    GrpcUnary { config: Value },
    GrpcStream { config: Value },
    WebSocket { config: Value },
    Browser { config: Value },
    Transform { config: Value },
    Log { config: Value },
    Parallel {
        children: Vec<Step>,
        #[serde(default = "default_true")]
        wait_for_all: bool,
        #[serde(default)]
        fail_fast: bool,
        #[serde(default)]
        max_concurrent: u32,
    },
    SubFlow {
        flow_ref: String,
        #[serde(default)]
        input: BTreeMap<String, String>,
        #[serde(default)]
        inherit_env: bool,
    },
    WaitUntil {
        condition: String,
        max_duration_ms: u64,
        interval_ms: u64,
        #[serde(default)]
        on_timeout: WaitUntilTimeout,
        #[serde(default)]
        children: Vec<Step>,
    },
    WaitFor {
        config: Value,
    },
    DbPoll {
        config: Value,
    },
    MockServerStart {
        config: Value,
    },
    MockServerStop {
        handle: String,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntilTimeout {
    #[default]
    Fail,
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub meta: StepMeta,
    #[serde(flatten)]
    pub action: StepAction,
}

impl Step {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn action_name(&self) -> &'static str {
        match &self.action {
            StepAction::Http { .. } => "http",
            StepAction::Database { .. } => "database",
            StepAction::KafkaProduce { .. } => "kafka_produce",
            StepAction::KafkaConsume { .. } => "kafka_consume",
            StepAction::GrpcUnary { .. } => "grpc_unary",
            StepAction::GrpcStream { .. } => "grpc_stream",
            StepAction::WebSocket { .. } => "websocket",
            StepAction::Browser { .. } => "browser",
            StepAction::Transform { .. } => "transform",
            StepAction::Log { .. } => "log",
            StepAction::Parallel { .. } => "parallel",
            StepAction::SubFlow { .. } => "sub_flow",
            StepAction::WaitUntil { .. } => "wait_until",
            StepAction::WaitFor { .. } => "wait_for",
            StepAction::DbPoll { .. } => "db_poll",
            StepAction::MockServerStart { .. } => "mock_server_start",
            StepAction::MockServerStop { .. } => "mock_server_stop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    #[serde(default)]
    pub output: Value,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub retries_used: u32,
    #[serde(default)]
    pub assertions_failed: Vec<String>,
    #[serde(default)]
    pub started_at_ms: u64,
    #[serde(default)]
    pub finished_at_ms: u64,
}

impl StepResult {
    pub fn passed(output: Value, duration_ms: u64, retries_used: u32) -> Self {
        let finished_at_ms = now_ms();
        StepResult {
            status: StepStatus::Passed,
            output,
            error: None,
            duration_ms,
            retries_used,
            assertions_failed: Vec::new(),
            started_at_ms: finished_at_ms.saturating_sub(duration_ms),
            finished_at_ms,
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: u64, retries_used: u32) -> Self {
        let finished_at_ms = now_ms();
        StepResult {
            status: StepStatus::Failed,
            output: Value::Null,
            error: Some(error.into()),
            duration_ms,
            retries_used,
            assertions_failed: Vec::new(),
            started_at_ms: finished_at_ms.saturating_sub(duration_ms),
            finished_at_ms,
        }
    }

    pub fn cancelled() -> Self {
        let finished_at_ms = now_ms();
        StepResult {
            status: StepStatus::Cancelled,
            output: Value::Null,
            error: Some("cancelled".to_string()),
            duration_ms: 0,
            retries_used: 0,
            assertions_failed: Vec::new(),
            started_at_ms: finished_at_ms,
            finished_at_ms,
        }
    }

    pub fn skipped() -> Self {
        let finished_at_ms = now_ms();
        StepResult {
            status: StepStatus::Skipped,
            output: Value::Null,
            error: None,
            duration_ms: 0,
            retries_used: 0,
            assertions_failed: Vec::new(),
            started_at_ms: finished_at_ms,
            finished_at_ms,
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Append-only history entry captured after each step terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub step_id: String,
    pub step_name: String,
    pub action: String,
    pub config: Value,
    /// Config after `${...}` resolution, i.e. what the handler actually saw.
    #[serde(default)]
    pub input: Value,
    pub output: Value,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub captured_at_ms: u64,
    pub variables_snapshot: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowResult {
    pub flow_id: String,
    pub status: FlowStatus,
    pub step_results: BTreeMap<String, StepResult>,
    pub variables: BTreeMap<String, Value>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointType {
    Step,
    Conditional,
    Error,
    Assertion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BreakpointType,
    pub step_id: Option<String>,
    pub condition: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub hit_count: u64,
    #[serde(default)]
    pub log_point: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Paused,
    Stepping,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugSession {
    pub id: String,
    pub execution_id: String,
    pub flow_id: String,
    pub state: SessionState,
    pub current_step_id: Option<String>,
    pub breakpoints: BTreeMap<String, Breakpoint>,
    pub variables: BTreeMap<String, Value>,
    pub step_outputs: BTreeMap<String, Value>,
    pub started_at_ms: u64,
    pub paused_at_ms: Option<u64>,
    pub step_history: Vec<StepSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_result_constructors_stamp_started_and_finished_at() {
        let r = StepResult::passed(Value::Null, 50, 0);
        assert!(r.finished_at_ms >= r.started_at_ms);
        assert_eq!(r.finished_at_ms - r.started_at_ms, 50);

        let r = StepResult::failed("boom", 0, 0);
        assert_eq!(r.started_at_ms, r.finished_at_ms);

        let r = StepResult::cancelled();
        assert_eq!(r.started_at_ms, r.finished_at_ms);

        let r = StepResult::skipped();
        assert_eq!(r.started_at_ms, r.finished_at_ms);
    }
}
