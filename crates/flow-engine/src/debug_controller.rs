//! Debug Controller: per-execution coordinator for pause/resume/step
//! commands, breakpoint evaluation, and the event stream consumed by an
//! outer API surface (§4.8).
//!
//! Mirrors the teacher's message-passing style for coordinating concurrent
//! tasks (bounded mailbox + a single-slot rendezvous) rather than a shared
//! "should I pause?" flag: handlers never observe pause state, only
//! cancellation, so they stay responsive regardless of debug state (§9).

use flow_core::assertion;
use flow_core::model::{Breakpoint, BreakpointType, DebugSession, SessionState, StepSnapshot};
use flow_core::redaction::redact_secrets_in_text;
use flow_core::resolver::ValueResolver;
use flow_core::value::Value;
use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;

pub const MAILBOX_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCommand {
    Pause,
    Resume,
    StepOver,
    Stop,
}

#[derive(Debug, Clone)]
pub enum DebugEvent {
    Started { session_id: String },
    Running { session_id: String, step_id: String },
    Paused { session_id: String, step_id: String, variables: BTreeMap<String, Value> },
    Resumed { session_id: String },
    Step { session_id: String },
    BreakpointHit { session_id: String, breakpoint_id: String },
    LogPoint { session_id: String, message: String },
    Error { session_id: String, step_id: String, message: String },
    Variables { session_id: String, variables: BTreeMap<String, Value> },
    Terminated { session_id: String },
}

/// External sink for debug events (a WebSocket broadcaster in the host
/// system). The trait boundary is the core's public face for observers.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DebugEvent);
}

pub struct NullSink;
impl EventSink for NullSink {
    fn emit(&self, _event: DebugEvent) {}
}

/// Outcome of `OnBeforeStep`: whether the executor should continue, and
/// if not, why.
pub enum BeforeStepOutcome {
    Continue,
    Cancelled,
}

struct Inner {
    session: DebugSession,
    stopped: bool,
}

/// Owns one execution's debug session. `Arc`-shared between the step
/// executor and whatever holds the API-facing command sender.
pub struct DebugController {
    inner: Mutex<Inner>,
    command_tx: mpsc::Sender<DebugCommand>,
    command_rx: Mutex<mpsc::Receiver<DebugCommand>>,
    rendezvous: Notify,
    sink: Arc<dyn EventSink>,
}

impl DebugController {
    pub fn start_session(execution_id: String, flow_id: String, sink: Arc<dyn EventSink>) -> Arc<Self> {
        let session = DebugSession {
            id: uuid::Uuid::new_v4().to_string(),
            execution_id,
            flow_id,
            state: SessionState::Running,
            current_step_id: None,
            breakpoints: BTreeMap::new(),
            variables: BTreeMap::new(),
            step_outputs: BTreeMap::new(),
            started_at_ms: now_ms(),
            paused_at_ms: None,
            step_history: Vec::new(),
        };
        let session_id = session.id.clone();
        let (command_tx, command_rx) = mpsc::channel(MAILBOX_CAPACITY);
        info!("debug session {} started", session_id);
        sink.emit(DebugEvent::Started { session_id });
        Arc::new(DebugController {
            inner: Mutex::new(Inner { session, stopped: false }),
            command_tx,
            command_rx: Mutex::new(command_rx),
            rendezvous: Notify::new(),
            sink,
        })
    }

    pub async fn session(&self) -> DebugSession {
        self.inner.lock().await.session.clone()
    }

    pub async fn add_breakpoint(&self, bp: Breakpoint) {
        self.inner.lock().await.session.breakpoints.insert(bp.id.clone(), bp);
    }

    pub async fn remove_breakpoint(&self, id: &str) {
        self.inner.lock().await.session.breakpoints.remove(id);
    }

    /// Non-blocking: a full mailbox surfaces as an error rather than
    /// blocking the API-side caller (§4.8 critical invariant).
    pub fn send_command(&self, command: DebugCommand) -> Result<(), String> {
        self.command_tx.try_send(command).map_err(|e| e.to_string())
    }

    pub async fn pause(&self) -> Result<(), String> {
        self.send_command(DebugCommand::Pause)
    }

    pub async fn resume(&self) -> Result<(), String> {
        {
            let mut inner = self.inner.lock().await;
            if inner.session.state != SessionState::Paused {
                return Err("session is not paused".to_string());
            }
            inner.session.state = SessionState::Running;
        }
        self.rendezvous.notify_one();
        Ok(())
    }

    pub async fn step_over(&self) -> Result<(), String> {
        {
            let mut inner = self.inner.lock().await;
            if inner.session.state != SessionState::Paused {
                return Err("session is not paused".to_string());
            }
            inner.session.state = SessionState::Stepping;
        }
        self.rendezvous.notify_one();
        Ok(())
    }

    pub fn stop(&self) -> Result<(), String> {
        self.send_command(DebugCommand::Stop)
    }

    pub async fn end_session(&self) {
        let mut inner = self.inner.lock().await;
        inner.stopped = true;
        inner.session.state = SessionState::Terminated;
        let session_id = inner.session.id.clone();
        drop(inner);
        self.rendezvous.notify_waiters();
        self.sink.emit(DebugEvent::Terminated { session_id });
    }

    /// Drains at most one pending command without blocking.
    async fn poll_command(&self) -> Option<DebugCommand> {
        self.command_rx.lock().await.try_recv().ok()
    }

    pub async fn on_before_step(
        &self,
        step_id: &str,
        name: &str,
        _action: &str,
        resolver: &ValueResolver,
        variables: &BTreeMap<String, Value>,
        step_outputs: &BTreeMap<String, Value>,
        cancel: &CancellationToken,
    ) -> BeforeStepOutcome {
        let mut should_pause;
        let session_id;
        {
            let mut inner = self.inner.lock().await;
            inner.session.current_step_id = Some(step_id.to_string());
            if inner.session.state != SessionState::Stepping {
                inner.session.state = SessionState::Running;
            }
            session_id = inner.session.id.clone();
            should_pause = inner.session.state == SessionState::Stepping;

            let scope = flow_core::resolver::Scope { env: &BTreeMap::new(), variables, step_outputs };
            let hits: Vec<(String, bool, Option<String>)> = inner
                .session
                .breakpoints
                .values()
                .filter(|bp| bp.enabled && (bp.step_id.as_deref() == Some(step_id)) && matches!(bp.kind, BreakpointType::Step | BreakpointType::Conditional))
                .map(|bp| {
                    let fires = match bp.kind {
                        BreakpointType::Conditional => bp
                            .condition
                            .as_deref()
                            .map(|c| assertion::evaluate(c, resolver, &scope).unwrap_or(false))
                            .unwrap_or(false),
                        _ => true,
                    };
                    (bp.id.clone(), fires, bp.log_point.clone())
                })
                .collect();

            for (id, fires, log_point) in hits {
                if !fires {
                    continue;
                }
                if let Some(bp) = inner.session.breakpoints.get_mut(&id) {
                    bp.hit_count += 1;
                }
                if let Some(msg) = log_point {
                    self.sink.emit(DebugEvent::LogPoint { session_id: session_id.clone(), message: msg });
                } else {
                    should_pause = true;
                    self.sink.emit(DebugEvent::BreakpointHit { session_id: session_id.clone(), breakpoint_id: id });
                }
            }
        }

        if let Some(DebugCommand::Pause) = self.poll_command().await {
            should_pause = true;
        }

        self.sink.emit(DebugEvent::Running { session_id: session_id.clone(), step_id: step_id.to_string() });
        debug!("OnBeforeStep: {} ({})", name, step_id);

        if !should_pause {
            return BeforeStepOutcome::Continue;
        }

        {
            let mut inner = self.inner.lock().await;
            inner.session.state = SessionState::Paused;
            inner.session.paused_at_ms = Some(now_ms());
        }
        self.sink.emit(DebugEvent::Paused { session_id: session_id.clone(), step_id: step_id.to_string(), variables: redact_variables(variables) });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return BeforeStepOutcome::Cancelled,
                _ = self.rendezvous.notified() => {
                    let mut inner = self.inner.lock().await;
                    if inner.stopped {
                        return BeforeStepOutcome::Cancelled;
                    }
                    let was_stepping = inner.session.state == SessionState::Stepping;
                    inner.session.state = if was_stepping { SessionState::Stepping } else { SessionState::Running };
                    drop(inner);
                    self.sink.emit(if was_stepping {
                        DebugEvent::Step { session_id: session_id.clone() }
                    } else {
                        DebugEvent::Resumed { session_id: session_id.clone() }
                    });
                    return BeforeStepOutcome::Continue;
                }
                command = self.poll_command_blocking() => {
                    match command {
                        DebugCommand::Stop => return BeforeStepOutcome::Cancelled,
                        DebugCommand::Resume | DebugCommand::StepOver => {
                            let mut inner = self.inner.lock().await;
                            inner.session.state = SessionState::Running;
                            drop(inner);
                            self.sink.emit(DebugEvent::Resumed { session_id: session_id.clone() });
                            return BeforeStepOutcome::Continue;
                        }
                        DebugCommand::Pause => continue,
                    }
                }
            }
        }
    }

    async fn poll_command_blocking(&self) -> DebugCommand {
        let recv = self.command_rx.lock().await.recv().await;
        recv.unwrap_or(DebugCommand::Stop)
    }

    pub async fn on_after_step(&self, snapshot: StepSnapshot, failed: bool) {
        let session_id;
        let mut arm_pause = false;
        {
            let mut inner = self.inner.lock().await;
            inner.session.step_outputs.insert(snapshot.step_id.clone(), snapshot.output.clone());
            session_id = inner.session.id.clone();
            let is_assertion_failure = failed && snapshot.error.as_deref() == Some("assertion failed");
            if failed {
                let error_ids: Vec<String> = inner
                    .session
                    .breakpoints
                    .values()
                    .filter(|bp| {
                        bp.enabled
                            && (matches!(bp.kind, BreakpointType::Error)
                                || (is_assertion_failure && matches!(bp.kind, BreakpointType::Assertion)))
                    })
                    .map(|bp| bp.id.clone())
                    .collect();
                for id in error_ids {
                    if let Some(bp) = inner.session.breakpoints.get_mut(&id) {
                        bp.hit_count += 1;
                        if bp.log_point.is_none() {
                            arm_pause = true;
                        }
                    }
                }
            }
            inner.session.step_history.push(snapshot.clone());
        }
        if failed {
            self.sink.emit(DebugEvent::Error { session_id: session_id.clone(), step_id: snapshot.step_id.clone(), message: snapshot.error.clone().unwrap_or_default() });
        }
        if arm_pause {
            let mut inner = self.inner.lock().await;
            inner.session.state = SessionState::Stepping;
        }
        self.sink.emit(DebugEvent::Variables { session_id, variables: redact_variables(&snapshot.variables_snapshot) });
    }
}

/// Redacts every string leaf before a variable dump leaves the process via
/// an event sink (§11: the same treatment Step Snapshots get).
fn redact_variables(variables: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    variables.iter().map(|(k, v)| (k.clone(), redact_value(v))).collect()
}

fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_secrets_in_text(s)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), redact_value(v))).collect()),
        other => other.clone(),
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn step_breakpoint_pauses_and_resume_continues() {
        let controller = DebugController::start_session("exec1".into(), "flow1".into(), Arc::new(NullSink));
        controller
            .add_breakpoint(Breakpoint { id: "bp1".into(), kind: BreakpointType::Step, step_id: Some("s2".into()), condition: None, enabled: true, hit_count: 0, log_point: None })
            .await;

        let resolver = ValueResolver::default();
        let vars = BTreeMap::new();
        let outputs = BTreeMap::new();
        let cancel = CancellationToken::new();

        let controller2 = Arc::clone(&controller);
        let resumer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            controller2.resume().await.unwrap();
        });

        let outcome = controller.on_before_step("s2", "step two", "http", &resolver, &vars, &outputs, &cancel).await;
        assert!(matches!(outcome, BeforeStepOutcome::Continue));
        resumer.await.unwrap();

        let session = controller.session().await;
        assert_eq!(session.breakpoints["bp1"].hit_count, 1);
    }

    #[tokio::test]
    async fn log_point_never_pauses() {
        let controller = DebugController::start_session("exec1".into(), "flow1".into(), Arc::new(NullSink));
        controller
            .add_breakpoint(Breakpoint { id: "bp1".into(), kind: BreakpointType::Step, step_id: Some("s1".into()), condition: None, enabled: true, hit_count: 0, log_point: Some("hello".into()) })
            .await;
        let resolver = ValueResolver::default();
        let vars = BTreeMap::new();
        let outputs = BTreeMap::new();
        let cancel = CancellationToken::new();
        let outcome = controller.on_before_step("s1", "step one", "log", &resolver, &vars, &outputs, &cancel).await;
        assert!(matches!(outcome, BeforeStepOutcome::Continue));
        assert_eq!(controller.session().await.breakpoints["bp1"].hit_count, 1);
    }

    #[tokio::test]
    async fn step_over_on_an_unpaused_session_is_rejected_not_silently_armed() {
        let controller = DebugController::start_session("exec1".into(), "flow1".into(), Arc::new(NullSink));
        assert!(controller.step_over().await.is_err());
        assert_eq!(controller.session().await.state, SessionState::Running);
    }

    #[tokio::test]
    async fn assertion_breakpoint_arms_stepping_on_assertion_failure() {
        let controller = DebugController::start_session("exec1".into(), "flow1".into(), Arc::new(NullSink));
        controller
            .add_breakpoint(Breakpoint { id: "bp1".into(), kind: BreakpointType::Assertion, step_id: None, condition: None, enabled: true, hit_count: 0, log_point: None })
            .await;

        let snapshot = StepSnapshot {
            step_id: "s1".into(),
            step_name: "s1".into(),
            action: "http".into(),
            config: Value::Null,
            input: Value::Null,
            output: Value::Null,
            error: Some("assertion failed".into()),
            duration_ms: 0,
            captured_at_ms: 0,
            variables_snapshot: BTreeMap::new(),
        };
        controller.on_after_step(snapshot, true).await;

        assert_eq!(controller.session().await.breakpoints["bp1"].hit_count, 1);
        assert_eq!(controller.session().await.state, SessionState::Stepping);
    }

    #[tokio::test]
    async fn non_assertion_failures_do_not_trip_assertion_breakpoints() {
        let controller = DebugController::start_session("exec1".into(), "flow1".into(), Arc::new(NullSink));
        controller
            .add_breakpoint(Breakpoint { id: "bp1".into(), kind: BreakpointType::Assertion, step_id: None, condition: None, enabled: true, hit_count: 0, log_point: None })
            .await;

        let snapshot = StepSnapshot {
            step_id: "s1".into(),
            step_name: "s1".into(),
            action: "http".into(),
            config: Value::Null,
            input: Value::Null,
            output: Value::Null,
            error: Some("connection refused".into()),
            duration_ms: 0,
            captured_at_ms: 0,
            variables_snapshot: BTreeMap::new(),
        };
        controller.on_after_step(snapshot, true).await;

        assert_eq!(controller.session().await.breakpoints["bp1"].hit_count, 0);
    }

    #[test]
    fn redact_variables_scrubs_secret_looking_string_values() {
        let mut vars = BTreeMap::new();
        vars.insert("token".to_string(), Value::String("api_key=abc123".to_string()));
        let redacted = redact_variables(&vars);
        assert!(redacted["token"].as_display_string().contains("REDACTED"));
    }
}
