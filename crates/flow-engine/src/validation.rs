//! Flow document validation, run once at load time before a flow is ever
//! executed (§6: "unknown action tags fail validation at load time").
//!
//! Structural shape is checked with a hand-authored JSON Schema via
//! `jsonschema`; action tags are additionally cross-checked against the
//! live `ActionRegistry` so a flow referencing a handler nobody registered
//! fails fast instead of erroring mid-run.

use crate::registry::ActionRegistry;
use flow_core::model::{Flow, Step, StepAction};
use once_cell::sync::Lazy;
use serde_json::json;
use std::collections::{HashMap, HashSet};

static FLOW_SCHEMA: Lazy<serde_json::Value> = Lazy::new(flow_schema);

const CONTROL_FLOW_ACTIONS: &[&str] = &["parallel", "sub_flow", "wait_until", "mock_server_stop"];

fn flow_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "required": ["id", "name", "steps"],
        "properties": {
            "id": { "type": "string", "minLength": 1 },
            "name": { "type": "string", "minLength": 1 },
            "environment": { "type": ["string", "null"] },
            "setup": { "type": "array", "items": { "$ref": "#/$defs/step" } },
            "steps": { "type": "array", "items": { "$ref": "#/$defs/step" } },
            "teardown": { "type": "array", "items": { "$ref": "#/$defs/step" } }
        },
        "$defs": {
            "step": {
                "type": "object",
                "required": ["id", "name", "action"],
                "properties": {
                    "id": { "type": "string", "minLength": 1 },
                    "name": { "type": "string" },
                    "action": { "type": "string" }
                }
            }
        }
    })
}

#[derive(Debug)]
pub struct ValidationErrors(pub Vec<String>);

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "flow validation failed: {}", self.0.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Validates a flow document's shape and its action tags against `registry`.
/// `flow` is the already-parsed structure so a caller validating a document
/// still in YAML can round-trip it through serde first.
pub fn validate_flow(flow: &Flow, registry: &ActionRegistry) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    let instance = serde_json::to_value(flow).unwrap_or(serde_json::Value::Null);
    if let Ok(compiled) = jsonschema::JSONSchema::compile(&FLOW_SCHEMA) {
        if let Err(validation_errors) = compiled.validate(&instance) {
            errors.extend(validation_errors.map(|e| e.to_string()));
        }
    }

    let mut seen_ids = HashSet::new();
    walk_steps(&flow.setup, registry, &mut seen_ids, &mut errors);
    walk_steps(&flow.steps, registry, &mut seen_ids, &mut errors);
    walk_steps(&flow.teardown, registry, &mut seen_ids, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

/// Recursively checks every step in `steps` — including steps nested inside
/// `parallel`/`wait_until` children and `error_steps`/`on_timeout` branches —
/// for duplicate ids and unknown action tags, and checks each `parallel`
/// group's children for colliding `save_as` keys.
fn walk_steps(steps: &[Step], registry: &ActionRegistry, seen_ids: &mut HashSet<String>, errors: &mut Vec<String>) {
    for step in steps {
        if !seen_ids.insert(step.id().to_string()) {
            errors.push(format!("duplicate step id: {}", step.id()));
        }
        let action = step.action_name();
        if !CONTROL_FLOW_ACTIONS.contains(&action) && !registry.contains(action) {
            errors.push(format!("unknown action '{}' on step '{}'", action, step.id()));
        }

        walk_steps(&step.meta.error_steps, registry, seen_ids, errors);
        walk_steps(&step.meta.on_timeout, registry, seen_ids, errors);

        match &step.action {
            StepAction::Parallel { children, .. } => {
                check_save_as_collisions(children, errors);
                walk_steps(children, registry, seen_ids, errors);
            }
            StepAction::WaitUntil { children, .. } => {
                walk_steps(children, registry, seen_ids, errors);
            }
            _ => {}
        }
    }
}

/// §8's testable property: no two children of the same `parallel` group may
/// write the same `save_as` key.
fn check_save_as_collisions(children: &[Step], errors: &mut Vec<String>) {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    for child in children {
        for key in child.meta.save_as.keys() {
            match owners.get(key.as_str()) {
                Some(owner) => errors.push(format!(
                    "parallel children '{}' and '{}' both write save_as key '{}'",
                    owner,
                    child.id(),
                    key
                )),
                None => {
                    owners.insert(key.as_str(), child.id());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::model::{OnError, RetryConfig, StepMeta};
    use flow_core::value::Value;

    fn step(id: &str, action: StepAction) -> Step {
        step_with_save_as(id, action, &[])
    }

    fn step_with_save_as(id: &str, action: StepAction, save_as: &[(&str, &str)]) -> Step {
        Step {
            meta: StepMeta {
                id: id.to_string(),
                name: id.to_string(),
                timeout_ms: None,
                retry: RetryConfig::default(),
                assertions: vec![],
                save_as: save_as.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                on_error: OnError::Fail,
                error_steps: vec![],
                on_timeout: vec![],
                depends_on: vec![],
            },
            action,
        }
    }

    #[test]
    fn rejects_unknown_action_tags() {
        let registry = crate::handlers::default_registry();
        let flow = Flow {
            id: "f1".to_string(),
            name: "f1".to_string(),
            environment: None,
            setup: vec![],
            steps: vec![step("s1", StepAction::Http { config: Value::Null })],
            teardown: vec![],
        };
        assert!(validate_flow(&flow, &registry).is_ok());
    }

    #[test]
    fn rejects_duplicate_step_ids() {
        let registry = crate::handlers::default_registry();
        let flow = Flow {
            id: "f1".to_string(),
            name: "f1".to_string(),
            environment: None,
            setup: vec![],
            steps: vec![step("dup", StepAction::Http { config: Value::Null }), step("dup", StepAction::Log { config: Value::Null })],
            teardown: vec![],
        };
        let err = validate_flow(&flow, &registry).unwrap_err();
        assert!(err.0.iter().any(|e| e.contains("duplicate step id")));
    }

    #[test]
    fn rejects_duplicate_step_ids_nested_inside_a_parallel_group() {
        let registry = crate::handlers::default_registry();
        let parallel = step(
            "p1",
            StepAction::Parallel {
                children: vec![
                    step("dup", StepAction::Http { config: Value::Null }),
                    step("dup", StepAction::Log { config: Value::Null }),
                ],
                wait_for_all: true,
                fail_fast: false,
                max_concurrent: 0,
            },
        );
        let flow = Flow { id: "f1".to_string(), name: "f1".to_string(), environment: None, setup: vec![], steps: vec![parallel], teardown: vec![] };
        let err = validate_flow(&flow, &registry).unwrap_err();
        assert!(err.0.iter().any(|e| e.contains("duplicate step id")));
    }

    #[test]
    fn rejects_colliding_save_as_keys_among_parallel_siblings() {
        let registry = crate::handlers::default_registry();
        let parallel = step(
            "p1",
            StepAction::Parallel {
                children: vec![
                    step_with_save_as("a", StepAction::Http { config: Value::Null }, &[("result", "${a.body}")]),
                    step_with_save_as("b", StepAction::Log { config: Value::Null }, &[("result", "${b.message}")]),
                ],
                wait_for_all: true,
                fail_fast: false,
                max_concurrent: 0,
            },
        );
        let flow = Flow { id: "f1".to_string(), name: "f1".to_string(), environment: None, setup: vec![], steps: vec![parallel], teardown: vec![] };
        let err = validate_flow(&flow, &registry).unwrap_err();
        assert!(err.0.iter().any(|e| e.contains("save_as key 'result'")));
    }

    #[test]
    fn distinct_save_as_keys_among_parallel_siblings_are_accepted() {
        let registry = crate::handlers::default_registry();
        let parallel = step(
            "p1",
            StepAction::Parallel {
                children: vec![
                    step_with_save_as("a", StepAction::Http { config: Value::Null }, &[("a_result", "${a.body}")]),
                    step_with_save_as("b", StepAction::Log { config: Value::Null }, &[("b_result", "${b.message}")]),
                ],
                wait_for_all: true,
                fail_fast: false,
                max_concurrent: 0,
            },
        );
        let flow = Flow { id: "f1".to_string(), name: "f1".to_string(), environment: None, setup: vec![], steps: vec![parallel], teardown: vec![] };
        assert!(validate_flow(&flow, &registry).is_ok());
    }
}
