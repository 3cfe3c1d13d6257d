//! Transform action handler: pure `Value -> Value` reshaping, no I/O.
//!
//! Config shape: `{ input, operation: "pick"|"map_keys"|"merge"|"identity",
//! ... operation-specific fields }`. `input` is already resolved by the
//! time it reaches here, so this handler never touches the context.

use crate::context::ExecutionContext;
use crate::registry::ActionHandler;
use async_trait::async_trait;
use flow_core::model::StepResult;
use flow_core::value::Value;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct TransformHandler;

fn apply(config: &Value) -> Result<Value, String> {
    let input = config.get_path("input").cloned().unwrap_or(Value::Null);
    let operation = config.get_path("operation").map(|v| v.as_display_string()).unwrap_or_else(|| "identity".to_string());

    match operation.as_str() {
        "identity" => Ok(input),
        "pick" => {
            let Value::Object(map) = &input else { return Err("pick requires an object input".to_string()) };
            let keys: Vec<String> = match config.get_path("keys") {
                Some(Value::Array(items)) => items.iter().map(|v| v.as_display_string()).collect(),
                _ => return Err("pick requires 'keys'".to_string()),
            };
            let picked: BTreeMap<String, Value> = keys.into_iter().filter_map(|k| map.get(&k).map(|v| (k, v.clone()))).collect();
            Ok(Value::Object(picked))
        }
        "merge" => {
            let Value::Object(base) = &input else { return Err("merge requires an object input".to_string()) };
            let mut merged = base.clone();
            if let Some(Value::Object(overlay)) = config.get_path("with") {
                for (k, v) in overlay {
                    merged.insert(k.clone(), v.clone());
                }
            }
            Ok(Value::Object(merged))
        }
        "map_keys" => {
            let Value::Object(map) = &input else { return Err("map_keys requires an object input".to_string()) };
            let Some(Value::Object(rename)) = config.get_path("rename") else { return Err("map_keys requires 'rename'".to_string()) };
            let mapped: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| {
                    let new_key = rename.get(k).map(|v| v.as_display_string()).unwrap_or_else(|| k.clone());
                    (new_key, v.clone())
                })
                .collect();
            Ok(Value::Object(mapped))
        }
        other => Err(format!("unknown transform operation: {}", other)),
    }
}

#[async_trait]
impl ActionHandler for TransformHandler {
    async fn execute(&self, config: &Value, _context: &ExecutionContext, _cancel: CancellationToken) -> StepResult {
        let started = Instant::now();
        match apply(config) {
            Ok(output) => StepResult::passed(output, started.elapsed().as_millis() as u64, 0),
            Err(e) => StepResult::failed(e, started.elapsed().as_millis() as u64, 0),
        }
    }

    fn name(&self) -> &'static str {
        "transform"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn picks_requested_keys() {
        let handler = TransformHandler;
        let ctx = ExecutionContext::new(Default::default(), Default::default());
        let config = Value::object([
            ("operation".to_string(), Value::from("pick")),
            ("input".to_string(), Value::object([("a".to_string(), Value::from(1i64)), ("b".to_string(), Value::from(2i64))])),
            ("keys".to_string(), Value::Array(vec![Value::from("a")])),
        ]);
        let result = handler.execute(&config, &ctx, CancellationToken::new()).await;
        assert_eq!(result.output.get_path("a"), Some(&Value::from(1i64)));
        assert_eq!(result.output.get_path("b"), None);
    }
}
