//! DB-Poll action handler: executes a query at `interval_ms` until a
//! condition holds or `timeout_ms` elapses (§4.6 DBPoll).
//!
//! Config shape: `{ connection, query, params?, interval_ms, timeout_ms,
//! condition: { type, column?, value? } }` where `type` is one of
//! `row_exists | row_count | value_equals | value_not_null`.

use super::database::run_query;
use crate::context::ExecutionContext;
use crate::registry::ActionHandler;
use async_trait::async_trait;
use flow_core::model::StepResult;
use flow_core::value::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub struct DbPollHandler;

fn condition_met(condition: &Value, rows: &[std::collections::BTreeMap<String, Value>]) -> bool {
    let kind = condition.get_path("type").map(|v| v.as_display_string()).unwrap_or_default();
    match kind.as_str() {
        "row_exists" => !rows.is_empty(),
        "row_count" => {
            let expected = condition.get_path("value").and_then(|v| v.as_f64()).unwrap_or(-1.0);
            rows.len() as f64 == expected
        }
        "value_equals" => {
            let column = condition.get_path("column").map(|v| v.as_display_string()).unwrap_or_default();
            let expected = condition.get_path("value").cloned().unwrap_or(Value::Null);
            rows.first().and_then(|r| r.get(&column)).map(|v| *v == expected).unwrap_or(false)
        }
        "value_not_null" => {
            let column = condition.get_path("column").map(|v| v.as_display_string()).unwrap_or_default();
            rows.first().and_then(|r| r.get(&column)).map(|v| !v.is_null()).unwrap_or(false)
        }
        _ => false,
    }
}

#[async_trait]
impl ActionHandler for DbPollHandler {
    async fn execute(&self, config: &Value, _context: &ExecutionContext, cancel: CancellationToken) -> StepResult {
        let started = Instant::now();
        let Some(connection) = config.get_path("connection").map(|v| v.as_display_string()) else {
            return StepResult::failed("db_poll requires 'connection'", started.elapsed().as_millis() as u64, 0);
        };
        let Some(query) = config.get_path("query").map(|v| v.as_display_string()) else {
            return StepResult::failed("db_poll requires 'query'", started.elapsed().as_millis() as u64, 0);
        };
        let condition = config.get_path("condition").cloned().unwrap_or(Value::Null);
        let params: Vec<Value> = match config.get_path("params") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        let interval_ms = config.get_path("interval_ms").and_then(|v| v.as_f64()).unwrap_or(200.0) as u64;
        let timeout_ms = config.get_path("timeout_ms").and_then(|v| v.as_f64()).unwrap_or(5000.0) as u64;
        let deadline = started + Duration::from_millis(timeout_ms);

        loop {
            match run_query(&connection, &query, &params).await {
                Ok(rows) => {
                    if condition_met(&condition, &rows) {
                        let output = Value::object([("rows".to_string(), Value::Array(rows.into_iter().map(Value::Object).collect()))]);
                        return StepResult::passed(output, started.elapsed().as_millis() as u64, 0);
                    }
                }
                Err(e) => return StepResult::failed(format!("db_poll query failed: {}", e), started.elapsed().as_millis() as u64, 0),
            }
            if Instant::now() >= deadline {
                return StepResult::failed("polling_timeout", started.elapsed().as_millis() as u64, 0);
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                _ = cancel.cancelled() => return StepResult::cancelled(),
            }
        }
    }

    fn name(&self) -> &'static str {
        "db_poll"
    }
}
