//! Database action handler.
//!
//! Config shape: `{ connection, query, params? }`. Uses `rusqlite` via
//! `tokio_rusqlite::Connection`, carried over from the teacher's own
//! storage stack (the deleted `fluent-storage` member pinned the same
//! crate) rather than introducing a new SQL client dependency.

use crate::context::ExecutionContext;
use crate::registry::ActionHandler;
use async_trait::async_trait;
use flow_core::model::StepResult;
use flow_core::value::Value;
use rusqlite::types::Value as SqlValue;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct DatabaseHandler;

pub async fn run_query(connection: &str, query: &str, params: &[Value]) -> Result<Vec<std::collections::BTreeMap<String, Value>>, String> {
    let conn = tokio_rusqlite::Connection::open(connection.to_string()).await.map_err(|e| e.to_string())?;
    let query = query.to_string();
    let params: Vec<SqlValue> = params.iter().map(value_to_sql).collect();
    conn.call(move |conn| {
        let mut stmt = conn.prepare(&query)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            let mut map = std::collections::BTreeMap::new();
            for (idx, name) in column_names.iter().enumerate() {
                let value: SqlValue = row.get(idx)?;
                map.insert(name.clone(), sql_to_value(value));
            }
            Ok(map)
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
    })
    .await
    .map_err(|e| e.to_string())
}

fn value_to_sql(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        Value::Number(n) => SqlValue::Real(*n),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.as_display_string()),
    }
}

fn sql_to_value(v: SqlValue) -> Value {
    match v {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Number(i as f64),
        SqlValue::Real(f) => Value::Number(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b)),
    }
}

#[async_trait]
impl ActionHandler for DatabaseHandler {
    async fn execute(&self, config: &Value, _context: &ExecutionContext, cancel: CancellationToken) -> StepResult {
        let started = Instant::now();
        let Some(connection) = config.get_path("connection").map(|v| v.as_display_string()) else {
            return StepResult::failed("database step requires 'connection'", started.elapsed().as_millis() as u64, 0);
        };
        let Some(query) = config.get_path("query").map(|v| v.as_display_string()) else {
            return StepResult::failed("database step requires 'query'", started.elapsed().as_millis() as u64, 0);
        };
        let params: Vec<Value> = match config.get_path("params") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        tokio::select! {
            result = run_query(&connection, &query, &params) => match result {
                Ok(rows) => {
                    let output = Value::object([(
                        "rows".to_string(),
                        Value::Array(rows.into_iter().map(Value::Object).collect()),
                    )]);
                    StepResult::passed(output, started.elapsed().as_millis() as u64, 0)
                }
                Err(e) => StepResult::failed(format!("database query failed: {}", e), started.elapsed().as_millis() as u64, 0),
            },
            _ = cancel.cancelled() => StepResult::cancelled(),
        }
    }

    fn name(&self) -> &'static str {
        "database"
    }
}
