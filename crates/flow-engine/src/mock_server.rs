//! Mock Server: named, in-process HTTP servers started and stopped by
//! `mock_server_start`/`mock_server_stop` steps (§6 Mock Server
//! configuration). Built on `axum`, since the teacher's pack carries it
//! for its own HTTP surfaces and a fallback-routed handler is the natural
//! way to serve data-described (rather than compile-time) endpoints.
//!
//! Endpoint selection per request: first enabled endpoint whose method and
//! path pattern match, then whose `match` constraints all hold, then the
//! first scenario whose condition evaluates true against the server's
//! current state, falling back to the endpoint's default response.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use flow_core::assertion;
use flow_core::model::StepResult;
use flow_core::resolver::{Scope, ValueResolver};
use flow_core::value::Value;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct EndpointRuntime {
    config: Value,
    call_count: AtomicU64,
}

struct ServerInner {
    name: String,
    endpoints: Vec<EndpointRuntime>,
    state: Mutex<BTreeMap<String, Value>>,
    enable_cors: bool,
    default_delay_ms: u64,
}

struct RunningServer {
    shutdown: oneshot::Sender<()>,
}

static SERVERS: Lazy<Mutex<BTreeMap<String, RunningServer>>> = Lazy::new(|| Mutex::new(BTreeMap::new()));

fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern_segs: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_segs: Vec<&str> = path.trim_matches('/').split('/').collect();
    if pattern_segs.len() != path_segs.len() {
        return false;
    }
    pattern_segs.iter().zip(path_segs.iter()).all(|(p, s)| p.starts_with('{') && p.ends_with('}') || p == s)
}

fn match_constraints(matcher: Option<&Value>, headers: &HeaderMap, uri: &Uri, body: &str) -> bool {
    let Some(Value::Object(matcher)) = matcher else { return true };
    if let Some(Value::Object(expected_headers)) = matcher.get("headers") {
        for (key, expected) in expected_headers {
            let Some(actual) = headers.get(key).and_then(|v| v.to_str().ok()) else { return false };
            if actual != expected.as_display_string() {
                return false;
            }
        }
    }
    if let Some(Value::Object(expected_query)) = matcher.get("query") {
        let query = uri.query().unwrap_or_default();
        for (key, expected) in expected_query {
            let found = query.split('&').any(|kv| kv == format!("{}={}", key, expected.as_display_string()));
            if !found {
                return false;
            }
        }
    }
    if let Some(substring) = matcher.get("body_contains").map(|v| v.as_display_string()) {
        if !body.contains(&substring) {
            return false;
        }
    }
    if let Some(pattern) = matcher.get("body_regex").map(|v| v.as_display_string()) {
        if let Ok(re) = regex::Regex::new(&pattern) {
            if !re.is_match(body) {
                return false;
            }
        }
    }
    true
}

async fn handle_request(State(inner): State<Arc<ServerInner>>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let body_text = String::from_utf8_lossy(&body).to_string();
    let resolver = ValueResolver::default();

    for endpoint in &inner.endpoints {
        let enabled = endpoint.config.get_path("enabled").map(|v| matches!(v, Value::Bool(true))).unwrap_or(true);
        let Some(ep_method) = endpoint.config.get_path("method").map(|v| v.as_display_string()) else { continue };
        let Some(ep_path) = endpoint.config.get_path("path").map(|v| v.as_display_string()) else { continue };
        if !enabled || !ep_method.eq_ignore_ascii_case(method.as_str()) || !path_matches(&ep_path, uri.path()) {
            continue;
        }
        if let Some(max_calls) = endpoint.config.get_path("max_calls").and_then(|v| v.as_f64()) {
            if endpoint.call_count.load(Ordering::SeqCst) as f64 >= max_calls {
                continue;
            }
        }
        if !match_constraints(endpoint.config.get_path("match"), &headers, &uri, &body_text) {
            continue;
        }

        endpoint.call_count.fetch_add(1, Ordering::SeqCst);

        let response = {
            let state = inner.state.lock().unwrap();
            let empty = BTreeMap::new();
            let scope = Scope { env: &empty, variables: &state, step_outputs: &empty };

            let scenario_response = endpoint
                .config
                .get_path("scenarios")
                .and_then(|v| if let Value::Array(items) = v { Some(items) } else { None })
                .and_then(|scenarios| {
                    scenarios.iter().find(|s| {
                        s.get_path("condition")
                            .map(|v| v.as_display_string())
                            .map(|cond| assertion::evaluate(&cond, &resolver, &scope).unwrap_or(false))
                            .unwrap_or(false)
                    })
                })
                .and_then(|s| s.get_path("response").cloned());

            scenario_response.or_else(|| endpoint.config.get_path("response").cloned()).unwrap_or(Value::Null)
        };

        if let Some(update) = endpoint.config.get_path("update_on_request") {
            if let Value::Object(updates) = update {
                let mut state = inner.state.lock().unwrap();
                for (key, value) in updates {
                    state.insert(key.clone(), value.clone());
                }
            }
        }

        let delay_ms = response.get_path("delay_ms").and_then(|v| v.as_f64()).unwrap_or(inner.default_delay_ms as f64) as u64;
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let status = response.get_path("status").and_then(|v| v.as_f64()).unwrap_or(200.0) as u16;
        let body = response.get_path("body").cloned().unwrap_or(Value::Null);
        let mut builder = Response::builder().status(StatusCode::from_u16(status).unwrap_or(StatusCode::OK));
        if inner.enable_cors {
            builder = builder.header("access-control-allow-origin", "*");
        }
        if let Some(Value::Object(resp_headers)) = response.get_path("headers") {
            for (key, value) in resp_headers {
                builder = builder.header(key.as_str(), value.as_display_string());
            }
        }
        return builder.body(axum::body::Body::from(serde_json::to_vec(&body.to_json()).unwrap_or_default())).unwrap();
    }

    Response::builder().status(StatusCode::NOT_FOUND).body(axum::body::Body::from("no mock endpoint matched")).unwrap()
}

pub async fn start(config: &Value) -> StepResult {
    let started = Instant::now();
    let Some(name) = config.get_path("name").map(|v| v.as_display_string()) else {
        return StepResult::failed("mock_server_start requires 'name'", started.elapsed().as_millis() as u64, 0);
    };
    let port = config.get_path("port").and_then(|v| v.as_f64()).unwrap_or(0.0) as u16;
    let endpoints = match config.get_path("endpoints") {
        Some(Value::Array(items)) => items.iter().map(|config| EndpointRuntime { config: config.clone(), call_count: AtomicU64::new(0) }).collect(),
        _ => Vec::new(),
    };
    let initial_state = match config.get_path("initial_state") {
        Some(Value::Object(map)) => map.clone(),
        _ => BTreeMap::new(),
    };

    let inner = Arc::new(ServerInner {
        name: name.clone(),
        endpoints,
        state: Mutex::new(initial_state),
        enable_cors: config.get_path("enable_cors").map(|v| matches!(v, Value::Bool(true))).unwrap_or(false),
        default_delay_ms: config.get_path("default_delay_ms").and_then(|v| v.as_f64()).unwrap_or(0.0) as u64,
    });

    let app = Router::new().fallback(any(handle_request)).with_state(inner);
    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(l) => l,
        Err(e) => return StepResult::failed(format!("failed to bind mock server '{}': {}", name, e), started.elapsed().as_millis() as u64, 0),
    };
    let bound_addr = listener.local_addr().ok();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    let handle = uuid::Uuid::new_v4().to_string();
    SERVERS.lock().unwrap().insert(handle.clone(), RunningServer { shutdown: shutdown_tx });

    let output = Value::object([
        ("handle".to_string(), Value::String(handle)),
        ("name".to_string(), Value::String(name)),
        ("address".to_string(), Value::String(bound_addr.map(|a| a.to_string()).unwrap_or_default())),
    ]);
    StepResult::passed(output, started.elapsed().as_millis() as u64, 0)
}

pub async fn stop(handle: &str) -> StepResult {
    let started = Instant::now();
    let running = SERVERS.lock().unwrap().remove(handle);
    match running {
        Some(running) => {
            let _ = running.shutdown.send(());
            StepResult::passed(Value::object([("stopped".to_string(), Value::Bool(true))]), started.elapsed().as_millis() as u64, 0)
        }
        None => StepResult::failed(format!("no mock server running for handle '{}'", handle), started.elapsed().as_millis() as u64, 0),
    }
}
