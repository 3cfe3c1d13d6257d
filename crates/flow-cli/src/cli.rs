//! Command-line surface for the flow engine: a demo/test harness, not a
//! product CLI (the outer API/CLI layer the engine serves is out of
//! scope for this core) — `run`/`debug`/`validate` drive a flow document
//! end-to-end for manual exercising and for the crate's own integration
//! tests, the way the teacher's CLI doubled as its own test harness.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flow_core::model::{Breakpoint, BreakpointType, Flow};
use flow_core::resolver::ValueResolver;
use flow_core::value::Value;
use flow_engine::context::ExecutionContext;
use flow_engine::debug_controller::{DebugController, NullSink};
use flow_engine::flow_provider::StaticFlowProvider;
use flow_engine::step_executor::StepEnv;
use flow_engine::{flow_runner, handlers, mock_server, validation};
use log::info;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "flow-cli", about = "Drive flow documents against the flow execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow document to completion.
    Run {
        flow: PathBuf,
        #[arg(long = "var", value_parser = parse_key_value, action = clap::ArgAction::Append)]
        vars: Vec<(String, String)>,
    },
    /// Run a flow document with a debug session and a set of step breakpoints.
    Debug {
        flow: PathBuf,
        #[arg(long = "break-at", action = clap::ArgAction::Append)]
        break_at: Vec<String>,
    },
    /// Validate a flow document's shape and action tags without running it.
    Validate { flow: PathBuf },
    #[command(subcommand)]
    Mock(MockCommands),
}

#[derive(Subcommand)]
enum MockCommands {
    /// Start a mock server from a configuration document and block until Ctrl+C.
    Serve { config: PathBuf },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())).ok_or_else(|| format!("expected key=value, got '{}'", s))
}

fn load_flow(path: &PathBuf) -> Result<Flow> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading flow document {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("parsing flow document {}", path.display()))
}

fn ambient_env() -> BTreeMap<String, String> {
    std::env::vars().collect()
}

pub async fn run() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { flow, vars } => run_flow(flow, vars).await,
        Commands::Debug { flow, break_at } => debug_flow(flow, break_at).await,
        Commands::Validate { flow } => validate_flow_command(flow),
        Commands::Mock(MockCommands::Serve { config }) => mock_serve(config).await,
    }
}

fn variables_from(vars: Vec<(String, String)>) -> BTreeMap<String, Value> {
    vars.into_iter().map(|(k, v)| (k, Value::String(v))).collect()
}

async fn run_flow(flow_path: PathBuf, vars: Vec<(String, String)>) -> Result<()> {
    let flow = load_flow(&flow_path)?;
    let registry = handlers::default_registry();
    validation::validate_flow(&flow, &registry).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let ctx = ExecutionContext::new(ambient_env(), variables_from(vars));
    let env = StepEnv {
        registry: Arc::new(registry),
        flow_provider: Arc::new(StaticFlowProvider::new([flow.clone()])),
        debug: None,
        resolver: Arc::new(ValueResolver::default()),
    };

    info!("running flow '{}'", flow.id);
    let result = flow_runner::run_flow(&flow, ctx, env, CancellationToken::new()).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.status != flow_core::model::FlowStatus::Passed {
        std::process::exit(1);
    }
    Ok(())
}

async fn debug_flow(flow_path: PathBuf, break_at: Vec<String>) -> Result<()> {
    let flow = load_flow(&flow_path)?;
    let registry = handlers::default_registry();
    validation::validate_flow(&flow, &registry).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let debug = DebugController::start_session(uuid::Uuid::new_v4().to_string(), flow.id.clone(), Arc::new(NullSink));
    for step_id in break_at {
        debug
            .add_breakpoint(Breakpoint {
                id: uuid::Uuid::new_v4().to_string(),
                kind: BreakpointType::Step,
                step_id: Some(step_id),
                condition: None,
                enabled: true,
                hit_count: 0,
                log_point: None,
            })
            .await;
    }

    let ctx = ExecutionContext::new(ambient_env(), BTreeMap::new());
    let env = StepEnv {
        registry: Arc::new(registry),
        flow_provider: Arc::new(StaticFlowProvider::new([flow.clone()])),
        debug: Some(debug.clone()),
        resolver: Arc::new(ValueResolver::default()),
    };

    // Without an attached interactive client there is nothing to pause for;
    // the session still records breakpoint hits and step history for inspection.
    let result = flow_runner::run_flow(&flow, ctx, env, CancellationToken::new()).await;
    debug.end_session().await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn validate_flow_command(flow_path: PathBuf) -> Result<()> {
    let flow = load_flow(&flow_path)?;
    let registry = handlers::default_registry();
    match validation::validate_flow(&flow, &registry) {
        Ok(()) => {
            println!("{} is valid", flow_path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

async fn mock_serve(config_path: PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(&config_path).with_context(|| format!("reading mock server config {}", config_path.display()))?;
    let parsed: serde_json::Value = serde_yaml::from_str(&content)?;
    let config = Value::from_json(parsed);

    let result = mock_server::start(&config).await;
    if result.status != flow_core::model::StepStatus::Passed {
        anyhow::bail!(result.error.unwrap_or_else(|| "mock server failed to start".to_string()));
    }
    println!("{}", serde_json::to_string_pretty(&result.output.to_json())?);

    let handle = result.output.get_path("handle").map(|v| v.as_display_string()).unwrap_or_default();
    tokio::signal::ctrl_c().await?;
    mock_server::stop(&handle).await;
    Ok(())
}
