use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_flow(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("write flow document");
    path
}

const PASSING_FLOW: &str = r#"
id: smoke
name: smoke test
steps:
  - id: announce
    name: announce
    action: log
    config:
      message: "hello from the flow engine"
"#;

const INVALID_FLOW: &str = r#"
id: broken
name: broken flow
steps:
  - id: step1
    name: step1
    action: not_a_real_action
"#;

#[test]
fn validate_accepts_a_well_formed_flow() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir, "smoke.yaml", PASSING_FLOW);

    Command::cargo_bin("flow-cli").unwrap().args(["validate", flow.to_str().unwrap()]).assert().success().stdout(predicate::str::contains("is valid"));
}

#[test]
fn validate_rejects_an_unknown_action_tag() {
    // An action tag the enum doesn't know fails at document-parse time,
    // before our own cross-check against the live registry ever runs —
    // both paths satisfy "unknown action tags fail validation at load time".
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir, "broken.yaml", INVALID_FLOW);

    Command::cargo_bin("flow-cli").unwrap().args(["validate", flow.to_str().unwrap()]).assert().failure();
}

#[test]
fn run_executes_a_flow_to_completion() {
    let dir = TempDir::new().unwrap();
    let flow = write_flow(&dir, "smoke.yaml", PASSING_FLOW);

    let output = Command::cargo_bin("flow-cli").unwrap().args(["run", flow.to_str().unwrap()]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("run output should be json");
    assert_eq!(parsed["status"], "passed");
    assert_eq!(parsed["step_results"]["announce"]["status"], "passed");
}
