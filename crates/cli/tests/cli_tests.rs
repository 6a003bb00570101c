//! CLI integration tests

use serde_json::{json, Value};
use std::io::Write;
use std::process::{Command, Output};

fn urbanfc() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_urbanfc"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// 48 hourly traffic observations plus 72 hours of weather
fn payload_file() -> tempfile::NamedTempFile {
    let start = 1_700_006_400i64;
    let traffic: Vec<Value> = (0..48)
        .map(|h: i64| {
            let hour = (h % 24) as f64;
            let flow = 400.0 + 300.0 * ((hour - 6.0) / 24.0 * std::f64::consts::TAU).sin().max(0.0);
            json!({ "timestamp": start + h * 3600, "flow": flow })
        })
        .collect();
    let weather: Vec<Value> = (0..72)
        .map(|h: i64| json!({ "timestamp": start + h * 3600, "temperature": 12.0, "visibility": 10.0 }))
        .collect();
    let body = json!({
        "traffic": { "observations": traffic },
        "weather": { "observations": weather },
        "aqi": { "observations": [
            { "timestamp": 1_700_000_000, "aqi": 40.0 },
            { "timestamp": 1_700_086_400, "aqi": 42.0 }
        ]}
    });

    let mut file = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .expect("Failed to create payload file");
    file.write_all(body.to_string().as_bytes())
        .expect("Failed to write payload file");
    file
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = urbanfc().arg("--help").output().expect("Failed to execute command");
    let stdout = stdout_of(&output);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("forecasting pipeline"), "Should show about text");
    assert!(stdout.contains("run"), "Should show run command");
    assert!(stdout.contains("models"), "Should show models command");
    assert!(stdout.contains("plan"), "Should show plan command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = urbanfc().arg("--version").output().expect("Failed to execute command");
    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout_of(&output).contains("urbanfc"), "Should show binary name");
}

#[test]
fn test_run_help_lists_options() {
    let output = urbanfc()
        .args(["run", "--help"])
        .output()
        .expect("Failed to execute command");
    let stdout = stdout_of(&output);
    assert!(output.status.success());
    assert!(stdout.contains("--payloads"));
    assert!(stdout.contains("--models"));
    assert!(stdout.contains("--horizon"));
}

#[test]
fn test_models_json_lists_all_models() {
    let output = urbanfc()
        .args(["models", "--format", "json"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let rows: Vec<Value> = serde_json::from_slice(&output.stdout).expect("models output is JSON");
    assert_eq!(rows.len(), 7);
    let ids: Vec<&str> = rows.iter().filter_map(|r| r["id"].as_str()).collect();
    assert!(ids.contains(&"energy_demand"));
    assert!(ids.contains(&"land_use"));
}

#[test]
fn test_plan_includes_required_upstream() {
    let output = urbanfc()
        .args(["plan", "--models", "energy_demand,land_use", "--format", "json"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let rows: Vec<Value> = serde_json::from_slice(&output.stdout).expect("plan output is JSON");
    let growth = rows
        .iter()
        .find(|r| r["model"] == "urban_growth")
        .expect("urban_growth is planned");
    assert_eq!(growth["batch"], 1);
    assert_eq!(growth["reason"], "required upstream");
    assert!(rows
        .iter()
        .filter(|r| r["model"] != "urban_growth")
        .all(|r| r["batch"] == 2));
}

#[test]
fn test_unknown_model_is_rejected() {
    let output = urbanfc()
        .args(["plan", "--models", "weather"])
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
}

#[test]
fn test_run_reports_partial_failure() {
    let payloads = payload_file();
    let output = urbanfc()
        .args(["run", "--models", "traffic,aqi", "--horizon", "traffic=6", "--format", "json"])
        .arg("--payloads")
        .arg(payloads.path())
        .output()
        .expect("Failed to execute command");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let bundle: Value = serde_json::from_slice(&output.stdout).expect("bundle is JSON");
    assert_eq!(bundle["models"]["traffic"]["status"], "ok");
    assert_eq!(
        bundle["models"]["traffic"]["result"]["predictions"]
            .as_array()
            .map(|p| p.len()),
        Some(6)
    );
    assert_eq!(bundle["models"]["aqi"]["status"], "failed");
    assert_eq!(bundle["models"]["aqi"]["reason_kind"], "InsufficientHistoryError");
    assert_eq!(bundle["completeness"], 0.5);
}

#[test]
fn test_invalid_env_config_fails() {
    let payloads = payload_file();
    let output = urbanfc()
        .env("URBANFC_REQUEST_DEADLINE_MS", "0")
        .args(["run", "--models", "traffic"])
        .arg("--payloads")
        .arg(payloads.path())
        .output()
        .expect("Failed to execute command");
    assert!(!output.status.success());
}

#[test]
fn test_config_file_overrides_history() {
    let payloads = payload_file();
    let mut config = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .expect("Failed to create config file");
    config
        .write_all(br#"{ "history": { "aqi": 2 }, "cache": { "enabled": false } }"#)
        .expect("Failed to write config file");

    let output = urbanfc()
        .args(["run", "--models", "aqi", "--format", "json"])
        .arg("--payloads")
        .arg(payloads.path())
        .arg("--config")
        .arg(config.path())
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let bundle: Value = serde_json::from_slice(&output.stdout).expect("bundle is JSON");
    // two readings now pass the history check
    assert_ne!(bundle["models"]["aqi"]["reason_kind"], "InsufficientHistoryError");
}
