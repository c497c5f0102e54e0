//! CLI integration tests

use std::process::{Command, Output};

/// Run the CLI with an isolated home directory
fn finops(home: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_finops"))
        .args(args)
        .env("HOME", home)
        .env_remove("FINOPS_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let home = tempfile::tempdir().unwrap();
    let output = finops(home.path(), &["--help"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("FinOps Insights"), "Should show app name");
    for command in [
        "efficiency",
        "recommendations",
        "anomalies",
        "forecasts",
        "refresh",
        "health",
        "config",
    ] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let home = tempfile::tempdir().unwrap();
    let output = finops(home.path(), &["--version"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("finops"), "Should show binary name");
}

/// Test recommendations subcommand help
#[test]
fn test_recommendations_help() {
    let home = tempfile::tempdir().unwrap();
    let output = finops(home.path(), &["recommendations", "--help"]);

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--namespace"), "Should show namespace option");
    assert!(stdout.contains("--type"), "Should show type option");
    assert!(stdout.contains("--pending-only"), "Should show pending option");
}

/// Test that an invalid output format is rejected
#[test]
fn test_invalid_output_format() {
    let home = tempfile::tempdir().unwrap();
    let output = finops(home.path(), &["health", "--output", "xml"]);

    assert!(!output.status.success(), "Invalid format should fail");
}

/// Test that config set persists and config show reads it back
#[test]
fn test_config_round_trip() {
    let home = tempfile::tempdir().unwrap();

    let output = finops(
        home.path(),
        &["config", "set", "--url", "http://finops.example:8000", "--namespace", "team-a"],
    );
    assert!(output.status.success(), "config set should succeed");
    assert!(home.path().join(".config/finops/config.json").exists());

    let output = finops(home.path(), &["config", "show", "--output", "json"]);
    assert!(output.status.success());
    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["api_url"], "http://finops.example:8000");
    assert_eq!(config["default_namespace"], "team-a");
}

/// Test that a bad URL is refused before anything is saved
#[test]
fn test_config_set_rejects_invalid_url() {
    let home = tempfile::tempdir().unwrap();
    let output = finops(home.path(), &["config", "set", "--url", "not a url"]);

    assert!(!output.status.success());
    assert!(!home.path().join(".config/finops/config.json").exists());
}

/// Test JSON output against a mock API
#[test]
fn test_forecasts_json_output() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/cost-forecasts")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"generation":4,"generated_at":"2026-10-01T00:00:00Z","stale":false,"data":[
                {"namespace":"team-a","current_monthly_cost":1460.0,"forecasted_monthly_cost":1606.0,
                 "trend_percent":10.0,"data_points":30,"stale":false,"severity":"warning"}]}"#,
        )
        .create();

    let home = tempfile::tempdir().unwrap();
    let url = server.url();
    let output = finops(home.path(), &["forecasts", "--api-url", &url, "--output", "json"]);

    mock.assert();
    assert!(output.status.success(), "forecasts should succeed");
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["generation"], 4);
    assert_eq!(body["data"][0]["namespace"], "team-a");
}

/// Test that API errors give a failing exit status
#[test]
fn test_api_error_fails_command() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/recommendations")
        .match_query(mockito::Matcher::Any)
        .with_status(400)
        .with_body(r#"{"error":"unknown recommendation type `bogus`","code":"BAD_REQUEST"}"#)
        .create();

    let home = tempfile::tempdir().unwrap();
    let url = server.url();
    let output = finops(home.path(), &["recommendations", "--type", "bogus", "--api-url", &url]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown recommendation type"));
}
