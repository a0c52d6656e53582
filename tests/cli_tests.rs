//! CLI integration tests
//!
//! Tests the CLI binary end-to-end.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command with telemetry environment variables cleared.
fn telemux() -> Command {
    let mut cmd = Command::cargo_bin("telemux").unwrap();
    cmd.env_remove("APPINSIGHTS_INSTRUMENTATIONKEY")
        .env_remove("APPINSIGHTS_ENDPOINT")
        .env_remove("SERVICE_NAME")
        .env_remove("LOG_LEVEL")
        .env_remove("TELEMUX_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

/// Test that `telemux --help` works
#[test]
fn test_help() {
    telemux()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Correlated telemetry fan-out"));
}

/// Test that `telemux --version` works
#[test]
fn test_version() {
    telemux()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_emit_writes_json_record() {
    let output = telemux()
        .env("SERVICE_NAME", "billing")
        .args([
            "emit",
            "info",
            "payment processed",
            "--field",
            "amount=42",
            "--operation-id",
            "op-1",
        ])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let record: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(record["level"], "info");
    assert_eq!(record["msg"], "payment processed");
    assert_eq!(record["amount"], 42);
    assert_eq!(record["OperationID"], "op-1");
    assert_eq!(record["ServiceName"], "billing");
}

#[test]
fn test_emit_below_threshold_writes_nothing() {
    telemux()
        .env("SERVICE_NAME", "billing")
        .env("LOG_LEVEL", "warn")
        .args(["emit", "debug", "hidden"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_emit_invalid_log_level_fails() {
    telemux()
        .env("LOG_LEVEL", "loud")
        .args(["emit", "info", "never written"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid log level"));
}

#[test]
fn test_emit_without_service_name_fails() {
    telemux()
        .args(["emit", "info", "who am i"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("SERVICE_NAME is not set"));
}

#[test]
fn test_emit_rejects_malformed_field() {
    telemux()
        .args(["emit", "info", "x", "--field", "novalue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("key=value"));
}

#[test]
fn test_config_from_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("telemux.yaml");
    std::fs::write(
        &path,
        "APPINSIGHTS_INSTRUMENTATIONKEY: 0000-abcd\nSERVICE_NAME: ledger\nLOG_LEVEL: debug\n",
    )
    .unwrap();

    telemux()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("service_name: ledger"))
        .stdout(predicate::str::contains("log_level: debug"))
        .stdout(predicate::str::contains("instrumentation_key: *****abcd"))
        .stdout(predicate::str::contains("apm: enabled"));
}

#[test]
fn test_config_defaults_from_empty_env() {
    telemux()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("log_level: info"))
        .stdout(predicate::str::contains("instrumentation_key: <not set>"))
        .stdout(predicate::str::contains("apm: disabled"));
}

#[test]
fn test_missing_config_file_fails() {
    telemux()
        .args(["--config", "/nonexistent/telemux.yaml", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}
