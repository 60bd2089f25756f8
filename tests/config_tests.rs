//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides
//! through the binary's public surface.

mod common;

use std::fs;
use std::path::PathBuf;

use predicates::prelude::*;
use tempfile::TempDir;

use common::{fixture_path, probe_cmd};

/// Test fixture for configuration testing
struct ConfigFixture {
    home: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let home = TempDir::new().unwrap();
        let config_path = home.path().join("config.toml");
        Self { home, config_path }
    }

    fn write_config(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    fn validate(&self) -> assert_cmd::assert::Assert {
        probe_cmd(&self.home)
            .args(["config", "validate", "--config"])
            .arg(&self.config_path)
            .assert()
    }
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_valid_fixture() {
    let home = TempDir::new().unwrap();
    probe_cmd(&home)
        .args(["config", "validate", "--config"])
        .arg(fixture_path("valid_config.toml"))
        .assert()
        .success();
}

#[test]
fn test_empty_config_uses_defaults() {
    let fixture = ConfigFixture::new();
    fixture.write_config("");
    fixture.validate().success();
}

#[test]
fn test_keepalive_disabled() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[connection]
url = "wss://chat.example.com/start"
idle_timeout_ms = 0
ping_interval_ms = 0
"#,
    );
    fixture.validate().success();
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_fixture() {
    let home = TempDir::new().unwrap();
    probe_cmd(&home)
        .args(["config", "validate", "--config"])
        .arg(fixture_path("invalid_config.toml"))
        .assert()
        .code(40)
        .stderr(predicate::str::contains("scheme must be ws or wss"));
}

#[test]
fn test_ping_slower_than_idle_timeout() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[connection]
idle_timeout_ms = 1000
ping_interval_ms = 5000
"#,
    );
    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("ping_interval_ms"));
}

#[test]
fn test_zero_connect_timeout_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[connection]
connect_timeout_ms = 0
"#,
    );
    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("connect_timeout_ms"));
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[logging]
level = "chatty"
"#,
    );
    fixture.validate().code(10);
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[connection
url = "ws://localhost:8070/start"
"#,
    );
    fixture
        .validate()
        .code(10)
        .stderr(predicate::str::contains("E101"));
}

// ─────────────────────────────────────────────────────────────────
// Overrides
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_url_override_shows_in_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[connection]
url = "ws://from-file:8070/start"
"#,
    );

    probe_cmd(&fixture.home)
        .env("CHAT_PROBE_URL", "ws://from-env:9000/start")
        .args(["config", "show", "--config"])
        .arg(&fixture.config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("ws://from-env:9000/start"))
        .stdout(predicate::str::contains("from-file").not());
}

#[test]
fn test_config_file_in_home_is_found() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join(".chat-probe");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("config.toml"),
        "[connection]\nurl = \"ws://home-config:8070/start\"\n",
    )
    .unwrap();

    probe_cmd(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ws://home-config:8070/start"));
}
