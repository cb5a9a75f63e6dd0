use std::time::Duration;

use rag_monitor::config::{
    GlobalConfig, ENV_BACKEND_URL, ENV_DISABLE_POLLING, ENV_MAX_BACKOFF_MS, ENV_POLL_INTERVAL_MS,
};
use rag_monitor::AppError;

fn sample_toml() -> &'static str {
    r#"
[backend]
base_url = "https://rag.internal:8443"
request_timeout_ms = 5000

[health]
poll_interval_ms = 15000
max_backoff_ms = 120000
suppress_check_errors_when_ready = true

[tracker]
max_reconnect_attempts = 3
reconnect_base_ms = 500
reconnect_max_ms = 4000
poll_interval_ms = 1000
max_poll_failures = 4
event_buffer = 16
"#
}

fn clear_env() {
    for key in [
        ENV_BACKEND_URL,
        ENV_POLL_INTERVAL_MS,
        ENV_MAX_BACKOFF_MS,
        ENV_DISABLE_POLLING,
    ] {
        std::env::remove_var(key);
    }
}

fn assert_config_error(result: Result<GlobalConfig, AppError>, needle: &str) {
    match result {
        Err(AppError::Config(msg)) => assert!(
            msg.contains(needle),
            "expected config error mentioning {needle:?}, got {msg:?}"
        ),
        other => panic!("expected config error, got {other:?}"),
    }
}

// ── Parsing ──────────────────────────────────────────────────

#[test]
fn empty_file_yields_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config parses");

    assert_eq!(config, GlobalConfig::default());
    assert_eq!(config.backend.base_url, "http://localhost:8000");
    assert_eq!(config.backend.readiness_path, "/api/v1/health/ready");
    assert_eq!(config.backend.indexing_status_path, "/api/v1/index/status");
    assert_eq!(config.backend.live_status_path, "/ws/status");
    assert_eq!(config.health.poll_interval(), Duration::from_secs(30));
    assert_eq!(config.health.max_backoff(), Duration::from_secs(60));
    assert!(!config.health.disable_polling);
    assert!(!config.health.suppress_check_errors_when_ready);
    assert_eq!(config.tracker.max_reconnect_attempts, 5);
    assert_eq!(config.tracker.reconnect_base_ms, 1_000);
    assert_eq!(config.tracker.reconnect_max_ms, 10_000);
    assert_eq!(config.tracker.max_poll_failures, 10);
}

#[test]
fn parses_full_config() {
    let config = GlobalConfig::from_toml_str(sample_toml()).expect("config parses");

    assert_eq!(config.backend.base_url, "https://rag.internal:8443");
    assert_eq!(config.backend.request_timeout(), Duration::from_secs(5));
    assert_eq!(config.health.poll_interval_ms, 15_000);
    assert_eq!(config.health.max_backoff_ms, 120_000);
    assert!(config.health.suppress_check_errors_when_ready);
    assert_eq!(config.tracker.max_reconnect_attempts, 3);
    assert_eq!(config.tracker.poll_interval(), Duration::from_secs(1));
    assert_eq!(config.tracker.event_buffer, 16);
    // Unset keys keep their defaults.
    assert_eq!(config.backend.live_status_path, "/ws/status");
}

#[test]
fn partial_section_keeps_other_defaults() {
    let config = GlobalConfig::from_toml_str(
        r"
[health]
disable_polling = true
",
    )
    .expect("config parses");

    assert!(config.health.disable_polling);
    assert_eq!(config.health.poll_interval_ms, 30_000);
    assert_eq!(config.tracker, GlobalConfig::default().tracker);
}

#[test]
fn malformed_toml_is_config_error() {
    assert_config_error(GlobalConfig::from_toml_str("[health"), "invalid config");
}

#[test]
fn wrong_value_type_is_config_error() {
    assert_config_error(
        GlobalConfig::from_toml_str("[health]\npoll_interval_ms = \"soon\"\n"),
        "invalid config",
    );
}

#[test]
fn loads_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, sample_toml()).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("config loads");
    assert_eq!(config.backend.base_url, "https://rag.internal:8443");
}

#[test]
fn missing_file_is_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert_config_error(
        GlobalConfig::load_from_path(dir.path().join("absent.toml")),
        "failed to read config",
    );
}

// ── Validation ───────────────────────────────────────────────

#[test]
fn rejects_non_http_base_url() {
    assert_config_error(
        GlobalConfig::from_toml_str("[backend]\nbase_url = \"ftp://rag.internal\"\n"),
        "http or https",
    );
}

#[test]
fn rejects_unparsable_base_url() {
    assert_config_error(
        GlobalConfig::from_toml_str("[backend]\nbase_url = \"not a url\"\n"),
        "invalid base_url",
    );
}

#[test]
fn rejects_zero_request_timeout() {
    assert_config_error(
        GlobalConfig::from_toml_str("[backend]\nrequest_timeout_ms = 0\n"),
        "request_timeout_ms",
    );
}

#[test]
fn rejects_zero_poll_interval() {
    assert_config_error(
        GlobalConfig::from_toml_str("[health]\npoll_interval_ms = 0\n"),
        "poll_interval_ms",
    );
}

#[test]
fn rejects_backoff_cap_below_interval() {
    assert_config_error(
        GlobalConfig::from_toml_str("[health]\npoll_interval_ms = 30000\nmax_backoff_ms = 1000\n"),
        "max_backoff_ms",
    );
}

#[test]
fn rejects_zero_reconnect_attempts() {
    assert_config_error(
        GlobalConfig::from_toml_str("[tracker]\nmax_reconnect_attempts = 0\n"),
        "max_reconnect_attempts",
    );
}

#[test]
fn rejects_inverted_reconnect_delays() {
    assert_config_error(
        GlobalConfig::from_toml_str("[tracker]\nreconnect_base_ms = 5000\nreconnect_max_ms = 1000\n"),
        "reconnect_base_ms",
    );
}

#[test]
fn rejects_zero_event_buffer() {
    assert_config_error(
        GlobalConfig::from_toml_str("[tracker]\nevent_buffer = 0\n"),
        "event_buffer",
    );
}

// ── Endpoint derivation ──────────────────────────────────────

#[test]
fn ws_url_follows_http_scheme() {
    let mut config = GlobalConfig::default();
    assert_eq!(
        config.backend.ws_url().expect("ws url").as_str(),
        "ws://localhost:8000/ws/status"
    );

    config.backend.base_url = "https://rag.example.com".into();
    assert_eq!(
        config.backend.ws_url().expect("wss url").as_str(),
        "wss://rag.example.com/ws/status"
    );
}

#[test]
fn http_url_joins_paths() {
    let config = GlobalConfig::default();
    let url = config
        .backend
        .http_url(&config.backend.readiness_path)
        .expect("readiness url");
    assert_eq!(url.as_str(), "http://localhost:8000/api/v1/health/ready");
}

// ── Environment overrides ────────────────────────────────────

#[test]
#[serial_test::serial]
fn env_overrides_take_precedence() {
    clear_env();
    std::env::set_var(ENV_BACKEND_URL, "http://10.0.0.5:9000");
    std::env::set_var(ENV_POLL_INTERVAL_MS, "5000");
    std::env::set_var(ENV_MAX_BACKOFF_MS, "20000");
    std::env::set_var(ENV_DISABLE_POLLING, "yes");

    let mut config = GlobalConfig::from_toml_str(sample_toml()).expect("config parses");
    config.apply_env_overrides().expect("overrides apply");
    clear_env();

    assert_eq!(config.backend.base_url, "http://10.0.0.5:9000");
    assert_eq!(config.health.poll_interval_ms, 5_000);
    assert_eq!(config.health.max_backoff_ms, 20_000);
    assert!(config.health.disable_polling);
}

#[test]
#[serial_test::serial]
fn blank_env_values_are_ignored() {
    clear_env();
    std::env::set_var(ENV_BACKEND_URL, "   ");

    let mut config = GlobalConfig::default();
    config.apply_env_overrides().expect("overrides apply");
    clear_env();

    assert_eq!(config.backend.base_url, "http://localhost:8000");
}

#[test]
#[serial_test::serial]
fn non_numeric_interval_override_is_rejected() {
    clear_env();
    std::env::set_var(ENV_POLL_INTERVAL_MS, "often");

    let mut config = GlobalConfig::default();
    let result = config.apply_env_overrides();
    clear_env();

    assert!(
        matches!(&result, Err(AppError::Config(msg)) if msg.contains(ENV_POLL_INTERVAL_MS)),
        "got {result:?}"
    );
}

#[test]
#[serial_test::serial]
fn invalid_flag_override_is_rejected() {
    clear_env();
    std::env::set_var(ENV_DISABLE_POLLING, "maybe");

    let mut config = GlobalConfig::default();
    let result = config.apply_env_overrides();
    clear_env();

    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
#[serial_test::serial]
fn overrides_are_revalidated() {
    clear_env();
    std::env::set_var(ENV_POLL_INTERVAL_MS, "90000");

    let mut config = GlobalConfig::default();
    let result = config.apply_env_overrides();
    clear_env();

    assert!(
        matches!(&result, Err(AppError::Config(msg)) if msg.contains("max_backoff_ms")),
        "got {result:?}"
    );
}
