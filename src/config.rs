//! Global configuration parsing, validation, and environment overrides.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Environment variable overriding [`BackendConfig::base_url`].
pub const ENV_BACKEND_URL: &str = "RAG_MONITOR_BACKEND_URL";
/// Environment variable overriding [`HealthConfig::poll_interval_ms`].
pub const ENV_POLL_INTERVAL_MS: &str = "RAG_MONITOR_POLL_INTERVAL_MS";
/// Environment variable overriding [`HealthConfig::max_backoff_ms`].
pub const ENV_MAX_BACKOFF_MS: &str = "RAG_MONITOR_MAX_BACKOFF_MS";
/// Environment variable overriding [`HealthConfig::disable_polling`].
pub const ENV_DISABLE_POLLING: &str = "RAG_MONITOR_DISABLE_POLLING";

/// Backend endpoint locations and per-request limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BackendConfig {
    /// Base HTTP URL of the indexing backend.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Readiness endpoint path.
    #[serde(default = "default_readiness_path")]
    pub readiness_path: String,
    /// Indexing status (pull fallback) endpoint path.
    #[serde(default = "default_indexing_status_path")]
    pub indexing_status_path: String,
    /// Live status WebSocket endpoint path.
    #[serde(default = "default_live_status_path")]
    pub live_status_path: String,
    /// Local repository submission endpoint path.
    #[serde(default = "default_index_local_path")]
    pub index_local_path: String,
    /// Remote repository submission endpoint path.
    #[serde(default = "default_index_remote_path")]
    pub index_remote_path: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".into()
}

fn default_readiness_path() -> String {
    "/api/v1/health/ready".into()
}

fn default_indexing_status_path() -> String {
    "/api/v1/index/status".into()
}

fn default_live_status_path() -> String {
    "/ws/status".into()
}

fn default_index_local_path() -> String {
    "/api/v1/index/local".into()
}

fn default_index_remote_path() -> String {
    "/api/v1/index/remote".into()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            readiness_path: default_readiness_path(),
            indexing_status_path: default_indexing_status_path(),
            live_status_path: default_live_status_path(),
            index_local_path: default_index_local_path(),
            index_remote_path: default_index_remote_path(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BackendConfig {
    /// Resolve an endpoint path against the HTTP base URL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the base URL or path is malformed.
    pub fn http_url(&self, path: &str) -> Result<Url> {
        let base = Url::parse(&self.base_url)
            .map_err(|err| AppError::Config(format!("invalid base_url: {err}")))?;
        base.join(path)
            .map_err(|err| AppError::Config(format!("invalid endpoint path {path}: {err}")))
    }

    /// URL of the live status push channel, with `ws`/`wss` scheme.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the base URL is malformed.
    pub fn ws_url(&self) -> Result<Url> {
        let mut url = self.http_url(&self.live_status_path)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| AppError::Config(format!("cannot derive {scheme} url from base_url")))?;
        Ok(url)
    }

    /// Per-request timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Health poller cadence and policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    /// Interval between successful polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound for the failure backoff delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Fetch once at startup and never schedule another poll.
    #[serde(default)]
    pub disable_polling: bool,
    /// Drop per-check errors once the backend reports `ready`.
    #[serde(default)]
    pub suppress_check_errors_when_ready: bool,
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            disable_polling: false,
            suppress_check_errors_when_ready: false,
        }
    }
}

impl HealthConfig {
    /// Base poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Backoff cap as a [`Duration`].
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Task progress tracker reconnect and fallback settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TrackerConfig {
    /// Consecutive failed push-channel connects before falling back to polling.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// First reconnect delay.
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    /// Reconnect delay cap.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// Pull interval while in polling fallback.
    #[serde(default = "default_tracker_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Consecutive pull failures tolerated before giving up on the task.
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,
    /// Capacity of the tracker event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    10_000
}

fn default_tracker_poll_interval_ms() -> u64 {
    3_000
}

fn default_max_poll_failures() -> u32 {
    10
}

fn default_event_buffer() -> usize {
    64
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            poll_interval_ms: default_tracker_poll_interval_ms(),
            max_poll_failures: default_max_poll_failures(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl TrackerConfig {
    /// Pull interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Backend endpoints.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Health poller settings.
    #[serde(default)]
    pub health: HealthConfig,
    /// Task tracker settings.
    #[serde(default)]
    pub tracker: TrackerConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// Environment overrides are not applied here; call
    /// [`apply_env_overrides`](Self::apply_env_overrides) afterwards.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RAG_MONITOR_*` environment variables on top of the parsed
    /// values, then re-validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is set but unparsable, or if
    /// the resulting configuration fails validation.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(url) = read_env(ENV_BACKEND_URL) {
            self.backend.base_url = url;
        }
        if let Some(raw) = read_env(ENV_POLL_INTERVAL_MS) {
            self.health.poll_interval_ms = parse_env(ENV_POLL_INTERVAL_MS, &raw)?;
        }
        if let Some(raw) = read_env(ENV_MAX_BACKOFF_MS) {
            self.health.max_backoff_ms = parse_env(ENV_MAX_BACKOFF_MS, &raw)?;
        }
        if let Some(raw) = read_env(ENV_DISABLE_POLLING) {
            self.health.disable_polling = parse_flag(ENV_DISABLE_POLLING, &raw)?;
        }
        self.validate()
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.backend.base_url)
            .map_err(|err| AppError::Config(format!("invalid base_url: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "base_url must use http or https, got {}",
                url.scheme()
            )));
        }

        if self.backend.request_timeout_ms == 0 {
            return Err(AppError::Config(
                "request_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.health.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "health.poll_interval_ms must be greater than zero".into(),
            ));
        }

        if self.health.max_backoff_ms < self.health.poll_interval_ms {
            return Err(AppError::Config(
                "health.max_backoff_ms must not be less than health.poll_interval_ms".into(),
            ));
        }

        if self.tracker.max_reconnect_attempts == 0 {
            return Err(AppError::Config(
                "tracker.max_reconnect_attempts must be greater than zero".into(),
            ));
        }

        if self.tracker.reconnect_base_ms == 0
            || self.tracker.reconnect_max_ms < self.tracker.reconnect_base_ms
        {
            return Err(AppError::Config(
                "tracker reconnect delays must satisfy 0 < reconnect_base_ms <= reconnect_max_ms"
                    .into(),
            ));
        }

        if self.tracker.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "tracker.poll_interval_ms must be greater than zero".into(),
            ));
        }

        if self.tracker.event_buffer == 0 {
            return Err(AppError::Config(
                "tracker.event_buffer must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

fn read_env(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            debug!(key, "applying environment override");
            Some(value.trim().to_owned())
        }
        Ok(_) => {
            warn!(key, "environment override is empty, ignoring");
            None
        }
        Err(_) => None,
    }
}

fn parse_env(key: &str, raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|err| AppError::Config(format!("{key} must be an integer: {err}")))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(AppError::Config(format!(
            "{key} must be a boolean, got {other}"
        ))),
    }
}
