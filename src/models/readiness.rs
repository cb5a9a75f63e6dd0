//! Backend readiness snapshot and its wire representation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Top-level readiness verdict.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    /// No successful poll has classified the backend yet.
    #[default]
    Unknown,
    /// Every required component is up.
    Ready,
    /// Backend reachable but still starting or degraded.
    NotReady,
    /// Backend reports itself broken, or has never been reachable.
    Error,
}

impl ReadinessStatus {
    /// Classify a backend-supplied status string.
    ///
    /// `ok` and `healthy` are treated as aliases of `ready`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ready" | "ok" | "healthy" => Self::Ready,
            "not_ready" | "starting" | "degraded" | "initializing" => Self::NotReady,
            "error" | "unhealthy" | "failed" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// Health check result for one backend component (`chromadb`, `neo4j`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentCheck {
    /// Whether the component is usable.
    pub ready: bool,
    /// Component-specific failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Any auxiliary metrics reported alongside the check.
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Readiness payload exactly as returned by the backend.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReadinessReport {
    /// Raw status string, classified through [`ReadinessStatus::parse`].
    pub status: String,
    /// Optional 0-100 score.
    #[serde(default)]
    pub health_score: Option<f64>,
    /// Per-component checks keyed by component name.
    #[serde(default)]
    pub checks: BTreeMap<String, ComponentCheck>,
    /// Backend-side validation latency in milliseconds.
    #[serde(default, alias = "validation_time")]
    pub validation_time_ms: Option<f64>,
}

impl ReadinessReport {
    /// Decode a readiness payload.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Payload` when the body is not a JSON object with a
    /// string `status` and an object-valued `checks`.
    pub fn from_json(body: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(body)?;
        Self::from_value(value)
    }

    /// Decode an already-parsed readiness payload.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Payload` on unexpected shape.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(AppError::Payload(
                "readiness payload must be a json object".into(),
            ));
        }
        serde_json::from_value(value)
            .map_err(|err| AppError::Payload(format!("readiness payload: {err}")))
    }
}

/// Latest known backend health, replaced wholesale on every poll.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReadinessSnapshot {
    /// Classified top-level status.
    pub status: ReadinessStatus,
    /// Score in `[0, 100]`.
    pub health_score: f64,
    /// Per-component checks keyed by unique component name.
    pub checks: BTreeMap<String, ComponentCheck>,
    /// Time of the last successful fetch.
    pub last_updated: Option<DateTime<Utc>>,
    /// Latency of the last successful check.
    pub validation_time_ms: Option<f64>,
    /// Why the most recent poll failed; cleared on the next success.
    pub error: Option<String>,
}

impl ReadinessSnapshot {
    /// Build a snapshot from a successful fetch.
    ///
    /// When `suppress_check_errors` is set and the backend reports `ready`,
    /// per-check error strings are dropped.
    #[must_use]
    pub fn from_report(
        report: ReadinessReport,
        fetched_at: DateTime<Utc>,
        suppress_check_errors: bool,
    ) -> Self {
        let status = ReadinessStatus::parse(&report.status);
        let mut checks = report.checks;

        if suppress_check_errors && status == ReadinessStatus::Ready {
            for check in checks.values_mut() {
                check.error = None;
            }
        }

        let health_score = report.health_score.map_or_else(
            || derive_health_score(status, &checks),
            |score| {
                if score.is_finite() {
                    score.clamp(0.0, 100.0)
                } else {
                    0.0
                }
            },
        );

        Self {
            status,
            health_score,
            checks,
            last_updated: Some(fetched_at),
            validation_time_ms: report.validation_time_ms,
            error: None,
        }
    }

    /// Build the snapshot published after a failed poll.
    ///
    /// Keeps the previous status and checks so consumers can tell "was
    /// ready, now unreachable" apart from "never been ready".
    #[must_use]
    pub fn unreachable(previous: Option<&Self>, error: &AppError) -> Self {
        match previous {
            Some(prev) => Self {
                error: Some(error.to_string()),
                ..prev.clone()
            },
            None => Self {
                status: ReadinessStatus::Error,
                error: Some(error.to_string()),
                ..Self::default()
            },
        }
    }

    /// Whether the backend is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == ReadinessStatus::Ready
    }

    /// Whether a successful fetch has ever populated this snapshot.
    #[must_use]
    pub fn has_been_reachable(&self) -> bool {
        self.last_updated.is_some()
    }

    /// Names and messages of components that are not ready.
    #[must_use]
    pub fn failing_checks(&self) -> Vec<(&str, Option<&str>)> {
        self.checks
            .iter()
            .filter(|(_, check)| !check.ready)
            .map(|(name, check)| (name.as_str(), check.error.as_deref()))
            .collect()
    }
}

/// Percentage of ready checks, used when the backend omits a score.
#[must_use]
pub fn derive_health_score(
    status: ReadinessStatus,
    checks: &BTreeMap<String, ComponentCheck>,
) -> f64 {
    if checks.is_empty() {
        return if status == ReadinessStatus::Ready {
            100.0
        } else {
            0.0
        };
    }
    let ready = checks.values().filter(|check| check.ready).count();
    #[allow(clippy::cast_precision_loss)] // component counts are tiny
    let score = ready as f64 * 100.0 / checks.len() as f64;
    score
}
