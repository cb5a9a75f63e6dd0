//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all client-side failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// HTTP transport failure or non-2xx response from the backend.
    Http(String),
    /// A bounded request did not complete before its deadline.
    Timeout(String),
    /// Push channel (WebSocket) connect, read, or write failure.
    Channel(String),
    /// Backend payload did not have the expected shape.
    Payload(String),
    /// Backend has no record of the requested entity.
    NotFound(String),
    /// Backend reported the indexing task as failed.
    TaskFailed(String),
    /// Tracker lost contact with the task before it reached a terminal state.
    ConnectionLost(String),
    /// Operation refused because the backend is not ready.
    NotReady(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether this error is a transient connectivity problem that the
    /// poller or tracker recovers from on its own.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout(_) | Self::Channel(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Channel(msg) => write!(f, "channel: {msg}"),
            Self::Payload(msg) => write!(f, "payload: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::TaskFailed(msg) => write!(f, "task failed: {msg}"),
            Self::ConnectionLost(msg) => write!(f, "connection lost: {msg}"),
            Self::NotReady(msg) => write!(f, "not ready: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Payload(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Channel(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
