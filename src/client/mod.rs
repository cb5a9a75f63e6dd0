//! Backend collaborator seams.
//!
//! The poller and tracker only talk to the backend through these traits,
//! which keeps them independent of the transport. [`http::HttpBackend`]
//! and [`ws::WsConnector`] are the production implementations; tests plug
//! in in-memory fakes.

pub mod http;
pub mod ws;

use std::future::Future;
use std::pin::Pin;

use crate::models::message::ClientMessage;
use crate::models::readiness::ReadinessReport;
use crate::models::task::TaskUpdate;
use crate::Result;

/// Boxed, sendable future returned by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Source of readiness reports (the readiness endpoint).
pub trait ReadinessSource: Send + Sync {
    /// Fetch one readiness report.
    ///
    /// # Errors
    ///
    /// Connectivity failures map to `AppError::Http`/`AppError::Timeout`;
    /// unexpected bodies to `AppError::Payload`.
    fn fetch_readiness(&self) -> BoxFuture<'_, Result<ReadinessReport>>;
}

/// Pull-based task status lookup (the indexing status endpoint).
pub trait TaskStatusSource: Send + Sync {
    /// Fetch the backend's current record for `task_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the backend does not know the task,
    /// and connectivity or payload errors otherwise.
    fn fetch_task<'a>(&'a self, task_id: &'a str) -> BoxFuture<'a, Result<TaskUpdate>>;
}

/// Factory for push-channel connections.
pub trait PushConnector: Send + Sync {
    /// Open a new channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` or `AppError::Timeout` if the channel
    /// cannot be opened.
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn PushChannel>>>;
}

/// An open push channel carrying JSON text frames.
pub trait PushChannel: Send {
    /// Send one client message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` if the write fails.
    fn send(&mut self, message: ClientMessage) -> BoxFuture<'_, Result<()>>;

    /// Next inbound text frame; `None` once the channel has closed.
    fn next_frame(&mut self) -> BoxFuture<'_, Option<Result<String>>>;

    /// Close the channel gracefully. Idempotent.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}
