//! Backend readiness polling and its shared consumption surface.

pub mod poller;
pub mod service;

pub use poller::{HealthPoller, HealthPollerHandle, HealthState};
pub use service::{StatusService, StatusSubscriber, StatusView};
