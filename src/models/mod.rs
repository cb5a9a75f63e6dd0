//! Domain model module declarations.

pub mod message;
pub mod readiness;
pub mod task;
