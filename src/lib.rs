#![forbid(unsafe_code)]

//! Client-side readiness polling and indexing-task progress tracking for
//! the Codebase RAG backend.

pub mod backoff;
pub mod cli;
pub mod client;
pub mod config;
pub mod errors;
pub mod health;
pub mod models;
pub mod tracker;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
