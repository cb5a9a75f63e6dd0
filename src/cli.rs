//! Command-line surface of the `rag-monitor` binary.
//!
//! Lives in the library so argument parsing can be tested without spawning
//! the binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Log output format selected with `--log-format`.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines. Default.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Parsed command line.
#[derive(Debug, Parser)]
#[command(name = "rag-monitor", about = "Codebase RAG readiness and indexing monitor", version, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the backend base URL.
    #[arg(long, global = true)]
    pub backend_url: Option<String>,

    /// Log output format (text or json).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Fetch backend readiness once and print it.
    Status,

    /// Keep polling readiness and log every change until interrupted.
    Watch,

    /// Follow an existing indexing task until it finishes.
    Track {
        /// Backend-assigned task ID.
        task_id: String,
    },

    /// Submit a repository on the backend host for indexing, then follow it.
    IndexLocal {
        /// Repository path as seen by the backend.
        path: String,
        /// Display name for the repository.
        #[arg(long)]
        name: Option<String>,
        /// Submit even if the backend is not ready.
        #[arg(long)]
        force: bool,
    },

    /// Submit a remote repository for indexing, then follow it.
    IndexRemote {
        /// Clone URL.
        url: String,
        /// Branch to index.
        #[arg(long)]
        branch: Option<String>,
        /// Display name for the repository.
        #[arg(long)]
        name: Option<String>,
        /// Submit even if the backend is not ready.
        #[arg(long)]
        force: bool,
    },

    /// List the tasks the backend is tracking.
    Tasks,
}
