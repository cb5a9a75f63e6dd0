//! Unit tests for `rag-monitor` argument parsing.

use std::path::PathBuf;

use clap::{CommandFactory as _, Parser as _, ValueEnum as _};

use rag_monitor::cli::{Cli, Command, LogFormat};

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("rag-monitor").chain(args.iter().copied()))
        .expect("arguments parse")
}

#[test]
fn definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn status_uses_defaults() {
    let cli = parse(&["status"]);
    assert_eq!(cli.command, Command::Status);
    assert_eq!(cli.log_format, LogFormat::Text);
    assert!(cli.config.is_none());
    assert!(cli.backend_url.is_none());
}

#[test]
fn global_flags_are_accepted_after_subcommand() {
    let cli = parse(&[
        "watch",
        "--config",
        "/etc/rag/monitor.toml",
        "--backend-url",
        "https://rag.example.com",
        "--log-format",
        "json",
    ]);
    assert_eq!(cli.command, Command::Watch);
    assert_eq!(cli.config, Some(PathBuf::from("/etc/rag/monitor.toml")));
    assert_eq!(cli.backend_url.as_deref(), Some("https://rag.example.com"));
    assert_eq!(cli.log_format, LogFormat::Json);
}

#[test]
fn track_takes_task_id() {
    let cli = parse(&["track", "repo_123"]);
    assert_eq!(
        cli.command,
        Command::Track {
            task_id: "repo_123".into()
        }
    );
}

#[test]
fn track_requires_task_id() {
    assert!(Cli::try_parse_from(["rag-monitor", "track"]).is_err());
}

#[test]
fn index_local_flags() {
    let cli = parse(&["index-local", "/srv/repos/payments", "--name", "payments", "--force"]);
    assert_eq!(
        cli.command,
        Command::IndexLocal {
            path: "/srv/repos/payments".into(),
            name: Some("payments".into()),
            force: true,
        }
    );
}

#[test]
fn index_remote_defaults_to_gated_submission() {
    let cli = parse(&[
        "index-remote",
        "https://github.com/acme/widgets.git",
        "--branch",
        "main",
    ]);
    assert_eq!(
        cli.command,
        Command::IndexRemote {
            url: "https://github.com/acme/widgets.git".into(),
            branch: Some("main".into()),
            name: None,
            force: false,
        }
    );
}

#[test]
fn tasks_subcommand() {
    assert_eq!(parse(&["tasks"]).command, Command::Tasks);
}

#[test]
fn missing_subcommand_is_rejected() {
    assert!(Cli::try_parse_from(["rag-monitor"]).is_err());
}

#[test]
fn unknown_log_format_is_rejected() {
    assert!(Cli::try_parse_from(["rag-monitor", "--log-format", "xml", "status"]).is_err());
}

#[test]
fn log_format_possible_values() {
    let names: Vec<String> = LogFormat::value_variants()
        .iter()
        .filter_map(|format| format.to_possible_value())
        .map(|value| value.get_name().to_owned())
        .collect();
    assert_eq!(names, vec!["text", "json"]);
    assert_eq!(LogFormat::default(), LogFormat::Text);
}
