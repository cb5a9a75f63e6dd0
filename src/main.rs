#![forbid(unsafe_code)]

//! `rag-monitor`: readiness and indexing-progress client for the Codebase
//! RAG backend.
//!
//! Polls backend readiness, submits repositories for indexing, and follows
//! indexing tasks over the live status channel with a polling fallback.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rag_monitor::cli::{Cli, Command, LogFormat};
use rag_monitor::client::http::{HttpBackend, LocalIndexRequest, RemoteIndexRequest};
use rag_monitor::client::ws::WsConnector;
use rag_monitor::client::ReadinessSource;
use rag_monitor::config::GlobalConfig;
use rag_monitor::health::{StatusService, StatusView};
use rag_monitor::models::readiness::ReadinessSnapshot;
use rag_monitor::models::task::TaskStatus;
use rag_monitor::tracker::{TaskTracker, TrackerEvent, TrackerOutcome};
use rag_monitor::{AppError, Result};

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = load_config(args.config.as_ref(), args.backend_url)?;
    let backend = Arc::new(HttpBackend::new(&config.backend)?);
    info!(backend = %config.backend.base_url, "configuration loaded");

    match args.command {
        Command::Status => print_status(&config, &backend).await,
        Command::Watch => watch(&config, backend).await,
        Command::Track { task_id } => {
            track(&config, backend, TaskStatus::placeholder(task_id, "")).await
        }
        Command::IndexLocal { path, name, force } => {
            ensure_backend_ready(&config, &backend, force).await?;
            let seed = backend
                .submit_local(&LocalIndexRequest {
                    repo_path: path,
                    repository_name: name,
                })
                .await?;
            println!("submitted task {}", seed.task_id);
            track(&config, backend, seed).await
        }
        Command::IndexRemote {
            url,
            branch,
            name,
            force,
        } => {
            ensure_backend_ready(&config, &backend, force).await?;
            let seed = backend
                .submit_remote(&RemoteIndexRequest {
                    repo_url: url,
                    branch,
                    repository_name: name,
                })
                .await?;
            println!("submitted task {}", seed.task_id);
            track(&config, backend, seed).await
        }
        Command::Tasks => list_tasks(&backend).await,
    }
}

fn load_config(path: Option<&PathBuf>, backend_url: Option<String>) -> Result<GlobalConfig> {
    let mut config = match path {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    config.apply_env_overrides()?;
    if let Some(url) = backend_url {
        config.backend.base_url = url;
        config.validate()?;
    }
    Ok(config)
}

async fn print_status(config: &GlobalConfig, backend: &HttpBackend) -> Result<()> {
    let report = backend.readiness().await?;
    let snapshot = ReadinessSnapshot::from_report(
        report,
        chrono::Utc::now(),
        config.health.suppress_check_errors_when_ready,
    );
    println!(
        "status: {:?}  health score: {:.0}",
        snapshot.status, snapshot.health_score
    );
    for (name, check) in &snapshot.checks {
        let mark = if check.ready { "ok" } else { "NOT READY" };
        match &check.error {
            Some(err) => println!("  {name:<12} {mark} ({err})"),
            None => println!("  {name:<12} {mark}"),
        }
    }
    Ok(())
}

async fn watch(config: &GlobalConfig, backend: Arc<HttpBackend>) -> Result<()> {
    let service = StatusService::init(
        config.health.clone(),
        config.backend.request_timeout(),
        backend,
    );
    let mut subscriber = service.subscribe();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            view = subscriber.changed() => match view {
                Some(view) => log_view(&view),
                None => break,
            },
        }
    }

    service.teardown().await;
    Ok(())
}

fn log_view(view: &StatusView) {
    if view.is_loading {
        return;
    }
    let Some(snapshot) = view.data.as_deref() else {
        return;
    };
    if let Some(err) = &view.error {
        if snapshot.has_been_reachable() {
            warn!(%err, last_status = ?snapshot.status, "backend unreachable, showing last known state");
        } else {
            warn!(%err, "backend starting up or unreachable");
        }
        return;
    }
    info!(
        status = ?snapshot.status,
        ready = view.is_ready,
        health_score = snapshot.health_score,
        failing = snapshot.failing_checks().len(),
        "readiness"
    );
}

/// Single readiness fetch used to gate submissions.
async fn ensure_backend_ready(
    config: &GlobalConfig,
    backend: &Arc<HttpBackend>,
    force: bool,
) -> Result<()> {
    let mut health = config.health.clone();
    health.disable_polling = true;
    let source: Arc<dyn ReadinessSource> = backend.clone();
    let service = StatusService::init(health, config.backend.request_timeout(), source);
    let mut subscriber = service.subscribe();
    subscriber.wait_for_initial_load().await?;
    let verdict = subscriber.ensure_ready();
    service.teardown().await;

    match verdict {
        Err(err) if force => {
            warn!(%err, "submitting despite backend not being ready");
            Ok(())
        }
        other => other,
    }
}

async fn track(config: &GlobalConfig, backend: Arc<HttpBackend>, seed: TaskStatus) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel(config.tracker.event_buffer);
    let cancel = CancellationToken::new();
    let connector = Arc::new(WsConnector::new(&config.backend)?);

    let handle = TaskTracker::new(
        seed,
        &config.tracker,
        connector,
        backend,
        event_tx,
        cancel.clone(),
    )
    .with_request_timeout(config.backend.request_timeout())
    .attach();

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(&event);
        }
    });

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown_signal() => {
                info!("shutdown signal received, detaching from task");
                interrupt.cancel();
            }
            () = interrupt.cancelled() => {}
        }
    });

    let outcome = handle.outcome().await;
    cancel.cancel();
    let _ = printer.await;
    let outcome = outcome?;

    match &outcome {
        TrackerOutcome::Completed(status) => println!(
            "task {} completed: {} files, {} chunks stored",
            status.task_id, status.processed_files, status.stored_chunks
        ),
        TrackerOutcome::Detached(status) => println!(
            "stopped following task {} at {:.0}%; it continues on the backend",
            status.task_id, status.overall_progress
        ),
        TrackerOutcome::Failed(status) => {
            for err in &status.errors {
                error!(
                    error_type = %err.error_type,
                    stage = err.stage.as_deref().unwrap_or("unknown"),
                    recoverable = err.recoverable,
                    "{}",
                    err.error_message
                );
            }
        }
        TrackerOutcome::ConnectionLost { .. } => {}
    }

    outcome.into_result().map(|_| ())
}

fn log_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::PhaseChanged { task_id, phase } => {
            info!(%task_id, phase = phase.label(), "tracker phase");
        }
        TrackerEvent::Updated(status) => info!(
            task_id = %status.task_id,
            stage = ?status.current_stage,
            progress = status.overall_progress,
            processed_files = status.processed_files,
            stored_chunks = status.stored_chunks,
            "progress"
        ),
        TrackerEvent::Completed(status) => info!(task_id = %status.task_id, "task completed"),
        TrackerEvent::Failed(status) => {
            error!(task_id = %status.task_id, errors = status.errors.len(), "task failed");
        }
        TrackerEvent::ConnectionLost { last_known, reason } => error!(
            task_id = %last_known.task_id,
            %reason,
            "lost connection to task, status unknown"
        ),
    }
}

async fn list_tasks(backend: &HttpBackend) -> Result<()> {
    let tasks = backend.list_tasks().await?;
    if tasks.is_empty() {
        println!("no active tasks");
    }
    for task in tasks {
        println!(
            "{:<24} {:<24} {:<12} {:>5.1}%",
            task.task_id,
            task.repository_name,
            format!("{:?}", task.status),
            task.overall_progress
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
