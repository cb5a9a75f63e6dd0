//! Integration tests for the reqwest-backed HTTP client.
//!
//! Each test serves a mock backend on an ephemeral port.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use rag_monitor::client::http::{
    repository_name_from, HttpBackend, LocalIndexRequest, RemoteIndexRequest,
};
use rag_monitor::config::BackendConfig;
use rag_monitor::models::readiness::ReadinessStatus;
use rag_monitor::models::task::TaskState;
use rag_monitor::AppError;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn backend(base_url: String) -> HttpBackend {
    backend_with(BackendConfig {
        base_url,
        ..BackendConfig::default()
    })
}

fn backend_with(config: BackendConfig) -> HttpBackend {
    HttpBackend::new(&config).expect("client builds")
}

fn task_list() -> Value {
    json!({ "active_tasks": [
        { "task_id": "repo_1", "repository_name": "alpha", "status": "in_progress", "overall_progress": 40 },
        { "task_id": "repo_2", "repository_name": "beta", "status": "completed" }
    ]})
}

fn mock_backend() -> Router {
    Router::new()
        .route(
            "/api/v1/health/ready",
            get(|| async {
                Json(json!({
                    "status": "ready",
                    "health_score": 100,
                    "checks": {
                        "chromadb": { "ready": true },
                        "neo4j": { "ready": true }
                    },
                    "validation_time_ms": 8.2
                }))
            }),
        )
        .route(
            "/api/v1/index/status",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                match params.get("task_id").map(String::as_str) {
                    Some("repo_2") => Json(json!({ "task_id": "repo_2", "status": "completed" })),
                    _ => Json(task_list()),
                }
            }),
        )
        .route(
            "/api/v1/index/local",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["repo_path"], "/srv/repos/payments");
                Json(json!({ "task_id": "local_1", "status": "queued" }))
            }),
        )
        .route(
            "/api/v1/index/remote",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["branch"], "main");
                Json(json!({
                    "task_id": "remote_1",
                    "repository_name": body["repository_name"].as_str().unwrap_or("server-named")
                }))
            }),
        )
}

// ── Readiness ────────────────────────────────────────────────

#[tokio::test]
async fn fetches_readiness_report() {
    let base = serve(mock_backend()).await;
    let report = backend(base).readiness().await.expect("readiness");

    assert_eq!(ReadinessStatus::parse(&report.status), ReadinessStatus::Ready);
    assert_eq!(report.checks.len(), 2);
    assert_eq!(report.validation_time_ms, Some(8.2));
}

#[tokio::test]
async fn server_error_is_http_error() {
    let app = Router::new().route(
        "/api/v1/health/ready",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "starting") }),
    );
    let base = serve(app).await;

    let err = backend(base).readiness().await.unwrap_err();
    assert!(matches!(&err, AppError::Http(msg) if msg.contains("503")), "got {err:?}");
}

#[tokio::test]
async fn missing_endpoint_is_not_found() {
    let base = serve(Router::new()).await;
    let err = backend(base).readiness().await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn html_body_is_payload_error() {
    let app = Router::new().route(
        "/api/v1/health/ready",
        get(|| async { "<html>proxy error</html>" }),
    );
    let base = serve(app).await;

    let err = backend(base).readiness().await.unwrap_err();
    assert!(matches!(err, AppError::Payload(_)), "got {err:?}");
}

#[tokio::test]
async fn slow_backend_times_out() {
    let app = Router::new().route(
        "/api/v1/health/ready",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({ "status": "ready" }))
        }),
    );
    let base = serve(app).await;
    let client = backend_with(BackendConfig {
        base_url: base,
        request_timeout_ms: 200,
        ..BackendConfig::default()
    });

    let err = client.readiness().await.unwrap_err();
    assert!(matches!(err, AppError::Timeout(_)), "got {err:?}");
}

#[tokio::test]
async fn unreachable_backend_is_connectivity_error() {
    // Bind and drop to get a port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let err = backend(format!("http://{addr}"))
        .readiness()
        .await
        .unwrap_err();
    assert!(err.is_connectivity(), "got {err:?}");
}

// ── Task status ──────────────────────────────────────────────

#[tokio::test]
async fn task_status_queries_by_id() {
    let base = serve(mock_backend()).await;
    let update = backend(base).task_status("repo_2").await.expect("status");

    assert_eq!(update.task_id, "repo_2");
    assert_eq!(update.status, Some(TaskState::Completed));
}

#[tokio::test]
async fn task_status_picks_record_from_list() {
    let base = serve(mock_backend()).await;
    let update = backend(base).task_status("repo_1").await.expect("status");

    assert_eq!(update.repository_name.as_deref(), Some("alpha"));
    assert_eq!(update.overall_progress, Some(40.0));
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let base = serve(mock_backend()).await;
    let err = backend(base).task_status("repo_404").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn lists_tasks() {
    let base = serve(mock_backend()).await;
    let tasks = backend(base).list_tasks().await.expect("tasks");

    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].repository_name, "alpha");
    assert_eq!(tasks[0].status, TaskState::InProgress);
    assert_eq!(tasks[1].status, TaskState::Completed);
    assert!((tasks[1].overall_progress - 100.0).abs() < f64::EPSILON);
}

// ── Submission ───────────────────────────────────────────────

#[tokio::test]
async fn submit_local_returns_placeholder() {
    let base = serve(mock_backend()).await;
    let seed = backend(base)
        .submit_local(&LocalIndexRequest {
            repo_path: "/srv/repos/payments".into(),
            repository_name: None,
        })
        .await
        .expect("submitted");

    assert_eq!(seed.task_id, "local_1");
    assert_eq!(seed.repository_name, "payments");
    assert_eq!(seed.status, TaskState::Queued);
    assert!(seed.overall_progress.abs() < f64::EPSILON);
}

#[tokio::test]
async fn submit_remote_prefers_server_name() {
    let base = serve(mock_backend()).await;
    let seed = backend(base)
        .submit_remote(&RemoteIndexRequest {
            repo_url: "https://github.com/acme/widgets.git".into(),
            branch: Some("main".into()),
            repository_name: Some("acme-widgets".into()),
        })
        .await
        .expect("submitted");

    assert_eq!(seed.task_id, "remote_1");
    assert_eq!(seed.repository_name, "acme-widgets");
}

#[tokio::test]
async fn submission_without_task_id_is_payload_error() {
    let app = Router::new().route(
        "/api/v1/index/local",
        post(|| async { Json(json!({ "accepted": true })) }),
    );
    let base = serve(app).await;

    let err = backend(base)
        .submit_local(&LocalIndexRequest {
            repo_path: "/tmp/x".into(),
            repository_name: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Payload(_)), "got {err:?}");
}

#[test]
fn repository_names_are_derived_from_sources() {
    assert_eq!(repository_name_from("/srv/repos/payments/"), "payments");
    assert_eq!(
        repository_name_from("https://github.com/acme/widgets.git"),
        "widgets"
    );
    assert_eq!(repository_name_from("git@github.com:acme/tools.git"), "tools");
    assert_eq!(repository_name_from("C:\\code\\engine"), "engine");
}
