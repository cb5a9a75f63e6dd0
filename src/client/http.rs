//! HTTP client for the readiness, status, and submission endpoints.

use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::client::{BoxFuture, ReadinessSource, TaskStatusSource};
use crate::config::BackendConfig;
use crate::models::message::decode_task_records;
use crate::models::readiness::ReadinessReport;
use crate::models::task::{TaskStatus, TaskUpdate};
use crate::{AppError, Result};

/// Body of a local repository indexing request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LocalIndexRequest {
    /// Path of the repository on the backend host.
    pub repo_path: String,
    /// Display name; derived from the path when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_name: Option<String>,
}

/// Body of a remote repository indexing request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RemoteIndexRequest {
    /// Clone URL.
    pub repo_url: String,
    /// Branch to index; backend default when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Display name; derived from the URL when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
    #[serde(default)]
    repository_name: Option<String>,
}

/// Derive a display name from a path or clone URL (`.../repo.git` -> `repo`).
#[must_use]
pub fn repository_name_from(source: &str) -> String {
    let trimmed = source.trim_end_matches(['/', '\\']);
    let last = trimmed
        .rsplit(['/', '\\', ':'])
        .next()
        .unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_owned()
}

/// reqwest-backed client for the backend's REST surface.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl HttpBackend {
    /// Build a client whose every request is bounded by
    /// `config.request_timeout_ms`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the endpoints are malformed or the
    /// HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        // Fail fast on malformed endpoint configuration.
        config.http_url(&config.readiness_path)?;
        config.http_url(&config.indexing_status_path)?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Fetch the readiness report.
    ///
    /// # Errors
    ///
    /// Returns connectivity, non-2xx, or payload errors.
    pub async fn readiness(&self) -> Result<ReadinessReport> {
        let url = self.config.http_url(&self.config.readiness_path)?;
        let body = self.get_json(url).await?;
        ReadinessReport::from_value(body)
    }

    /// Fetch the current record of one task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when the response holds no record for
    /// `task_id`, plus connectivity and payload errors.
    pub async fn task_status(&self, task_id: &str) -> Result<TaskUpdate> {
        let mut url = self.config.http_url(&self.config.indexing_status_path)?;
        url.query_pairs_mut().append_pair("task_id", task_id);
        let body = self.get_json(url).await?;
        decode_task_records(body)?
            .into_iter()
            .find(|update| update.task_id == task_id)
            .ok_or_else(|| AppError::NotFound(format!("no status for task {task_id}")))
    }

    /// List every task the backend currently tracks.
    ///
    /// # Errors
    ///
    /// Returns connectivity, non-2xx, or payload errors.
    pub async fn list_tasks(&self) -> Result<Vec<TaskStatus>> {
        let url = self.config.http_url(&self.config.indexing_status_path)?;
        let body = self.get_json(url).await?;
        Ok(decode_task_records(body)?
            .iter()
            .map(TaskStatus::from_update)
            .collect())
    }

    /// Submit a local repository for indexing.
    ///
    /// # Errors
    ///
    /// Returns connectivity, non-2xx, or payload errors.
    pub async fn submit_local(&self, request: &LocalIndexRequest) -> Result<TaskStatus> {
        let url = self.config.http_url(&self.config.index_local_path)?;
        let fallback_name = request
            .repository_name
            .clone()
            .unwrap_or_else(|| repository_name_from(&request.repo_path));
        self.submit(url, request, fallback_name).await
    }

    /// Submit a remote repository for indexing.
    ///
    /// # Errors
    ///
    /// Returns connectivity, non-2xx, or payload errors.
    pub async fn submit_remote(&self, request: &RemoteIndexRequest) -> Result<TaskStatus> {
        let url = self.config.http_url(&self.config.index_remote_path)?;
        let fallback_name = request
            .repository_name
            .clone()
            .unwrap_or_else(|| repository_name_from(&request.repo_url));
        self.submit(url, request, fallback_name).await
    }

    async fn submit<B: Serialize + Sync>(
        &self,
        url: Url,
        body: &B,
        fallback_name: String,
    ) -> Result<TaskStatus> {
        let response = self.client.post(url.clone()).json(body).send().await?;
        let value = Self::read_json(&url, response).await?;
        let submitted: SubmitResponse = serde_json::from_value(value)
            .map_err(|err| AppError::Payload(format!("submission response: {err}")))?;
        if submitted.task_id.trim().is_empty() {
            return Err(AppError::Payload("submission returned an empty task_id".into()));
        }

        info!(task_id = %submitted.task_id, "indexing task submitted");
        Ok(TaskStatus::placeholder(
            submitted.task_id,
            submitted.repository_name.unwrap_or(fallback_name),
        ))
    }

    async fn get_json(&self, url: Url) -> Result<Value> {
        debug!(%url, "GET");
        let response = self.client.get(url.clone()).send().await?;
        Self::read_json(&url, response).await
    }

    async fn read_json(url: &Url, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("{url} returned 404")));
        }
        if !status.is_success() {
            return Err(AppError::Http(format!("{url} returned {status}")));
        }
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|err| AppError::Payload(format!("{url} returned invalid json: {err}")))
    }
}

impl ReadinessSource for HttpBackend {
    fn fetch_readiness(&self) -> BoxFuture<'_, Result<ReadinessReport>> {
        Box::pin(self.readiness())
    }
}

impl TaskStatusSource for HttpBackend {
    fn fetch_task<'a>(&'a self, task_id: &'a str) -> BoxFuture<'a, Result<TaskUpdate>> {
        Box::pin(self.task_status(task_id))
    }
}
