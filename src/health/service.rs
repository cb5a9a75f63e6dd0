//! Process-wide readiness service shared by every consumer.
//!
//! [`StatusService::init`] starts exactly one [`HealthPoller`]; every view
//! obtains a [`StatusSubscriber`] from it instead of polling on its own.
//! Subscribers only read the shared snapshot and may ask for an
//! out-of-band refresh.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::ReadinessSource;
use crate::config::HealthConfig;
use crate::health::poller::{HealthPoller, HealthPollerHandle, HealthState};
use crate::models::readiness::ReadinessSnapshot;
use crate::{AppError, Result};

/// What a consumer sees.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusView {
    /// Latest snapshot, if any fetch has finished.
    pub data: Option<Arc<ReadinessSnapshot>>,
    /// `data.status == ready`.
    pub is_ready: bool,
    /// A fetch is in flight.
    pub is_loading: bool,
    /// The very first fetch has not finished.
    pub is_initial_load: bool,
    /// Error of the most recent fetch, if it failed.
    pub error: Option<String>,
    /// Time of the last successful fetch.
    pub last_updated: Option<DateTime<Utc>>,
}

impl From<&HealthState> for StatusView {
    fn from(state: &HealthState) -> Self {
        let data = state.snapshot.clone();
        Self {
            is_ready: data.as_deref().is_some_and(ReadinessSnapshot::is_ready),
            error: data.as_deref().and_then(|snap| snap.error.clone()),
            last_updated: data.as_deref().and_then(|snap| snap.last_updated),
            is_loading: state.is_loading,
            is_initial_load: state.is_initial_load,
            data,
        }
    }
}

/// Owner of the single health poller.
pub struct StatusService {
    poller: Mutex<Option<HealthPollerHandle>>,
    state_rx: watch::Receiver<HealthState>,
    cancel: CancellationToken,
}

impl StatusService {
    /// Start the shared poller.
    #[must_use]
    pub fn init(
        config: HealthConfig,
        request_timeout: Duration,
        source: Arc<dyn ReadinessSource>,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let handle = HealthPoller::new(config, request_timeout, source, cancel.child_token()).spawn();
        let state_rx = handle.subscribe();
        info!("status service initialised");
        Arc::new(Self {
            poller: Mutex::new(Some(handle)),
            state_rx,
            cancel,
        })
    }

    /// Obtain a new read-only subscriber.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>) -> StatusSubscriber {
        StatusSubscriber {
            service: Arc::clone(self),
            state_rx: self.state_rx.clone(),
        }
    }

    /// Current view.
    #[must_use]
    pub fn view(&self) -> StatusView {
        StatusView::from(&*self.state_rx.borrow())
    }

    /// Ask the poller for an immediate fetch. No-op after teardown.
    pub fn refresh(&self) {
        let guard = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = guard.as_ref() {
            handle.refresh();
        }
    }

    /// Whether the poller is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        let guard = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().is_some_and(HealthPollerHandle::is_running)
    }

    /// Stop the poller and wait for it to exit. Idempotent.
    pub async fn teardown(&self) {
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.cancel.cancel();
        if let Some(handle) = handle {
            handle.stop().await;
            info!("status service torn down");
        }
    }
}

impl Drop for StatusService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A consumer's handle on the shared readiness state.
#[derive(Clone)]
pub struct StatusSubscriber {
    service: Arc<StatusService>,
    state_rx: watch::Receiver<HealthState>,
}

impl StatusSubscriber {
    /// Current view.
    #[must_use]
    pub fn view(&self) -> StatusView {
        StatusView::from(&*self.state_rx.borrow())
    }

    /// Whether the backend is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.view().is_ready
    }

    /// Request an out-of-band update from the shared poller.
    pub fn refresh(&self) {
        self.service.refresh();
    }

    /// Wait for the next published change; `None` once the service is gone.
    pub async fn changed(&mut self) -> Option<StatusView> {
        self.state_rx.changed().await.ok()?;
        Some(StatusView::from(&*self.state_rx.borrow_and_update()))
    }

    /// Wait until the first fetch has finished.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConnectionLost` if the service stops first.
    pub async fn wait_for_initial_load(&mut self) -> Result<StatusView> {
        let state = self
            .state_rx
            .wait_for(|state| !state.is_initial_load)
            .await
            .map_err(|_| AppError::ConnectionLost("status service stopped".into()))?;
        Ok(StatusView::from(&*state))
    }

    /// Gate for operations that require a ready backend.
    ///
    /// Stricter than [`is_ready`](Self::is_ready): a backend last seen ready
    /// but failing its most recent poll does not pass.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotReady` naming the failing components or the
    /// last fetch error.
    pub fn ensure_ready(&self) -> Result<()> {
        let view = self.view();
        if view.is_ready && view.error.is_none() {
            return Ok(());
        }
        Err(AppError::NotReady(describe_not_ready(&view)))
    }
}

fn describe_not_ready(view: &StatusView) -> String {
    let Some(snapshot) = view.data.as_deref() else {
        return "backend readiness not yet known".into();
    };
    if let Some(err) = &snapshot.error {
        return format!("backend unreachable ({err})");
    }
    let failing: Vec<String> = snapshot
        .failing_checks()
        .into_iter()
        .map(|(name, error)| match error {
            Some(error) => format!("{name}: {error}"),
            None => name.to_owned(),
        })
        .collect();
    if failing.is_empty() {
        format!("backend status is {:?}", snapshot.status)
    } else {
        format!("components not ready: {}", failing.join(", "))
    }
}
