//! Backend readiness poller with exponential failure backoff.
//!
//! A [`HealthPoller`] runs one background loop that fetches the readiness
//! endpoint, publishes a fresh [`ReadinessSnapshot`] through a `watch`
//! channel, and schedules the next fetch after the base interval (on
//! success) or the doubled backoff delay (on failure). The loop awaits each
//! fetch before scheduling the next one, so at most one request is ever in
//! flight. A [`refresh`](HealthPollerHandle::refresh) cuts the pending wait
//! short and resets the backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::backoff::BackoffState;
use crate::client::ReadinessSource;
use crate::config::HealthConfig;
use crate::models::readiness::{ReadinessSnapshot, ReadinessStatus};
use crate::AppError;

/// Everything the poller publishes after each step.
#[derive(Debug, Clone)]
pub struct HealthState {
    /// Latest snapshot; `None` until the first fetch finishes.
    pub snapshot: Option<Arc<ReadinessSnapshot>>,
    /// A fetch is currently in flight.
    pub is_loading: bool,
    /// The first fetch has not finished yet.
    pub is_initial_load: bool,
    /// Delay until the next scheduled fetch; `None` while fetching or when
    /// polling is disabled.
    pub next_poll_in: Option<Duration>,
    /// Failed fetches since the last success.
    pub consecutive_failures: u32,
    /// Fetches finished so far, successful or not.
    pub polls_completed: u64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            snapshot: None,
            is_loading: true,
            is_initial_load: true,
            next_poll_in: None,
            consecutive_failures: 0,
            polls_completed: 0,
        }
    }
}

/// Builder for the readiness poller.
///
/// Call [`spawn`](Self::spawn) to start the background loop.
pub struct HealthPoller {
    config: HealthConfig,
    request_timeout: Duration,
    source: Arc<dyn ReadinessSource>,
    cancel: CancellationToken,
}

impl HealthPoller {
    /// Construct a poller (does not start it yet).
    #[must_use]
    pub fn new(
        config: HealthConfig,
        request_timeout: Duration,
        source: Arc<dyn ReadinessSource>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            request_timeout,
            source,
            cancel,
        }
    }

    /// Spawn the polling loop and return a handle controlling it.
    #[must_use]
    pub fn spawn(self) -> HealthPollerHandle {
        let (state_tx, state_rx) = watch::channel(HealthState::default());
        let refresh = Arc::new(Notify::new());
        let cancel = self.cancel.clone();

        let join_handle = tokio::spawn(
            self.run(state_tx, Arc::clone(&refresh))
                .instrument(info_span!("health_poller")),
        );

        HealthPollerHandle {
            state_rx,
            refresh,
            cancel,
            join_handle: Some(join_handle),
        }
    }

    async fn run(self, state_tx: watch::Sender<HealthState>, refresh: Arc<Notify>) {
        let mut backoff =
            BackoffState::new(self.config.poll_interval(), self.config.max_backoff());
        let mut current: Option<Arc<ReadinessSnapshot>> = None;
        let mut polls_completed: u64 = 0;

        info!(
            interval_ms = self.config.poll_interval_ms,
            max_backoff_ms = self.config.max_backoff_ms,
            disabled = self.config.disable_polling,
            "health poller started"
        );

        loop {
            state_tx.send_modify(|state| {
                state.is_loading = true;
                state.next_poll_in = None;
            });

            let fetched = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = tokio::time::timeout(self.request_timeout, self.source.fetch_readiness()) => {
                    result.unwrap_or_else(|_| {
                        Err(AppError::Timeout(format!(
                            "readiness check exceeded {}ms",
                            self.request_timeout.as_millis()
                        )))
                    })
                }
            };
            polls_completed += 1;

            let delay = match fetched {
                Ok(report) => {
                    let snapshot = ReadinessSnapshot::from_report(
                        report,
                        Utc::now(),
                        self.config.suppress_check_errors_when_ready,
                    );
                    log_transition(current.as_deref(), &snapshot);
                    current = Some(Arc::new(snapshot));
                    backoff.reset()
                }
                Err(err) => {
                    let delay = backoff.record_failure();
                    warn!(
                        %err,
                        failures = backoff.consecutive_failures(),
                        retry_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "readiness check failed"
                    );
                    current = Some(Arc::new(ReadinessSnapshot::unreachable(
                        current.as_deref(),
                        &err,
                    )));
                    delay
                }
            };

            let scheduled = (!self.config.disable_polling).then_some(delay);
            state_tx.send_replace(HealthState {
                snapshot: current.clone(),
                is_loading: false,
                is_initial_load: false,
                next_poll_in: scheduled,
                consecutive_failures: backoff.consecutive_failures(),
                polls_completed,
            });

            let manual = match scheduled {
                Some(delay) => tokio::select! {
                    () = self.cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => false,
                    () = refresh.notified() => true,
                },
                None => tokio::select! {
                    () = self.cancel.cancelled() => break,
                    () = refresh.notified() => true,
                },
            };

            if manual {
                debug!("manual refresh requested");
                backoff.reset();
            }
        }

        state_tx.send_modify(|state| {
            state.is_loading = false;
            state.next_poll_in = None;
        });
        info!(polls_completed, "health poller stopped");
    }
}

fn log_transition(previous: Option<&ReadinessSnapshot>, next: &ReadinessSnapshot) {
    let before = previous.map_or(ReadinessStatus::Unknown, |snap| snap.status);
    let recovered = previous.is_some_and(|snap| snap.error.is_some());
    if before != next.status || recovered {
        info!(
            from = ?before,
            to = ?next.status,
            health_score = next.health_score,
            "backend readiness changed"
        );
    } else {
        debug!(status = ?next.status, health_score = next.health_score, "readiness unchanged");
    }
    for (name, error) in next.failing_checks() {
        debug!(component = name, error = error.unwrap_or(""), "component not ready");
    }
}

/// Handle returned from [`HealthPoller::spawn`].
pub struct HealthPollerHandle {
    state_rx: watch::Receiver<HealthState>,
    refresh: Arc<Notify>,
    cancel: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl Drop for HealthPollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl HealthPollerHandle {
    /// Poll now instead of waiting for the scheduled fetch, and reset the
    /// backoff. If a fetch is in flight, the next one starts right after it.
    pub fn refresh(&self) {
        self.refresh.notify_one();
    }

    /// A receiver observing every published [`HealthState`].
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.state_rx.clone()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HealthState {
        self.state_rx.borrow().clone()
    }

    /// Whether the background loop is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}
