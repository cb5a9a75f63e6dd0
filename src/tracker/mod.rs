//! Per-task progress tracker with push-channel streaming and pull fallback.
//!
//! A [`TaskTracker`] observes one indexing task. It opens the push channel,
//! subscribes to the task, and folds every inbound record into its
//! [`TaskStatus`] through [`TaskStatus::apply`], so progress never moves
//! backwards regardless of arrival order. Failed or dropped connections are
//! retried with exponential delays; once `max_reconnect_attempts`
//! consecutive attempts fail, the tracker switches to pulling the status
//! endpoint on a fixed interval.
//!
//! | From            | Trigger                                  | To                |
//! |-----------------|------------------------------------------|-------------------|
//! | Connecting      | channel opened                           | Streaming         |
//! | Connecting      | connect failed, budget left              | Reconnecting      |
//! | Streaming       | channel closed or errored, budget left   | Reconnecting      |
//! | Connecting/Streaming | budget exhausted                    | Polling           |
//! | Reconnecting    | delay elapsed                            | Connecting        |
//! | Streaming/Polling | `completed` / `failed` applied         | Completed / Failed|
//! | Polling         | `max_poll_failures` consecutive failures | ConnectionLost    |
//! | any non-final   | handle detached or dropped               | Detached          |
//!
//! Detaching only stops observation; the backend task keeps running and a
//! new tracker can attach later.

pub mod phase;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::backoff::ReconnectPolicy;
use crate::client::{PushChannel, PushConnector, TaskStatusSource};
use crate::config::TrackerConfig;
use crate::models::message::{parse_channel_message, ChannelMessage, ClientMessage};
use crate::models::task::{ApplyOutcome, TaskState, TaskStatus, TaskUpdate};
use crate::{AppError, Result};

pub use phase::{TrackerEvent, TrackerOutcome, TrackerPhase};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder for a per-task tracker.
///
/// Call [`attach`](Self::attach) to start observing.
pub struct TaskTracker {
    seed: TaskStatus,
    policy: ReconnectPolicy,
    poll_interval: Duration,
    max_poll_failures: u32,
    request_timeout: Duration,
    connector: Arc<dyn PushConnector>,
    source: Arc<dyn TaskStatusSource>,
    event_tx: mpsc::Sender<TrackerEvent>,
    cancel: CancellationToken,
}

impl TaskTracker {
    /// Construct a tracker seeded with the client-side record of the task
    /// (usually [`TaskStatus::placeholder`]).
    #[must_use]
    pub fn new(
        seed: TaskStatus,
        config: &TrackerConfig,
        connector: Arc<dyn PushConnector>,
        source: Arc<dyn TaskStatusSource>,
        event_tx: mpsc::Sender<TrackerEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            seed,
            policy: ReconnectPolicy::from(config),
            poll_interval: config.poll_interval(),
            max_poll_failures: config.max_poll_failures.max(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connector,
            source,
            event_tx,
            cancel,
        }
    }

    /// Bound every connect and pull request by `timeout`.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Spawn the tracker task and return a handle to it.
    #[must_use]
    pub fn attach(self) -> TaskTrackerHandle {
        let task_id = self.seed.task_id.clone();
        let (status_tx, status_rx) = watch::channel(self.seed.clone());
        let (phase_tx, phase_rx) = watch::channel(TrackerPhase::Connecting { attempt: 1 });
        let cancel = self.cancel.clone();

        let runner = Runner {
            task_id: task_id.clone(),
            status: self.seed,
            policy: self.policy,
            poll_interval: self.poll_interval,
            max_poll_failures: self.max_poll_failures,
            request_timeout: self.request_timeout,
            connector: self.connector,
            source: self.source,
            event_tx: self.event_tx,
            status_tx,
            phase_tx,
            cancel: self.cancel,
        };

        let span = info_span!("task_tracker", task_id = %task_id);
        let join_handle = tokio::spawn(runner.run().instrument(span));

        TaskTrackerHandle {
            task_id,
            status_rx,
            phase_rx,
            cancel,
            join_handle: Some(join_handle),
        }
    }
}

/// How a streaming session ended.
enum StreamEnd {
    Terminal,
    Cancelled,
    Dropped(String),
}

struct Runner {
    task_id: String,
    status: TaskStatus,
    policy: ReconnectPolicy,
    poll_interval: Duration,
    max_poll_failures: u32,
    request_timeout: Duration,
    connector: Arc<dyn PushConnector>,
    source: Arc<dyn TaskStatusSource>,
    event_tx: mpsc::Sender<TrackerEvent>,
    status_tx: watch::Sender<TaskStatus>,
    phase_tx: watch::Sender<TrackerPhase>,
    cancel: CancellationToken,
}

impl Runner {
    async fn run(mut self) -> TrackerOutcome {
        if self.status.is_terminal() {
            return self.finish_terminal().await;
        }

        let mut failures: u32 = 0;
        loop {
            self.set_phase(TrackerPhase::Connecting {
                attempt: failures + 1,
            });

            let connected = tokio::select! {
                () = self.cancel.cancelled() => return self.detached(),
                result = tokio::time::timeout(self.request_timeout, self.connector.connect()) => {
                    result.unwrap_or_else(|_| Err(AppError::Timeout("push channel connect timed out".into())))
                }
            };

            let reason = match connected {
                Ok(mut channel) => {
                    let end = self.stream(channel.as_mut(), &mut failures).await;
                    match end {
                        StreamEnd::Terminal => {
                            channel.close().await;
                            return self.finish_terminal().await;
                        }
                        StreamEnd::Cancelled => {
                            let unsubscribe = ClientMessage::UnsubscribeTask {
                                task_id: self.task_id.clone(),
                            };
                            if let Err(err) = channel.send(unsubscribe).await {
                                debug!(%err, "unsubscribe on detach failed");
                            }
                            channel.close().await;
                            return self.detached();
                        }
                        StreamEnd::Dropped(reason) => {
                            channel.close().await;
                            reason
                        }
                    }
                }
                Err(err) => err.to_string(),
            };

            failures += 1;
            if self.policy.is_exhausted(failures) {
                warn!(
                    attempts = failures,
                    %reason,
                    "push channel unavailable, falling back to polling"
                );
                break;
            }

            let delay = self.policy.next_delay(failures);
            info!(
                attempt = failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                %reason,
                "push channel down, reconnecting"
            );
            self.set_phase(TrackerPhase::Reconnecting {
                attempt: failures,
                delay,
            });
            tokio::select! {
                () = self.cancel.cancelled() => return self.detached(),
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.poll().await
    }

    /// Drive one open channel until it ends. `failures` is cleared only once
    /// the channel delivers a record for the attached task; greetings and
    /// other tasks' records do not count.
    async fn stream(&mut self, channel: &mut dyn PushChannel, failures: &mut u32) -> StreamEnd {
        let subscribe = ClientMessage::SubscribeTask {
            task_id: self.task_id.clone(),
        };
        if let Err(err) = channel.send(subscribe).await {
            return StreamEnd::Dropped(err.to_string());
        }
        self.set_phase(TrackerPhase::Streaming);

        loop {
            let frame = tokio::select! {
                () = self.cancel.cancelled() => return StreamEnd::Cancelled,
                frame = channel.next_frame() => frame,
            };

            let text = match frame {
                None => return StreamEnd::Dropped("closed by server".into()),
                Some(Err(AppError::Payload(msg))) => {
                    warn!(error = msg.as_str(), "dropping undecodable frame");
                    continue;
                }
                Some(Err(err)) => return StreamEnd::Dropped(err.to_string()),
                Some(Ok(text)) => text,
            };

            match parse_channel_message(&text) {
                Ok(Some(ChannelMessage::StatusUpdate(updates))) => {
                    for update in &updates {
                        if update.task_id == self.task_id {
                            *failures = 0;
                        }
                        if self.ingest(update) {
                            return StreamEnd::Terminal;
                        }
                    }
                }
                Ok(Some(ChannelMessage::ConnectionInfo(info))) => {
                    debug!(%info, "push channel connection info");
                }
                Ok(Some(ChannelMessage::Error(message))) => {
                    warn!(%message, "push channel reported an error");
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "dropping malformed push message"),
            }
        }
    }

    async fn poll(mut self) -> TrackerOutcome {
        self.set_phase(TrackerPhase::Polling);
        let mut failures: u32 = 0;

        loop {
            let fetched = tokio::select! {
                () = self.cancel.cancelled() => return self.detached(),
                result = tokio::time::timeout(self.request_timeout, self.source.fetch_task(&self.task_id)) => {
                    result.unwrap_or_else(|_| Err(AppError::Timeout("status pull timed out".into())))
                }
            };

            match fetched {
                Ok(update) => {
                    failures = 0;
                    if self.ingest(&update) {
                        return self.finish_terminal().await;
                    }
                }
                Err(AppError::Payload(msg)) => {
                    warn!(error = msg.as_str(), "dropping malformed status response");
                }
                Err(err) => {
                    failures += 1;
                    warn!(%err, failures, "status pull failed");
                    if failures >= self.max_poll_failures {
                        return self.connection_lost(err.to_string()).await;
                    }
                }
            }

            tokio::select! {
                () = self.cancel.cancelled() => return self.detached(),
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Apply one update; returns `true` once the task is terminal.
    fn ingest(&mut self, update: &TaskUpdate) -> bool {
        match self.status.apply(update) {
            ApplyOutcome::Applied => {
                debug!(
                    status = ?self.status.status,
                    stage = ?self.status.current_stage,
                    progress = self.status.overall_progress,
                    "task status updated"
                );
                self.status_tx.send_replace(self.status.clone());
                self.emit(TrackerEvent::Updated(self.status.clone()));
            }
            ApplyOutcome::Stale => debug!(
                sequence = ?update.sequence,
                progress = ?update.overall_progress,
                "discarding stale update"
            ),
            ApplyOutcome::OtherTask => trace!(other = %update.task_id, "update for another task"),
            ApplyOutcome::Unchanged | ApplyOutcome::Terminal => {}
        }
        self.status.is_terminal()
    }

    async fn finish_terminal(self) -> TrackerOutcome {
        let status = self.status.clone();
        if status.status == TaskState::Completed {
            info!(
                processed_files = status.processed_files,
                stored_chunks = status.stored_chunks,
                "task completed"
            );
            self.set_phase(TrackerPhase::Completed);
            self.emit_final(TrackerEvent::Completed(status.clone())).await;
            TrackerOutcome::Completed(status)
        } else {
            warn!(errors = status.errors.len(), "task failed");
            self.set_phase(TrackerPhase::Failed);
            self.emit_final(TrackerEvent::Failed(status.clone())).await;
            TrackerOutcome::Failed(status)
        }
    }

    async fn connection_lost(self, reason: String) -> TrackerOutcome {
        warn!(%reason, "lost connection to task, status unknown");
        self.set_phase(TrackerPhase::ConnectionLost);
        self.emit_final(TrackerEvent::ConnectionLost {
            last_known: self.status.clone(),
            reason: reason.clone(),
        })
        .await;
        TrackerOutcome::ConnectionLost {
            last_known: self.status,
            reason,
        }
    }

    fn detached(self) -> TrackerOutcome {
        debug!("tracker detached");
        self.set_phase(TrackerPhase::Detached);
        TrackerOutcome::Detached(self.status)
    }

    fn set_phase(&self, phase: TrackerPhase) {
        let changed = self.phase_tx.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                *current = phase;
                true
            }
        });
        if changed {
            self.emit(TrackerEvent::PhaseChanged {
                task_id: self.task_id.clone(),
                phase,
            });
        }
    }

    /// Best-effort delivery for progress events; the watch channels hold
    /// the authoritative state.
    fn emit(&self, event: TrackerEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            debug!(?event, "tracker event buffer full, dropping event");
        }
    }

    async fn emit_final(&self, event: TrackerEvent) {
        tokio::select! {
            () = self.cancel.cancelled() => {}
            _ = self.event_tx.send(event) => {}
        }
    }
}

/// Handle returned from [`TaskTracker::attach`].
pub struct TaskTrackerHandle {
    task_id: String,
    status_rx: watch::Receiver<TaskStatus>,
    phase_rx: watch::Receiver<TrackerPhase>,
    cancel: CancellationToken,
    join_handle: Option<JoinHandle<TrackerOutcome>>,
}

impl Drop for TaskTrackerHandle {
    /// Dropping the handle detaches the tracker.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl TaskTrackerHandle {
    /// Task being observed.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Latest reconciled status.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.status_rx.borrow().clone()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> TrackerPhase {
        *self.phase_rx.borrow()
    }

    /// Receiver observing every status change.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<TaskStatus> {
        self.status_rx.clone()
    }

    /// Receiver observing every phase change.
    #[must_use]
    pub fn subscribe_phase(&self) -> watch::Receiver<TrackerPhase> {
        self.phase_rx.clone()
    }

    /// Stop observing: close the channel, cancel timers, and wait for the
    /// tracker task to exit. The backend task is not cancelled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConnectionLost` if the tracker task panicked.
    pub async fn detach(mut self) -> Result<TrackerOutcome> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait until the tracker stops on its own.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConnectionLost` if the tracker task panicked.
    pub async fn outcome(mut self) -> Result<TrackerOutcome> {
        self.join().await
    }

    async fn join(&mut self) -> Result<TrackerOutcome> {
        let handle = self
            .join_handle
            .take()
            .ok_or_else(|| AppError::ConnectionLost("tracker already joined".into()))?;
        handle
            .await
            .map_err(|err| AppError::ConnectionLost(format!("tracker task ended abnormally: {err}")))
    }
}
