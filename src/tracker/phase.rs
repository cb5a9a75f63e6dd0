//! Tracker phases, events, and outcomes.

use std::time::Duration;

use crate::models::task::TaskStatus;
use crate::{AppError, Result};

/// Where the tracker is in its channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerPhase {
    /// Opening the push channel.
    Connecting {
        /// 1-based attempt number since the last healthy channel.
        attempt: u32,
    },
    /// Receiving updates over the push channel.
    Streaming,
    /// Waiting before the next connect attempt.
    Reconnecting {
        /// Consecutive failures so far.
        attempt: u32,
        /// Wait before the next attempt.
        delay: Duration,
    },
    /// Push channel abandoned; pulling status on an interval.
    Polling,
    /// Backend reported `completed`.
    Completed,
    /// Backend reported `failed`.
    Failed,
    /// Neither channel could reach the backend; task status unknown.
    ConnectionLost,
    /// Observation stopped by the caller; the backend task continues.
    Detached,
}

impl TrackerPhase {
    /// Whether the tracker has stopped and released its resources.
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::ConnectionLost | Self::Detached
        )
    }

    /// Short label for banners and logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Streaming => "streaming",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Polling => "polling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::ConnectionLost => "connection lost",
            Self::Detached => "detached",
        }
    }
}

/// Events emitted by a tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// The tracker moved to a new phase.
    PhaseChanged {
        /// Task being observed.
        task_id: String,
        /// New phase.
        phase: TrackerPhase,
    },
    /// The held status changed.
    Updated(TaskStatus),
    /// The task completed. Emitted at most once.
    Completed(TaskStatus),
    /// The backend reported the task as failed. Emitted at most once.
    Failed(TaskStatus),
    /// Both channels were exhausted before a terminal status arrived.
    ConnectionLost {
        /// Last status observed before contact was lost.
        last_known: TaskStatus,
        /// Final connectivity error.
        reason: String,
    },
}

/// How a tracker's observation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerOutcome {
    /// Task completed.
    Completed(TaskStatus),
    /// Backend reported failure.
    Failed(TaskStatus),
    /// Lost contact; status unknown.
    ConnectionLost {
        /// Last status observed.
        last_known: TaskStatus,
        /// Final connectivity error.
        reason: String,
    },
    /// Caller detached.
    Detached(TaskStatus),
}

impl TrackerOutcome {
    /// Latest status held when the tracker stopped.
    #[must_use]
    pub fn status(&self) -> &TaskStatus {
        match self {
            Self::Completed(status) | Self::Failed(status) | Self::Detached(status) => status,
            Self::ConnectionLost { last_known, .. } => last_known,
        }
    }

    /// Convert into a `Result`, keeping backend failures and lost
    /// connections distinct.
    ///
    /// # Errors
    ///
    /// `AppError::TaskFailed` carrying the backend's error messages, or
    /// `AppError::ConnectionLost` when the status is unknown.
    pub fn into_result(self) -> Result<TaskStatus> {
        match self {
            Self::Completed(status) | Self::Detached(status) => Ok(status),
            Self::Failed(status) => {
                let detail = status
                    .errors
                    .iter()
                    .map(|err| format!("{}: {}", err.error_type, err.error_message))
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(AppError::TaskFailed(if detail.is_empty() {
                    format!("task {} failed", status.task_id)
                } else {
                    format!("task {} failed ({detail})", status.task_id)
                }))
            }
            Self::ConnectionLost { last_known, reason } => Err(AppError::ConnectionLost(format!(
                "lost connection to task {}, status unknown ({reason})",
                last_known.task_id
            ))),
        }
    }
}
