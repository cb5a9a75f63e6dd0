//! Push-channel message envelopes.
//!
//! # Known inbound types
//!
//! | `type`            | Maps to                             |
//! |-------------------|-------------------------------------|
//! | `status_update`   | [`ChannelMessage::StatusUpdate`]    |
//! | `task_status`     | [`ChannelMessage::StatusUpdate`]    |
//! | `connection_info` | [`ChannelMessage::ConnectionInfo`]  |
//! | `error`           | [`ChannelMessage::Error`]           |
//! | *(any other)*     | Skipped; logged at `DEBUG`          |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::task::TaskUpdate;
use crate::{AppError, Result};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// One or more task records.
    StatusUpdate(Vec<TaskUpdate>),
    /// Server greeting or connection metadata.
    ConnectionInfo(Value),
    /// Channel-level error notice from the server. Not a task failure.
    Error(String),
}

/// Outbound client message.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Scope a shared channel to one task.
    SubscribeTask {
        /// Task to receive updates for.
        task_id: String,
    },
    /// Stop receiving updates for a task.
    UnsubscribeTask {
        /// Task to stop receiving updates for.
        task_id: String,
    },
}

impl ClientMessage {
    /// Serialize to the JSON text frame sent over the channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Payload` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(AppError::from)
    }
}

/// Parse one text frame from the push channel.
///
/// # Return value
///
/// - `Ok(Some(message))` for a recognized envelope.
/// - `Ok(None)` for blank frames and unknown `type`s.
///
/// # Errors
///
/// Returns `AppError::Payload` if the frame is not valid JSON, lacks a
/// `type`, or a recognized type carries an unusable body.
pub fn parse_channel_message(text: &str) -> Result<Option<ChannelMessage>> {
    if text.trim().is_empty() {
        return Ok(None);
    }

    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|err| AppError::Payload(format!("malformed envelope: {err}")))?;

    match envelope.kind.as_str() {
        "status_update" | "task_status" => {
            let data = envelope.data.ok_or_else(|| {
                AppError::Payload(format!("{} message without data", envelope.kind))
            })?;
            Ok(Some(ChannelMessage::StatusUpdate(decode_task_records(data)?)))
        }
        "connection_info" => Ok(Some(ChannelMessage::ConnectionInfo(
            envelope.data.unwrap_or(Value::Null),
        ))),
        "error" => Ok(Some(ChannelMessage::Error(
            envelope
                .message
                .or_else(|| {
                    envelope
                        .data
                        .as_ref()
                        .and_then(|d| d.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_owned)
                })
                .unwrap_or_else(|| "unspecified channel error".into()),
        ))),
        other => {
            debug!(kind = other, "skipping unknown channel message type");
            Ok(None)
        }
    }
}

/// Decode task records from any of the shapes the backend uses: a single
/// object, an array, or an object wrapping a `tasks`/`active_tasks` array.
///
/// Individually malformed records inside a collection are logged and
/// skipped.
///
/// # Errors
///
/// Returns `AppError::Payload` if the value is none of the accepted shapes,
/// or if a lone record is malformed.
pub fn decode_task_records(value: Value) -> Result<Vec<TaskUpdate>> {
    match value {
        Value::Array(items) => Ok(decode_many(items)),
        Value::Object(mut map) => {
            for key in ["tasks", "active_tasks"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Ok(decode_many(items));
                }
            }
            Ok(vec![TaskUpdate::from_value(Value::Object(map))?])
        }
        other => Err(AppError::Payload(format!(
            "expected task record(s), got {}",
            json_kind(&other)
        ))),
    }
}

fn decode_many(items: Vec<Value>) -> Vec<TaskUpdate> {
    items
        .into_iter()
        .filter_map(|item| match TaskUpdate::from_value(item) {
            Ok(update) => Some(update),
            Err(err) => {
                warn!(%err, "dropping malformed task record");
                None
            }
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
