//! Received events and their bookkeeping records

use crate::utils::{DispatchError, DispatchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

/// A CloudEvents 1.0 event in structured JSON form.
///
/// The payload tree is kept verbatim: routing predicates run against it,
/// model adapters read `$.data` from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: String,
    source: String,
    spec_version: String,
    event_type: String,
    payload: Value,
}

impl Event {
    /// Validate the envelope and wrap the payload.
    pub fn from_payload(payload: Value) -> DispatchResult<Self> {
        let Value::Object(map) = &payload else {
            return Err(DispatchError::malformed("event payload must be a JSON object"));
        };
        let required = |name: &str| -> DispatchResult<String> {
            match map.get(name) {
                Some(Value::String(value)) if !value.is_empty() => Ok(value.clone()),
                Some(_) => Err(DispatchError::malformed(format!(
                    "event attribute '{}' must be a non-empty string",
                    name
                ))),
                None => Err(DispatchError::malformed(format!(
                    "event attribute '{}' is required",
                    name
                ))),
            }
        };

        let id = required("id")?;
        let source = required("source")?;
        let spec_version = required("specversion")?;
        let event_type = required("type")?;

        Ok(Self {
            id,
            source,
            spec_version,
            event_type,
            payload,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn spec_version(&self) -> &str {
        &self.spec_version
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn subject(&self) -> Option<&str> {
        self.payload.get("subject").and_then(Value::as_str)
    }

    pub fn time(&self) -> Option<&str> {
        self.payload.get("time").and_then(Value::as_str)
    }

    pub fn data_content_type(&self) -> Option<&str> {
        self.payload.get("datacontenttype").and_then(Value::as_str)
    }

    pub fn data(&self) -> Option<&Value> {
        self.payload.get("data")
    }

    /// The full payload tree, as received.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}

/// Processing status of a received event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in queue
    #[default]
    Pending,
    /// Currently being dispatched
    Processing,
    /// All matching handlers succeeded
    Completed,
    /// Dead-lettered
    Failed,
    /// Queued again after a retryable failure
    Retrying,
}

/// Record that an event was received and still has to be dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveTask {
    pub id: Uuid,
    pub event_id: String,
    pub event_type: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Set each time the task is queued again after a failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retried_at: Option<DateTime<Utc>>,
    /// Match keys (see [`crate::router::RouteMatch::key`]) whose handler
    /// already succeeded; a retry does not invoke them again
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_routes: Vec<String>,
}

impl ReceiveTask {
    /// Record a freshly received event.
    pub fn new(event: &Event) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id: event.id().to_string(),
            event_type: event.event_type().to_string(),
            payload: event.payload().clone(),
            received_at: Utc::now(),
            status: TaskStatus::Pending,
            retry_count: 0,
            last_error: None,
            retried_at: None,
            completed_routes: Vec::new(),
        }
    }

    /// Rebuild the event for dispatch.
    pub fn event(&self) -> DispatchResult<Event> {
        Event::from_payload(self.payload.clone())
    }

    /// When the task last entered the queue.
    pub fn queued_at(&self) -> DateTime<Utc> {
        self.retried_at.unwrap_or(self.received_at)
    }

    /// Filename for the file-based queue. Sorting filenames gives FIFO order
    /// by [`queued_at`](Self::queued_at), so a retried task goes to the back.
    pub fn to_filename(&self) -> String {
        format!(
            "{:020}_{}.json",
            self.queued_at().timestamp_micros().max(0),
            self.id
        )
    }
}
