use crate::event::{ReceiveTask, TaskStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Result of `POST /receive`
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveAccepted {
    #[schema(example = "A234-1234-1234")]
    pub event_id: String,
    pub task_id: Uuid,
    /// True when the event id had already been received
    pub duplicate: bool,
}

/// Bookkeeping record of a received event
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventStatusResponse {
    pub event_id: String,
    pub task_id: Uuid,
    #[schema(example = "transaction.created")]
    pub event_type: String,
    pub status: TaskStatus,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl From<ReceiveTask> for EventStatusResponse {
    fn from(task: ReceiveTask) -> Self {
        Self {
            event_id: task.event_id,
            task_id: task.id,
            event_type: task.event_type,
            status: task.status,
            retry_count: task.retry_count,
            last_error: task.last_error,
            received_at: task.received_at,
        }
    }
}

/// `POST /receive` success body (Swagger only)
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SuccessReceiveResponse {
    pub is_success: bool,
    #[schema(example = "COMMON202")]
    pub code: String,
    pub message: String,
    pub result: ReceiveAccepted,
}

/// `GET /receive/{event_id}` success body (Swagger only)
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SuccessEventStatusResponse {
    pub is_success: bool,
    pub code: String,
    pub message: String,
    pub result: EventStatusResponse,
}
