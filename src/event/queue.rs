//! Queue abstraction for received events

use crate::event::ReceiveTask;
use crate::utils::AppError;
use async_trait::async_trait;
use uuid::Uuid;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, AppError>;

/// Outcome of recording a received event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new task was queued
    Queued(Uuid),
    /// The event id was already received; the existing task is reported
    Duplicate(Uuid),
}

impl Enqueued {
    pub fn task_id(&self) -> Uuid {
        match self {
            Enqueued::Queued(id) | Enqueued::Duplicate(id) => *id,
        }
    }
}

/// Event queue trait defining the interface for queue implementations
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Record a received event. Events are deduplicated by event id.
    async fn push(&self, task: ReceiveTask) -> QueueResult<Enqueued>;

    /// Take the oldest pending task, or None if the queue is empty
    async fn pop(&self) -> QueueResult<Option<ReceiveTask>>;

    /// Mark a task as completed and remove it from processing
    async fn complete(&self, task_id: Uuid) -> QueueResult<()>;

    /// Mark a task as failed.
    /// If retry count reaches the limit, move to dead letter queue
    async fn fail(&self, task: ReceiveTask, reason: &str) -> QueueResult<()>;

    /// Move a task straight to the dead letter queue
    async fn dead_letter(&self, task: ReceiveTask, reason: &str) -> QueueResult<()>;

    /// Get the number of pending tasks
    async fn pending_count(&self) -> QueueResult<usize>;

    /// Get the number of tasks currently being processed
    async fn processing_count(&self) -> QueueResult<usize>;

    /// Latest bookkeeping record for an event id
    async fn status(&self, event_id: &str) -> QueueResult<Option<ReceiveTask>>;

    /// Return tasks left in processing by an interrupted run to pending.
    /// Returns how many were re-queued.
    async fn recover(&self) -> QueueResult<usize>;
}

/// Configuration for event queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum retry attempts before moving to DLQ
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}
