//! Event processor: drains the receive queue through the router
//!
//! Dispatch failures go back to the queue, which owns the retry policy.
//! Failures that cannot succeed on a second run (malformed payloads) are
//! dead-lettered straight away. A retried task carries the keys of the
//! match entries that already succeeded, and those handlers are not run
//! again.

use crate::event::EventQueue;
use crate::router::{DispatchFailure, Router};
use crate::utils::logging::event_span;
use crate::utils::AppError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn, Instrument};

/// Event processor that handles received events from the queue
pub struct EventProcessor<Q: EventQueue> {
    queue: Arc<Q>,
    router: Arc<Router>,
    poll_interval: Duration,
}

impl<Q: EventQueue> EventProcessor<Q> {
    pub fn new(queue: Arc<Q>, router: Arc<Router>) -> Self {
        Self {
            queue,
            router,
            poll_interval: Duration::from_millis(1000),
        }
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Process a single task from the queue
    ///
    /// Returns:
    /// - Ok(true) if a task was processed
    /// - Ok(false) if the queue was empty
    /// - Err if dispatch failed (the task has already been failed on the queue)
    #[instrument(skip(self), level = "debug")]
    pub async fn process_once(&self) -> Result<bool, AppError> {
        let Some(task) = self.queue.pop().await? else {
            debug!("Queue is empty, no task to process");
            return Ok(false);
        };

        info!(
            task_id = %task.id,
            event_id = %task.event_id,
            event_type = %task.event_type,
            retry_count = task.retry_count,
            "Processing received event"
        );

        let result = match task.event() {
            Ok(event) => self
                .router
                .dispatch_resuming(&event, &task.completed_routes)
                .instrument(event_span(&task))
                .await
                .map(|outcomes| outcomes.len()),
            Err(e) => Err(DispatchFailure::from(e)),
        };

        match result {
            Ok(handled) => {
                self.queue.complete(task.id).await?;
                info!(task_id = %task.id, handlers = handled, "Event dispatched successfully");
                Ok(true)
            }
            Err(DispatchFailure { completed, error: e }) => {
                error!(
                    task_id = %task.id,
                    error = %e,
                    retry_count = task.retry_count,
                    completed_routes = completed.len(),
                    "Event dispatch failed"
                );
                let mut task = task;
                if !completed.is_empty() {
                    task.completed_routes = completed;
                }
                let reason = e.to_string();
                if e.is_retryable() {
                    self.queue.fail(task, &reason).await?;
                } else {
                    self.queue.dead_letter(task, &reason).await?;
                }
                Err(AppError::from(e))
            }
        }
    }

    /// Run until `shutdown` resolves. A task already popped is always
    /// finished before the loop exits.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "Starting event processor loop");
        tokio::pin!(shutdown);

        loop {
            let idle = match self.process_once().await {
                Ok(processed) => !processed,
                Err(e) => {
                    warn!(error = %e, "Event processing error");
                    true
                }
            };

            let pause = if idle { self.poll_interval } else { Duration::ZERO };
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Event processor stopped");
    }

    /// Process up to `max_iterations` tasks, stopping early on an empty queue
    pub async fn run_iterations(&self, max_iterations: usize) -> Result<usize, AppError> {
        let mut processed = 0;
        for _ in 0..max_iterations {
            match self.process_once().await {
                Ok(true) => processed += 1,
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, "Event processing error");
                    processed += 1;
                }
            }
        }
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, FileEventQueue, ReceiveTask, TaskStatus};
    use crate::handler::{EventHandler, HandlerOutcome, MockEventHandler, TransformEventHandler, Uppercase};
    use crate::matcher::Predicate;
    use crate::models::MetadataValue;
    use crate::runner::{Bundle, FileOpener, MockDownloaderRunner, MockUploaderRunner, UploadReceipt};
    use crate::utils::DispatchError;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_queue() -> (TempDir, Arc<FileEventQueue>) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let queue = FileEventQueue::new(dir.path().to_path_buf()).expect("Failed to create test queue");
        (dir, Arc::new(queue))
    }

    fn create_test_processor(queue: Arc<FileEventQueue>, handler: MockEventHandler) -> EventProcessor<FileEventQueue> {
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        let mut router = Router::new();
        router.add_route(Predicate::parse("$.type == \"transaction.created\"").unwrap(), handler);
        EventProcessor::new(queue, Arc::new(router)).with_poll_interval(Duration::from_millis(10))
    }

    fn created_task(event_id: &str) -> ReceiveTask {
        let event = Event::from_payload(json!({
            "specversion": "1.0",
            "id": event_id,
            "source": "/catalog",
            "type": "transaction.created",
            "data": {}
        }))
        .unwrap();
        ReceiveTask::new(&event)
    }

    #[tokio::test]
    async fn should_return_false_for_empty_queue() {
        // Arrange
        let (_dir, queue) = create_test_queue();
        let mut handler = MockEventHandler::new();
        handler.expect_handle().times(0);
        let processor = create_test_processor(queue, handler);

        // Act
        let processed = processor.process_once().await.unwrap();

        // Assert
        assert!(!processed);
    }

    #[tokio::test]
    async fn should_complete_task_after_successful_dispatch() {
        // Arrange
        let (_dir, queue) = create_test_queue();
        queue.push(created_task("evt-ok")).await.unwrap();
        let mut handler = MockEventHandler::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_| Ok(HandlerOutcome::default()));
        let processor = create_test_processor(queue.clone(), handler);

        // Act
        let processed = processor.process_once().await.unwrap();

        // Assert
        assert!(processed);
        let status = queue.status("evt-ok").await.unwrap().unwrap();
        assert_eq!(status.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn should_requeue_task_after_retryable_failure() {
        // Arrange
        let (_dir, queue) = create_test_queue();
        queue.push(created_task("evt-retry")).await.unwrap();
        let mut handler = MockEventHandler::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_| Err(DispatchError::upload("connection refused")));
        let processor = create_test_processor(queue.clone(), handler);

        // Act
        let result = processor.process_once().await;

        // Assert
        assert!(result.is_err());
        let status = queue.status("evt-retry").await.unwrap().unwrap();
        assert_eq!(status.status, TaskStatus::Retrying);
        assert_eq!(status.retry_count, 1);
        assert!(status.last_error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn should_dead_letter_malformed_event() {
        // Arrange
        let (_dir, queue) = create_test_queue();
        queue.push(created_task("evt-bad")).await.unwrap();
        let mut handler = MockEventHandler::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_| Err(DispatchError::malformed("transaction is missing")));
        let processor = create_test_processor(queue.clone(), handler);

        // Act
        let result = processor.process_once().await;

        // Assert
        assert!(result.is_err());
        let status = queue.status("evt-bad").await.unwrap().unwrap();
        assert_eq!(status.status, TaskStatus::Failed);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn should_complete_event_without_matching_route() {
        // Arrange
        let (_dir, queue) = create_test_queue();
        let event = Event::from_payload(json!({
            "specversion": "1.0",
            "id": "evt-other",
            "source": "/catalog",
            "type": "transaction.deleted"
        }))
        .unwrap();
        queue.push(ReceiveTask::new(&event)).await.unwrap();
        let mut handler = MockEventHandler::new();
        handler.expect_handle().times(0);
        let processor = create_test_processor(queue.clone(), handler);

        // Act
        processor.process_once().await.unwrap();

        // Assert
        let status = queue.status("evt-other").await.unwrap().unwrap();
        assert_eq!(status.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn should_stop_iterations_at_empty_queue() {
        // Arrange
        let (_dir, queue) = create_test_queue();
        queue.push(created_task("evt-1")).await.unwrap();
        queue.push(created_task("evt-2")).await.unwrap();
        let mut handler = MockEventHandler::new();
        handler
            .expect_handle()
            .times(2)
            .returning(|_| Ok(HandlerOutcome::default()));
        let processor = create_test_processor(queue, handler);

        // Act
        let processed = processor.run_iterations(10).await.unwrap();

        // Assert
        assert_eq!(processed, 2);
    }

    #[tokio::test]
    async fn should_drain_queue_then_stop_on_shutdown() {
        // Arrange
        let (_dir, queue) = create_test_queue();
        queue.push(created_task("evt-loop")).await.unwrap();
        let mut handler = MockEventHandler::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_| Ok(HandlerOutcome::default()));
        let processor = create_test_processor(queue.clone(), handler);

        // Act
        tokio::time::timeout(
            Duration::from_secs(5),
            processor.run(tokio::time::sleep(Duration::from_millis(100))),
        )
        .await
        .expect("processor should stop on shutdown");

        // Assert
        let status = queue.status("evt-loop").await.unwrap().unwrap();
        assert_eq!(status.status, TaskStatus::Completed);
    }

    fn transaction_task(event_id: &str) -> ReceiveTask {
        let event = Event::from_payload(json!({
            "specversion": "1.0",
            "id": event_id,
            "source": "/catalog",
            "type": "transaction.created",
            "data": {
                "transaction": {"_id": 42, "submitter": "alice", "instrument": "I1", "project": "P1"},
                "files": [{"path": "data/sample.txt"}]
            }
        }))
        .unwrap();
        ReceiveTask::new(&event)
    }

    #[tokio::test]
    async fn should_not_upload_again_when_a_later_route_is_retried() {
        // Arrange
        let (_dir, queue) = create_test_queue();
        queue.push(transaction_task("evt-two-routes")).await.unwrap();

        let mut downloader = MockDownloaderRunner::new();
        downloader.expect_download().times(1).returning(|destination, files| {
            files
                .iter()
                .map(|file| {
                    let target = destination.join(file.path());
                    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
                    std::fs::write(&target, b"hello").unwrap();
                    Ok(FileOpener::new(target))
                })
                .collect()
        });
        let mut uploader = MockUploaderRunner::new();
        uploader.expect_upload().times(1).returning(|_, transaction, key_values| {
            Ok(UploadReceipt {
                bundle: Bundle {
                    transaction: transaction.clone(),
                    key_values: key_values.to_vec(),
                    files: Vec::new(),
                },
                job_id: MetadataValue::Integer(1),
                state: json!({"state": "OK"}),
            })
        });
        let transform: Arc<dyn EventHandler> = Arc::new(TransformEventHandler::new(
            Arc::new(downloader),
            Arc::new(uploader),
            Arc::new(Uppercase),
        ));

        let mut flaky = MockEventHandler::new();
        let mut seq = mockall::Sequence::new();
        flaky
            .expect_handle()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(DispatchError::upload("ingest unavailable")));
        flaky
            .expect_handle()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HandlerOutcome::default()));

        let mut router = Router::new();
        router
            .add_named_route("uppercase", Predicate::parse("$.type == \"transaction.created\"").unwrap(), transform)
            .add_named_route("notify", Predicate::parse("$.source").unwrap(), Arc::new(flaky));
        let processor = EventProcessor::new(queue.clone(), Arc::new(router));

        // Act
        let first = processor.process_once().await;
        let second = processor.process_once().await;

        // Assert
        assert!(first.is_err());
        assert!(second.unwrap());
        let status = queue.status("evt-two-routes").await.unwrap().unwrap();
        assert_eq!(status.status, TaskStatus::Completed);
        assert_eq!(status.retry_count, 1);
    }
}
