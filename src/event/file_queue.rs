//! File-based event queue
//!
//! Directory structure:
//! ```text
//! queue_dir/
//! ├── pending/     # Received events waiting to be dispatched
//! ├── processing/  # Events currently being dispatched
//! ├── completed/   # Successfully dispatched events
//! ├── dlq/         # Dead letter queue for failed events
//! └── index/       # One marker per received event id
//! ```
//!
//! Each task is one JSON file named `<queue time>_<task id>.json`, so the
//! pending directory sorts into FIFO order. A retried task is renamed with
//! its retry time and lines up behind everything received before it.
//!
//! Index markers are named by the SHA-256 of the event id and hold the task
//! id and current filename, so duplicate checks and status lookups never
//! scan the queue. Completed tasks are retained as the "event received"
//! record.
//!
//! All filesystem work runs on the blocking pool.

use crate::event::queue::{Enqueued, EventQueue, QueueConfig, QueueResult};
use crate::event::{ReceiveTask, TaskStatus};
use crate::utils::AppError;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const TASK_DIRS: [&str; 4] = ["pending", "processing", "completed", "dlq"];

/// File-based event queue implementation
/// Suitable for single-instance deployments
pub struct FileEventQueue {
    store: Arc<TaskStore>,
    /// Serializes queue operations across tasks
    lock: RwLock<()>,
}

/// Content of an index marker
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    task_id: Uuid,
    file: String,
}

/// Synchronous side of the queue. Callers hold the queue lock.
struct TaskStore {
    queue_dir: PathBuf,
    config: QueueConfig,
}

impl FileEventQueue {
    /// Create a new file-based event queue
    pub fn new(queue_dir: PathBuf) -> QueueResult<Self> {
        Self::with_config(queue_dir, QueueConfig::default())
    }

    /// Create a new file-based event queue with custom config.
    ///
    /// A queue directory written without an index gets one built here.
    pub fn with_config(queue_dir: PathBuf, config: QueueConfig) -> QueueResult<Self> {
        for dir in TASK_DIRS {
            create_dir(&queue_dir.join(dir))?;
        }
        let index_dir = queue_dir.join("index");
        let index_missing = !index_dir.exists();
        create_dir(&index_dir)?;

        let store = TaskStore { queue_dir, config };
        if index_missing {
            let indexed = store.rebuild_index()?;
            if indexed > 0 {
                info!(indexed, "Built event index for existing queue");
            }
        }

        info!(
            queue_dir = %store.queue_dir.display(),
            max_retries = store.config.max_retries,
            "File event queue initialized"
        );

        Ok(Self {
            store: Arc::new(store),
            lock: RwLock::new(()),
        })
    }

    /// Run `op` on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> QueueResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&TaskStore) -> QueueResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| AppError::InternalError(format!("Queue operation aborted: {}", e)))?
    }
}

fn create_dir(path: &Path) -> QueueResult<()> {
    fs::create_dir_all(path).map_err(|e| {
        error!(error = %e, dir = %path.display(), "Failed to create queue directory");
        AppError::InternalError(format!("Failed to create queue directory: {}", e))
    })
}

impl TaskStore {
    fn pending_dir(&self) -> PathBuf {
        self.queue_dir.join("pending")
    }

    fn processing_dir(&self) -> PathBuf {
        self.queue_dir.join("processing")
    }

    fn completed_dir(&self) -> PathBuf {
        self.queue_dir.join("completed")
    }

    fn dlq_dir(&self) -> PathBuf {
        self.queue_dir.join("dlq")
    }

    fn index_path(&self, event_id: &str) -> PathBuf {
        let digest = Sha256::digest(event_id.as_bytes());
        self.queue_dir.join("index").join(hex::encode(digest))
    }

    fn read_task_file(&self, path: &Path) -> QueueResult<ReceiveTask> {
        let content = fs::read_to_string(path).map_err(|e| {
            error!(error = %e, path = %path.display(), "Failed to read task file");
            AppError::InternalError(format!("Failed to read task file: {}", e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            error!(error = %e, path = %path.display(), "Failed to parse task file");
            AppError::InternalError(format!("Failed to parse task file: {}", e))
        })
    }

    fn write_task_file(&self, dir: &Path, task: &ReceiveTask) -> QueueResult<PathBuf> {
        let path = dir.join(task.to_filename());

        let content = serde_json::to_string_pretty(task).map_err(|e| {
            error!(error = %e, "Failed to serialize task");
            AppError::InternalError(format!("Failed to serialize task: {}", e))
        })?;

        fs::write(&path, content).map_err(|e| {
            error!(error = %e, path = %path.display(), "Failed to write task file");
            AppError::InternalError(format!("Failed to write task file: {}", e))
        })?;

        debug!(task_id = %task.id, path = %path.display(), "Task written to file");
        Ok(path)
    }

    /// Point the event id's marker at the task's current filename
    fn write_index(&self, task: &ReceiveTask) -> QueueResult<()> {
        let entry = IndexEntry {
            task_id: task.id,
            file: task.to_filename(),
        };
        let content = serde_json::to_vec(&entry)
            .map_err(|e| AppError::InternalError(format!("Failed to serialize index entry: {}", e)))?;
        fs::write(self.index_path(&task.event_id), content).map_err(|e| {
            error!(error = %e, event_id = %task.event_id, "Failed to write index marker");
            AppError::InternalError(format!("Failed to write index marker: {}", e))
        })
    }

    fn read_index(&self, event_id: &str) -> QueueResult<Option<IndexEntry>> {
        let path = self.index_path(event_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read(&path)
            .map_err(|e| AppError::InternalError(format!("Failed to read index marker: {}", e)))?;
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| AppError::InternalError(format!("Failed to parse index marker: {}", e)))
    }

    /// Index every task file that has no marker yet
    fn rebuild_index(&self) -> QueueResult<usize> {
        let mut indexed = 0;
        for dir in TASK_DIRS {
            for path in self.list_task_files(&self.queue_dir.join(dir))? {
                // Unparsable files are only ever dead letters; skip them.
                let Ok(task) = self.read_task_file(&path) else {
                    continue;
                };
                if !self.index_path(&task.event_id).exists() {
                    self.write_index(&task)?;
                    indexed += 1;
                }
            }
        }
        Ok(indexed)
    }

    /// `.json` files of a directory, sorted by name
    fn list_task_files(&self, dir: &Path) -> QueueResult<Vec<PathBuf>> {
        let entries = fs::read_dir(dir).map_err(|e| {
            error!(error = %e, dir = %dir.display(), "Failed to read directory");
            AppError::InternalError(format!("Failed to read directory: {}", e))
        })?;

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        Ok(files)
    }

    fn find_task_file(&self, dir: &Path, task_id: Uuid) -> QueueResult<Option<PathBuf>> {
        let suffix = format!("_{}.json", task_id);
        Ok(self
            .list_task_files(dir)?
            .into_iter()
            .find(|path| path.to_string_lossy().ends_with(&suffix)))
    }

    fn count_files_in_dir(&self, dir: &Path) -> QueueResult<usize> {
        Ok(self.list_task_files(dir)?.len())
    }

    fn remove_from_processing(&self, task_id: Uuid) -> QueueResult<()> {
        if let Some(path) = self.find_task_file(&self.processing_dir(), task_id)? {
            fs::remove_file(&path).map_err(|e| {
                error!(error = %e, task_id = %task_id, "Failed to remove task from processing");
                AppError::InternalError(format!("Failed to remove task from processing: {}", e))
            })?;
        }
        Ok(())
    }

    fn write_dead_letter(&self, mut task: ReceiveTask, reason: &str) -> QueueResult<()> {
        task.status = TaskStatus::Failed;
        task.last_error = Some(reason.to_string());
        self.write_task_file(&self.dlq_dir(), &task)?;

        warn!(
            task_id = %task.id,
            event_id = %task.event_id,
            retry_count = task.retry_count,
            reason = %reason,
            "Task moved to dead letter queue"
        );
        Ok(())
    }

    /// Look up a task through the index. A pending task keeps its own
    /// status (pending or retrying); the other directories imply one.
    fn find_by_event(&self, event_id: &str) -> QueueResult<Option<ReceiveTask>> {
        let Some(entry) = self.read_index(event_id)? else {
            return Ok(None);
        };
        let locations = [
            (self.processing_dir(), Some(TaskStatus::Processing)),
            (self.pending_dir(), None),
            (self.completed_dir(), Some(TaskStatus::Completed)),
            (self.dlq_dir(), Some(TaskStatus::Failed)),
        ];

        for (dir, status) in locations {
            let path = dir.join(&entry.file);
            if !path.exists() {
                continue;
            }
            let mut task = self.read_task_file(&path)?;
            if let Some(status) = status {
                task.status = status;
            }
            return Ok(Some(task));
        }

        warn!(event_id = %event_id, task_id = %entry.task_id, "Indexed task file is missing");
        Ok(None)
    }

    fn push(&self, task: ReceiveTask) -> QueueResult<Enqueued> {
        if let Some(existing) = self.read_index(&task.event_id)? {
            warn!(
                event_id = %task.event_id,
                task_id = %existing.task_id,
                "Duplicate event delivery, skipping"
            );
            return Ok(Enqueued::Duplicate(existing.task_id));
        }

        self.write_task_file(&self.pending_dir(), &task)?;
        self.write_index(&task)?;

        info!(
            task_id = %task.id,
            event_id = %task.event_id,
            event_type = %task.event_type,
            "Event received and queued"
        );

        Ok(Enqueued::Queued(task.id))
    }

    fn pop(&self) -> QueueResult<Option<ReceiveTask>> {
        let Some(original_path) = self.list_task_files(&self.pending_dir())?.into_iter().next() else {
            return Ok(None);
        };
        let Some(filename) = original_path.file_name().map(|f| f.to_os_string()) else {
            return Ok(None);
        };
        let new_path = self.processing_dir().join(&filename);

        fs::rename(&original_path, &new_path).map_err(|e| {
            error!(error = %e, "Failed to move task to processing");
            AppError::InternalError(format!("Failed to move task to processing: {}", e))
        })?;

        let mut task = match self.read_task_file(&new_path) {
            Ok(task) => task,
            Err(e) => {
                error!(path = %new_path.display(), "Corrupted task file, moving to DLQ");
                let dlq_path = self.dlq_dir().join(&filename);
                if let Err(move_err) = fs::rename(&new_path, &dlq_path) {
                    error!(error = %move_err, "Failed to move corrupted task to DLQ, rolling back to pending");
                    let _ = fs::rename(&new_path, &original_path);
                }
                return Err(e);
            }
        };
        task.status = TaskStatus::Processing;

        let content = serde_json::to_string_pretty(&task).map_err(|e| {
            AppError::InternalError(format!("Failed to serialize task: {}", e))
        });
        let written = content.and_then(|content| {
            fs::write(&new_path, content)
                .map_err(|e| AppError::InternalError(format!("Failed to update task file: {}", e)))
        });
        if let Err(e) = written {
            error!(error = %e, path = %new_path.display(), "Failed to update task file, rolling back");
            if let Err(rollback_err) = fs::rename(&new_path, &original_path) {
                error!(error = %rollback_err, "Failed to roll task back to pending");
            }
            return Err(e);
        }

        info!(
            task_id = %task.id,
            event_id = %task.event_id,
            retry_count = task.retry_count,
            "Task popped from queue"
        );

        Ok(Some(task))
    }

    fn complete(&self, task_id: Uuid) -> QueueResult<()> {
        let Some(path) = self.find_task_file(&self.processing_dir(), task_id)? else {
            warn!(task_id = %task_id, "Task not found in processing directory");
            return Ok(());
        };

        let mut task = self.read_task_file(&path)?;
        task.status = TaskStatus::Completed;
        task.last_error = None;
        self.write_task_file(&self.completed_dir(), &task)?;

        fs::remove_file(&path).map_err(|e| {
            error!(error = %e, task_id = %task_id, "Failed to remove task from processing");
            AppError::InternalError(format!("Failed to remove task from processing: {}", e))
        })?;

        info!(task_id = %task_id, event_id = %task.event_id, "Task completed successfully");
        Ok(())
    }

    fn fail(&self, task: ReceiveTask, reason: &str) -> QueueResult<()> {
        self.remove_from_processing(task.id)?;

        if task.retry_count >= self.config.max_retries {
            return self.write_dead_letter(task, reason);
        }

        let mut retry = task;
        retry.retry_count += 1;
        retry.status = TaskStatus::Retrying;
        retry.last_error = Some(reason.to_string());
        retry.retried_at = Some(Utc::now());
        self.write_task_file(&self.pending_dir(), &retry)?;
        self.write_index(&retry)?;

        info!(
            task_id = %retry.id,
            retry_count = retry.retry_count,
            completed_routes = retry.completed_routes.len(),
            reason = %reason,
            "Task re-queued for retry"
        );

        Ok(())
    }

    fn dead_letter(&self, task: ReceiveTask, reason: &str) -> QueueResult<()> {
        self.remove_from_processing(task.id)?;
        self.write_dead_letter(task, reason)
    }

    fn recover(&self) -> QueueResult<usize> {
        let mut recovered = 0;
        for path in self.list_task_files(&self.processing_dir())? {
            let mut task = match self.read_task_file(&path) {
                Ok(task) => task,
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Skipping unreadable task during recovery");
                    continue;
                }
            };
            task.status = TaskStatus::Pending;
            self.write_task_file(&self.pending_dir(), &task)?;
            fs::remove_file(&path).map_err(|e| {
                AppError::InternalError(format!("Failed to remove recovered task: {}", e))
            })?;
            recovered += 1;
        }

        if recovered > 0 {
            info!(recovered, "Re-queued interrupted tasks");
        }
        Ok(recovered)
    }
}

#[async_trait]
impl EventQueue for FileEventQueue {
    async fn push(&self, task: ReceiveTask) -> QueueResult<Enqueued> {
        let _guard = self.lock.write().await;
        self.blocking(move |store| store.push(task)).await
    }

    async fn pop(&self) -> QueueResult<Option<ReceiveTask>> {
        let _guard = self.lock.write().await;
        self.blocking(|store| store.pop()).await
    }

    async fn complete(&self, task_id: Uuid) -> QueueResult<()> {
        let _guard = self.lock.write().await;
        self.blocking(move |store| store.complete(task_id)).await
    }

    async fn fail(&self, task: ReceiveTask, reason: &str) -> QueueResult<()> {
        let _guard = self.lock.write().await;
        let reason = reason.to_string();
        self.blocking(move |store| store.fail(task, &reason)).await
    }

    async fn dead_letter(&self, task: ReceiveTask, reason: &str) -> QueueResult<()> {
        let _guard = self.lock.write().await;
        let reason = reason.to_string();
        self.blocking(move |store| store.dead_letter(task, &reason)).await
    }

    async fn pending_count(&self) -> QueueResult<usize> {
        let _guard = self.lock.read().await;
        self.blocking(|store| store.count_files_in_dir(&store.pending_dir())).await
    }

    async fn processing_count(&self) -> QueueResult<usize> {
        let _guard = self.lock.read().await;
        self.blocking(|store| store.count_files_in_dir(&store.processing_dir())).await
    }

    async fn status(&self, event_id: &str) -> QueueResult<Option<ReceiveTask>> {
        let _guard = self.lock.read().await;
        let event_id = event_id.to_string();
        self.blocking(move |store| store.find_by_event(&event_id)).await
    }

    async fn recover(&self) -> QueueResult<usize> {
        let _guard = self.lock.write().await;
        self.blocking(|store| store.recover()).await
    }
}
