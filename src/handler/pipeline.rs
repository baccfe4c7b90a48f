//! Download, transform and re-upload the files of a transaction
//!
//! ```text
//! Received -> Extracted -> Downloaded -> Transformed -> MetadataBuilt -> Uploaded -> Done
//! ```
//!
//! The provenance link is resolved during extraction, so a source without
//! `_id` is rejected before anything is downloaded.
//!
//! Any stage may fail. Both scratch directories are [`TempDir`] guards owned
//! by the run and are removed on every exit path, on the blocking pool.

use super::{ContentTransform, EventHandler, HandlerOutcome, PipelineStage};
use crate::event::Event;
use crate::models::{File, Transaction, TransactionKeyValue};
use crate::runner::{DownloaderRunner, FileOpener, UploadReceipt, UploaderRunner};
use crate::utils::{DispatchError, DispatchResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, instrument, warn};

/// The reference handler: every file of the source transaction is run
/// through a [`ContentTransform`] and uploaded as a new, derived transaction
/// linked back to its source.
pub struct TransformEventHandler {
    downloader: Arc<dyn DownloaderRunner>,
    uploader: Arc<dyn UploaderRunner>,
    transform: Arc<dyn ContentTransform>,
    scratch_root: Option<PathBuf>,
    extra_key_values: Vec<TransactionKeyValue>,
}

impl TransformEventHandler {
    pub fn new(
        downloader: Arc<dyn DownloaderRunner>,
        uploader: Arc<dyn UploaderRunner>,
        transform: Arc<dyn ContentTransform>,
    ) -> Self {
        Self {
            downloader,
            uploader,
            transform,
            scratch_root: None,
            extra_key_values: Vec::new(),
        }
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    /// Append a key-value to every derived transaction.
    ///
    /// Pairs using the provenance key are ignored; the provenance link
    /// always comes from the source transaction.
    pub fn with_key_value(mut self, key_value: TransactionKeyValue) -> Self {
        if !key_value.is_provenance() {
            self.extra_key_values.push(key_value);
        }
        self
    }

    async fn scratch_dir(&self, prefix: &'static str) -> DispatchResult<TempDir> {
        let root = self.scratch_root.clone();
        let created = tokio::task::spawn_blocking(move || {
            let mut builder = tempfile::Builder::new();
            builder.prefix(prefix);
            match &root {
                Some(root) => std::fs::create_dir_all(root).and_then(|_| builder.tempdir_in(root)),
                None => builder.tempdir(),
            }
        })
        .await
        .map_err(|e| DispatchError::ScratchSpace(e.to_string()))?;
        created.map_err(|e| DispatchError::ScratchSpace(e.to_string()))
    }

    async fn transform_files(&self, files: &[File], openers: &[FileOpener], upload_area: &Path) -> DispatchResult<()> {
        if files.len() != openers.len() {
            return Err(DispatchError::download(
                "*",
                format!("expected {} files, downloader returned {}", files.len(), openers.len()),
            ));
        }

        for (file, opener) in files.iter().zip(openers) {
            let mut content = Vec::new();
            opener
                .open()
                .await
                .map_err(|e| DispatchError::transform(file.path(), e))?
                .read_to_end(&mut content)
                .await
                .map_err(|e| DispatchError::transform(file.path(), e))?;

            let output = self
                .transform
                .apply(&content)
                .map_err(|e| DispatchError::transform(file.path(), e))?;

            let target = upload_area.join(file.path());
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DispatchError::transform(file.path(), e))?;
            }
            tokio::fs::write(&target, output)
                .await
                .map_err(|e| DispatchError::transform(file.path(), e))?;
            debug!(path = %file.path(), transform = self.transform.name(), "File transformed");
        }
        Ok(())
    }

    fn derived_key_values(&self, provenance: TransactionKeyValue) -> Vec<TransactionKeyValue> {
        let mut key_values = vec![provenance];
        key_values.extend(self.extra_key_values.iter().cloned());
        key_values
    }

    async fn run(&self, event: &Event, stage: &mut PipelineStage) -> DispatchResult<HandlerOutcome> {
        *stage = PipelineStage::Received;
        let source = Transaction::from_event(event)?;
        let source_key_values = TransactionKeyValue::from_event(event)?;
        let files = File::from_event(event)?;
        let provenance = TransactionKeyValue::provenance(&source)?;
        *stage = PipelineStage::Extracted;
        debug!(files = files.len(), key_values = source_key_values.len(), "Event extracted");

        let download_area = self.scratch_dir("download-").await?;
        let upload_area = match self.scratch_dir("upload-").await {
            Ok(area) => area,
            Err(e) => {
                release(vec![download_area]).await;
                return Err(e);
            }
        };

        let result = self
            .transfer(&source, provenance, &files, &download_area, &upload_area, stage)
            .await;
        release(vec![download_area, upload_area]).await;
        let receipt = result?;
        *stage = PipelineStage::Done;

        Ok(HandlerOutcome {
            receipt: Some(receipt),
        })
    }

    async fn transfer(
        &self,
        source: &Transaction,
        provenance: TransactionKeyValue,
        files: &[File],
        download_area: &TempDir,
        upload_area: &TempDir,
        stage: &mut PipelineStage,
    ) -> DispatchResult<UploadReceipt> {
        let openers = self.downloader.download(download_area.path(), files).await?;
        *stage = PipelineStage::Downloaded;

        self.transform_files(files, &openers, upload_area.path()).await?;
        *stage = PipelineStage::Transformed;

        let derived = Transaction::derive_from(source);
        let key_values = self.derived_key_values(provenance);
        *stage = PipelineStage::MetadataBuilt;

        let receipt = self
            .uploader
            .upload(upload_area.path(), &derived, &key_values)
            .await?;
        *stage = PipelineStage::Uploaded;
        Ok(receipt)
    }
}

/// Remove scratch directories on the blocking pool
async fn release(areas: Vec<TempDir>) {
    let removed = tokio::task::spawn_blocking(move || {
        for area in areas {
            let path = area.path().to_path_buf();
            if let Err(e) = area.close() {
                warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
            }
        }
    })
    .await;
    if let Err(e) = removed {
        warn!(error = %e, "Scratch cleanup task failed");
    }
}

#[async_trait]
impl EventHandler for TransformEventHandler {
    #[instrument(skip_all, fields(event_id = %event.id(), transform = self.transform.name()))]
    async fn handle(&self, event: &Event) -> DispatchResult<HandlerOutcome> {
        let mut stage = PipelineStage::Received;
        let result = self.run(event, &mut stage).await;
        match &result {
            Ok(outcome) => info!(
                job_id = ?outcome.receipt.as_ref().map(|r| r.job_id.to_string()),
                "Event handled"
            ),
            Err(e) => error!(error = %e, last_stage = %stage, "Event handling failed"),
        }
        result
    }
}
