use super::{Auth, Bundle};
use crate::models::{MetadataValue, Transaction, TransactionKeyValue};
use crate::utils::{DispatchError, DispatchResult};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Identifier the ingest service assigns to an accepted upload.
pub type JobId = MetadataValue;

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub bundle: Bundle,
    pub job_id: JobId,
    pub state: Value,
}

/// Bundles a directory with metadata and submits it for ingest.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UploaderRunner: Send + Sync {
    /// Submit every file under `source_dir` with `transaction` and
    /// `key_values`. The upload is all or nothing: any failure is an
    /// [`DispatchError::UploadFailure`] and nothing was persisted.
    async fn upload(
        &self,
        source_dir: &Path,
        transaction: &Transaction,
        key_values: &[TransactionKeyValue],
    ) -> DispatchResult<UploadReceipt>;
}

/// Capture sink used in local mode and tests.
///
/// Every upload gets the next sequential job id. With a capture directory
/// each bundle is written there as `<job_id>.json`; without one nothing is
/// retained beyond the returned receipt.
#[derive(Debug)]
pub struct LocalUploaderRunner {
    capture_dir: Option<PathBuf>,
    /// Next job id; only advanced once a bundle is captured
    next_job_id: Mutex<i64>,
}

impl Default for LocalUploaderRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalUploaderRunner {
    pub fn new() -> Self {
        Self {
            capture_dir: None,
            next_job_id: Mutex::new(1),
        }
    }

    pub fn with_capture_dir(capture_dir: impl Into<PathBuf>) -> Self {
        Self {
            capture_dir: Some(capture_dir.into()),
            ..Self::new()
        }
    }

    /// Bundles in the capture directory, ordered by job id. Empty without
    /// a capture directory.
    pub async fn captured(&self) -> DispatchResult<Vec<Bundle>> {
        let Some(dir) = &self.capture_dir else {
            return Ok(Vec::new());
        };
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DispatchError::upload(format!("cannot read {}: {}", dir.display(), e))),
        };

        let mut captured = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DispatchError::upload(format!("cannot read {}: {}", dir.display(), e)))?
        {
            let path = entry.path();
            let Some(job_id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(".json"))
                .and_then(|stem| stem.parse::<i64>().ok())
            else {
                continue;
            };
            let content = tokio::fs::read(&path)
                .await
                .map_err(|e| DispatchError::upload(format!("cannot read {}: {}", path.display(), e)))?;
            let bundle: Bundle = serde_json::from_slice(&content).map_err(DispatchError::upload)?;
            captured.push((job_id, bundle));
        }

        captured.sort_by_key(|(job_id, _)| *job_id);
        Ok(captured.into_iter().map(|(_, bundle)| bundle).collect())
    }

    async fn persist(&self, dir: &Path, job_id: &JobId, bundle: &Bundle) -> DispatchResult<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DispatchError::upload(format!("cannot create {}: {}", dir.display(), e)))?;
        let content = serde_json::to_vec_pretty(bundle).map_err(DispatchError::upload)?;

        let target = dir.join(format!("{}.json", job_id));
        let staging = dir.join(format!(".{}.json.tmp", job_id));
        tokio::fs::write(&staging, content)
            .await
            .map_err(|e| DispatchError::upload(format!("cannot write {}: {}", staging.display(), e)))?;
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(DispatchError::upload(format!("cannot write {}: {}", target.display(), e)));
        }
        Ok(())
    }
}

#[async_trait]
impl UploaderRunner for LocalUploaderRunner {
    #[instrument(skip_all, fields(source_dir = %source_dir.display()))]
    async fn upload(
        &self,
        source_dir: &Path,
        transaction: &Transaction,
        key_values: &[TransactionKeyValue],
    ) -> DispatchResult<UploadReceipt> {
        let bundle = Bundle::from_dir(source_dir, transaction, key_values).await?;

        // Held across persistence so captures stay in job order.
        let mut next_job_id = self.next_job_id.lock().await;
        let job_id = JobId::Integer(*next_job_id);
        if let Some(dir) = &self.capture_dir {
            self.persist(dir, &job_id, &bundle).await?;
        }
        *next_job_id += 1;

        info!(job_id = %job_id, files = bundle.files.len(), "Bundle captured");
        Ok(UploadReceipt {
            bundle,
            job_id,
            state: json!({"state": "OK", "task": "captured"}),
        })
    }
}

#[derive(Debug, Deserialize)]
struct IngestResponse {
    job_id: JobId,
    #[serde(default)]
    state: Value,
}

/// Submits bundles to the catalog's ingest service.
#[derive(Debug, Clone)]
pub struct RemoteUploaderRunner {
    upload_url: Url,
    status_url: Url,
    auth: Auth,
    client: Client,
}

impl RemoteUploaderRunner {
    pub fn new(upload_url: Url, status_url: Url, auth: Auth) -> Self {
        Self::with_client(upload_url, status_url, auth, Client::new())
    }

    pub fn with_client(upload_url: Url, status_url: Url, auth: Auth, client: Client) -> Self {
        Self {
            upload_url,
            status_url,
            auth,
            client,
        }
    }

    /// Current ingest state of a job, as reported by the status service.
    pub async fn status(&self, job_id: &JobId) -> DispatchResult<Value> {
        let mut url = self.status_url.clone();
        url.query_pairs_mut().append_pair("job_id", &job_id.to_string());

        let response = self
            .auth
            .apply(self.client.get(url))
            .send()
            .await
            .map_err(DispatchError::upload)?
            .error_for_status()
            .map_err(DispatchError::upload)?;
        response.json::<Value>().await.map_err(DispatchError::upload)
    }
}

#[async_trait]
impl UploaderRunner for RemoteUploaderRunner {
    #[instrument(skip_all, fields(upload_url = %self.upload_url, source_dir = %source_dir.display()))]
    async fn upload(
        &self,
        source_dir: &Path,
        transaction: &Transaction,
        key_values: &[TransactionKeyValue],
    ) -> DispatchResult<UploadReceipt> {
        let bundle = Bundle::from_dir(source_dir, transaction, key_values).await?;
        debug!(files = bundle.files.len(), "Submitting bundle");

        let response = self
            .auth
            .apply(self.client.post(self.upload_url.clone()))
            .json(&bundle)
            .send()
            .await
            .map_err(DispatchError::upload)?
            .error_for_status()
            .map_err(DispatchError::upload)?;
        let ingest: IngestResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::upload(format!("unexpected ingest response: {}", e)))?;

        info!(job_id = %ingest.job_id, "Bundle accepted for ingest");
        Ok(UploadReceipt {
            bundle,
            job_id: ingest.job_id,
            state: ingest.state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_with(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, content) in files {
            let target = dir.path().join(path);
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::write(target, content).unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn should_capture_uploads_with_sequential_job_ids() {
        // Arrange
        let runner = LocalUploaderRunner::new();
        let source = source_with(&[("data/sample.txt", "HELLO")]);
        let transaction = Transaction::new("alice", "I1", "P1");

        // Act
        let first = runner.upload(source.path(), &transaction, &[]).await.unwrap();
        let second = runner.upload(source.path(), &transaction, &[]).await.unwrap();

        // Assert
        assert_eq!(first.job_id, JobId::Integer(1));
        assert_eq!(second.job_id, JobId::Integer(2));
        assert_eq!(first.state, json!({"state": "OK", "task": "captured"}));
        assert!(runner.captured().await.unwrap().is_empty());
        assert_eq!(first.bundle.file("data/sample.txt").unwrap().content, b"HELLO");
    }

    #[tokio::test]
    async fn should_persist_captured_bundles_atomically() {
        // Arrange
        let capture = tempfile::tempdir().unwrap();
        let runner = LocalUploaderRunner::with_capture_dir(capture.path());
        let source = source_with(&[("a.txt", "A")]);
        let key_values = vec![TransactionKeyValue::new("Transactions._id", 42i64)];

        // Act
        let receipt = runner
            .upload(source.path(), &Transaction::new("alice", "I1", "P1"), &key_values)
            .await
            .unwrap();

        // Assert
        let names: Vec<_> = std::fs::read_dir(capture.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["1.json"]);
        let stored: Bundle =
            serde_json::from_slice(&std::fs::read(capture.path().join("1.json")).unwrap()).unwrap();
        assert_eq!(stored, receipt.bundle);
    }

    #[tokio::test]
    async fn should_fail_before_capturing_when_source_is_missing() {
        // Arrange
        let runner = LocalUploaderRunner::new();

        // Act
        let result = runner
            .upload(Path::new("/nonexistent/upload"), &Transaction::new("a", "b", "c"), &[])
            .await;

        // Assert
        assert!(matches!(result, Err(DispatchError::UploadFailure(_))));
        let source = source_with(&[("a.txt", "A")]);
        let next = runner.upload(source.path(), &Transaction::new("a", "b", "c"), &[]).await;
        assert_eq!(next.unwrap().job_id, JobId::Integer(1));
    }

    #[tokio::test]
    async fn should_not_consume_job_id_when_capture_fails() {
        // Arrange
        let root = tempfile::tempdir().unwrap();
        let blocked = root.path().join("not-a-dir");
        std::fs::write(&blocked, "file in the way").unwrap();
        let runner = LocalUploaderRunner::with_capture_dir(&blocked);
        let source = source_with(&[("a.txt", "A")]);
        let transaction = Transaction::new("alice", "I1", "P1");
        let failed = runner.upload(source.path(), &transaction, &[]).await;
        std::fs::remove_file(&blocked).unwrap();

        // Act
        let receipt = runner.upload(source.path(), &transaction, &[]).await.unwrap();

        // Assert
        assert!(matches!(failed, Err(DispatchError::UploadFailure(_))));
        assert_eq!(receipt.job_id, JobId::Integer(1));
        assert_eq!(runner.captured().await.unwrap().len(), 1);
        assert!(blocked.join("1.json").exists());
    }

    #[tokio::test]
    async fn should_list_captured_bundles_in_job_order() {
        // Arrange
        let capture = tempfile::tempdir().unwrap();
        let runner = LocalUploaderRunner::with_capture_dir(capture.path());
        let transaction = Transaction::new("alice", "I1", "P1");
        for i in 0..11 {
            let content = i.to_string();
            let source = source_with(&[("n.txt", content.as_str())]);
            runner.upload(source.path(), &transaction, &[]).await.unwrap();
        }

        // Act
        let captured = runner.captured().await.unwrap();

        // Assert
        let contents: Vec<_> = captured
            .iter()
            .map(|bundle| String::from_utf8(bundle.file("n.txt").unwrap().content.clone()).unwrap())
            .collect();
        assert_eq!(contents, (0..11).map(|i| i.to_string()).collect::<Vec<_>>());
    }
}
