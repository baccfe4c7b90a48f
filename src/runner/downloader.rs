use super::Auth;
use crate::models::File;
use crate::utils::{DispatchError, DispatchResult};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Deferred access to one downloaded file.
///
/// Nothing is opened until [`FileOpener::open`] is called; the handle is
/// released when it is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOpener {
    path: PathBuf,
}

impl FileOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn open(&self) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::open(&self.path).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Materialises the files of a transaction into a local directory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DownloaderRunner: Send + Sync {
    /// Download every file into `destination` at its relative path.
    ///
    /// Accessors come back in the order of `files`. Any failure aborts the
    /// whole call with [`DispatchError::DownloadFailure`].
    async fn download(&self, destination: &Path, files: &[File]) -> DispatchResult<Vec<FileOpener>>;
}

async fn prepare_target(destination: &Path, file: &File) -> DispatchResult<PathBuf> {
    let target = destination.join(file.path());
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DispatchError::download(file.path(), e))?;
    }
    Ok(target)
}

/// Copies files out of a local directory tree standing in for the archive.
#[derive(Debug, Clone)]
pub struct LocalDownloaderRunner {
    base_dir: PathBuf,
}

impl LocalDownloaderRunner {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl DownloaderRunner for LocalDownloaderRunner {
    #[instrument(skip_all, fields(base_dir = %self.base_dir.display(), files = files.len()))]
    async fn download(&self, destination: &Path, files: &[File]) -> DispatchResult<Vec<FileOpener>> {
        let mut openers = Vec::with_capacity(files.len());
        for file in files {
            let source = self.base_dir.join(file.path());
            let target = prepare_target(destination, file).await?;
            tokio::fs::copy(&source, &target)
                .await
                .map_err(|e| DispatchError::download(file.path(), format!("{}: {}", source.display(), e)))?;
            debug!(path = %file.path(), "File copied from local archive");
            openers.push(FileOpener::new(target));
        }
        info!(count = openers.len(), "Download complete");
        Ok(openers)
    }
}

/// Fetches files from the catalog's download service.
///
/// Each file is requested as `GET {download_url}/files/{id}`, where `id` is
/// the file's `_id` when present and its relative path otherwise.
#[derive(Debug, Clone)]
pub struct RemoteDownloaderRunner {
    download_url: Url,
    auth: Auth,
    client: Client,
}

impl RemoteDownloaderRunner {
    pub fn new(download_url: Url, auth: Auth) -> Self {
        Self::with_client(download_url, auth, Client::new())
    }

    pub fn with_client(download_url: Url, auth: Auth, client: Client) -> Self {
        Self {
            download_url,
            auth,
            client,
        }
    }

    fn file_url(&self, file: &File) -> DispatchResult<Url> {
        let key = match &file.id {
            Some(id) => id.to_string(),
            None => file.path().to_string(),
        };
        let mut url = self.download_url.clone();
        url.path_segments_mut()
            .map_err(|_| DispatchError::download(file.path(), "download url cannot take a path"))?
            .pop_if_empty()
            .push("files")
            .push(&key);
        Ok(url)
    }

    async fn fetch(&self, file: &File) -> DispatchResult<Vec<u8>> {
        let url = self.file_url(file)?;
        let response = self
            .auth
            .apply(self.client.get(url))
            .send()
            .await
            .map_err(|e| DispatchError::download(file.path(), e))?;
        let response = response
            .error_for_status()
            .map_err(|e| DispatchError::download(file.path(), e))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| DispatchError::download(file.path(), e))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl DownloaderRunner for RemoteDownloaderRunner {
    #[instrument(skip_all, fields(download_url = %self.download_url, files = files.len()))]
    async fn download(&self, destination: &Path, files: &[File]) -> DispatchResult<Vec<FileOpener>> {
        let mut openers = Vec::with_capacity(files.len());
        for file in files {
            let body = self.fetch(file).await?;
            let target = prepare_target(destination, file).await?;
            tokio::fs::write(&target, &body)
                .await
                .map_err(|e| DispatchError::download(file.path(), e))?;
            debug!(path = %file.path(), bytes = body.len(), "File downloaded");
            openers.push(FileOpener::new(target));
        }
        info!(count = openers.len(), "Download complete");
        Ok(openers)
    }
}
