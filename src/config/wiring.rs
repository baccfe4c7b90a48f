//! Startup wiring: runners, the reference handler and the route table
//!
//! Everything is built once from an [`AppConfig`] and passed down by
//! reference. Nothing here is global.

use super::app_config::{AppConfig, ConfigError, RunnerConfig, RunnerMode};
use crate::handler::{EventHandler, TransformEventHandler, Uppercase};
use crate::models::TransactionKeyValue;
use crate::router::Router;
use crate::runner::{
    DownloaderRunner, LocalDownloaderRunner, LocalUploaderRunner, RemoteDownloaderRunner, RemoteUploaderRunner,
    UploaderRunner,
};
use crate::utils::DispatchResult;
use std::sync::Arc;
use tracing::info;

/// The downloader/uploader pair selected for this deployment.
#[derive(Clone)]
pub struct RunnerSet {
    pub downloader: Arc<dyn DownloaderRunner>,
    pub uploader: Arc<dyn UploaderRunner>,
}

impl RunnerSet {
    pub fn from_config(config: &RunnerConfig) -> Result<Self, ConfigError> {
        match config.mode {
            RunnerMode::Local => {
                let uploader = match &config.local_upload_dir {
                    Some(dir) => LocalUploaderRunner::with_capture_dir(dir),
                    None => LocalUploaderRunner::new(),
                };
                info!(
                    archive = %config.local_download_dir.display(),
                    capture = ?config.local_upload_dir,
                    "Using local runners"
                );
                Ok(Self {
                    downloader: Arc::new(LocalDownloaderRunner::new(&config.local_download_dir)),
                    uploader: Arc::new(uploader),
                })
            }
            RunnerMode::Remote => {
                let download_url = config
                    .download_url
                    .clone()
                    .ok_or(ConfigError::MissingVar("DOWNLOAD_URL"))?;
                let upload_url = config.upload_url.clone().ok_or(ConfigError::MissingVar("UPLOAD_URL"))?;
                let status_url = config
                    .upload_status_url
                    .clone()
                    .ok_or(ConfigError::MissingVar("UPLOAD_STATUS_URL"))?;
                info!(%download_url, %upload_url, auth = ?config.auth, "Using remote runners");
                Ok(Self {
                    downloader: Arc::new(RemoteDownloaderRunner::new(download_url, config.auth.clone())),
                    uploader: Arc::new(RemoteUploaderRunner::new(upload_url, status_url, config.auth.clone())),
                })
            }
        }
    }
}

/// The uppercase handler of the reference deployment.
pub fn reference_handler(config: &AppConfig, runners: &RunnerSet) -> TransformEventHandler {
    let mut handler = TransformEventHandler::new(runners.downloader.clone(), runners.uploader.clone(), Arc::new(Uppercase))
        .with_key_value(TransactionKeyValue::new("example-key", "example-value"));
    if let Some(root) = &config.scratch_dir {
        handler = handler.with_scratch_root(root);
    }
    handler
}

impl Router {
    /// Load every configured predicate file as a route to the reference
    /// handler. Fails on the first file that cannot be read or parsed.
    pub fn from_config(config: &AppConfig, runners: &RunnerSet) -> DispatchResult<Self> {
        let handler: Arc<dyn EventHandler> = Arc::new(reference_handler(config, runners));
        let mut router = Router::new();
        router.add_routes_from_files(&config.route_files, handler)?;
        info!(routes = router.len(), "Route table loaded");
        Ok(router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::DispatchError;
    use std::collections::HashMap;

    fn config_with(pairs: &[(&str, String)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[test]
    fn should_load_one_route_per_predicate_file() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let created = dir.path().join("created.jsonpath");
        let updated = dir.path().join("updated.jsonpath");
        std::fs::write(&created, "$.type == \"transaction.created\"\n").unwrap();
        std::fs::write(&updated, "# updates\n$.type == \"transaction.updated\"\n").unwrap();
        let files = format!("{},{}", created.display(), updated.display());
        let config = config_with(&[("ROUTE_PREDICATE_FILES", files)]);
        let runners = RunnerSet::from_config(&config.runner).unwrap();

        // Act
        let router = Router::from_config(&config, &runners).unwrap();

        // Assert
        assert_eq!(router.len(), 2);
        assert_eq!(router.routes()[0].name(), created.display().to_string());
    }

    #[test]
    fn should_refuse_to_start_with_broken_predicate() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.jsonpath");
        std::fs::write(&broken, "$.type == ").unwrap();
        let config = config_with(&[("ROUTE_PREDICATE_FILES", broken.display().to_string())]);
        let runners = RunnerSet::from_config(&config.runner).unwrap();

        // Act
        let result = Router::from_config(&config, &runners);

        // Assert
        match result {
            Err(DispatchError::RoutingConfiguration { source_name, .. }) => {
                assert_eq!(source_name, broken.display().to_string())
            }
            other => panic!("expected routing configuration error, got {:?}", other.map(|r| r.len())),
        }
    }

    #[test]
    fn should_require_urls_for_remote_runners() {
        let config = config_with(&[("RUNNER_MODE", "remote".to_string())]);

        assert!(matches!(
            RunnerSet::from_config(&config.runner),
            Err(ConfigError::MissingVar("DOWNLOAD_URL"))
        ));
    }
}
