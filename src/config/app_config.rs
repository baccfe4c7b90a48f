use crate::runner::Auth;
use reqwest::Url;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// How files move between the catalog and the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerMode {
    /// HTTP against the catalog download/ingest services
    Remote,
    /// Local directories standing in for the archive and the ingest sink
    #[default]
    Local,
}

impl FromStr for RunnerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "remote" => Ok(RunnerMode::Remote),
            "local" => Ok(RunnerMode::Local),
            other => Err(ConfigError::InvalidRunnerMode(other.to_string())),
        }
    }
}

/// Runner selection and endpoints
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub mode: RunnerMode,
    pub download_url: Option<Url>,
    pub upload_url: Option<Url>,
    pub upload_status_url: Option<Url>,
    pub auth: Auth,
    pub local_download_dir: PathBuf,
    pub local_upload_dir: Option<PathBuf>,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub log_dir: String,
    pub queue_dir: PathBuf,
    pub queue_max_retries: u32,
    pub scratch_dir: Option<PathBuf>,
    pub worker_poll_interval: Duration,
    pub route_files: Vec<PathBuf>,
    pub receiver_secret: Option<String>,
    pub runner: RunnerConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup (environment-shaped)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = match var("PORT") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidPort)?,
            None => 8069,
        };

        let queue_max_retries = match var("QUEUE_MAX_RETRIES") {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("QUEUE_MAX_RETRIES"))?,
            None => 3,
        };
        let worker_poll_interval = match var("WORKER_POLL_INTERVAL_MS") {
            Some(value) => Duration::from_millis(
                value
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber("WORKER_POLL_INTERVAL_MS"))?,
            ),
            None => Duration::from_millis(500),
        };

        let route_files = var("ROUTE_PREDICATE_FILES")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_else(|| vec![PathBuf::from("routes/uppercase.jsonpath")]);

        let auth = match (var("AUTH_TOKEN"), var("AUTH_USERNAME")) {
            (Some(token), _) => Auth::Bearer(token),
            (None, Some(username)) => Auth::Basic {
                username,
                password: var("AUTH_PASSWORD").unwrap_or_default(),
            },
            (None, None) => Auth::None,
        };

        let runner = RunnerConfig {
            mode: var("RUNNER_MODE").map(|m| m.parse()).transpose()?.unwrap_or_default(),
            download_url: var("DOWNLOAD_URL").map(|u| parse_url("DOWNLOAD_URL", &u)).transpose()?,
            upload_url: var("UPLOAD_URL").map(|u| parse_url("UPLOAD_URL", &u)).transpose()?,
            upload_status_url: var("UPLOAD_STATUS_URL")
                .map(|u| parse_url("UPLOAD_STATUS_URL", &u))
                .transpose()?,
            auth,
            local_download_dir: var("LOCAL_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/archive")),
            local_upload_dir: var("LOCAL_UPLOAD_DIR").map(PathBuf::from),
        };

        Ok(Self {
            host,
            port,
            log_dir: var("LOG_DIR").unwrap_or_else(|| "./logs".to_string()),
            queue_dir: var("QUEUE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/queue")),
            queue_max_retries,
            scratch_dir: var("SCRATCH_DIR").map(PathBuf::from),
            worker_poll_interval,
            route_files,
            receiver_secret: var("RECEIVER_SECRET"),
            runner,
        })
    }

    /// Apply overrides from a TOML configuration file
    pub fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.merge_toml(&content)
    }

    pub fn merge_toml(&mut self, content: &str) -> Result<(), ConfigError> {
        let file: FileConfig = toml::from_str(content).map_err(|e| ConfigError::FileParse(e.to_string()))?;

        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(log_dir) = file.log_dir {
            self.log_dir = log_dir;
        }
        if let Some(queue_dir) = file.queue_dir {
            self.queue_dir = queue_dir;
        }
        if let Some(retries) = file.queue_max_retries {
            self.queue_max_retries = retries;
        }
        if let Some(scratch_dir) = file.scratch_dir {
            self.scratch_dir = Some(scratch_dir);
        }
        if let Some(ms) = file.worker_poll_interval_ms {
            self.worker_poll_interval = Duration::from_millis(ms);
        }
        if let Some(route_files) = file.route_files {
            self.route_files = route_files;
        }
        if let Some(secret) = file.receiver_secret {
            self.receiver_secret = Some(secret);
        }

        if let Some(runner) = file.runner {
            if let Some(mode) = runner.mode {
                self.runner.mode = mode;
            }
            if let Some(url) = runner.download_url {
                self.runner.download_url = Some(parse_url("runner.download_url", &url)?);
            }
            if let Some(url) = runner.upload_url {
                self.runner.upload_url = Some(parse_url("runner.upload_url", &url)?);
            }
            if let Some(url) = runner.upload_status_url {
                self.runner.upload_status_url = Some(parse_url("runner.upload_status_url", &url)?);
            }
            if let Some(token) = runner.token {
                self.runner.auth = Auth::Bearer(token);
            } else if let Some(username) = runner.username {
                self.runner.auth = Auth::Basic {
                    username,
                    password: runner.password.unwrap_or_default(),
                };
            }
            if let Some(dir) = runner.local_download_dir {
                self.runner.local_download_dir = dir;
            }
            if let Some(dir) = runner.local_upload_dir {
                self.runner.local_upload_dir = Some(dir);
            }
        }

        Ok(())
    }

    /// Check cross-field requirements once all sources are merged
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.route_files.is_empty() {
            return Err(ConfigError::NoRoutes);
        }
        if self.runner.mode == RunnerMode::Remote {
            let missing = [
                ("DOWNLOAD_URL", self.runner.download_url.is_none()),
                ("UPLOAD_URL", self.runner.upload_url.is_none()),
                ("UPLOAD_STATUS_URL", self.runner.upload_status_url.is_none()),
            ];
            if let Some((name, _)) = missing.iter().find(|(_, absent)| *absent) {
                return Err(ConfigError::MissingVar(*name));
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        name,
        reason: e.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    log_dir: Option<String>,
    queue_dir: Option<PathBuf>,
    queue_max_retries: Option<u32>,
    scratch_dir: Option<PathBuf>,
    worker_poll_interval_ms: Option<u64>,
    route_files: Option<Vec<PathBuf>>,
    receiver_secret: Option<String>,
    runner: Option<FileRunnerConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileRunnerConfig {
    mode: Option<RunnerMode>,
    download_url: Option<String>,
    upload_url: Option<String>,
    upload_status_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    local_download_dir: Option<PathBuf>,
    local_upload_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Invalid number in {0}")]
    InvalidNumber(&'static str),
    #[error("Invalid runner mode '{0}': expected 'remote' or 'local'")]
    InvalidRunnerMode(String),
    #[error("Invalid URL in {name}: {reason}")]
    InvalidUrl { name: &'static str, reason: String },
    #[error("{0} is required in remote runner mode")]
    MissingVar(&'static str),
    #[error("At least one route predicate file is required")]
    NoRoutes,
    #[error("Cannot read config file {path}: {reason}")]
    FileRead { path: String, reason: String },
    #[error("Invalid config file: {0}")]
    FileParse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn should_use_defaults_when_nothing_is_set() {
        // Act
        let config = config_from(&[]).unwrap();

        // Assert
        assert_eq!(config.bind_address(), "127.0.0.1:8069");
        assert_eq!(config.runner.mode, RunnerMode::Local);
        assert_eq!(config.runner.auth, Auth::None);
        assert_eq!(config.route_files, vec![PathBuf::from("routes/uppercase.jsonpath")]);
        assert_eq!(config.worker_poll_interval, Duration::from_millis(500));
        assert_eq!(config.queue_max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_read_remote_settings() {
        // Arrange & Act
        let config = config_from(&[
            ("RUNNER_MODE", "Remote"),
            ("DOWNLOAD_URL", "http://archive:8081/"),
            ("UPLOAD_URL", "http://ingest:8066/upload"),
            ("UPLOAD_STATUS_URL", "http://ingest:8066/get_state"),
            ("AUTH_USERNAME", "svc"),
            ("AUTH_PASSWORD", "pw"),
            ("ROUTE_PREDICATE_FILES", "routes/a.jsonpath, routes/b.jsonpath,"),
        ])
        .unwrap();

        // Assert
        assert_eq!(config.runner.mode, RunnerMode::Remote);
        assert_eq!(
            config.runner.auth,
            Auth::Basic {
                username: "svc".into(),
                password: "pw".into()
            }
        );
        assert_eq!(config.route_files.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_prefer_bearer_token_over_basic_auth() {
        let config = config_from(&[("AUTH_TOKEN", "t0k"), ("AUTH_USERNAME", "svc")]).unwrap();

        assert_eq!(config.runner.auth, Auth::Bearer("t0k".into()));
    }

    #[test]
    fn should_reject_invalid_values() {
        assert!(matches!(config_from(&[("PORT", "eighty")]), Err(ConfigError::InvalidPort)));
        assert!(matches!(
            config_from(&[("RUNNER_MODE", "hybrid")]),
            Err(ConfigError::InvalidRunnerMode(_))
        ));
        assert!(matches!(
            config_from(&[("UPLOAD_URL", "not a url")]),
            Err(ConfigError::InvalidUrl { name: "UPLOAD_URL", .. })
        ));
    }

    #[test]
    fn should_require_endpoints_in_remote_mode() {
        let config = config_from(&[("RUNNER_MODE", "remote"), ("DOWNLOAD_URL", "http://archive/")]).unwrap();

        assert!(matches!(config.validate(), Err(ConfigError::MissingVar("UPLOAD_URL"))));
    }

    #[test]
    fn should_apply_toml_overrides() {
        // Arrange
        let mut config = config_from(&[("PORT", "9000")]).unwrap();

        // Act
        config
            .merge_toml(
                r#"
                port = 8080
                route_files = ["routes/x.jsonpath"]

                [runner]
                mode = "remote"
                download_url = "http://archive/"
                upload_url = "http://ingest/upload"
                upload_status_url = "http://ingest/get_state"
                token = "abc"
                "#,
            )
            .unwrap();

        // Assert
        assert_eq!(config.port, 8080);
        assert_eq!(config.route_files, vec![PathBuf::from("routes/x.jsonpath")]);
        assert_eq!(config.runner.mode, RunnerMode::Remote);
        assert_eq!(config.runner.auth, Auth::Bearer("abc".into()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_reject_unknown_toml_keys() {
        let mut config = config_from(&[]).unwrap();

        assert!(matches!(config.merge_toml("prot = 1"), Err(ConfigError::FileParse(_))));
    }
}
