use super::{AppConfig, ConfigError};
use clap::Parser;
use std::path::PathBuf;

/// Receive catalog events and dispatch them to the configured routes.
#[derive(Debug, Parser)]
#[command(name = "catalog-dispatcher", version, about)]
pub struct Cli {
    /// The hostname or IP address on which to listen for connections
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// The TCP port on which to listen for connections
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// TOML configuration file; its values override environment settings
    /// and the --host/--port flags
    #[arg(long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Environment, then command-line flags, then the config file.
    pub fn resolve(&self, mut config: AppConfig) -> Result<AppConfig, ConfigError> {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = &self.config {
            config.merge_file(path)?;
        }
        config.validate()?;
        Ok(config)
    }
}
