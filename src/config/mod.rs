pub mod app_config;
pub mod cli;
pub mod wiring;

pub use app_config::{AppConfig, ConfigError, RunnerConfig, RunnerMode};
pub use cli::Cli;
pub use wiring::{reference_handler, RunnerSet};
