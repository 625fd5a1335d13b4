//! Configuration Loader
//!
//! Environment-aware layering: built-in defaults, then
//! `orchestrator.{toml,yaml,json}`, then `orchestrator.<environment>.*`,
//! then `ORCHESTRATOR_*` environment variables (`__` separates nesting, e.g.
//! `ORCHESTRATOR_TABLE__MAX_CONCURRENT_REQUESTS=2`).

use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::ConfigResult;
use super::OrchestratorConfig;

const CONFIG_FILE_STEM: &str = "orchestrator";
const ENV_PREFIX: &str = "ORCHESTRATOR";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with an explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let defaults = OrchestratorConfig {
            environment: environment.to_string(),
            ..OrchestratorConfig::default()
        };

        let settings = Config::builder()
            .add_source(Config::try_from(&defaults)?)
            .add_source(File::from(config_directory.join(CONFIG_FILE_STEM)).required(false))
            .add_source(
                File::from(
                    config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}")),
                )
                .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: OrchestratorConfig = settings.try_deserialize()?;
        config.environment = environment.to_string();
        config.validate()?;

        info!(
            environment = environment,
            default_strategy = %config.default_strategy,
            table = %config.table.table_name,
            max_concurrent_requests = config.table.max_concurrent_requests,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(config: OrchestratorConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            environment: config.environment.clone(),
            config,
            config_directory: Self::default_config_directory(),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Current environment from `ORCHESTRATOR_ENV`, then `APP_ENV`
    pub fn detect_environment() -> String {
        env::var("ORCHESTRATOR_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("ORCHESTRATOR_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}
