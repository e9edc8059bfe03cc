//! Configuration Loader
//!
//! Environment-aware layered loading: built-in defaults, then
//! `<dir>/saga.toml`, then `<dir>/saga.<environment>.toml`, then `SAGA__*`
//! environment variables (`SAGA__EXECUTION__WORKER_POOL_SIZE=32`).

use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::SagaConfig;

const ENV_PREFIX: &str = "SAGA";
const ENV_SEPARATOR: &str = "__";
const BASE_FILE_NAME: &str = "saga";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: SagaConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration from `./config` with environment auto-detection
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
        Self::build(config_dir, environment, None)
    }

    /// Like [`Self::load_from_directory_with_env`], reading `SAGA__*` overrides
    /// from `overrides` instead of the process environment
    pub fn load_with_overrides(
        config_dir: Option<PathBuf>,
        environment: &str,
        overrides: HashMap<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(config_dir, environment, Some(overrides))
    }

    /// Wrap an already-built configuration (tests, embedding)
    pub fn from_config(config: SagaConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: Self::default_config_directory(),
        }))
    }

    fn build(
        config_dir: Option<PathBuf>,
        environment: &str,
        overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading saga configuration"
        );

        let defaults = Config::try_from(&SagaConfig::default())
            .map_err(|e| ConfigurationError::load_failed(environment, e))?;

        let base_file = config_directory.join(format!("{BASE_FILE_NAME}.toml"));
        let env_file = config_directory.join(format!("{BASE_FILE_NAME}.{environment}.toml"));

        let mut env_source = Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true);
        if let Some(overrides) = overrides {
            env_source = env_source.source(Some(overrides));
        }

        let merged = Config::builder()
            .add_source(defaults)
            .add_source(Self::optional_toml(&base_file))
            .add_source(Self::optional_toml(&env_file))
            .add_source(env_source)
            .build()
            .map_err(|e| ConfigurationError::load_failed(environment, e))?;

        let config: SagaConfig = merged
            .try_deserialize()
            .map_err(ConfigurationError::deserialization_failed)?;

        config.validate()?;

        info!(
            environment = %environment,
            worker_pool_size = config.execution.worker_pool_size,
            services = config.invoker.services.len(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    fn optional_toml(path: &Path) -> File<config::FileSourceFile, FileFormat> {
        File::from(path).format(FileFormat::Toml).required(false)
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// `SAGA_ENV`, then `APP_ENV`, then `development`
    pub fn detect_environment() -> String {
        env::var("SAGA_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        PathBuf::from("config")
    }
}
