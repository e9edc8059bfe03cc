//! # Saga Engine Configuration
//!
//! Typed configuration for the execution engine, retry backoff, saga defaults,
//! the service invoker and lifecycle events.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use saga_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Defaults, then config/saga.toml, then config/saga.<env>.toml, then SAGA__* variables
//! let manager = ConfigManager::load()?;
//! let pool_size = manager.config().execution.worker_pool_size;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::constants::system;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `config/saga.toml`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SagaConfig {
    /// Worker pool and channel sizing
    pub execution: ExecutionConfig,

    /// Forward-step retry backoff
    pub backoff: BackoffConfig,

    /// Defaults applied to new sagas
    pub saga: SagaDefaultsConfig,

    /// Service registry and remote call settings
    pub invoker: InvokerConfig,

    /// Lifecycle event publishing
    pub events: EventsConfig,
}

/// Execution engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum invocations running concurrently
    pub worker_pool_size: usize,
    pub dispatch_buffer_size: usize,
    pub event_buffer_size: usize,
    /// Bounded wait for outstanding work on shutdown before it is aborted
    pub shutdown_timeout_ms: u64,
    /// Extra slack added to every deferred timeout check
    pub timeout_check_grace_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: system::DEFAULT_WORKER_POOL_SIZE,
            dispatch_buffer_size: system::DEFAULT_CHANNEL_BUFFER_SIZE,
            event_buffer_size: system::DEFAULT_CHANNEL_BUFFER_SIZE,
            shutdown_timeout_ms: system::DEFAULT_SHUTDOWN_TIMEOUT_MS,
            timeout_check_grace_ms: 0,
        }
    }
}

impl ExecutionConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn timeout_check_grace(&self) -> Duration {
        Duration::from_millis(self.timeout_check_grace_ms)
    }
}

/// Exponential backoff for forward-step retries
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: system::DEFAULT_BACKOFF_BASE_MS,
            max_delay_ms: system::DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl BackoffConfig {
    /// `min(base * 2^retry_count, max)`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry_count);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Defaults applied when a saga or step does not specify its own
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SagaDefaultsConfig {
    pub default_timeout_ms: u64,
    pub default_step_timeout_ms: u64,
    pub default_max_retries: u32,
}

impl Default for SagaDefaultsConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: system::DEFAULT_SAGA_TIMEOUT_MS,
            default_step_timeout_ms: system::DEFAULT_STEP_TIMEOUT_MS,
            default_max_retries: system::DEFAULT_MAX_RETRIES,
        }
    }
}

/// Service invoker configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct InvokerConfig {
    pub request_timeout_ms: u64,
    /// Path probed by health checks, relative to a service's base URL
    pub health_path: String,
    /// Static service registry: service name to base URL
    pub services: HashMap<String, String>,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: system::DEFAULT_REQUEST_TIMEOUT_MS,
            health_path: "/health".to_string(),
            services: HashMap::new(),
        }
    }
}

impl InvokerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Lifecycle event configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    pub enabled: bool,
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel_capacity: system::DEFAULT_CHANNEL_BUFFER_SIZE,
        }
    }
}

impl SagaConfig {
    /// Validate the configuration and return detailed errors
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.execution.worker_pool_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.worker_pool_size",
                "0",
                "worker pool size must be greater than 0",
            ));
        }

        if self.execution.dispatch_buffer_size == 0 || self.execution.event_buffer_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "execution.*_buffer_size",
                "0",
                "channel buffers must be greater than 0",
            ));
        }

        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "backoff.base_delay_ms",
                self.backoff.base_delay_ms,
                format!(
                    "base delay must not exceed max delay ({}ms)",
                    self.backoff.max_delay_ms
                ),
            ));
        }

        if self.saga.default_timeout_ms == 0 || self.saga.default_step_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "saga.default_*timeout_ms",
                "0",
                "timeouts must be greater than 0",
            ));
        }

        if self.invoker.request_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "invoker.request_timeout_ms",
                "0",
                "request timeout must be greater than 0",
            ));
        }

        for (service, url) in &self.invoker.services {
            if reqwest::Url::parse(url).is_err() {
                return Err(ConfigurationError::invalid_value(
                    format!("invoker.services.{service}"),
                    url,
                    "service base URL must be an absolute URL",
                ));
            }
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "event channel capacity must be greater than 0",
            ));
        }

        Ok(())
    }
}
