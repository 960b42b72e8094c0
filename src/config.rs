//! Configuration System
//!
//! Layered runtime configuration: built-in defaults, then an optional TOML file,
//! then `TILEWORK_*` environment variables (nested keys separated by `__`, e.g.
//! `TILEWORK_POOL__MAX_WORKER_COUNT=4`).

use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

const ENV_PREFIX: &str = "TILEWORK";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub actor: ActorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Explicit worker count. Derived from the host's parallelism when unset.
    #[serde(default)]
    pub worker_count: Option<usize>,

    /// Upper bound applied to the derived or explicit count.
    #[serde(default = "default_max_worker_count")]
    pub max_worker_count: usize,

    /// Worker threads are named `{prefix}-{index}`.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_max_worker_count() -> usize {
    6
}

fn default_thread_name_prefix() -> String {
    "tilework-worker".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            max_worker_count: default_max_worker_count(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl PoolConfig {
    /// Number of worker contexts the pool will start.
    pub fn effective_worker_count(&self) -> usize {
        let derived = || {
            std::thread::available_parallelism()
                .map(|n| n.get() / 2)
                .unwrap_or(1)
                .max(1)
        };
        self.worker_count
            .unwrap_or_else(derived)
            .min(self.max_worker_count)
    }
}

/// Origin policy shared by every actor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Origin stamped on outgoing envelopes and expected on incoming ones.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Origins accepted regardless of the actor's own.
    #[serde(default = "default_trusted_origins")]
    pub trusted_origins: Vec<String>,
}

fn default_origin() -> String {
    "app://local".to_string()
}

fn default_trusted_origins() -> Vec<String> {
    vec!["file://".to_string(), "resource://android".to_string()]
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            trusted_origins: default_trusted_origins(),
        }
    }
}

impl RuntimeConfig {
    /// Validate the entire configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.pool.max_worker_count == 0 {
            errors.push("pool.max_worker_count must be at least 1".to_string());
        }
        if self.pool.worker_count == Some(0) {
            errors.push("pool.worker_count must be at least 1 when set".to_string());
        }
        if self.pool.thread_name_prefix.trim().is_empty() {
            errors.push("pool.thread_name_prefix cannot be empty".to_string());
        }
        if self.actor.origin.is_empty() {
            errors.push("actor.origin cannot be empty".to_string());
        }
        if !matches!(self.logging.level.as_str(), "trace" | "debug" | "info" | "warn" | "error" | "off") {
            errors.push(format!("logging.level '{}' is not a log level", self.logging.level));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

/// Builder with the defaults every layer merges over.
fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
    Config::builder()
        .set_default("pool.max_worker_count", default_max_worker_count() as i64)?
        .set_default("pool.thread_name_prefix", default_thread_name_prefix())?
        .set_default("actor.origin", default_origin())
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load defaults, then `file` if given, then the environment. The result is validated.
    pub fn load(file: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
        let mut builder = builder_with_defaults()?;
        if let Some(path) = file {
            debug!(config_path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: RuntimeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load only from `path`, ignoring the environment.
    pub fn load_from_file(path: &Path) -> Result<RuntimeConfig, ConfigError> {
        let config: RuntimeConfig = builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
