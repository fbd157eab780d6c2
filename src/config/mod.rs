//! Configuration management module for the coordination node.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Component-wise validation
mod monitoring;
mod server;
mod storage;
mod tree;
pub use monitoring::*;
pub use server::*;
pub use storage::*;
pub use tree::*;


use std::env;
use std::fmt::Debug;
use std::path::Path;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Environment variable prefix, e.g. `KEEPER__SERVER__TRANSPORT=event_loop`
pub const ENV_PREFIX: &str = "KEEPER";

/// Main configuration container for the coordination node
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct KeeperConfig {
    /// Client listener, tick and session bounds
    #[serde(default)]
    pub server: ServerConfig,
    /// Transaction log and snapshot placement
    #[serde(default)]
    pub storage: StorageConfig,
    /// Data tree limits
    #[serde(default)]
    pub tree: TreeConfig,
    /// Metrics exporter
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Debug for KeeperConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("KeeperConfig")
            .field("listen_address", &self.server.listen_address)
            .field("transport", &self.server.transport)
            .field("data_dir", &self.storage.data_dir)
            .finish()
    }
}

impl KeeperConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `KEEPER__` prefix (highest priority)
    ///
    /// # Note
    /// Validation is deferred so further overrides can be applied with
    /// `with_override_config()`. Callers MUST call `validate()` before use.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/keeper.toml");
    /// std::env::set_var("KEEPER__SERVER__TRANSPORT", "event_loop");
    /// let cfg = KeeperConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(Self::environment());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path).required(true))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    ///
    /// Missing data directories are created here; the node never refuses to
    /// start only because a configured directory does not exist yet.
    pub fn validate(self) -> Result<Self> {
        self.server.validate()?;
        self.storage.validate()?;
        self.tree.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .ignore_empty(true)
            .try_parsing(true)
    }
}

pub(crate) fn invalid(msg: String) -> Error {
    Error::Config(ConfigError::Message(msg))
}

/// Ensures directory path is valid and writable, creating it when absent
pub(super) fn validate_directory(
    path: &Path,
    name: &str,
) -> Result<()> {
    use std::fs;

    if path.as_os_str().is_empty() {
        return Err(invalid(format!("{name} path cannot be empty")));
    }

    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            invalid(format!(
                "Failed to create {} directory at {}: {}",
                name,
                path.display(),
                e
            ))
        })?;
    }

    // Check write permissions
    let test_file = path.join(".permission_test");
    fs::write(&test_file, b"test").map_err(|e| {
        invalid(format!(
            "No write permission in {} directory {}: {}",
            name,
            path.display(),
            e
        ))
    })?;
    fs::remove_file(&test_file).ok();

    Ok(())
}
