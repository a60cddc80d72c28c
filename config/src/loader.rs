//! Configuration loading utilities
//!
//! Locates the configuration file, falls back to defaults when it is
//! missing, and validates the result before handing it out.

use crate::daemon::NAME_MAX;
use crate::{Config, ConfigError, Result};
use std::path::{Path, PathBuf};

/// Configuration loader
pub struct ConfigLoader {
    /// Path of the TOML file
    path: PathBuf,
    /// Whether to use default values when the file is missing
    use_defaults: bool,
    /// Whether to validate configuration after loading
    validate: bool,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            use_defaults: true,
            validate: true,
        }
    }

    /// Create a loader for the system configuration file
    pub fn system() -> Self {
        Self::new(get_config_path())
    }

    /// Set whether to use defaults for a missing file
    pub fn use_defaults(mut self, use_defaults: bool) -> Self {
        self.use_defaults = use_defaults;
        self
    }

    /// Set whether to validate configuration
    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Path this loader reads from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration
    pub fn load(&self) -> Result<Config> {
        let config = if self.path.exists() {
            Config::from_file(&self.path)?
        } else if self.use_defaults {
            tracing::debug!(path = %self.path.display(), "No configuration file, using defaults");
            Config::default()
        } else {
            return Err(ConfigError::NotFound(self.path.clone()));
        };

        if self.validate {
            validate_config(&config)?;
        }

        Ok(config)
    }
}

/// Validate configuration for values the programs cannot work with
pub fn validate_config(config: &Config) -> Result<()> {
    let commands = [
        ("rc_init", &config.init.rc_init),
        ("rc_postinit", &config.init.rc_postinit),
        ("rc_shutdown", &config.init.rc_shutdown),
        ("service_start", &config.init.service_start),
        ("service_stop", &config.init.service_stop),
    ];

    for (key, argv) in commands {
        if argv.first().map_or(true, |program| program.is_empty()) {
            return Err(ConfigError::Invalid(format!("{} must name a program", key)));
        }
    }

    let daemon = &config.daemon;

    if daemon.stop_attempts == 0 {
        return Err(ConfigError::Invalid(
            "stop_attempts must be at least 1".to_string(),
        ));
    }

    if daemon.max_name_len == 0 || daemon.max_name_len > NAME_MAX {
        return Err(ConfigError::Invalid(format!(
            "max_name_len must be between 1 and {}",
            NAME_MAX
        )));
    }

    if daemon.channel_path.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(
            "channel_path must not be empty".to_string(),
        ));
    }

    if daemon.channel_mode & 0o077 != 0 {
        tracing::warn!(
            mode = %format_args!("{:o}", daemon.channel_mode),
            "Command channel is accessible to other users"
        );
    }

    Ok(())
}

/// Default configuration paths
pub mod paths {
    use std::path::PathBuf;

    /// System configuration file
    pub fn system_config() -> PathBuf {
        PathBuf::from("/etc/ichirou.toml")
    }
}

/// Environment variable names used by the configuration system
pub mod env_vars {
    /// Configuration file override
    pub const CONFIG_PATH: &str = "ICHIROU_CONFIG";
}

/// Get configuration path from environment or default
pub fn get_config_path() -> PathBuf {
    std::env::var(env_vars::CONFIG_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| paths::system_config())
}

/// Load the configuration from the explicit path, or the system location
pub fn load_system_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::new(path).use_defaults(false).load(),
        None => ConfigLoader::system().load(),
    }
}
