//! Ichirou system configuration
//!
//! This crate holds the typed configuration shared by the two programs of
//! the ichirou init system:
//!
//! - [`InitConfig`]: the PID 1 process (startup scripts, shutdown hook,
//!   grace period, watchdog interval)
//! - [`DaemonConfig`]: the kanrisha service manager (service directory,
//!   command channel, restart cap, stop timeouts)
//!
//! Every field has a default matching the compiled-in values the tools
//! shipped with, so an absent configuration file is never an error unless
//! the loader is told otherwise.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ichirou_config::ConfigLoader;
//!
//! let config = ConfigLoader::system().load().unwrap();
//! println!("services live in {}", config.daemon.services_dir.display());
//! ```
//!
//! # File format
//!
//! ```toml
//! [init]
//! grace_period = 10
//! rc_shutdown = ["/bin/rc.shutdown"]
//!
//! [daemon]
//! services_dir = "/etc/kanrisha.d"
//! restart_cap = 128
//! stop_interval = 100
//! no_restart = ["getty"]
//! ```

pub mod daemon;
pub mod error;
pub mod init;
pub mod loader;

pub use daemon::DaemonConfig;
pub use error::{ConfigError, Result};
pub use init::InitConfig;
pub use loader::{load_system_config, ConfigLoader};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete configuration for both programs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// PID 1 settings
    pub init: InitConfig,
    /// Service manager settings
    pub daemon: DaemonConfig,
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Serialize the configuration back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Durations stored as whole seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Durations stored as milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
