//! Settings for the kanrisha service manager daemon.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Longest service name the on-disk layout can hold.
pub const NAME_MAX: usize = 255;

/// Configuration of the service manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Root holding the `available/` and `enabled/` directories
    pub services_dir: PathBuf,
    /// Path of the command channel socket
    pub channel_path: PathBuf,
    /// Permission bits of the command channel socket
    pub channel_mode: u32,
    /// Maximum number of automatic restarts per service
    pub restart_cap: u32,
    /// Whether crashed services are restarted at all
    pub restart_when_dead: bool,
    /// Services that are never restarted automatically
    pub no_restart: Vec<String>,
    /// Number of SIGTERM polls before a stop escalates to SIGKILL
    pub stop_attempts: u32,
    /// Delay between two stop polls
    #[serde(with = "crate::duration_millis")]
    pub stop_interval: Duration,
    /// Permission bits of service log files
    pub log_mode: u32,
    /// Number of log lines included in a status report
    pub status_log_lines: usize,
    /// Service names longer than this are truncated on the channel
    pub max_name_len: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            services_dir: PathBuf::from("/etc/kanrisha.d"),
            channel_path: PathBuf::from("/tmp/kanrisha.cmd.sock"),
            channel_mode: 0o600,
            restart_cap: 128,
            restart_when_dead: true,
            no_restart: Vec::new(),
            stop_attempts: 10,
            stop_interval: Duration::from_millis(100),
            log_mode: 0o600,
            status_log_lines: 8,
            max_name_len: NAME_MAX,
        }
    }
}

impl DaemonConfig {
    /// Configuration rooted at `services_dir`, with the channel inside it.
    ///
    /// Used for running a private daemon instance outside of `/etc`.
    pub fn rooted_at(services_dir: impl Into<PathBuf>) -> Self {
        let services_dir = services_dir.into();
        Self {
            channel_path: services_dir.join("kanrisha.cmd.sock"),
            services_dir,
            ..Self::default()
        }
    }

    /// Whether a crashed `name` should be brought back up.
    pub fn should_restart(&self, name: &str) -> bool {
        self.restart_when_dead && !self.no_restart.iter().any(|n| n == name)
    }
}
