//! Settings for the PID 1 process.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of the init process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    /// System initialization script, run to completion at boot
    pub rc_init: Vec<String>,
    /// Script run to completion once the service manager has been launched
    pub rc_postinit: Vec<String>,
    /// Shutdown hook, run after every process has been killed
    pub rc_shutdown: Vec<String>,
    /// Command launching the service manager daemon
    pub service_start: Vec<String>,
    /// Command asking the service manager to stop every service
    pub service_stop: Vec<String>,
    /// Time given to processes between SIGTERM and SIGKILL
    #[serde(with = "crate::duration_secs")]
    pub grace_period: Duration,
    /// Interval of the watchdog alarm that forces a reap
    #[serde(with = "crate::duration_secs")]
    pub watchdog_interval: Duration,
    /// Refuse to run unless we are PID 1
    pub require_pid1: bool,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            rc_init: vec!["/bin/rc.init".to_string()],
            rc_postinit: vec!["/bin/rc.postinit".to_string()],
            rc_shutdown: vec!["/bin/rc.shutdown".to_string()],
            service_start: vec!["/sbin/kanrisha".to_string(), "daemon".to_string()],
            service_stop: vec!["/sbin/kanrisha".to_string(), "stop".to_string()],
            grace_period: Duration::from_secs(10),
            watchdog_interval: Duration::from_secs(30),
            require_pid1: true,
        }
    }
}
