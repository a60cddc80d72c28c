//! Supervised service records and their status reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One supervised unit, as held in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// Unique name of the service
    pub name: String,
    /// Process ID of the current run
    pub pid: u32,
    /// Whether a crash brings the service back up
    pub restart_when_dead: bool,
    /// Number of automatic restarts so far
    pub restart_count: u32,
    /// Whether the previous run ended with exit code 0 and no signal
    pub last_exit_normal: bool,
    /// Time the current run was started
    pub started_at: DateTime<Utc>,
}

impl Service {
    /// Create a record for a freshly started process.
    pub fn new(name: impl Into<String>, pid: u32, restart_when_dead: bool) -> Self {
        Self {
            name: name.into(),
            pid,
            restart_when_dead,
            restart_count: 0,
            last_exit_normal: false,
            started_at: Utc::now(),
        }
    }

    /// Time since the current run was started.
    pub fn uptime(&self) -> Duration {
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        Duration::from_secs(elapsed.num_seconds().max(0) as u64)
    }
}

/// Whether a service has a live entry in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceState {
    /// Service is registered with a live process
    Running,
    /// Service is not registered
    NotRunning,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Running => write!(f, "running"),
            ServiceState::NotRunning => write!(f, "not running"),
        }
    }
}

/// Service status information for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Service name
    pub name: String,
    /// Current state
    pub state: ServiceState,
    /// Main PID
    pub main_pid: Option<u32>,
    /// Uptime of the current run
    pub uptime_secs: Option<u64>,
    /// Number of automatic restarts
    pub restart_count: u32,
    /// Whether the previous run ended normally
    pub last_exit_normal: bool,
    /// Whether the service is enabled
    pub enabled: bool,
    /// Last lines of the service log
    pub log_tail: Vec<String>,
}

impl ServiceStatus {
    /// Status of a registered service.
    pub fn running(service: &Service, enabled: bool, log_tail: Vec<String>) -> Self {
        Self {
            name: service.name.clone(),
            state: ServiceState::Running,
            main_pid: Some(service.pid),
            uptime_secs: Some(service.uptime().as_secs()),
            restart_count: service.restart_count,
            last_exit_normal: service.last_exit_normal,
            enabled,
            log_tail,
        }
    }

    /// Status of a service with no registry entry.
    pub fn stopped(name: &str, enabled: bool, log_tail: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            state: ServiceState::NotRunning,
            main_pid: None,
            uptime_secs: None,
            restart_count: 0,
            last_exit_normal: false,
            enabled,
            log_tail,
        }
    }

    /// Render the report the way `kanrisha status` prints it.
    pub fn render(&self) -> String {
        let mut out = format!("{} - {}\n", self.name, self.state);

        match self.main_pid {
            Some(pid) => out.push_str(&format!("main pid: {}\n", pid)),
            None => out.push_str("main pid: -\n"),
        }

        if let Some(uptime) = self.uptime_secs {
            let hours = uptime / 3600;
            let minutes = (uptime % 3600) / 60;
            let seconds = uptime % 60;
            out.push_str(&format!("uptime: {}h {}m {}s\n", hours, minutes, seconds));
        }

        if self.restart_count > 0 {
            out.push_str(&format!("restarts: {}\n", self.restart_count));
        }

        out.push_str(&format!(
            "enabled: {}\n\n",
            if self.enabled { "yes" } else { "no" }
        ));

        for line in &self.log_tail {
            out.push_str(line);
            out.push('\n');
        }

        out
    }
}
