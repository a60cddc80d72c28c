//! Start, stop and restart semantics for supervised services.

use crate::error::{Error, Result};
use crate::layout::ServiceLayout;
use crate::process::{self, Delivery};
use crate::reaper::ExitStatus;
use crate::registry::ServiceRegistry;
use crate::service::{Service, ServiceStatus};
use ichirou_config::DaemonConfig;
use nix::sys::signal::Signal;
use nix::unistd::{access, AccessFlags};
use tracing::{debug, error, info, warn};

/// Outcome of a batch operation over several services.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Services the operation succeeded for
    pub succeeded: Vec<String>,
    /// Services the operation failed for, with the reason
    pub failed: Vec<(String, Error)>,
}

impl BatchReport {
    /// Number of failed services.
    pub fn failures(&self) -> usize {
        self.failed.len()
    }
}

/// Owns the registry and applies start/stop/restart against it.
pub struct Supervisor {
    /// Currently supervised services
    registry: ServiceRegistry,
    /// Where entry points, logs and links live
    layout: ServiceLayout,
    /// Daemon configuration
    config: DaemonConfig,
}

impl Supervisor {
    /// Create a supervisor with an empty registry.
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            registry: ServiceRegistry::new(),
            layout: ServiceLayout::new(&config.services_dir),
            config,
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn layout(&self) -> &ServiceLayout {
        &self.layout
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Start `name` and register it.
    pub fn start(&mut self, name: &str) -> Result<u32> {
        ServiceLayout::validate_name(name)?;

        if self.registry.contains(name) {
            return Err(Error::AlreadyRunning(name.to_string()));
        }

        let entry_point = self.layout.entry_point(name);
        if !entry_point.is_file() {
            return Err(Error::NotFound(name.to_string()));
        }
        if access(&entry_point, AccessFlags::X_OK).is_err() {
            return Err(Error::PermissionDenied(entry_point.display().to_string()));
        }

        info!(service = %name, "Starting service");

        let log_path = self.layout.log_path(name);
        let pid = match process::launch(name, &entry_point, &log_path, self.config.log_mode) {
            Ok(pid) => pid,
            Err(e @ Error::SpawnFailure { .. }) => {
                if let Err(log_err) = self.layout.append_log(name, &format!("kanrisha: {}", e)) {
                    warn!(service = %name, error = %log_err, "Failed to record spawn failure");
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let service = Service::new(name, pid, self.config.should_restart(name));
        self.registry.insert(service)?;

        info!(service = %name, pid = pid, "Service started");
        Ok(pid)
    }

    /// Stop `name` and drop it from the registry.
    ///
    /// Sends SIGTERM, then polls and re-signals up to `stop_attempts` times,
    /// `stop_interval` apart, before escalating to SIGKILL. A process that
    /// is already gone counts as stopped. A process we may not signal
    /// aborts the stop and keeps its entry.
    pub async fn stop(&mut self, name: &str) -> Result<()> {
        let pid = self
            .registry
            .get(name)
            .map(|s| s.pid)
            .ok_or_else(|| Error::NotRunning(name.to_string()))?;

        info!(service = %name, pid = pid, "Stopping service");

        let mut exited = process::send_signal(pid, Signal::SIGTERM)? == Delivery::Vanished;

        let mut attempts = 0;
        while !exited && attempts < self.config.stop_attempts {
            tokio::time::sleep(self.config.stop_interval).await;
            exited = !process::is_alive(pid)
                || process::send_signal(pid, Signal::SIGTERM)? == Delivery::Vanished;
            attempts += 1;
        }

        if !exited {
            warn!(service = %name, pid = pid, "Service won't terminate, killing it");
            process::send_signal(pid, Signal::SIGKILL)?;
        }

        self.registry.remove(name);
        info!(service = %name, "Service stopped");
        Ok(())
    }

    /// Stop then start `name`.
    ///
    /// The two halves are independent: a failed start leaves the service
    /// stopped.
    pub async fn restart(&mut self, name: &str) -> Result<u32> {
        if !self.registry.contains(name) {
            return Err(Error::NotRunning(name.to_string()));
        }

        self.stop(name).await?;
        self.start(name)
    }

    /// Start every enabled service, continuing past failures.
    ///
    /// Only a fatal error interrupts the batch.
    pub fn start_all(&mut self) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        for name in self.layout.list_enabled()? {
            match self.start(&name) {
                Ok(_) => report.succeeded.push(name),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(service = %name, error = %e, "Failed to start enabled service");
                    report.failed.push((name, e));
                }
            }
        }

        Ok(report)
    }

    /// Stop every registered service, continuing past failures.
    pub async fn stop_all(&mut self) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        for name in self.registry.names() {
            match self.stop(&name).await {
                Ok(()) => report.succeeded.push(name),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(service = %name, error = %e, "Failed to stop service");
                    report.failed.push((name, e));
                }
            }
        }

        Ok(report)
    }

    /// Apply the restart policy to a reaped process.
    ///
    /// Exits of processes that are no longer registered (stopped on
    /// purpose, or replaced since) are ignored.
    pub fn handle_exit(&mut self, status: ExitStatus) -> Result<Option<u32>> {
        let name = match self.registry.find_by_pid(status.pid) {
            Some(service) => service.name.clone(),
            None => {
                debug!(pid = status.pid, "Unknown process exited");
                return Ok(None);
            }
        };

        info!(
            service = %name,
            pid = status.pid,
            code = ?status.code,
            signal = ?status.signal,
            "Service process exited"
        );

        self.auto_restart(&name, status)
    }

    /// Bring a dead service back up, unless its restart cap is reached.
    ///
    /// The process of the dead run has already been reaped, so stopping it
    /// only drops the registry row. A service at its cap, or one whose
    /// policy forbids restarts, is left dead and unregistered.
    pub fn auto_restart(&mut self, name: &str, status: ExitStatus) -> Result<Option<u32>> {
        let previous = match self.registry.remove(name) {
            Some(previous) => previous,
            None => return Ok(None),
        };

        if !previous.restart_when_dead {
            info!(service = %name, "Service is not restarted when dead");
            return Ok(None);
        }

        if previous.restart_count >= self.config.restart_cap {
            warn!(
                service = %name,
                restart_count = previous.restart_count,
                "Service exceeded max restart count"
            );
            return Ok(None);
        }

        let pid = self.start(name)?;
        if let Some(service) = self.registry.get_mut(name) {
            service.restart_count = previous.restart_count + 1;
            service.last_exit_normal = status.normal();
            info!(
                service = %name,
                pid = pid,
                restart_count = service.restart_count,
                "Service restarted"
            );
        }

        Ok(Some(pid))
    }

    /// Status report for `name`.
    pub fn status(&self, name: &str) -> Result<ServiceStatus> {
        ServiceLayout::validate_name(name)?;
        if !self.layout.exists(name) {
            return Err(Error::NotFound(name.to_string()));
        }

        let enabled = self.layout.is_enabled(name);
        let log_tail = self.layout.tail_log(name, self.config.status_log_lines)?;

        Ok(match self.registry.get(name) {
            Some(service) => ServiceStatus::running(service, enabled, log_tail),
            None => ServiceStatus::stopped(name, enabled, log_tail),
        })
    }
}
