//! Zombie reaping.
//!
//! The init process reaps synchronously from its signal loop; the daemon
//! reaps from an async task and forwards the exit statuses to its main
//! loop, which owns the registry.

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{alarm, Pid};
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Exit status of a reaped process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Process ID
    pub pid: u32,
    /// Exit code (if exited normally)
    pub code: Option<i32>,
    /// Signal (if killed by signal)
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Exit code 0 and no signal.
    pub fn normal(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }
}

/// Collects terminated children without blocking.
#[derive(Debug, Clone, Default)]
pub struct Reaper {
    /// Watchdog alarm re-armed after every pass
    watchdog: Option<Duration>,
}

impl Reaper {
    /// A reaper with no watchdog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A reaper that re-arms a SIGALRM watchdog after each pass.
    ///
    /// The alarm guarantees a periodic reap even if a SIGCHLD was lost.
    pub fn with_watchdog(interval: Duration) -> Self {
        Self {
            watchdog: Some(interval),
        }
    }

    /// Reap every child that has already terminated.
    ///
    /// Returns immediately when none are waiting, so calling it twice in a
    /// row is harmless.
    pub fn reap(&self) -> Vec<ExitStatus> {
        let mut statuses = Vec::new();

        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    let pid = pid.as_raw() as u32;
                    debug!(pid = pid, code = code, "Reaped exited process");
                    statuses.push(ExitStatus {
                        pid,
                        code: Some(code),
                        signal: None,
                    });
                }
                Ok(WaitStatus::Signaled(pid, sig, _)) => {
                    let pid = pid.as_raw() as u32;
                    debug!(pid = pid, signal = ?sig, "Reaped signaled process");
                    statuses.push(ExitStatus {
                        pid,
                        code: None,
                        signal: Some(sig as i32),
                    });
                }
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!(error = %e, "Error reaping zombies");
                    break;
                }
            }
        }

        self.arm_watchdog();
        statuses
    }

    /// Re-arm the watchdog alarm, if configured.
    pub fn arm_watchdog(&self) {
        if let Some(interval) = self.watchdog {
            alarm::set(interval.as_secs().max(1) as libc::c_uint);
        }
    }
}

/// Spawn the async reaper: on every SIGCHLD, reap and forward the statuses.
///
/// The task never touches the registry; the receiver side applies the
/// restart policy from the daemon's main loop.
pub fn spawn_reaper_task(
    reaper: Reaper,
    exits: mpsc::UnboundedSender<ExitStatus>,
) -> std::io::Result<JoinHandle<()>> {
    let mut sigchld = signal(SignalKind::child())?;

    Ok(tokio::spawn(async move {
        debug!("Reaper task started");
        // Children may have exited before the handler was installed
        loop {
            for status in reaper.reap() {
                if exits.send(status).is_err() {
                    return;
                }
            }
            if sigchld.recv().await.is_none() {
                return;
            }
        }
    }))
}
