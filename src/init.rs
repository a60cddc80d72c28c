//! Init system core - PID 1 duties and signal handling.

use crate::error::{Error, Result};
use crate::shutdown::{ForceLevel, Machine, ShutdownSequencer, ShutdownState, ShutdownType};
use ichirou_config::InitConfig;
use kanrisha::process;
use kanrisha::reaper::Reaper;
use kanrisha::signals::{self, SignalRouter};
use libc::c_int;
use nix::errno::Errno;
use nix::sys::reboot::{reboot, RebootMode};
use nix::sys::signal::{kill, SigSet, Signal};
use nix::unistd::{fork, ForkResult, Pid};
use std::cell::Cell;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What a signal asks the init process to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Shutdown(ShutdownState),
    Reap,
}

/// The signals the init process reacts to.
pub fn signal_table() -> Vec<(c_int, Action)> {
    use ForceLevel::*;
    use ShutdownType::*;

    let rt = libc::SIGRTMIN();
    let shutdown = |target, level| Action::Shutdown(ShutdownState::new(target, level));

    vec![
        (libc::SIGUSR1, shutdown(PowerOff, Graceful)),
        (rt + 4, shutdown(PowerOff, Forced)),
        (rt + 14, shutdown(PowerOff, Immediate)),
        (libc::SIGINT, shutdown(Reboot, Graceful)),
        (rt + 5, shutdown(Reboot, Forced)),
        (rt + 15, shutdown(Reboot, Immediate)),
        (libc::SIGUSR2, shutdown(Halt, Graceful)),
        (rt + 3, shutdown(Halt, Forced)),
        (rt + 6, shutdown(Hibernate, Immediate)),
        (libc::SIGCHLD, Action::Reap),
        (libc::SIGALRM, Action::Reap),
    ]
}

/// Action bound to `sig`, if any.
pub fn action_for(sig: c_int) -> Option<Action> {
    signal_table()
        .into_iter()
        .find(|(s, _)| *s == sig)
        .map(|(_, action)| action)
}

/// The init process.
pub struct Init {
    config: InitConfig,
}

impl Init {
    /// Create the init process, checking that we are PID 1.
    pub fn new(config: InitConfig) -> Result<Self> {
        let pid = std::process::id();
        if config.require_pid1 && pid != 1 {
            return Err(Error::NotPid1(pid));
        }

        Ok(Self { config })
    }

    /// Boot the system and serve signals until a shutdown completes.
    ///
    /// Does not return on success.
    pub fn run(self) -> Result<()> {
        info!("ichirou init system starting");

        let set = signals::block_all()?;
        std::env::set_current_dir("/")?;

        let reaper = Reaper::with_watchdog(self.config.watchdog_interval);

        if let Err(e) = run_to_completion(&self.config.rc_init) {
            error!(error = %e, "System initialization failed");
        }

        match process::session_command(&self.config.service_start)?.spawn() {
            Ok(child) => info!(pid = child.id(), "Service manager launched"),
            Err(e) => error!(error = %e, "Failed to launch service manager"),
        }

        if let Err(e) = run_to_completion(&self.config.rc_postinit) {
            error!(error = %e, "Post-initialization failed");
        }

        let requested = Cell::new(None);
        let mut router = SignalRouter::new(set);
        for (sig, action) in signal_table() {
            match action {
                Action::Reap => router.on(sig, || log_reaped(&reaper)),
                Action::Shutdown(state) => router.on(sig, {
                    let requested = &requested;
                    move || requested.set(Some(state))
                }),
            };
        }

        reaper.arm_watchdog();
        info!("Entering signal loop");

        let state = loop {
            let sig = router.wait_and_dispatch()?;
            if !router.handles(sig) {
                debug!(signal = %signals::signal_name(sig), "Ignoring signal");
            }
            if let Some(state) = requested.take() {
                break state;
            }
        };

        info!(
            target_state = %state.target,
            level = ?state.level,
            "Initiating system shutdown"
        );

        let machine = System::new(&self.config, &reaper, *router.set());
        let mut sequencer = ShutdownSequencer::new(machine, self.config.grace_period);
        if let Err(e) = sequencer.run(state) {
            error!(error = %e, "Power transition failed");
        }

        // Shutdown signals are no longer served from here on, also when a
        // hibernated machine resumes.
        park(router.set(), &reaper)
    }
}

/// Serve reaps forever once the kernel call has been issued.
///
/// After a resume from hibernation the machine keeps running in this
/// state: children are still reaped, but no further power transition can
/// be requested by signal.
fn park(set: &SigSet, reaper: &Reaper) -> ! {
    loop {
        if let Err(e) = signals::wait_for(set, None) {
            warn!(error = %e, "Signal wait failed");
        }
        reaper.reap();
    }
}

fn log_reaped(reaper: &Reaper) {
    for status in reaper.reap() {
        debug!(pid = status.pid, code = ?status.code, signal = ?status.signal, "Reaped process");
    }
}

/// Run `argv` in its own session and wait for it.
fn run_to_completion(argv: &[String]) -> Result<()> {
    let command = argv.join(" ");
    info!(command = %command, "Running");

    let status = process::session_command(argv)?
        .status()
        .map_err(|e| Error::Command {
            command: command.clone(),
            reason: e.to_string(),
        })?;

    if !status.success() {
        return Err(Error::Command {
            command,
            reason: status.to_string(),
        });
    }
    Ok(())
}

/// The real machine the init process runs on.
pub struct System<'a> {
    config: &'a InitConfig,
    reaper: &'a Reaper,
    set: SigSet,
}

impl<'a> System<'a> {
    pub fn new(config: &'a InitConfig, reaper: &'a Reaper, set: SigSet) -> Self {
        Self { config, reaper, set }
    }
}

impl Machine for System<'_> {
    fn stop_services(&mut self) -> Result<()> {
        run_to_completion(&self.config.service_stop)
    }

    fn reap(&mut self) {
        log_reaped(self.reaper);
    }

    fn signal_all(&mut self, sig: Signal) -> Result<()> {
        info!(signal = %sig, "Signaling all processes");
        match kill(Pid::from_raw(-1), sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn wait_grace(
        &mut self,
        current: ShutdownState,
        period: Duration,
    ) -> Result<Option<ShutdownState>> {
        let deadline = Instant::now() + period;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let sig = match signals::wait_for(&self.set, Some(remaining))? {
                Some(sig) => sig,
                None => return Ok(None),
            };

            match action_for(sig) {
                Some(Action::Reap) => log_reaped(self.reaper),
                Some(Action::Shutdown(request)) if current.escalates_to(&request) => {
                    return Ok(Some(request));
                }
                _ => debug!(signal = %signals::signal_name(sig), "Ignoring signal during shutdown"),
            }
        }
    }

    fn sync(&mut self) {
        info!("Syncing filesystems");
        nix::unistd::sync();
    }

    fn run_shutdown_hook(&mut self) -> Result<()> {
        run_to_completion(&self.config.rc_shutdown)
    }

    fn power(&mut self, target: ShutdownType) -> Result<()> {
        let mode = match target {
            ShutdownType::PowerOff => RebootMode::RB_POWER_OFF,
            ShutdownType::Reboot => RebootMode::RB_AUTOBOOT,
            ShutdownType::Halt => RebootMode::RB_HALT_SYSTEM,
            ShutdownType::Hibernate => RebootMode::RB_SW_SUSPEND,
        };

        info!(target_state = %target, "Issuing kernel power call");

        // PID 1 must never exit, so the call is made from a child.
        match unsafe { fork() }? {
            ForkResult::Child => {
                let _ = reboot(mode);
                unsafe { libc::_exit(1) }
            }
            ForkResult::Parent { child } => {
                debug!(pid = %child, "Forked power helper");
                Ok(())
            }
        }
    }
}
