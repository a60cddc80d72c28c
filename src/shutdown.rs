//! Power-state transitions of the init process.
//!
//! Poweroff, reboot and halt walk through three force levels:
//!
//! - **Graceful**: stop services, SIGTERM everything, wait the grace period
//! - **Forced**: SIGKILL everything, sync, run the shutdown hook
//! - **Immediate**: issue the kernel power call
//!
//! Each level can be entered directly. Hibernate skips all three and goes
//! straight to the kernel.

use crate::error::Result;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Target power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownType {
    /// Power off the system
    PowerOff,
    /// Reboot the system
    Reboot,
    /// Halt the system
    Halt,
    /// Suspend to disk (experimental)
    Hibernate,
}

impl fmt::Display for ShutdownType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownType::PowerOff => write!(f, "poweroff"),
            ShutdownType::Reboot => write!(f, "reboot"),
            ShutdownType::Halt => write!(f, "halt"),
            ShutdownType::Hibernate => write!(f, "hibernate"),
        }
    }
}

/// How much patience is left for running processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceLevel {
    Graceful,
    Forced,
    Immediate,
}

/// A requested transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownState {
    pub target: ShutdownType,
    pub level: ForceLevel,
}

impl ShutdownState {
    pub fn new(target: ShutdownType, level: ForceLevel) -> Self {
        Self { target, level }
    }

    /// Whether `request`, arriving while `self` is in progress, should take
    /// over.
    pub fn escalates_to(&self, request: &ShutdownState) -> bool {
        request.target != ShutdownType::Hibernate && request.level > self.level
    }
}

/// The system calls a shutdown is made of.
pub trait Machine {
    /// Ask the service manager to stop every service.
    fn stop_services(&mut self) -> Result<()>;

    /// Collect terminated children.
    fn reap(&mut self);

    /// Send `sig` to every process we may signal.
    fn signal_all(&mut self, sig: Signal) -> Result<()>;

    /// Wait out the grace period of `current`.
    ///
    /// Returns a stronger request received in the meantime, if any.
    fn wait_grace(
        &mut self,
        current: ShutdownState,
        period: Duration,
    ) -> Result<Option<ShutdownState>>;

    /// Flush filesystem caches.
    fn sync(&mut self);

    /// Run the external shutdown hook to completion.
    fn run_shutdown_hook(&mut self) -> Result<()>;

    /// Issue the terminal kernel call for `target`.
    fn power(&mut self, target: ShutdownType) -> Result<()>;
}

/// Drives a [`Machine`] through the force levels.
pub struct ShutdownSequencer<M> {
    machine: M,
    grace_period: Duration,
}

impl<M: Machine> ShutdownSequencer<M> {
    pub fn new(machine: M, grace_period: Duration) -> Self {
        Self {
            machine,
            grace_period,
        }
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    /// Run `state` until the kernel call has been issued.
    ///
    /// Failing steps are logged and skipped so that the machine always
    /// reaches the kernel call. Only a failure of the kernel call itself
    /// is returned.
    pub fn run(&mut self, state: ShutdownState) -> Result<()> {
        let mut state = state;

        loop {
            info!(target_state = %state.target, level = ?state.level, "Shutdown step");

            state = match (state.target, state.level) {
                (ShutdownType::Hibernate, _) | (_, ForceLevel::Immediate) => {
                    return self.machine.power(state.target);
                }
                (_, ForceLevel::Graceful) => self.graceful(state)?,
                (_, ForceLevel::Forced) => self.forced(state),
            };
        }
    }

    fn graceful(&mut self, state: ShutdownState) -> Result<ShutdownState> {
        if let Err(e) = self.machine.stop_services() {
            warn!(error = %e, "Failed to stop services");
        }
        self.machine.reap();

        if let Err(e) = self.machine.signal_all(Signal::SIGTERM) {
            warn!(error = %e, "Failed to terminate processes");
        }
        self.machine.reap();

        match self.machine.wait_grace(state, self.grace_period)? {
            Some(request) => {
                info!(target_state = %request.target, level = ?request.level, "Shutdown escalated");
                Ok(request)
            }
            None => Ok(ShutdownState::new(state.target, ForceLevel::Forced)),
        }
    }

    fn forced(&mut self, state: ShutdownState) -> ShutdownState {
        if let Err(e) = self.machine.signal_all(Signal::SIGKILL) {
            warn!(error = %e, "Failed to kill processes");
        }
        self.machine.reap();

        self.machine.sync();

        if let Err(e) = self.machine.run_shutdown_hook() {
            warn!(error = %e, "Shutdown hook failed");
        }
        self.machine.reap();

        ShutdownState::new(state.target, ForceLevel::Immediate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Step {
        StopServices,
        Reap,
        SignalAll(Signal),
        WaitGrace(Duration),
        Sync,
        ShutdownHook,
        Power(ShutdownType),
    }

    #[derive(Default)]
    struct FakeMachine {
        steps: Vec<Step>,
        escalation: Option<ShutdownState>,
        fail_services: bool,
    }

    impl Machine for FakeMachine {
        fn stop_services(&mut self) -> Result<()> {
            self.steps.push(Step::StopServices);
            if self.fail_services {
                return Err(Error::Command {
                    command: "kanrisha stop".to_string(),
                    reason: "exit status 1".to_string(),
                });
            }
            Ok(())
        }

        fn reap(&mut self) {
            self.steps.push(Step::Reap);
        }

        fn signal_all(&mut self, sig: Signal) -> Result<()> {
            self.steps.push(Step::SignalAll(sig));
            Ok(())
        }

        fn wait_grace(
            &mut self,
            _current: ShutdownState,
            period: Duration,
        ) -> Result<Option<ShutdownState>> {
            self.steps.push(Step::WaitGrace(period));
            Ok(self.escalation.take())
        }

        fn sync(&mut self) {
            self.steps.push(Step::Sync);
        }

        fn run_shutdown_hook(&mut self) -> Result<()> {
            self.steps.push(Step::ShutdownHook);
            Ok(())
        }

        fn power(&mut self, target: ShutdownType) -> Result<()> {
            self.steps.push(Step::Power(target));
            Ok(())
        }
    }

    const GRACE: Duration = Duration::from_secs(10);

    fn run(machine: FakeMachine, state: ShutdownState) -> Vec<Step> {
        let mut sequencer = ShutdownSequencer::new(machine, GRACE);
        sequencer.run(state).unwrap();
        sequencer.machine().steps.clone()
    }

    fn forced_steps(target: ShutdownType) -> Vec<Step> {
        vec![
            Step::SignalAll(Signal::SIGKILL),
            Step::Reap,
            Step::Sync,
            Step::ShutdownHook,
            Step::Reap,
            Step::Power(target),
        ]
    }

    #[test]
    fn test_graceful_walks_every_level() {
        let steps = run(
            FakeMachine::default(),
            ShutdownState::new(ShutdownType::PowerOff, ForceLevel::Graceful),
        );

        let mut expected = vec![
            Step::StopServices,
            Step::Reap,
            Step::SignalAll(Signal::SIGTERM),
            Step::Reap,
            Step::WaitGrace(GRACE),
        ];
        expected.extend(forced_steps(ShutdownType::PowerOff));
        assert_eq!(steps, expected);
    }

    #[test]
    fn test_forced_skips_graceful_steps() {
        let steps = run(
            FakeMachine::default(),
            ShutdownState::new(ShutdownType::Reboot, ForceLevel::Forced),
        );
        assert_eq!(steps, forced_steps(ShutdownType::Reboot));
    }

    #[test]
    fn test_immediate_goes_to_kernel() {
        let steps = run(
            FakeMachine::default(),
            ShutdownState::new(ShutdownType::Halt, ForceLevel::Immediate),
        );
        assert_eq!(steps, vec![Step::Power(ShutdownType::Halt)]);
    }

    #[test]
    fn test_hibernate_bypasses_levels() {
        let steps = run(
            FakeMachine::default(),
            ShutdownState::new(ShutdownType::Hibernate, ForceLevel::Graceful),
        );
        assert_eq!(steps, vec![Step::Power(ShutdownType::Hibernate)]);
    }

    #[test]
    fn test_escalation_during_grace_period() {
        let machine = FakeMachine {
            escalation: Some(ShutdownState::new(
                ShutdownType::Reboot,
                ForceLevel::Immediate,
            )),
            ..Default::default()
        };
        let steps = run(
            machine,
            ShutdownState::new(ShutdownType::PowerOff, ForceLevel::Graceful),
        );

        assert_eq!(steps.last(), Some(&Step::Power(ShutdownType::Reboot)));
        assert!(!steps.contains(&Step::Sync));
    }

    #[test]
    fn test_failing_services_do_not_stall_shutdown() {
        let machine = FakeMachine {
            fail_services: true,
            ..Default::default()
        };
        let steps = run(
            machine,
            ShutdownState::new(ShutdownType::Halt, ForceLevel::Graceful),
        );
        assert_eq!(steps.last(), Some(&Step::Power(ShutdownType::Halt)));
    }

    #[test]
    fn test_escalation_rules() {
        let graceful = ShutdownState::new(ShutdownType::PowerOff, ForceLevel::Graceful);
        let forced = ShutdownState::new(ShutdownType::Reboot, ForceLevel::Forced);
        let hibernate = ShutdownState::new(ShutdownType::Hibernate, ForceLevel::Immediate);

        assert!(graceful.escalates_to(&forced));
        assert!(!forced.escalates_to(&graceful));
        assert!(!graceful.escalates_to(&graceful));
        assert!(!graceful.escalates_to(&hibernate));
    }
}
