//! Process control for the service manager and the init process.
//!
//! This module handles launching entry points in their own session,
//! delivering signals, and checking whether a signaled process is gone.

use crate::error::{Error, Result};
use crate::signals;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// `argv[0]` handed to every entry point, so scripts can tell they were
/// started by the service manager.
pub const RUN_MARKER: &str = "--run-by-kanrisha";

/// Outcome of a signal delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The signal was queued to a live process
    Delivered,
    /// No such process; it has already exited
    Vanished,
}

/// Send `sig` to `pid`.
///
/// "No such process" is not an error for callers trying to get rid of a
/// process; "not permitted" is.
pub fn send_signal(pid: u32, sig: Signal) -> Result<Delivery> {
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) => {
            debug!(pid = pid, signal = ?sig, "Sent signal to process");
            Ok(Delivery::Delivered)
        }
        Err(Errno::ESRCH) => Ok(Delivery::Vanished),
        Err(Errno::EPERM) => Err(Error::PermissionDenied(format!(
            "cannot send {} to process {}",
            sig, pid
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Whether our child `pid` still runs.
///
/// A zombie child is collected here, otherwise it would look alive
/// forever. A pid that is no longer our child has already been reaped and
/// is gone, even if the number now belongs to another process.
pub fn is_alive(pid: u32) -> bool {
    let target = Pid::from_raw(pid as i32);
    match waitpid(target, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => true,
        Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => false,
        Ok(_) => true,
        Err(Errno::ECHILD) => false,
        Err(_) => signal::kill(target, None).is_ok(),
    }
}

/// Run `cmd` in a new session with every signal unblocked.
///
/// Both programs block the full signal set on their main context; the
/// child must not inherit that mask.
pub fn detach(cmd: &mut Command) -> &mut Command {
    unsafe {
        cmd.pre_exec(|| {
            signals::unblock_all()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            nix::unistd::setsid()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            Ok(())
        })
    }
}

/// Build a detached command from an argument vector.
pub fn session_command(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::SpawnFailure {
            name: String::new(),
            reason: "Empty command".to_string(),
        })?;

    let mut cmd = Command::new(program);
    cmd.args(args);
    detach(&mut cmd);
    Ok(cmd)
}

/// Launch a service entry point.
///
/// The entry point runs in its own session with signals unblocked, its
/// standard output redirected to a truncated `log_path` created with
/// `log_mode`, and [`RUN_MARKER`] as `argv[0]` followed by `true`.
///
/// Failure contract:
/// - the log cannot be opened for writing: [`Error::PermissionDenied`]
/// - the system is out of processes or memory: [`Error::ResourceExhaustion`]
/// - the entry point cannot be executed: [`Error::SpawnFailure`]
///
/// In every failure case no process is left behind. On success the child
/// is not waited for; its exit is collected by the reaper.
pub fn launch(name: &str, entry_point: &Path, log_path: &Path, log_mode: u32) -> Result<u32> {
    let log = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(log_mode)
        .open(log_path)
        .map_err(|e| Error::from_io(&log_path.display().to_string(), e))?;

    let mut cmd = Command::new(entry_point);
    detach(&mut cmd)
        .arg0(RUN_MARKER)
        .arg("true")
        .stdin(Stdio::null())
        .stdout(Stdio::from(log));

    let child = cmd.spawn().map_err(|e| match Error::from_io(name, e) {
        Error::Io(e) => Error::SpawnFailure {
            name: name.to_string(),
            reason: e.to_string(),
        },
        other => other,
    })?;

    let pid = child.id();
    info!(service = %name, pid = pid, "Spawned process");
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_to_missing_process_vanishes() {
        // pid_max on Linux never reaches this value
        let delivery = send_signal(i32::MAX as u32, Signal::SIGTERM).unwrap();
        assert_eq!(delivery, Delivery::Vanished);
        assert!(!is_alive(i32::MAX as u32));
    }

    #[test]
    fn test_non_child_is_gone() {
        // Alive, but not a child we could still reap
        assert!(!is_alive(std::process::id()));
    }

    #[test]
    fn test_session_command_requires_program() {
        assert!(matches!(
            session_command(&[]),
            Err(Error::SpawnFailure { .. })
        ));
    }
}
