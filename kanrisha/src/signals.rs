//! Signal masks and synchronous signal dispatch.
//!
//! Both programs block signals on their main context. The init process
//! then waits for signals one at a time and runs the matching handler, so
//! handlers never run reentrantly. The daemon leaves only a few signals
//! unblocked for the async runtime to pick up.

use crate::error::Result;
use libc::c_int;
use nix::errno::Errno;
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Block every signal on the calling thread, returning the blocked set.
pub fn block_all() -> Result<SigSet> {
    let set = SigSet::all();
    sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), None)?;
    Ok(set)
}

/// Block every signal except `allowed`, returning the blocked set.
pub fn block_all_except(allowed: &[Signal]) -> Result<SigSet> {
    let mut set = SigSet::all();
    for sig in allowed {
        set.remove(*sig);
    }
    sigprocmask(SigmaskHow::SIG_SETMASK, Some(&set), None)?;
    Ok(set)
}

/// Unblock every signal.
///
/// Safe to call between fork and exec.
pub fn unblock_all() -> nix::Result<()> {
    sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&SigSet::all()), None)
}

/// Human readable name of a signal number, including real-time signals.
pub fn signal_name(sig: c_int) -> String {
    match Signal::try_from(sig) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) if sig >= libc::SIGRTMIN() => format!("SIGRTMIN+{}", sig - libc::SIGRTMIN()),
        Err(_) => format!("signal {}", sig),
    }
}

/// Wait for the next signal of `set`.
///
/// With a timeout, returns `None` once it expires.
pub fn wait_for(set: &SigSet, timeout: Option<Duration>) -> Result<Option<c_int>> {
    loop {
        let ret = match timeout {
            None => {
                let mut sig: c_int = 0;
                let rc = unsafe { libc::sigwait(set.as_ref(), &mut sig) };
                if rc != 0 {
                    return Err(Errno::from_i32(rc).into());
                }
                sig
            }
            Some(timeout) => {
                let ts = libc::timespec {
                    tv_sec: timeout.as_secs() as libc::time_t,
                    tv_nsec: timeout.subsec_nanos() as libc::c_long,
                };
                unsafe { libc::sigtimedwait(set.as_ref(), std::ptr::null_mut(), &ts) }
            }
        };

        if ret >= 0 {
            return Ok(Some(ret));
        }

        match Errno::last() {
            Errno::EAGAIN => return Ok(None),
            Errno::EINTR => continue,
            e => return Err(e.into()),
        }
    }
}

type Handler<'a> = Box<dyn Fn() + 'a>;

/// Maps signal numbers to zero-argument handlers.
pub struct SignalRouter<'a> {
    /// Signals waited on
    set: SigSet,
    /// Handler per signal number
    handlers: HashMap<c_int, Handler<'a>>,
}

impl<'a> SignalRouter<'a> {
    /// Create a router waiting on `set`.
    pub fn new(set: SigSet) -> Self {
        Self {
            set,
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for `sig`, replacing any previous one.
    pub fn on(&mut self, sig: c_int, handler: impl Fn() + 'a) -> &mut Self {
        self.handlers.insert(sig, Box::new(handler));
        self
    }

    /// Whether a handler is registered for `sig`.
    pub fn handles(&self, sig: c_int) -> bool {
        self.handlers.contains_key(&sig)
    }

    /// The set of signals this router waits on.
    pub fn set(&self) -> &SigSet {
        &self.set
    }

    /// Run the handler registered for `sig`.
    ///
    /// Returns false, doing nothing, for unknown signals.
    pub fn dispatch(&self, sig: c_int) -> bool {
        match self.handlers.get(&sig) {
            Some(handler) => {
                debug!(signal = %signal_name(sig), "Dispatching signal");
                handler();
                true
            }
            None => {
                debug!(signal = %signal_name(sig), "Ignoring unhandled signal");
                false
            }
        }
    }

    /// Block until the next pending signal arrives.
    pub fn wait(&self) -> Result<c_int> {
        loop {
            if let Some(sig) = wait_for(&self.set, None)? {
                return Ok(sig);
            }
        }
    }

    /// Wait for the next signal and dispatch it.
    pub fn wait_and_dispatch(&self) -> Result<c_int> {
        let sig = self.wait()?;
        self.dispatch(sig);
        Ok(sig)
    }
}
