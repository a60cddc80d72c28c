//! ichirou - a small PID 1 init process.
//!
//! The init process boots the system by running the `rc.init` script,
//! launches the kanrisha service manager and runs `rc.postinit`. It then
//! waits for signals: child terminations are reaped, and the shutdown
//! signals walk the machine to poweroff, reboot, halt or hibernate.
//!
//! # Example
//!
//! ```no_run
//! use ichirou::Init;
//! use ichirou_config::InitConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let init = Init::new(InitConfig::default())?;
//!     init.run()?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod init;
pub mod shutdown;

pub use error::{Error, Result};
pub use init::{action_for, signal_table, Action, Init};
pub use shutdown::{ForceLevel, Machine, ShutdownSequencer, ShutdownState, ShutdownType};
