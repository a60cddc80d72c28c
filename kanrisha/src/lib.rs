//! kanrisha - service manager for the ichirou init system.
//!
//! The daemon supervises a flat set of services laid out on disk:
//!
//! - `available/<name>/run` is the entry point of a service
//! - `available/<name>/log` receives its standard output
//! - `enabled/<name>` links to the services started at boot
//!
//! Crashed services are restarted up to a configurable cap. Clients talk
//! to the daemon over a local command channel.
//!
//! # Architecture
//!
//! - **Supervisor**: start, stop and restart semantics over the registry
//! - **ServiceRegistry**: the services currently running
//! - **Reaper**: collects dead children and reports their exit status
//! - **ChannelServer / ChannelClient**: the command channel
//! - **Daemon**: ties the pieces together and serves requests
//!
//! The process, signal and reaper modules are shared with the `ichirou`
//! init process.
//!
//! # Example
//!
//! ```no_run
//! use kanrisha::channel::{ChannelClient, Request};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ChannelClient::new("/tmp/kanrisha.cmd.sock");
//!     let response = client.send(&Request::ListRunning).await?;
//!     print!("{}", response.body);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod daemon;
pub mod error;
pub mod layout;
pub mod process;
pub mod reaper;
pub mod registry;
pub mod service;
pub mod signals;
pub mod supervisor;

// Re-export main types
pub use channel::{ChannelClient, ChannelServer, CommandCode, Request, Response};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use layout::ServiceLayout;
pub use reaper::{ExitStatus, Reaper};
pub use registry::ServiceRegistry;
pub use service::{Service, ServiceState, ServiceStatus};
pub use signals::SignalRouter;
pub use supervisor::{BatchReport, Supervisor};
