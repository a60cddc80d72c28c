//! Error types for the ichirou init process.

use thiserror::Error;

/// Result type alias for init operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the init process.
#[derive(Error, Debug)]
pub enum Error {
    /// Not running as PID 1
    #[error("must be run with PID 1 (running as PID {0})")]
    NotPid1(u32),

    /// A boot or shutdown command could not be run
    #[error("failed to run {command}: {reason}")]
    Command { command: String, reason: String },

    /// Process or signal error from the shared supervision code
    #[error(transparent)]
    Supervisor(#[from] kanrisha::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ichirou_config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Nix error
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}
