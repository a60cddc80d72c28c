//! Error types for the kanrisha service manager.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for service manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising services.
#[derive(Error, Debug)]
pub enum Error {
    /// Service is already in the registry
    #[error("{0} is already running")]
    AlreadyRunning(String),

    /// Service is not in the registry
    #[error("{0} isn't running")]
    NotRunning(String),

    /// No such service in the available directory
    #[error("{0} doesn't exist")]
    NotFound(String),

    /// Enabled symlink already present
    #[error("{0} is already enabled")]
    AlreadyEnabled(String),

    /// Enabled symlink already absent
    #[error("{0} is already disabled")]
    AlreadyDisabled(String),

    /// Missing permissions on an entry point, log file, link or process
    #[error("missing permissions: {0}")]
    PermissionDenied(String),

    /// The process exited before it could be signaled
    #[error("process {0} has already exited")]
    ProcessVanished(u32),

    /// The entry point could not be executed
    #[error("failed to spawn {name}: {reason}")]
    SpawnFailure { name: String, reason: String },

    /// The system ran out of processes or memory
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// Malformed or unrecognized command on the channel
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Service name that cannot map onto the service directory
    #[error("invalid service name: {0:?}")]
    InvalidName(String),

    /// The command channel could not be reached
    #[error("cannot reach the service manager at {path}: {reason}. Is the daemon running?")]
    DaemonUnavailable { path: PathBuf, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ichirou_config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Nix error
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Whether the daemon must stop trusting its own state.
    ///
    /// Running out of processes or memory leaves the registry in an
    /// unknown state, so the daemon terminates instead of degrading.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ResourceExhaustion(_))
    }

    /// Map an IO error raised while touching `subject`.
    pub(crate) fn from_io(subject: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(subject.to_string()),
            std::io::ErrorKind::OutOfMemory => Error::ResourceExhaustion(err.to_string()),
            _ => match err.raw_os_error() {
                Some(libc::ENOMEM) | Some(libc::EAGAIN) => {
                    Error::ResourceExhaustion(err.to_string())
                }
                Some(libc::EPERM) => Error::PermissionDenied(subject.to_string()),
                _ => Error::Io(err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_only_exhaustion_is_fatal() {
        assert!(Error::ResourceExhaustion("fork".to_string()).is_fatal());
        assert!(!Error::NotRunning("web".to_string()).is_fatal());
        assert!(!Error::ProcessVanished(42).is_fatal());
    }

    #[test]
    fn test_from_io_classification() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(
            Error::from_io("web/log", denied),
            Error::PermissionDenied(s) if s == "web/log"
        ));

        let eagain = io::Error::from_raw_os_error(libc::EAGAIN);
        assert!(Error::from_io("fork", eagain).is_fatal());

        let missing = io::Error::from(io::ErrorKind::NotFound);
        assert!(matches!(Error::from_io("web", missing), Error::Io(_)));
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::AlreadyRunning("web".to_string()).to_string(),
            "web is already running"
        );
        assert_eq!(
            Error::NotRunning("web".to_string()).to_string(),
            "web isn't running"
        );
    }
}
