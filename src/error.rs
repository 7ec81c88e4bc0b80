use std::fmt;
use std::io;

/// Failure to take the exclusive PID-file lock.
///
/// Kept apart from generic I/O so operators can tell "second instance"
/// from "disk error".
#[derive(Debug)]
pub enum LockError {
    /// Another live process holds the lock on the PID file.
    AlreadyRunning,
    /// The PID file could not be opened, locked or written.
    Io(io::Error),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockError::AlreadyRunning => write!(f, "Service is already running (PID file locked)"),
            LockError::Io(err) => write!(f, "PID file error: {}", err),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LockError::Io(err) => Some(err),
            LockError::AlreadyRunning => None,
        }
    }
}

/// Custom error type for ServiceForge.
/// Every variant is fatal to the startup sequence; best-effort failures
/// never surface as a `DaemonError`.
#[derive(Debug)]
pub enum DaemonError {
    /// Malformed or contradictory options, detected before any privileged action.
    Configuration(String),
    /// The identity database could not resolve the requested UID.
    IdentityLookup(String),
    /// A UID or GID was not a valid numeric identity.
    Parse(String),
    /// setgroups/setgid/setuid failed.
    IdentityTransition(String),
    /// chroot into an explicitly requested directory failed.
    Chroot(String),
    /// Retained capabilities could not be cleared.
    Capability(String),
    /// The process is still root-equivalent after the drop sequence.
    PolicyViolation(String),
    /// The PID file could not be acquired.
    Lock(LockError),
    /// The configuration file could not be parsed.
    Config(toml::de::Error),
    /// Standard IO errors (file creation, redirection, etc.)
    Io(io::Error),
    /// Specific system call failure (fork, setsid).
    SyscallError { call: &'static str, errno: i32 },
}

impl DaemonError {
    pub(crate) fn last_syscall(call: &'static str) -> Self {
        DaemonError::SyscallError {
            call,
            errno: io::Error::last_os_error().raw_os_error().unwrap_or(0),
        }
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonError::Configuration(msg) => write!(f, "Configuration Error: {}", msg),
            DaemonError::IdentityLookup(msg) => write!(f, "Identity Lookup Error: {}", msg),
            DaemonError::Parse(msg) => write!(f, "Parse Error: {}", msg),
            DaemonError::IdentityTransition(msg) => write!(f, "Failed to drop privileges: {}", msg),
            DaemonError::Chroot(msg) => write!(f, "Failed to chroot: {}", msg),
            DaemonError::Capability(msg) => write!(f, "Cannot drop capabilities: {}", msg),
            DaemonError::PolicyViolation(msg) => write!(f, "Policy Violation: {}", msg),
            DaemonError::Lock(err) => write!(f, "{}", err),
            DaemonError::Config(err) => write!(f, "Config Parse Error: {}", err),
            DaemonError::Io(err) => write!(f, "IO Error: {}", err),
            DaemonError::SyscallError { call, errno } => {
                write!(f, "Syscall '{}' failed with errno {}", call, errno)
            }
        }
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DaemonError::Io(err) => Some(err),
            DaemonError::Lock(err) => Some(err),
            DaemonError::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for DaemonError {
    fn from(err: io::Error) -> Self {
        DaemonError::Io(err)
    }
}

impl From<LockError> for DaemonError {
    fn from(err: LockError) -> Self {
        DaemonError::Lock(err)
    }
}

impl From<toml::de::Error> for DaemonError {
    fn from(err: toml::de::Error) -> Self {
        DaemonError::Config(err)
    }
}

/// A specialized Result type for ServiceForge operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Outcome of an advisory operation whose failure must never abort startup.
///
/// Returned instead of a bare `()` so call sites visibly discard it with
/// [`BestEffort::ignore`].
#[derive(Debug)]
#[must_use = "best-effort results are discarded explicitly with `ignore()`"]
pub struct BestEffort(Result<(), DaemonError>);

impl BestEffort {
    pub fn ok() -> Self {
        BestEffort(Ok(()))
    }

    pub fn failed(err: DaemonError) -> Self {
        BestEffort(Err(err))
    }

    pub fn succeeded(&self) -> bool {
        self.0.is_ok()
    }

    /// Discards the outcome, logging a failure at debug level.
    pub fn ignore(self, what: &str) {
        if let Err(err) = self.0 {
            tracing::debug!(operation = what, error = %err, "best-effort operation failed");
        }
    }
}

impl From<Result<(), DaemonError>> for BestEffort {
    fn from(res: Result<(), DaemonError>) -> Self {
        BestEffort(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_error_keeps_io_source() {
        let err = DaemonError::from(LockError::Io(io::Error::new(io::ErrorKind::Other, "disk")));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "PID file error: disk");
    }

    #[test]
    fn already_running_is_distinct() {
        let err = DaemonError::from(LockError::AlreadyRunning);
        assert!(matches!(err, DaemonError::Lock(LockError::AlreadyRunning)));
    }

    #[test]
    fn best_effort_reports_outcome() {
        assert!(BestEffort::ok().succeeded());
        let failed = BestEffort::failed(DaemonError::Configuration("x".into()));
        assert!(!failed.succeeded());
        failed.ignore("test");
    }
}
