//! Narrow interfaces to the OS primitives the lifecycle and drop sequences use.
//!
//! The real implementations live in `sys::unix`; tests swap in recording stubs.

use crate::config::ServiceConfig;
use crate::error::{BestEffort, DaemonError, DaemonResult};
use std::path::Path;
use std::sync::Arc;

/// Lookup into the system user database.
pub trait IdentityDatabase: Send + Sync {
    /// Primary GID of the given UID.
    fn primary_gid(&self, uid: u32) -> DaemonResult<u32>;
}

/// Result of the combined chroot + setgid + setuid transition.
#[derive(Debug)]
pub enum PrivilegeTransition {
    Success,
    /// setgroups/setgid/setuid failed. Always fatal.
    IdentityError(DaemonError),
    /// The identity switch went through but the chroot did not.
    ChrootError(DaemonError),
}

/// Process topology and identity primitives.
pub trait DaemonManager: Send + Sync {
    /// Mandatory setup before any other call.
    fn init(&self) -> DaemonResult<()>;
    /// Returns `true` in the parent, `false` in the child.
    fn fork(&self) -> DaemonResult<bool>;
    /// Detach from the controlling terminal and session.
    fn daemonize(&self) -> DaemonResult<()>;
    /// True when running as UID 0 or holding any capability.
    fn is_root(&self) -> bool;
    /// chroot (unless `chroot` is `/`), then setgid, then setuid.
    fn drop_privileges(&self, uid: u32, gid: u32, chroot: &Path) -> PrivilegeTransition;
}

pub trait CapabilityBackend: Send + Sync {
    /// Clear every capability set the process can still lower.
    fn clear_capabilities(&self) -> DaemonResult<()>;
    /// Stop setuid-root binaries from granting privilege back. Advisory only.
    fn harden_against_reacquisition(&self) -> BestEffort;
}

/// Status channel to an external process supervisor.
pub trait SupervisorNotifier: Send + Sync {
    /// Send free-form status text. Fails when no supervisor is listening.
    fn notify(&self, status: &str) -> BestEffort;
    /// Announce that startup finished.
    fn ready(&self) -> BestEffort;
}

/// The collaborators a service is wired to.
#[derive(Clone)]
pub struct Backends {
    pub identity: Arc<dyn IdentityDatabase>,
    pub daemon: Arc<dyn DaemonManager>,
    pub capabilities: Arc<dyn CapabilityBackend>,
    pub notifier: Arc<dyn SupervisorNotifier>,
}

impl Backends {
    /// The real Unix implementations.
    pub fn system(config: &ServiceConfig) -> Self {
        use crate::sys::unix;
        Backends {
            identity: Arc::new(unix::SystemIdentityDatabase),
            daemon: Arc::new(unix::UnixDaemonManager::new(config)),
            capabilities: Arc::new(crate::sys::caps::SystemCapabilities),
            notifier: Arc::new(crate::sys::notify::SystemdNotifier),
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}
