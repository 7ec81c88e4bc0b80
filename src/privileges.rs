//! Privilege-drop sequencing.
//!
//! The steps run in a fixed order, each gating the next:
//!
//! ```text
//! resolve identity → validate chroot request → harden (best effort)
//!     → chroot + setgid + setuid → clear capabilities → root check
//! ```
//!
//! The chroot has to happen while the process is still privileged, and the
//! capability clear has to see the final identity. The root check re-reads
//! live process state instead of trusting the steps before it.

use crate::backend::{Backends, PrivilegeTransition};
use crate::config::{ServiceConfig, ServicePolicy};
use crate::error::{DaemonError, DaemonResult};
use crate::identity::ServiceIdentity;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// One-shot token guarding the drop sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropState {
    NotDropped,
    Dropped,
}

pub struct PrivilegeDropper {
    config: Arc<ServiceConfig>,
    policy: Arc<ServicePolicy>,
    backends: Backends,
    state: Mutex<DropState>,
}

impl PrivilegeDropper {
    pub fn new(config: Arc<ServiceConfig>, policy: Arc<ServicePolicy>, backends: Backends) -> Self {
        PrivilegeDropper {
            config,
            policy,
            backends,
            state: Mutex::new(DropState::NotDropped),
        }
    }

    pub fn state(&self) -> DropState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops to the configured identity and clears capabilities.
    ///
    /// Runs at most once per process; later calls return `Ok(())` without
    /// touching anything. A failed attempt leaves the token unset.
    pub fn drop_privileges(&self) -> DaemonResult<()> {
        // Held for the whole sequence: the steps are not atomic.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == DropState::Dropped {
            debug!("privileges already dropped");
            return Ok(());
        }

        let config = &*self.config;
        let identity =
            ServiceIdentity::resolve(&config.uid, &config.gid, self.backends.identity.as_ref())?;
        let chroot = self.policy.chroot_target(config);
        let explicit_chroot = config.explicit_chroot();

        if identity.target().is_none() && explicit_chroot {
            return Err(DaemonError::Configuration(
                "Must use privilege dropping to use chroot; set uid".into(),
            ));
        }

        // Hardening waits for the checks above so bad options fail before anything privileged runs.
        if !self.policy.no_ban_suid {
            self.backends
                .capabilities
                .harden_against_reacquisition()
                .ignore("ban setuid re-escalation");
        }

        if let Some((uid, gid)) = identity.target() {
            match self.backends.daemon.drop_privileges(uid, gid, &chroot) {
                PrivilegeTransition::Success => {
                    info!(uid, gid, chroot = %chroot.display(), "dropped privileges");
                }
                PrivilegeTransition::IdentityError(err) => return Err(err),
                PrivilegeTransition::ChrootError(err) if explicit_chroot => return Err(err),
                PrivilegeTransition::ChrootError(err) => {
                    // TODO: expose a policy flag to make the default chroot mandatory.
                    warn!(
                        uid,
                        gid,
                        chroot = %chroot.display(),
                        error = %err,
                        "dropped privileges without the default chroot"
                    );
                }
            }
        }

        self.backends.capabilities.clear_capabilities()?;

        if !self.policy.allow_root && self.backends.daemon.is_root() {
            return Err(DaemonError::PolicyViolation(
                "Daemon must not run as root or with capabilities; run as non-root user or set uid"
                    .into(),
            ));
        }

        *state = DropState::Dropped;
        Ok(())
    }
}
