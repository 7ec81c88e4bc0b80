use crate::backend::CapabilityBackend;
use crate::error::{BestEffort, DaemonError, DaemonResult};

/// Capability sets of the running process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCapabilities;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use ::caps::CapSet;

    // linux/securebits.h
    const SECBIT_NOROOT: libc::c_ulong = 1 << 0;
    const SECBIT_NOROOT_LOCKED: libc::c_ulong = 1 << 1;

    fn cap_err(set: CapSet, err: ::caps::errors::CapsError) -> DaemonError {
        DaemonError::Capability(format!("clearing {:?} set: {}", set, err))
    }

    impl CapabilityBackend for SystemCapabilities {
        fn clear_capabilities(&self) -> DaemonResult<()> {
            if ::caps::runtime::ambient_set_supported().is_ok() {
                ::caps::clear(None, CapSet::Ambient).map_err(|e| cap_err(CapSet::Ambient, e))?;
            }
            // Needs CAP_SETPCAP, which an unprivileged caller never has.
            if let Err(err) = ::caps::clear(None, CapSet::Bounding) {
                tracing::debug!(error = %err, "bounding set left untouched");
            }
            for set in [CapSet::Inheritable, CapSet::Effective, CapSet::Permitted] {
                ::caps::clear(None, set).map_err(|e| cap_err(set, e))?;
            }
            Ok(())
        }

        fn harden_against_reacquisition(&self) -> BestEffort {
            let bits = SECBIT_NOROOT | SECBIT_NOROOT_LOCKED;
            if unsafe { libc::prctl(libc::PR_SET_SECUREBITS, bits, 0, 0, 0) } < 0 {
                return BestEffort::failed(DaemonError::last_syscall("prctl"));
            }
            BestEffort::ok()
        }
    }

    /// Unreadable capability state counts as privileged.
    pub(crate) fn has_capabilities() -> bool {
        ::caps::read(None, CapSet::Permitted)
            .map(|set| !set.is_empty())
            .unwrap_or(true)
    }
}

#[cfg(target_os = "linux")]
pub(crate) use linux::has_capabilities;

#[cfg(not(target_os = "linux"))]
impl CapabilityBackend for SystemCapabilities {
    fn clear_capabilities(&self) -> DaemonResult<()> {
        Ok(())
    }

    fn harden_against_reacquisition(&self) -> BestEffort {
        BestEffort::failed(DaemonError::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "securebits are Linux-only",
        )))
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn has_capabilities() -> bool {
    false
}
