//! Recording stubs for the collaborator traits.

use crate::backend::{
    Backends, CapabilityBackend, DaemonManager, IdentityDatabase, PrivilegeTransition,
    SupervisorNotifier,
};
use crate::error::{BestEffort, DaemonError, DaemonResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[derive(Default)]
pub struct StubIdentity {
    pub primary: HashMap<u32, u32>,
}

impl StubIdentity {
    pub fn with(uid: u32, gid: u32) -> Self {
        let mut primary = HashMap::new();
        primary.insert(uid, gid);
        StubIdentity { primary }
    }
}

impl IdentityDatabase for StubIdentity {
    fn primary_gid(&self, uid: u32) -> DaemonResult<u32> {
        self.primary
            .get(&uid)
            .copied()
            .ok_or_else(|| DaemonError::IdentityLookup(format!("no user with UID {}", uid)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Success,
    IdentityFails,
    ChrootFails,
}

pub struct StubDaemon {
    pub log: CallLog,
    pub fork_is_parent: bool,
    pub fail_fork: bool,
    pub fail_init: bool,
    pub fail_daemonize: bool,
    pub transition: Transition,
    /// Root-equivalence survives a successful transition.
    pub stays_root: bool,
    pub root: AtomicBool,
}

impl StubDaemon {
    pub fn new(log: CallLog) -> Self {
        StubDaemon {
            log,
            fork_is_parent: false,
            fail_fork: false,
            fail_init: false,
            fail_daemonize: false,
            transition: Transition::Success,
            stays_root: false,
            root: AtomicBool::new(true),
        }
    }
}

impl DaemonManager for StubDaemon {
    fn init(&self) -> DaemonResult<()> {
        self.log.push("init");
        if self.fail_init {
            return Err(DaemonError::SyscallError { call: "init", errno: 1 });
        }
        Ok(())
    }

    fn fork(&self) -> DaemonResult<bool> {
        self.log.push("fork");
        if self.fail_fork {
            return Err(DaemonError::SyscallError { call: "fork", errno: 11 });
        }
        Ok(self.fork_is_parent)
    }

    fn daemonize(&self) -> DaemonResult<()> {
        self.log.push("daemonize");
        if self.fail_daemonize {
            return Err(DaemonError::SyscallError { call: "setsid", errno: 1 });
        }
        Ok(())
    }

    fn is_root(&self) -> bool {
        self.log.push("is_root");
        self.root.load(Ordering::SeqCst)
    }

    fn drop_privileges(&self, uid: u32, gid: u32, chroot: &Path) -> PrivilegeTransition {
        self.log.push(format!("drop {} {} {}", uid, gid, chroot.display()));
        match self.transition {
            Transition::IdentityFails => {
                PrivilegeTransition::IdentityError(DaemonError::IdentityTransition("setuid".into()))
            }
            outcome => {
                if !self.stays_root {
                    self.root.store(false, Ordering::SeqCst);
                }
                if outcome == Transition::ChrootFails {
                    PrivilegeTransition::ChrootError(DaemonError::Chroot("ENOENT".into()))
                } else {
                    PrivilegeTransition::Success
                }
            }
        }
    }
}

pub struct StubCaps {
    pub log: CallLog,
    pub fail_clear: bool,
}

impl CapabilityBackend for StubCaps {
    fn clear_capabilities(&self) -> DaemonResult<()> {
        self.log.push("clear_caps");
        if self.fail_clear {
            return Err(DaemonError::Capability("EPERM".into()));
        }
        Ok(())
    }

    fn harden_against_reacquisition(&self) -> BestEffort {
        self.log.push("harden");
        BestEffort::failed(DaemonError::SyscallError { call: "prctl", errno: 1 })
    }
}

pub struct StubNotifier {
    pub log: CallLog,
    pub supervised: bool,
}

impl SupervisorNotifier for StubNotifier {
    fn notify(&self, status: &str) -> BestEffort {
        self.log.push(format!("notify {:?}", status));
        if self.supervised {
            BestEffort::ok()
        } else {
            BestEffort::failed(DaemonError::Io(std::io::ErrorKind::NotConnected.into()))
        }
    }

    fn ready(&self) -> BestEffort {
        self.log.push("ready");
        BestEffort::ok()
    }
}

/// Builder for a full set of stubs sharing one call log.
pub struct Harness {
    pub log: CallLog,
    pub identity: StubIdentity,
    pub daemon: StubDaemon,
    pub fail_clear_caps: bool,
    pub supervised: bool,
}

impl Harness {
    pub fn new() -> Self {
        let log = CallLog::default();
        Harness {
            identity: StubIdentity::with(1000, 1000),
            daemon: StubDaemon::new(log.clone()),
            log,
            fail_clear_caps: false,
            supervised: false,
        }
    }

    pub fn backends(self) -> (Backends, CallLog) {
        let log = self.log.clone();
        let backends = Backends {
            identity: Arc::new(self.identity),
            daemon: Arc::new(self.daemon),
            capabilities: Arc::new(StubCaps { log: log.clone(), fail_clear: self.fail_clear_caps }),
            notifier: Arc::new(StubNotifier { log: log.clone(), supervised: self.supervised }),
        };
        (backends, log)
    }
}
