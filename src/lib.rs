//! # ServiceForge
//!
//! **ServiceForge** takes a Unix service from "started with full privileges" to
//! "running detached, supervised and with the least privilege it needs".
//!
//! Startup runs as a fixed sequence: optional fork, daemon-manager init,
//! supervisor notification, daemonization, PID-file lock, then the service
//! entry point. From inside the entry point the service calls
//! [`ServiceContext::drop_privileges`] once, before it touches untrusted input:
//! chroot, setgid/setuid, capability clearing and a final check that the
//! process is no longer root-equivalent.
//!
//! ```no_run
//! use service_forge::ForgeService;
//!
//! fn main() -> Result<(), service_forge::DaemonError> {
//!     ForgeService::new()
//!         .name("echo")
//!         .uid("1000")
//!         .pid_file("/run/echo.pid")
//!         .fork(true)
//!         .start(|ctx| {
//!             // bind privileged sockets here
//!             ctx.drop_privileges()?;
//!             while !ctx.should_stop() {
//!                 std::thread::sleep(std::time::Duration::from_secs(1));
//!             }
//!             Ok(())
//!         })
//! }
//! ```

#[cfg(not(unix))]
compile_error!("service_forge only supports Unix targets");

mod backend;
mod config;
mod error;
mod identity;
mod pidfile;
mod privileges;
mod service;
mod stdio;
mod sys;

#[cfg(test)]
mod testing;

// Re-export public types to keeping the API flat
pub use backend::{
    Backends, CapabilityBackend, DaemonManager, IdentityDatabase, PrivilegeTransition,
    SupervisorNotifier,
};
pub use config::{load_config, RunMode, ServiceConfig, ServicePolicy, EMPTY_CHROOT_PATH};
pub use error::{BestEffort, DaemonError, DaemonResult, LockError};
pub use identity::{parse_gid, parse_uid, ServiceIdentity};
pub use pidfile::PidFileGuard;
pub use privileges::{DropState, PrivilegeDropper};
pub use service::{ForgeService, ServiceContext};
pub use stdio::Stdio;
pub use sys::caps::SystemCapabilities;
pub use sys::notify::SystemdNotifier;
pub use sys::unix::{SystemIdentityDatabase, UnixDaemonManager};
