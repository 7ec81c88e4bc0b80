use crate::backend::{Backends, SupervisorNotifier};
use crate::config::{RunMode, ServiceConfig, ServicePolicy};
use crate::error::{BestEffort, DaemonResult};
use crate::pidfile::PidFileGuard;
use crate::privileges::{DropState, PrivilegeDropper};
use crate::stdio::Stdio;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::SigId;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Main constructor to configure and launch a service.
///
/// Collects the operator options (`ServiceConfig`), the service's own
/// privilege policy (`ServicePolicy`) and, optionally, the OS backends. Nothing
/// happens until [`ForgeService::start`].
pub struct ForgeService {
    name: Option<String>,
    config: ServiceConfig,
    policy: ServicePolicy,
    backends: Option<Backends>,
}

impl fmt::Debug for ForgeService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForgeService")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("backends", &if self.backends.is_some() { "Custom" } else { "System" })
            .finish()
    }
}

impl Default for ForgeService {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether this process should carry on after the fork step.
#[derive(Debug)]
pub(crate) enum Launch<T> {
    /// The original process after a successful fork; it must exit 0.
    ParentExit,
    Ran(T),
}

impl ForgeService {
    /// Creates a new default configuration.
    ///
    /// # Defaults
    /// - Foreground, no identity change, no PID file
    /// - Default chroot: `/var/empty`
    /// - Stdio after daemonizing: `/dev/null`
    /// - Umask: `0o027`
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    /// Starts from an already loaded configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        ForgeService {
            name: None,
            config,
            policy: ServicePolicy::default(),
            backends: None,
        }
    }

    // --- Public Getters ---

    /// Returns the service name if set.
    pub fn get_name(&self) -> Option<&str> { self.name.as_deref() }

    pub fn config(&self) -> &ServiceConfig { &self.config }

    pub fn policy(&self) -> &ServicePolicy { &self.policy }

    /// Returns the configured PID file path, if any.
    pub fn pid_file_path(&self) -> Option<&Path> { self.config.pid_file_path() }

    // --- Builder Methods ---

    /// Sets the name used in log output.
    pub fn name(mut self, name: &str) -> Self { self.name = Some(name.to_owned()); self }

    /// UID to run as once privileges are dropped.
    pub fn uid(mut self, uid: &str) -> Self { self.config.uid = uid.to_owned(); self }

    /// GID to run as; defaults to the primary group of the UID.
    pub fn gid(mut self, gid: &str) -> Self { self.config.gid = gid.to_owned(); self }

    /// Detach from the terminal without forking.
    pub fn daemon(mut self, daemon: bool) -> Self { self.config.daemon = daemon; self }

    /// Fork first, then daemonize the child.
    pub fn fork(mut self, fork: bool) -> Self { self.config.fork = fork; self }

    /// Chroot applied during the privilege drop; `"/"` disables it.
    pub fn chroot(mut self, path: &str) -> Self { self.config.chroot = path.to_owned(); self }

    /// Sets the path to the PID file.
    /// This file is used for locking to ensure only one instance runs.
    pub fn pid_file<P: Into<PathBuf>>(mut self, path: P) -> Self { self.config.pidfile = Some(path.into()); self }

    /// Sets the working directory entered when daemonizing.
    pub fn working_directory<P: Into<PathBuf>>(mut self, path: P) -> Self { self.config.working_directory = path.into(); self }

    /// Configures the standard input stream.
    pub fn stdin<S: Into<Stdio>>(mut self, stdio: S) -> Self { self.config.stdin = stdio.into(); self }

    /// Configures the standard output stream.
    pub fn stdout<S: Into<Stdio>>(mut self, stdio: S) -> Self { self.config.stdout = stdio.into(); self }

    /// Configures the standard error stream.
    pub fn stderr<S: Into<Stdio>>(mut self, stdio: S) -> Self { self.config.stderr = stdio.into(); self }

    /// Sets the umask applied at startup.
    pub fn umask(mut self, mask: u32) -> Self { self.config.umask = Some(mask); self }

    /// Lets the service keep running as root after the drop sequence.
    pub fn allow_root(mut self, allow: bool) -> Self { self.policy.allow_root = allow; self }

    /// Skips the setuid-root lockout attempt.
    pub fn no_ban_suid(mut self, skip: bool) -> Self { self.policy.no_ban_suid = skip; self }

    /// Chroot used when the operator doesn't choose one.
    pub fn default_chroot<P: Into<PathBuf>>(mut self, path: P) -> Self { self.policy.default_chroot = path.into(); self }

    pub fn policy_from(mut self, policy: ServicePolicy) -> Self { self.policy = policy; self }

    /// Replaces the OS backends, e.g. with test doubles.
    pub fn backends(mut self, backends: Backends) -> Self { self.backends = Some(backends); self }

    /// Validates configuration without starting the service.
    pub fn build(self) -> DaemonResult<Self> {
        self.config.validate()?;
        Ok(self)
    }

    /// Runs the startup sequence and hands control to `entry`.
    ///
    /// In fork mode the original process exits with status 0 here and never
    /// returns. The entry point's result becomes the result of this call; the
    /// PID file, if any, is released on every path out of it.
    pub fn start<T, F>(self, entry: F) -> DaemonResult<T>
    where
        F: FnOnce(&ServiceContext<'_>) -> DaemonResult<T>,
    {
        match self.launch(entry)? {
            Launch::ParentExit => exit(0),
            Launch::Ran(value) => Ok(value),
        }
    }

    pub(crate) fn launch<T, F>(self, entry: F) -> DaemonResult<Launch<T>>
    where
        F: FnOnce(&ServiceContext<'_>) -> DaemonResult<T>,
    {
        self.config.validate()?;

        let span = tracing::info_span!("service", name = self.name.as_deref().unwrap_or("-"));
        let _enter = span.enter();

        let backends = match self.backends {
            Some(backends) => backends,
            None => Backends::system(&self.config),
        };
        let config = Arc::new(self.config);
        let policy = Arc::new(self.policy);

        let mut run_mode = config.run_mode();
        if run_mode.forks() {
            if backends.daemon.fork()? {
                debug!("forked; parent exiting");
                return Ok(Launch::ParentExit);
            }
            run_mode = RunMode::Daemon;
        }

        backends.daemon.init()?;

        let under_supervisor = backends.notifier.notify("starting").succeeded();
        if under_supervisor {
            info!("running under a supervisor");
        }

        let daemonized = run_mode.daemonizes() || under_supervisor;
        if daemonized {
            backends.daemon.daemonize()?;
            info!(pid = std::process::id(), "daemonized");
        }

        let pid_file = match config.pid_file_path() {
            Some(path) => Some(PidFileGuard::acquire(path)?),
            None => None,
        };

        let stop = StopSignals::register()?;
        let dropper = PrivilegeDropper::new(Arc::clone(&config), policy, backends.clone());
        let ctx = ServiceContext {
            config: &config,
            dropper: &dropper,
            notifier: backends.notifier.as_ref(),
            stop: &stop.flag,
            run_mode,
            under_supervisor,
            daemonized,
        };

        let result = entry(&ctx);
        drop(stop);
        drop(pid_file);
        result.map(Launch::Ran)
    }
}

/// Termination flag set by SIGTERM/SIGINT while the entry point runs.
struct StopSignals {
    flag: Arc<AtomicBool>,
    ids: Vec<SigId>,
}

impl StopSignals {
    fn register() -> DaemonResult<Self> {
        let flag = Arc::new(AtomicBool::new(false));
        let mut ids = Vec::with_capacity(2);
        for signal in [SIGTERM, SIGINT] {
            ids.push(signal_hook::flag::register(signal, Arc::clone(&flag))?);
        }
        Ok(StopSignals { flag, ids })
    }
}

impl Drop for StopSignals {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

/// What the service body sees of the launcher.
pub struct ServiceContext<'a> {
    config: &'a ServiceConfig,
    dropper: &'a PrivilegeDropper,
    notifier: &'a dyn SupervisorNotifier,
    stop: &'a Arc<AtomicBool>,
    run_mode: RunMode,
    under_supervisor: bool,
    daemonized: bool,
}

impl fmt::Debug for ServiceContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("run_mode", &self.run_mode)
            .field("under_supervisor", &self.under_supervisor)
            .field("daemonized", &self.daemonized)
            .field("dropped", &self.privileges_dropped())
            .finish()
    }
}

impl ServiceContext<'_> {
    /// Drops to the configured identity. Call once, before handling untrusted
    /// input; repeated calls are no-ops.
    pub fn drop_privileges(&self) -> DaemonResult<()> {
        self.dropper.drop_privileges()
    }

    pub fn privileges_dropped(&self) -> bool {
        self.dropper.state() == DropState::Dropped
    }

    /// Pushes status text to the supervisor, if there is one.
    pub fn update_status(&self, status: &str) -> BestEffort {
        self.notifier.notify(status)
    }

    /// Tells the supervisor that startup is complete.
    pub fn ready(&self) -> BestEffort {
        self.notifier.ready()
    }

    /// True once SIGTERM or SIGINT has been received.
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Shared handle to the stop flag, for worker threads.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(self.stop)
    }

    /// Effective run mode; a forked child reports `Daemon`.
    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn under_supervisor(&self) -> bool {
        self.under_supervisor
    }

    pub fn daemonized(&self) -> bool {
        self.daemonized
    }

    pub fn config(&self) -> &ServiceConfig {
        self.config
    }
}
