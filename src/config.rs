//! Service configuration.
//!
//! `ServiceConfig` carries the operator-facing options (`uid`, `gid`, `daemon`,
//! `chroot`, `pidfile`, `fork` and stream redirection). `ServicePolicy` carries
//! what the service itself declares about how it may run. Both are built once
//! at startup and shared read-only by the lifecycle controller and the
//! privilege-drop sequencer.

use crate::error::{DaemonError, DaemonResult};
use crate::stdio::Stdio;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// A path the platform guarantees is an empty directory, suitable as the
/// default chroot for services that stop touching the filesystem once started.
pub const EMPTY_CHROOT_PATH: &str = "/var/empty";

/// How the process topology is arranged before the service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Foreground,
    Daemon,
    /// Fork, let the parent exit, then daemonize the child.
    ForkDaemon,
}

impl RunMode {
    pub fn from_flags(daemon: bool, fork: bool) -> Self {
        match (daemon, fork) {
            (_, true) => RunMode::ForkDaemon,
            (true, false) => RunMode::Daemon,
            (false, false) => RunMode::Foreground,
        }
    }

    pub fn forks(self) -> bool {
        self == RunMode::ForkDaemon
    }

    pub fn daemonizes(self) -> bool {
        self != RunMode::Foreground
    }
}

/// Operator-facing options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// UID to run as; empty means don't drop privileges.
    pub uid: String,
    /// GID to run as; empty means the primary group of `uid`.
    pub gid: String,
    /// Detach from the terminal (doesn't fork).
    pub daemon: bool,
    /// Chroot directory; empty selects the service default, `/` disables.
    pub chroot: String,
    /// PID file to write and hold a write lock on.
    pub pidfile: Option<PathBuf>,
    /// Fork before daemonizing (implies `daemon`).
    pub fork: bool,
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
    pub umask: Option<u32>,
    pub working_directory: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            uid: String::new(),
            gid: String::new(),
            daemon: false,
            chroot: String::new(),
            pidfile: None,
            fork: false,
            stdin: Stdio::devnull(),
            stdout: Stdio::devnull(),
            stderr: Stdio::devnull(),
            umask: Some(0o027),
            working_directory: PathBuf::from("/"),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(text: &str) -> DaemonResult<Self> {
        let config: ServiceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn run_mode(&self) -> RunMode {
        RunMode::from_flags(self.daemon, self.fork)
    }

    /// The configured PID file, treating an empty path as disabled.
    pub fn pid_file_path(&self) -> Option<&Path> {
        self.pidfile
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// True when the operator asked for a chroot other than the service default
    /// and other than the `/` sentinel.
    pub fn explicit_chroot(&self) -> bool {
        !self.chroot.is_empty() && self.chroot != "/"
    }

    /// Checks option combinations that are contradictory regardless of the
    /// system state. Runs before anything privileged is attempted.
    pub fn validate(&self) -> DaemonResult<()> {
        if self.uid.is_empty() && !self.gid.is_empty() {
            return Err(DaemonError::Configuration(
                "GID without UID is not a valid partial specification".into(),
            ));
        }
        if self.uid.is_empty() && self.explicit_chroot() {
            return Err(DaemonError::Configuration(
                "Must use privilege dropping to use chroot; set uid".into(),
            ));
        }
        if let Some(pid) = self.pid_file_path() {
            // Daemonizing changes directory before the PID file is opened.
            if pid.is_relative() {
                return Err(DaemonError::Configuration(format!(
                    "PID file path must be absolute: {}",
                    pid.display()
                )));
            }
            if pid.parent().map(|p| !p.exists()).unwrap_or(false) {
                return Err(DaemonError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "PID file directory does not exist",
                )));
            }
        }
        Ok(())
    }
}

/// What the service declares about the privileges it runs with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServicePolicy {
    /// Permit the service to keep running as root after the drop sequence.
    pub allow_root: bool,
    /// Skip the attempt to lock out setuid-root re-escalation.
    pub no_ban_suid: bool,
    /// Chroot applied when the operator doesn't pick one; empty means `/`.
    pub default_chroot: PathBuf,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        ServicePolicy {
            allow_root: false,
            no_ban_suid: false,
            default_chroot: PathBuf::from(EMPTY_CHROOT_PATH),
        }
    }
}

impl ServicePolicy {
    /// The chroot to apply: the operator's choice if given, else the service default.
    pub fn chroot_target(&self, config: &ServiceConfig) -> PathBuf {
        if !config.chroot.is_empty() {
            return PathBuf::from(&config.chroot);
        }
        if self.default_chroot.as_os_str().is_empty() {
            PathBuf::from("/")
        } else {
            self.default_chroot.clone()
        }
    }
}

/// Load and validate a `ServiceConfig` from a TOML file.
pub fn load_config(path: &Path) -> DaemonResult<ServiceConfig> {
    let content = fs::read_to_string(path)?;
    ServiceConfig::from_toml_str(&content)
}
