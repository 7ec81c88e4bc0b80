use crate::backend::{DaemonManager, IdentityDatabase, PrivilegeTransition};
use crate::config::ServiceConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::stdio::Stdio;
use nix::unistd::{self, Gid, Uid, User};
use std::fs::OpenOptions;
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::path::{Path, PathBuf};

/// Primary-group lookups against the passwd database.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentityDatabase;

impl IdentityDatabase for SystemIdentityDatabase {
    fn primary_gid(&self, uid: u32) -> DaemonResult<u32> {
        match User::from_uid(Uid::from_raw(uid)) {
            Ok(Some(user)) => Ok(user.gid.as_raw()),
            Ok(None) => Err(DaemonError::IdentityLookup(format!("no user with UID {}", uid))),
            Err(errno) => Err(DaemonError::IdentityLookup(format!(
                "Unable to access the system user database: {}",
                errno
            ))),
        }
    }
}

/// Process topology and identity primitives on top of libc/nix.
#[derive(Debug, Clone)]
pub struct UnixDaemonManager {
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
    umask: Option<u32>,
    directory: PathBuf,
}

impl UnixDaemonManager {
    pub fn new(config: &ServiceConfig) -> Self {
        UnixDaemonManager {
            stdin: config.stdin.clone(),
            stdout: config.stdout.clone(),
            stderr: config.stderr.clone(),
            umask: config.umask,
            directory: config.working_directory.clone(),
        }
    }
}

impl DaemonManager for UnixDaemonManager {
    /// Fills any closed standard descriptor with `/dev/null`, so files opened
    /// later never land on 0-2, and applies the umask.
    fn init(&self) -> DaemonResult<()> {
        for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            if unsafe { libc::fcntl(fd, libc::F_GETFD) } >= 0 {
                continue;
            }
            let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
            if null.as_raw_fd() == fd {
                // The open itself filled the gap; keep it.
                let _ = null.into_raw_fd();
                continue;
            }
            if unsafe { libc::dup2(null.as_raw_fd(), fd) } < 0 {
                return Err(DaemonError::last_syscall("dup2"));
            }
        }

        if let Some(mask) = self.umask {
            unsafe { libc::umask(mask as libc::mode_t) };
        }
        Ok(())
    }

    fn fork(&self) -> DaemonResult<bool> {
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(DaemonError::last_syscall("fork"));
        }
        Ok(pid > 0)
    }

    fn daemonize(&self) -> DaemonResult<()> {
        // A group leader can't setsid(2): either a supervisor already made us a
        // session leader, or a shell started us as a foreground job without forking.
        if unsafe { libc::getpgrp() == libc::getpid() } {
            tracing::debug!("process group leader; keeping the current session");
        } else if unsafe { libc::setsid() } < 0 {
            return Err(DaemonError::last_syscall("setsid"));
        }

        std::env::set_current_dir(&self.directory)?;

        redirect_stream(&self.stdin, libc::STDIN_FILENO)?;
        redirect_stream(&self.stdout, libc::STDOUT_FILENO)?;
        redirect_stream(&self.stderr, libc::STDERR_FILENO)?;
        Ok(())
    }

    fn is_root(&self) -> bool {
        unistd::getuid().is_root() || unistd::geteuid().is_root() || super::caps::has_capabilities()
    }

    fn drop_privileges(&self, uid: u32, gid: u32, chroot: &Path) -> PrivilegeTransition {
        let chroot_err = if chroot != Path::new("/") {
            enter_chroot(chroot).err()
        } else {
            None
        };

        if let Err(err) = switch_identity(uid, gid) {
            return PrivilegeTransition::IdentityError(err);
        }

        match chroot_err {
            Some(err) => PrivilegeTransition::ChrootError(err),
            None => PrivilegeTransition::Success,
        }
    }
}

// =========================================================================
// Helpers
// =========================================================================

fn enter_chroot(path: &Path) -> DaemonResult<()> {
    unistd::chdir(path)
        .and_then(|_| unistd::chroot(path))
        .and_then(|_| unistd::chdir("/"))
        .map_err(|errno| DaemonError::Chroot(format!("{}: {}", path.display(), errno)))
}

fn switch_identity(uid: u32, gid: u32) -> DaemonResult<()> {
    let gid_raw = gid as libc::gid_t;
    if unsafe { libc::setgroups(1, &gid_raw) } != 0 {
        return Err(DaemonError::IdentityTransition(format!(
            "Unable to revoke supplementary groups: {}",
            std::io::Error::last_os_error()
        )));
    }

    unistd::setgid(Gid::from_raw(gid))
        .map_err(|errno| DaemonError::IdentityTransition(format!("setgid({}): {}", gid, errno)))?;
    unistd::setuid(Uid::from_raw(uid))
        .map_err(|errno| DaemonError::IdentityTransition(format!("setuid({}): {}", uid, errno)))?;

    if unistd::setuid(Uid::from_raw(0)).is_ok() {
        return Err(DaemonError::IdentityTransition(
            "setuid(0) still succeeds after the switch".into(),
        ));
    }
    Ok(())
}

fn redirect_stream(stdio: &Stdio, target_fd: libc::c_int) -> DaemonResult<()> {
    if let Some(file) = stdio.open()? {
        if unsafe { libc::dup2(file.as_raw_fd(), target_fd) } < 0 {
            return Err(DaemonError::last_syscall("dup2"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_a_primary_group() {
        assert_eq!(SystemIdentityDatabase.primary_gid(0).unwrap(), 0);
    }

    #[test]
    fn missing_uid_is_a_lookup_error() {
        let err = SystemIdentityDatabase.primary_gid(u32::MAX - 7).unwrap_err();
        assert!(matches!(err, DaemonError::IdentityLookup(_)));
    }

    #[test]
    fn group_leader_daemonizes_without_setsid() {
        let manager = UnixDaemonManager::new(&ServiceConfig {
            stdin: Stdio::Keep,
            stdout: Stdio::Keep,
            stderr: Stdio::Keep,
            ..Default::default()
        });

        let pid = unsafe { libc::fork() };
        assert!(pid >= 0);
        if pid == 0 {
            // Same position as a foreground job started from a shell.
            let code = if unsafe { libc::setpgid(0, 0) } == 0 && manager.daemonize().is_ok() {
                0
            } else {
                1
            };
            unsafe { libc::_exit(code) };
        }

        let mut status = 0;
        assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
        assert!(libc::WIFEXITED(status));
        assert_eq!(libc::WEXITSTATUS(status), 0);
    }

    #[test]
    fn init_keeps_open_descriptors() {
        let manager = UnixDaemonManager::new(&ServiceConfig {
            umask: None,
            ..Default::default()
        });
        manager.init().unwrap();
        assert!(unsafe { libc::fcntl(libc::STDERR_FILENO, libc::F_GETFD) } >= 0);
    }
}
