use crate::error::LockError;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

const LOCK_ATTEMPTS: usize = 8;

/// Exclusive-lock-backed PID file, held for as long as the guard lives.
///
/// The lock is an advisory `flock(2)` on the open descriptor, so it is released
/// by the kernel if the process dies without running `Drop`.
#[derive(Debug)]
pub struct PidFileGuard {
    path: PathBuf,
    file: Option<File>,
}

impl PidFileGuard {
    /// Opens or creates `path`, locks it and writes the current PID into it.
    ///
    /// A lock only counts if the locked descriptor is still the file at
    /// `path`: a holder that releases unlinks the file, and anyone who opened
    /// it before the unlink ends up locking a dead inode.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        for _ in 0..LOCK_ATTEMPTS {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .mode(0o644)
                .open(path)
                .map_err(LockError::Io)?;

            // LOCK_NB ensures we don't block if another instance is running.
            // Truncation waits until the lock is ours so a live holder's PID survives.
            if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } < 0 {
                let err = io::Error::last_os_error();
                return Err(match err.raw_os_error() {
                    Some(libc::EWOULDBLOCK) => LockError::AlreadyRunning,
                    _ => LockError::Io(err),
                });
            }

            if !is_current(&file, path).map_err(LockError::Io)? {
                tracing::debug!(path = %path.display(), "PID file replaced while locking; retrying");
                continue;
            }

            file.set_len(0).map_err(LockError::Io)?;
            writeln!(file, "{}", std::process::id()).map_err(LockError::Io)?;
            file.sync_all().map_err(LockError::Io)?;

            tracing::debug!(path = %path.display(), "acquired PID file");
            return Ok(PidFileGuard {
                path: path.to_owned(),
                file: Some(file),
            });
        }
        // Someone keeps recreating the file under us.
        Err(LockError::AlreadyRunning)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Removes the file, drops the lock and closes the descriptor.
    ///
    /// Idempotent. Cleanup failures are ignored: the file may sit outside a
    /// chroot or be owned by the identity we dropped from.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = fs::remove_file(&self.path);
            unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
            drop(file);
            tracing::debug!(path = %self.path.display(), "released PID file");
        }
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// True when `file` is the inode currently linked at `path`.
pub(crate) fn is_current(file: &File, path: &Path) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(linked) => Ok(linked.dev() == held.dev() && linked.ino() == held.ino()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
