use service_forge::{LockError, PidFileGuard};
use std::fs;

#[test]
fn writes_current_pid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("svc.pid");

    let guard = PidFileGuard::acquire(&path).unwrap();
    assert!(guard.is_held());
    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(content.trim(), std::process::id().to_string());
}

#[test]
fn second_holder_is_already_running() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("svc.pid");

    let mut first = PidFileGuard::acquire(&path).unwrap();
    assert!(matches!(PidFileGuard::acquire(&path), Err(LockError::AlreadyRunning)));
    // The live holder's PID is not clobbered by the failed attempt.
    assert!(!fs::read_to_string(&path).unwrap().is_empty());

    first.release();
    assert!(!first.is_held());
    assert!(!path.exists());
    assert!(PidFileGuard::acquire(&path).is_ok());
}

#[test]
fn release_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("svc.pid");

    let mut guard = PidFileGuard::acquire(&path).unwrap();
    guard.release();
    guard.release();
    drop(guard);
    assert!(!path.exists());
}

#[test]
fn dropping_the_guard_releases_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("svc.pid");

    {
        let _guard = PidFileGuard::acquire(&path).unwrap();
    }
    let again = PidFileGuard::acquire(&path).unwrap();
    assert_eq!(again.path(), path.as_path());
}

#[test]
fn missing_directory_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("svc.pid");
    assert!(matches!(PidFileGuard::acquire(&path), Err(LockError::Io(_))));
}

#[test]
fn lock_on_a_released_inode_does_not_block_the_next_holder() {
    use std::os::unix::io::AsRawFd;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("svc.pid");

    let mut first = PidFileGuard::acquire(&path).unwrap();
    let late = fs::File::open(&path).unwrap();
    first.release();
    assert_eq!(unsafe { libc::flock(late.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) }, 0);

    // Only the guard holds a lock on the file that is actually on disk.
    let next = PidFileGuard::acquire(&path).unwrap();
    assert!(next.is_held());
    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(content.trim(), std::process::id().to_string());
    assert!(matches!(PidFileGuard::acquire(&path), Err(LockError::AlreadyRunning)));
}
