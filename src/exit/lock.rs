//! Lock-file exit channel.
//!
//! The runtime takes an exclusive `flock` on `waitlock` before spawning the
//! shim and hands the descriptor to it. `flock` locks belong to the open file
//! description, not to a descriptor, so the runtime closing its own copy after
//! the spawn does not release anything: the shim now holds the only reference
//! and keeps the lock until it has recorded the exit status, or until the
//! kernel drops it because the shim died. Waiters block on a shared lock.

use crate::error::{Error, Result};
use crate::state;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, FlockArg};
use nix::errno::Errno;
use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Tells the shim which inherited descriptor carries the lock.
pub const LOCK_FD_ENV: &str = "CTR_WAIT_LOCK_FD";

#[allow(deprecated)]
fn flock(fd: RawFd, arg: FlockArg) -> nix::Result<()> {
    loop {
        match nix::fcntl::flock(fd, arg) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

/// Create `waitlock` and take the exclusive lock without blocking.
///
/// Fails with `EWOULDBLOCK` when another open file description already holds
/// it: there is exactly one owner per process directory.
pub fn acquire(proc_dir: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(proc_dir.join(state::WAIT_LOCK_FILE))?;
    flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock)?;
    debug!(dir = %proc_dir.display(), "acquired wait lock");
    Ok(file)
}

/// Keep `file` open across exec in the child and advertise its number.
pub(crate) fn inherit(cmd: &mut Command, file: &File) {
    let fd = file.as_raw_fd();
    cmd.env(LOCK_FD_ENV, fd.to_string());
    unsafe {
        cmd.pre_exec(move || {
            fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
            Ok(())
        });
    }
}

/// Shim side: take ownership of the inherited, already locked descriptor.
pub fn adopt() -> Result<File> {
    let value = std::env::var(LOCK_FD_ENV)
        .map_err(|_| Error::InvalidConfig(format!("{} is not set", LOCK_FD_ENV)))?;
    let fd: RawFd = value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{}={:?}", LOCK_FD_ENV, value)))?;

    // EBADF here means nothing was inherited.
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    let file = unsafe { File::from_raw_fd(fd) };
    // Same open file description as the runtime's lock, so this only
    // confirms we own it.
    flock(fd, FlockArg::LockExclusiveNonblock)?;
    std::env::remove_var(LOCK_FD_ENV);
    debug!(fd, "adopted wait lock");
    Ok(file)
}

pub fn release(file: File) -> Result<()> {
    flock(file.as_raw_fd(), FlockArg::Unlock)?;
    drop(file);
    Ok(())
}

/// Block until the exclusive holder is gone.
pub fn wait(proc_dir: &Path) -> Result<()> {
    let file = File::open(proc_dir.join(state::WAIT_LOCK_FILE))?;
    flock(file.as_raw_fd(), FlockArg::LockShared)?;
    flock(file.as_raw_fd(), FlockArg::Unlock)?;
    Ok(())
}
