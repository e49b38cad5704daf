//! Named-pipe exit channel.
//!
//! Nothing is ever written to the pipe. The shim holds the write end for as
//! long as the tracked process runs; the waiter sees end-of-stream once it is
//! closed, which the shim does right after recording the exit status (or the
//! kernel does when the shim dies).

use crate::error::{Error, Result};
use crate::state;
use crate::stdio::mkfifo;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::path::Path;
use std::process::Child;
use std::thread;
use std::time::Duration;
use tracing::debug;

const ARM_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub fn create(proc_dir: &Path) -> Result<()> {
    mkfifo(&proc_dir.join(state::EXIT_FIFO))
}

/// Open the read end without waiting for a writer.
pub fn open_reader(proc_dir: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(proc_dir.join(state::EXIT_FIFO))?)
}

/// Shim side: open the write end. Blocks until some reader has the pipe open.
pub fn open_writer(proc_dir: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .write(true)
        .open(proc_dir.join(state::EXIT_FIFO))?)
}

pub fn release(writer: File) -> Result<()> {
    unistd::close(writer.into_raw_fd())?;
    Ok(())
}

/// Poll until the shim holds the write end.
///
/// A non-blocking read reports `EAGAIN` while a writer is attached and
/// end-of-stream when there is none, either because the shim has not opened
/// the pipe yet or because it already finished. The exit status file tells
/// the two apart once the shim is gone.
pub(crate) fn await_writer(reader: &mut File, proc_dir: &Path, shim: &mut Child) -> Result<()> {
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!(dir = %proc_dir.display(), "exit pipe writer attached");
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
            Ok(n) if n > 0 => continue,
            Ok(_) => match shim.try_wait()? {
                Some(_) if state::exit_status_path(proc_dir).exists() => return Ok(()),
                Some(status) => return Err(Error::ShimExited(status)),
                None => {}
            },
        }
        thread::sleep(ARM_POLL_INTERVAL);
    }
}

/// Block until the write end is closed.
pub fn wait(proc_dir: &Path) -> Result<()> {
    // A blocking open would hang forever once the shim is gone, so open
    // non-blocking and only then switch the descriptor to blocking reads.
    let mut reader = open_reader(proc_dir)?;
    let flags = OFlag::from_bits_truncate(fcntl(reader.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(
        reader.as_raw_fd(),
        FcntlArg::F_SETFL(flags & !OFlag::O_NONBLOCK),
    )?;

    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_waiter_unblocks_only_after_release() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path()).unwrap();
        let _reader = open_reader(dir.path()).unwrap();
        let writer = open_writer(dir.path()).unwrap();

        let (tx, rx) = mpsc::channel();
        let proc_dir = dir.path().to_path_buf();
        let waiter = thread::spawn(move || {
            let status = wait(&proc_dir).and_then(|_| state::read_exit_status(&proc_dir));
            tx.send(status.map_err(|e| e.to_string())).unwrap();
        });

        assert!(
            rx.recv_timeout(Duration::from_millis(200)).is_err(),
            "waiter returned while the writer was still open"
        );

        state::write_exit_status(dir.path(), 137).unwrap();
        release(writer).unwrap();

        let status = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(status, Ok(137));
        waiter.join().unwrap();
    }

    #[test]
    fn test_wait_after_release_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path()).unwrap();
        let reader = open_reader(dir.path()).unwrap();
        let writer = open_writer(dir.path()).unwrap();
        drop(reader);
        state::write_exit_status(dir.path(), 0).unwrap();
        release(writer).unwrap();

        wait(dir.path()).unwrap();
        assert_eq!(state::read_exit_status(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_open_reader_does_not_block_without_writer() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path()).unwrap();
        open_reader(dir.path()).unwrap();
    }
}
