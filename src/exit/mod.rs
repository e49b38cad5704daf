//! Exit notification channel.
//!
//! A one-shot "the tracked process has exited" signal between the shim and
//! unrelated waiters. Two strategies exist, each in its own module:
//!
//! * [`pipe`]: a named pipe whose write end is held by the shim. Waiters read
//!   until end-of-stream.
//! * [`lock`]: a lock file exclusively `flock`ed by the shim. Waiters block on
//!   a shared lock.
//!
//! For both, the shim writes `exitStatus` before it releases the channel and a
//! waiter reads `exitStatus` only once the channel has signalled.

pub mod lock;
pub mod pipe;

use crate::error::Result;
use crate::state;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{Child, Command};
use tracing::debug;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ExitChannelKind {
    #[default]
    Pipe,
    Lock,
}

impl ExitChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitChannelKind::Pipe => "pipe",
            ExitChannelKind::Lock => "lock",
        }
    }

    /// Work out which strategy a process directory was prepared with.
    pub fn detect(proc_dir: &Path) -> Result<Self> {
        if proc_dir.join(state::WAIT_LOCK_FILE).exists() {
            Ok(ExitChannelKind::Lock)
        } else if proc_dir.join(state::EXIT_FIFO).exists() {
            Ok(ExitChannelKind::Pipe)
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no exit channel in {}", proc_dir.display()),
            )
            .into())
        }
    }

    /// Create the on-disk primitive before the shim is spawned.
    pub(crate) fn prepare(self, proc_dir: &Path) -> Result<Arming> {
        debug!(kind = ?self, dir = %proc_dir.display(), "preparing exit channel");
        match self {
            ExitChannelKind::Pipe => {
                pipe::create(proc_dir)?;
                Ok(Arming::Pipe(pipe::open_reader(proc_dir)?))
            }
            ExitChannelKind::Lock => Ok(Arming::Lock(lock::acquire(proc_dir)?)),
        }
    }
}

impl std::fmt::Display for ExitChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime-side half of a channel, held while the shim is being spawned.
#[derive(Debug)]
pub(crate) enum Arming {
    /// Non-blocking read end; lets the shim's write-only open proceed.
    Pipe(File),
    /// Exclusively locked file; its descriptor is inherited by the shim.
    Lock(File),
}

impl Arming {
    pub(crate) fn configure(&self, cmd: &mut Command) {
        if let Arming::Lock(file) = self {
            lock::inherit(cmd, file);
        }
    }

    /// Returns once the shim owns the channel.
    pub(crate) fn armed(self, proc_dir: &Path, shim: &mut Child) -> Result<()> {
        match self {
            Arming::Pipe(mut reader) => pipe::await_writer(&mut reader, proc_dir, shim),
            // The shim's inherited descriptor shares our open file description,
            // so dropping this copy leaves the lock in place.
            Arming::Lock(_) => Ok(()),
        }
    }
}

/// Shim-side handle. Releasing it is the "process exited" signal.
#[derive(Debug)]
pub enum Notifier {
    Pipe(File),
    Lock(File),
}

impl Notifier {
    pub fn open(kind: ExitChannelKind, proc_dir: &Path) -> Result<Self> {
        match kind {
            ExitChannelKind::Pipe => Ok(Notifier::Pipe(pipe::open_writer(proc_dir)?)),
            ExitChannelKind::Lock => Ok(Notifier::Lock(lock::adopt()?)),
        }
    }

    /// Signal completion. Must only be called after `exitStatus` is written.
    pub fn notify(self) -> Result<()> {
        match self {
            Notifier::Pipe(writer) => pipe::release(writer),
            Notifier::Lock(file) => lock::release(file),
        }
    }
}

/// Block until the process owning `proc_dir` has exited.
///
/// There is no timeout; callers needing a bound must apply their own.
pub fn wait(proc_dir: &Path) -> Result<()> {
    match ExitChannelKind::detect(proc_dir)? {
        ExitChannelKind::Pipe => pipe::wait(proc_dir),
        ExitChannelKind::Lock => lock::wait(proc_dir),
    }
}

/// Block until exit, then read the recorded status.
pub fn wait_exit_status(proc_dir: &Path) -> Result<i32> {
    wait(proc_dir)?;
    state::read_exit_status(proc_dir)
}
