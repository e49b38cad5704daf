//! stdin/stdout/stderr fifo triplet of a tracked process.
//!
//! The fifos are opened `O_RDWR` by every holder: an open never blocks waiting
//! for a peer, and a pipe stays usable when the other side goes away.

use crate::error::Result;
use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd;
use std::fs::{File, OpenOptions};
use std::os::unix::io::IntoRawFd;
use std::path::Path;
use std::process::Command;
use tracing::debug;

pub const STDIO_NAMES: [&str; 3] = ["stdin", "stdout", "stderr"];

const FIFO_MODE: u32 = 0o755;

/// Create a fifo at `path`, tolerating one that already exists.
pub(crate) fn mkfifo(path: &Path) -> Result<()> {
    match unistd::mkfifo(path, Mode::from_bits_truncate(FIFO_MODE)) {
        Ok(()) | Err(Errno::EEXIST) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Open handles on the three stdio fifos.
#[derive(Debug)]
pub struct Stdio {
    stdin: Option<File>,
    stdout: Option<File>,
    stderr: Option<File>,
    closed: Option<std::result::Result<(), Errno>>,
}

impl Stdio {
    /// Create the three fifos under `dir`.
    pub fn create(dir: &Path) -> Result<()> {
        for name in STDIO_NAMES {
            mkfifo(&dir.join(name))?;
        }
        Ok(())
    }

    /// Open the pre-created fifos read-write.
    pub fn open(dir: &Path) -> Result<Self> {
        let open = |name: &str| -> Result<File> {
            Ok(OpenOptions::new()
                .read(true)
                .write(true)
                .open(dir.join(name))?)
        };
        let stdio = Self {
            stdin: Some(open("stdin")?),
            stdout: Some(open("stdout")?),
            stderr: Some(open("stderr")?),
            closed: None,
        };
        debug!(dir = %dir.display(), "opened stdio fifos");
        Ok(stdio)
    }

    pub fn stdin(&self) -> Option<&File> {
        self.stdin.as_ref()
    }

    pub fn stdout(&self) -> Option<&File> {
        self.stdout.as_ref()
    }

    pub fn stderr(&self) -> Option<&File> {
        self.stderr.as_ref()
    }

    /// Hand duplicates of the open fifos to `cmd` as its standard streams.
    pub fn attach(&self, cmd: &mut Command) -> Result<()> {
        let dup = |f: &Option<File>| -> Result<std::process::Stdio> {
            match f {
                Some(f) => Ok(f.try_clone()?.into()),
                None => Err(Errno::EBADF.into()),
            }
        };
        cmd.stdin(dup(&self.stdin)?)
            .stdout(dup(&self.stdout)?)
            .stderr(dup(&self.stderr)?);
        Ok(())
    }

    /// Close all three handles and report the first error.
    ///
    /// Every later call returns the outcome of the first one.
    pub fn close(&mut self) -> std::result::Result<(), Errno> {
        if let Some(result) = self.closed {
            return result;
        }
        let mut result = Ok(());
        for file in [self.stdin.take(), self.stdout.take(), self.stderr.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = unistd::close(file.into_raw_fd()) {
                result = result.and(Err(e));
            }
        }
        self.closed = Some(result);
        result
    }
}
