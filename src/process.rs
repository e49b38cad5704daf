use crate::error::{Error, Result};
use crate::exit::{self, ExitChannelKind};
use crate::state;
use crate::stdio::Stdio;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Child;
use tracing::{debug, warn};

/// A process tracked inside a container.
///
/// Identity is the logical id (`"init"` for the first process). The OS pid
/// belongs to the current incarnation only and is read from disk on demand.
#[derive(Debug)]
pub struct Process {
    id: String,
    container_id: String,
    root: PathBuf,
    stdio: Stdio,
    /// The shim, when this handle is the one that spawned it.
    shim: Option<Child>,
}

impl Process {
    pub(crate) fn new(
        id: &str,
        container_id: &str,
        root: &Path,
        stdio: Stdio,
        shim: Option<Child>,
    ) -> Self {
        Self {
            id: id.to_string(),
            container_id: container_id.to_string(),
            root: root.to_path_buf(),
            stdio,
            shim,
        }
    }

    /// Re-attach to a process whose state directory already exists.
    pub(crate) fn attach(id: &str, container_id: &str, root: &Path) -> Result<Self> {
        let stdio = Stdio::open(root)?;
        Ok(Self::new(id, container_id, root, stdio, None))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of the owning container.
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// State directory holding the fifos and the exit channel.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exit_channel(&self) -> Result<ExitChannelKind> {
        ExitChannelKind::detect(&self.root)
    }

    pub fn stdin(&self) -> Option<&File> {
        self.stdio.stdin()
    }

    pub fn stdout(&self) -> Option<&File> {
        self.stdio.stdout()
    }

    pub fn stderr(&self) -> Option<&File> {
        self.stdio.stderr()
    }

    /// Pid of the runtime process the shim launched for this incarnation.
    pub fn pid(&self) -> Result<Pid> {
        state::load_pid(&self.root).map(Pid::from_raw)
    }

    /// Block until the process exits and return its exit status.
    ///
    /// Errors reading the recorded status are returned as they are.
    pub fn wait(&mut self) -> Result<i32> {
        let status = exit::wait_exit_status(&self.root)?;
        if let Some(mut shim) = self.shim.take() {
            match shim.wait() {
                Ok(shim_status) => debug!(
                    container = %self.container_id,
                    process = %self.id,
                    ?shim_status,
                    "shim exited"
                ),
                Err(e) => warn!(container = %self.container_id, "waiting for shim: {}", e),
            }
        }
        Ok(status)
    }

    pub fn signal(&self, _signal: Signal) -> Result<()> {
        Err(Error::NotImplemented("signal"))
    }

    /// Close the stdio handles. Repeated calls report the first outcome.
    pub fn close(&mut self) -> Result<()> {
        self.stdio.close().map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::pipe;

    fn prepared_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        Stdio::create(dir.path()).unwrap();
        pipe::create(dir.path()).unwrap();
        dir
    }

    #[test]
    fn test_attach_exposes_identity_and_stdio() {
        let dir = prepared_dir();
        let process = Process::attach("init", "c1", dir.path()).unwrap();
        assert_eq!(process.id(), "init");
        assert_eq!(process.container_id(), "c1");
        assert_eq!(process.root(), dir.path());
        assert!(process.stdin().is_some());
        assert_eq!(process.exit_channel().unwrap(), ExitChannelKind::Pipe);
    }

    #[test]
    fn test_signal_is_not_implemented() {
        let dir = prepared_dir();
        let process = Process::attach("init", "c1", dir.path()).unwrap();
        let err = process.signal(Signal::SIGTERM).unwrap_err();
        assert!(err.is_not_implemented());
    }

    #[test]
    fn test_close_twice_reports_same_result() {
        let dir = prepared_dir();
        let mut process = Process::attach("init", "c1", dir.path()).unwrap();
        assert!(process.close().is_ok());
        assert!(process.close().is_ok());
        assert!(process.stdout().is_none());
    }

    #[test]
    fn test_pid_reads_recorded_pid() {
        let dir = prepared_dir();
        let process = Process::attach("init", "c1", dir.path()).unwrap();
        assert!(process.pid().is_err());
        state::save_pid(dir.path(), 4242).unwrap();
        assert_eq!(process.pid().unwrap(), Pid::from_raw(4242));
    }

    #[test]
    fn test_wait_after_exit_recorded() {
        let dir = prepared_dir();
        let reader = pipe::open_reader(dir.path()).unwrap();
        let writer = pipe::open_writer(dir.path()).unwrap();
        drop(reader);
        state::write_exit_status(dir.path(), 42).unwrap();
        pipe::release(writer).unwrap();

        let mut process = Process::attach("init", "c1", dir.path()).unwrap();
        assert_eq!(process.wait().unwrap(), 42);
    }
}
