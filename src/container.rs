use crate::config::{RuntimeConfig, EXIT_CHANNEL_ENV, RUNTIME_BINARY_ENV, SHIM_LOG_ENV};
use crate::error::{Error, Result};
use crate::process::Process;
use crate::state::{self, ContainerState};
use crate::stdio::Stdio;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// A container and the processes tracked for it.
///
/// The container exclusively owns `root/<id>/`. Processes live in an arena
/// keyed by logical process id.
#[derive(Debug)]
pub struct Container {
    id: String,
    root: PathBuf,
    bundle: PathBuf,
    processes: HashMap<String, Process>,
}

impl Container {
    /// Allocate the state directory and record the bundle path.
    ///
    /// Fails with [`Error::AlreadyExists`] without touching anything when the
    /// directory is already there.
    pub fn create(root: &Path, id: &str, bundle: &Path) -> Result<Self> {
        state::validate_id(id)?;
        fs::create_dir_all(root)?;
        let dir = state::container_dir(root, id);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let record = ContainerState {
            bundle: bundle.to_path_buf(),
        };
        if let Err(e) = state::save_state(&dir, &record) {
            if let Err(cleanup) = fs::remove_dir_all(&dir) {
                warn!(container = id, "removing partially created state: {}", cleanup);
            }
            return Err(e);
        }
        info!(container = id, bundle = %bundle.display(), "container created");

        Ok(Self {
            id: id.to_string(),
            root: root.to_path_buf(),
            bundle: bundle.to_path_buf(),
            processes: HashMap::new(),
        })
    }

    /// Reconstruct a container from its state directory.
    ///
    /// A missing directory is [`Error::NotFound`]. If the container was
    /// started, its init process is re-attached.
    pub fn load(root: &Path, id: &str) -> Result<Self> {
        state::validate_id(id)?;
        let dir = state::container_dir(root, id);
        if !dir.is_dir() {
            return Err(Error::NotFound(id.to_string()));
        }
        let record = state::load_state(&dir)?;

        let mut processes = HashMap::new();
        let proc_dir = state::process_dir(root, id);
        if proc_dir.is_dir() {
            let init = Process::attach(state::INIT_PROCESS_ID, id, &proc_dir)?;
            processes.insert(state::INIT_PROCESS_ID.to_string(), init);
        }

        Ok(Self {
            id: id.to_string(),
            root: root.to_path_buf(),
            bundle: record.bundle,
            processes,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bundle(&self) -> &Path {
        &self.bundle
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `root/<id>`, owned by this container.
    pub fn state_dir(&self) -> PathBuf {
        state::container_dir(&self.root, &self.id)
    }

    pub fn process(&self, id: &str) -> Option<&Process> {
        self.processes.get(id)
    }

    pub fn process_mut(&mut self, id: &str) -> Option<&mut Process> {
        self.processes.get_mut(id)
    }

    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    /// Launch the init process under a shim. A container starts exactly once.
    pub fn start(&mut self, config: &RuntimeConfig) -> Result<&mut Process> {
        let proc_dir = state::process_dir(&self.root, &self.id);
        match fs::create_dir(&proc_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyStarted(self.id.clone()))
            }
            Err(e) => return Err(e.into()),
        }

        let process = match self.spawn_init(&proc_dir, config) {
            Ok(process) => process,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&proc_dir) {
                    warn!(container = %self.id, "removing process state: {}", cleanup);
                }
                return Err(e);
            }
        };
        Ok(self
            .processes
            .entry(state::INIT_PROCESS_ID.to_string())
            .or_insert(process))
    }

    fn spawn_init(&self, proc_dir: &Path, config: &RuntimeConfig) -> Result<Process> {
        Stdio::create(proc_dir)?;
        let stdio = Stdio::open(proc_dir)?;
        let arming = config.exit_channel.prepare(proc_dir)?;

        let mut cmd = Command::new(&config.shim_binary);
        cmd.arg(proc_dir)
            .arg(&self.id)
            .current_dir(&self.bundle)
            .process_group(0)
            .env(RUNTIME_BINARY_ENV, &config.runtime_binary)
            .env(EXIT_CHANNEL_ENV, config.exit_channel.as_str())
            .env(SHIM_LOG_ENV, proc_dir.join(state::SHIM_LOG_FILE))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        arming.configure(&mut cmd);

        let mut shim = cmd.spawn()?;
        info!(
            container = %self.id,
            shim_pid = shim.id(),
            exit_channel = %config.exit_channel,
            "shim spawned"
        );
        arming.armed(proc_dir, &mut shim)?;

        Ok(Process::new(
            state::INIT_PROCESS_ID,
            &self.id,
            proc_dir,
            stdio,
            Some(shim),
        ))
    }

    /// Freeze the container. Reserved for cgroup freeze delegated to the runtime.
    pub fn pause(&self) -> Result<()> {
        Err(Error::NotImplemented("pause"))
    }

    /// Thaw the container. Reserved for cgroup thaw delegated to the runtime.
    pub fn resume(&self) -> Result<()> {
        Err(Error::NotImplemented("resume"))
    }

    /// Remove the whole state subtree. Safe once the process has exited, or
    /// when it was never started.
    pub fn delete(self) -> Result<()> {
        let dir = self.state_dir();
        drop(self.processes);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(container = %self.id, "container deleted");
        Ok(())
    }
}
