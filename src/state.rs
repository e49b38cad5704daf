//! On-disk layout of a container's runtime state.
//!
//! ```text
//! <root>/<id>/
//! ├── state.json
//! └── proc/
//!     ├── stdin, stdout, stderr   (fifos)
//!     ├── exit | waitlock         (exit notification channel)
//!     ├── exitStatus
//!     ├── pid
//!     └── shim.log
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const STATE_FILE: &str = "state.json";
pub const PROC_DIR: &str = "proc";
pub const EXIT_FIFO: &str = "exit";
pub const WAIT_LOCK_FILE: &str = "waitlock";
pub const EXIT_STATUS_FILE: &str = "exitStatus";
pub const PID_FILE: &str = "pid";
pub const SHIM_LOG_FILE: &str = "shim.log";
pub const INIT_PROCESS_ID: &str = "init";

const DEFAULT_ROOT: &str = "/run/ctr-shim";

/// Validate that an ID is safe for use in filesystem paths.
/// Rejects empty strings, path traversal (`..`), and characters outside `[a-zA-Z0-9._-]`.
/// IDs longer than 256 characters are also rejected.
pub fn validate_id(id: &str) -> Result<()> {
    let reason = if id.is_empty() {
        "must not be empty"
    } else if id.len() > 256 {
        "must not exceed 256 characters"
    } else if id == "." || id == ".." {
        "must not be '.' or '..'"
    } else if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        "contains invalid characters (allowed: a-zA-Z0-9._-)"
    } else {
        return Ok(());
    };
    Err(Error::InvalidId {
        id: id.to_string(),
        reason,
    })
}

/// Durable record written once when a container is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub bundle: PathBuf,
}

/// Runtime root used when the caller does not name one.
pub fn default_root() -> PathBuf {
    std::env::var("CTR_RUNTIME_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_ROOT))
}

pub fn container_dir(root: &Path, id: &str) -> PathBuf {
    root.join(id)
}

pub fn process_dir(root: &Path, id: &str) -> PathBuf {
    container_dir(root, id).join(PROC_DIR)
}

pub fn exit_status_path(proc_dir: &Path) -> PathBuf {
    proc_dir.join(EXIT_STATUS_FILE)
}

/// Write `data` next to `path` and rename it into place, so readers observe
/// either nothing or the complete contents.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(data)?;
    f.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn save_state(container_dir: &Path, state: &ContainerState) -> Result<()> {
    let json = serde_json::to_vec_pretty(state)?;
    write_atomic(&container_dir.join(STATE_FILE), &json)
}

pub fn load_state(container_dir: &Path) -> Result<ContainerState> {
    let data = fs::read(container_dir.join(STATE_FILE))?;
    Ok(serde_json::from_slice(&data)?)
}

/// Persist the decimal exit status of the tracked process.
pub fn write_exit_status(proc_dir: &Path, status: i32) -> Result<()> {
    write_atomic(&exit_status_path(proc_dir), status.to_string().as_bytes())
}

/// Read the exit status. Only meaningful after the exit channel signalled.
pub fn read_exit_status(proc_dir: &Path) -> Result<i32> {
    let data = fs::read_to_string(exit_status_path(proc_dir))?;
    data.trim()
        .parse()
        .map_err(|_| Error::MalformedExitStatus(data))
}

pub fn save_pid(proc_dir: &Path, pid: i32) -> Result<()> {
    write_atomic(&proc_dir.join(PID_FILE), format!("{}\n", pid).as_bytes())
}

pub fn load_pid(proc_dir: &Path) -> Result<i32> {
    let s = fs::read_to_string(proc_dir.join(PID_FILE))?;
    s.trim()
        .parse()
        .map_err(|_| Error::MalformedPid(s))
}
