use std::process::ExitStatus;

/// Errors returned by the local runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("container {0} already exists")]
    AlreadyExists(String),

    #[error("container {0} not found")]
    NotFound(String),

    #[error("container {0} has already been started")]
    AlreadyStarted(String),

    #[error("invalid id {id:?}: {reason}")]
    InvalidId { id: String, reason: &'static str },

    /// Deliberately unsupported operation, not a failure of the runtime.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("shim exited ({0}) before arming the exit channel")]
    ShimExited(ExitStatus),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed exit status {0:?}")]
    MalformedExitStatus(String),

    #[error("malformed pid file {0:?}")]
    MalformedPid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Errno(#[from] nix::errno::Errno),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for the stable "deliberately unsupported" kind.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Error::NotImplemented(_))
    }
}
