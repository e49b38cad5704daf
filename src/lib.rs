//! Local container runtime and the supervision pieces shared with the
//! `containerd-shim` binary.
//!
//! A [`Container`] owns a state directory under a runtime root. Starting it
//! spawns the shim, which registers as child subreaper, launches the OCI
//! runtime with FIFO stdio and records the exit status of the tracked process
//! once it has been reaped. Any caller, including one that attaches long after
//! the container started, learns about the exit through the process's exit
//! notification channel.

pub mod config;
pub mod container;
pub mod error;
pub mod exit;
pub mod process;
pub mod reaper;
pub mod state;
pub mod stdio;

pub use config::RuntimeConfig;
pub use container::Container;
pub use error::{Error, Result};
pub use exit::ExitChannelKind;
pub use process::Process;

/// Version string shared by the binaries: crate version plus git hash.
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");
