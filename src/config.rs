//! Shared configuration for the runtime library and both binaries.
//!
//! Reads `/etc/ctr-shim/ctr-shim.conf` (or the path in `CTR_SHIM_CONFIG`)
//! and sets environment variables for any keys not already present. The
//! knobs themselves are then resolved from the environment, so the shim,
//! which inherits the runtime's environment, sees the same values.
//!
//! File format: simple `KEY=VALUE` lines. Comments (`#`) and blank lines
//! are ignored. Environment variables always take precedence over file values.

use crate::error::{Error, Result};
use crate::exit::ExitChannelKind;
use clap::ValueEnum;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/ctr-shim/ctr-shim.conf";

pub const SHIM_BINARY_ENV: &str = "CTR_SHIM_BINARY";
pub const RUNTIME_BINARY_ENV: &str = "CTR_RUNTIME_BINARY";
pub const EXIT_CHANNEL_ENV: &str = "CTR_EXIT_CHANNEL";
pub const SHIM_LOG_ENV: &str = "CTR_SHIM_LOG";

const DEFAULT_SHIM_BINARY: &str = "containerd-shim";
const DEFAULT_RUNTIME_BINARY: &str = "runc";

/// Load configuration from the config file into the environment.
///
/// Search order:
/// 1. `CTR_SHIM_CONFIG` env var (explicit path override)
/// 2. `/etc/ctr-shim/ctr-shim.conf`
///
/// Silently returns if the config file doesn't exist (not an error).
pub fn load_config() {
    let path =
        std::env::var("CTR_SHIM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        // Split on first '=' only (values may contain '=')
        if let Some((key, value)) = trimmed.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            if std::env::var(key).is_err() {
                std::env::set_var(key, value.trim());
            }
        }
    }
}

/// How the local runtime launches a container's shim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Shim executable spawned once per started container.
    pub shim_binary: PathBuf,
    /// OCI runtime the shim invokes as `<runtime> --id <id> start`.
    pub runtime_binary: PathBuf,
    pub exit_channel: ExitChannelKind,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shim_binary: PathBuf::from(DEFAULT_SHIM_BINARY),
            runtime_binary: PathBuf::from(DEFAULT_RUNTIME_BINARY),
            exit_channel: ExitChannelKind::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(shim) = std::env::var(SHIM_BINARY_ENV) {
            config.shim_binary = PathBuf::from(shim);
        }
        if let Ok(runtime) = std::env::var(RUNTIME_BINARY_ENV) {
            config.runtime_binary = PathBuf::from(runtime);
        }
        if let Ok(kind) = std::env::var(EXIT_CHANNEL_ENV) {
            config.exit_channel = ExitChannelKind::from_str(&kind, true).map_err(|_| {
                Error::InvalidConfig(format!("{}={:?} (expected pipe or lock)", EXIT_CHANNEL_ENV, kind))
            })?;
        }
        Ok(config)
    }
}
