use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ctr_shim::{config, state, Container, Error, RuntimeConfig};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ctr-runtime",
    version = ctr_shim::VERSION,
    about = "Create, start, wait for and delete containers supervised by containerd-shim"
)]
struct Cli {
    /// Root directory for runtime state
    #[arg(global = true, long, value_name = "PATH", env = "CTR_RUNTIME_ROOT")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a container (record metadata)
    Create {
        /// Container ID
        id: String,
        /// Bundle directory containing config.json
        #[arg(long, value_name = "PATH", default_value = ".")]
        bundle: PathBuf,
    },
    /// Start the container's init process under a shim
    Start {
        /// Container ID
        id: String,
    },
    /// Print container state as JSON
    State {
        /// Container ID
        id: String,
    },
    /// Block until the init process exits and print its exit status
    Wait {
        /// Container ID
        id: String,
    },
    /// Delete container state
    Delete {
        /// Container ID
        id: String,
    },
}

#[derive(Debug, Serialize)]
struct StateReport {
    id: String,
    bundle: PathBuf,
    status: &'static str, // created | running | stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_status: Option<i32>,
}

fn do_create(root: &Path, id: &str, bundle: &Path) -> Result<()> {
    let bundle = bundle
        .canonicalize()
        .with_context(|| format!("resolving bundle {}", bundle.display()))?;
    let container = Container::create(root, id, &bundle)?;
    info!("do_create() succeeded - id={}", container.id());
    println!("created {}", container.id());
    Ok(())
}

fn do_start(root: &Path, id: &str) -> Result<()> {
    let config = RuntimeConfig::from_env()?;
    let mut container = Container::load(root, id)?;
    let process = container.start(&config)?;
    info!("do_start() succeeded - id={}, process={}", id, process.id());
    println!("started {}", id);
    Ok(())
}

fn state_report(root: &Path, id: &str) -> Result<StateReport> {
    let container = Container::load(root, id)?;
    let proc_dir = state::process_dir(root, id);
    let (status, pid, exit_status) = match container.process(state::INIT_PROCESS_ID) {
        None => ("created", None, None),
        Some(process) => {
            let pid = process.pid().ok().map(|p| p.as_raw());
            // The status file only appears once the shim has reaped the runtime.
            match state::read_exit_status(&proc_dir) {
                Ok(code) => ("stopped", pid, Some(code)),
                Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    ("running", pid, None)
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("reading exit status of {}", id))
                }
            }
        }
    };
    Ok(StateReport {
        id: id.to_string(),
        bundle: container.bundle().to_path_buf(),
        status,
        pid,
        exit_status,
    })
}

fn do_state(root: &Path, id: &str) -> Result<()> {
    let report = state_report(root, id)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn do_wait(root: &Path, id: &str) -> Result<()> {
    let mut container = Container::load(root, id)?;
    let process = container
        .process_mut(state::INIT_PROCESS_ID)
        .with_context(|| format!("container {} has not been started", id))?;
    let status = process.wait()?;
    info!("do_wait() succeeded - id={}, status={}", id, status);
    println!("{}", status);
    Ok(())
}

fn do_delete(root: &Path, id: &str) -> Result<()> {
    Container::load(root, id)?.delete()?;
    info!("do_delete() succeeded - id={}", id);
    println!("deleted {}", id);
    Ok(())
}

fn main() -> Result<()> {
    config::load_config();

    // Same convention as the shim: log to CTR_RUNTIME_LOG or nowhere, never
    // to stdout which carries command output.
    let log_file = std::env::var("CTR_RUNTIME_LOG").ok().and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
            .init(),
        None => tracing_subscriber::fmt()
            .with_writer(std::sync::Mutex::new(std::io::sink()))
            .with_ansi(false)
            .init(),
    }

    let cli = Cli::parse();
    let root = cli.root.clone().unwrap_or_else(state::default_root);
    info!("CLI parsed: root={}, command={:?}", root.display(), cli.command);

    let result = match cli.command {
        Commands::Create { ref id, ref bundle } => do_create(&root, id, bundle),
        Commands::Start { ref id } => do_start(&root, id),
        Commands::State { ref id } => do_state(&root, id),
        Commands::Wait { ref id } => do_wait(&root, id),
        Commands::Delete { ref id } => do_delete(&root, id),
    };

    if let Err(ref e) = result {
        tracing::error!("Command failed: {:?}", e);
    }
    result
}
