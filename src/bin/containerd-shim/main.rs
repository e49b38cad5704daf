//! containerd-shim: supervisor for a single container process.
//!
//! Invoked as `containerd-shim <processRoot> <containerID>` with the bundle as
//! working directory. It becomes subreaper, starts `<runtime> --id <id> start`
//! on the container's stdio fifos, reaps everything that exits below it and,
//! once the runtime process is gone, records its exit status and releases the
//! exit channel so waiters can read it.

use anyhow::{Context, Result};
use clap::Parser;
use ctr_shim::config::{self, EXIT_CHANNEL_ENV, RUNTIME_BINARY_ENV, SHIM_LOG_ENV};
use ctr_shim::exit::{ExitChannelKind, Notifier};
use ctr_shim::reaper;
use ctr_shim::state;
use ctr_shim::stdio::Stdio;
use nix::sys::prctl;
use nix::sys::signal::{SigSet, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "containerd-shim",
    version = ctr_shim::VERSION,
    about = "Supervises one container process and records its exit status"
)]
struct Cli {
    /// Process state directory holding the stdio fifos and the exit channel
    process_root: PathBuf,

    /// Container ID passed to the runtime
    id: String,

    /// OCI runtime binary
    #[arg(long, env = RUNTIME_BINARY_ENV, default_value = "runc")]
    runtime: PathBuf,

    /// Exit notification strategy prepared by the caller
    #[arg(long, env = EXIT_CHANNEL_ENV, value_enum, default_value_t = ExitChannelKind::Pipe)]
    exit_channel: ExitChannelKind,
}

/// Start the runtime on the container stdio and return its pid.
///
/// The child starts with an empty signal mask and gets SIGKILL if the shim
/// dies.
fn start_runtime(runtime: &Path, id: &str, stdio: &Stdio) -> Result<Pid> {
    let mut cmd = Command::new(runtime);
    cmd.arg("--id").arg(id).arg("start");
    stdio.attach(&mut cmd).context("attach stdio")?;
    unsafe {
        cmd.pre_exec(|| {
            // The mask blocking everything in the shim survives exec.
            SigSet::all().thread_unblock()?;
            prctl::set_pdeathsig(Signal::SIGKILL)?;
            Ok(())
        });
    }
    let child = cmd
        .spawn()
        .with_context(|| format!("spawn {}", runtime.display()))?;
    Ok(Pid::from_raw(child.id() as i32))
}

/// Wait for one of `signals` and return its raw number.
///
/// `SigSet::wait` only yields signals nix has a `Signal` variant for, and the
/// blocked set also holds the real-time ones.
fn wait_signal(signals: &SigSet) -> std::io::Result<libc::c_int> {
    let mut signum: libc::c_int = 0;
    let res = unsafe { libc::sigwait(signals.as_ref(), &mut signum) };
    if res != 0 {
        return Err(std::io::Error::from_raw_os_error(res));
    }
    Ok(signum)
}

/// Consume signals until the runtime process has been reaped; returns its
/// exit status. Reap failures are logged and the loop keeps going.
fn supervise(signals: &SigSet, runtime_pid: Pid) -> Result<i32> {
    loop {
        let signum = match wait_signal(signals) {
            Ok(signum) => signum,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("wait for signal"),
        };
        if signum != libc::SIGCHLD {
            match Signal::try_from(signum) {
                Ok(signal) => info!(?signal, "ignoring signal"),
                Err(_) => info!(signum, "ignoring signal"),
            }
            continue;
        }
        debug!("received SIGCHLD");

        let mut runtime_status = None;
        for reaped in reaper::reap() {
            match reaped {
                Ok(exit) if exit.pid == runtime_pid => {
                    info!(pid = exit.pid.as_raw(), status = exit.status, "runtime exited");
                    runtime_status = Some(exit.status);
                }
                Ok(exit) => {
                    debug!(pid = exit.pid.as_raw(), status = exit.status, "reaped orphan")
                }
                Err(e) => error!("reaping child processes: {}", e),
            }
        }
        if let Some(status) = runtime_status {
            return Ok(status);
        }
    }
}

fn run(cli: Cli, signals: &SigSet) -> Result<()> {
    info!(
        id = %cli.id,
        process_root = %cli.process_root.display(),
        runtime = %cli.runtime.display(),
        exit_channel = %cli.exit_channel,
        "shim starting"
    );

    reaper::set_child_subreaper().context("set as subreaper")?;
    let notifier =
        Notifier::open(cli.exit_channel, &cli.process_root).context("open exit channel")?;
    let mut stdio = Stdio::open(&cli.process_root).context("open container stdio from fifo")?;
    let runtime_pid =
        start_runtime(&cli.runtime, &cli.id, &stdio).context("start runtime")?;
    info!(pid = runtime_pid.as_raw(), "runtime started");
    if let Err(e) = state::save_pid(&cli.process_root, runtime_pid.as_raw()) {
        warn!("recording runtime pid: {}", e);
    }

    let status = supervise(signals, runtime_pid)?;

    // The status must be on disk before the channel is released.
    if let Err(e) = state::write_exit_status(&cli.process_root, status) {
        error!(status, "write exit status: {}", e);
    }
    if let Err(e) = notifier.notify() {
        error!("release exit channel: {}", e);
    }
    if let Err(e) = stdio.close() {
        error!("close stdio: {}", e);
    }
    info!(status, "shim exiting");
    Ok(())
}

fn init_tracing() {
    // Logs go to CTR_SHIM_LOG; the shim's own stdio is not connected to anyone.
    let log_file = std::env::var(SHIM_LOG_ENV).ok().and_then(|path| {
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
}

fn main() {
    // Block every signal before anything else so a SIGCHLD from an early
    // runtime exit stays pending until the loop collects it.
    let signals = SigSet::all();
    if let Err(e) = signals.thread_block() {
        eprintln!("containerd-shim: block signals: {}", e);
        std::process::exit(1);
    }

    config::load_config();
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli, &signals) {
        error!("shim: {:#}", e);
        eprintln!("containerd-shim: {:#}", e);
        std::process::exit(1);
    }
}
