//! Zombie collection for the shim.
//!
//! The shim registers as child subreaper so that descendants orphaned by the
//! OCI runtime are reparented to it instead of to init, then drains every
//! pending zombie each time SIGCHLD arrives.

use nix::errno::Errno;
use nix::sys::prctl;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, info};

/// One collected child: `{pid, status}` of a single reap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit {
    pub pid: Pid,
    pub status: i32,
}

/// Mark the calling process as subreaper for its descendants.
pub fn set_child_subreaper() -> nix::Result<()> {
    prctl::set_child_subreaper(true)?;
    info!("shim set as child subreaper (PR_SET_CHILD_SUBREAPER)");
    Ok(())
}

/// Normalized exit status: the exit code, or `128 + signo` when the child was
/// killed by a signal. `None` for wait statuses that are not terminations.
pub fn exit_status(status: WaitStatus) -> Option<Exit> {
    match status {
        WaitStatus::Exited(pid, code) => Some(Exit { pid, status: code }),
        WaitStatus::Signaled(pid, signal, _) => Some(Exit {
            pid,
            status: 128 + signal as i32,
        }),
        _ => None,
    }
}

/// Iterator over every zombie that can be reaped right now.
///
/// Never blocks. Having no children at all ends the cycle without an error.
/// Any other wait failure is yielded once and ends the cycle.
pub fn reap() -> Reap {
    Reap { done: false }
}

#[derive(Debug)]
pub struct Reap {
    done: bool,
}

impl Iterator for Reap {
    type Item = nix::Result<Exit>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => self.done = true,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Ok(status) => match exit_status(status) {
                    Some(exit) => {
                        debug!(pid = exit.pid.as_raw(), status = exit.status, "reaped child");
                        return Some(Ok(exit));
                    }
                    None => debug!(?status, "ignoring non-exit wait status"),
                },
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use serial_test::serial;
    use std::collections::HashMap;
    use std::process::Command;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Reap repeatedly until every pid in `want` has been collected.
    fn reap_until(want: &[Pid]) -> HashMap<Pid, i32> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut got = HashMap::new();
        while want.iter().any(|pid| !got.contains_key(pid)) {
            assert!(Instant::now() < deadline, "timed out, reaped {:?}", got);
            for exit in reap() {
                let exit = exit.expect("reap failed");
                got.insert(exit.pid, exit.status);
            }
            thread::sleep(Duration::from_millis(10));
        }
        got
    }

    fn spawn_exit(code: i32) -> Pid {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("exit {}", code))
            .spawn()
            .expect("failed to spawn sh");
        Pid::from_raw(child.id() as i32)
    }

    #[test]
    fn test_exit_status_decoding() {
        let pid = Pid::from_raw(42);
        assert_eq!(
            exit_status(WaitStatus::Exited(pid, 3)),
            Some(Exit { pid, status: 3 })
        );
        assert_eq!(
            exit_status(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Some(Exit { pid, status: 137 })
        );
        assert_eq!(
            exit_status(WaitStatus::Signaled(pid, Signal::SIGTERM, true)),
            Some(Exit { pid, status: 143 })
        );
        assert_eq!(exit_status(WaitStatus::StillAlive), None);
        assert_eq!(exit_status(WaitStatus::Stopped(pid, Signal::SIGSTOP)), None);
    }

    #[test]
    #[serial]
    fn test_reap_without_children_is_empty() {
        let exits: nix::Result<Vec<Exit>> = reap().collect();
        assert_eq!(exits, Ok(vec![]));
    }

    #[test]
    #[serial]
    fn test_reap_collects_burst_of_exits() {
        let pids: Vec<Pid> = (0..8).map(spawn_exit).collect();
        // Let them all turn into zombies so a single cycle sees several.
        thread::sleep(Duration::from_millis(300));

        let got = reap_until(&pids);
        for (code, pid) in pids.iter().enumerate() {
            assert_eq!(got[pid], code as i32, "wrong status for pid {}", pid);
        }
    }

    #[test]
    #[serial]
    fn test_reap_reports_signal_deaths() {
        let mut child = Command::new("/bin/sleep")
            .arg("30")
            .spawn()
            .expect("failed to spawn sleep");
        let pid = Pid::from_raw(child.id() as i32);
        child.kill().unwrap();

        let got = reap_until(&[pid]);
        assert_eq!(got[&pid], 137);
    }

    #[test]
    #[serial]
    fn test_set_child_subreaper() {
        set_child_subreaper().unwrap();
        assert!(prctl::get_child_subreaper().unwrap());
    }
}
