use serial_test::serial;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct Runtime {
    root: TempDir,
    bundle: TempDir,
    tools: TempDir,
    exit_channel: &'static str,
}

impl Runtime {
    fn new(exit_channel: &'static str, runtime_body: &str) -> Self {
        let rt = Self {
            root: TempDir::new().expect("Failed to create state root"),
            bundle: TempDir::new().expect("Failed to create bundle dir"),
            tools: TempDir::new().expect("Failed to create tools dir"),
            exit_channel,
        };
        let script = rt.runtime_path();
        fs::write(&script, format!("#!/bin/sh\n{}\n", runtime_body)).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        rt
    }

    fn runtime_path(&self) -> PathBuf {
        self.tools.path().join("fake-runc")
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_ctr-runtime"))
            .env("CTR_RUNTIME_ROOT", self.root.path())
            .env("CTR_SHIM_BINARY", env!("CARGO_BIN_EXE_containerd-shim"))
            .env("CTR_RUNTIME_BINARY", self.runtime_path())
            .env("CTR_EXIT_CHANNEL", self.exit_channel)
            .env("CTR_SHIM_CONFIG", "/nonexistent/ctr-shim.conf")
            .args(args)
            .output()
            .expect("Failed to run ctr-runtime")
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "{:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    fn bundle(&self) -> &Path {
        self.bundle.path()
    }
}

#[test]
#[serial]
fn test_full_lifecycle_pipe_channel() {
    let rt = Runtime::new("pipe", "kill -9 $$");
    let bundle = rt.bundle().to_str().unwrap().to_string();

    let created = rt.run_ok(&["create", "c1", "--bundle", &bundle]);
    assert!(created.contains("c1"));

    let state: serde_json::Value = serde_json::from_str(&rt.run_ok(&["state", "c1"])).unwrap();
    assert_eq!(state["status"], "created");

    rt.run_ok(&["start", "c1"]);
    assert_eq!(rt.run_ok(&["wait", "c1"]).trim(), "137");

    let state: serde_json::Value = serde_json::from_str(&rt.run_ok(&["state", "c1"])).unwrap();
    assert_eq!(state["status"], "stopped");
    assert_eq!(state["exit_status"], 137);

    rt.run_ok(&["delete", "c1"]);
    assert!(!rt.root.path().join("c1").exists());
}

#[test]
#[serial]
fn test_wait_from_separate_invocation_lock_channel() {
    let rt = Runtime::new("lock", "sleep 0.3\nexit 9");
    let bundle = rt.bundle().to_str().unwrap().to_string();

    rt.run_ok(&["create", "c2", "--bundle", &bundle]);
    rt.run_ok(&["start", "c2"]);
    // The starting invocation has exited; the shim alone holds the lock now.
    assert_eq!(rt.run_ok(&["wait", "c2"]).trim(), "9");
}

#[test]
#[serial]
fn test_create_twice_fails() {
    let rt = Runtime::new("pipe", "exit 0");
    let bundle = rt.bundle().to_str().unwrap().to_string();

    rt.run_ok(&["create", "dup", "--bundle", &bundle]);
    let second = rt.run(&["create", "dup", "--bundle", &bundle]);
    assert!(!second.status.success());
    assert!(String::from_utf8_lossy(&second.stderr).contains("already exists"));
}

#[test]
#[serial]
fn test_start_unknown_container_fails() {
    let rt = Runtime::new("pipe", "exit 0");
    let output = rt.run(&["start", "ghost"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
#[serial]
fn test_wait_on_unstarted_container_fails() {
    let rt = Runtime::new("pipe", "exit 0");
    let bundle = rt.bundle().to_str().unwrap().to_string();
    rt.run_ok(&["create", "idle", "--bundle", &bundle]);

    let output = rt.run(&["wait", "idle"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("has not been started"));

    rt.run_ok(&["delete", "idle"]);
}

#[test]
#[serial]
fn test_rejects_unknown_exit_channel() {
    let rt = Runtime::new("carrier-pigeon", "exit 0");
    let bundle = rt.bundle().to_str().unwrap().to_string();
    rt.run_ok(&["create", "c3", "--bundle", &bundle]);

    let output = rt.run(&["start", "c3"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid configuration"));
}
