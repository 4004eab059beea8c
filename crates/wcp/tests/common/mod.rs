#![allow(dead_code)]

use std::os::unix::net::UnixStream;
use std::path::Path;
use std::process::Child;
use std::process::Stdio;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use assert_cmd::Command;
use tempfile::TempDir;

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn wcp_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("wcp"))
}

/// Isolated session directory and working directory for one test.
pub struct TestEnv {
    pub sessions: TempDir,
    pub project: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            sessions: TempDir::new().unwrap(),
            project: TempDir::new().unwrap(),
        }
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = wcp_cmd();
        cmd.env("WCP_DIR", self.sessions.path())
            .env("WCP_ENDPOINT_POLL_MS", "20")
            .env_remove("RUST_LOG")
            .env_remove("WCP_LOG")
            .current_dir(self.project.path())
            .timeout(TIMEOUT);
        cmd
    }

    pub fn socket_path(&self, name: &str) -> std::path::PathBuf {
        self.sessions.path().join(format!("wcp-{}.sock", name))
    }

    /// Starts `wcp <name> -- <command...>` in the background and waits until
    /// its socket accepts connections.
    pub fn spawn_session(&self, name: &str, command: &[&str]) -> Child {
        let mut args = vec![name, "--"];
        args.extend_from_slice(command);
        let child = std::process::Command::new(assert_cmd::cargo::cargo_bin!("wcp"))
            .args(&args)
            .env("WCP_DIR", self.sessions.path())
            .env("WCP_ENDPOINT_POLL_MS", "20")
            .current_dir(self.project.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let socket = self.socket_path(name);
        wait_until(|| is_alive(&socket));
        child
    }
}

pub fn is_alive(path: &Path) -> bool {
    UnixStream::connect(path).is_ok()
}

pub fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {:?}", TIMEOUT);
        thread::sleep(Duration::from_millis(20));
    }
}

pub fn with_timeout<F, T>(duration: Duration, f: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = f();
        let _ = tx.send(result);
    });
    rx.recv_timeout(duration).ok()
}

/// Waits for a background `wcp` process and returns its exit code.
pub fn wait_for_exit(mut child: Child) -> Option<i32> {
    with_timeout(TIMEOUT, move || child.wait().ok().and_then(|status| status.code())).flatten()
}
