#![allow(dead_code)]

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use tempfile::TempDir;
use wcp_daemon::DaemonConfig;
use wcp_daemon::DaemonError;
use wcp_daemon::DaemonExit;
use wcp_daemon::DaemonHandle;
use wcp_daemon::DaemonOptions;
use wcp_daemon::SessionDaemon;
use wcp_ipc::encode;
use wcp_ipc::FrameStream;
use wcp_ipc::Message;
use wcp_ipc::MessageKind;
use wcp_ipc::SessionDirectory;

pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn test_config() -> DaemonConfig {
    DaemonConfig::default()
        .with_history_capacity(1000)
        .with_echo_output(false)
        .with_signal_handling(false)
        .with_endpoint_poll_interval(Duration::from_millis(20))
        .with_write_timeout(Duration::from_secs(2))
}

pub fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

/// A daemon running on a background thread in its own temp directory.
pub struct RunningDaemon {
    pub dir: TempDir,
    pub name: String,
    pub handle: DaemonHandle,
    runner: Option<JoinHandle<Result<DaemonExit, DaemonError>>>,
}

impl RunningDaemon {
    pub fn start(name: &str, command: Vec<String>) -> Self {
        let dir = TempDir::new().unwrap();
        Self::start_in(dir, name, command)
    }

    pub fn start_in(dir: TempDir, name: &str, command: Vec<String>) -> Self {
        Self::start_with(dir, name, command, test_config())
    }

    pub fn start_with(
        dir: TempDir,
        name: &str,
        command: Vec<String>,
        config: DaemonConfig,
    ) -> Self {
        let options = DaemonOptions::new(name, command)
            .with_directory(SessionDirectory::new(dir.path()))
            .with_config(config);
        let daemon = SessionDaemon::start(options).unwrap();
        let handle = daemon.handle();
        let runner = thread::spawn(move || daemon.run());
        Self {
            dir,
            name: name.to_string(),
            handle,
            runner: Some(runner),
        }
    }

    pub fn directory(&self) -> SessionDirectory {
        SessionDirectory::new(self.dir.path())
    }

    pub fn connect(&self) -> TestClient {
        let stream = self
            .directory()
            .endpoint(&self.name)
            .unwrap()
            .connect()
            .unwrap();
        TestClient::new(stream)
    }

    pub fn wait_for_history(&self, len: usize) {
        wait_until(|| self.handle.history_len() >= len);
    }

    pub fn stop(mut self) -> DaemonExit {
        self.handle.shutdown();
        self.join()
    }

    pub fn join(&mut self) -> DaemonExit {
        self.runner
            .take()
            .expect("daemon already joined")
            .join()
            .unwrap()
            .unwrap()
    }
}

impl Drop for RunningDaemon {
    fn drop(&mut self) {
        if let Some(runner) = self.runner.take() {
            self.handle.shutdown();
            let _ = runner.join();
        }
    }
}

pub struct TestClient {
    writer: UnixStream,
    frames: FrameStream<UnixStream>,
}

impl TestClient {
    pub fn new(stream: UnixStream) -> Self {
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        let writer = stream.try_clone().unwrap();
        Self {
            writer,
            frames: FrameStream::new(stream),
        }
    }

    pub fn next(&mut self) -> Option<Message> {
        self.frames.next().map(|item| item.unwrap())
    }

    /// Everything up to and including `replay-end`.
    pub fn read_replay(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(message) = self.next() {
            let done = message.kind == MessageKind::ReplayEnd;
            messages.push(message);
            if done {
                break;
            }
        }
        messages
    }

    /// Collects data payloads until `expected` has been seen in full.
    pub fn read_data_until(&mut self, expected: &str) -> String {
        let mut text = String::new();
        while !text.contains(expected) {
            match self.next() {
                Some(message) if message.kind == MessageKind::Data => text.push_str(&message.payload),
                Some(_) => {}
                None => break,
            }
        }
        text
    }

    pub fn send(&mut self, message: &Message) {
        self.writer.write_all(&encode(message).unwrap()).unwrap();
    }
}

pub fn wait_until<F: FnMut() -> bool>(mut condition: F) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {:?}", TIMEOUT);
        thread::sleep(Duration::from_millis(10));
    }
}
