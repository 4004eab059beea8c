//! The session daemon: one child process, one socket, many clients.
//!
//! Threads:
//! - accept loop, which replays history to each new client and registers it
//! - one reader per client, feeding inbound messages to the event queue
//! - child output readers and waiter (see [`crate::process`])
//! - endpoint watcher, which notices when the socket file disappears
//! - signal handler
//!
//! All of them report into a single event queue drained by [`SessionDaemon::run`].
//! History and the broadcaster share one lock so a replay followed by
//! registration can never miss or duplicate a live message.

use std::fs;
use std::io;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::MetadataExt;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use tracing::debug;
use tracing::info;
use tracing::warn;
use wcp_common::mutex_lock_or_recover;
use wcp_ipc::Endpoint;
use wcp_ipc::FrameStream;
use wcp_ipc::Message;
use wcp_ipc::MessageKind;
use wcp_ipc::SessionDirectory;
use wcp_ipc::Utf8Decoder;

use crate::broadcast::Broadcaster;
use crate::broadcast::Connection;
use crate::broadcast::ConnectionId;
use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::process::OutputSource;
use crate::process::ProcessEvent;
use crate::process::ProcessSupervisor;
use crate::process::Signal;
use crate::ring_buffer::RingBuffer;
use crate::signal_handler::SignalHandler;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);
/// How long the child gets to exit after SIGTERM before SIGKILL.
const CHILD_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub name: String,
    pub command: Vec<String>,
    pub directory: SessionDirectory,
    pub config: DaemonConfig,
}

impl DaemonOptions {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            directory: SessionDirectory::from_env(),
            config: DaemonConfig::from_env(),
        }
    }

    pub fn with_directory(mut self, directory: SessionDirectory) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_config(mut self, config: DaemonConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    ChildExited(i32),
    Signal(i32),
    EndpointRemoved,
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonExit {
    pub reason: ShutdownReason,
    /// Child exit code, `128 + signal` for a signal, otherwise 0.
    pub exit_code: i32,
}

impl DaemonExit {
    fn from_reason(reason: ShutdownReason) -> Self {
        let exit_code = match reason {
            ShutdownReason::ChildExited(code) => code,
            ShutdownReason::Signal(sig) => 128 + sig,
            ShutdownReason::EndpointRemoved | ShutdownReason::Requested => 0,
        };
        Self { reason, exit_code }
    }
}

#[derive(Debug)]
enum DaemonEvent {
    Child(ProcessEvent),
    Inbound { id: ConnectionId, message: Message },
    Signal(i32),
    EndpointRemoved,
    Shutdown,
}

impl From<ProcessEvent> for DaemonEvent {
    fn from(event: ProcessEvent) -> Self {
        DaemonEvent::Child(event)
    }
}

struct SessionState {
    history: RingBuffer<Message>,
    broadcaster: Broadcaster,
    closed: bool,
}

struct Shared {
    name: String,
    state: Mutex<DaemonState>,
    session: Mutex<SessionState>,
    events: Sender<DaemonEvent>,
    next_id: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: DaemonState) {
        *mutex_lock_or_recover(&self.state) = state;
        debug!(session = %self.name, ?state, "State changed");
    }
}

/// Cloneable view of a daemon for observers and tests.
#[derive(Clone)]
pub struct DaemonHandle {
    shared: Arc<Shared>,
}

impl DaemonHandle {
    pub fn state(&self) -> DaemonState {
        *mutex_lock_or_recover(&self.shared.state)
    }

    /// Asks the run loop to stop. Safe to call more than once.
    pub fn shutdown(&self) {
        let _ = self.shared.events.send(DaemonEvent::Shutdown);
    }

    pub fn history_len(&self) -> usize {
        mutex_lock_or_recover(&self.shared.session).history.len()
    }

    pub fn history(&self) -> Vec<Message> {
        mutex_lock_or_recover(&self.shared.session).history.to_vec()
    }

    pub fn client_count(&self) -> usize {
        mutex_lock_or_recover(&self.shared.session).broadcaster.len()
    }
}

pub struct SessionDaemon {
    endpoint: Endpoint,
    listener: UnixListener,
    socket_ino: Option<u64>,
    child: ProcessSupervisor,
    config: DaemonConfig,
    shared: Arc<Shared>,
    events: Receiver<DaemonEvent>,
}

struct Workers {
    accept: JoinHandle<()>,
    watcher: JoinHandle<()>,
    stop_watcher: Sender<()>,
    signals: Option<SignalHandler>,
}

impl SessionDaemon {
    /// Claims the socket and starts the child.
    ///
    /// Fails without leaving a socket behind if the name is taken by a live
    /// daemon or the command cannot be started. A socket left by a dead
    /// daemon is replaced.
    pub fn start(options: DaemonOptions) -> Result<Self, DaemonError> {
        let DaemonOptions {
            name,
            command,
            directory,
            config,
        } = options;

        let endpoint = directory
            .endpoint(&name)
            .map_err(|_| DaemonError::InvalidName(name.clone()))?;
        directory.ensure().map_err(|source| DaemonError::Directory {
            path: directory.root().display().to_string(),
            source,
        })?;

        if endpoint.exists() {
            if endpoint.is_alive() {
                return Err(DaemonError::AlreadyExists(name));
            }
            info!(session = %name, "Removing stale socket");
            endpoint.remove().map_err(|source| DaemonError::Bind {
                path: endpoint.path().display().to_string(),
                source,
            })?;
        }

        let listener = UnixListener::bind(endpoint.path()).map_err(|source| DaemonError::Bind {
            path: endpoint.path().display().to_string(),
            source,
        })?;
        let socket_ino = fs::symlink_metadata(endpoint.path())
            .ok()
            .map(|meta| meta.ino());

        let (tx, rx) = crossbeam_channel::unbounded();
        let child = match ProcessSupervisor::spawn(&command, tx.clone()) {
            Ok(child) => child,
            Err(e) => {
                drop(listener);
                remove_if_ours(endpoint.path(), socket_ino);
                return Err(DaemonError::Spawn(e));
            }
        };
        info!(session = %name, pid = child.pid(), "Session started");

        let shared = Arc::new(Shared {
            name,
            state: Mutex::new(DaemonState::Starting),
            session: Mutex::new(SessionState {
                history: RingBuffer::new(config.history_capacity),
                broadcaster: Broadcaster::new(),
                closed: false,
            }),
            events: tx,
            next_id: AtomicU64::new(1),
        });

        Ok(Self {
            endpoint,
            listener,
            socket_ino,
            child,
            config,
            shared,
            events: rx,
        })
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn socket_path(&self) -> &Path {
        self.endpoint.path()
    }

    pub fn child_pid(&self) -> u32 {
        self.child.pid()
    }

    /// Serves clients until the child exits, a signal arrives, the socket
    /// file is removed, or [`DaemonHandle::shutdown`] is called.
    pub fn run(self) -> Result<DaemonExit, DaemonError> {
        let workers = match self.spawn_workers() {
            Ok(workers) => workers,
            Err(e) => {
                self.stop_child();
                remove_if_ours(self.endpoint.path(), self.socket_ino);
                self.shared.set_state(DaemonState::Stopped);
                return Err(e);
            }
        };
        self.shared.set_state(DaemonState::Running);

        let mut stdout_text = Utf8Decoder::new();
        let mut stderr_text = Utf8Decoder::new();
        let reason = loop {
            let Ok(event) = self.events.recv() else {
                break ShutdownReason::Requested;
            };
            match event {
                DaemonEvent::Child(ProcessEvent::Output { source, data }) => {
                    let decoder = match source {
                        OutputSource::Stdout => &mut stdout_text,
                        OutputSource::Stderr => &mut stderr_text,
                    };
                    let text = decoder.push(&data);
                    self.record_output(&data, &text);
                }
                DaemonEvent::Child(ProcessEvent::Exited { code }) => {
                    break ShutdownReason::ChildExited(code);
                }
                DaemonEvent::Inbound { id, message } => self.handle_inbound(id, message),
                DaemonEvent::Signal(sig) => break ShutdownReason::Signal(sig),
                DaemonEvent::EndpointRemoved => break ShutdownReason::EndpointRemoved,
                DaemonEvent::Shutdown => break ShutdownReason::Requested,
            }
        };

        self.shutdown(reason, workers);
        Ok(DaemonExit::from_reason(reason))
    }

    fn spawn_workers(&self) -> Result<Workers, DaemonError> {
        let signals = if self.config.handle_signals {
            Some(SignalHandler::setup(
                self.shared.events.clone(),
                DaemonEvent::Signal,
            )?)
        } else {
            None
        };

        let accept_listener = self.listener.try_clone().map_err(|source| DaemonError::Thread {
            role: "accept",
            source,
        })?;
        let shared = Arc::clone(&self.shared);
        let write_timeout = self.config.write_timeout;
        let accept = thread::Builder::new()
            .name("accept".to_string())
            .spawn(move || accept_loop(accept_listener, shared, write_timeout))
            .map_err(|source| DaemonError::Thread {
                role: "accept",
                source,
            })?;

        let (stop_watcher, stop) = crossbeam_channel::bounded::<()>(1);
        let path = self.endpoint.path().to_path_buf();
        let ino = self.socket_ino;
        let interval = self.config.endpoint_poll_interval;
        let events = self.shared.events.clone();
        let watcher = thread::Builder::new()
            .name("endpoint-watcher".to_string())
            .spawn(move || watch_endpoint(path, ino, interval, stop, events))
            .map_err(|source| DaemonError::Thread {
                role: "endpoint-watcher",
                source,
            })?;

        Ok(Workers {
            accept,
            watcher,
            stop_watcher,
            signals,
        })
    }

    fn record_output(&self, raw: &[u8], text: &str) {
        if self.config.echo_output {
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(raw);
            let _ = stdout.flush();
        }
        if text.is_empty() {
            return;
        }

        let mut session = mutex_lock_or_recover(&self.shared.session);
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if !line.is_empty() {
                session.history.push(Message::data(format!("{}\n", line)));
            }
        }
        session.broadcaster.broadcast(&Message::data(text));
    }

    fn handle_inbound(&self, id: ConnectionId, message: Message) {
        match message.kind {
            MessageKind::Stdin => self.child.write_stdin(message.payload.as_bytes()),
            MessageKind::Data => {
                let mut session = mutex_lock_or_recover(&self.shared.session);
                session.history.push(message.clone());
                session.broadcaster.broadcast_from(&message, id);
            }
            MessageKind::ReplayStart | MessageKind::ReplayEnd => {
                debug!(%id, kind = ?message.kind, "Ignoring control message from client");
            }
        }
    }

    fn shutdown(&self, reason: ShutdownReason, workers: Workers) {
        self.shared.set_state(DaemonState::ShuttingDown);
        info!(session = %self.shared.name, ?reason, "Shutting down");

        self.stop_child();
        {
            let mut session = mutex_lock_or_recover(&self.shared.session);
            session.closed = true;
            session.broadcaster.close_all();
        }

        // SAFETY: the descriptor stays owned by `self.listener` for the whole call.
        unsafe {
            libc::shutdown(self.listener.as_raw_fd(), libc::SHUT_RDWR);
        }
        if is_ours(self.endpoint.path(), self.socket_ino) {
            let _ = UnixStream::connect(self.endpoint.path());
        }
        if workers.accept.join().is_err() {
            warn!("Accept thread panicked");
        }

        drop(workers.stop_watcher);
        let _ = workers.watcher.join();
        if let Some(signals) = workers.signals {
            signals.close();
        }

        remove_if_ours(self.endpoint.path(), self.socket_ino);
        self.shared.set_state(DaemonState::Stopped);
        info!(session = %self.shared.name, "Stopped");
    }

    fn stop_child(&self) {
        self.child.close_stdin();
        self.child.kill(Signal::Term);
        if !self.child.wait_exited(CHILD_GRACE) {
            warn!(pid = self.child.pid(), "Child ignored SIGTERM, killing");
            self.child.kill(Signal::Kill);
            self.child.wait_exited(CHILD_GRACE);
        }
    }
}

/// A daemon dropped without reaching [`SessionDaemon::run`]'s shutdown still
/// releases its child and socket.
impl Drop for SessionDaemon {
    fn drop(&mut self) {
        if *mutex_lock_or_recover(&self.shared.state) == DaemonState::Stopped {
            return;
        }
        debug!(session = %self.shared.name, "Dropped before shutdown, cleaning up");
        self.stop_child();
        remove_if_ours(self.endpoint.path(), self.socket_ino);
        self.shared.set_state(DaemonState::Stopped);
    }
}

fn accept_loop(listener: UnixListener, shared: Arc<Shared>, write_timeout: Duration) {
    for incoming in listener.incoming() {
        if mutex_lock_or_recover(&shared.session).closed {
            break;
        }
        match incoming {
            Ok(stream) => {
                if let Err(e) = admit(&shared, stream, write_timeout) {
                    debug!(error = %e, "Failed to admit client");
                }
            }
            Err(e) => {
                debug!(error = %e, "Accept failed");
                thread::sleep(ACCEPT_RETRY_DELAY);
            }
        }
    }
    debug!("Accept loop finished");
}

/// Replays history to a new client and registers it, atomically with
/// respect to live output.
fn admit(shared: &Arc<Shared>, stream: UnixStream, write_timeout: Duration) -> io::Result<()> {
    let id = ConnectionId(shared.next_id.fetch_add(1, Ordering::Relaxed));
    let connection = Connection::new(id, stream, write_timeout)?;
    let reader_stream = connection.try_clone_stream()?;

    {
        let mut session = mutex_lock_or_recover(&shared.session);
        if session.closed {
            connection.shutdown();
            return Ok(());
        }
        let SessionState {
            history,
            broadcaster,
            ..
        } = &mut *session;

        let mut delivered = broadcaster.send_to(&connection, &Message::replay_start(history.len()));
        for message in history.iter() {
            if !delivered {
                break;
            }
            delivered = broadcaster.send_to(&connection, message);
        }
        if delivered {
            delivered = broadcaster.send_to(&connection, &Message::replay_end());
        }
        if !delivered {
            return Ok(());
        }
        debug!(%id, replayed = history.len(), "Client connected");
        broadcaster.add(connection);
    }

    let reader_shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("client-{}", id.0))
        .spawn(move || read_client(id, reader_stream, reader_shared));
    if let Err(e) = spawned {
        warn!(%id, error = %e, "Failed to start client reader");
        mutex_lock_or_recover(&shared.session).broadcaster.remove(id);
    }
    Ok(())
}

fn read_client(id: ConnectionId, stream: UnixStream, shared: Arc<Shared>) {
    for item in FrameStream::new(stream) {
        match item {
            Ok(message) => {
                if shared
                    .events
                    .send(DaemonEvent::Inbound { id, message })
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                debug!(%id, error = %e, "Client stream failed");
                break;
            }
        }
    }
    mutex_lock_or_recover(&shared.session).broadcaster.remove(id);
    debug!(%id, "Client disconnected");
}

fn watch_endpoint(
    path: PathBuf,
    ino: Option<u64>,
    interval: Duration,
    stop: Receiver<()>,
    events: Sender<DaemonEvent>,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
        if !is_ours(&path, ino) {
            info!(path = %path.display(), "Socket removed");
            let _ = events.send(DaemonEvent::EndpointRemoved);
            return;
        }
    }
}

/// The socket file still exists and is the one this daemon bound.
fn is_ours(path: &Path, ino: Option<u64>) -> bool {
    match fs::symlink_metadata(path) {
        Ok(meta) => ino.is_none_or(|ino| meta.ino() == ino),
        Err(_) => false,
    }
}

fn remove_if_ours(path: &Path, ino: Option<u64>) {
    if !is_ours(path, ino) {
        return;
    }
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove socket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(dir: &TempDir, name: &str, command: &[&str]) -> DaemonOptions {
        DaemonOptions::new(name, command.iter().map(|s| s.to_string()).collect())
            .with_directory(SessionDirectory::new(dir.path()))
            .with_config(
                DaemonConfig::default()
                    .with_echo_output(false)
                    .with_signal_handling(false)
                    .with_endpoint_poll_interval(Duration::from_millis(20)),
            )
    }

    #[test]
    fn test_exit_code_from_reason() {
        assert_eq!(
            DaemonExit::from_reason(ShutdownReason::ChildExited(2)).exit_code,
            2
        );
        assert_eq!(DaemonExit::from_reason(ShutdownReason::Signal(15)).exit_code, 143);
        assert_eq!(DaemonExit::from_reason(ShutdownReason::Requested).exit_code, 0);
    }

    #[test]
    fn test_invalid_name_rejected_before_binding() {
        let tmp = TempDir::new().unwrap();
        let err = SessionDaemon::start(options(&tmp, "bad name", &["true"]))
            .err()
            .unwrap();
        assert!(matches!(err, DaemonError::InvalidName(_)));
    }

    #[test]
    fn test_spawn_failure_leaves_no_socket() {
        let tmp = TempDir::new().unwrap();
        let err = SessionDaemon::start(options(&tmp, "x", &["wcp-no-such-program"]))
            .err()
            .unwrap();
        assert!(matches!(err, DaemonError::Spawn(_)));
        assert!(!tmp.path().join("wcp-x.sock").exists());
    }

    #[test]
    fn test_child_exit_stops_daemon() {
        let tmp = TempDir::new().unwrap();
        let daemon = SessionDaemon::start(options(&tmp, "short", &["sh", "-c", "echo a; exit 4"]))
            .unwrap();
        let handle = daemon.handle();
        assert_eq!(handle.state(), DaemonState::Starting);

        let exit = daemon.run().unwrap();
        assert_eq!(exit.reason, ShutdownReason::ChildExited(4));
        assert_eq!(handle.state(), DaemonState::Stopped);
        assert_eq!(handle.history_len(), 1);
        assert_eq!(handle.history()[0].payload, "a\n");
        assert!(!tmp.path().join("wcp-short.sock").exists());
    }

    #[test]
    fn test_drop_without_run_releases_child_and_socket() {
        let tmp = TempDir::new().unwrap();
        let daemon = SessionDaemon::start(options(&tmp, "dropped", &["sleep", "30"])).unwrap();
        let pid = daemon.child_pid() as libc::pid_t;
        let socket = daemon.socket_path().to_path_buf();
        let handle = daemon.handle();
        assert!(socket.exists());

        drop(daemon);

        assert!(!socket.exists());
        assert_eq!(handle.state(), DaemonState::Stopped);
        // SAFETY: signal 0 only checks for existence.
        assert_ne!(unsafe { libc::kill(pid, 0) }, 0, "child still running");
    }

    #[test]
    fn test_is_ours_tracks_inode() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("token");
        fs::write(&path, b"").unwrap();
        let ino = fs::symlink_metadata(&path).unwrap().ino();
        assert!(is_ours(&path, Some(ino)));

        fs::remove_file(&path).unwrap();
        assert!(!is_ours(&path, Some(ino)));
        assert!(!is_ours(&path, None));
    }
}
