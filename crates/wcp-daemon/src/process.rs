//! Child process supervision.
//!
//! The child runs in its own process group with all three standard streams
//! piped. Output arrives as [`ProcessEvent::Output`] chunks on a channel, one
//! reader thread per stream; a waiter thread reaps the child and sends a
//! single [`ProcessEvent::Exited`] after both streams are drained.
//!
//! Input goes through a bounded queue drained by a writer thread, so a child
//! that never reads its stdin cannot stall the caller.

use std::io;
use std::io::Read;
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::os::unix::process::ExitStatusExt;
use std::process::Child;
use std::process::ChildStdin;
use std::process::Command;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::TrySendError;
use tracing::debug;
use tracing::warn;
use wcp_common::mutex_lock_or_recover;

use crate::error::ProcessError;

const READ_CHUNK: usize = 4096;
/// Pending stdin chunks; anything beyond this is dropped.
const INPUT_QUEUE: usize = 256;
const EXIT_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Output { source: OutputSource, data: Vec<u8> },
    Exited { code: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Signal {
    #[default]
    Term,
    Kill,
}

impl Signal {
    pub fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Exit code of a reaped child; death by signal maps to `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => 1,
    }
}

pub struct ProcessSupervisor {
    pid: u32,
    input: Mutex<Option<Sender<Vec<u8>>>>,
    exited: Arc<AtomicBool>,
}

impl ProcessSupervisor {
    /// Starts `argv[0]` with the remaining arguments, without a shell.
    pub fn spawn<E>(argv: &[String], events: Sender<E>) -> Result<Self, ProcessError>
    where
        E: From<ProcessEvent> + Send + 'static,
    {
        let (program, args) = argv.split_first().ok_or(ProcessError::EmptyCommand)?;
        if program.is_empty() {
            return Err(ProcessError::EmptyCommand);
        }

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        let pid = child.id();
        let exited = Arc::new(AtomicBool::new(false));
        let input = match child.stdin.take() {
            Some(stdin) => Some(spawn_writer(stdin, pid, Arc::clone(&exited))?),
            None => None,
        };

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, OutputSource::Stdout, events.clone())?);
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, OutputSource::Stderr, events.clone())?);
        }
        spawn_waiter(child, readers, Arc::clone(&exited), events)?;

        debug!(pid, program = %program, "Child started");
        Ok(Self {
            pid,
            input: Mutex::new(input),
            exited,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Queues input for the child without blocking. Input is dropped when
    /// the queue is full or the child's stdin is gone.
    pub fn write_stdin(&self, bytes: &[u8]) {
        let mut input = mutex_lock_or_recover(&self.input);
        let Some(queue) = input.as_ref() else {
            return;
        };
        match queue.try_send(bytes.to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(pid = self.pid, len = bytes.len(), "Child input backlogged, dropping");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(pid = self.pid, "Child input closed");
                *input = None;
            }
        }
    }

    /// Closes the child's stdin once queued input has been written.
    pub fn close_stdin(&self) {
        mutex_lock_or_recover(&self.input).take();
    }

    /// Waits up to `timeout` for the child to be reaped.
    pub fn wait_exited(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.has_exited() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(EXIT_POLL);
        }
        true
    }

    /// Signals the child's process group, including descendants that outlive
    /// the leader.
    pub fn kill(&self, signal: Signal) {
        let pgid = self.pid as libc::pid_t;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(-pgid, signal.as_raw()) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                warn!(pid = self.pid, error = %err, "Failed to signal child");
            }
        }
    }
}

fn spawn_writer(
    mut stdin: ChildStdin,
    pid: u32,
    exited: Arc<AtomicBool>,
) -> Result<Sender<Vec<u8>>, ProcessError> {
    let (tx, rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = crossbeam_channel::bounded(INPUT_QUEUE);
    thread::Builder::new()
        .name("stdin-writer".to_string())
        .spawn(move || {
            for chunk in rx {
                if exited.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = stdin.write_all(&chunk).and_then(|()| stdin.flush()) {
                    debug!(pid, error = %e, "Child input closed");
                    break;
                }
            }
        })
        .map_err(|source| ProcessError::Thread {
            role: "stdin-writer",
            source,
        })?;
    Ok(tx)
}

fn spawn_reader<R, E>(
    mut pipe: R,
    source: OutputSource,
    events: Sender<E>,
) -> Result<JoinHandle<()>, ProcessError>
where
    R: Read + Send + 'static,
    E: From<ProcessEvent> + Send + 'static,
{
    let role = match source {
        OutputSource::Stdout => "stdout-reader",
        OutputSource::Stderr => "stderr-reader",
    };
    thread::Builder::new()
        .name(role.to_string())
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let event = ProcessEvent::Output {
                            source,
                            data: buf[..n].to_vec(),
                        };
                        if events.send(E::from(event)).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(?source, error = %e, "Output read failed");
                        break;
                    }
                }
            }
        })
        .map_err(|source| ProcessError::Thread { role, source })
}

fn spawn_waiter<E>(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    exited: Arc<AtomicBool>,
    events: Sender<E>,
) -> Result<(), ProcessError>
where
    E: From<ProcessEvent> + Send + 'static,
{
    thread::Builder::new()
        .name("child-waiter".to_string())
        .spawn(move || {
            let code = match child.wait() {
                Ok(status) => exit_code(status),
                Err(e) => {
                    warn!(error = %e, "Failed to wait for child");
                    1
                }
            };
            exited.store(true, Ordering::SeqCst);
            for reader in readers {
                let _ = reader.join();
            }
            debug!(code, "Child exited");
            let _ = events.send(E::from(ProcessEvent::Exited { code }));
        })
        .map(|_| ())
        .map_err(|source| ProcessError::Thread {
            role: "child-waiter",
            source,
        })
}
