//! SIGINT/SIGTERM delivery into the daemon's event queue.

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Handle;
use signal_hook::iterator::Signals;
use std::thread::{self, JoinHandle};
use tracing::info;

use crossbeam_channel::Sender;

use crate::error::DaemonError;

/// Forwards the first termination signal as an event, then stops.
pub struct SignalHandler {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalHandler {
    /// The received signal number is wrapped by `to_event` and sent on
    /// `events`. [`close`](Self::close) stops the thread.
    pub fn setup<E, F>(events: Sender<E>, to_event: F) -> Result<Self, DaemonError>
    where
        E: Send + 'static,
        F: Fn(i32) -> E + Send + 'static,
    {
        let mut signals =
            Signals::new([SIGINT, SIGTERM]).map_err(|e| DaemonError::SignalSetup(e.to_string()))?;
        let handle = signals.handle();

        let thread = thread::Builder::new()
            .name("signal-handler".to_string())
            .spawn(move || {
                if let Some(sig) = signals.forever().next() {
                    info!(signal = sig, "Received signal, initiating graceful shutdown");
                    let _ = events.send(to_event(sig));
                }
            })
            .map_err(|e| {
                DaemonError::SignalSetup(format!("failed to spawn signal handler: {}", e))
            })?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn close(mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Conventional name for the signals the handler listens to.
pub fn signal_name(sig: i32) -> &'static str {
    match sig {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        _ => "signal",
    }
}
