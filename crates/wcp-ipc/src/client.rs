use std::io;
use std::io::Read;
use std::io::Write;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;
use tracing::debug;
use wcp_common::Colors;

use crate::error::ClientError;
use crate::error::ProtocolError;
use crate::protocol::encode;
use crate::protocol::FrameStream;
use crate::protocol::Message;
use crate::protocol::MessageKind;
use crate::protocol::Utf8Decoder;
use crate::socket::SessionDirectory;

const INPUT_CHUNK: usize = 1024;

/// Why an interactive session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// The daemon closed the stream.
    SessionClosed,
    /// Reading failed or the daemon sent something undecodable.
    ConnectionLost,
    /// The user pressed Ctrl-C.
    Interrupted,
}

impl Disconnect {
    pub fn message(&self) -> &'static str {
        match self {
            Disconnect::SessionClosed => "Session closed",
            Disconnect::ConnectionLost => "Connection lost",
            Disconnect::Interrupted => "Disconnecting...",
        }
    }
}

/// Prints replay banners around buffered history and passes data through.
#[derive(Debug, Default)]
pub struct ReplayRenderer {
    banner_shown: bool,
}

impl ReplayRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render<W: Write>(&mut self, message: &Message, out: &mut W) -> io::Result<()> {
        match message.kind {
            MessageKind::ReplayStart => {
                let count = message.replay_count().unwrap_or(0);
                if count > 0 {
                    writeln!(
                        out,
                        "{}",
                        Colors::warning(&format!("--- Replaying {} buffered lines ---", count))
                    )?;
                    self.banner_shown = true;
                }
            }
            MessageKind::ReplayEnd => {
                if self.banner_shown {
                    writeln!(out, "{}", Colors::warning("--- Live stream ---"))?;
                    writeln!(out)?;
                    self.banner_shown = false;
                }
            }
            MessageKind::Data => out.write_all(message.payload.as_bytes())?,
            MessageKind::Stdin => {}
        }
        out.flush()
    }
}

/// One connection to a running session.
pub struct SessionClient {
    name: String,
    stream: UnixStream,
}

impl SessionClient {
    pub fn connect(dir: &SessionDirectory, name: &str) -> Result<Self, ClientError> {
        let endpoint = dir.endpoint(name)?;
        let stream = endpoint.connect()?;
        debug!(session = name, "Connected");
        Ok(Self {
            name: name.to_string(),
            stream,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&self, message: &Message) -> Result<(), ClientError> {
        let frame = encode(message)?;
        (&self.stream).write_all(&frame)?;
        Ok(())
    }

    /// Iterator over messages arriving from the daemon.
    pub fn messages(&self) -> Result<FrameStream<UnixStream>, ClientError> {
        Ok(FrameStream::new(self.stream.try_clone()?))
    }

    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Renders replay and live output until the stream ends.
    pub fn render<W: Write>(&self, out: &mut W) -> Result<Disconnect, ClientError> {
        let mut renderer = ReplayRenderer::new();
        for item in self.messages()? {
            match item {
                Ok(message) => {
                    if let Err(e) = renderer.render(&message, out) {
                        debug!(session = %self.name, error = %e, "Output closed");
                        return Ok(Disconnect::ConnectionLost);
                    }
                }
                Err(e) => {
                    debug!(session = %self.name, error = %e, "Stream failed");
                    return Ok(Disconnect::ConnectionLost);
                }
            }
        }
        Ok(Disconnect::SessionClosed)
    }

    /// Sends every chunk read from `input` as a `stdin` message.
    ///
    /// Runs on a detached thread that ends at input EOF or when the
    /// connection refuses writes.
    pub fn forward_input<R>(&self, input: R) -> Result<thread::JoinHandle<()>, ClientError>
    where
        R: Read + Send + 'static,
    {
        let stream = self.stream.try_clone()?;
        let name = self.name.clone();
        thread::Builder::new()
            .name("input-forwarder".to_string())
            .spawn(move || {
                if let Err(e) = forward_chunks(input, stream) {
                    debug!(session = %name, error = %e, "Input forwarding stopped");
                }
            })
            .map_err(ClientError::Io)
    }

    /// Interactive attach: replay, live output, keystrokes back, Ctrl-C to
    /// leave.
    pub fn run_interactive<R, W>(self, input: R, out: &mut W) -> Result<Disconnect, ClientError>
    where
        R: Read + Send + 'static,
        W: Write,
    {
        let interrupted = Arc::new(AtomicBool::new(false));
        let mut signals =
            Signals::new([SIGINT]).map_err(|e| ClientError::SignalSetup(e.to_string()))?;
        let signal_handle = signals.handle();
        let watcher = {
            let stream = self.stream.try_clone()?;
            let interrupted = Arc::clone(&interrupted);
            thread::Builder::new()
                .name("client-signals".to_string())
                .spawn(move || {
                    if signals.forever().next().is_some() {
                        interrupted.store(true, Ordering::SeqCst);
                        let _ = stream.shutdown(Shutdown::Both);
                    }
                })
                .map_err(ClientError::Io)?
        };

        let _forwarder = self.forward_input(input)?;
        let result = self.render(out);

        signal_handle.close();
        let _ = watcher.join();
        self.close();

        let reason = result?;
        let reason = if interrupted.load(Ordering::SeqCst) {
            Disconnect::Interrupted
        } else {
            reason
        };
        writeln!(out)?;
        writeln!(out, "{}", Colors::dim(reason.message()))?;
        out.flush()?;
        Ok(reason)
    }
}

fn forward_chunks<R: Read>(mut input: R, mut stream: UnixStream) -> Result<(), ProtocolError> {
    let mut decoder = Utf8Decoder::new();
    let mut buf = [0u8; INPUT_CHUNK];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        let text = decoder.push(&buf[..n]);
        if text.is_empty() {
            continue;
        }
        stream.write_all(&encode(&Message::stdin(text))?)?;
    }
    let rest = decoder.finish();
    if !rest.is_empty() {
        stream.write_all(&encode(&Message::stdin(rest))?)?;
    }
    Ok(())
}
