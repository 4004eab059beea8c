//! Length-prefixed message framing.
//!
//! A frame is a 4 byte big-endian body length followed by a UTF-8 JSON body:
//!
//! ```text
//! {"type":"data","payload":"hello\n","timestamp":1700000000000}
//! ```
//!
//! `timestamp` is advisory and omitted when absent.

use std::io::Read;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ProtocolError;

const HEADER_LEN: usize = 4;

/// Upper bound on a single frame body accepted by [`MessageReader`].
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Data,
    ReplayStart,
    ReplayEnd,
    Stdin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Message {
    pub fn new(kind: MessageKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
            timestamp: None,
        }
    }

    /// Output text, stamped with the current wall clock.
    pub fn data(payload: impl Into<String>) -> Self {
        Self::new(MessageKind::Data, payload).with_timestamp(now_millis())
    }

    pub fn stdin(payload: impl Into<String>) -> Self {
        Self::new(MessageKind::Stdin, payload)
    }

    pub fn replay_start(count: usize) -> Self {
        Self::new(MessageKind::ReplayStart, count.to_string())
    }

    pub fn replay_end() -> Self {
        Self::new(MessageKind::ReplayEnd, "")
    }

    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    /// Parsed count carried by a `replay-start` message.
    pub fn replay_count(&self) -> Option<usize> {
        match self.kind {
            MessageKind::ReplayStart => self.payload.trim().parse().ok(),
            _ => None,
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Encodes one message as a complete frame.
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;
    let len = u32::try_from(body.len()).map_err(|_| ProtocolError::FrameTooLarge {
        len: body.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental frame decoder for a single connection.
///
/// Bytes may arrive in any chunking; partial frames stay buffered until the
/// rest shows up. After an error the buffer is discarded and the connection
/// should be closed.
#[derive(Debug)]
pub struct MessageReader {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl Default for MessageReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageReader {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_len,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Message>, ProtocolError> {
        self.buffer.extend_from_slice(bytes);

        let mut messages = Vec::new();
        let mut offset = 0;
        let result = loop {
            let remaining = &self.buffer[offset..];
            if remaining.len() < HEADER_LEN {
                break Ok(());
            }
            let mut header = [0u8; HEADER_LEN];
            header.copy_from_slice(&remaining[..HEADER_LEN]);
            let len = u32::from_be_bytes(header) as usize;
            if len > self.max_frame_len {
                break Err(ProtocolError::FrameTooLarge {
                    len,
                    max: self.max_frame_len,
                });
            }
            if remaining.len() < HEADER_LEN + len {
                break Ok(());
            }
            let body = &remaining[HEADER_LEN..HEADER_LEN + len];
            match serde_json::from_slice::<Message>(body) {
                Ok(message) => messages.push(message),
                Err(e) => break Err(ProtocolError::Malformed(e)),
            }
            offset += HEADER_LEN + len;
        };

        match result {
            Ok(()) => {
                self.buffer.drain(..offset);
                Ok(messages)
            }
            Err(e) => {
                self.buffer.clear();
                Err(e)
            }
        }
    }

    /// Bytes of an incomplete frame still waiting for more input.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Blocking iterator of messages read from a byte stream.
///
/// Ends at EOF. After the first error it yields that error and then stops.
pub struct FrameStream<R> {
    inner: R,
    reader: MessageReader,
    queue: std::collections::VecDeque<Message>,
    buf: Box<[u8]>,
    done: bool,
}

impl<R: Read> FrameStream<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            reader: MessageReader::new(),
            queue: std::collections::VecDeque::new(),
            buf: vec![0u8; 8192].into_boxed_slice(),
            done: false,
        }
    }
}

impl<R: Read> Iterator for FrameStream<R> {
    type Item = Result<Message, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(message) = self.queue.pop_front() {
                return Some(Ok(message));
            }
            if self.done {
                return None;
            }
            let n = match self.inner.read(&mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(ProtocolError::Io(e)));
                }
            };
            match self.reader.feed(&self.buf[..n]) {
                Ok(messages) => self.queue.extend(messages),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Converts byte chunks to text without splitting multi-byte characters.
///
/// An incomplete UTF-8 sequence at the end of a chunk is held back until the
/// next chunk completes it. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let keep = incomplete_tail_len(&self.pending);
        let split = self.pending.len() - keep;
        let text = String::from_utf8_lossy(&self.pending[..split]).into_owned();
        self.pending.drain(..split);
        text
    }

    /// Flushes whatever is left, replacing an unfinished sequence.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of a trailing, possibly valid but unfinished UTF-8 sequence.
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        let b = bytes[i];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = if b & 0b1110_0000 == 0b1100_0000 {
            2
        } else if b & 0b1111_0000 == 0b1110_0000 {
            3
        } else if b & 0b1111_1000 == 0b1111_0000 {
            4
        } else {
            return 0;
        };
        let have = bytes.len() - i;
        return if have < needed { have } else { 0 };
    }
    0
}
