//! Read-only, label-prefixed viewing of one session among several.

use std::io::Write;
use std::sync::Mutex;

use tracing::debug;
use wcp_common::mutex_lock_or_recover;
use wcp_common::session_label;
use wcp_common::Colors;

use crate::client::SessionClient;
use crate::protocol::MessageKind;
use crate::socket::SessionDirectory;

/// Splits streamed text into complete lines, each prefixed with a label.
///
/// Text after the last newline is held until a later chunk finishes the
/// line or [`LineLabeler::finish`] flushes it.
#[derive(Debug)]
pub struct LineLabeler {
    label: String,
    pending: String,
}

impl LineLabeler {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pending: String::new(),
        }
    }

    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);
        let Some(last_newline) = self.pending.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        complete
            .lines()
            .map(|line| format!("{} {}", self.label, line))
            .collect()
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(format!("{} {}", self.label, line.trim_end_matches('\r')))
    }
}

fn emit<W: Write>(out: &Mutex<W>, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    let mut out = mutex_lock_or_recover(out);
    for line in lines {
        let _ = writeln!(out, "{}", line);
    }
    let _ = out.flush();
}

/// Streams one session into a shared writer until it closes.
///
/// Failures to connect print a single labeled line; nothing is returned to
/// the caller so one bad session never stops the others.
pub fn connect_watch<W: Write>(dir: &SessionDirectory, name: &str, index: usize, out: &Mutex<W>) {
    let label = session_label(name, index);

    let client = match SessionClient::connect(dir, name) {
        Ok(client) => client,
        Err(e) => {
            emit(out, &[format!("{} {}", label, Colors::error(&e.to_string()))]);
            return;
        }
    };
    let messages = match client.messages() {
        Ok(messages) => messages,
        Err(e) => {
            emit(out, &[format!("{} {}", label, Colors::error(&e.to_string()))]);
            return;
        }
    };

    let mut labeler = LineLabeler::new(label);
    for item in messages {
        match item {
            Ok(message) if message.kind == MessageKind::Data => {
                let lines = labeler.push(&message.payload);
                emit(out, &lines);
            }
            Ok(_) => {}
            Err(e) => {
                debug!(session = name, error = %e, "Watch stream ended");
                break;
            }
        }
    }
    if let Some(line) = labeler.finish() {
        emit(out, &[line]);
    }
    client.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode;
    use crate::protocol::Message;
    use std::os::unix::net::UnixListener;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_labeler_buffers_partial_lines() {
        let mut labeler = LineLabeler::new("[api]");
        assert!(labeler.push("hel").is_empty());
        assert_eq!(labeler.push("lo\nwor"), vec!["[api] hello".to_string()]);
        assert_eq!(
            labeler.push("ld\r\nnext\n"),
            vec!["[api] world".to_string(), "[api] next".to_string()]
        );
        assert_eq!(labeler.finish(), None);
    }

    #[test]
    fn test_labeler_flushes_remainder() {
        let mut labeler = LineLabeler::new("[web]");
        labeler.push("tail without newline");
        assert_eq!(
            labeler.finish(),
            Some("[web] tail without newline".to_string())
        );
    }

    #[test]
    fn test_labeler_keeps_blank_lines() {
        let mut labeler = LineLabeler::new("[x]");
        assert_eq!(
            labeler.push("a\n\nb\n"),
            vec!["[x] a".to_string(), "[x] ".to_string(), "[x] b".to_string()]
        );
    }

    #[test]
    fn test_watch_missing_session_prints_diagnostic() {
        wcp_common::color_init(true);
        let tmp = TempDir::new().unwrap();
        let dir = SessionDirectory::new(tmp.path());
        let out = Mutex::new(Vec::new());
        connect_watch(&dir, "ghost", 0, &out);
        let text = String::from_utf8(out.into_inner().unwrap()).unwrap();
        assert_eq!(text, "[ghost] No wcp session found: ghost\n");
    }

    #[test]
    fn test_watch_labels_replay_and_live() {
        wcp_common::color_init(true);
        let tmp = TempDir::new().unwrap();
        let dir = SessionDirectory::new(tmp.path());
        let listener = UnixListener::bind(dir.socket_path("api")).unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            for message in [
                Message::replay_start(1),
                Message::new(MessageKind::Data, "old\n"),
                Message::replay_end(),
                Message::new(MessageKind::Data, "new li"),
                Message::new(MessageKind::Data, "ne\npartial"),
            ] {
                stream.write_all(&encode(&message).unwrap()).unwrap();
            }
        });

        let out = Mutex::new(Vec::new());
        connect_watch(&dir, "api", 1, &out);
        server.join().unwrap();

        let text = String::from_utf8(out.into_inner().unwrap()).unwrap();
        assert_eq!(text, "[api] old\n[api] new line\n[api] partial\n");
    }
}
