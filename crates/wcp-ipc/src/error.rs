use std::io;

use thiserror::Error;
use wcp_common::ErrorCategory;

/// Failures while framing or parsing messages on one connection.
///
/// Every variant is fatal to the connection that produced it; callers close
/// the stream and discard its decoder.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid session name: {0}")]
    InvalidName(String),

    #[error("No wcp session found: {0}")]
    NotFound(String),

    #[error("Session {0} is not responding (stale socket)")]
    Stale(String),

    #[error("Failed to connect to session {name}: {source}")]
    ConnectionFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Failed to setup signal handler: {0}")]
    SignalSetup(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::InvalidName(_) => ErrorCategory::InvalidInput,
            ClientError::NotFound(_) | ClientError::Stale(_) => ErrorCategory::NotFound,
            ClientError::ConnectionFailed { .. }
            | ClientError::Protocol(_)
            | ClientError::Io(_) => ErrorCategory::External,
            ClientError::SignalSetup(_) => ErrorCategory::Internal,
        }
    }

    pub fn suggestion(&self) -> Option<String> {
        match self {
            ClientError::InvalidName(_) => Some(
                "Session names may only contain letters, digits, '_' and '-'.".to_string(),
            ),
            ClientError::NotFound(_) => {
                Some("Run 'wcp list' to see active sessions.".to_string())
            }
            ClientError::Stale(name) => Some(format!(
                "The daemon for '{}' is gone. Remove the socket with 'wcp kill {}'.",
                name, name
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_not_found_display() {
        let err = ClientError::NotFound("3000".to_string());
        assert_eq!(err.to_string(), "No wcp session found: 3000");
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn test_stale_suggests_kill() {
        let err = ClientError::Stale("api".to_string());
        let suggestion = err.suggestion().unwrap();
        assert!(suggestion.contains("wcp kill api"));
    }

    #[test]
    fn test_frame_too_large_display() {
        let err = ProtocolError::FrameTooLarge { len: 20, max: 10 };
        assert_eq!(
            err.to_string(),
            "Frame of 20 bytes exceeds the 10 byte limit"
        );
    }

    #[test]
    fn test_protocol_error_converts_to_client_error() {
        let err: ClientError = ProtocolError::FrameTooLarge { len: 2, max: 1 }.into();
        assert!(matches!(err, ClientError::Protocol(_)));
        assert_eq!(err.category(), ErrorCategory::External);
    }
}
