//! Errors raised while starting or running a session daemon.

use std::io;

use thiserror::Error;
use wcp_common::ErrorCategory;

/// Failures to start the supervised child.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("No command given")]
    EmptyCommand,
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to start {role} thread: {source}")]
    Thread {
        role: &'static str,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProcessError::EmptyCommand => ErrorCategory::InvalidInput,
            ProcessError::Spawn { .. } => ErrorCategory::External,
            ProcessError::Thread { .. } => ErrorCategory::Internal,
        }
    }

    /// The program could not be found or executed at all.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, ProcessError::Spawn { .. })
    }
}

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Session '{0}' is already running")]
    AlreadyExists(String),
    #[error("Invalid session name: {0}")]
    InvalidName(String),
    #[error("Failed to prepare session directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to bind socket {path}: {source}")]
    Bind {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Spawn(#[from] ProcessError),
    #[error("Failed to setup signal handler: {0}")]
    SignalSetup(String),
    #[error("Failed to start {role} thread: {source}")]
    Thread {
        role: &'static str,
        #[source]
        source: io::Error,
    },
}

impl DaemonError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DaemonError::AlreadyExists(_) => ErrorCategory::AlreadyExists,
            DaemonError::InvalidName(_) => ErrorCategory::InvalidInput,
            DaemonError::Directory { .. } | DaemonError::Bind { .. } => ErrorCategory::External,
            DaemonError::Spawn(e) => match e {
                ProcessError::EmptyCommand => ErrorCategory::InvalidInput,
                _ => ErrorCategory::NotFound,
            },
            DaemonError::SignalSetup(_) | DaemonError::Thread { .. } => ErrorCategory::Internal,
        }
    }

    pub fn suggestion(&self) -> Option<String> {
        match self {
            DaemonError::AlreadyExists(name) => Some(format!(
                "Attach with 'wcp connect {}' or stop it with 'wcp kill {}'.",
                name, name
            )),
            DaemonError::InvalidName(_) => Some(
                "Session names may only contain letters, digits, '_' and '-'.".to_string(),
            ),
            DaemonError::Directory { .. } | DaemonError::Bind { .. } => {
                Some("Check that the session directory (WCP_DIR) is writable.".to_string())
            }
            DaemonError::Spawn(ProcessError::EmptyCommand) => {
                Some("Pass the command after '--', e.g. 'wcp create dev -- npm run dev'.".to_string())
            }
            DaemonError::Spawn(ProcessError::Spawn { .. }) => {
                Some("Check that the command exists and is on PATH.".to_string())
            }
            DaemonError::Spawn(ProcessError::Thread { .. })
            | DaemonError::SignalSetup(_)
            | DaemonError::Thread { .. } => {
                Some("Check system thread limits (ulimit -u).".to_string())
            }
        }
    }
}
