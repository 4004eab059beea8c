//! Errors raised by the command layer itself, before any session is touched.

use std::io;

use thiserror::Error;
use wcp_common::ErrorCategory;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid session name: {0}")]
    InvalidName(String),

    #[error("No command specified after --")]
    MissingCommand,

    #[error("Unexpected arguments after session name: {0}")]
    UnexpectedArguments(String),

    #[error("No dev server configured in WCP.md")]
    NoDevServer,

    #[error("Failed to write WCP.md: {0}")]
    ConfigWrite(#[source] io::Error),
}

impl CliError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CliError::InvalidName(_)
            | CliError::MissingCommand
            | CliError::UnexpectedArguments(_) => ErrorCategory::InvalidInput,
            CliError::NoDevServer => ErrorCategory::NotFound,
            CliError::ConfigWrite(_) => ErrorCategory::External,
        }
    }

    pub fn suggestion(&self) -> Option<String> {
        match self {
            CliError::InvalidName(_) => Some(
                "Session names may only contain letters, digits, '_' and '-'.".to_string(),
            ),
            CliError::MissingCommand => {
                Some("Usage: wcp <name> -- <command...>".to_string())
            }
            CliError::UnexpectedArguments(_) => Some(
                "Put the command after '--', e.g. 'wcp 3000 -- npm run dev'.".to_string(),
            ),
            CliError::NoDevServer => Some(
                "Save one with 'wcp create dev --save -- <command...>'.".to_string(),
            ),
            CliError::ConfigWrite(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_errors_exit_64() {
        for err in [
            CliError::InvalidName("a b".to_string()),
            CliError::MissingCommand,
            CliError::UnexpectedArguments("npm".to_string()),
        ] {
            assert_eq!(err.category().exit_code(), 64);
            assert!(err.suggestion().is_some());
        }
    }

    #[test]
    fn test_missing_command_message() {
        assert_eq!(
            CliError::MissingCommand.to_string(),
            "No command specified after --"
        );
    }
}
