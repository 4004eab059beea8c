#![deny(clippy::all)]

pub mod commands;
pub mod common;
pub mod error;
pub mod handlers;
pub mod project_config;

pub use error::CliError;
pub use handlers::HandlerResult;
