#![deny(clippy::all)]

pub mod broadcast;
mod config;
mod error;
pub mod process;
mod ring_buffer;
mod server;
mod signal_handler;

pub use broadcast::Broadcaster;
pub use broadcast::Connection;
pub use broadcast::ConnectionId;
pub use config::DaemonConfig;
pub use error::DaemonError;
pub use error::ProcessError;
pub use process::OutputSource;
pub use process::ProcessEvent;
pub use process::ProcessSupervisor;
pub use process::Signal;
pub use ring_buffer::RingBuffer;
pub use server::DaemonExit;
pub use server::DaemonHandle;
pub use server::DaemonOptions;
pub use server::DaemonState;
pub use server::SessionDaemon;
pub use server::ShutdownReason;
pub use signal_handler::signal_name;

pub type Result<T> = std::result::Result<T, DaemonError>;
