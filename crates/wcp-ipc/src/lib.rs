#![deny(clippy::all)]

pub mod client;
mod error;
pub mod protocol;
pub mod socket;
mod watch;

pub use client::Disconnect;
pub use client::ReplayRenderer;
pub use client::SessionClient;
pub use error::ClientError;
pub use error::ProtocolError;
pub use protocol::FrameStream;
pub use protocol::Message;
pub use protocol::MessageKind;
pub use protocol::MessageReader;
pub use protocol::Utf8Decoder;
pub use protocol::encode;
pub use socket::Endpoint;
pub use socket::SessionDirectory;
pub use socket::SessionEntry;
pub use socket::is_valid_session_name;
pub use watch::LineLabeler;
pub use watch::connect_watch;

pub type Result<T> = std::result::Result<T, ClientError>;
