use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::io::Write;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use tracing::debug;
use tracing::warn;
use wcp_ipc::encode;
use wcp_ipc::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Write side of one client connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    stream: UnixStream,
}

impl Connection {
    /// Writes that stall longer than `write_timeout` fail instead of
    /// blocking the sender.
    pub fn new(id: ConnectionId, stream: UnixStream, write_timeout: Duration) -> io::Result<Self> {
        if !write_timeout.is_zero() {
            stream.set_write_timeout(Some(write_timeout))?;
        }
        Ok(Self { id, stream })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        (&self.stream).write_all(frame)
    }

    /// Second handle for the reader thread.
    pub fn try_clone_stream(&self) -> io::Result<UnixStream> {
        self.stream.try_clone()
    }

    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Live connections of one daemon, written to in ascending id order.
#[derive(Debug, Default)]
pub struct Broadcaster {
    connections: BTreeMap<ConnectionId, Connection>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, connection: Connection) {
        debug!(id = %connection.id(), "Client registered");
        self.connections.insert(connection.id(), connection);
    }

    /// Unregisters and shuts the transport down. Unknown ids are ignored.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some(connection) => {
                connection.shutdown();
                debug!(%id, "Client removed");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Sends to every connection; returns how many were evicted.
    pub fn broadcast(&mut self, message: &Message) -> usize {
        self.fan_out(message, None)
    }

    /// Like [`broadcast`](Self::broadcast) but skips the connection the
    /// message came from.
    pub fn broadcast_from(&mut self, message: &Message, origin: ConnectionId) -> usize {
        self.fan_out(message, Some(origin))
    }

    fn fan_out(&mut self, message: &Message, skip: Option<ConnectionId>) -> usize {
        if self.connections.is_empty() {
            return 0;
        }
        let frame = match encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping unencodable message");
                return 0;
            }
        };

        let failed: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|connection| Some(connection.id()) != skip)
            .filter_map(|connection| match connection.write_frame(&frame) {
                Ok(()) => None,
                Err(e) => {
                    debug!(id = %connection.id(), error = %e, "Broadcast write failed");
                    Some(connection.id())
                }
            })
            .collect();

        for id in &failed {
            self.remove(*id);
        }
        failed.len()
    }

    /// Unicast. On failure the connection is removed if registered and
    /// closed either way.
    pub fn send_to(&mut self, connection: &Connection, message: &Message) -> bool {
        let result = encode(message)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            .and_then(|frame| connection.write_frame(&frame));
        match result {
            Ok(()) => true,
            Err(e) => {
                debug!(id = %connection.id(), error = %e, "Send failed");
                if !self.remove(connection.id()) {
                    connection.shutdown();
                }
                false
            }
        }
    }

    pub fn close_all(&mut self) {
        for connection in self.connections.values() {
            connection.shutdown();
        }
        self.connections.clear();
    }
}
