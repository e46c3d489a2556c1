//! TCP server for the packet log protocol.
//!
//! Connections are served strictly one at a time: each accepted connection
//! is drained to completion before the next `accept`. Every complete packet
//! is appended to the log and the entire log is streamed back over the same
//! connection. A silent client therefore holds the server indefinitely; there
//! are no timeouts.

use crate::config::Config;
use crate::protocol::{FrameError, PacketFramer};
use crate::shutdown::ShutdownController;
use crate::storage::PacketLog;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use tracing::{debug, error, info, trace, warn};

/// Per-read transfer size.
const RECV_CHUNK_SIZE: usize = 512;

/// Lifecycle of the serving process once the listener is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Listening,
    Accepting,
    Handling,
    ShuttingDown,
    Terminated,
}

/// Why a connection was dropped early.
#[derive(Debug)]
pub enum ConnectionError {
    /// The log could not be opened for appending.
    OpenLog(io::Error),
    Receive(io::Error),
    Frame(FrameError),
    /// Writing a packet to the log failed; the packet is not resent.
    Append(io::Error),
    /// Streaming the log back to the client failed.
    Respond(io::Error),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::OpenLog(e) => write!(f, "failed to open packet log: {e}"),
            ConnectionError::Receive(e) => write!(f, "failed to receive: {e}"),
            ConnectionError::Frame(e) => write!(f, "{e}"),
            ConnectionError::Append(e) => write!(f, "failed to append packet: {e}"),
            ConnectionError::Respond(e) => write!(f, "failed to send packet log: {e}"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::OpenLog(e)
            | ConnectionError::Receive(e)
            | ConnectionError::Append(e)
            | ConnectionError::Respond(e) => Some(e),
            ConnectionError::Frame(e) => Some(e),
        }
    }
}

impl From<FrameError> for ConnectionError {
    fn from(e: FrameError) -> Self {
        ConnectionError::Frame(e)
    }
}

/// What a connection did before it closed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStats {
    pub bytes_received: usize,
    pub packets: usize,
    pub bytes_sent: u64,
}

/// Server instance
pub struct Server<'a> {
    listener: TcpListener,
    log: PacketLog,
    max_packet_size: usize,
    shutdown: &'a ShutdownController,
    state: ServerState,
}

impl<'a> Server<'a> {
    /// Create a server around an already-listening socket.
    pub fn new(listener: TcpListener, config: &Config, shutdown: &'a ShutdownController) -> Self {
        shutdown.watch_listener(listener.as_raw_fd());
        Server {
            listener,
            log: PacketLog::new(&config.data_file),
            max_packet_size: config.max_packet_size,
            shutdown,
            state: ServerState::Listening,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn transition(&mut self, next: ServerState) {
        debug!(from = ?self.state, to = ?next, "Server state");
        self.state = next;
    }

    /// Accept and serve connections until shutdown is requested.
    pub fn run(&mut self) {
        while !self.shutdown.is_requested() {
            self.transition(ServerState::Accepting);

            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(_) if self.shutdown.is_requested() => break,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            self.transition(ServerState::Handling);
            self.shutdown.set_active(stream.as_raw_fd());
            info!("Accepted connection from {}", peer.ip());

            let mut stream = stream;
            match self.serve_connection(&mut stream) {
                Ok(stats) => debug!(
                    peer = %peer,
                    bytes_received = stats.bytes_received,
                    packets = stats.packets,
                    bytes_sent = stats.bytes_sent,
                    "Connection finished"
                ),
                Err(e) => warn!(peer = %peer, error = %e, "Connection aborted"),
            }

            self.shutdown.clear_active();
            drop(stream);
            info!("Closed connection from {}", peer.ip());
        }

        self.transition(ServerState::ShuttingDown);
    }

    /// Drive one connection until the peer closes, an error occurs, or
    /// shutdown is requested.
    ///
    /// Each complete packet is appended and flushed, then the whole log is
    /// streamed back before the next packet is looked at. An unterminated
    /// remainder left when the connection ends is discarded.
    pub fn serve_connection<S: Read + Write>(
        &self,
        stream: &mut S,
    ) -> Result<ConnectionStats, ConnectionError> {
        let mut writer = self.log.open_writer().map_err(ConnectionError::OpenLog)?;
        let mut framer = PacketFramer::new(self.max_packet_size);
        let mut chunk = [0u8; RECV_CHUNK_SIZE];
        let mut stats = ConnectionStats::default();

        while !self.shutdown.is_requested() {
            let n = match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ConnectionError::Receive(e)),
            };
            stats.bytes_received += n;
            framer.extend(&chunk[..n]);

            while let Some(packet) = framer.next_packet()? {
                writer.append(&packet).map_err(ConnectionError::Append)?;
                stats.packets += 1;
                trace!(len = packet.len(), "Appended packet");

                stats.bytes_sent += self
                    .log
                    .stream_to(stream)
                    .map_err(ConnectionError::Respond)?;
            }
        }

        if framer.pending() > 0 {
            debug!(bytes = framer.pending(), "Discarding unterminated data");
        }
        Ok(stats)
    }

    /// Final cleanup once `run` has returned: remove the log and stop
    /// tracking the listener. Failures are logged, never fatal.
    pub fn shutdown(mut self) {
        self.transition(ServerState::ShuttingDown);
        match self.shutdown.signal() {
            Some(signo) => info!("Caught signal {signo}, exiting"),
            None => info!("Shutting down"),
        }

        self.shutdown.release_listener();
        if let Err(e) = self.log.remove() {
            error!(path = %self.log.path().display(), error = %e, "Failed to remove packet log");
        }
        self.transition(ServerState::Terminated);
    }
}
