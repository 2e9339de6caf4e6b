//! Connection Handler Module
//!
//! Each accepted client is served by its own task running a
//! [`ConnectionHandler`] loop:
//!
//! ```text
//! Open
//!   │
//!   ▼
//! ┌──────────────────────────────┐
//! │  Decode one command          │◄─┐
//! │  Execute it                  │  │  Dispatching
//! │  Write + flush the reply     │──┘
//! └──────────────────────────────┘
//!   │  end of stream, protocol error,
//!   │  or command error
//!   ▼
//! Closed
//! ```
//!
//! A reply is flushed before the next command is decoded, so replies always
//! come back in request order. Requests the client pipelined in one packet
//! stay in the read buffer until their turn.
//!
//! Errors end only the session they occur in. A failed write is logged and
//! the loop keeps reading; if the socket is really gone the next read ends it.

use crate::commands::{CommandError, CommandHandler};
use crate::protocol::{ProtocolError, RespParser, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Initial read buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total reply bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that end a client session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The request stream could not be decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The request could not be dispatched
    #[error("command error: {0}")]
    Command(#[from] CommandError),
}

/// Serves one client over a duplex byte stream.
pub struct ConnectionHandler<S> {
    /// The client stream; replies are buffered and flushed per command
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Bytes read but not yet decoded
    buffer: BytesMut,

    /// The command handler (shares the storage engine with other connections)
    command_handler: CommandHandler,

    parser: RespParser,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The client stream
    /// * `addr` - The client's socket address
    /// * `command_handler` - The command handler for executing commands
    /// * `stats` - Shared connection statistics
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RespParser::new(),
            stats,
        }
    }

    /// Runs the session until the client disconnects or an error ends it.
    ///
    /// `Ok(())` means the client closed the stream between requests.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::Protocol(ProtocolError::ReadFailure(io_err)))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Closing connection"),
        }

        let _ = self.stream.shutdown().await;
        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let command = match self
                .parser
                .read_command(self.stream.get_mut(), &mut self.buffer)
                .await?
            {
                Some(command) => command,
                None => return Ok(()),
            };

            if command.is_empty() {
                trace!(client = %self.addr, "Skipping empty command");
                continue;
            }

            let response = self.command_handler.execute(command)?;
            self.stats.command_processed();

            if let Err(e) = self.send_response(&response).await {
                warn!(client = %self.addr, error = %e, "Failed to write response");
            }
        }
    }

    /// Sends a response to the client.
    async fn send_response(&mut self, response: &RespValue) -> std::io::Result<()> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent response"
        );
        Ok(())
    }
}

/// Handles a client connection.
///
/// Creates a [`ConnectionHandler`] and runs it to completion. The session's
/// outcome has already been logged by [`ConnectionHandler::run`], so nothing
/// is returned to the accept loop.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    let _ = handler.run().await;
}
