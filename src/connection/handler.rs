//! Connection Handler
//!
//! Each client gets its own task running a read → parse → execute → reply
//! loop until the client disconnects.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │  Read bytes into buffer      │◄─────┐
//!    │            │                 │      │
//!    │            ▼                 │      │
//!    │  Split off complete lines    │      │
//!    │            │                 │      │
//!    │            ▼                 │      │
//!    │  Parse + execute each line   │      │
//!    │            │                 │      │
//!    │            ▼                 │      │
//!    │  Flush replies ──────────────┼──────┘
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 3. EOF / error: task ends
//! ```
//!
//! ## Buffer Management
//!
//! Bytes accumulate in a `BytesMut` until a newline arrives, so a command
//! may span several reads and one read may carry several commands. Replies
//! for every line in a read are flushed together. A line that grows past
//! [`MAX_LINE_LEN`] without a newline closes the connection.

use crate::commands::CommandHandler;
use crate::protocol::{parse_line, split_line, Command, Reply, MAX_LINE_LEN};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Initial buffer capacity
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
    /// Lines rejected by the parser
    pub command_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
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

    pub fn command_rejected(&self) {
        self.command_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection over any byte stream.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Bytes read but not yet split into lines
    buffer: BytesMut,

    command_handler: CommandHandler,

    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
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
            stats,
        }
    }

    /// Serves the client until it disconnects or an error occurs.
    ///
    /// A clean disconnect returns `Ok(())`.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let mut replied = false;
            while let Some(line) = split_line(&mut self.buffer) {
                if let Some(reply) = self.process_line(&line).await? {
                    self.write_reply(&reply).await?;
                    replied = true;
                }
            }
            if replied {
                self.stream.flush().await?;
            }

            if !self.read_more_data().await? {
                return Ok(());
            }
        }
    }

    /// Parses and executes one line. Blank lines produce no reply.
    async fn process_line(&self, line: &[u8]) -> Result<Option<Reply>, ConnectionError> {
        let command = match parse_line(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(None),
            Err(e) => {
                trace!(client = %self.addr, error = %e, "Rejected command");
                self.stats.command_rejected();
                return Ok(Some(Reply::error(e)));
            }
        };

        trace!(client = %self.addr, command = command.name(), "Executing command");
        let reply = self.execute(command).await?;
        self.stats.command_processed();
        Ok(Some(reply))
    }

    /// Runs a command, moving it to a blocking thread if it may fsync.
    async fn execute(&self, command: Command) -> Result<Reply, ConnectionError> {
        if self.command_handler.needs_blocking(&command) {
            let handler = self.command_handler.clone();
            Ok(tokio::task::spawn_blocking(move || handler.execute(command)).await?)
        } else {
            Ok(self.command_handler.execute(command))
        }
    }

    /// Reads more data into the buffer. Returns `false` on a clean EOF.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        if self.buffer.len() > MAX_LINE_LEN {
            warn!(
                client = %self.addr,
                size = self.buffer.len(),
                "Request line too long"
            );
            return Err(ConnectionError::LineTooLong);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Ok(false);
            }
            // Partial line with no newline
            return Err(ConnectionError::UnexpectedEof);
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(true)
    }

    async fn write_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        self.stats.bytes_written(bytes.len());
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The stream ended in the middle of a line
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// A line exceeded the maximum length
    #[error("Request line exceeds {} bytes", MAX_LINE_LEN)]
    LineTooLong,

    /// A blocking command task panicked or was cancelled
    #[error("Command task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Handles a TCP client connection to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(client = %addr, error = %e, "Could not set TCP_NODELAY");
    }

    // Errors are already logged by `run`.
    let _ = ConnectionHandler::new(stream, addr, command_handler, stats)
        .run()
        .await;
}

/// Accepts connections forever, spawning a task for each.
pub async fn accept_loop(
    listener: tokio::net::TcpListener,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    command_handler.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
            }
        }
    }
}

/// Logs a one-line summary of the connection counters.
pub fn log_stats(stats: &ConnectionStats) {
    info!(
        accepted = stats.connections_accepted.load(Ordering::Relaxed),
        active = stats.active_connections.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        errors = stats.command_errors.load(Ordering::Relaxed),
        bytes_in = stats.bytes_read.load(Ordering::Relaxed),
        bytes_out = stats.bytes_written.load(Ordering::Relaxed),
        "Connection stats"
    );
}
