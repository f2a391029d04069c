//! Per-connection handler: nickname handshake, line relay, cleanup.
//!
//! The connection lifecycle:
//! 1. `Handshake`: send the nickname prompt, read one line, claim a free name.
//! 2. `Active`: announce the join, welcome the client, then broadcast every
//!    line it sends.
//! 3. `Closing`: deregister and announce the departure.
//! 4. `Closed`: both halves of the stream are dropped.
//!
//! Reads happen on the handler task. Writes go through the client's
//! [`ClientSink`] to a dedicated writer task, so a slow client only ever
//! stalls its own writer.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use linechat_proto::line::{ServerLine, decode_client_line};
use linechat_proto::nickname::{name_candidates, requested_or_default};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    BufWriter, ReadHalf, WriteHalf,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::broadcast::Broadcaster;
use crate::config::RelayConfig;
use crate::registry::RegistryError;
use crate::sink::{ClientSink, DeliveryError};

/// How long a closing connection waits for queued lines to be flushed.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors that end a single connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The client never completed the nickname exchange.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Reading from or writing to the client failed.
    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),

    /// The client sent a line longer than the configured maximum.
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),

    /// A line could not be queued on the client's own sink.
    #[error("outbound delivery failed: {0}")]
    Outbound(#[from] DeliveryError),

    /// The server is shutting down.
    #[error("server is shutting down")]
    Shutdown,
}

/// Lifecycle state of a [`ConnectionHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the client's nickname.
    Handshake,
    /// Registered and relaying lines.
    Active,
    /// Deregistering and announcing the departure.
    Closing,
    /// Stream released.
    Closed,
}

/// Per-connection limits taken from [`RelayConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    /// Longest accepted line in bytes, excluding the terminator.
    pub max_line_length: usize,
    /// Name candidates tried before the handshake fails.
    pub max_name_attempts: usize,
    /// Outbound queue capacity, in lines.
    pub outbound_queue_size: usize,
    /// Deadline for the nickname line.
    pub handshake_timeout: Duration,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}

impl ConnectionLimits {
    /// Extracts the per-connection limits from a resolved configuration.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            max_line_length: config.max_line_length,
            max_name_attempts: config.max_name_attempts.max(1),
            outbound_queue_size: config.outbound_queue_size,
            handshake_timeout: config.handshake_timeout,
        }
    }
}

/// Everything a handler shares with the server that spawned it.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Broadcaster over the server's registry.
    pub broadcaster: Broadcaster,
    /// Per-connection limits.
    pub limits: ConnectionLimits,
    /// Flips to `true` when the server shuts down.
    pub shutdown: watch::Receiver<bool>,
}

/// Drives one client connection from handshake to close.
pub struct ConnectionHandler<S> {
    reader: BufReader<ReadHalf<S>>,
    outbound: ClientSink,
    writer: JoinHandle<io::Result<()>>,
    writer_done: bool,
    peer: SocketAddr,
    ctx: ConnectionContext,
    state: ConnectionState,
    name: Option<String>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps `stream` and spawns its writer task.
    #[must_use]
    pub fn new(stream: S, peer: SocketAddr, ctx: ConnectionContext) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, rx) = ClientSink::channel(peer, ctx.limits.outbound_queue_size);
        let writer = tokio::spawn(write_lines(write_half, rx));
        Self {
            reader: BufReader::new(read_half),
            outbound,
            writer,
            writer_done: false,
            peer,
            ctx,
            state: ConnectionState::Handshake,
            name: None,
        }
    }

    /// Runs the connection to completion.
    ///
    /// Cleanup always runs, whatever ended the connection.
    ///
    /// # Errors
    ///
    /// Returns the [`ConnectionError`] that ended the connection; a client
    /// closing its side cleanly yields `Ok(())`.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        let outcome = self.drive().await;
        self.finish(&outcome).await;
        outcome
    }

    async fn drive(&mut self) -> Result<(), ConnectionError> {
        let name = self.handshake().await?;
        self.enter_active(name)?;
        self.relay_lines().await
    }

    async fn handshake(&mut self) -> Result<String, ConnectionError> {
        self.outbound
            .send_line(&ServerLine::NicknamePrompt)
            .map_err(|e| ConnectionError::HandshakeFailed(format!("could not send prompt: {e}")))?;

        let max_line_length = self.ctx.limits.max_line_length;
        let requested = tokio::select! {
            read = tokio::time::timeout(
                self.ctx.limits.handshake_timeout,
                read_line(&mut self.reader, max_line_length),
            ) => match read {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => {
                    return Err(ConnectionError::HandshakeFailed(
                        "connection closed before a nickname was sent".to_string(),
                    ));
                }
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) => {
                    return Err(ConnectionError::HandshakeFailed(
                        "timed out waiting for a nickname".to_string(),
                    ));
                }
            },
            () = wait_for_shutdown(&mut self.ctx.shutdown) => return Err(ConnectionError::Shutdown),
        };

        let base = requested_or_default(&requested, self.peer.ip());
        self.claim_name(&base)
    }

    /// Registers the first free candidate derived from `base`.
    fn claim_name(&self, base: &str) -> Result<String, ConnectionError> {
        let registry = self.ctx.broadcaster.registry();
        let attempts = self.ctx.limits.max_name_attempts;

        for candidate in name_candidates(base).take(attempts) {
            if registry.contains(&candidate) {
                continue;
            }
            match registry.add(&candidate, self.outbound.clone()) {
                Ok(()) => return Ok(candidate),
                Err(RegistryError::NameConflict(_)) => {
                    tracing::debug!(candidate = %candidate, "lost nickname race, trying next");
                }
                Err(RegistryError::Closed) => return Err(ConnectionError::Shutdown),
            }
        }

        Err(ConnectionError::HandshakeFailed(format!(
            "no free nickname derived from {base:?} after {attempts} attempts"
        )))
    }

    fn enter_active(&mut self, name: String) -> Result<(), ConnectionError> {
        self.transition(ConnectionState::Active);
        tracing::info!(name = %name, "client joined");

        self.ctx
            .broadcaster
            .broadcast(&ServerLine::Joined { name: name.clone() }, &name);
        let welcome = ServerLine::Welcome { name: name.clone() };
        self.name = Some(name);
        self.outbound.send_line(&welcome)?;
        Ok(())
    }

    async fn relay_lines(&mut self) -> Result<(), ConnectionError> {
        let Some(name) = self.name.clone() else {
            return Ok(());
        };
        let max_line_length = self.ctx.limits.max_line_length;

        loop {
            tokio::select! {
                read = read_line(&mut self.reader, max_line_length) => match read? {
                    Some(text) => {
                        self.ctx.broadcaster.broadcast(&ServerLine::chat(&name, &text), &name);
                    }
                    None => return Ok(()),
                },
                written = &mut self.writer, if !self.writer_done => {
                    self.writer_done = true;
                    return match written {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(ConnectionError::Io(e)),
                        Err(e) => Err(ConnectionError::Io(io::Error::other(e))),
                    };
                }
                () = wait_for_shutdown(&mut self.ctx.shutdown) => return Err(ConnectionError::Shutdown),
            }
        }
    }

    /// Deregisters, announces the departure, and releases the stream.
    ///
    /// Returns the terminal state.
    async fn finish(mut self, outcome: &Result<(), ConnectionError>) -> ConnectionState {
        self.transition(ConnectionState::Closing);

        if let Some(name) = self.name.take() {
            // Only the handler that actually removed the entry announces it,
            // so a shutdown that already emptied the registry stays quiet.
            if self.ctx.broadcaster.registry().remove(&name) {
                self.ctx
                    .broadcaster
                    .broadcast(&ServerLine::Left { name: name.clone() }, &name);
            }
            match outcome {
                Ok(()) => tracing::info!(name = %name, "client disconnected"),
                Err(ConnectionError::Shutdown) => {
                    tracing::debug!(name = %name, "connection closed by shutdown");
                }
                Err(e) => tracing::info!(name = %name, error = %e, "connection lost"),
            }
        } else {
            match outcome {
                Err(ConnectionError::Shutdown) => {
                    tracing::debug!(peer = %self.peer, "handshake interrupted by shutdown");
                }
                Err(e) => tracing::warn!(peer = %self.peer, error = %e, "connection ended before joining"),
                Ok(()) => {}
            }
        }

        let shutting_down =
            matches!(outcome, Err(ConnectionError::Shutdown)) || *self.ctx.shutdown.borrow();
        let Self {
            reader,
            outbound,
            writer,
            writer_done,
            mut state,
            ..
        } = self;
        drop(outbound);

        if !writer_done {
            let abort = writer.abort_handle();
            if shutting_down || tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
                abort.abort();
            }
        }
        drop(reader);
        advance(&mut state, ConnectionState::Closed);
        state
    }

    fn transition(&mut self, next: ConnectionState) {
        advance(&mut self.state, next);
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }
}

fn advance(state: &mut ConnectionState, next: ConnectionState) {
    tracing::debug!(from = ?*state, to = ?next, "state change");
    *state = next;
}

/// Runs a connection handler for `stream` to completion.
///
/// # Errors
///
/// See [`ConnectionHandler::run`].
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    ctx: ConnectionContext,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    ConnectionHandler::new(stream, peer, ctx).run().await
}

/// Writer task: drains the client's queue onto the socket.
///
/// Ends with a write-side shutdown once every sender is gone.
async fn write_lines<S>(write_half: WriteHalf<S>, mut rx: mpsc::Receiver<String>) -> io::Result<()>
where
    S: AsyncWrite,
{
    let mut writer = BufWriter::new(write_half);
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

/// Reads one line of at most `max` bytes, excluding the terminator.
///
/// Returns `Ok(None)` at end of stream. A final line without a terminator is
/// still returned.
async fn read_line<R>(reader: &mut R, max: usize) -> Result<Option<String>, ConnectionError>
where
    R: AsyncBufRead + Unpin,
{
    // Room for the content plus a trailing "\r\n".
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(2);
    let mut buf = Vec::new();
    let read = reader.take(limit).read_until(b'\n', &mut buf).await?;
    if read == 0 {
        return Ok(None);
    }

    let terminated = buf.ends_with(b"\n");
    let content = buf.strip_suffix(b"\n").unwrap_or(&buf);
    let content = content.strip_suffix(b"\r").unwrap_or(content);
    if content.len() > max || (!terminated && u64::try_from(read).unwrap_or(u64::MAX) >= limit) {
        return Err(ConnectionError::LineTooLong(max));
    }
    Ok(Some(decode_client_line(&buf)))
}

/// Resolves once the shutdown flag is set or its sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
