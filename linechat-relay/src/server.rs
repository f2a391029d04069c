//! Relay server: listening socket, accept loop, and shutdown coordination.
//!
//! A [`Server`] owns its [`ClientRegistry`] and a shutdown flag; nothing is
//! process-global, so several servers can run side by side (as the tests do).
//! Each accepted connection runs on its own task inside a [`JoinSet`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::Instrument;

use crate::broadcast::Broadcaster;
use crate::config::RelayConfig;
use crate::handler::{self, ConnectionContext, ConnectionLimits};
use crate::registry::ClientRegistry;

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Errors surfaced by server construction and [`Server::launch`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The port is outside `1..=65535`.
    #[error("invalid port {0}: must be between 1 and 65535")]
    InvalidPort(i64),

    /// Another socket is already listening on the address.
    #[error("address {0} is already in use")]
    AddressInUse(String),

    /// Binding the listening socket failed for another reason.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: String,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// State shared between a server, its accept loop, and its shutdown handles.
struct ServerState {
    registry: Arc<ClientRegistry>,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerState {
    fn shutdown(&self) {
        let drained = self.registry.close();
        let already = self.shutdown_tx.send_replace(true);
        if !already {
            tracing::info!(clients = drained.len(), "shutting down relay server");
        }
    }
}

/// Cloneable handle that stops a running [`Server`].
///
/// Safe to call from any task or thread, any number of times.
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<ServerState>,
}

impl ShutdownHandle {
    /// Stops accepting and closes every connection. Idempotent.
    pub fn shutdown(&self) {
        self.state.shutdown();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.state.shutdown_tx.borrow()
    }
}

/// A multi-client TCP broadcast relay.
#[derive(Clone)]
pub struct Server {
    config: RelayConfig,
    port: u16,
    state: Arc<ServerState>,
}

impl Server {
    /// Creates a server for `port` with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidPort`] unless `1 <= port <= 65535`.
    pub fn new(port: i64) -> Result<Self, ServerError> {
        Self::with_config(RelayConfig::with_port(port))
    }

    /// Creates a server from a resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidPort`] unless `1 <= config.port <= 65535`.
    pub fn with_config(config: RelayConfig) -> Result<Self, ServerError> {
        let port = validate_port(config.port)?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            port,
            state: Arc::new(ServerState {
                registry: Arc::new(ClientRegistry::new()),
                shutdown_tx,
            }),
        })
    }

    /// The validated listening port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Names of the currently registered clients, sorted.
    #[must_use]
    pub fn client_names(&self) -> Vec<String> {
        self.state.registry.names()
    }

    /// Returns a handle that can stop this server from elsewhere.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Stops accepting and closes every connection. Idempotent.
    pub fn shutdown(&self) {
        self.state.shutdown();
    }

    /// Binds and serves until [`shutdown`](Self::shutdown) is called.
    ///
    /// Returns once the listener is closed and every connection task has
    /// finished or been aborted.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AddressInUse`] or [`ServerError::Bind`] if the
    /// listening socket cannot be bound.
    pub async fn launch(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await;
        Ok(())
    }

    /// Binds, then serves on a background task.
    ///
    /// Returns the bound address and the accept loop's [`JoinHandle`], which
    /// completes after shutdown.
    ///
    /// # Errors
    ///
    /// Same as [`launch`](Self::launch).
    pub async fn start(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let listener = self.bind().await?;
        let addr = listener.local_addr().map_err(|e| self.bind_error(e))?;
        let server = self.clone();
        let handle = tokio::spawn(async move { server.serve(listener).await });
        Ok((addr, handle))
    }

    async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind((self.config.host.as_str(), self.port))
            .await
            .map_err(|e| self.bind_error(e))
    }

    fn bind_error(&self, source: io::Error) -> ServerError {
        let addr = format!("{}:{}", self.config.host, self.port);
        if source.kind() == io::ErrorKind::AddrInUse {
            ServerError::AddressInUse(addr)
        } else {
            ServerError::Bind { addr, source }
        }
    }

    async fn serve(&self, listener: TcpListener) {
        let mut shutdown = self.state.shutdown_tx.subscribe();
        let mut connections = JoinSet::new();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "relay server listening");
        }

        loop {
            tokio::select! {
                () = handler::wait_for_shutdown(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(&mut connections, stream, peer),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "connection task failed");
                    }
                }
            }
        }

        drop(listener);
        self.drain_connections(connections).await;
        tracing::info!("relay server stopped");
    }

    fn spawn_connection(
        &self,
        connections: &mut JoinSet<()>,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
    ) {
        let ctx = ConnectionContext {
            broadcaster: Broadcaster::new(Arc::clone(&self.state.registry)),
            limits: ConnectionLimits::from_config(&self.config),
            shutdown: self.state.shutdown_tx.subscribe(),
        };
        let span = tracing::info_span!(
            "connection",
            conn_id = %uuid::Uuid::now_v7(),
            peer = %peer
        );
        connections.spawn(
            async move {
                tracing::debug!("accepted connection");
                if let Err(e) = handler::handle_connection(stream, peer, ctx).await {
                    tracing::debug!(error = %e, "connection closed with error");
                }
            }
            .instrument(span),
        );
    }

    /// Waits up to the configured grace period for connection tasks, then
    /// aborts the rest.
    async fn drain_connections(&self, mut connections: JoinSet<()>) {
        if connections.is_empty() {
            return;
        }
        tracing::info!(open = connections.len(), "waiting for connections to close");
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = connections.len(),
                "aborting connections that did not close in time"
            );
            connections.shutdown().await;
        }
    }
}

/// Checks that `port` is a usable TCP port.
///
/// # Errors
///
/// Returns [`ServerError::InvalidPort`] for `0`, negatives, and values above
/// `65535`.
pub fn validate_port(port: i64) -> Result<u16, ServerError> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(ServerError::InvalidPort(port)),
    }
}
