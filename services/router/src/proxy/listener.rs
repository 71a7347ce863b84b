//! TCP listener and connection handling.
//!
//! Accepts client connections, looks ahead at their first bytes, routes
//! them, and relays them to the chosen backend.
//!
//! - One sequential accept loop; one task per connection
//! - A failed accept is logged and never stops the loop
//! - Look-ahead wait applies only before routing
//! - No idle timeout once relaying

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn, Instrument};

use super::backend::{RegistryError, SharedRegistry, DEFAULT_CONNECT_TIMEOUT};
use super::classifier::{LookAheadConfig, LookAheadResult};
use super::connection::Connection;
use super::router::{Router, RoutingDecision};
use crate::error::RouteError;

/// Default maximum concurrent connections per listener (none: unbounded).
pub const DEFAULT_MAX_CONNECTIONS: Option<usize> = None;

/// Back-off after a failed accept.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Optional cap on concurrent connections.
    pub max_connections: Option<usize>,
    /// Look-ahead configuration.
    pub look_ahead: LookAheadConfig,
    /// Outbound connect timeout.
    pub connect_timeout: Duration,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            look_ahead: LookAheadConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Total connections currently active.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Connections rejected due to max limit.
    pub connections_rejected: AtomicU64,
    /// Accept calls that failed.
    pub accept_errors: AtomicU64,
    /// Look-ahead reads that timed out.
    pub look_ahead_timeouts: AtomicU64,
    /// Connections routed by a marker match.
    pub routed_by_marker: AtomicU64,
    /// Connections routed to the default target.
    pub routed_default: AtomicU64,
    /// Routing failures (target not in registry).
    pub routes_failed: AtomicU64,
    /// Backend connection successes.
    pub backend_connected: AtomicU64,
    /// Backend connection failures.
    pub backend_failed: AtomicU64,
    /// Bytes proxied to backend.
    pub bytes_to_backend: AtomicU64,
    /// Bytes proxied from backend.
    pub bytes_from_backend: AtomicU64,
}

/// The router's TCP listener.
pub struct Listener {
    /// The TCP listener.
    listener: TcpListener,
    /// Classification and backend selection.
    router: Router,
    /// Look-ahead configuration.
    look_ahead: LookAheadConfig,
    /// Connection semaphore, present only when a cap is configured.
    conn_semaphore: Option<Arc<Semaphore>>,
    /// Statistics.
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind a new listener.
    pub async fn bind(config: ListenerConfig, registry: SharedRegistry) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            max_connections = ?config.max_connections,
            peek_timeout_ms = config.look_ahead.timeout.as_millis() as u64,
            "Listener bound"
        );

        Ok(Self {
            listener,
            router: Router::new(registry).connect_timeout(config.connect_timeout),
            look_ahead: config.look_ahead,
            conn_semaphore: config
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max))),
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to the statistics.
    pub fn stats_handle(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Run the accept loop. Only returns if the local address is unavailable.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            let accepted = self.listener.accept().await;
            self.dispatch(accepted).await;
        }
    }

    /// Act on one accept result: spawn a handler, reject over the cap, or
    /// back off after a failed accept. Never ends the loop.
    async fn dispatch(self: &Arc<Self>, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, peer_addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                self.stats.accept_errors.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "Accept error");
                // Brief sleep to avoid tight loop on persistent errors
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                return;
            }
        };

        let permit = match self.try_admit() {
            Ok(permit) => permit,
            Err(()) => {
                self.stats
                    .connections_rejected
                    .fetch_add(1, Ordering::Relaxed);
                warn!(peer_addr = %peer_addr, "Connection rejected: max connections reached");
                return;
            }
        };

        self.stats
            .connections_accepted
            .fetch_add(1, Ordering::Relaxed);
        self.stats
            .connections_active
            .fetch_add(1, Ordering::Relaxed);

        let listener = Arc::clone(self);

        tokio::spawn(
            async move {
                if let Err(e) = listener.handle_connection(stream, peer_addr).await {
                    match &e {
                        RouteError::BackendUnreachable { .. } => warn!(
                            reason = e.reason_code(),
                            error = %e,
                            "Connection aborted"
                        ),
                        _ => debug!(
                            reason = e.reason_code(),
                            error = %e,
                            "Connection aborted"
                        ),
                    }
                }

                // Release the slot before the connection stops counting as active.
                drop(permit);
                let stats = &listener.stats;
                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                stats.connections_closed.fetch_add(1, Ordering::Relaxed);
            }
            .instrument(tracing::info_span!("connection", peer = %peer_addr)),
        );
    }

    /// Take a connection slot if a cap is configured.
    fn try_admit(&self) -> Result<Option<OwnedSemaphorePermit>, ()> {
        match &self.conn_semaphore {
            Some(semaphore) => Arc::clone(semaphore)
                .try_acquire_owned()
                .map(Some)
                .map_err(|_| ()),
            None => Ok(None),
        }
    }

    /// Handle a single connection.
    ///
    /// The client stream is dropped, and so closed, on every return path.
    async fn handle_connection(
        &self,
        client: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), RouteError> {
        debug!(peer_addr = %peer_addr, "Handling connection");

        let mut conn = Connection::new(client, peer_addr);
        conn.begin_classifying();

        match self.look_ahead.read(conn.client_mut()).await {
            LookAheadResult::Data(n) => debug!(bytes = n, "Look-ahead read"),
            LookAheadResult::Eof => debug!("Client closed before sending data"),
            LookAheadResult::Timeout => {
                self.stats
                    .look_ahead_timeouts
                    .fetch_add(1, Ordering::Relaxed);
            }
            LookAheadResult::IoError(e) => return Err(RouteError::LookAhead(e)),
        }

        let (target, backend) = match self.router.route(conn.peeked()) {
            RoutingDecision::Matched {
                target,
                backend,
                by_marker,
            } => {
                if by_marker {
                    self.stats.routed_by_marker.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.stats.routed_default.fetch_add(1, Ordering::Relaxed);
                }
                (target, backend)
            }
            RoutingDecision::NoMatch { target, reason } => {
                self.stats.routes_failed.fetch_add(1, Ordering::Relaxed);
                warn!(target = %target, reason = %reason, "No backend for target");
                return Err(RouteError::UnknownTarget(RegistryError::NotFound(target)));
            }
        };

        conn.classified(&target);

        let upstream = match self.router.connect(&backend).await {
            Ok(stream) => {
                self.stats.backend_connected.fetch_add(1, Ordering::Relaxed);
                stream
            }
            Err(source) => {
                self.stats.backend_failed.fetch_add(1, Ordering::Relaxed);
                return Err(RouteError::BackendUnreachable {
                    target,
                    backend: backend.to_string(),
                    source,
                });
            }
        };

        info!(
            peer_addr = %peer_addr,
            target = %target,
            backend_addr = %backend,
            "Connection routed"
        );

        let outcome = conn.relay(upstream).await;

        self.stats
            .bytes_to_backend
            .fetch_add(outcome.bytes_to_backend, Ordering::Relaxed);
        self.stats
            .bytes_from_backend
            .fetch_add(outcome.bytes_from_backend, Ordering::Relaxed);

        debug!(
            bytes_to_backend = outcome.bytes_to_backend,
            bytes_from_backend = outcome.bytes_from_backend,
            first_ended = %outcome.first_ended,
            reason = %outcome.reason,
            "Connection closed"
        );

        Ok(())
    }
}
