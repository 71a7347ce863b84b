//! Per-connection lifecycle.
//!
//! A connection moves strictly forward through
//! `accepted -> classifying -> connecting -> relaying -> closed`.
//! It is owned by exactly one handler task; dropping it closes the client
//! socket.

use std::fmt;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::peek::PeekableStream;
use super::relay::{relay, RelayOutcome};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Accepted,
    Classifying,
    Connecting,
    Relaying,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::Classifying => "classifying",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Relaying => "relaying",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A client connection being routed.
#[derive(Debug)]
pub struct Connection<S> {
    peer_addr: SocketAddr,
    client: PeekableStream<S>,
    state: ConnectionState,
    target: Option<String>,
}

impl<S> Connection<S> {
    /// Wrap a freshly accepted client stream.
    pub fn new(client: S, peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            client: PeekableStream::new(client),
            state: ConnectionState::Accepted,
            target: None,
        }
    }

    /// Client address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Classification result, once decided.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Look-ahead bytes buffered so far.
    pub fn peeked(&self) -> &[u8] {
        self.client.peeked()
    }

    /// Mutable access to the client stream, for the look-ahead read.
    pub fn client_mut(&mut self) -> &mut PeekableStream<S> {
        &mut self.client
    }

    /// Move to `classifying`.
    pub fn begin_classifying(&mut self) {
        self.advance(ConnectionState::Classifying);
    }

    /// Record the classification result and move to `connecting`.
    ///
    /// Classification is decided once; a second call is ignored and the
    /// original target is kept.
    pub fn classified(&mut self, target: &str) {
        if self.target.is_some() {
            debug!(
                existing = ?self.target,
                ignored = %target,
                "Connection already classified"
            );
            return;
        }
        self.target = Some(target.to_string());
        self.advance(ConnectionState::Connecting);
    }

    fn advance(&mut self, next: ConnectionState) {
        debug_assert!(
            next > self.state,
            "connection state must move forward: {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "Connection state change");
        self.state = next;
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Relay between the client and `backend` until either side ends.
    ///
    /// The backend stream is closed when this returns and the connection is
    /// `closed`; the client socket closes when the connection is dropped.
    pub async fn relay<B>(&mut self, backend: B) -> RelayOutcome
    where
        B: AsyncRead + AsyncWrite + Unpin,
    {
        self.advance(ConnectionState::Relaying);
        let outcome = relay(&mut self.client, backend).await;
        self.advance(ConnectionState::Closed);
        outcome
    }
}
