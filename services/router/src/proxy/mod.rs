//! L4 TCP router implementation.
//!
//! This module provides:
//! - TCP listener management
//! - Non-consuming look-ahead on client streams
//! - Marker-based target classification
//! - Static backend registry
//! - Full-duplex relaying with joint teardown
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Look-ahead -> Classifier -> Registry -> Backend
//!                                                                  |
//!                        Relay (client <-> backend) <--------------+
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use proxy::{BackendRegistry, Listener, ListenerConfig};
//!
//! let registry = Arc::new(BackendRegistry::builtin(1433));
//!
//! let config = ListenerConfig::new("0.0.0.0:1433".parse()?);
//! let listener = Arc::new(Listener::bind(config, registry).await?);
//! listener.run().await?;
//! ```

mod backend;
mod classifier;
mod connection;
mod listener;
mod peek;
mod relay;
mod router;

pub use backend::{
    Backend, BackendRegistry, RegistryError, SharedRegistry, BUILTIN_BACKENDS,
    DEFAULT_BACKEND_PORT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TARGET,
};
pub use classifier::{
    Classifier, LookAheadConfig, LookAheadResult, MarkerRule, DEFAULT_PEEK_BYTES,
    DEFAULT_PEEK_TIMEOUT,
};
pub use connection::{Connection, ConnectionState};
pub use listener::{Listener, ListenerConfig, ListenerStats};
pub use peek::PeekableStream;
pub use relay::{relay, Direction, PumpEnd, RelayOutcome, RELAY_BUFFER_SIZE};
pub use router::{Router, RoutingDecision};
