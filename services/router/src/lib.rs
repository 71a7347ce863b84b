pub mod config;
pub mod error;
pub mod proxy;

pub use config::Config;
pub use error::RouteError;
pub use proxy::{
    Backend, BackendRegistry, Classifier, Connection, ConnectionState, Listener, ListenerConfig,
    ListenerStats, LookAheadConfig, MarkerRule, PeekableStream, RegistryError, RelayOutcome,
    Router, RoutingDecision, SharedRegistry,
};
