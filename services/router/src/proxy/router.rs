//! Routing decisions.
//!
//! Turns a connection's look-ahead bytes into a backend: the classifier picks
//! a target id, the registry resolves it to an endpoint. Each connection gets
//! exactly one outbound connect attempt; there is no retry and no fallback to
//! another backend once a target has been chosen.

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use super::backend::{Backend, SharedRegistry, DEFAULT_CONNECT_TIMEOUT};
use super::classifier::Classifier;

/// Result of a routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Target resolved to a backend.
    Matched {
        target: String,
        backend: Backend,
        /// False when the default target was chosen because nothing matched.
        by_marker: bool,
    },
    /// Target has no backend in the registry.
    NoMatch { target: String, reason: String },
}

/// Classifies connections and connects them to their backend.
pub struct Router {
    registry: SharedRegistry,
    classifier: Classifier,
    connect_timeout: Duration,
}

impl Router {
    /// Create a router whose markers are derived from the registry.
    pub fn new(registry: SharedRegistry) -> Self {
        Self::with_classifier(Classifier::from_registry(&registry), registry)
    }

    /// Create a router with an explicit classifier.
    pub fn with_classifier(classifier: Classifier, registry: SharedRegistry) -> Self {
        Self {
            registry,
            classifier,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the outbound connect timeout.
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Decide where a connection goes from its look-ahead bytes.
    pub fn route(&self, look_ahead: &[u8]) -> RoutingDecision {
        let target = self.classifier.classify(look_ahead);
        let by_marker = target != self.classifier.default_target();

        match self.registry.lookup(target) {
            Ok(backend) => {
                debug!(target = %target, backend_addr = %backend, by_marker, "Route matched");
                RoutingDecision::Matched {
                    target: target.to_string(),
                    backend: backend.clone(),
                    by_marker,
                }
            }
            Err(e) => RoutingDecision::NoMatch {
                target: target.to_string(),
                reason: e.to_string(),
            },
        }
    }

    /// Make the single connect attempt for a routed connection.
    pub async fn connect(&self, backend: &Backend) -> io::Result<TcpStream> {
        backend.connect(self.connect_timeout).await
    }
}
