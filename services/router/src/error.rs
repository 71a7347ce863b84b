//! Error types for connection routing.

use std::io;

use thiserror::Error;

use crate::proxy::RegistryError;

/// Reasons a connection is aborted before relaying starts.
///
/// Every variant is local to one connection; none of them stop the listener.
#[derive(Debug, Error)]
pub enum RouteError {
    /// Reading the client's first bytes failed.
    #[error("look-ahead failed: {0}")]
    LookAhead(#[source] io::Error),

    /// The classified target has no backend.
    #[error("unknown target: {0}")]
    UnknownTarget(#[from] RegistryError),

    /// The single outbound connect attempt failed.
    #[error("backend_unreachable: target {target} at {backend}: {source}")]
    BackendUnreachable {
        target: String,
        backend: String,
        #[source]
        source: io::Error,
    },
}

impl RouteError {
    /// Short reason code for logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            RouteError::LookAhead(_) => "look_ahead_failed",
            RouteError::UnknownTarget(_) => "unknown_target",
            RouteError::BackendUnreachable { .. } => "backend_unreachable",
        }
    }
}
