//! Backend registry and outbound connect.
//!
//! The registry maps a logical target id (for example `database2`) to the
//! backend endpoint that serves it. It is built once at startup and never
//! mutated afterwards, so it is shared between connection handlers through
//! a plain `Arc` with no locking.
//!
//! - Every target id is unique
//! - The default target must always be mapped
//! - All backends listen on the same port
//! - Connect timeout to backend: 10s default

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Default connect timeout for backend connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Port shared by every backend (SQL Server default).
pub const DEFAULT_BACKEND_PORT: u16 = 1433;

/// Target used when nothing in the look-ahead matches a marker.
pub const DEFAULT_TARGET: &str = "database1";

/// Compiled-in routing table: target id -> backend host.
pub const BUILTIN_BACKENDS: &[(&str, &str)] =
    &[("database1", "10.0.2.4"), ("database2", "10.0.2.5")];

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No backend is registered for the target id.
    #[error("no backend registered for target '{0}'")]
    NotFound(String),

    /// The default target has no backend.
    #[error("default target '{0}' is not mapped to a backend")]
    DefaultUnmapped(String),

    /// A target id or host was empty.
    #[error("invalid registry entry: {0}")]
    InvalidEntry(String),
}

/// A backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Backend {
    /// Hostname or IP literal; resolved at connect time.
    pub host: String,
    /// Backend port.
    pub port: u16,
}

impl Backend {
    /// Create a new backend endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Attempt a single outbound connection, bounded by `connect_timeout`.
    ///
    /// DNS resolution happens inside the timeout as well.
    pub async fn connect(&self, connect_timeout: Duration) -> io::Result<TcpStream> {
        debug!(backend_addr = %self, "Connecting to backend");

        match timeout(
            connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout")),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bracket bare IPv6 literals so the output parses as host:port.
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Immutable mapping from target id to backend.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Backend>,
    default_target: String,
}

impl BackendRegistry {
    /// Build a registry, validating that the default target is mapped.
    ///
    /// Later duplicates of the same id replace earlier ones.
    pub fn new<I>(default_target: &str, entries: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (String, Backend)>,
    {
        let mut backends = BTreeMap::new();
        for (id, backend) in entries {
            if id.is_empty() {
                return Err(RegistryError::InvalidEntry("empty target id".to_string()));
            }
            if backend.host.is_empty() {
                return Err(RegistryError::InvalidEntry(format!(
                    "empty host for target '{}'",
                    id
                )));
            }
            backends.insert(id, backend);
        }

        if !backends.contains_key(default_target) {
            return Err(RegistryError::DefaultUnmapped(default_target.to_string()));
        }

        Ok(Self {
            backends,
            default_target: default_target.to_string(),
        })
    }

    /// The compiled-in table, all backends on `port`.
    pub fn builtin(port: u16) -> Self {
        Self {
            backends: BUILTIN_BACKENDS
                .iter()
                .map(|(id, host)| (id.to_string(), Backend::new(*host, port)))
                .collect(),
            default_target: DEFAULT_TARGET.to_string(),
        }
    }

    /// Look up the backend for a target id.
    pub fn lookup(&self, target: &str) -> Result<&Backend, RegistryError> {
        self.backends
            .get(target)
            .ok_or_else(|| RegistryError::NotFound(target.to_string()))
    }

    /// The default target id.
    pub fn default_target(&self) -> &str {
        &self.default_target
    }

    /// All target ids, in sorted order.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    /// Iterate over (target, backend) pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Backend)> {
        self.backends.iter().map(|(id, b)| (id.as_str(), b))
    }

    /// Number of registered targets.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether the registry is empty. Never true for a validated registry.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// Shared registry reference.
pub type SharedRegistry = Arc<BackendRegistry>;
