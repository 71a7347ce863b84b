//! Router configuration.
//!
//! Everything is read once at process start. The routing table is compiled
//! in and may be replaced (not edited) through `DBX_ROUTER_BACKENDS`; it never
//! changes while the process runs.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::proxy::{
    Backend, BackendRegistry, ListenerConfig, LookAheadConfig, BUILTIN_BACKENDS,
    DEFAULT_BACKEND_PORT, DEFAULT_TARGET,
};

/// Largest accepted look-ahead size.
const MAX_PEEK_BYTES: usize = 64 * 1024;

/// Router configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Listening address (example: 0.0.0.0:1433).
    pub listen_addr: SocketAddr,

    /// Port shared by all backends.
    pub backend_port: u16,

    /// Target id -> backend host.
    pub backends: BTreeMap<String, String>,

    /// Target used when no marker matches.
    pub default_target: String,

    /// How long to wait for the client's first bytes.
    pub peek_timeout: Duration,

    /// How many bytes to look ahead.
    pub peek_bytes: usize,

    /// Outbound connect timeout.
    pub connect_timeout: Duration,

    /// Optional concurrent connection cap (unbounded when unset).
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr: SocketAddr = var("DBX_ROUTER_LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:1433".to_string())
            .parse()
            .context("DBX_ROUTER_LISTEN_ADDR must be a socket address (host:port).")?;

        let backend_port: u16 = var("DBX_ROUTER_BACKEND_PORT")
            .map(|v| v.parse())
            .transpose()
            .context("DBX_ROUTER_BACKEND_PORT must be a port number.")?
            .unwrap_or(DEFAULT_BACKEND_PORT);

        let backends: BTreeMap<String, String> = match var("DBX_ROUTER_BACKENDS") {
            Some(raw) => serde_json::from_str(&raw).context(
                "DBX_ROUTER_BACKENDS must be a JSON object of target id to host, \
                 e.g. {\"database1\":\"10.0.2.4\"}.",
            )?,
            None => BUILTIN_BACKENDS
                .iter()
                .map(|(id, host)| (id.to_string(), host.to_string()))
                .collect(),
        };

        let default_target =
            var("DBX_ROUTER_DEFAULT_TARGET").unwrap_or_else(|| DEFAULT_TARGET.to_string());

        if !backends.contains_key(&default_target) {
            bail!(
                "Default target '{}' has no backend. Add it to DBX_ROUTER_BACKENDS.",
                default_target
            );
        }

        let peek_timeout_ms: u64 = var("DBX_ROUTER_PEEK_TIMEOUT_MS")
            .map(|v| v.parse())
            .transpose()
            .context("DBX_ROUTER_PEEK_TIMEOUT_MS must be an integer (milliseconds).")?
            .unwrap_or(5000);

        let peek_bytes: usize = var("DBX_ROUTER_PEEK_BYTES")
            .map(|v| v.parse())
            .transpose()
            .context("DBX_ROUTER_PEEK_BYTES must be an integer.")?
            .unwrap_or(1024);

        if !(1..=MAX_PEEK_BYTES).contains(&peek_bytes) {
            bail!(
                "DBX_ROUTER_PEEK_BYTES must be between 1 and {} (got {}).",
                MAX_PEEK_BYTES,
                peek_bytes
            );
        }

        let connect_timeout_ms: u64 = var("DBX_ROUTER_CONNECT_TIMEOUT_MS")
            .map(|v| v.parse())
            .transpose()
            .context("DBX_ROUTER_CONNECT_TIMEOUT_MS must be an integer (milliseconds).")?
            .unwrap_or(10_000);

        if connect_timeout_ms == 0 {
            bail!("DBX_ROUTER_CONNECT_TIMEOUT_MS must be greater than zero.");
        }

        let max_connections: Option<usize> = var("DBX_ROUTER_MAX_CONNECTIONS")
            .map(|v| v.parse())
            .transpose()
            .context("DBX_ROUTER_MAX_CONNECTIONS must be an integer.")?
            .filter(|max| *max > 0);

        let log_level = var("DBX_ROUTER_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            listen_addr,
            backend_port,
            backends,
            default_target,
            peek_timeout: Duration::from_millis(peek_timeout_ms),
            peek_bytes,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            max_connections,
            log_level,
        })
    }

    /// Build the immutable backend registry.
    pub fn registry(&self) -> Result<BackendRegistry> {
        let entries = self
            .backends
            .iter()
            .map(|(id, host)| (id.clone(), Backend::new(host.clone(), self.backend_port)));

        BackendRegistry::new(&self.default_target, entries).context("Invalid backend registry")
    }

    /// Listener settings derived from this configuration.
    pub fn listener_config(&self) -> ListenerConfig {
        let mut config = ListenerConfig::new(self.listen_addr);
        config.max_connections = self.max_connections;
        config.look_ahead = LookAheadConfig {
            timeout: self.peek_timeout,
            max_bytes: self.peek_bytes,
        };
        config.connect_timeout = self.connect_timeout;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:1433".parse().unwrap());
        assert_eq!(config.backend_port, 1433);
        assert_eq!(config.default_target, "database1");
        assert_eq!(config.backends.get("database2").unwrap(), "10.0.2.5");
        assert_eq!(config.peek_timeout, Duration::from_secs(5));
        assert_eq!(config.peek_bytes, 1024);
        assert!(config.max_connections.is_none());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_backends_override() {
        let config = load(&[
            (
                "DBX_ROUTER_BACKENDS",
                r#"{"primary":"sql-a.internal","reports":"sql-b.internal"}"#,
            ),
            ("DBX_ROUTER_DEFAULT_TARGET", "primary"),
            ("DBX_ROUTER_BACKEND_PORT", "11433"),
        ])
        .unwrap();

        let registry = config.registry().unwrap();
        assert_eq!(registry.default_target(), "primary");
        assert_eq!(
            registry.lookup("reports").unwrap(),
            &Backend::new("sql-b.internal", 11433)
        );
    }

    #[test]
    fn test_unmapped_default_rejected() {
        let err = load(&[("DBX_ROUTER_DEFAULT_TARGET", "database9")]).unwrap_err();
        assert!(err.to_string().contains("database9"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(load(&[("DBX_ROUTER_BACKENDS", "not json")]).is_err());
        assert!(load(&[("DBX_ROUTER_PEEK_TIMEOUT_MS", "soon")]).is_err());
        assert!(load(&[("DBX_ROUTER_LISTEN_ADDR", "1433")]).is_err());
        assert!(load(&[("DBX_ROUTER_BACKEND_PORT", "70000")]).is_err());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let err = load(&[("DBX_ROUTER_PEEK_BYTES", "0")]).unwrap_err();
        assert!(err.to_string().contains("DBX_ROUTER_PEEK_BYTES"));
        assert!(load(&[("DBX_ROUTER_PEEK_BYTES", "65537")]).is_err());
        assert_eq!(
            load(&[("DBX_ROUTER_PEEK_BYTES", "65536")]).unwrap().peek_bytes,
            65536
        );

        let err = load(&[("DBX_ROUTER_CONNECT_TIMEOUT_MS", "0")]).unwrap_err();
        assert!(err.to_string().contains("DBX_ROUTER_CONNECT_TIMEOUT_MS"));
        assert_eq!(
            load(&[("DBX_ROUTER_CONNECT_TIMEOUT_MS", "1")])
                .unwrap()
                .connect_timeout,
            Duration::from_millis(1)
        );
    }

    #[test]
    fn test_listener_config() {
        let config = load(&[
            ("DBX_ROUTER_PEEK_TIMEOUT_MS", "250"),
            ("DBX_ROUTER_MAX_CONNECTIONS", "32"),
        ])
        .unwrap();

        let listener = config.listener_config();
        assert_eq!(listener.look_ahead.timeout, Duration::from_millis(250));
        assert_eq!(listener.max_connections, Some(32));
    }

    #[test]
    fn test_zero_max_connections_means_unbounded() {
        let config = load(&[("DBX_ROUTER_MAX_CONNECTIONS", "0")]).unwrap();
        assert!(config.max_connections.is_none());
    }
}
