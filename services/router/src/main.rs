//! dbx-router
//!
//! L4 router for SQL Server connections.
//!
//! This service:
//! - Accepts TCP connections on a single listening port
//! - Looks ahead at each connection's first bytes
//! - Picks a backend by marker match, falling back to a default
//! - Relays the connection to that backend until either side closes

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dbx_router::{Config, Listener};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to DBX_ROUTER_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting dbx-router");

    let registry = Arc::new(config.registry()?);
    for (target, backend) in registry.iter() {
        info!(
            target = %target,
            backend_addr = %backend,
            is_default = target == registry.default_target(),
            "Backend registered"
        );
    }

    info!(
        listen_addr = %config.listen_addr,
        backend_count = registry.len(),
        peek_timeout_ms = config.peek_timeout.as_millis() as u64,
        connect_timeout_ms = config.connect_timeout.as_millis() as u64,
        max_connections = ?config.max_connections,
        "Configuration loaded"
    );

    let listener = Listener::bind(config.listener_config(), registry)
        .await
        .with_context(|| format!("Failed to bind listener on {}", config.listen_addr))?;

    Arc::new(listener).run().await?;

    Ok(())
}
