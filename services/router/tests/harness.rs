//! Test harness for router integration tests.
//!
//! Provides helpers to spawn TCP backends and a router listener bound to
//! ephemeral loopback ports.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use dbx_router::{Backend, BackendRegistry, Listener, ListenerConfig, ListenerStats};

/// Backend that echoes everything back, prefixed with its tag on first write.
#[allow(dead_code)]
pub struct TaggedEchoBackend {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicU64>,
    pub bytes_received: Arc<AtomicU64>,
    pub received: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TaggedEchoBackend {
    pub async fn spawn(tag: &'static str) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicU64::new(0));
        let bytes_received = Arc::new(AtomicU64::new(0));
        let (received_tx, received) = mpsc::unbounded_channel();

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let conn_clone = Arc::clone(&connections);
        let bytes_clone = Arc::clone(&bytes_received);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((mut stream, _)) => {
                                conn_clone.fetch_add(1, Ordering::Relaxed);
                                let bytes = Arc::clone(&bytes_clone);
                                let received_tx = received_tx.clone();
                                tokio::spawn(async move {
                                    let mut buf = vec![0u8; 8192];
                                    let mut tagged = false;
                                    loop {
                                        match stream.read(&mut buf).await {
                                            Ok(0) => break,
                                            Ok(n) => {
                                                bytes.fetch_add(n as u64, Ordering::Relaxed);
                                                let _ = received_tx.send(buf[..n].to_vec());
                                                if !tagged {
                                                    tagged = true;
                                                    if stream.write_all(tag.as_bytes()).await.is_err() {
                                                        break;
                                                    }
                                                }
                                                if stream.write_all(&buf[..n]).await.is_err() {
                                                    break;
                                                }
                                            }
                                            Err(_) => break,
                                        }
                                    }
                                });
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            connections,
            bytes_received,
            received,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn backend(&self) -> Backend {
        Backend::new(self.addr.ip().to_string(), self.addr.port())
    }
}

impl Drop for TaggedEchoBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Backend that reads the client's first chunk, replies with a fixed payload,
/// then closes.
#[allow(dead_code)]
pub struct SendThenCloseBackend {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl SendThenCloseBackend {
    #[allow(dead_code)]
    pub async fn spawn(payload: Vec<u8>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((mut stream, _)) => {
                                let payload = payload.clone();
                                tokio::spawn(async move {
                                    let mut buf = vec![0u8; 1024];
                                    let _ = tokio::time::timeout(
                                        Duration::from_secs(1),
                                        stream.read(&mut buf),
                                    )
                                    .await;
                                    let _ = stream.write_all(&payload).await;
                                    let _ = stream.shutdown().await;
                                });
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    #[allow(dead_code)]
    pub fn backend(&self) -> Backend {
        Backend::new(self.addr.ip().to_string(), self.addr.port())
    }
}

impl Drop for SendThenCloseBackend {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A loopback address with nothing listening on it.
#[allow(dead_code)]
pub async fn dead_backend() -> Backend {
    let temp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = temp_listener.local_addr().unwrap().port();
    drop(temp_listener);
    Backend::new("127.0.0.1", dead_port)
}

pub struct RouterHandle {
    pub listen_addr: SocketAddr,
    pub stats: Arc<ListenerStats>,
}

impl RouterHandle {
    /// Spawn a router with `database1` as default and `database2` as the
    /// marker-routed target.
    pub async fn spawn(
        database1: Backend,
        database2: Backend,
        peek_timeout: Duration,
    ) -> io::Result<Self> {
        Self::spawn_with_cap(database1, database2, peek_timeout, None).await
    }

    /// Like [`RouterHandle::spawn`], with an optional admission cap.
    #[allow(dead_code)]
    pub async fn spawn_with_cap(
        database1: Backend,
        database2: Backend,
        peek_timeout: Duration,
        max_connections: Option<usize>,
    ) -> io::Result<Self> {
        let registry = BackendRegistry::new(
            "database1",
            vec![
                ("database1".to_string(), database1),
                ("database2".to_string(), database2),
            ],
        )
        .map_err(io::Error::other)?;

        let mut config = ListenerConfig::new("127.0.0.1:0".parse().unwrap());
        config.look_ahead.timeout = peek_timeout;
        config.connect_timeout = Duration::from_secs(1);
        config.max_connections = max_connections;

        let listener = Listener::bind(config, Arc::new(registry)).await?;
        let listen_addr = listener.local_addr()?;
        let stats = listener.stats_handle();
        let listener = Arc::new(listener);

        tokio::spawn(async move {
            let _ = listener.run().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self { listen_addr, stats })
    }

    #[allow(dead_code)]
    pub fn active(&self) -> u64 {
        self.stats.connections_active.load(Ordering::Relaxed)
    }

    #[allow(dead_code)]
    pub fn closed(&self) -> u64 {
        self.stats.connections_closed.load(Ordering::Relaxed)
    }

    /// Poll until no connection is active, or give up after `limit`.
    #[allow(dead_code)]
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.active() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.active() == 0
    }
}
