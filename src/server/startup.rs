//! Testable server startup logic.
//!
//! Provides [`ServerConfig`] and [`ServerHandle`] so the binary and the
//! integration tests start the receiver the same way: bind, serve in a
//! background task, shut down cleanly through a watch channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigSource};
use crate::hooks::origin::{AllowList, GithubMetaAllowList, StaticAllowList};
use crate::server::http::{create_router_with_limit, AppState, DEFAULT_MAX_BODY_BYTES};

/// Everything needed to start a receiver.
pub struct ServerConfig {
    pub config: Arc<ConfigSource>,
    pub allow_list: Arc<dyn AllowList>,
    pub bind_address: SocketAddr,
    pub max_body_bytes: usize,
}

impl ServerConfig {
    /// Config for a server reading `source`, bound to the address and
    /// allow-list `config` describes.
    pub fn from_config(source: Arc<ConfigSource>, config: &Config) -> Result<Self, std::io::Error> {
        let bind_address = resolve_bind_address(&config.host, config.port)?;
        let allow_list = GithubMetaAllowList::new(
            config.github_meta_url.clone(),
            Duration::from_secs(config.allowlist_ttl_secs),
        );
        Ok(ServerConfig {
            config: source,
            allow_list: Arc::new(allow_list),
            bind_address,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    /// Minimal config suitable for integration tests.
    ///
    /// Binds to `127.0.0.1:0` (OS-assigned port) with an empty static
    /// allow-list.
    pub fn for_testing(config: Config) -> Self {
        ServerConfig {
            config: Arc::new(ConfigSource::fixed(config)),
            allow_list: Arc::new(StaticAllowList::new(Vec::new())),
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

fn resolve_bind_address(host: &str, port: u16) -> Result<SocketAddr, std::io::Error> {
    use std::net::ToSocketAddrs;
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("no address for {}:{}", host, port),
        )
    })
}

/// Handle to a running server.  Returned by [`run_server_with_config`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    server_task: JoinHandle<Result<(), std::io::Error>>,
}

impl ServerHandle {
    /// The port the server actually bound to (useful when binding to port 0).
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// `http://ip:port` base URL for the running server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        match tokio::time::timeout(Duration::from_secs(5), self.server_task).await {
            Ok(Ok(Ok(()))) => info!(target: "http", "Server stopped"),
            Ok(Ok(Err(e))) => error!(target: "http", "Server task returned error: {}", e),
            Ok(Err(e)) => error!(target: "http", "Server task panicked: {}", e),
            Err(_) => warn!(target: "http", "Server task did not finish within 5s timeout"),
        }
    }
}

/// Start a server from a fully-assembled [`ServerConfig`].
///
/// Returns a [`ServerHandle`] that exposes the actual bound address and
/// provides a [`ServerHandle::shutdown`] method for clean teardown.
pub async fn run_server_with_config(config: ServerConfig) -> Result<ServerHandle, std::io::Error> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = create_router_with_limit(
        AppState::new(config.config, config.allow_list),
        config.max_body_bytes,
    );

    // Bind TCP listener (supports port 0 for ephemeral port assignment)
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    let local_addr = listener.local_addr()?;
    info!(target: "http", address = %local_addr, "Listening");

    let mut shutdown_watch = shutdown_rx;
    let server_task = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            loop {
                if *shutdown_watch.borrow() {
                    break;
                }
                if shutdown_watch.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
    });

    Ok(ServerHandle {
        local_addr,
        shutdown_tx,
        server_task,
    })
}
