//! WebSocket listener and accept loop.
//!
//! The server owns the TCP listener, upgrades incoming connections to
//! WebSocket on the accepted paths, and spawns one [`RelaySession`] task
//! per client. Ctrl-C triggers a graceful shutdown: the accept loop stops,
//! a shutdown signal is broadcast to every session, and the server waits
//! for the session tasks to drain.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::cli::Config;
use crate::error::{Error, Result};
use crate::registry::SessionRegistry;
use crate::session::RelaySession;

/// Request paths accepted for the WebSocket upgrade. Anything else gets a
/// plain 404 so stray HTTP probes do not turn into relay sessions.
pub const WS_PATHS: &[&str] = &["/websockify", "/websocket"];

/// The relay server: one listener, many sessions.
pub struct RelayServer {
    listener: TcpListener,
    config: Config,
    registry: Arc<SessionRegistry>,
}

impl RelayServer {
    /// Binds the listener. The listen address accepts the ":port" shorthand.
    pub async fn bind(config: Config, registry: Arc<SessionRegistry>) -> Result<Self> {
        let listen_addr = parse_listen_address(&config.listen)?;
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| Error::ListenFailed(e.to_string()))?;
        Ok(Self {
            listener,
            config,
            registry,
        })
    }

    /// The bound address, useful when the listener was bound to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::ListenFailed(e.to_string()))
    }

    /// Runs the accept loop until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let local_addr = self.local_addr()?;

        // Shutdown signal broadcaster: the stats task and every session
        // subscribe to it.
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        // Periodic process-wide stats logging.
        let stats_registry = Arc::clone(&self.registry);
        let mut stats_shutdown_rx = shutdown_tx.subscribe();
        let stats_interval = self.config.idle_log_interval;
        let stats_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(stats_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        log_stats(&stats_registry);
                    }
                    _ = stats_shutdown_rx.recv() => {
                        tracing::debug!("stats task received shutdown signal");
                        break;
                    }
                }
            }
        });

        tracing::info!(
            backend = %format!("{}:{}", self.config.backend_host, self.config.backend_port),
            "server listening on {}", local_addr
        );

        // Track active session tasks so shutdown can wait for them.
        let active_sessions = Arc::new(Mutex::new(Vec::new()));

        loop {
            tokio::select! {
                incoming = self.listener.accept() => {
                    match incoming {
                        Ok((stream, peer_addr)) => {
                            let config = self.config.clone();
                            let registry = Arc::clone(&self.registry);
                            let session_shutdown_rx = shutdown_tx.subscribe();

                            let handle = tokio::spawn(async move {
                                if let Err(e) =
                                    handle_client(stream, peer_addr, config, registry, session_shutdown_rx).await
                                {
                                    tracing::warn!(%peer_addr, error = %e, "client connection error");
                                }
                            });

                            active_sessions.lock().await.push(handle);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to accept connection");
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received SIGINT, initiating graceful shutdown");
                    let _ = shutdown_tx.send(());
                    break;
                }
            }
        }

        // Stop accepting, then wait for background work to drain.
        drop(self.listener);
        let _ = stats_handle.await;

        let handles: Vec<_> = {
            let mut sessions = active_sessions.lock().await;
            std::mem::take(&mut *sessions)
        };
        for handle in handles {
            let _ = handle.await;
        }

        tracing::info!("server shutdown complete");
        Ok(())
    }
}

/// Upgrades one accepted TCP connection and runs its relay session.
async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Config,
    registry: Arc<SessionRegistry>,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    // Interactive traffic, so push bytes out as they arrive.
    let _ = stream.set_nodelay(true);

    let mut path = String::new();
    let callback = |req: &Request, response: Response| {
        path = req.uri().path().to_string();
        if WS_PATHS.contains(&path.as_str()) {
            Ok(response)
        } else {
            let mut resp = ErrorResponse::new(Some("not found\n".to_string()));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            Err(resp)
        }
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .map_err(|e| Error::Handshake(e.to_string()))?;

    tracing::info!(%peer_addr, path = %path, "websocket client connected");

    let session = RelaySession::new(config, registry);
    session.run(ws, Some(shutdown_rx)).await;
    Ok(())
}

/// Logs a registry snapshot: counters at info when anything is active, the
/// full JSON snapshot at debug.
fn log_stats(registry: &SessionRegistry) {
    let snapshot = registry.snapshot();
    if snapshot.active_sessions > 0 {
        tracing::info!(
            active_sessions = snapshot.active_sessions,
            total_sessions = snapshot.total_sessions,
            reconnect_attempts = snapshot.reconnect_attempts,
            "relay stats"
        );
    }
    if let Ok(json) = serde_json::to_string(&snapshot) {
        tracing::debug!(stats = %json, "relay stats snapshot");
    }
}

/// Parses a listen address string into a SocketAddr.
fn parse_listen_address(listen: &str) -> Result<SocketAddr> {
    // Handle ":port" format by prepending "0.0.0.0"
    let addr_str = if listen.starts_with(':') {
        format!("0.0.0.0{}", listen)
    } else {
        listen.to_string()
    };

    addr_str
        .parse()
        .map_err(|e| Error::Config(format!("invalid listen address '{}': {}", listen, e)))
}
