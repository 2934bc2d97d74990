//! WebSocket front door for the room hub.
//!
//! ```text
//! TCP accept ──► HTTP upgrade (/api/ws/{roomId}) ──► split_websocket ──► Hub::connect
//!                     │
//!                     └── x-user-id / x-user-name ──► CallerIdentity
//! ```
//!
//! Everything after the upgrade is transport-agnostic and lives in
//! [`crate::hub`]. This module only owns the listener, the handshake and the
//! connection counters.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};

use crate::client::CallerIdentity;
use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::room::RoomError;
use crate::transport::split_websocket;

/// Header carrying the account id, set by an upstream auth proxy.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the account display name.
pub const USER_NAME_HEADER: &str = "x-user-name";

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),
    #[error(transparent)]
    Room(#[from] RoomError),
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    /// Upgrades refused or failed before a room was joined
    pub rejected_connections: u64,
    pub active_rooms: usize,
}

/// The collaboration server.
#[derive(Clone)]
pub struct CollabServer {
    config: ServerConfig,
    hub: Hub,
    stats: Arc<RwLock<ServerStats>>,
}

impl CollabServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            hub: Hub::new(config.hub),
            config,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr.clone(),
                source,
            })
    }

    /// Bind and serve forever.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on `listener` until `shutdown` resolves, then
    /// close every room so the remaining sessions wind down.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        log::info!("Collab server listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutdown requested, closing rooms");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            log::warn!("Accept failed: {e}");
                            continue;
                        }
                    };
                    log::debug!("New TCP connection from {addr}");

                    let hub = self.hub.clone();
                    let stats = self.stats.clone();
                    let prefix = self.config.path_prefix.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, hub, stats, prefix).await {
                            log::error!("Connection error from {addr}: {e}");
                        }
                    });
                }
            }
        }

        self.hub.shutdown().await;
        Ok(())
    }

    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = self.hub.registry().room_count().await;
        stats
    }
}

/// Upgrade one TCP stream and run its session to completion.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: Hub,
    stats: Arc<RwLock<ServerStats>>,
    prefix: String,
) -> Result<(), ServerError> {
    let mut target: Option<(String, Option<CallerIdentity>)> = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let path = req.uri().path();
        match room_id_from_path(&prefix, path) {
            Some(room_id) => {
                target = Some((room_id, identity_from_headers(req.headers())));
                Ok(resp)
            }
            None => Err(reject(StatusCode::NOT_FOUND, "no room in path")),
        }
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            stats.write().await.rejected_connections += 1;
            return Err(e.into());
        }
    };
    let Some((room_id, identity)) = target else {
        stats.write().await.rejected_connections += 1;
        return Ok(());
    };

    log::info!("WebSocket connection established from {addr} for room {room_id}");
    {
        let mut s = stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let (source, sink) = split_websocket(ws_stream);
    let outcome = match hub.connect(source, sink, &room_id, identity).await {
        Ok(session) => {
            session.join().await;
            Ok(())
        }
        Err(e) => Err(e.into()),
    };

    {
        let mut s = stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
    }
    log::info!("Connection closed from {addr}");
    outcome
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_owned()));
    *response.status_mut() = status;
    response
}

/// Room id addressed by an upgrade request path.
///
/// `/api/ws/doc-1` gives `doc-1` for the default prefix; a path outside the
/// prefix falls back to its last segment. Empty ids are refused.
pub fn room_id_from_path(prefix: &str, path: &str) -> Option<String> {
    let path = path.trim_end_matches('/');
    if path == prefix.trim_end_matches('/') {
        return None;
    }

    let candidate = match path.strip_prefix(prefix) {
        Some(rest) => rest,
        None => path.rsplit('/').next().unwrap_or_default(),
    };
    if candidate.is_empty() || candidate.contains('/') {
        return None;
    }
    Some(candidate.to_owned())
}

fn identity_from_headers(headers: &HeaderMap) -> Option<CallerIdentity> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let user_id = header(USER_ID_HEADER)?;
    let name = header(USER_NAME_HEADER).unwrap_or(user_id);
    Some(CallerIdentity {
        user_id: user_id.to_owned(),
        name: name.to_owned(),
    })
}
