//! WebSocket Game Server
//!
//! Accepts WebSocket connections, decodes JSON frames and hands them to the
//! `GameHub`. One task per connection reads, one writes.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::moderation::ModerationPolicy;
use crate::network::auth::AuthConfig;
use crate::network::hub::{GameHub, HubConfig};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::persist::Finalizer;

/// Outbound queue depth per connection.
const OUTBOUND_CAPACITY: usize = 64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections silent for this long are dropped.
    pub idle_timeout: Duration,
    /// Delay between game end and session removal.
    pub grace_period: Duration,
    /// Verify timeout claims against the server clock.
    pub verify_timeouts: bool,
    /// Slack for timeout verification.
    pub clock_tolerance: TimeDelta,
    /// Journal file for finished matches; in-memory when unset.
    pub record_path: Option<PathBuf>,
    /// Server version string.
    pub version: String,
    /// Identity token settings.
    pub auth: AuthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(1200),
            grace_period: Duration::from_secs(5),
            verify_timeouts: false,
            clock_tolerance: TimeDelta::milliseconds(2000),
            record_path: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read `GAMBIT_*` and `AUTH_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_parse("GAMBIT_BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_connections: env_parse("GAMBIT_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            idle_timeout: env_parse("GAMBIT_IDLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            grace_period: env_parse("GAMBIT_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.grace_period),
            verify_timeouts: std::env::var("GAMBIT_VERIFY_TIMEOUTS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.verify_timeouts),
            clock_tolerance: env_parse("GAMBIT_CLOCK_TOLERANCE_MS")
                .map(TimeDelta::milliseconds)
                .unwrap_or(defaults.clock_tolerance),
            record_path: std::env::var("GAMBIT_RECORD_PATH").ok().map(PathBuf::from),
            version: defaults.version,
            auth: AuthConfig::from_env(),
        }
    }

    /// Settings for the hub.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            grace_period: self.grace_period,
            verify_timeouts: self.verify_timeouts,
            clock_tolerance: self.clock_tolerance,
            auth: self.auth.clone(),
            moderation: ModerationPolicy::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable setting");
            None
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Event router.
    hub: Arc<GameHub>,
    /// One permit per open connection.
    connection_slots: Arc<Semaphore>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Server submitting finished games to `finalizer`.
    pub fn new(config: ServerConfig, finalizer: Finalizer) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let hub = Arc::new(GameHub::new(config.hub_config(), finalizer));
        let connection_slots = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config,
            hub,
            connection_slots,
            shutdown_tx,
        }
    }

    /// Event router.
    pub fn hub(&self) -> &Arc<GameHub> {
        &self.hub
    }

    /// Bind and serve until shutdown.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(
            addr = %listener.local_addr()?,
            version = %self.config.version,
            "Game server listening"
        );
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let hub = self.hub.clone();
        let slots = Arc::clone(&self.connection_slots);
        let idle_timeout = self.config.idle_timeout;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            // held until this task ends
            let Ok(_slot) = slots.try_acquire_owned() else {
                warn!("Connection limit reached, rejecting {}", addr);
                let overloaded = ServerMessage::error(ErrorCode::ServerOverloaded, "Server is full");
                if let Ok(text) = overloaded.to_json() {
                    let _ = ws_sender.send(Message::Text(text)).await;
                }
                let _ = ws_sender.send(Message::Close(None)).await;
                return;
            };

            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);
            let conn = hub.connect(msg_tx.clone()).await;
            info!(%conn, %addr, "Client connected");

            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    next = tokio::time::timeout(idle_timeout, ws_receiver.next()) => {
                        let frame = match next {
                            Ok(frame) => frame,
                            Err(_) => {
                                info!(%conn, "Idle timeout");
                                break;
                            }
                        };
                        let text = match frame {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                                Ok(text) => text,
                                Err(_) => {
                                    debug!(%conn, "Non UTF-8 binary frame dropped");
                                    continue;
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(%conn, "Client closed connection");
                                break;
                            }
                            Some(Err(e)) => {
                                debug!(%conn, "WebSocket error: {}", e);
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        match ClientMessage::from_json(&text) {
                            Ok(msg) => hub.handle(conn, msg).await,
                            Err(e) => {
                                debug!(%conn, "Invalid message: {}", e);
                                let _ = msg_tx.try_send(ServerMessage::error(
                                    ErrorCode::InvalidInput,
                                    "Invalid message format",
                                ));
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.try_send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            hub.disconnect(conn).await;
            // give the writer a moment to flush the last frames
            tokio::time::sleep(Duration::from_millis(50)).await;
            sender_task.abort();
            info!(%conn, "Client cleaned up");
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Active connection count.
    pub async fn connection_count(&self) -> usize {
        self.hub.client_count().await
    }

    /// Live session count.
    pub async fn session_count(&self) -> usize {
        self.hub.sessions().session_count().await
    }

    /// Seekers waiting in matchmaking.
    pub async fn queue_size(&self) -> usize {
        self.hub.queue().total_len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryMatchStore;
    use tokio_tungstenite::connect_async;

    fn server(config: ServerConfig) -> GameServer {
        let (finalizer, _worker) = Finalizer::spawn(Arc::new(MemoryMatchStore::new()));
        GameServer::new(config, finalizer)
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert!(!config.verify_timeouts);
        assert!(config.record_path.is_none());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = server(ServerConfig::default());
        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.session_count().await, 0);
        assert_eq!(server.queue_size().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = server(ServerConfig::default());
        server.shutdown();
        // Should not panic
    }

    async fn next_reply<S>(ws: &mut S) -> ServerMessage
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return ServerMessage::from_json(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended early: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_connection_limit_enforced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(server(ServerConfig {
            max_connections: 1,
            ..Default::default()
        }));
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });

        let (mut first, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        first
            .send(Message::Text(r#"{"type":"ping","timestamp":1}"#.to_string()))
            .await
            .unwrap();
        assert!(matches!(next_reply(&mut first).await, ServerMessage::Pong { .. }));

        let (mut second, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        match next_reply(&mut second).await {
            ServerMessage::Error(err) => assert_eq!(err.code, ErrorCode::ServerOverloaded),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(server.connection_count().await, 1);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_ping_over_websocket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(server(ServerConfig::default()));
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws.send(Message::Text(r#"{"type":"ping","timestamp":5}"#.to_string()))
            .await
            .unwrap();
        ws.send(Message::Text("not json".to_string())).await.unwrap();

        let mut replies = Vec::new();
        while replies.len() < 2 {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => replies.push(ServerMessage::from_json(&text).unwrap()),
                Some(Ok(_)) => continue,
                other => panic!("connection ended early: {:?}", other),
            }
        }
        assert!(matches!(replies[0], ServerMessage::Pong { timestamp: 5, .. }));
        assert!(matches!(&replies[1], ServerMessage::Error(err) if err.code == ErrorCode::InvalidInput));
        assert_eq!(server.connection_count().await, 1);

        server.shutdown();
    }
}
