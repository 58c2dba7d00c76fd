//! WebSocket Game Server
//!
//! Async WebSocket server for duel connections. Authenticates during the
//! upgrade, wires the registry, matchmaking and duel engine together and runs
//! the periodic cleanup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::game::card::{BuiltinCardSource, CardCatalog, CardSource, CatalogError, JsonFileCardSource};
use crate::game::engine::DuelEngine;
use crate::game::events::DuelEvent;
use crate::game::rules::DuelConfig;
use crate::game::state::{DuelId, Identity};
use crate::matchmaking::{MatchFound, Matchmaker, QueueStatus};
use crate::network::auth::{AuthConfig, Authenticator};
use crate::network::connection::{next_inbound, write_pump, Inbound, PumpSettings};
use crate::network::protocol::Envelope;
use crate::network::registry::{Connection, Hub, HubError};
use crate::network::session::SessionHandler;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound mailbox capacity per connection.
    pub mailbox_capacity: usize,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
    /// Keepalive ping interval.
    pub ping_period: Duration,
    /// Silence after which a connection is dropped.
    pub pong_wait: Duration,
    /// Deadline for writing one frame.
    pub write_wait: Duration,
    /// Age after which waiting rooms are swept.
    pub room_max_age: Duration,
    /// Interval between sweeps.
    pub cleanup_interval: Duration,
    /// How long finished duels stay readable.
    pub finished_duel_ttl: Duration,
    /// JSON card catalog; the built-in set is used when absent.
    pub card_catalog_path: Option<PathBuf>,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            mailbox_capacity: 256,
            max_message_size: 512,
            ping_period: Duration::from_secs(30),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            room_max_age: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(30),
            finished_duel_ttl: Duration::from_secs(600),
            card_catalog_path: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bind_addr = env_parse::<SocketAddr>("BIND_ADDR")
            .or_else(|| env_parse::<u16>("PORT").map(|port| SocketAddr::from(([0, 0, 0, 0], port))))
            .unwrap_or(defaults.bind_addr);

        Self {
            bind_addr,
            max_connections: env_parse("MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            mailbox_capacity: env_parse("MAILBOX_CAPACITY").unwrap_or(defaults.mailbox_capacity),
            max_message_size: env_parse("MAX_MESSAGE_SIZE").unwrap_or(defaults.max_message_size),
            ping_period: env_secs("PING_PERIOD_SECS").unwrap_or(defaults.ping_period),
            pong_wait: env_secs("PONG_WAIT_SECS").unwrap_or(defaults.pong_wait),
            write_wait: env_secs("WRITE_WAIT_SECS").unwrap_or(defaults.write_wait),
            room_max_age: env_secs("ROOM_MAX_AGE_SECS").unwrap_or(defaults.room_max_age),
            cleanup_interval: env_secs("CLEANUP_INTERVAL_SECS").unwrap_or(defaults.cleanup_interval),
            finished_duel_ttl: env_secs("FINISHED_DUEL_TTL_SECS").unwrap_or(defaults.finished_duel_ttl),
            card_catalog_path: std::env::var("CARD_CATALOG_PATH").ok().map(PathBuf::from),
            version: defaults.version,
        }
    }

    fn pump_settings(&self) -> PumpSettings {
        PumpSettings {
            ping_period: self.ping_period,
            pong_wait: self.pong_wait,
            write_wait: self.write_wait,
        }
    }

    /// Load the card catalog this config points at.
    pub fn load_catalog(&self) -> Result<CardCatalog, CatalogError> {
        let source: Box<dyn CardSource> = match &self.card_catalog_path {
            Some(path) => Box::new(JsonFileCardSource::new(path)),
            None => Box::new(BuiltinCardSource),
        };
        CardCatalog::load(source.as_ref())
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] HubError),
}

/// Where an upgraded connection was headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Lobby,
    Duel(DuelId),
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Connect-time authentication.
    auth: Arc<Authenticator>,
    /// Connection registry.
    hub: Hub,
    /// Matchmaking coordinator.
    matchmaking: Arc<Matchmaker>,
    /// Duel engine.
    duels: Arc<DuelEngine>,
    /// Inbound message handler.
    session: SessionHandler,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server. Spawns the registry and engine tasks.
    pub fn new(config: ServerConfig, auth: AuthConfig, catalog: CardCatalog, rules: DuelConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        let matchmaking = Arc::new(Matchmaker::new());
        let (hub, _) = Hub::spawn(matchmaking.clone());
        let (engine, _) = DuelEngine::spawn(catalog, rules);
        let duels = Arc::new(engine);

        let cb_hub = hub.clone();
        let cb_duels = duels.clone();
        // Weak: the matchmaker owns this callback
        let cb_matchmaking = Arc::downgrade(&matchmaking);
        matchmaking.set_match_callback(Arc::new(move |found: MatchFound| -> BoxFuture<'static, ()> {
            Box::pin(Self::on_match_found(
                found,
                cb_hub.clone(),
                cb_duels.clone(),
                cb_matchmaking.clone(),
            ))
        }));

        let session = SessionHandler::new(hub.clone(), matchmaking.clone(), duels.clone());

        Self {
            config,
            auth: Arc::new(Authenticator::new(auth)),
            hub,
            matchmaking,
            duels,
            session,
            shutdown_tx,
        }
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);
        self.run_with_listener(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let cleanup_handle = tokio::spawn(Self::run_cleanup_loop(
            self.matchmaking.clone(),
            self.duels.clone(),
            self.config.clone(),
        ));
        let events_handle = tokio::spawn(Self::forward_duel_events(
            self.duels.subscribe(),
            self.hub.clone(),
            self.matchmaking.clone(),
            self.duels.clone(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let connections = self.hub.connection_count().await?;
                            if connections >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

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

        cleanup_handle.abort();
        events_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let auth = self.auth.clone();
        let hub = self.hub.clone();
        let session = self.session.clone();
        let settings = self.config.pump_settings();
        let mailbox_capacity = self.config.mailbox_capacity;
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        ws_config.max_frame_size = Some(self.config.max_message_size);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut accepted = None;
            let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                let resolved = authorize(&auth, request)?;
                accepted = Some(resolved);
                Ok(response)
            };

            let ws_stream = match accept_hdr_async_with_config(stream, callback, Some(ws_config)).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };
            let Some((identity, route)) = accepted else {
                return;
            };

            let (ws_sender, mut ws_receiver) = ws_stream.split();
            let (connection, mailbox) = Connection::new(identity.clone(), mailbox_capacity);
            let connection_id = connection.id();
            let mut writer = tokio::spawn(write_pump(ws_sender, mailbox, settings));

            if hub.register(connection).await.is_err() {
                writer.abort();
                return;
            }
            info!(user = %identity, %addr, "Connection registered");

            if let Err(e) = hub.broadcast(Envelope::user_connected(&identity)).await {
                warn!("Broadcast failed: {}", e);
            }
            if let Route::Duel(duel_id) = route {
                session.connect_duel(&identity, duel_id).await;
            }

            loop {
                tokio::select! {
                    inbound = next_inbound(&mut ws_receiver, settings.pong_wait) => match inbound {
                        Inbound::Text(text) => session.handle_text(&identity, &text).await,
                        Inbound::Closed => break,
                    },
                    _ = &mut writer => {
                        debug!(user = %identity, "Writer finished");
                        break;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }

            // Dropping the mailbox sender lets the writer send Close
            if let Err(e) = hub.unregister(&identity, connection_id).await {
                warn!("Unregister failed: {}", e);
            }
            info!(user = %identity, %addr, "Client cleaned up");
        });
    }

    /// Create the duel for a fresh pairing and tell both players.
    async fn on_match_found(
        found: MatchFound,
        hub: Hub,
        duels: Arc<DuelEngine>,
        matchmaking: Weak<Matchmaker>,
    ) {
        let Some(matchmaking) = matchmaking.upgrade() else {
            return;
        };
        let [first, second] = found.players.clone();
        let duel_id = duels.create_duel(first, second).await;

        if let Err(e) = matchmaking.start_game(found.room_id).await {
            warn!(room = %found.room_id, "Could not start room: {}", e);
        }
        if let Err(e) = matchmaking.attach_duel(found.room_id, duel_id).await {
            warn!(room = %found.room_id, "Could not attach duel: {}", e);
        }

        let start = Envelope::game_start(found.room_id, duel_id, &found.players);
        for player in &found.players {
            if let Err(e) = hub.send_to_user(player, start.clone()).await {
                warn!(user = %player, "gameStart not delivered: {}", e);
            }
        }
    }

    /// Fan duel events out to both players.
    ///
    /// A finished duel's room is released before `duelEnded` goes out, so a
    /// player reacting to it can queue straight away.
    async fn forward_duel_events(
        mut events: broadcast::Receiver<DuelEvent>,
        hub: Hub,
        matchmaking: Arc<Matchmaker>,
        duels: Arc<DuelEngine>,
    ) {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} duel events", skipped);
                    // A dropped finish would otherwise pin its room
                    Self::release_stale_rooms(&matchmaking, &duels).await;
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let recipients = event.recipients();
            let envelope = match &event {
                DuelEvent::Updated(duel) => Envelope::duel_update(duel),
                DuelEvent::Finished {
                    duel_id,
                    winner,
                    reason,
                    ..
                } => {
                    matchmaking.complete_duel(*duel_id).await;
                    Envelope::duel_ended(*duel_id, winner.as_ref(), *reason)
                }
            };

            for player in &recipients {
                if let Err(e) = hub.send_to_user(player, envelope.clone()).await {
                    debug!(user = %player, "Duel event not delivered: {}", e);
                }
            }
        }
    }

    /// Release rooms whose duel has finished or been dropped.
    async fn release_stale_rooms(matchmaking: &Matchmaker, duels: &DuelEngine) -> usize {
        let mut released = 0;
        for (room_id, duel_id) in matchmaking.attached_duels().await {
            if !duels.is_live(&duel_id).await && matchmaking.complete_room(room_id).await {
                info!(room = %room_id, duel = %duel_id, "Released room of finished duel");
                released += 1;
            }
        }
        released
    }

    /// Run cleanup loop.
    async fn run_cleanup_loop(matchmaking: Arc<Matchmaker>, duels: Arc<DuelEngine>, config: ServerConfig) {
        let mut interval = interval(config.cleanup_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let rooms = matchmaking.cleanup_expired(config.room_max_age).await;
            let released = Self::release_stale_rooms(&matchmaking, &duels).await;
            let finished = duels.cleanup_finished(config.finished_duel_ttl).await;
            let status = matchmaking.queue_status().await;

            info!(
                expired_rooms = rooms,
                released_rooms = released,
                finished_duels = finished,
                queue = status.queue_size,
                rooms = status.total_rooms,
                active = status.active_rooms,
                waiting = status.waiting_rooms,
                "Cleanup pass"
            );
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> Result<usize, GameServerError> {
        Ok(self.hub.connection_count().await?)
    }

    /// Matchmaking counters.
    pub async fn queue_status(&self) -> QueueStatus {
        self.matchmaking.queue_status().await
    }

    /// Duels held by the engine.
    pub async fn duel_count(&self) -> usize {
        self.duels.duel_count().await
    }
}

/// Resolve route and identity from the upgrade request.
fn authorize(auth: &Authenticator, request: &Request) -> Result<(Identity, Route), ErrorResponse> {
    let query = request.uri().query().unwrap_or("");

    let route = match request.uri().path() {
        "/ws" => Route::Lobby,
        "/ws/duel" => {
            let raw = query_param(query, "duelId")
                .ok_or_else(|| reject(StatusCode::BAD_REQUEST, "duelId is required"))?;
            let duel_id = Uuid::parse_str(raw)
                .map_err(|_| reject(StatusCode::BAD_REQUEST, "invalid duelId"))?;
            Route::Duel(duel_id)
        }
        _ => return Err(reject(StatusCode::NOT_FOUND, "not found")),
    };

    let identity = auth
        .authenticate(query_param(query, "token"), query_param(query, "uid"))
        .map_err(|e| reject(StatusCode::UNAUTHORIZED, &e.to_string()))?;

    Ok((identity, route))
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

fn reject(status: StatusCode, message: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message.to_string()));
    *response.status_mut() = status;
    response
}
