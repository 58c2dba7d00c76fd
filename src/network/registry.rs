//! Connection Registry
//!
//! The identity→connection map lives inside a single control loop. Every
//! registration, eviction, targeted send and broadcast is a command processed
//! in order, so no caller can observe a send to a connection that is being
//! evicted. [`Hub`] is the cloneable handle to that loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::state::Identity;
use crate::matchmaking::Matchmaker;
use crate::network::protocol::Envelope;

/// Unique per accepted connection, so a stale disconnect can't remove a newer one.
pub type ConnectionId = Uuid;

/// Receiving end of a connection's outbound queue.
pub type Mailbox = mpsc::Receiver<Arc<Envelope>>;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// No live connection for this identity.
    #[error("user {0} is not connected")]
    NotConnected(Identity),
    /// Mailbox full; the connection was evicted.
    #[error("send buffer for user {0} is full")]
    MailboxFull(Identity),
    /// Control loop is gone.
    #[error("registry stopped")]
    Stopped,
}

/// One live connection as seen by the registry.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    identity: Identity,
    mailbox: mpsc::Sender<Arc<Envelope>>,
}

impl Connection {
    /// New connection with a bounded mailbox of `capacity`.
    pub fn new(identity: Identity, capacity: usize) -> (Self, Mailbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: Uuid::new_v4(),
            identity,
            mailbox: tx,
        };
        (connection, rx)
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Bound identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients that accepted the envelope.
    pub delivered: usize,
    /// Recipients dropped for being full or closed.
    pub evicted: Vec<Identity>,
}

enum HubCommand {
    Register {
        connection: Connection,
        reply: oneshot::Sender<()>,
    },
    Unregister {
        identity: Identity,
        connection_id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    SendToUser {
        identity: Identity,
        envelope: Arc<Envelope>,
        reply: oneshot::Sender<Result<(), HubError>>,
    },
    Broadcast {
        envelope: Arc<Envelope>,
        reply: oneshot::Sender<BroadcastReport>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    IsConnected {
        identity: Identity,
        reply: oneshot::Sender<bool>,
    },
}

/// Handle to the registry's control loop.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Spawn the control loop. It stops when the last handle is dropped.
    pub fn spawn(matchmaking: Arc<Matchmaker>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(256);
        let registry = Registry {
            connections: BTreeMap::new(),
            matchmaking,
        };
        let handle = tokio::spawn(registry.run(rx));
        (Self { commands: tx }, handle)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, HubError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Insert a connection, evicting any previous one for the same identity.
    pub async fn register(&self, connection: Connection) -> Result<(), HubError> {
        self.request(|reply| HubCommand::Register { connection, reply })
            .await
    }

    /// Remove `identity` if still mapped to `connection_id`, then cancel its
    /// matchmaking. Returns whether anything was removed.
    pub async fn unregister(
        &self,
        identity: &Identity,
        connection_id: ConnectionId,
    ) -> Result<bool, HubError> {
        let identity = identity.clone();
        self.request(|reply| HubCommand::Unregister {
            identity,
            connection_id,
            reply,
        })
        .await
    }

    /// Non-blocking enqueue to one identity's mailbox.
    pub async fn send_to_user(&self, identity: &Identity, envelope: Envelope) -> Result<(), HubError> {
        let identity = identity.clone();
        let envelope = Arc::new(envelope);
        self.request(|reply| HubCommand::SendToUser {
            identity,
            envelope,
            reply,
        })
        .await?
    }

    /// Enqueue to every mailbox; slow peers are evicted.
    pub async fn broadcast(&self, envelope: Envelope) -> Result<BroadcastReport, HubError> {
        let envelope = Arc::new(envelope);
        self.request(|reply| HubCommand::Broadcast { envelope, reply })
            .await
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> Result<usize, HubError> {
        self.request(|reply| HubCommand::Count { reply }).await
    }

    /// Whether `identity` has a registered connection.
    pub async fn is_connected(&self, identity: &Identity) -> Result<bool, HubError> {
        let identity = identity.clone();
        self.request(|reply| HubCommand::IsConnected { identity, reply })
            .await
    }
}

/// State owned by the control loop.
struct Registry {
    connections: BTreeMap<Identity, Connection>,
    matchmaking: Arc<Matchmaker>,
}

enum Delivery {
    Sent,
    Full,
    Closed,
}

impl Registry {
    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                HubCommand::Register { connection, reply } => {
                    self.register(connection);
                    let _ = reply.send(());
                }
                HubCommand::Unregister {
                    identity,
                    connection_id,
                    reply,
                } => {
                    let removed = self.unregister(&identity, connection_id).await;
                    let _ = reply.send(removed);
                }
                HubCommand::SendToUser {
                    identity,
                    envelope,
                    reply,
                } => {
                    let result = self.send_to_user(&identity, envelope).await;
                    let _ = reply.send(result);
                }
                HubCommand::Broadcast { envelope, reply } => {
                    let report = self.broadcast(envelope).await;
                    let _ = reply.send(report);
                }
                HubCommand::Count { reply } => {
                    let _ = reply.send(self.connections.len());
                }
                HubCommand::IsConnected { identity, reply } => {
                    let _ = reply.send(self.connections.contains_key(&identity));
                }
            }
        }
        debug!("Registry stopped");
    }

    fn register(&mut self, connection: Connection) {
        let identity = connection.identity.clone();
        // Dropping the old sender closes its mailbox
        if let Some(old) = self.connections.insert(identity.clone(), connection) {
            info!(user = %identity, old = %old.id, "Existing connection replaced");
        }
        info!(user = %identity, connections = self.connections.len(), "User connected");
    }

    async fn unregister(&mut self, identity: &Identity, connection_id: ConnectionId) -> bool {
        match self.connections.get(identity) {
            Some(current) if current.id == connection_id => {}
            _ => return false,
        }
        self.connections.remove(identity);
        info!(user = %identity, connections = self.connections.len(), "User disconnected");
        self.cancel_matchmaking(identity).await;
        true
    }

    async fn send_to_user(&mut self, identity: &Identity, envelope: Arc<Envelope>) -> Result<(), HubError> {
        let connection = self
            .connections
            .get(identity)
            .ok_or_else(|| HubError::NotConnected(identity.clone()))?;

        match Self::deliver(connection, envelope) {
            Delivery::Sent => Ok(()),
            Delivery::Full => {
                self.evict(identity).await;
                Err(HubError::MailboxFull(identity.clone()))
            }
            Delivery::Closed => {
                self.evict(identity).await;
                Err(HubError::NotConnected(identity.clone()))
            }
        }
    }

    async fn broadcast(&mut self, envelope: Arc<Envelope>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for (identity, connection) in &self.connections {
            match Self::deliver(connection, envelope.clone()) {
                Delivery::Sent => report.delivered += 1,
                Delivery::Full | Delivery::Closed => report.evicted.push(identity.clone()),
            }
        }
        for identity in &report.evicted {
            self.evict(identity).await;
        }
        debug!(kind = %envelope.kind, delivered = report.delivered, "Broadcast");
        report
    }

    fn deliver(connection: &Connection, envelope: Arc<Envelope>) -> Delivery {
        match connection.mailbox.try_send(envelope) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Drop a dead or slow connection and its matchmaking entry.
    async fn evict(&mut self, identity: &Identity) {
        if self.connections.remove(identity).is_some() {
            warn!(user = %identity, "Connection evicted");
            self.cancel_matchmaking(identity).await;
        }
    }

    async fn cancel_matchmaking(&self, identity: &Identity) {
        if let Err(e) = self.matchmaking.cancel_match(identity).await {
            debug!(user = %identity, "No matchmaking to cancel: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_hub() -> (Hub, Arc<Matchmaker>) {
        let matchmaking = Arc::new(Matchmaker::new());
        let (hub, _handle) = Hub::spawn(matchmaking.clone());
        (hub, matchmaking)
    }

    fn ping() -> Envelope {
        Envelope::new("ping", None, serde_json::Value::Null)
    }

    #[tokio::test]
    async fn test_register_replaces_previous_connection() {
        let (hub, _) = spawn_hub();
        let (first, mut first_rx) = Connection::new("alice".into(), 8);
        let first_id = first.id();
        let (second, mut second_rx) = Connection::new("alice".into(), 8);

        hub.register(first).await.unwrap();
        hub.register(second).await.unwrap();

        assert_eq!(hub.connection_count().await.unwrap(), 1);
        // Old mailbox closed
        assert!(first_rx.recv().await.is_none());

        // Stale unregister leaves the new connection in place
        assert!(!hub.unregister(&"alice".into(), first_id).await.unwrap());
        hub.send_to_user(&"alice".into(), ping()).await.unwrap();
        assert_eq!(second_rx.recv().await.unwrap().kind, "ping");
    }

    #[tokio::test]
    async fn test_send_to_unknown_user() {
        let (hub, _) = spawn_hub();
        let err = hub.send_to_user(&"ghost".into(), ping()).await.unwrap_err();
        assert_eq!(err, HubError::NotConnected("ghost".into()));
    }

    #[tokio::test]
    async fn test_full_mailbox_evicts_and_cancels_matchmaking() {
        let (hub, matchmaking) = spawn_hub();
        let (conn, _rx) = Connection::new("alice".into(), 1);
        hub.register(conn).await.unwrap();
        matchmaking.find_match(&"alice".into()).await.unwrap();

        hub.send_to_user(&"alice".into(), ping()).await.unwrap();
        let err = hub.send_to_user(&"alice".into(), ping()).await.unwrap_err();

        assert_eq!(err, HubError::MailboxFull("alice".into()));
        assert!(!hub.is_connected(&"alice".into()).await.unwrap());
        assert_eq!(matchmaking.queue_status().await.queue_size, 0);
    }

    #[tokio::test]
    async fn test_broadcast_continues_past_slow_peer() {
        let (hub, _) = spawn_hub();
        let (slow, _slow_rx) = Connection::new("slow".into(), 1);
        let (fast, mut fast_rx) = Connection::new("fast".into(), 8);
        hub.register(slow).await.unwrap();
        hub.register(fast).await.unwrap();

        hub.broadcast(ping()).await.unwrap();
        let report = hub.broadcast(ping()).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, vec![Identity::from("slow")]);
        assert_eq!(hub.connection_count().await.unwrap(), 1);
        assert!(fast_rx.recv().await.is_some());
        assert!(fast_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_unregister_cancels_matchmaking() {
        let (hub, matchmaking) = spawn_hub();
        let (conn, _rx) = Connection::new("alice".into(), 8);
        let id = conn.id();
        hub.register(conn).await.unwrap();
        matchmaking.find_match(&"alice".into()).await.unwrap();

        assert!(hub.unregister(&"alice".into(), id).await.unwrap());
        assert_eq!(hub.connection_count().await.unwrap(), 0);
        assert_eq!(matchmaking.queue_status().await.waiting_rooms, 0);
    }

    #[tokio::test]
    async fn test_closed_mailbox_reports_not_connected() {
        let (hub, _) = spawn_hub();
        let (conn, rx) = Connection::new("alice".into(), 8);
        hub.register(conn).await.unwrap();
        drop(rx);

        let err = hub.send_to_user(&"alice".into(), ping()).await.unwrap_err();
        assert_eq!(err, HubError::NotConnected("alice".into()));
        assert_eq!(hub.connection_count().await.unwrap(), 0);
    }
}
