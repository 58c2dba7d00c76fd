//! Network Layer
//!
//! WebSocket server, connection registry and the session handler that routes
//! inbound messages into matchmaking and the duel engine.

pub mod auth;
pub mod connection;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use auth::{validate_token, AuthConfig, AuthError, Authenticator, IdentityResolver, JwtResolver, TokenClaims};
pub use protocol::{ClientMessage, Envelope, ErrorCode, GameActionPayload, ProtocolError};
pub use registry::{BroadcastReport, Connection, ConnectionId, Hub, HubError, Mailbox};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::SessionHandler;
