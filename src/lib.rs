//! QUIC chat-room session broker
//!
//! Clients connect over QUIC, are grouped into named rooms, and every chat
//! or presence payload a member sends is fanned out to the other members of
//! that room. Rooms live purely in memory.
//!
//! The core is made of four pieces:
//! - [`Connection`]: one client's framed, bidirectional transport
//! - [`Room`]: a named member set with ordered fan-out
//! - [`Registry`]: the process-wide room name to room mapping
//! - [`Broker`]: the per-connection state machine routing frames to rooms

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{ChatClient, ChatClientConfig, ClientEvent};
pub use config::{DEFAULT_ROOM, ServerConfig};
pub use error::{ChatError, Result};
pub use server::{Broker, ChatServer, Registry, Room, RoomName, SessionState};
pub use transport::{Connection, ConnectionId, TransportEnd, TransportState};

use std::time::{SystemTime, UNIX_EPOCH};

/// Get current timestamp in milliseconds since UNIX epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
