//! Server side of the room broker
//!
//! - [`Registry`]: room name to room mapping
//! - [`Room`]: member set and fan-out
//! - [`Broker`]: per-connection state machine
//! - [`ChatServer`]: QUIC accept loop, one task per connection

pub mod broker;
pub mod chat_server;
pub mod registry;
pub mod room;

pub use broker::{Broker, SessionState};
pub use chat_server::ChatServer;
pub use registry::Registry;
pub use room::{BroadcastReport, Room, RoomName};
