//! Transport layer
//!
//! This module provides:
//! - The framed [`Connection`] with its Open/Closing/Closed lifecycle
//! - QUIC endpoint setup and the stream pump feeding connections

pub mod connection;
pub mod quic;

pub use connection::{Connection, ConnectionId, TransportEnd, TransportState};
pub use quic::{pump, read_frame, server_endpoint, write_frame};
