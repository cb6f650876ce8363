//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::{ChatError, Result};
use crate::server::room::RoomName;

/// Room a client joins when its connection request names none
pub const DEFAULT_ROOM: &str = "defaultroom";

/// ALPN protocol identifier shared by server and client
pub const ALPN_PROTOCOL: &[u8] = b"chat";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// TLS certificate chain (PEM). Self-signed when absent.
    pub cert_path: Option<PathBuf>,
    /// TLS private key (PEM)
    pub key_path: Option<PathBuf>,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Connection idle timeout
    pub idle_timeout: Duration,
    /// Room used when a client does not ask for one
    pub default_room: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 4433)),
            cert_path: None,
            key_path: None,
            max_connections: 10000,
            idle_timeout: Duration::from_secs(300),
            default_room: DEFAULT_ROOM.to_string(),
        }
    }
}

impl ServerConfig {
    /// Check the configuration, returning the parsed default room
    pub fn validate(&self) -> Result<RoomName> {
        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err(ChatError::config(
                "TLS certificate and key must be provided together",
            ));
        }

        if self.max_connections == 0 {
            return Err(ChatError::config("max_connections must be at least 1"));
        }

        if self.max_connections > Semaphore::MAX_PERMITS {
            return Err(ChatError::config(format!(
                "max_connections must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }

        quinn::IdleTimeout::try_from(self.idle_timeout)
            .map_err(|e| ChatError::config(format!("Invalid idle timeout: {}", e)))?;

        RoomName::parse(&self.default_room)
            .map_err(|e| ChatError::config(format!("Invalid default room: {}", e.message())))
    }
}
