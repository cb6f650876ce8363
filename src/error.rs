//! Error handling for the room broker

use thiserror::Error;

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Broker error types
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    /// Send/receive failure on a single connection
    #[error("Transport error: {0}")]
    Transport(String),
    /// Malformed or out-of-state inbound payload
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
    /// Socket/endpoint level errors
    #[error("Network error: {0}")]
    Network(String),
    /// Server internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Get error code for this error type
    pub fn code(&self) -> u32 {
        match self {
            ChatError::Transport(_) => 1000,
            ChatError::Protocol(_) => 1001,
            ChatError::Serialization(_) => 1002,
            ChatError::Config(_) => 1003,
            ChatError::Network(_) => 1004,
            ChatError::Internal(_) => 1005,
        }
    }

    /// Get human-readable error message
    pub fn message(&self) -> &str {
        match self {
            ChatError::Transport(msg)
            | ChatError::Protocol(msg)
            | ChatError::Serialization(msg)
            | ChatError::Config(msg)
            | ChatError::Network(msg)
            | ChatError::Internal(msg) => msg,
        }
    }

    /// True for failures local to one connection's transport
    pub fn is_transport(&self) -> bool {
        matches!(self, ChatError::Transport(_))
    }

    /// Create a transport error
    pub fn transport<T: Into<String>>(msg: T) -> Self {
        ChatError::Transport(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<T: Into<String>>(msg: T) -> Self {
        ChatError::Protocol(msg.into())
    }

    /// Create a serialization error
    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        ChatError::Serialization(msg.into())
    }

    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        ChatError::Config(msg.into())
    }

    /// Create a network error
    pub fn network<T: Into<String>>(msg: T) -> Self {
        ChatError::Network(msg.into())
    }

    /// Create an internal error
    pub fn internal<T: Into<String>>(msg: T) -> Self {
        ChatError::Internal(msg.into())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Network(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<quinn::ConnectError> for ChatError {
    fn from(err: quinn::ConnectError) -> Self {
        ChatError::Transport(format!("QUIC connect error: {}", err))
    }
}

impl From<quinn::ConnectionError> for ChatError {
    fn from(err: quinn::ConnectionError) -> Self {
        ChatError::Transport(format!("QUIC connection error: {}", err))
    }
}

impl From<quinn::ReadError> for ChatError {
    fn from(err: quinn::ReadError) -> Self {
        ChatError::Transport(format!("QUIC read error: {}", err))
    }
}

impl From<quinn::WriteError> for ChatError {
    fn from(err: quinn::WriteError) -> Self {
        ChatError::Transport(format!("QUIC write error: {}", err))
    }
}

impl From<quinn::ClosedStream> for ChatError {
    fn from(err: quinn::ClosedStream) -> Self {
        ChatError::Transport(format!("Stream closed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            ChatError::transport("a"),
            ChatError::protocol("b"),
            ChatError::serialization("c"),
            ChatError::config("d"),
            ChatError::network("e"),
            ChatError::internal("f"),
        ];

        let mut codes: Vec<u32> = errors.iter().map(ChatError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_display_and_message() {
        let err = ChatError::protocol("empty chat body");
        assert_eq!(err.to_string(), "Protocol error: empty chat body");
        assert_eq!(err.message(), "empty chat body");
        assert!(!err.is_transport());
        assert!(ChatError::transport("closed").is_transport());
    }

    #[test]
    fn test_json_error_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: ChatError = parse.unwrap_err().into();
        assert_eq!(err.code(), 1002);
    }
}
