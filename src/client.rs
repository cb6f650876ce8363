//! QUIC chat client
//!
//! The client side of the real-time channel: joins a room, sends chat and
//! presence payloads, switches rooms, and issues the room queries the UI
//! needs (exists / create / list / remove). Everything the server pushes is
//! surfaced as a [`ClientEvent`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use quinn::{ClientConfig as QuinnClientConfig, Connection, Endpoint, RecvStream, SendStream};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::config::ALPN_PROTOCOL;
use crate::error::{ChatError, Result};
use crate::protocol::codec::{Decodable, DecodedMessage, Encodable};
use crate::protocol::frame::FrameCodec;
use crate::protocol::messages::*;
use crate::transport::quic::{read_frame, write_frame};

/// Chat client configuration
#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Client bind address (port 0 for auto)
    pub bind_addr: SocketAddr,
    /// Name the server certificate is issued for
    pub server_name: String,
    /// Handshake timeout
    pub connect_timeout: Duration,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 4433)),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            server_name: "localhost".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Events pushed by the server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Room switch acknowledged
    Joined(String),
    /// Chat payload from another member
    Chat(ChatMessage),
    /// Another member announced itself
    Presence(Presence),
    RoomStatus(RoomStatus),
    RoomCreated(RoomCreated),
    RoomList(Vec<String>),
    RoomRemoved(RoomRemoved),
    Pong(u64),
    Disconnected(String),
}

/// QUIC-based chat client
pub struct ChatClient {
    config: ChatClientConfig,
    endpoint: Option<Endpoint>,
    connection: Option<Connection>,
    send: Option<Mutex<SendStream>>,
    session_id: Option<String>,
    room: Option<String>,
}

impl ChatClient {
    pub fn new(config: ChatClientConfig) -> Self {
        Self {
            config,
            endpoint: None,
            connection: None,
            send: None,
            session_id: None,
            room: None,
        }
    }

    /// Connect and join `room` (the default room when `None`).
    ///
    /// Returns once the server has acknowledged the join, with the receiver
    /// for everything the server pushes afterwards.
    pub async fn connect(
        &mut self,
        room: Option<&str>,
    ) -> Result<mpsc::UnboundedReceiver<ClientEvent>> {
        info!("Connecting to chat server at {}", self.config.server_addr);

        let mut endpoint = Endpoint::client(self.config.bind_addr)
            .map_err(|e| ChatError::network(format!("Failed to create endpoint: {}", e)))?;
        endpoint.set_default_client_config(configure_client()?);

        let connecting = endpoint.connect(self.config.server_addr, &self.config.server_name)?;
        let connection = tokio::time::timeout(self.config.connect_timeout, connecting)
            .await
            .map_err(|_| ChatError::transport("Connection timeout"))??;

        let (mut send, mut recv) = connection.open_bi().await?;
        let mut codec = FrameCodec::new();

        write_frame(&mut send, &Hello::new(room).encode_frame()?).await?;

        let ack_frame = tokio::time::timeout(
            self.config.connect_timeout,
            read_frame(&mut recv, &mut codec),
        )
        .await
        .map_err(|_| ChatError::transport("Timed out waiting for HelloAck"))??
        .ok_or_else(|| ChatError::transport("Server closed the stream during handshake"))?;

        let ack = HelloAck::decode_frame(&ack_frame)
            .map_err(|e| ChatError::protocol(format!("Invalid HelloAck: {}", e)))?;

        info!("Joined room {} as session {}", ack.room, ack.session_id);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(receive_events(recv, codec, event_tx));

        self.endpoint = Some(endpoint);
        self.connection = Some(connection);
        self.send = Some(Mutex::new(send));
        self.session_id = Some(ack.session_id);
        self.room = Some(ack.room);

        Ok(event_rx)
    }

    async fn send<T: Encodable>(&self, message: &T) -> Result<()> {
        let send = self
            .send
            .as_ref()
            .ok_or_else(|| ChatError::transport("Not connected to server"))?;

        let frame = message.encode_frame()?;
        write_frame(&mut *send.lock().await, &frame).await
    }

    /// Announce a display name to the room
    pub async fn announce(&self, name: &str) -> Result<()> {
        let presence = Presence::new(name);
        presence.display_name()?;
        self.send(&presence).await
    }

    /// Send a chat message. Blank bodies are rejected without sending.
    pub async fn send_message(&self, from: &str, msg: &str) -> Result<()> {
        let message = ChatMessage::new(from, msg);
        message.validate()?;
        self.send(&message).await?;
        debug!("Sent chat message ({} bytes)", msg.len());
        Ok(())
    }

    /// Move this session to another room; acknowledged by [`ClientEvent::Joined`]
    pub async fn switch_room(&mut self, room: &str) -> Result<()> {
        self.send(&SwitchRoom {
            room: room.to_string(),
        })
        .await?;
        self.room = Some(room.trim().to_string());
        Ok(())
    }

    /// Ask whether a room exists; answered by [`ClientEvent::RoomStatus`]
    pub async fn check_room(&self, name: &str) -> Result<()> {
        self.send(&RoomExists {
            name: name.to_string(),
        })
        .await
    }

    /// Create a room; answered by [`ClientEvent::RoomCreated`]
    pub async fn create_room(&self, name: &str) -> Result<()> {
        self.send(&CreateRoom {
            name: name.to_string(),
        })
        .await
    }

    /// List rooms; answered by [`ClientEvent::RoomList`]
    pub async fn list_rooms(&self) -> Result<()> {
        self.send(&ListRooms::default()).await
    }

    /// Remove an empty room; answered by [`ClientEvent::RoomRemoved`]
    pub async fn remove_room(&self, name: &str) -> Result<()> {
        self.send(&RemoveRoom {
            name: name.to_string(),
        })
        .await
    }

    pub async fn ping(&self) -> Result<()> {
        self.send(&Ping {
            timestamp: crate::current_timestamp(),
        })
        .await
    }

    /// Say goodbye and tear the connection down
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.send.is_some() {
            let goodbye = Goodbye {
                reason: "client disconnect".to_string(),
            };
            if let Err(e) = self.send(&goodbye).await {
                debug!("Goodbye not sent: {}", e);
            }
        }

        if let Some(send) = self.send.take() {
            let _ = send.into_inner().finish();
        }

        if let Some(connection) = self.connection.take() {
            connection.close(0u32.into(), b"client disconnect");
            info!("Disconnected from chat server");
        }

        if let Some(endpoint) = self.endpoint.take() {
            endpoint.close(0u32.into(), b"client shutdown");
        }

        self.session_id = None;
        self.room = None;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Room this client last joined or asked to switch to
    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }
}

async fn receive_events(
    mut recv: RecvStream,
    mut codec: FrameCodec,
    event_tx: mpsc::UnboundedSender<ClientEvent>,
) {
    let reason = loop {
        let frame = match read_frame(&mut recv, &mut codec).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break "server closed the stream".to_string(),
            Err(e) => break e.to_string(),
        };

        let event = match DecodedMessage::decode(&frame) {
            Ok(DecodedMessage::RoomJoined(joined)) => ClientEvent::Joined(joined.room),
            Ok(DecodedMessage::Chat(msg)) => ClientEvent::Chat(msg),
            Ok(DecodedMessage::Presence(presence)) => ClientEvent::Presence(presence),
            Ok(DecodedMessage::RoomStatus(status)) => ClientEvent::RoomStatus(status),
            Ok(DecodedMessage::RoomCreated(created)) => ClientEvent::RoomCreated(created),
            Ok(DecodedMessage::RoomList(list)) => ClientEvent::RoomList(list.rooms),
            Ok(DecodedMessage::RoomRemoved(removed)) => ClientEvent::RoomRemoved(removed),
            Ok(DecodedMessage::Pong(pong)) => ClientEvent::Pong(pong.timestamp),
            Ok(other) => {
                warn!("Ignoring unexpected {:?} from server", other.frame_type());
                continue;
            }
            Err(e) => {
                warn!("Failed to decode {:?}: {}", frame.frame_type, e);
                continue;
            }
        };

        if event_tx.send(event).is_err() {
            return;
        }
    };

    let _ = event_tx.send(ClientEvent::Disconnected(reason));
}

/// QUIC client configuration trusting any server certificate
pub(crate) fn configure_client() -> Result<QuinnClientConfig> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    Ok(QuinnClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
            .map_err(|e| ChatError::config(format!("Failed to create QUIC config: {}", e)))?,
    )))
}

/// Accepts any server certificate. Development use only.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ChatClientConfig::default();
        assert_eq!(config.server_addr.port(), 4433);
        assert_eq!(config.bind_addr.port(), 0);
        assert_eq!(config.server_name, "localhost");
    }

    #[tokio::test]
    async fn test_requests_fail_before_connect() {
        let client = ChatClient::new(ChatClientConfig::default());
        assert!(!client.is_connected());

        let err = client.list_rooms().await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_blank_message_rejected_before_sending() {
        let client = ChatClient::new(ChatClientConfig::default());

        let err = client.send_message("alice", "  ").await.unwrap_err();
        assert_eq!(err.code(), ChatError::protocol("").code());
    }

    #[tokio::test]
    async fn test_disconnect_when_not_connected() {
        let mut client = ChatClient::new(ChatClientConfig::default());
        assert!(client.disconnect().await.is_ok());
        assert!(client.session_id().is_none());
    }
}
