//! QUIC transport: endpoint setup and the stream pump
//!
//! Each client opens one bidirectional stream. The pump moves frames between
//! that stream and the client's [`TransportEnd`] until either side closes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use quinn::{Endpoint, RecvStream, SendStream};
use tracing::{debug, warn};

use crate::config::{ALPN_PROTOCOL, ServerConfig};
use crate::error::{ChatError, Result};
use crate::protocol::frame::{Frame, FrameCodec};
use crate::transport::connection::TransportEnd;

/// How long a locally closed stream may take to deliver what is queued
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Create the server endpoint described by `config`
pub fn server_endpoint(config: &ServerConfig) -> Result<Endpoint> {
    let mut tls_config = match (&config.cert_path, &config.key_path) {
        (Some(cert), Some(key)) => load_tls_config(cert, key)?,
        _ => self_signed_tls_config()?,
    };
    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];
    tls_config.max_early_data_size = 0;

    let mut transport_config = quinn::TransportConfig::default();
    transport_config.max_concurrent_bidi_streams(1u32.into());
    transport_config.max_concurrent_uni_streams(0u32.into());
    let idle_timeout = quinn::IdleTimeout::try_from(config.idle_timeout)
        .map_err(|e| ChatError::config(format!("Invalid idle timeout: {}", e)))?;
    transport_config.max_idle_timeout(Some(idle_timeout));

    let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|e| ChatError::config(format!("Failed to create QUIC config: {}", e)))?,
    ));
    server_config.transport_config(Arc::new(transport_config));

    Endpoint::server(server_config, config.bind_addr)
        .map_err(|e| ChatError::network(format!("Failed to create endpoint: {}", e)))
}

fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<rustls::ServerConfig> {
    let cert_pem = std::fs::read(cert_path).map_err(|e| {
        ChatError::config(format!("Failed to read cert '{}': {}", cert_path.display(), e))
    })?;
    let key_pem = std::fs::read(key_path).map_err(|e| {
        ChatError::config(format!("Failed to read key '{}': {}", key_path.display(), e))
    })?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ChatError::config(format!("Failed to parse certificates: {}", e)))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ChatError::config(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| ChatError::config("No private key found"))?;

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ChatError::config(format!("Failed to configure TLS: {}", e)))
}

fn self_signed_tls_config() -> Result<rustls::ServerConfig> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ChatError::config(format!("Failed to generate certificate: {}", e)))?;

    let cert_der = cert.cert.der().clone();
    let key_der = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der.into())
        .map_err(|e| ChatError::config(format!("Failed to configure TLS: {}", e)))
}

/// Read the next complete frame from a stream.
///
/// Returns `Ok(None)` when the stream finishes cleanly. Partial data stays
/// buffered in `codec`, so dropping this future between reads loses nothing.
pub async fn read_frame(recv: &mut RecvStream, codec: &mut FrameCodec) -> Result<Option<Frame>> {
    let mut buf = [0u8; 4096];

    loop {
        if let Some(frame) = codec
            .decode_next()
            .map_err(|e| ChatError::protocol(format!("Frame decode error: {}", e)))?
        {
            return Ok(Some(frame));
        }

        match recv.read(&mut buf).await? {
            Some(n) => codec.feed(&buf[..n]),
            None => {
                if codec.buffered_len() > 0 {
                    return Err(ChatError::protocol("Stream finished mid-frame"));
                }
                return Ok(None);
            }
        }
    }
}

/// Write one frame to a stream
pub async fn write_frame(send: &mut SendStream, frame: &Frame) -> Result<()> {
    send.write_all(&frame.encode_to_bytes()).await?;
    Ok(())
}

/// Shuttle frames between a QUIC stream pair and a connection.
///
/// Runs until the peer finishes its stream, the connection is closed
/// locally, or the stream fails. Dropping `end` on return is what tells the
/// connection its peer is gone.
pub async fn pump(
    connection: quinn::Connection,
    mut end: TransportEnd,
    mut send: SendStream,
    mut recv: RecvStream,
) -> Result<()> {
    let id = end.id();
    let mut codec = FrameCodec::new();
    let mut reading = true;

    let result = loop {
        tokio::select! {
            inbound = read_frame(&mut recv, &mut codec), if reading => match inbound {
                Ok(Some(frame)) => {
                    if end.deliver(frame).is_err() {
                        // Closed locally; flush what is queued before finishing
                        debug!("Connection {} closed, no longer reading", id);
                        reading = false;
                    }
                }
                Ok(None) => {
                    debug!("Peer {} finished its stream", id);
                    break Ok(());
                }
                Err(e) => break Err(e),
            },
            outbound = end.next_outbound() => match outbound {
                Some(frame) => {
                    if let Err(e) = write_frame(&mut send, &frame).await {
                        break Err(e);
                    }
                }
                None => {
                    let _ = send.finish();
                    let _ = tokio::time::timeout(FLUSH_TIMEOUT, send.stopped()).await;
                    connection.close(0u32.into(), b"closed");
                    break Ok(());
                }
            },
        }
    };

    if let Err(e) = &result {
        warn!("Transport for {} failed: {}", id, e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{Decodable, Encodable};
    use crate::protocol::messages::{Ping, Pong};
    use crate::transport::connection::Connection;
    use std::net::SocketAddr;

    async fn connected_pair() -> (quinn::Connection, quinn::Connection, Endpoint, Endpoint) {
        let config = ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        };
        let server = server_endpoint(&config).unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut client = Endpoint::client(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        client.set_default_client_config(crate::client::configure_client().unwrap());

        let connecting = client.connect(server_addr, "localhost").unwrap();
        let (accepted, connected) = tokio::join!(
            async { server.accept().await.unwrap().await.unwrap() },
            connecting
        );
        (accepted, connected.unwrap(), server, client)
    }

    #[tokio::test]
    async fn test_pump_flushes_queued_replies_after_local_close() {
        let (server_conn, client_conn, _server, _client) = connected_pair().await;

        let (mut client_send, mut client_recv) = client_conn.open_bi().await.unwrap();
        let ping = Ping { timestamp: 1 }.encode_frame().unwrap();
        write_frame(&mut client_send, &ping).await.unwrap();
        let (send, recv) = server_conn.accept_bi().await.unwrap();

        let (conn, end) = Connection::new();
        for timestamp in 0..3 {
            conn.send(&Pong { timestamp }).unwrap();
        }
        conn.close();

        // More inbound after the close must not cut the flush short
        write_frame(&mut client_send, &ping).await.unwrap();
        let task = tokio::spawn(pump(server_conn, end, send, recv));

        let mut codec = FrameCodec::new();
        let mut timestamps = Vec::new();
        while let Ok(Some(frame)) = read_frame(&mut client_recv, &mut codec).await {
            timestamps.push(Pong::decode_frame(&frame).unwrap().timestamp);
        }

        assert_eq!(timestamps, [0, 1, 2]);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_read_frame_reports_clean_finish() {
        let (server_conn, client_conn, _server, _client) = connected_pair().await;

        let (mut client_send, _client_recv) = client_conn.open_bi().await.unwrap();
        let ping = Ping { timestamp: 9 }.encode_frame().unwrap();
        write_frame(&mut client_send, &ping).await.unwrap();
        client_send.finish().unwrap();

        let (_send, mut recv) = server_conn.accept_bi().await.unwrap();
        let mut codec = FrameCodec::new();

        let frame = read_frame(&mut recv, &mut codec).await.unwrap().unwrap();
        assert_eq!(Ping::decode_frame(&frame).unwrap().timestamp, 9);
        assert!(read_frame(&mut recv, &mut codec).await.unwrap().is_none());
    }
}
