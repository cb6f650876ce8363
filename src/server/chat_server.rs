//! QUIC chat server: the accept loop
//!
//! Every accepted QUIC connection gets its own task. The task accepts the
//! client's stream, starts the pump for it, and runs the broker's read loop.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::Endpoint;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ChatError, Result};
use crate::server::broker::Broker;
use crate::server::registry::Registry;
use crate::transport::connection::Connection;
use crate::transport::quic;

/// QUIC chat server
pub struct ChatServer {
    config: ServerConfig,
    endpoint: Endpoint,
    broker: Arc<Broker>,
    /// One permit per connection, held from accept until its task ends
    slots: Arc<Semaphore>,
}

impl ChatServer {
    /// Validate the configuration and bind the endpoint.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let default_room = config.validate()?;
        let endpoint = quic::server_endpoint(&config)?;
        let broker = Arc::new(Broker::new(Arc::new(Registry::new()), default_room));

        info!("Server bound to {}", endpoint.local_addr()?);

        Ok(Self {
            slots: Arc::new(Semaphore::new(config.max_connections)),
            config,
            endpoint,
            broker,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint
            .local_addr()
            .map_err(|e| ChatError::network(format!("Failed to get local address: {}", e)))
    }

    pub fn broker(&self) -> Arc<Broker> {
        Arc::clone(&self.broker)
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.broker.registry())
    }

    /// Accept connections until the endpoint is closed
    pub async fn run(&self) -> Result<()> {
        info!(
            "Accepting connections (max {}, default room {})",
            self.config.max_connections,
            self.broker.default_room()
        );

        while let Some(incoming) = self.endpoint.accept().await {
            let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
                warn!("Connection limit reached, refusing {}", incoming.remote_address());
                incoming.refuse();
                continue;
            };

            let broker = Arc::clone(&self.broker);
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = handle_incoming(broker, incoming).await {
                    debug!("Connection ended before joining: {}", e);
                }
            });
        }

        info!("Endpoint closed, accept loop finished");
        Ok(())
    }

    /// Stop accepting and close every session
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.endpoint.close(0u32.into(), b"server shutdown");
        self.broker.shutdown().await;
    }
}

async fn handle_incoming(broker: Arc<Broker>, incoming: quinn::Incoming) -> Result<()> {
    let connection = incoming.await?;
    let remote = connection.remote_address();
    let (send, recv) = connection.accept_bi().await?;

    let (conn, end) = Connection::new();
    info!("Connection {} from {}", conn.id(), remote);

    let pump = tokio::spawn(quic::pump(connection, end, send, recv));

    broker.serve(Arc::clone(&conn)).await;

    match pump
        .await
        .map_err(|e| ChatError::internal(format!("Pump task failed: {}", e)))
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Pump for {} ended with error: {}", conn.id(), e),
        Err(e) => error!(code = e.code(), "Connection {}: {}", conn.id(), e),
    }

    info!("Connection {} from {} closed", conn.id(), remote);
    Ok(())
}
