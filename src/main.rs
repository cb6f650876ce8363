//! roomcast server binary.
//!
//! # Usage
//!
//! ```bash
//! # Self-signed certificate (development)
//! roomcast --bind 0.0.0.0:4433
//!
//! # TLS certificate, custom default room
//! roomcast --bind 0.0.0.0:4433 --cert cert.pem --key key.pem --default-room lobby
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use roomcast::{ChatServer, DEFAULT_ROOM, ServerConfig};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chat-room session broker over QUIC
#[derive(Parser, Debug)]
#[command(name = "roomcast")]
#[command(about = "Chat-room session broker over QUIC")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: SocketAddr,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<PathBuf>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Seconds of silence before a connection is dropped
    #[arg(long, default_value = "300")]
    idle_timeout_secs: u64,

    /// Room joined by clients that do not name one
    #[arg(long, default_value = DEFAULT_ROOM)]
    default_room: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    info!("roomcast starting");

    if args.cert.is_none() || args.key.is_none() {
        warn!("No TLS certificate provided - using self-signed certificate");
    }

    let config = ServerConfig {
        bind_addr: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        max_connections: args.max_connections,
        idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        default_room: args.default_room,
    };

    let server = ChatServer::bind(config)?;
    info!("Server listening on {}", server.local_addr()?);

    tokio::select! {
        result = server.run() => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Interrupt received");
        }
    }

    server.shutdown().await;
    Ok(())
}
