//! Framed client connection with an explicit lifecycle
//!
//! A [`Connection`] is the broker-facing half of one client's transport. The
//! matching [`TransportEnd`] is driven by whatever carries the bytes: the QUIC
//! stream pump in production, or a test directly.
//!
//! Outbound frames are queued without blocking so a room can fan out to many
//! members while holding no locks on their transports.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tracing::debug;
use uuid::Uuid;

use crate::current_timestamp;
use crate::error::{ChatError, Result};
use crate::protocol::codec::Encodable;
use crate::protocol::frame::Frame;
use crate::server::room::RoomName;

/// Unique connection identifier, assigned at accept time
pub type ConnectionId = Uuid;

/// Transport lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Open,
    /// Peer hung up or a local close is in progress; sends are refused
    Closing,
    Closed,
}

impl TransportState {
    pub fn is_open(&self) -> bool {
        matches!(self, TransportState::Open)
    }
}

/// One client's connection, as seen by rooms and the broker
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    display_name: RwLock<String>,
    current_room: RwLock<Option<RoomName>>,
    state: watch::Sender<TransportState>,
    outbound: mpsc::UnboundedSender<Frame>,
    inbound: Mutex<mpsc::UnboundedReceiver<Frame>>,
    created_at: u64,
}

impl Connection {
    /// Create a connection and the transport end that feeds it
    pub fn new() -> (Arc<Connection>, TransportEnd) {
        let id = Uuid::new_v4();
        let (state, state_rx) = watch::channel(TransportState::Open);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let connection = Arc::new(Connection {
            id,
            display_name: RwLock::new(String::new()),
            current_room: RwLock::new(None),
            state,
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
            created_at: current_timestamp(),
        });

        let end = TransportEnd {
            id,
            inbound: inbound_tx,
            outbound: outbound_rx,
            state: state_rx,
        };

        (connection, end)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    pub async fn display_name(&self) -> String {
        self.display_name.read().await.clone()
    }

    pub async fn set_display_name(&self, name: String) {
        *self.display_name.write().await = name;
    }

    /// Name of the room this connection is attached to, if any
    pub async fn current_room(&self) -> Option<RoomName> {
        self.current_room.read().await.clone()
    }

    pub(crate) async fn set_current_room(&self, room: Option<RoomName>) {
        *self.current_room.write().await = room;
    }

    /// Serialize and queue a message for the peer
    pub fn send<T: Encodable>(&self, message: &T) -> Result<()> {
        let frame = message.encode_frame().map_err(|e| {
            ChatError::serialization(format!("Failed to encode {:?}: {}", message.frame_type(), e))
        })?;
        self.send_frame(frame)
    }

    /// Queue an already-encoded frame for the peer.
    ///
    /// Fails with a transport error once the connection is closing.
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        let state = self.state();
        if !state.is_open() {
            return Err(ChatError::transport(format!(
                "Connection {} is {:?}",
                self.id, state
            )));
        }

        if self.outbound.send(frame).is_err() {
            self.close();
            return Err(ChatError::transport(format!(
                "Connection {} transport is gone",
                self.id
            )));
        }
        Ok(())
    }

    /// Wait for the next inbound frame.
    ///
    /// Resolves to `None` when the peer hangs up (after queued frames are
    /// drained) or immediately once [`close`](Self::close) is called.
    pub async fn receive(&self) -> Option<Frame> {
        let mut inbound = self.inbound.lock().await;

        tokio::select! {
            biased;
            _ = wait_until_closed(self.state.subscribe()) => {
                inbound.close();
                None
            }
            frame = inbound.recv() => {
                if frame.is_none() {
                    self.mark_closing();
                }
                frame
            }
        }
    }

    /// Mark the transport closed and release its buffers.
    ///
    /// Idempotent; returns true only for the call that performed the close.
    pub fn close(&self) -> bool {
        self.mark_closing();

        let closed = self.state.send_if_modified(|state| {
            if *state == TransportState::Closed {
                false
            } else {
                *state = TransportState::Closed;
                true
            }
        });

        if closed {
            // A receiver parked in `receive` drains the queue itself
            if let Ok(mut inbound) = self.inbound.try_lock() {
                inbound.close();
                while inbound.try_recv().is_ok() {}
            }
            debug!(connection = %self.id, "Connection closed");
        }

        closed
    }

    fn mark_closing(&self) {
        self.state.send_if_modified(|state| {
            if *state == TransportState::Open {
                *state = TransportState::Closing;
                true
            } else {
                false
            }
        });
    }
}

async fn wait_until_closed(mut state: watch::Receiver<TransportState>) {
    loop {
        let current = *state.borrow_and_update();
        if current == TransportState::Closed || state.changed().await.is_err() {
            return;
        }
    }
}

/// Transport-facing half of a [`Connection`].
///
/// Dropping it is observed by the connection as the peer hanging up.
#[derive(Debug)]
pub struct TransportEnd {
    id: ConnectionId,
    inbound: mpsc::UnboundedSender<Frame>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    state: watch::Receiver<TransportState>,
}

impl TransportEnd {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        *self.state.borrow() == TransportState::Closed
    }

    /// Hand a frame read from the wire to the connection
    pub fn deliver(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(ChatError::transport(format!(
                "Connection {} is closed",
                self.id
            )));
        }
        self.inbound
            .send(frame)
            .map_err(|_| ChatError::transport(format!("Connection {} dropped", self.id)))
    }

    /// Encode a message and deliver it as if it came off the wire
    pub fn deliver_message<T: Encodable>(&self, message: &T) -> Result<()> {
        let frame = message
            .encode_frame()
            .map_err(|e| ChatError::serialization(format!("Failed to encode frame: {}", e)))?;
        self.deliver(frame)
    }

    /// Next frame to write to the wire.
    ///
    /// After the connection closes, frames queued before the close are still
    /// yielded; then `None`.
    pub async fn next_outbound(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            frame = self.outbound.recv() => frame,
            _ = wait_until_closed(self.state.clone()) => self.outbound.try_recv().ok(),
        }
    }

    /// Next queued outbound frame, without waiting
    pub fn try_next_outbound(&mut self) -> Option<Frame> {
        self.outbound.try_recv().ok()
    }
}
