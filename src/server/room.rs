//! Rooms: named member sets with ordered fan-out

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::current_timestamp;
use crate::error::{ChatError, Result};
use crate::protocol::codec::Encodable;
use crate::protocol::messages::RoomPayload;
use crate::transport::connection::{Connection, ConnectionId};

/// Longest accepted room name
pub const MAX_ROOM_NAME_LEN: usize = 64;

/// Validated room name: trimmed, non-empty, case-sensitive
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomName(String);

impl RoomName {
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::protocol("Room name is empty"));
        }
        if name.chars().count() > MAX_ROOM_NAME_LEN {
            return Err(ChatError::protocol(format!(
                "Room name longer than {} characters",
                MAX_ROOM_NAME_LEN
            )));
        }
        Ok(RoomName(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RoomName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RoomName> for String {
    fn from(name: RoomName) -> Self {
        name.0
    }
}

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the payload was queued for
    pub delivered: usize,
    /// Members whose transport failed; they have been detached and closed
    pub dropped: usize,
}

/// A chat room
#[derive(Debug)]
pub struct Room {
    id: Uuid,
    name: RoomName,
    created_at: u64,
    members: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    /// Held for a whole fan-out so every member sees broadcasts in one order
    fanout: Mutex<()>,
}

impl Room {
    pub fn new(name: RoomName) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            created_at: current_timestamp(),
            members: RwLock::new(HashMap::new()),
            fanout: Mutex::new(()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &RoomName {
        &self.name
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Add a member. Returns false if it was already attached.
    ///
    /// Callers must detach the connection from any previous room first.
    pub async fn attach(&self, conn: Arc<Connection>) -> bool {
        let mut members = self.members.write().await;
        let id = conn.id();
        if members.contains_key(&id) {
            return false;
        }
        members.insert(id, conn);
        debug!(room = %self.name, connection = %id, members = members.len(), "Attached");
        true
    }

    /// Remove a member if present. Idempotent.
    pub async fn detach(&self, id: &ConnectionId) -> bool {
        let removed = self.members.write().await.remove(id).is_some();
        if removed {
            debug!(room = %self.name, connection = %id, "Detached");
        }
        removed
    }

    pub async fn is_member(&self, id: &ConnectionId) -> bool {
        self.members.read().await.contains_key(id)
    }

    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    pub async fn member_ids(&self) -> Vec<ConnectionId> {
        self.members.read().await.keys().copied().collect()
    }

    /// Deliver a payload to every member except `exclude`.
    ///
    /// Delivery to each member is independent. A member whose transport
    /// refuses the payload is detached and closed; the rest still receive it.
    pub async fn broadcast(
        &self,
        payload: &RoomPayload,
        exclude: Option<&ConnectionId>,
    ) -> Result<BroadcastReport> {
        let frame = payload.encode_frame().map_err(|e| {
            ChatError::serialization(format!("Failed to encode room payload: {}", e))
        })?;

        let _order = self.fanout.lock().await;

        let recipients: Vec<Arc<Connection>> = {
            let members = self.members.read().await;
            members
                .values()
                .filter(|conn| Some(&conn.id()) != exclude)
                .cloned()
                .collect()
        };

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for conn in recipients {
            match conn.send_frame(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(room = %self.name, connection = %conn.id(), "Dropping member: {}", e);
                    failed.push(conn);
                }
            }
        }

        for conn in failed {
            self.detach(&conn.id()).await;
            conn.close();
            report.dropped += 1;
        }

        debug!(
            room = %self.name,
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast {:?}",
            frame.frame_type
        );

        Ok(report)
    }
}
