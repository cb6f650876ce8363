//! Process-wide room registry

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::server::room::{Room, RoomName};

#[derive(Debug, Default)]
struct RoomTable {
    by_name: HashMap<RoomName, Arc<Room>>,
    /// Names in insertion order
    order: Vec<RoomName>,
}

/// Authoritative mapping from room name to room
#[derive(Debug, Default)]
pub struct Registry {
    rooms: RwLock<RoomTable>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff a room with this exact name exists
    pub async fn room_exists(&self, name: &str) -> bool {
        self.rooms.read().await.by_name.contains_key(name)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.by_name.get(name).cloned()
    }

    /// Return the room with this name, creating it if absent.
    ///
    /// The flag is true only for the caller that inserted the room.
    pub async fn create_room(&self, name: RoomName) -> (Arc<Room>, bool) {
        if let Some(room) = self.get(name.as_str()).await {
            return (room, false);
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.by_name.get(&name) {
            return (Arc::clone(room), false);
        }

        let room = Arc::new(Room::new(name.clone()));
        rooms.by_name.insert(name.clone(), Arc::clone(&room));
        rooms.order.push(name);
        info!(room = %room.name(), id = %room.id(), "Room created");

        (room, true)
    }

    /// Snapshot of room names in creation order
    pub async fn list_rooms(&self) -> Vec<RoomName> {
        self.rooms.read().await.order.clone()
    }

    /// Remove a room, but only while it has no members.
    ///
    /// Returns true if the room was removed.
    pub async fn remove_room(&self, name: &str) -> bool {
        let mut rooms = self.rooms.write().await;

        let Some(room) = rooms.by_name.get(name) else {
            return false;
        };

        let members = room.member_count().await;
        if members > 0 {
            debug!(room = name, members, "Refusing to remove occupied room");
            return false;
        }

        rooms.by_name.remove(name);
        rooms.order.retain(|existing| existing.as_str() != name);
        info!(room = name, "Room removed");
        true
    }

    /// Whether this exact room instance is still the registered one for its name
    pub async fn is_registered(&self, room: &Arc<Room>) -> bool {
        self.rooms
            .read()
            .await
            .by_name
            .get(room.name().as_str())
            .is_some_and(|current| Arc::ptr_eq(current, room))
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.by_name.len()
    }
}
