//! Per-connection session handling
//!
//! The broker drives each connection through
//! `Connecting -> Joined(room) -> Leaving -> Closed`, routing inbound frames
//! to the connection's room or answering them directly. Nothing that goes
//! wrong for one connection is surfaced beyond it: bad payloads are logged
//! and dropped, transport failures end that session only.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::current_timestamp;
use crate::error::{ChatError, Result};
use crate::protocol::codec::DecodedMessage;
use crate::protocol::frame::Frame;
use crate::protocol::messages::*;
use crate::server::registry::Registry;
use crate::server::room::{Room, RoomName};
use crate::transport::connection::{Connection, ConnectionId};

/// Session state of one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, waiting for Hello
    Connecting,
    Joined(RoomName),
    Leaving,
    Closed,
}

/// Whether the read loop keeps going after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Disconnect,
}

struct Session {
    conn: Arc<Connection>,
    state: SessionState,
}

/// Routes connection lifecycle and messages to rooms
#[derive(Debug)]
pub struct Broker {
    registry: Arc<Registry>,
    default_room: RoomName,
    sessions: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Broker {
    pub fn new(registry: Arc<Registry>, default_room: RoomName) -> Self {
        Self {
            registry,
            default_room,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn default_room(&self) -> &RoomName {
        &self.default_room
    }

    /// Number of connections currently being served
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Serve one connection until it closes.
    ///
    /// This is the connection's read loop; it returns the final state, which
    /// is always [`SessionState::Closed`].
    pub async fn serve(&self, conn: Arc<Connection>) -> SessionState {
        let id = conn.id();
        self.sessions.write().await.insert(id, Arc::clone(&conn));
        debug!("Serving connection {}", id);

        let mut session = Session {
            conn,
            state: SessionState::Connecting,
        };

        while let Some(frame) = session.conn.receive().await {
            match self.handle_frame(&mut session, frame).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Disconnect) => break,
                Err(e) => warn!(code = e.code(), "Dropped frame from {}: {}", id, e),
            }
        }

        self.leave(&mut session).await;
        self.sessions.write().await.remove(&id);
        session.state
    }

    /// Close every live connection; their read loops then run the leave path
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Connection>> =
            self.sessions.read().await.values().cloned().collect();

        info!("Closing {} sessions", sessions.len());
        for conn in sessions {
            conn.close();
        }
    }

    async fn handle_frame(&self, session: &mut Session, frame: Frame) -> Result<Flow> {
        let frame_type = frame.frame_type;
        let message = DecodedMessage::decode(&frame).map_err(|e| {
            ChatError::protocol(format!("Malformed {:?} payload: {}", frame_type, e))
        })?;

        let conn = Arc::clone(&session.conn);

        match (session.state.clone(), message) {
            (SessionState::Connecting, DecodedMessage::Hello(hello)) => {
                let room_name = self.resolve_room(hello.room.as_deref())?;
                self.join(session, room_name.clone()).await;
                conn.send(&HelloAck {
                    version: PROTOCOL_VERSION,
                    session_id: conn.id().to_string(),
                    room: room_name.to_string(),
                })?;
                info!("Connection {} joined room {}", conn.id(), room_name);
            }

            (SessionState::Joined(current), DecodedMessage::SwitchRoom(request)) => {
                let target = RoomName::parse(&request.room)?;
                if target != current {
                    self.join(session, target.clone()).await;
                    info!(
                        "Connection {} switched from {} to {}",
                        conn.id(),
                        current,
                        target
                    );
                }
                conn.send(&RoomJoined {
                    room: target.to_string(),
                })?;
            }

            (SessionState::Joined(current), DecodedMessage::Chat(mut msg)) => {
                msg.validate()?;
                if msg.from.trim().is_empty() {
                    let name = conn.display_name().await;
                    msg.from = msg.author(&name).to_string();
                }
                self.relay(&current, &conn, RoomPayload::Chat(msg)).await?;
            }

            (SessionState::Joined(current), DecodedMessage::Presence(presence)) => {
                let name = presence.display_name()?;
                conn.set_display_name(name.clone()).await;
                debug!("Connection {} is now known as {}", conn.id(), name);
                self.relay(&current, &conn, RoomPayload::Presence(Presence::new(name)))
                    .await?;
            }

            (_, DecodedMessage::Ping(ping)) => {
                conn.send(&Pong {
                    timestamp: ping.timestamp,
                })?;
            }

            (_, DecodedMessage::Goodbye(goodbye)) => {
                info!("Connection {} said goodbye: {}", conn.id(), goodbye.reason);
                return Ok(Flow::Disconnect);
            }

            (_, DecodedMessage::RoomExists(query)) => {
                let exists = self.registry.room_exists(query.name.trim()).await;
                conn.send(&RoomStatus {
                    name: query.name,
                    exists,
                })?;
            }

            (_, DecodedMessage::CreateRoom(request)) => {
                let name = RoomName::parse(&request.name)?;
                let (room, created) = self.registry.create_room(name).await;
                conn.send(&RoomCreated {
                    name: room.name().to_string(),
                    created,
                })?;
            }

            (_, DecodedMessage::ListRooms(_)) => {
                let rooms = self
                    .registry
                    .list_rooms()
                    .await
                    .into_iter()
                    .map(String::from)
                    .collect();
                conn.send(&RoomList { rooms })?;
            }

            (_, DecodedMessage::RemoveRoom(request)) => {
                let removed = self.registry.remove_room(request.name.trim()).await;
                conn.send(&RoomRemoved {
                    name: request.name,
                    removed,
                })?;
            }

            (state, message) => {
                return Err(ChatError::protocol(format!(
                    "Unexpected {:?} in state {:?}",
                    message.frame_type(),
                    state
                )));
            }
        }

        Ok(Flow::Continue)
    }

    fn resolve_room(&self, requested: Option<&str>) -> Result<RoomName> {
        match requested.map(str::trim) {
            None | Some("") => Ok(self.default_room.clone()),
            Some(name) => RoomName::parse(name),
        }
    }

    /// Move the session into `target`, leaving its current room first
    async fn join(&self, session: &mut Session, target: RoomName) {
        let conn = &session.conn;

        if let SessionState::Joined(previous) = &session.state {
            if let Some(room) = self.registry.get(previous.as_str()).await {
                room.detach(&conn.id()).await;
            }
        }

        self.attach(conn, &target).await;
        conn.set_current_room(Some(target.clone())).await;
        session.state = SessionState::Joined(target);
    }

    /// Attach to the registered room for `name`, creating it if needed.
    ///
    /// A room removed between lookup and attach is no longer reachable by
    /// name, so the attach is retried against the fresh registration.
    async fn attach(&self, conn: &Arc<Connection>, name: &RoomName) -> Arc<Room> {
        loop {
            let (room, created) = self.registry.create_room(name.clone()).await;
            if created {
                debug!("Room {} created on join by {}", name, conn.id());
            }

            room.attach(Arc::clone(conn)).await;
            if self.registry.is_registered(&room).await {
                return room;
            }

            room.detach(&conn.id()).await;
        }
    }

    async fn relay(
        &self,
        room_name: &RoomName,
        conn: &Arc<Connection>,
        payload: RoomPayload,
    ) -> Result<()> {
        let room = match self.registry.get(room_name.as_str()).await {
            Some(room) => room,
            None => self.attach(conn, room_name).await,
        };

        room.broadcast(&payload, Some(&conn.id())).await?;
        Ok(())
    }

    async fn leave(&self, session: &mut Session) {
        let conn = &session.conn;
        let previous = std::mem::replace(&mut session.state, SessionState::Leaving);

        if let SessionState::Joined(room_name) = previous {
            if let Some(room) = self.registry.get(room_name.as_str()).await {
                room.detach(&conn.id()).await;
            }
            conn.set_current_room(None).await;
            info!("Connection {} left room {}", conn.id(), room_name);
        }

        conn.close();
        session.state = SessionState::Closed;
        debug!(
            "Connection {} closed after {} ms",
            conn.id(),
            current_timestamp().saturating_sub(conn.created_at())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{Decodable, Encodable};
    use crate::protocol::frame::FrameType;
    use crate::transport::connection::TransportEnd;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(2);

    fn broker() -> Arc<Broker> {
        Arc::new(Broker::new(
            Arc::new(Registry::new()),
            RoomName::parse(crate::config::DEFAULT_ROOM).unwrap(),
        ))
    }

    type TestClient = (Arc<Connection>, TransportEnd, JoinHandle<SessionState>);

    fn spawn_session(broker: &Arc<Broker>) -> TestClient {
        let (conn, end) = Connection::new();
        let broker = Arc::clone(broker);
        let task = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { broker.serve(conn).await })
        };
        (conn, end, task)
    }

    async fn next_frame(end: &mut TransportEnd) -> Frame {
        tokio::time::timeout(WAIT, end.next_outbound())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
    }

    async fn expect<T: Decodable>(end: &mut TransportEnd) -> T {
        let frame = next_frame(end).await;
        T::decode_frame(&frame).unwrap()
    }

    async fn assert_silent(end: &mut TransportEnd) {
        let result = tokio::time::timeout(Duration::from_millis(100), end.next_outbound()).await;
        assert!(result.is_err(), "unexpected frame: {:?}", result);
    }

    async fn connect(broker: &Arc<Broker>, room: Option<&str>) -> TestClient {
        let (conn, mut end, task) = spawn_session(broker);
        end.deliver_message(&Hello::new(room)).unwrap();
        let ack: HelloAck = expect(&mut end).await;
        assert_eq!(ack.session_id, conn.id().to_string());
        (conn, end, task)
    }

    async fn members(broker: &Broker, room: &str) -> usize {
        match broker.registry().get(room).await {
            Some(room) => room.member_count().await,
            None => 0,
        }
    }

    #[tokio::test]
    async fn test_default_room_and_lonely_message() {
        let broker = broker();
        let (conn, mut end, _task) = spawn_session(&broker);

        end.deliver_message(&Hello::new(None)).unwrap();
        let ack: HelloAck = expect(&mut end).await;
        assert_eq!(ack.room, "defaultroom");
        assert!(broker.registry().room_exists("defaultroom").await);
        assert_eq!(conn.current_room().await.unwrap().as_str(), "defaultroom");

        end.deliver_message(&ChatMessage::new("", "hi")).unwrap();
        assert_silent(&mut end).await;
        assert!(conn.is_open());
        assert_eq!(members(&broker, "defaultroom").await, 1);
    }

    #[tokio::test]
    async fn test_blank_room_request_uses_default() {
        let broker = broker();
        let (_conn, _end, _task) = connect(&broker, Some("   ")).await;
        assert_eq!(members(&broker, "defaultroom").await, 1);
    }

    #[tokio::test]
    async fn test_two_clients_exchange_in_order() {
        let broker = broker();
        let (_c1, mut end1, _t1) = connect(&broker, Some("r1")).await;
        let (_c2, mut end2, _t2) = connect(&broker, Some("r1")).await;

        end1.deliver_message(&ChatMessage::new("alice", "hello")).unwrap();
        end1.deliver_message(&ChatMessage::new("alice", "again")).unwrap();

        let first: ChatMessage = expect(&mut end2).await;
        assert_eq!(first, ChatMessage::new("alice", "hello"));
        let second: ChatMessage = expect(&mut end2).await;
        assert_eq!(second.msg, "again");

        assert_silent(&mut end1).await;
        assert_silent(&mut end2).await;
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let broker = broker();
        let (_a, a_end, _ta) = connect(&broker, Some("r1")).await;
        let (_b, mut b_end, _tb) = connect(&broker, Some("r2")).await;

        a_end.deliver_message(&ChatMessage::new("alice", "r1 only")).unwrap();
        assert_silent(&mut b_end).await;
    }

    #[tokio::test]
    async fn test_room_switch_detaches_before_attach() {
        let broker = broker();
        let (mover, mut mover_end, _t1) = connect(&broker, Some("r1")).await;
        let (_stayer, mut stayer_end, _t2) = connect(&broker, Some("r1")).await;

        mover_end
            .deliver_message(&SwitchRoom {
                room: "fresh".to_string(),
            })
            .unwrap();
        let joined: RoomJoined = expect(&mut mover_end).await;
        assert_eq!(joined.room, "fresh");

        assert!(broker.registry().room_exists("fresh").await);
        assert_eq!(members(&broker, "r1").await, 1);
        assert_eq!(members(&broker, "fresh").await, 1);
        assert_eq!(mover.current_room().await.unwrap().as_str(), "fresh");

        stayer_end
            .deliver_message(&ChatMessage::new("bob", "anyone?"))
            .unwrap();
        assert_silent(&mut mover_end).await;
    }

    #[tokio::test]
    async fn test_switch_to_current_room_is_acknowledged() {
        let broker = broker();
        let (_conn, mut end, _task) = connect(&broker, Some("r1")).await;

        end.deliver_message(&SwitchRoom {
            room: "r1".to_string(),
        })
        .unwrap();
        let joined: RoomJoined = expect(&mut end).await;
        assert_eq!(joined.room, "r1");
        assert_eq!(members(&broker, "r1").await, 1);
    }

    #[tokio::test]
    async fn test_pre_join_send_is_dropped() {
        let broker = broker();
        let (conn, mut end, _task) = spawn_session(&broker);

        end.deliver_message(&ChatMessage::new("eve", "too early")).unwrap();
        end.deliver_message(&SwitchRoom {
            room: "r1".to_string(),
        })
        .unwrap();
        assert_silent(&mut end).await;
        assert!(conn.is_open());
        assert!(conn.current_room().await.is_none());

        end.deliver_message(&Hello::new(Some("r1"))).unwrap();
        let ack: HelloAck = expect(&mut end).await;
        assert_eq!(ack.room, "r1");
    }

    #[tokio::test]
    async fn test_malformed_payload_keeps_connection_open() {
        let broker = broker();
        let (_a, a_end, _ta) = connect(&broker, Some("r1")).await;
        let (_b, mut b_end, _tb) = connect(&broker, Some("r1")).await;

        a_end.deliver(Frame::new(FrameType::Chat, "{not json")).unwrap();
        a_end.deliver_message(&ChatMessage::new("alice", "")).unwrap();
        a_end.deliver_message(&Hello::new(Some("elsewhere"))).unwrap();
        a_end.deliver_message(&ChatMessage::new("alice", "fine")).unwrap();

        let msg: ChatMessage = expect(&mut b_end).await;
        assert_eq!(msg.msg, "fine");
        assert_eq!(members(&broker, "r1").await, 2);
        assert!(!broker.registry().room_exists("elsewhere").await);
    }

    #[tokio::test]
    async fn test_blank_author_is_filled_in() {
        let broker = broker();
        let (_a, mut a_end, _ta) = connect(&broker, Some("r1")).await;
        let (_b, mut b_end, _tb) = connect(&broker, Some("r1")).await;

        a_end.deliver_message(&ChatMessage::new("", "who?")).unwrap();
        let anonymous: ChatMessage = expect(&mut b_end).await;
        assert_eq!(anonymous.from, UNKNOWN_AUTHOR);

        a_end.deliver_message(&Presence::new("alice")).unwrap();
        let presence: Presence = expect(&mut b_end).await;
        assert_eq!(presence.name, "alice");

        a_end.deliver_message(&ChatMessage::new(" ", "me")).unwrap();
        let named: ChatMessage = expect(&mut b_end).await;
        assert_eq!(named.from, "alice");
        assert_silent(&mut a_end).await;
    }

    #[tokio::test]
    async fn test_peer_close_detaches_and_closes() {
        let broker = broker();
        let (conn, end, task) = connect(&broker, Some("r1")).await;
        assert_eq!(broker.session_count().await, 1);

        drop(end);
        let final_state = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();

        assert_eq!(final_state, SessionState::Closed);
        assert!(!conn.is_open());
        assert_eq!(members(&broker, "r1").await, 0);
        assert!(broker.registry().room_exists("r1").await);
        assert_eq!(broker.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_goodbye_ends_session() {
        let broker = broker();
        let (conn, end, task) = connect(&broker, Some("r1")).await;

        end.deliver_message(&Goodbye {
            reason: "bye".to_string(),
        })
        .unwrap();
        let final_state = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();

        assert_eq!(final_state, SessionState::Closed);
        assert!(!conn.is_open());
        assert!(end.is_closed());
        assert_eq!(members(&broker, "r1").await, 0);
    }

    #[tokio::test]
    async fn test_broken_member_dropped_from_fan_out() {
        let broker = broker();
        let (_a, mut a_end, _ta) = connect(&broker, Some("r1")).await;
        let (b, b_end, tb) = connect(&broker, Some("r1")).await;
        let (_c, mut c_end, _tc) = connect(&broker, Some("r1")).await;

        b.close();
        a_end.deliver_message(&ChatMessage::new("alice", "m")).unwrap();

        let msg: ChatMessage = expect(&mut c_end).await;
        assert_eq!(msg.msg, "m");
        let b_state = tokio::time::timeout(WAIT, tb).await.unwrap().unwrap();
        assert_eq!(b_state, SessionState::Closed);
        assert!(b_end.is_closed());
        assert_eq!(members(&broker, "r1").await, 2);
        assert_silent(&mut a_end).await;
    }

    #[tokio::test]
    async fn test_room_queries() {
        let broker = broker();
        let (conn, mut end, _task) = spawn_session(&broker);

        end.deliver_message(&RoomExists {
            name: "baseball".to_string(),
        })
        .unwrap();
        let status: RoomStatus = expect(&mut end).await;
        assert!(!status.exists);

        end.deliver_message(&CreateRoom {
            name: "baseball".to_string(),
        })
        .unwrap();
        let created: RoomCreated = expect(&mut end).await;
        assert!(created.created);

        end.deliver_message(&CreateRoom {
            name: "baseball".to_string(),
        })
        .unwrap();
        let again: RoomCreated = expect(&mut end).await;
        assert!(!again.created);

        end.deliver_message(&ListRooms::default()).unwrap();
        let list: RoomList = expect(&mut end).await;
        assert_eq!(list.rooms, ["baseball"]);

        end.deliver_message(&RemoveRoom {
            name: "baseball".to_string(),
        })
        .unwrap();
        let removed: RoomRemoved = expect(&mut end).await;
        assert!(removed.removed);

        end.deliver_message(&ListRooms::default()).unwrap();
        let list: RoomList = expect(&mut end).await;
        assert!(list.rooms.is_empty());
        assert!(conn.current_room().await.is_none());
    }

    #[tokio::test]
    async fn test_occupied_room_not_removed() {
        let broker = broker();
        let (_a, mut a_end, _ta) = connect(&broker, Some("busy")).await;

        a_end
            .deliver_message(&RemoveRoom {
                name: "busy".to_string(),
            })
            .unwrap();
        let removed: RoomRemoved = expect(&mut a_end).await;
        assert!(!removed.removed);
        assert!(broker.registry().room_exists("busy").await);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let broker = broker();
        let (_conn, mut end, _task) = spawn_session(&broker);

        end.deliver_message(&Ping { timestamp: 42 }).unwrap();
        let frame = next_frame(&mut end).await;
        assert_eq!(frame.frame_type, Pong { timestamp: 0 }.frame_type());
        assert_eq!(Pong::decode_frame(&frame).unwrap().timestamp, 42);
    }

    #[tokio::test]
    async fn test_shutdown_closes_all_sessions() {
        let broker = broker();
        let (_a, _a_end, ta) = connect(&broker, Some("r1")).await;
        let (_b, _b_end, tb) = connect(&broker, None).await;

        broker.shutdown().await;

        for task in [ta, tb] {
            let state = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
            assert_eq!(state, SessionState::Closed);
        }
        assert_eq!(broker.session_count().await, 0);
        assert_eq!(members(&broker, "r1").await, 0);
        assert_eq!(members(&broker, "defaultroom").await, 0);
    }
}
