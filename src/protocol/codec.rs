//! Codec for encoding/decoding payloads to/from frames

use super::frame::{Frame, FrameType};
use super::messages::*;
use bytes::Bytes;
use std::io::{self, Error as IoError, ErrorKind};

/// Trait for messages that can be encoded to frames
pub trait Encodable {
    /// Get the frame type for this message
    fn frame_type(&self) -> FrameType;

    /// Encode the message payload to bytes
    fn encode_payload(&self) -> io::Result<Bytes>;

    /// Encode the complete frame
    fn encode_frame(&self) -> io::Result<Frame> {
        Ok(Frame::new(self.frame_type(), self.encode_payload()?))
    }
}

/// Trait for messages that can be decoded from frames
pub trait Decodable: Sized {
    /// Expected frame type for this message
    fn expected_frame_type() -> FrameType;

    /// Decode the message from a payload
    fn decode_payload(payload: &[u8]) -> io::Result<Self>;

    /// Decode from a complete frame, validating the frame type
    fn decode_frame(frame: &Frame) -> io::Result<Self> {
        if frame.frame_type != Self::expected_frame_type() {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!(
                    "Expected frame type {:?}, got {:?}",
                    Self::expected_frame_type(),
                    frame.frame_type
                ),
            ));
        }
        Self::decode_payload(&frame.payload)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> io::Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, e))
}

fn from_json<T: serde::de::DeserializeOwned>(payload: &[u8]) -> io::Result<T> {
    serde_json::from_slice(payload).map_err(|e| IoError::new(ErrorKind::InvalidData, e))
}

/// Implements Encodable and Decodable for a JSON payload type
macro_rules! impl_codec {
    ($type:ty, $frame_type:expr) => {
        impl Encodable for $type {
            fn frame_type(&self) -> FrameType {
                $frame_type
            }

            fn encode_payload(&self) -> io::Result<Bytes> {
                to_json(self)
            }
        }

        impl Decodable for $type {
            fn expected_frame_type() -> FrameType {
                $frame_type
            }

            fn decode_payload(payload: &[u8]) -> io::Result<Self> {
                from_json(payload)
            }
        }
    };
}

// Control
impl_codec!(Hello, FrameType::Hello);
impl_codec!(HelloAck, FrameType::HelloAck);
impl_codec!(Ping, FrameType::Ping);
impl_codec!(Pong, FrameType::Pong);
impl_codec!(Goodbye, FrameType::Goodbye);

// Session
impl_codec!(SwitchRoom, FrameType::SwitchRoom);
impl_codec!(RoomJoined, FrameType::RoomJoined);

// Room payloads
impl_codec!(ChatMessage, FrameType::Chat);
impl_codec!(Presence, FrameType::Presence);

// Room queries
impl_codec!(RoomExists, FrameType::RoomExists);
impl_codec!(RoomStatus, FrameType::RoomStatus);
impl_codec!(CreateRoom, FrameType::CreateRoom);
impl_codec!(RoomCreated, FrameType::RoomCreated);
impl_codec!(ListRooms, FrameType::ListRooms);
impl_codec!(RoomList, FrameType::RoomList);
impl_codec!(RemoveRoom, FrameType::RemoveRoom);
impl_codec!(RoomRemoved, FrameType::RoomRemoved);

impl Encodable for RoomPayload {
    fn frame_type(&self) -> FrameType {
        match self {
            RoomPayload::Chat(msg) => msg.frame_type(),
            RoomPayload::Presence(presence) => presence.frame_type(),
        }
    }

    fn encode_payload(&self) -> io::Result<Bytes> {
        match self {
            RoomPayload::Chat(msg) => msg.encode_payload(),
            RoomPayload::Presence(presence) => presence.encode_payload(),
        }
    }
}

/// Any frame decoded into its typed payload
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    Hello(Hello),
    HelloAck(HelloAck),
    Ping(Ping),
    Pong(Pong),
    Goodbye(Goodbye),

    SwitchRoom(SwitchRoom),
    RoomJoined(RoomJoined),

    Chat(ChatMessage),
    Presence(Presence),

    RoomExists(RoomExists),
    RoomStatus(RoomStatus),
    CreateRoom(CreateRoom),
    RoomCreated(RoomCreated),
    ListRooms(ListRooms),
    RoomList(RoomList),
    RemoveRoom(RemoveRoom),
    RoomRemoved(RoomRemoved),
}

impl DecodedMessage {
    /// Decode a frame into a typed message
    pub fn decode(frame: &Frame) -> io::Result<Self> {
        let payload = &frame.payload;

        let message = match frame.frame_type {
            FrameType::Hello => Self::Hello(from_json(payload)?),
            FrameType::HelloAck => Self::HelloAck(from_json(payload)?),
            FrameType::Ping => Self::Ping(from_json(payload)?),
            FrameType::Pong => Self::Pong(from_json(payload)?),
            FrameType::Goodbye => Self::Goodbye(from_json(payload)?),

            FrameType::SwitchRoom => Self::SwitchRoom(from_json(payload)?),
            FrameType::RoomJoined => Self::RoomJoined(from_json(payload)?),

            FrameType::Chat => Self::Chat(from_json(payload)?),
            FrameType::Presence => Self::Presence(from_json(payload)?),

            FrameType::RoomExists => Self::RoomExists(from_json(payload)?),
            FrameType::RoomStatus => Self::RoomStatus(from_json(payload)?),
            FrameType::CreateRoom => Self::CreateRoom(from_json(payload)?),
            FrameType::RoomCreated => Self::RoomCreated(from_json(payload)?),
            FrameType::ListRooms => Self::ListRooms(from_json(payload)?),
            FrameType::RoomList => Self::RoomList(from_json(payload)?),
            FrameType::RemoveRoom => Self::RemoveRoom(from_json(payload)?),
            FrameType::RoomRemoved => Self::RoomRemoved(from_json(payload)?),
        };

        Ok(message)
    }

    /// Get the frame type of this message
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Hello(_) => FrameType::Hello,
            Self::HelloAck(_) => FrameType::HelloAck,
            Self::Ping(_) => FrameType::Ping,
            Self::Pong(_) => FrameType::Pong,
            Self::Goodbye(_) => FrameType::Goodbye,
            Self::SwitchRoom(_) => FrameType::SwitchRoom,
            Self::RoomJoined(_) => FrameType::RoomJoined,
            Self::Chat(_) => FrameType::Chat,
            Self::Presence(_) => FrameType::Presence,
            Self::RoomExists(_) => FrameType::RoomExists,
            Self::RoomStatus(_) => FrameType::RoomStatus,
            Self::CreateRoom(_) => FrameType::CreateRoom,
            Self::RoomCreated(_) => FrameType::RoomCreated,
            Self::ListRooms(_) => FrameType::ListRooms,
            Self::RoomList(_) => FrameType::RoomList,
            Self::RemoveRoom(_) => FrameType::RemoveRoom,
            Self::RoomRemoved(_) => FrameType::RoomRemoved,
        }
    }

    /// Extract the fan-out payload, if this is one
    pub fn into_room_payload(self) -> Option<RoomPayload> {
        match self {
            Self::Chat(msg) => Some(RoomPayload::Chat(msg)),
            Self::Presence(presence) => Some(RoomPayload::Presence(presence)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_payload_uses_variant_frame_type() {
        let chat = RoomPayload::Chat(ChatMessage::new("alice", "hello"));
        let frame = chat.encode_frame().unwrap();
        assert_eq!(frame.frame_type, FrameType::Chat);
        assert_eq!(&frame.payload[..], br#"{"from":"alice","msg":"hello"}"#);

        let presence = RoomPayload::Presence(Presence::new("bob"));
        let frame = presence.encode_frame().unwrap();
        assert_eq!(frame.frame_type, FrameType::Presence);

        let decoded = DecodedMessage::decode(&frame).unwrap();
        assert_eq!(decoded.into_room_payload(), Some(presence));
    }

    #[test]
    fn test_decoded_message_dispatch() {
        let frame = RoomExists {
            name: "baseball".to_string(),
        }
        .encode_frame()
        .unwrap();

        let decoded = DecodedMessage::decode(&frame).unwrap();
        assert_eq!(decoded.frame_type(), FrameType::RoomExists);
        match decoded {
            DecodedMessage::RoomExists(query) => assert_eq!(query.name, "baseball"),
            other => panic!("Expected RoomExists, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_frame_type() {
        let frame = Ping { timestamp: 7 }.encode_frame().unwrap();
        assert!(Pong::decode_frame(&frame).is_err());
        assert_eq!(Ping::decode_frame(&frame).unwrap().timestamp, 7);
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let frame = Frame::new(FrameType::Chat, "not json");
        assert!(DecodedMessage::decode(&frame).is_err());

        let missing_body = Frame::new(FrameType::Chat, r#"{"from":"alice"}"#);
        assert!(DecodedMessage::decode(&missing_body).is_err());
    }

    #[test]
    fn test_list_rooms_encodes_empty_object() {
        let frame = ListRooms::default().encode_frame().unwrap();
        assert_eq!(&frame.payload[..], b"{}");
        assert!(matches!(
            DecodedMessage::decode(&frame).unwrap(),
            DecodedMessage::ListRooms(_)
        ));
    }
}
