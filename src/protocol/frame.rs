//! Binary frame protocol with length-prefixed messages
//!
//! Frame format:
//! ```text
//! +-----------+----------------+-----------+
//! | type (u8) | length (u32 BE)| payload   |
//! +-----------+----------------+-----------+
//! ```
//!
//! The type byte doubles as the tag of the JSON payload that follows.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Cursor};

/// Frame header size: 1 byte type + 4 bytes length
pub const FRAME_HEADER_SIZE: usize = 5;

/// Maximum frame payload size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame types, grouped by range
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    // Control (0x00 - 0x0F)
    Hello = 0x00,
    HelloAck = 0x01,
    Ping = 0x05,
    Pong = 0x06,
    Goodbye = 0x08,

    // Session (0x10 - 0x2F)
    SwitchRoom = 0x10,
    RoomJoined = 0x11,

    // Room payloads, fanned out to members (0x30 - 0x3F)
    Chat = 0x30,
    Presence = 0x31,

    // Room queries (0x40 - 0x4F)
    RoomExists = 0x40,
    RoomStatus = 0x41,
    CreateRoom = 0x42,
    RoomCreated = 0x43,
    ListRooms = 0x44,
    RoomList = 0x45,
    RemoveRoom = 0x46,
    RoomRemoved = 0x47,
}

impl FrameType {
    /// Convert from u8, returns None for unknown types
    pub fn from_u8(value: u8) -> Option<Self> {
        let frame_type = match value {
            0x00 => FrameType::Hello,
            0x01 => FrameType::HelloAck,
            0x05 => FrameType::Ping,
            0x06 => FrameType::Pong,
            0x08 => FrameType::Goodbye,
            0x10 => FrameType::SwitchRoom,
            0x11 => FrameType::RoomJoined,
            0x30 => FrameType::Chat,
            0x31 => FrameType::Presence,
            0x40 => FrameType::RoomExists,
            0x41 => FrameType::RoomStatus,
            0x42 => FrameType::CreateRoom,
            0x43 => FrameType::RoomCreated,
            0x44 => FrameType::ListRooms,
            0x45 => FrameType::RoomList,
            0x46 => FrameType::RemoveRoom,
            0x47 => FrameType::RoomRemoved,
            _ => return None,
        };
        Some(frame_type)
    }
}

/// A single protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame with the given type and payload
    pub fn new(frame_type: FrameType, payload: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// Get the total encoded size of this frame
    pub fn encoded_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Encode this frame into a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_size());
        buf.put_u8(self.frame_type as u8);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Encode this frame into a new Bytes
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Try to decode a frame from a streaming buffer.
    ///
    /// Returns `Ok(None)` while more data is needed. Header errors are
    /// reported as soon as the header is complete, since the stream cannot
    /// be resynchronized past them.
    pub fn decode(buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let (frame_type, payload_len) = parse_header(&buf[..FRAME_HEADER_SIZE])?;

        if buf.len() < FRAME_HEADER_SIZE + payload_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len).freeze();

        Ok(Some(Frame {
            frame_type,
            payload,
        }))
    }
}

fn parse_header(header: &[u8]) -> io::Result<(FrameType, usize)> {
    let mut cursor = Cursor::new(header);
    let type_byte = cursor.get_u8();
    let payload_len = cursor.get_u32() as usize;

    let frame_type = FrameType::from_u8(type_byte).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unknown frame type: 0x{:02X}", type_byte),
        )
    })?;

    if payload_len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Frame payload too large: {} bytes (max: {})",
                payload_len, MAX_FRAME_SIZE
            ),
        ));
    }

    Ok((frame_type, payload_len))
}

/// Streaming frame decoder
#[derive(Debug, Default)]
pub struct FrameCodec {
    buffer: BytesMut,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Feed data read from the transport
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame
    pub fn decode_next(&mut self) -> io::Result<Option<Frame>> {
        Frame::decode(&mut self.buffer)
    }

    /// Bytes of an incomplete frame still waiting for data
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}
