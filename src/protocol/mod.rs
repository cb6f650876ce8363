//! Protocol layer for the room broker
//!
//! This module provides:
//! - Binary frame encoding/decoding
//! - JSON payload definitions, including the two-variant room payload
//! - Codec traits bridging payloads and frames

pub mod codec;
pub mod frame;
pub mod messages;

pub use codec::{Decodable, DecodedMessage, Encodable};
pub use frame::{FRAME_HEADER_SIZE, Frame, FrameCodec, FrameType, MAX_FRAME_SIZE};
pub use messages::*;
