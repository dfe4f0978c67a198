//! Checksummed message framing for the flight controller telemetry link.
//!
//! Every message is framed as:
//! - two sync bytes `'p' 'l'` for stream synchronization
//! - a one-byte message id and a one-byte payload length
//! - up to 255 payload bytes
//! - a two-byte running checksum over id, length and payload
//!
//! Corrupted frames are dropped and counted; the reader resynchronizes on
//! the next sync pair without surfacing an error.

pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod writer;

pub use codec::{
    encode, encode_frame, Checksum, CodecCounters, DecodeState, Frame, FrameCodec, FrameConfig,
    HEADER_SIZE, MAX_PAYLOAD, SYNC, TRAILER_SIZE,
};
pub use error::{FrameError, Result};
pub use message::message_name;
pub use reader::FrameReader;
pub use writer::FrameWriter;
