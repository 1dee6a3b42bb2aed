//! Protocol module - length-prefixed framing.
//!
//! Every message on the stream is a 4-byte big-endian length followed by
//! that many bytes of an encoded request or response record:
//! - length prefix encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Frame building for outbound records

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::build_frame;
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    decode_length, encode_length, DEFAULT_MAX_PAYLOAD_SIZE, LENGTH_PREFIX_SIZE,
};
