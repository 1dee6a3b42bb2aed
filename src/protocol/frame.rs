//! Outbound frame building.
//!
//! # Example
//!
//! ```
//! use fraggle_client::protocol::{build_frame, LENGTH_PREFIX_SIZE};
//!
//! let bytes = build_frame(b"hello");
//! assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE + 5);
//! assert_eq!(&bytes[..4], &[0, 0, 0, 5]);
//! ```

use super::wire_format::{encode_length, LENGTH_PREFIX_SIZE};

/// Build a complete frame as a single byte vector.
///
/// Encodes the length prefix and appends the record into a contiguous buffer.
/// The writer task avoids the copy with [`crate::writer::OutboundFrame`].
pub fn build_frame(record: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + record.len());
    buf.extend_from_slice(&encode_length(record.len() as u32));
    buf.extend_from_slice(record);
    buf
}
