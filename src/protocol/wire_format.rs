//! Wire format encoding and decoding.
//!
//! Every frame starts with a 4-byte length prefix:
//! ```text
//! ┌──────────┬──────────────────────────┐
//! │ Length   │ Record                   │
//! │ 4 bytes  │ Length bytes             │
//! │ uint32 BE│ (MsgPack request/response)│
//! └──────────┴──────────────────────────┘
//! ```

/// Length prefix size in bytes (fixed, exactly 4).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum record size (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Encode a record length as a big-endian prefix.
///
/// # Example
///
/// ```
/// use fraggle_client::protocol::encode_length;
///
/// assert_eq!(encode_length(258), [0, 0, 1, 2]);
/// ```
#[inline]
pub fn encode_length(len: u32) -> [u8; LENGTH_PREFIX_SIZE] {
    len.to_be_bytes()
}

/// Decode a big-endian length prefix.
///
/// Returns `None` if buffer is too short.
///
/// # Example
///
/// ```
/// use fraggle_client::protocol::decode_length;
///
/// assert_eq!(decode_length(&[0, 0, 1, 2]), Some(258));
/// assert_eq!(decode_length(&[0, 0, 1]), None);
/// ```
#[inline]
pub fn decode_length(buf: &[u8]) -> Option<u32> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}
