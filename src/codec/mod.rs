//! Codec module - record serialization.
//!
//! Request and response records travel as MessagePack maps inside the
//! length-prefixed frames of [`crate::protocol`].
//!
//! # Example
//!
//! ```
//! use fraggle_client::codec::MsgPackCodec;
//! use fraggle_client::{Response, response::flags};
//!
//! let res = Response::new(7, flags::VALID).with_value("bar");
//! let encoded = MsgPackCodec::encode(&res).unwrap();
//! let decoded = MsgPackCodec::decode_response(&encoded).unwrap();
//! assert_eq!(decoded, res);
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
