//! MsgPack codec using `rmp-serde`.
//!
//! Always use `to_vec_named`: the service reads records as maps keyed by
//! field name, and optional fields are simply left out.

use crate::error::Result;
use crate::request::RequestRecord;
use crate::response::Response;

/// MessagePack codec for request and response records.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map format).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    #[inline]
    pub fn encode_request(record: &RequestRecord) -> Result<Vec<u8>> {
        Self::encode(record)
    }

    #[inline]
    pub fn decode_request(bytes: &[u8]) -> Result<RequestRecord> {
        Self::decode(bytes)
    }

    #[inline]
    pub fn decode_response(bytes: &[u8]) -> Result<Response> {
        Self::decode(bytes)
    }
}
