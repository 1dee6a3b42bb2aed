//! Error types for fraggle-client.

use thiserror::Error;

use crate::response::ErrCode;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum FraggleError {
    /// The request already carries a tag and cannot be sent again.
    #[error("Request already sent with tag {tag}")]
    AlreadySent { tag: u32 },

    /// The connection was lost before the request resolved.
    #[error("Disconnected")]
    Disconnected,

    /// The service answered with an error code.
    #[error("Service error {code:?}{}", detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    Service {
        code: ErrCode,
        detail: Option<String>,
    },

    /// The nested value decoder saw an event it does not know.
    #[error("Unknown event kind: {0:?}")]
    UnknownEventKind(String),

    /// Protocol violation (oversized frame, malformed event, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No candidate address is left to connect to.
    #[error("No candidate addresses")]
    NoAddresses,

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

impl FraggleError {
    /// True for the synthetic connection-loss error.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, FraggleError::Disconnected)
    }
}

/// Result type alias using FraggleError.
pub type Result<T> = std::result::Result<T, FraggleError>;
