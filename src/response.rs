//! Response records and the synthetic `Disconnected` value.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::FraggleError;

/// Response flag bits.
pub mod flags {
    /// Payload-bearing delivery.
    pub const VALID: u32 = 1;
    /// Final delivery for this tag.
    pub const DONE: u32 = 2;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u32, flag: u32) -> bool {
        flags & flag != 0
    }
}

/// Error codes reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ErrCode {
    TagInUse,
    UnknownVerb,
    /// The contacted server is not authoritative for writes.
    Readonly,
    TooLate,
    RevMismatch,
    BadPath,
    MissingArg,
    Range,
    NotDir,
    IsDir,
    NoEnt,
    /// Anything else, including codes this client does not know.
    Other,
}

impl From<i32> for ErrCode {
    fn from(code: i32) -> Self {
        match code {
            1 => ErrCode::TagInUse,
            2 => ErrCode::UnknownVerb,
            3 => ErrCode::Readonly,
            4 => ErrCode::TooLate,
            5 => ErrCode::RevMismatch,
            6 => ErrCode::BadPath,
            7 => ErrCode::MissingArg,
            8 => ErrCode::Range,
            20 => ErrCode::NotDir,
            21 => ErrCode::IsDir,
            22 => ErrCode::NoEnt,
            _ => ErrCode::Other,
        }
    }
}

impl From<ErrCode> for i32 {
    fn from(code: ErrCode) -> Self {
        match code {
            ErrCode::TagInUse => 1,
            ErrCode::UnknownVerb => 2,
            ErrCode::Readonly => 3,
            ErrCode::TooLate => 4,
            ErrCode::RevMismatch => 5,
            ErrCode::BadPath => 6,
            ErrCode::MissingArg => 7,
            ErrCode::Range => 8,
            ErrCode::NotDir => 20,
            ErrCode::IsDir => 21,
            ErrCode::NoEnt => 22,
            ErrCode::Other => 127,
        }
    }
}

/// A decoded response record.
///
/// `Response::disconnected()` builds the local-only sentinel used when a
/// connection is lost; it never comes off the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub tag: u32,
    #[serde(default)]
    pub flags: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_code: Option<ErrCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_detail: Option<String>,
    #[serde(skip)]
    disconnected: bool,
}

impl Response {
    /// Create a response for `tag` with the given flag bits.
    pub fn new(tag: u32, flags: u32) -> Self {
        Self {
            tag,
            flags,
            ..Self::default()
        }
    }

    /// The synthetic connection-loss response.
    pub fn disconnected() -> Self {
        Self {
            disconnected: true,
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_rev(mut self, rev: i64) -> Self {
        self.rev = Some(rev);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_err(mut self, code: ErrCode, detail: Option<&str>) -> Self {
        self.err_code = Some(code);
        self.err_detail = detail.map(str::to_string);
        self
    }

    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        flags::has_flag(self.flags, flags::VALID)
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        flags::has_flag(self.flags, flags::DONE)
    }

    /// True when the service reports this server as not authoritative.
    #[inline]
    pub fn is_readonly(&self) -> bool {
        self.err_code == Some(ErrCode::Readonly)
    }

    /// The error carried by this response, if any.
    pub fn error(&self) -> Option<FraggleError> {
        if self.disconnected {
            return Some(FraggleError::Disconnected);
        }
        self.err_code.map(|code| FraggleError::Service {
            code,
            detail: self.err_detail.clone(),
        })
    }
}
