use std::fmt;

use serde::Serialize;

/// Outcome of a device operation, delivered exactly once to its callback.
///
/// The first seven values come from the device; `Timeout` and `Disconnected`
/// are produced locally when no answer can arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Success,
    /// Accepted, execution deferred by the device. Not a failure.
    CommandQueued,
    Error,
    InvalidArgument,
    NotFound,
    Busy,
    ChecksumMismatch,
    Unknown(u8),
    Timeout,
    Disconnected,
}

impl ResultCode {
    pub fn from_wire(code: u8) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::CommandQueued,
            2 => Self::Error,
            3 => Self::InvalidArgument,
            4 => Self::NotFound,
            5 => Self::Busy,
            6 => Self::ChecksumMismatch,
            other => Self::Unknown(other),
        }
    }

    /// Wire value, or `None` for locally generated outcomes.
    pub fn to_wire(self) -> Option<u8> {
        match self {
            Self::Success => Some(0),
            Self::CommandQueued => Some(1),
            Self::Error => Some(2),
            Self::InvalidArgument => Some(3),
            Self::NotFound => Some(4),
            Self::Busy => Some(5),
            Self::ChecksumMismatch => Some(6),
            Self::Unknown(code) => Some(code),
            Self::Timeout | Self::Disconnected => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// True for results that mean the device took the request.
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Success | Self::CommandQueued)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("SUCCESS"),
            Self::CommandQueued => f.write_str("COMMAND_QUEUED"),
            Self::Error => f.write_str("ERROR"),
            Self::InvalidArgument => f.write_str("INVALID_ARGUMENT"),
            Self::NotFound => f.write_str("NOT_FOUND"),
            Self::Busy => f.write_str("BUSY"),
            Self::ChecksumMismatch => f.write_str("CHECKSUM_MISMATCH"),
            Self::Unknown(code) => write!(f, "UNKNOWN({code})"),
            Self::Timeout => f.write_str("TIMEOUT"),
            Self::Disconnected => f.write_str("DISCONNECTED"),
        }
    }
}
