use std::time::Duration;

use crate::wire::FieldKind;

/// Errors returned by hub operations on the caller's thread.
///
/// Protocol-level outcomes reported by the device are not errors; they reach
/// the operation's callback as a [`crate::ResultCode`].
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] groundlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] groundlink_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local I/O error (cache directory, parameter files, thread spawn).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A request with the same match key is already outstanding.
    #[error("request already pending: {0}")]
    RequestPending(String),

    /// A transfer on the same stream is already running.
    #[error("transfer already active on component {address} stream {index}")]
    TransferActive { address: u8, index: u8 },

    /// The component has not been reported by the device.
    #[error("unknown component {0}")]
    UnknownComponent(u8),

    /// The component does not declare this field.
    #[error("component {address} has no field {index}")]
    UnknownField { address: u8, index: u8 },

    /// The component does not declare this file stream.
    #[error("component {address} has no stream {index}")]
    UnknownStream { address: u8, index: u8 },

    /// The parameter is not in the enumerated list.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// An argument is outside what the wire format can carry.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The session has stopped or the link was lost.
    #[error("session disconnected")]
    Disconnected,

    /// A blocking wait ran out of time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, HubError>;

/// A malformed application payload.
///
/// These are data errors: the dispatcher logs and counts them and moves on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    /// The payload ended before a required value.
    #[error("{message} payload truncated at byte {offset}")]
    Truncated { message: &'static str, offset: usize },

    /// A sub-type byte with no known meaning.
    #[error("{message} has unknown sub-type {subtype:#04x}")]
    UnknownSubtype { message: &'static str, subtype: u8 },

    /// A field descriptor with an unknown kind.
    #[error("unknown field kind {0}")]
    FieldKind(u8),

    /// A field descriptor whose size does not fit its kind.
    #[error("unsupported size {size} for {kind:?} field")]
    FieldSize { kind: FieldKind, size: u8 },

    /// A report or descriptor for a component that was never announced.
    #[error("component {0} is unknown")]
    UnknownComponent(u8),

    /// A field report names an index the component does not declare.
    #[error("component {address} reported out-of-range field {index}")]
    FieldIndex { address: u8, index: u8 },
}
