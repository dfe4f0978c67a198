//! Message identifiers and sub-type bytes of the flight controller link.
//!
//! Several messages multiplex requests and responses through their first
//! payload byte; the sub-type constants live next to their message id.

/// Periodic status telemetry.
pub const STATUS: u8 = 0x34;

/// One-byte system command, ground to device.
pub const SYSTEM_COMMAND: u8 = 0x36;

/// Result of a system command: `[code, result]`.
pub const COMMAND_RESPONSE: u8 = 0x37;

/// Field report for one component.
pub const COMPONENT_MESSAGE: u8 = 0x38;

/// Component enumeration and description.
pub const COMPONENT_INFO: u8 = 0x39;

/// Field read/write request.
pub const FIELD_REQUEST: u8 = 0x3A;

/// Parameter count/get/set.
pub const PARAMETER: u8 = 0x3B;

/// File stream chunk read/write.
pub const FILE: u8 = 0x3C;

/// Free-form debug text from the device.
pub const DEBUG_TEXT: u8 = 0xF1;

/// Free-form error text from the device.
pub const ERROR_TEXT: u8 = 0xF2;

/// Flash copy finished notification.
pub const COPY_FINISHED: u8 = 0xF4;

/// Sensor calibration samples.
pub const CALIBRATION: u8 = 0xF5;

/// `COMPONENT_INFO` response sub-types.
pub mod info {
    pub const HEADER: u8 = 0x00;
    pub const FIELD: u8 = 0x01;
    pub const FILE: u8 = 0x02;
}

/// `FIELD_REQUEST` operations.
pub mod field {
    pub const READ_ALL: u8 = 0x00;
    pub const WRITE: u8 = 0x01;
}

/// `PARAMETER` sub-types.
pub mod param {
    pub const COUNT: u8 = 0x00;
    pub const GET: u8 = 0x01;
    pub const SET_BY_NAME: u8 = 0x02;
    pub const SET_BY_NUMBER: u8 = 0x03;
}

/// `FILE` sub-types and chunk flags.
pub mod file {
    pub const READ: u8 = 0x00;
    pub const WRITE: u8 = 0x01;

    /// Chunk carries a checksum over its data.
    pub const FLAG_VERIFY: u8 = 0x01;
    /// Chunk is the last one of the stream.
    pub const FLAG_END_OF_FILE: u8 = 0x02;

    /// Largest chunk that still fits a frame with its headers.
    pub const MAX_CHUNK: usize = 240;
}

/// Returns a human-readable name for a message id.
pub fn message_name(id: u8) -> &'static str {
    match id {
        STATUS => "STATUS",
        SYSTEM_COMMAND => "SYSTEM_COMMAND",
        COMMAND_RESPONSE => "COMMAND_RESPONSE",
        COMPONENT_MESSAGE => "COMPONENT_MESSAGE",
        COMPONENT_INFO => "COMPONENT_INFO",
        FIELD_REQUEST => "FIELD_REQUEST",
        PARAMETER => "PARAMETER",
        FILE => "FILE",
        DEBUG_TEXT => "DEBUG_TEXT",
        ERROR_TEXT => "ERROR_TEXT",
        COPY_FINISHED => "COPY_FINISHED",
        CALIBRATION => "CALIBRATION",
        _ => "UNKNOWN",
    }
}

/// Returns true for messages carrying free-form device text.
pub fn is_text(id: u8) -> bool {
    matches!(id, DEBUG_TEXT | ERROR_TEXT)
}
