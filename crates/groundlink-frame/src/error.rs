/// Errors that can occur during frame encoding/decoding.
///
/// Checksum mismatches are not errors at this level: they are counted by
/// the codec and the reader resynchronizes on its own.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit the one-byte length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link was closed by the far end.
    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// True when the error only reports an expired read or write timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FrameError::Io(err) if groundlink_transport::is_timeout(err))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
