/// Errors that can occur while opening or using a device link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the serial device.
    #[cfg(feature = "serial")]
    #[error("failed to open serial port {path}: {source}")]
    SerialOpen {
        path: String,
        source: serialport::Error,
    },

    /// Failed to connect to the network endpoint.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    /// The endpoint string could not be parsed.
    #[error("invalid address '{0}' (expected host[:port])")]
    InvalidAddress(String),

    /// The modem selector could not be parsed.
    #[error("invalid modem selector '{0}' (expected <address>:<port>)")]
    InvalidModem(String),

    /// An I/O error occurred on the link.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serial port operation failed after the port was opened.
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
