use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, StopBits};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::link::LinkStream;

/// Baud rate used by the flight controller's telemetry port.
pub const DEFAULT_BAUD_RATE: u32 = 57600;

/// Serial device settings.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device path (e.g. `/dev/ttyUSB0`, `COM3`).
    pub path: String,
    /// Line speed.
    pub baud_rate: u32,
    /// Read timeout; bounds how long the reader loop blocks between checks.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Settings for `path` at the default baud rate.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Open a serial device as 8N1 without flow control.
pub fn open_serial(config: &SerialConfig) -> Result<LinkStream> {
    let port = serialport::new(config.path.as_str(), config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(config.timeout)
        .open()
        .map_err(|source| TransportError::SerialOpen {
            path: config.path.clone(),
            source,
        })?;

    info!(path = %config.path, baud = config.baud_rate, "opened serial link");
    debug!(timeout = ?config.timeout, "serial read timeout");
    Ok(LinkStream::from(port))
}
