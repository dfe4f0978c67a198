//! Ground station link for flight controllers.
//!
//! groundlink talks to a flight controller over a serial port or a network
//! bridge: checksummed framing, a live model of the device's components and
//! parameters, system commands and windowed file stream transfers.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial, TCP and Unix stream links
//! - [`frame`]: the `pl` frame codec, reader and writer
//! - [`hub`]: the session, request engine and device model

/// Re-export transport types.
pub mod transport {
    pub use groundlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use groundlink_frame::*;
}

/// Re-export session and device model types.
pub mod hub {
    pub use groundlink_hub::*;
}

pub use groundlink_hub::{Hub, HubConfig, ResultCode, Session};
