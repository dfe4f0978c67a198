//! Byte links to a flight controller.
//!
//! The protocol engine only needs two things from a link: read whatever bytes
//! are available within a short timeout, and write a whole buffer. This crate
//! provides that over:
//! - a serial device (57600 8N1, no flow control by default)
//! - a TCP stream, optionally selecting a modem socket on a network bridge
//! - a Unix stream (used by tests and local simulators)
//!
//! Everything else builds on the [`LinkStream`] type provided here.

pub mod error;
pub mod link;
#[cfg(feature = "serial")]
pub mod serial;
pub mod tcp;

pub use error::{Result, TransportError};
pub use link::{is_timeout, LinkStream};
#[cfg(feature = "serial")]
pub use serial::{open_serial, SerialConfig, DEFAULT_BAUD_RATE};
pub use tcp::{connect_tcp, parse_modem, TcpConfig, DEFAULT_PORT};
