//! Request correlation, device model and file transfers for the flight
//! controller link.
//!
//! A [`Session`] owns one dispatcher thread that reads frames, routes them
//! to handlers and completes outstanding requests. Callers talk to the
//! device through the cloneable [`Hub`] handle:
//! - system commands with a single result callback
//! - component enumeration, field reads and writes
//! - parameter enumeration, get and set, plus `name=value` files
//! - burst-windowed file stream reads and writes with per-chunk retry
//!
//! All callbacks run on the dispatcher thread after every internal lock has
//! been released, so they may call back into the hub. They should still be
//! short; hand heavier work to another thread.

pub mod cache;
mod commands;
mod components;
mod device;
mod dispatcher;
pub mod error;
mod fields;
mod hub;
mod params;
mod pending;
pub mod progress;
pub mod registry;
pub mod result;
mod router;
mod session;
pub mod signal;
pub mod stats;
mod transfer;
pub mod wire;

pub use cache::{CachedComponent, ComponentCache};
pub use device::DeviceMessage;
pub use error::{HubError, PayloadError, Result};
pub use fields::{ComponentHandle, FieldHandle};
pub use hub::Hub;
pub use params::{
    is_changed, params_from_inf, params_to_inf, ParamRef, PendingEdit, PendingEdits,
    PARAM_TOLERANCE,
};
pub use pending::MatchKey;
pub use progress::{Progress, ProgressSnapshot};
pub use registry::{
    Component, DeviceText, Field, FieldUpdate, FileStream, Parameter, Registry, TextLevel,
    FIELD_FLAG_STATUS,
};
pub use result::ResultCode;
pub use session::{HubConfig, Session, TransferConfig};
pub use signal::StateSignal;
pub use stats::{MessageCounters, Stats};
pub use transfer::{StreamHandle, TransferOptions};
