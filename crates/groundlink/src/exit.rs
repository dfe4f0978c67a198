use std::fmt;
use std::io;

use groundlink_frame::FrameError;
use groundlink_hub::{HubError, ResultCode};
use groundlink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } | TransportError::Io(source) => {
            io_error(context, source)
        }
        TransportError::InvalidAddress(_) | TransportError::InvalidModem(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
    }
}

pub fn hub_error(context: &str, err: HubError) -> CliError {
    match err {
        HubError::Transport(err) => transport_error(context, err),
        HubError::Frame(err) => frame_error(context, err),
        HubError::Io(err) => io_error(context, err),
        HubError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        HubError::UnknownComponent(_)
        | HubError::UnknownField { .. }
        | HubError::UnknownStream { .. }
        | HubError::UnknownParameter(_)
        | HubError::InvalidArgument(_) => CliError::new(USAGE, format!("{context}: {err}")),
        HubError::Disconnected => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        HubError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

/// Exit code for a device-reported outcome.
pub fn result_code(result: ResultCode) -> i32 {
    match result {
        ResultCode::Success | ResultCode::CommandQueued => SUCCESS,
        ResultCode::Timeout => TIMEOUT,
        ResultCode::Disconnected => TRANSPORT_ERROR,
        ResultCode::InvalidArgument => USAGE,
        ResultCode::ChecksumMismatch => DATA_INVALID,
        _ => FAILURE,
    }
}

/// Turn a device-reported failure into an error; accepted outcomes pass.
pub fn check_result(context: &str, result: ResultCode) -> CliResult<ResultCode> {
    match result_code(result) {
        SUCCESS => Ok(result),
        code => Err(CliError::new(code, format!("{context}: device answered {result}"))),
    }
}
