use bytes::Bytes;
use groundlink_frame::message::{CALIBRATION, COPY_FINISHED, ERROR_TEXT, STATUS};
use groundlink_frame::Frame;
use tracing::{info, warn};

use crate::hub::{Deferred, Shared};
use crate::registry::{DeviceText, TextLevel};
use crate::router::HandlerResult;
use crate::signal::lock;
use crate::wire::PayloadReader;

/// Unsolicited device output handed to [`crate::Hub::on_device_message`] observers.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    Text(DeviceText),
    /// Raw status telemetry.
    Status(Bytes),
    Calibration { kind: u8, samples: Bytes },
    CopyFinished,
}

pub(crate) fn on_text(shared: &Shared, frame: &Frame) -> HandlerResult {
    let text = PayloadReader::new("device text", &frame.payload).text_rest();
    let level = if frame.id == ERROR_TEXT {
        warn!(target: "groundlink::device", "{text}");
        TextLevel::Error
    } else {
        info!(target: "groundlink::device", "{text}");
        TextLevel::Debug
    };
    let entry = DeviceText { level, text };
    lock(&shared.registry).push_text(entry.clone());

    let mut deferred = Deferred::new();
    deferred.call_all(shared.device_message_jobs(&DeviceMessage::Text(entry)));
    deferred.changed();
    Ok(deferred)
}

pub(crate) fn on_notice(shared: &Shared, frame: &Frame) -> HandlerResult {
    let message = match frame.id {
        STATUS => DeviceMessage::Status(frame.payload.clone()),
        CALIBRATION => {
            let mut reader = PayloadReader::new("CALIBRATION", &frame.payload);
            let kind = reader.u8()?;
            DeviceMessage::Calibration {
                kind,
                samples: frame.payload.slice(1..),
            }
        }
        COPY_FINISHED => {
            info!(target: "groundlink::device", "flash copy finished");
            DeviceMessage::CopyFinished
        }
        _ => return Ok(Deferred::new()),
    };
    let mut deferred = Deferred::new();
    deferred.call_all(shared.device_message_jobs(&message));
    Ok(deferred)
}
