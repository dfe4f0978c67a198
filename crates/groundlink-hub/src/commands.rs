use groundlink_frame::message::SYSTEM_COMMAND;
use groundlink_frame::Frame;
use tracing::debug;

use crate::error::Result;
use crate::hub::{Deferred, Hub, Shared};
use crate::pending::{Completion, MatchKey};
use crate::router::HandlerResult;
use crate::result::ResultCode;
use crate::wire::{CommandRequest, CommandResponse};

impl Hub {
    /// Send a one-byte system command without waiting for the answer.
    ///
    /// `callback` runs once on the dispatcher thread with the device's result;
    /// `CommandQueued` means accepted and deferred. Commands are never
    /// retried: without a `request_timeout` an unanswered command stays
    /// pending until [`Hub::cancel_pending`] or the session stops, and its
    /// callback is then dropped unrun.
    pub fn send_command(
        &self,
        code: u8,
        callback: impl FnOnce(ResultCode) + Send + 'static,
    ) -> Result<()> {
        debug!(code, "sending system command");
        self.request(
            MatchKey::Command(code),
            Completion::Result(Box::new(callback)),
            SYSTEM_COMMAND,
            &CommandRequest { code }.encode(),
        )
    }
}

pub(crate) fn on_command_response(shared: &Shared, frame: &Frame) -> HandlerResult {
    let response = CommandResponse::decode(&frame.payload)?;
    let mut deferred = Deferred::new();
    match shared.complete(&MatchKey::Command(response.code)) {
        Some(completion) => {
            debug!(code = response.code, result = %response.result, "command answered");
            deferred.call(completion.with_result(response.result));
            deferred.changed();
        }
        None => shared.note_unmatched(frame.id, "command response"),
    }
    Ok(deferred)
}
