use std::collections::HashMap;

use groundlink_frame::message::{self, file, info, param};
use groundlink_frame::Frame;

use crate::error::PayloadError;
use crate::hub::{Deferred, Shared};
use crate::{commands, components, device, fields, params, transfer};

pub(crate) type HandlerResult = Result<Deferred, PayloadError>;

/// A frame handler: classify, update state, return the completions to run.
pub(crate) type Handler = fn(&Shared, &Frame) -> HandlerResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RouteKey {
    id: u8,
    subtype: Option<u8>,
}

pub(crate) struct Route {
    pub(crate) name: &'static str,
    pub(crate) handler: Handler,
}

/// Dispatch table keyed by message id and, for multiplexed messages, the
/// first payload byte.
pub(crate) struct Router {
    routes: HashMap<RouteKey, Route>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Every message the hub understands.
    pub(crate) fn standard() -> Self {
        let mut router = Self::new();
        router.register(
            message::COMMAND_RESPONSE,
            None,
            "command response",
            commands::on_command_response,
        );
        router.register(
            message::COMPONENT_MESSAGE,
            None,
            "field report",
            fields::on_field_report,
        );
        router.register(
            message::COMPONENT_INFO,
            Some(info::HEADER),
            "component header",
            components::on_header,
        );
        router.register(
            message::COMPONENT_INFO,
            Some(info::FIELD),
            "field descriptor",
            components::on_field_descriptor,
        );
        router.register(
            message::COMPONENT_INFO,
            Some(info::FILE),
            "file descriptor",
            components::on_file_descriptor,
        );
        router.register(
            message::PARAMETER,
            Some(param::COUNT),
            "parameter count",
            params::on_param_count,
        );
        router.register(
            message::PARAMETER,
            Some(param::GET),
            "parameter value",
            params::on_param_value,
        );
        router.register(
            message::PARAMETER,
            Some(param::SET_BY_NAME),
            "parameter set",
            params::on_param_value,
        );
        router.register(
            message::PARAMETER,
            Some(param::SET_BY_NUMBER),
            "parameter set",
            params::on_param_value,
        );
        router.register(
            message::FILE,
            Some(file::READ),
            "file chunk",
            transfer::on_read_chunk,
        );
        router.register(
            message::FILE,
            Some(file::WRITE),
            "file ack",
            transfer::on_write_ack,
        );
        router.register(
            message::DEBUG_TEXT,
            None,
            "debug text",
            device::on_text,
        );
        router.register(
            message::ERROR_TEXT,
            None,
            "error text",
            device::on_text,
        );
        router.register(
            message::STATUS,
            None,
            "status",
            device::on_notice,
        );
        router.register(
            message::CALIBRATION,
            None,
            "calibration",
            device::on_notice,
        );
        router.register(
            message::COPY_FINISHED,
            None,
            "copy finished",
            device::on_notice,
        );
        router
    }

    /// Add or replace a route. `subtype: None` matches any first byte.
    pub(crate) fn register(
        &mut self,
        id: u8,
        subtype: Option<u8>,
        name: &'static str,
        handler: Handler,
    ) {
        self.routes.insert(RouteKey { id, subtype }, Route { name, handler });
    }

    /// Exact sub-type match first, then the id-only route.
    pub(crate) fn lookup(&self, frame: &Frame) -> Option<&Route> {
        frame
            .subtype()
            .and_then(|subtype| {
                self.routes.get(&RouteKey {
                    id: frame.id,
                    subtype: Some(subtype),
                })
            })
            .or_else(|| {
                self.routes.get(&RouteKey {
                    id: frame.id,
                    subtype: None,
                })
            })
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(_: &Shared, _: &Frame) -> HandlerResult {
        Ok(Deferred::new())
    }

    fn fallback(_: &Shared, _: &Frame) -> HandlerResult {
        Ok(Deferred::new())
    }

    #[test]
    fn exact_subtype_wins_over_fallback() {
        let mut router = Router::new();
        router.register(0x3B, Some(0x01), "exact", exact);
        router.register(0x3B, None, "fallback", fallback);

        let hit = router.lookup(&Frame::new(0x3B, vec![0x01, 0x00])).unwrap();
        assert_eq!(hit.name, "exact");

        let hit = router.lookup(&Frame::new(0x3B, vec![0x07])).unwrap();
        assert_eq!(hit.name, "fallback");

        let hit = router.lookup(&Frame::new(0x3B, Vec::new())).unwrap();
        assert_eq!(hit.name, "fallback");
    }

    #[test]
    fn unknown_id_has_no_route() {
        let router = Router::standard();
        assert!(router.lookup(&Frame::new(0x99, vec![0x00])).is_none());
        // Unknown PARAMETER sub-type has no id-only fallback.
        assert!(router.lookup(&Frame::new(message::PARAMETER, vec![0x09])).is_none());
    }

    #[test]
    fn standard_table_covers_catalog() {
        let router = Router::standard();
        assert_eq!(router.len(), 16);
        let route = router
            .lookup(&Frame::new(message::COMMAND_RESPONSE, vec![18, 1]))
            .unwrap();
        assert_eq!(route.name, "command response");
        let route = router
            .lookup(&Frame::new(message::FILE, vec![file::WRITE]))
            .unwrap();
        assert_eq!(route.name, "file ack");
    }
}
