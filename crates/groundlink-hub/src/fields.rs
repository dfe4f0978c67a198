use groundlink_frame::message::FIELD_REQUEST;
use groundlink_frame::Frame;
use tracing::{debug, warn};

use crate::error::{HubError, Result};
use crate::hub::{Deferred, Hub, Shared};
use crate::pending::{Completion, MatchKey};
use crate::registry::{Component, Field};
use crate::result::ResultCode;
use crate::router::HandlerResult;
use crate::signal::lock;
use crate::transfer::StreamHandle;
use crate::wire::{encode_value, FieldRequest};

/// Handle to one component, addressed by its bus address.
#[derive(Clone)]
pub struct ComponentHandle {
    hub: Hub,
    address: u8,
}

/// Handle to one field of a component.
#[derive(Clone)]
pub struct FieldHandle {
    hub: Hub,
    address: u8,
    index: u8,
}

impl Hub {
    /// Handle to a component the device has announced.
    pub fn component(&self, address: u8) -> Result<ComponentHandle> {
        if self.registry().component(address).is_none() {
            return Err(HubError::UnknownComponent(address));
        }
        Ok(ComponentHandle {
            hub: self.clone(),
            address,
        })
    }
}

impl ComponentHandle {
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Copy of the component as currently known.
    pub fn snapshot(&self) -> Option<Component> {
        self.hub.registry().component(self.address).cloned()
    }

    /// Ask the device to report every field.
    ///
    /// `callback` runs once the report for this component was applied.
    pub fn read_fields(
        &self,
        callback: impl FnOnce(ResultCode) + Send + 'static,
    ) -> Result<()> {
        self.hub.request(
            MatchKey::Fields(self.address),
            Completion::Result(Box::new(callback)),
            FIELD_REQUEST,
            &FieldRequest::ReadAll {
                address: self.address,
            }
            .encode(),
        )
    }

    pub fn field(&self, index: u8) -> Result<FieldHandle> {
        let known = self
            .hub
            .registry()
            .component(self.address)
            .is_some_and(|c| c.field(index).is_some());
        if !known {
            return Err(HubError::UnknownField {
                address: self.address,
                index,
            });
        }
        Ok(FieldHandle {
            hub: self.hub.clone(),
            address: self.address,
            index,
        })
    }

    /// Look a field up by name.
    pub fn field_named(&self, name: &str) -> Option<FieldHandle> {
        let index = self
            .hub
            .registry()
            .component(self.address)?
            .fields
            .iter()
            .find(|f| f.name == name)?
            .index;
        Some(FieldHandle {
            hub: self.hub.clone(),
            address: self.address,
            index,
        })
    }

    pub fn stream(&self, index: u8) -> Result<StreamHandle> {
        self.hub.stream(self.address, index)
    }
}

impl FieldHandle {
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    /// Copy of the field descriptor and last value.
    pub fn snapshot(&self) -> Option<Field> {
        self.hub
            .registry()
            .component(self.address)
            .and_then(|c| c.field(self.index))
            .cloned()
    }

    /// Last reported value in engineering units.
    pub fn value(&self) -> Option<f64> {
        self.snapshot().and_then(|f| f.value)
    }

    /// Write a value in engineering units.
    ///
    /// The registry is not touched here; the device's confirming field
    /// report updates it and then runs `callback`.
    pub fn write(
        &self,
        value: f64,
        callback: impl FnOnce(ResultCode) + Send + 'static,
    ) -> Result<()> {
        let field = self.snapshot().ok_or(HubError::UnknownField {
            address: self.address,
            index: self.index,
        })?;
        let raw = encode_value(field.kind, field.size, field.scale, value).ok_or_else(|| {
            HubError::InvalidArgument(format!(
                "{value} does not fit {:?} field '{}' of {} bytes",
                field.kind, field.name, field.size
            ))
        })?;
        debug!(address = self.address, index = self.index, value, "writing field");
        self.hub.request(
            MatchKey::FieldWrite(self.address, self.index),
            Completion::Result(Box::new(callback)),
            FIELD_REQUEST,
            &FieldRequest::Write {
                address: self.address,
                index: self.index,
                value: raw,
            }
            .encode(),
        )
    }
}

pub(crate) fn on_field_report(shared: &Shared, frame: &Frame) -> HandlerResult {
    let update = lock(&shared.registry).apply_field_report(&frame.payload)?;
    if let Some(err) = &update.error {
        warn!(address = update.address, error = %err, "field report truncated");
        lock(&shared.registry).stats_mut().record_data_error();
    }

    let mut deferred = Deferred::new();
    if let Some(completion) = shared.complete(&MatchKey::Fields(update.address)) {
        deferred.call(completion.with_result(ResultCode::Success));
    }
    for &index in &update.indices {
        if let Some(completion) = shared.complete(&MatchKey::FieldWrite(update.address, index)) {
            deferred.call(completion.with_result(ResultCode::Success));
        }
    }
    deferred.call_all(shared.fields_changed_jobs(update.address));
    deferred.changed();
    Ok(deferred)
}
