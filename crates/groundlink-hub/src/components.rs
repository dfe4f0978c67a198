use std::time::Duration;

use groundlink_frame::message::COMPONENT_INFO;
use groundlink_frame::Frame;
use tracing::{debug, info, warn};

use crate::cache::CachedComponent;
use crate::error::{HubError, PayloadError, Result};
use crate::hub::{Deferred, Hub, Shared};
use crate::pending::Job;
use crate::router::HandlerResult;
use crate::signal::lock;
use crate::wire::ComponentInfo;

impl Hub {
    /// Ask every component to announce itself.
    ///
    /// Headers arrive asynchronously; components whose description is not
    /// cached are described automatically.
    pub fn enumerate(&self) -> Result<()> {
        self.send_info(ComponentInfo::Request(None))
    }

    /// Ask one component for its field and file descriptors.
    pub fn describe(&self, address: u8) -> Result<()> {
        self.send_info(ComponentInfo::Request(Some(address)))
    }

    /// Block until at least one component is known and all are described.
    pub fn wait_described(&self, timeout: Duration) -> Result<()> {
        self.wait_until(timeout, |registry| {
            let components = registry.components();
            !components.is_empty() && components.values().all(|c| c.is_described())
        })
    }

    fn send_info(&self, request: ComponentInfo) -> Result<()> {
        if self.shared.is_terminated() {
            return Err(HubError::Disconnected);
        }
        self.shared.send(COMPONENT_INFO, &request.encode())
    }
}

fn unexpected(frame: &Frame) -> PayloadError {
    PayloadError::UnknownSubtype {
        message: "COMPONENT_INFO",
        subtype: frame.subtype().unwrap_or_default(),
    }
}

pub(crate) fn on_header(shared: &Shared, frame: &Frame) -> HandlerResult {
    let ComponentInfo::Header(header) = ComponentInfo::decode(&frame.payload)? else {
        return Err(unexpected(frame));
    };
    debug!(
        address = header.address,
        kind = header.kind,
        hash = header.hash,
        name = %header.name,
        "component announced"
    );

    let mut deferred = Deferred::new();
    deferred.changed();
    if !lock(&shared.registry).apply_header(&header) {
        return Ok(deferred);
    }

    let cached = shared
        .cache
        .as_ref()
        .and_then(|cache| match cache.load(header.kind, header.hash) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    kind = header.kind,
                    hash = header.hash,
                    error = %err,
                    "ignoring unreadable cache entry"
                );
                None
            }
        });
    let restored = match cached {
        Some(entry) => {
            let mut registry = lock(&shared.registry);
            match registry.component_mut(header.address) {
                Some(component) => entry.restore(component),
                None => false,
            }
        }
        None => false,
    };

    if restored {
        info!(
            address = header.address,
            name = %header.name,
            "component description loaded from cache"
        );
    } else {
        deferred.send(
            COMPONENT_INFO,
            ComponentInfo::Request(Some(header.address)).encode(),
        );
    }
    Ok(deferred)
}

pub(crate) fn on_field_descriptor(shared: &Shared, frame: &Frame) -> HandlerResult {
    let ComponentInfo::Field(descriptor) = ComponentInfo::decode(&frame.payload)? else {
        return Err(unexpected(frame));
    };
    let described = lock(&shared.registry).apply_field_descriptor(&descriptor)?;
    Ok(finish_descriptor(shared, descriptor.address, described))
}

pub(crate) fn on_file_descriptor(shared: &Shared, frame: &Frame) -> HandlerResult {
    let ComponentInfo::File(descriptor) = ComponentInfo::decode(&frame.payload)? else {
        return Err(unexpected(frame));
    };
    let described = lock(&shared.registry).apply_file_descriptor(&descriptor)?;
    Ok(finish_descriptor(shared, descriptor.address, described))
}

fn finish_descriptor(shared: &Shared, address: u8, described: bool) -> Deferred {
    let mut deferred = Deferred::new();
    if described {
        if let Some(job) = cache_job(shared, address) {
            deferred.call(job);
        }
    }
    deferred.changed();
    deferred
}

fn cache_job(shared: &Shared, address: u8) -> Option<Job> {
    let entry = {
        let registry = lock(&shared.registry);
        let component = registry.component(address)?;
        info!(
            address,
            name = %component.name,
            fields = component.fields.len(),
            files = component.files.len(),
            "component described"
        );
        CachedComponent::from_component(component)
    };
    let cache = shared.cache.clone()?;
    Some(Box::new(move || {
        if let Err(err) = cache.store(&entry) {
            warn!(
                kind = entry.kind,
                hash = entry.hash,
                error = %err,
                "failed to cache component description"
            );
        }
    }))
}
