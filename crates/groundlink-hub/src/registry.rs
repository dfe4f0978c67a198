use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::PayloadError;
use crate::stats::Stats;
use crate::wire::{
    decode_value, widen_f32, ComponentHeader, FieldDescriptor, FieldKind, FileDescriptor,
    PayloadReader,
};

/// Field flag marking the component's status bit-field.
pub const FIELD_FLAG_STATUS: u8 = 0x01;

/// One named, typed, scaled value on a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub index: u8,
    pub name: String,
    pub kind: FieldKind,
    pub size: u8,
    pub scale: f64,
    pub unit: String,
    pub min: f64,
    pub max: f64,
    pub flags: u8,
    /// Last reported value in engineering units; `None` until first report.
    #[serde(skip)]
    pub value: Option<f64>,
}

impl Field {
    fn from_descriptor(d: &FieldDescriptor) -> Self {
        Self {
            index: d.index,
            name: d.name.clone(),
            kind: d.kind,
            size: d.size,
            scale: widen_f32(d.scale),
            unit: d.unit.clone(),
            min: widen_f32(d.min),
            max: widen_f32(d.max),
            flags: d.flags,
            value: None,
        }
    }

    pub fn is_status(&self) -> bool {
        self.flags & FIELD_FLAG_STATUS != 0
    }
}

/// A per-component file stream.
///
/// `data` holds the full buffer of the last completed transfer, or `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStream {
    pub address: u8,
    pub index: u8,
    pub flags: u8,
    /// Size declared by the device when the stream was described.
    pub size: u32,
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

impl FileStream {
    fn from_descriptor(d: &FileDescriptor) -> Self {
        Self {
            address: d.address,
            index: d.index,
            flags: d.flags,
            size: d.size,
            data: None,
        }
    }
}

/// A logical subsystem on the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub address: u8,
    pub kind: u16,
    pub name: String,
    pub hw_version: (u8, u8),
    pub sw_version: (u8, u8, u8),
    pub hash: u32,
    /// Fields ordered by index.
    pub fields: Vec<Field>,
    pub files: BTreeMap<u8, FileStream>,
    /// Number of fields the header announced.
    pub field_count: u8,
    /// Number of file streams the header announced.
    pub file_count: u8,
    flag_field: Option<u8>,
}

impl Component {
    fn from_header(h: &ComponentHeader) -> Self {
        Self {
            address: h.address,
            kind: h.kind,
            name: h.name.clone(),
            hw_version: h.hw_version,
            sw_version: h.sw_version,
            hash: h.hash,
            fields: Vec::new(),
            files: BTreeMap::new(),
            field_count: h.field_count,
            file_count: h.file_count,
            flag_field: None,
        }
    }

    pub fn field(&self, index: u8) -> Option<&Field> {
        self.fields
            .binary_search_by_key(&index, |f| f.index)
            .ok()
            .map(|pos| &self.fields[pos])
    }

    fn field_mut(&mut self, index: u8) -> Option<&mut Field> {
        match self.fields.binary_search_by_key(&index, |f| f.index) {
            Ok(pos) => Some(&mut self.fields[pos]),
            Err(_) => None,
        }
    }

    /// The first field flagged as the status bit-field.
    pub fn flag_field(&self) -> Option<&Field> {
        self.flag_field.and_then(|index| self.field(index))
    }

    pub fn stream(&self, index: u8) -> Option<&FileStream> {
        self.files.get(&index)
    }

    /// True once every announced field and file descriptor is known.
    pub fn is_described(&self) -> bool {
        self.fields.len() == usize::from(self.field_count)
            && self.files.len() == usize::from(self.file_count)
    }

    pub(crate) fn insert_field(&mut self, field: Field) {
        match self.fields.binary_search_by_key(&field.index, |f| f.index) {
            Ok(pos) => self.fields[pos] = field,
            Err(pos) => self.fields.insert(pos, field),
        }
        self.flag_field = self.fields.iter().find(|f| f.is_status()).map(|f| f.index);
    }

    pub(crate) fn insert_stream(&mut self, stream: FileStream) {
        self.files.insert(stream.index, stream);
    }
}

/// A named numeric device parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub number: u16,
    pub name: String,
    pub value: f64,
}

/// Severity of a device text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextLevel {
    Debug,
    Error,
}

/// A text message printed by the device firmware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceText {
    pub level: TextLevel,
    pub text: String,
}

/// Result of applying one field report.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub address: u8,
    /// Indices whose value was overwritten, in report order.
    pub indices: Vec<u8>,
    /// Set when the report was cut short by a malformed entry.
    pub error: Option<PayloadError>,
}

/// The device model: components, parameters, message log and link statistics.
///
/// Only the dispatcher mutates it; everyone else reads it under the hub's
/// registry lock.
#[derive(Debug)]
pub struct Registry {
    components: BTreeMap<u8, Component>,
    parameters: HashMap<String, Parameter>,
    order: BTreeMap<u16, String>,
    param_count: Option<u16>,
    messages: VecDeque<DeviceText>,
    message_capacity: usize,
    stats: Stats,
}

impl Registry {
    pub fn new(message_capacity: usize, rate_window: usize, started: Instant) -> Self {
        Self {
            components: BTreeMap::new(),
            parameters: HashMap::new(),
            order: BTreeMap::new(),
            param_count: None,
            messages: VecDeque::with_capacity(message_capacity),
            message_capacity,
            stats: Stats::new(rate_window, started),
        }
    }

    pub fn components(&self) -> &BTreeMap<u8, Component> {
        &self.components
    }

    pub fn component(&self, address: u8) -> Option<&Component> {
        self.components.get(&address)
    }

    pub(crate) fn component_mut(&mut self, address: u8) -> Option<&mut Component> {
        self.components.get_mut(&address)
    }

    /// Parameters in device enumeration order.
    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.order
            .values()
            .filter_map(|name| self.parameters.get(name))
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    pub fn parameter_by_number(&self, number: u16) -> Option<&Parameter> {
        self.order
            .get(&number)
            .and_then(|name| self.parameters.get(name))
    }

    /// Count reported by the last parameter-count response.
    pub fn param_count(&self) -> Option<u16> {
        self.param_count
    }

    /// Latest device text messages, oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &DeviceText> {
        self.messages.iter()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    /// Create or refresh a component from its header.
    ///
    /// Returns true when descriptors still have to be fetched.
    pub(crate) fn apply_header(&mut self, header: &ComponentHeader) -> bool {
        match self.components.get_mut(&header.address) {
            Some(existing) if existing.kind == header.kind && existing.hash == header.hash => {
                existing.name = header.name.clone();
                existing.hw_version = header.hw_version;
                existing.sw_version = header.sw_version;
                existing.field_count = header.field_count;
                existing.file_count = header.file_count;
                !existing.is_described()
            }
            _ => {
                let component = Component::from_header(header);
                let needs_description = !component.is_described();
                self.components.insert(header.address, component);
                needs_description
            }
        }
    }

    /// Store a field descriptor; returns true when the component became fully described.
    pub(crate) fn apply_field_descriptor(
        &mut self,
        descriptor: &FieldDescriptor,
    ) -> Result<bool, PayloadError> {
        let component = self
            .components
            .get_mut(&descriptor.address)
            .ok_or(PayloadError::UnknownComponent(descriptor.address))?;
        let was_described = component.is_described();
        let mut field = Field::from_descriptor(descriptor);
        field.value = component.field(descriptor.index).and_then(|f| f.value);
        component.insert_field(field);
        Ok(!was_described && component.is_described())
    }

    /// Store a file descriptor; returns true when the component became fully described.
    pub(crate) fn apply_file_descriptor(
        &mut self,
        descriptor: &FileDescriptor,
    ) -> Result<bool, PayloadError> {
        let component = self
            .components
            .get_mut(&descriptor.address)
            .ok_or(PayloadError::UnknownComponent(descriptor.address))?;
        let was_described = component.is_described();
        let mut stream = FileStream::from_descriptor(descriptor);
        stream.data = component
            .files
            .get(&descriptor.index)
            .and_then(|s| s.data.clone());
        component.insert_stream(stream);
        Ok(!was_described && component.is_described())
    }

    /// Apply a `COMPONENT_MESSAGE` field report.
    ///
    /// Values before a malformed entry are kept; the rest of the report is
    /// skipped and the problem returned in [`FieldUpdate::error`].
    pub(crate) fn apply_field_report(
        &mut self,
        payload: &[u8],
    ) -> Result<FieldUpdate, PayloadError> {
        let mut reader = PayloadReader::new("COMPONENT_MESSAGE", payload);
        let address = reader.u8()?;
        let component = self
            .components
            .get_mut(&address)
            .ok_or(PayloadError::UnknownComponent(address))?;

        let mut indices = Vec::new();
        let error = apply_values(component, &mut reader, &mut indices).err();
        Ok(FieldUpdate {
            address,
            indices,
            error,
        })
    }

    pub(crate) fn apply_param(&mut self, number: u16, name: &str, value: f64) {
        if let Some(old) = self.parameters.get(name) {
            if old.number != number {
                self.order.remove(&old.number);
            }
        }
        if let Some(previous) = self.order.insert(number, name.to_string()) {
            if previous != name {
                self.parameters.remove(&previous);
            }
        }
        self.parameters.insert(
            name.to_string(),
            Parameter {
                number,
                name: name.to_string(),
                value,
            },
        );
    }

    pub(crate) fn set_param_count(&mut self, count: u16) {
        self.param_count = Some(count);
    }

    pub(crate) fn clear_params(&mut self) {
        self.parameters.clear();
        self.order.clear();
        self.param_count = None;
    }

    pub(crate) fn push_text(&mut self, text: DeviceText) {
        if self.message_capacity == 0 {
            return;
        }
        while self.messages.len() >= self.message_capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(text);
    }
}

fn apply_values(
    component: &mut Component,
    reader: &mut PayloadReader<'_>,
    indices: &mut Vec<u8>,
) -> Result<(), PayloadError> {
    let address = component.address;
    while reader.remaining() > 0 {
        let index = reader.u8()?;
        let field = component
            .field_mut(index)
            .ok_or(PayloadError::FieldIndex { address, index })?;
        if !field.kind.accepts_size(field.size) {
            return Err(PayloadError::FieldSize {
                kind: field.kind,
                size: field.size,
            });
        }
        let raw = reader.bytes(usize::from(field.size))?;
        field.value = Some(decode_value(field.kind, field.scale, raw));
        indices.push(index);
    }
    Ok(())
}
