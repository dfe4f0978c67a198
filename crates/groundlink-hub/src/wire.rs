//! Application payload layouts carried inside frames.
//!
//! Every message has a typed form with `encode` and `decode`, for both
//! directions, so the same definitions serve the hub and device simulators.
//! Multi-byte integers are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use groundlink_frame::message::{field, file, info, param};
use serde::{Deserialize, Serialize};

use crate::error::PayloadError;
use crate::result::ResultCode;

/// Parameter values travel as `i32` fixed point with this many steps per unit.
pub const PARAM_SCALE: f64 = 10_000.0;

/// Sequential reader over one payload with truncation checks.
pub struct PayloadReader<'a> {
    message: &'static str,
    data: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(message: &'static str, data: &'a [u8]) -> Self {
        Self {
            message,
            data,
            offset: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], PayloadError> {
        if self.remaining() < len {
            return Err(PayloadError::Truncated {
                message: self.message,
                offset: self.data.len(),
            });
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, PayloadError> {
        Ok(self.bytes(1)?.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16, PayloadError> {
        Ok(self.bytes(2)?.get_u16_le())
    }

    pub fn u32(&mut self) -> Result<u32, PayloadError> {
        Ok(self.bytes(4)?.get_u32_le())
    }

    pub fn i32(&mut self) -> Result<i32, PayloadError> {
        Ok(self.bytes(4)?.get_i32_le())
    }

    pub fn f32(&mut self) -> Result<f32, PayloadError> {
        Ok(self.bytes(4)?.get_f32_le())
    }

    /// Everything not consumed yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.offset..];
        self.offset = self.data.len();
        slice
    }

    /// Length-prefixed text.
    pub fn text(&mut self, len: usize) -> Result<String, PayloadError> {
        Ok(decode_text(self.bytes(len)?))
    }

    /// The rest of the payload as text.
    pub fn text_rest(&mut self) -> String {
        decode_text(self.rest())
    }
}

fn decode_text(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Convert a fixed-point parameter to engineering units.
pub fn param_from_raw(raw: i32) -> f64 {
    f64::from(raw) / PARAM_SCALE
}

/// Convert engineering units to fixed point, or `None` when out of range.
pub fn param_to_raw(value: f64) -> Option<i32> {
    let raw = (value * PARAM_SCALE).round();
    if raw.is_finite() && raw >= f64::from(i32::MIN) && raw <= f64::from(i32::MAX) {
        Some(raw as i32)
    } else {
        None
    }
}

/// `SYSTEM_COMMAND` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRequest {
    pub code: u8,
}

impl CommandRequest {
    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&[self.code])
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new("SYSTEM_COMMAND", payload);
        Ok(Self { code: r.u8()? })
    }
}

/// `COMMAND_RESPONSE`: `[code, result]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResponse {
    pub code: u8,
    pub result: ResultCode,
}

impl CommandResponse {
    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&[self.code, wire_result(self.result)])
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new("COMMAND_RESPONSE", payload);
        Ok(Self {
            code: r.u8()?,
            result: ResultCode::from_wire(r.u8()?),
        })
    }
}

fn wire_result(result: ResultCode) -> u8 {
    result.to_wire().unwrap_or(2)
}

/// How a field's raw bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Unsigned,
    Signed,
    Float,
    Bool,
}

impl FieldKind {
    pub fn from_wire(kind: u8) -> Result<Self, PayloadError> {
        match kind {
            0 => Ok(Self::Unsigned),
            1 => Ok(Self::Signed),
            2 => Ok(Self::Float),
            3 => Ok(Self::Bool),
            other => Err(PayloadError::FieldKind(other)),
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Unsigned => 0,
            Self::Signed => 1,
            Self::Float => 2,
            Self::Bool => 3,
        }
    }

    /// True when `size` bytes can hold a value of this kind.
    pub fn accepts_size(self, size: u8) -> bool {
        match self {
            Self::Unsigned | Self::Signed => matches!(size, 1 | 2 | 4 | 8),
            Self::Float => matches!(size, 4 | 8),
            Self::Bool => size == 1,
        }
    }
}

/// Widen a wire `f32` to the `f64` with the same shortest decimal form.
///
/// `0.01f32` becomes `0.01` rather than `0.009999999776482582`, so scaled
/// integer fields produce the engineering values the device intends.
pub fn widen_f32(value: f32) -> f64 {
    value
        .to_string()
        .parse::<f64>()
        .unwrap_or_else(|_| f64::from(value))
}

/// Decode raw field bytes to engineering units.
///
/// Integer kinds are multiplied by `scale`; floats and booleans are not.
pub fn decode_value(kind: FieldKind, scale: f64, raw: &[u8]) -> f64 {
    let mut buf = raw;
    match (kind, raw.len()) {
        (FieldKind::Float, 4) => f64::from(buf.get_f32_le()),
        (FieldKind::Float, 8) => buf.get_f64_le(),
        (FieldKind::Bool, _) => {
            if raw.iter().any(|&b| b != 0) {
                1.0
            } else {
                0.0
            }
        }
        (FieldKind::Signed, len) => buf.get_int_le(len) as f64 * effective_scale(scale),
        (_, len) => buf.get_uint_le(len) as f64 * effective_scale(scale),
    }
}

/// Encode an engineering value into `size` raw bytes.
///
/// Returns `None` when the value does not fit the field.
pub fn encode_value(kind: FieldKind, size: u8, scale: f64, value: f64) -> Option<Bytes> {
    if !value.is_finite() || !kind.accepts_size(size) {
        return None;
    }
    let size = usize::from(size);
    let mut out = BytesMut::with_capacity(size);
    match kind {
        FieldKind::Float if size == 4 => out.put_f32_le(value as f32),
        FieldKind::Float => out.put_f64_le(value),
        FieldKind::Bool => out.put_u8(u8::from(value != 0.0)),
        FieldKind::Unsigned => {
            let raw = (value / effective_scale(scale)).round();
            let max = if size == 8 {
                u64::MAX as f64
            } else {
                ((1u64 << (size * 8)) - 1) as f64
            };
            if raw < 0.0 || raw > max {
                return None;
            }
            out.put_uint_le(raw as u64, size);
        }
        FieldKind::Signed => {
            let raw = (value / effective_scale(scale)).round();
            let bits = size * 8;
            let (min, max) = if size == 8 {
                (i64::MIN as f64, i64::MAX as f64)
            } else {
                (-((1i64 << (bits - 1)) as f64), ((1i64 << (bits - 1)) - 1) as f64)
            };
            if raw < min || raw > max {
                return None;
            }
            out.put_int_le(raw as i64, size);
        }
    }
    Some(out.freeze())
}

fn effective_scale(scale: f64) -> f64 {
    if scale == 0.0 {
        1.0
    } else {
        scale
    }
}

/// `COMPONENT_INFO` header: identity of one component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentHeader {
    pub address: u8,
    pub kind: u16,
    pub hw_version: (u8, u8),
    pub sw_version: (u8, u8, u8),
    pub hash: u32,
    pub field_count: u8,
    pub file_count: u8,
    pub name: String,
}

/// `COMPONENT_INFO` field descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub address: u8,
    pub index: u8,
    pub kind: FieldKind,
    pub size: u8,
    pub flags: u8,
    pub scale: f32,
    pub min: f32,
    pub max: f32,
    pub unit: String,
    pub name: String,
}

/// `COMPONENT_INFO` file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDescriptor {
    pub address: u8,
    pub index: u8,
    pub flags: u8,
    pub size: u32,
}

/// `COMPONENT_INFO` messages in both directions.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentInfo {
    /// Request: enumerate every component (`None`) or describe one.
    Request(Option<u8>),
    Header(ComponentHeader),
    Field(FieldDescriptor),
    File(FileDescriptor),
}

impl ComponentInfo {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        match self {
            Self::Request(None) => {}
            Self::Request(Some(address)) => out.put_u8(*address),
            Self::Header(h) => {
                out.put_u8(info::HEADER);
                out.put_u8(h.address);
                out.put_u16_le(h.kind);
                out.put_slice(&[h.hw_version.0, h.hw_version.1]);
                out.put_slice(&[h.sw_version.0, h.sw_version.1, h.sw_version.2]);
                out.put_u32_le(h.hash);
                out.put_u8(h.field_count);
                out.put_u8(h.file_count);
                out.put_slice(h.name.as_bytes());
            }
            Self::Field(d) => {
                out.put_u8(info::FIELD);
                out.put_slice(&[d.address, d.index, d.kind.to_wire(), d.size, d.flags]);
                out.put_f32_le(d.scale);
                out.put_f32_le(d.min);
                out.put_f32_le(d.max);
                out.put_u8(d.unit.len() as u8);
                out.put_slice(d.unit.as_bytes());
                out.put_slice(d.name.as_bytes());
            }
            Self::File(d) => {
                out.put_u8(info::FILE);
                out.put_slice(&[d.address, d.index, d.flags]);
                out.put_u32_le(d.size);
            }
        }
        out.freeze()
    }

    /// Decode a device-side response (header or descriptor).
    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new("COMPONENT_INFO", payload);
        match r.u8()? {
            info::HEADER => Ok(Self::Header(ComponentHeader {
                address: r.u8()?,
                kind: r.u16()?,
                hw_version: (r.u8()?, r.u8()?),
                sw_version: (r.u8()?, r.u8()?, r.u8()?),
                hash: r.u32()?,
                field_count: r.u8()?,
                file_count: r.u8()?,
                name: r.text_rest(),
            })),
            info::FIELD => {
                let address = r.u8()?;
                let index = r.u8()?;
                let kind = FieldKind::from_wire(r.u8()?)?;
                let size = r.u8()?;
                if !kind.accepts_size(size) {
                    return Err(PayloadError::FieldSize { kind, size });
                }
                let flags = r.u8()?;
                let scale = r.f32()?;
                let min = r.f32()?;
                let max = r.f32()?;
                let unit_len = usize::from(r.u8()?);
                let unit = r.text(unit_len)?;
                Ok(Self::Field(FieldDescriptor {
                    address,
                    index,
                    kind,
                    size,
                    flags,
                    scale,
                    min,
                    max,
                    unit,
                    name: r.text_rest(),
                }))
            }
            info::FILE => Ok(Self::File(FileDescriptor {
                address: r.u8()?,
                index: r.u8()?,
                flags: r.u8()?,
                size: r.u32()?,
            })),
            subtype => Err(PayloadError::UnknownSubtype {
                message: "COMPONENT_INFO",
                subtype,
            }),
        }
    }

    /// Decode a ground-side request.
    pub fn decode_request(payload: &[u8]) -> Self {
        Self::Request(payload.first().copied())
    }
}

/// `FIELD_REQUEST`: read all fields or write one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRequest {
    ReadAll { address: u8 },
    Write { address: u8, index: u8, value: Bytes },
}

impl FieldRequest {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        match self {
            Self::ReadAll { address } => out.put_slice(&[*address, field::READ_ALL]),
            Self::Write {
                address,
                index,
                value,
            } => {
                out.put_slice(&[*address, field::WRITE, *index]);
                out.put_slice(value);
            }
        }
        out.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new("FIELD_REQUEST", payload);
        let address = r.u8()?;
        match r.u8()? {
            field::READ_ALL => Ok(Self::ReadAll { address }),
            field::WRITE => Ok(Self::Write {
                address,
                index: r.u8()?,
                value: Bytes::copy_from_slice(r.rest()),
            }),
            subtype => Err(PayloadError::UnknownSubtype {
                message: "FIELD_REQUEST",
                subtype,
            }),
        }
    }
}

/// Build a `COMPONENT_MESSAGE` field report from `(index, raw bytes)` pairs.
///
/// Decoding needs the field sizes, so it lives with the registry.
pub fn encode_field_report(address: u8, values: &[(u8, &[u8])]) -> Bytes {
    let mut out = BytesMut::new();
    out.put_u8(address);
    for (index, raw) in values {
        out.put_u8(*index);
        out.put_slice(raw);
    }
    out.freeze()
}

/// `PARAMETER` requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamRequest {
    Count,
    Get { number: u16 },
    SetByName { raw: i32, name: String },
    SetByNumber { number: u16, raw: i32 },
}

impl ParamRequest {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        match self {
            Self::Count => out.put_u8(param::COUNT),
            Self::Get { number } => {
                out.put_u8(param::GET);
                out.put_u16_le(*number);
            }
            Self::SetByName { raw, name } => {
                out.put_u8(param::SET_BY_NAME);
                out.put_i32_le(*raw);
                out.put_slice(name.as_bytes());
            }
            Self::SetByNumber { number, raw } => {
                out.put_u8(param::SET_BY_NUMBER);
                out.put_u16_le(*number);
                out.put_i32_le(*raw);
            }
        }
        out.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new("PARAMETER", payload);
        match r.u8()? {
            param::COUNT => Ok(Self::Count),
            param::GET => Ok(Self::Get { number: r.u16()? }),
            param::SET_BY_NAME => Ok(Self::SetByName {
                raw: r.i32()?,
                name: r.text_rest(),
            }),
            param::SET_BY_NUMBER => Ok(Self::SetByNumber {
                number: r.u16()?,
                raw: r.i32()?,
            }),
            subtype => Err(PayloadError::UnknownSubtype {
                message: "PARAMETER",
                subtype,
            }),
        }
    }
}

/// `PARAMETER` responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamResponse {
    Count {
        result: ResultCode,
        count: u16,
    },
    /// Answer to get, set-by-name or set-by-number; `subtype` says which.
    Value {
        subtype: u8,
        result: ResultCode,
        number: u16,
        raw: i32,
        name: String,
    },
}

impl ParamResponse {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        match self {
            Self::Count { result, count } => {
                out.put_slice(&[param::COUNT, wire_result(*result)]);
                out.put_u16_le(*count);
            }
            Self::Value {
                subtype,
                result,
                number,
                raw,
                name,
            } => {
                out.put_slice(&[*subtype, wire_result(*result)]);
                out.put_u16_le(*number);
                out.put_i32_le(*raw);
                out.put_slice(name.as_bytes());
            }
        }
        out.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new("PARAMETER", payload);
        match r.u8()? {
            param::COUNT => Ok(Self::Count {
                result: ResultCode::from_wire(r.u8()?),
                count: r.u16()?,
            }),
            subtype @ (param::GET | param::SET_BY_NAME | param::SET_BY_NUMBER) => {
                Ok(Self::Value {
                    subtype,
                    result: ResultCode::from_wire(r.u8()?),
                    number: r.u16()?,
                    raw: r.i32()?,
                    name: r.text_rest(),
                })
            }
            subtype => Err(PayloadError::UnknownSubtype {
                message: "PARAMETER",
                subtype,
            }),
        }
    }
}

/// `FILE` chunk requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRequest {
    Read {
        address: u8,
        index: u8,
        flags: u8,
        offset: u32,
        length: u8,
    },
    /// `checksum` is present exactly when `flags` carries `FLAG_VERIFY`.
    Write {
        address: u8,
        index: u8,
        flags: u8,
        offset: u32,
        checksum: Option<(u8, u8)>,
        data: Bytes,
    },
}

impl FileRequest {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        match self {
            Self::Read {
                address,
                index,
                flags,
                offset,
                length,
            } => {
                out.put_slice(&[file::READ, *address, *index, *flags]);
                out.put_u32_le(*offset);
                out.put_u8(*length);
            }
            Self::Write {
                address,
                index,
                flags,
                offset,
                checksum,
                data,
            } => {
                out.put_slice(&[file::WRITE, *address, *index, *flags]);
                out.put_u32_le(*offset);
                if let Some((a, b)) = checksum {
                    out.put_slice(&[*a, *b]);
                }
                out.put_slice(data);
            }
        }
        out.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new("FILE", payload);
        match r.u8()? {
            file::READ => Ok(Self::Read {
                address: r.u8()?,
                index: r.u8()?,
                flags: r.u8()?,
                offset: r.u32()?,
                length: r.u8()?,
            }),
            file::WRITE => {
                let address = r.u8()?;
                let index = r.u8()?;
                let flags = r.u8()?;
                let offset = r.u32()?;
                let checksum = if flags & file::FLAG_VERIFY != 0 {
                    Some((r.u8()?, r.u8()?))
                } else {
                    None
                };
                Ok(Self::Write {
                    address,
                    index,
                    flags,
                    offset,
                    checksum,
                    data: Bytes::copy_from_slice(r.rest()),
                })
            }
            subtype => Err(PayloadError::UnknownSubtype {
                message: "FILE",
                subtype,
            }),
        }
    }
}

/// Answer to a chunk read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReadResponse {
    pub address: u8,
    pub index: u8,
    pub result: ResultCode,
    pub flags: u8,
    pub offset: u32,
    /// Total stream length in bytes as known by the device.
    pub total: u32,
    pub checksum: Option<(u8, u8)>,
    pub data: Bytes,
}

impl FileReadResponse {
    pub fn is_end_of_file(&self) -> bool {
        self.flags & file::FLAG_END_OF_FILE != 0
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_slice(&[
            file::READ,
            self.address,
            self.index,
            wire_result(self.result),
            self.flags,
        ]);
        out.put_u32_le(self.offset);
        out.put_u32_le(self.total);
        if let Some((a, b)) = self.checksum {
            out.put_slice(&[a, b]);
        }
        out.put_slice(&self.data);
        out.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new("FILE read", payload);
        r.u8()?;
        let address = r.u8()?;
        let index = r.u8()?;
        let result = ResultCode::from_wire(r.u8()?);
        let flags = r.u8()?;
        let offset = r.u32()?;
        let total = r.u32()?;
        let checksum = if flags & file::FLAG_VERIFY != 0 {
            Some((r.u8()?, r.u8()?))
        } else {
            None
        };
        Ok(Self {
            address,
            index,
            result,
            flags,
            offset,
            total,
            checksum,
            data: Bytes::copy_from_slice(r.rest()),
        })
    }
}

/// Acknowledgement of a chunk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileWriteResponse {
    pub address: u8,
    pub index: u8,
    pub result: ResultCode,
    pub offset: u32,
}

impl FileWriteResponse {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_slice(&[
            file::WRITE,
            self.address,
            self.index,
            wire_result(self.result),
        ]);
        out.put_u32_le(self.offset);
        out.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = PayloadReader::new("FILE write", payload);
        r.u8()?;
        Ok(Self {
            address: r.u8()?,
            index: r.u8()?,
            result: ResultCode::from_wire(r.u8()?),
            offset: r.u32()?,
        })
    }
}
