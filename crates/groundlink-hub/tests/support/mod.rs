#![allow(dead_code)]

//! A scripted flight controller for driving a real `Session` end to end.

use std::collections::{BTreeMap, HashMap};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use groundlink_frame::message::{self, file, param};
use groundlink_frame::{Checksum, Frame, FrameConfig, FrameReader, FrameWriter};
use groundlink_hub::wire::{
    encode_field_report, CommandRequest, CommandResponse, ComponentHeader, ComponentInfo,
    FieldDescriptor, FieldKind, FieldRequest, FileDescriptor, FileReadResponse, FileRequest,
    FileWriteResponse, ParamRequest, ParamResponse,
};
use groundlink_hub::{HubConfig, ResultCode, Session, TransferConfig, FIELD_FLAG_STATUS};
use groundlink_transport::LinkStream;

pub const IMU: u8 = 1;
pub const GPS: u8 = 2;
pub const LOG_STREAM: u8 = 0;

pub struct SimField {
    pub descriptor: FieldDescriptor,
    pub raw: Vec<u8>,
}

pub struct SimComponent {
    pub header: ComponentHeader,
    pub fields: Vec<SimField>,
    pub streams: Vec<FileDescriptor>,
}

/// Device-side state and fault knobs.
pub struct DeviceState {
    pub components: Vec<SimComponent>,
    pub params: Vec<(String, i32)>,
    pub files: HashMap<(u8, u8), Vec<u8>>,

    pub command_result: ResultCode,
    /// Answer every command twice.
    pub duplicate_command_response: bool,
    /// Swallow the acknowledgement of the first write at this offset.
    pub drop_write_ack_once: Option<u32>,
    /// Flip a data byte of the first read answer at this offset.
    pub corrupt_read_once: Option<u32>,
    /// Ignore every request.
    pub silent: bool,

    pub describe_requests: usize,
    pub write_counts: BTreeMap<u32, usize>,
    pub read_counts: BTreeMap<u32, usize>,
    pub param_sets: Vec<String>,
}

pub fn log_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn field(
    address: u8,
    index: u8,
    name: &str,
    kind: FieldKind,
    size: u8,
    scale: f32,
    flags: u8,
    raw: Vec<u8>,
) -> SimField {
    SimField {
        descriptor: FieldDescriptor {
            address,
            index,
            kind,
            size,
            flags,
            scale,
            min: -1000.0,
            max: 1000.0,
            unit: String::new(),
            name: name.to_string(),
        },
        raw,
    }
}

impl DeviceState {
    pub fn standard() -> Self {
        let log = log_pattern(200);
        let imu = SimComponent {
            header: ComponentHeader {
                address: IMU,
                kind: 0x0010,
                hw_version: (1, 2),
                sw_version: (3, 1, 4),
                hash: 0xCAFE_0001,
                field_count: 2,
                file_count: 1,
                name: "imu".into(),
            },
            fields: vec![
                field(IMU, 0, "status", FieldKind::Unsigned, 1, 1.0, FIELD_FLAG_STATUS, vec![0x05]),
                field(
                    IMU,
                    1,
                    "roll",
                    FieldKind::Signed,
                    2,
                    0.01,
                    0,
                    (-125i16).to_le_bytes().to_vec(),
                ),
            ],
            streams: vec![FileDescriptor {
                address: IMU,
                index: LOG_STREAM,
                flags: 0,
                size: log.len() as u32,
            }],
        };
        let gps = SimComponent {
            header: ComponentHeader {
                address: GPS,
                kind: 0x0020,
                hw_version: (1, 0),
                sw_version: (0, 9, 0),
                hash: 0xCAFE_0002,
                field_count: 1,
                file_count: 0,
                name: "gps".into(),
            },
            fields: vec![field(GPS, 0, "satellites", FieldKind::Unsigned, 1, 1.0, 0, vec![9])],
            streams: Vec::new(),
        };

        let mut files = HashMap::new();
        files.insert((IMU, LOG_STREAM), log);

        Self {
            components: vec![imu, gps],
            params: vec![
                ("ROLL_P".into(), 2_500),
                ("PITCH_P".into(), 3_000),
                ("YAW_P".into(), 15_000),
            ],
            files,
            command_result: ResultCode::Success,
            duplicate_command_response: false,
            drop_write_ack_once: None,
            corrupt_read_once: None,
            silent: false,
            describe_requests: 0,
            write_counts: BTreeMap::new(),
            read_counts: BTreeMap::new(),
            param_sets: Vec::new(),
        }
    }

    fn handle(&mut self, frame: &Frame) -> Vec<(u8, Bytes)> {
        if self.silent {
            return Vec::new();
        }
        match frame.id {
            message::SYSTEM_COMMAND => self.on_command(frame),
            message::COMPONENT_INFO => self.on_info(frame),
            message::FIELD_REQUEST => self.on_field_request(frame),
            message::PARAMETER => self.on_param(frame),
            message::FILE => self.on_file(frame),
            _ => Vec::new(),
        }
    }

    fn on_command(&mut self, frame: &Frame) -> Vec<(u8, Bytes)> {
        let request = CommandRequest::decode(&frame.payload).expect("command payload");
        let reply = CommandResponse {
            code: request.code,
            result: self.command_result,
        }
        .encode();
        let mut out = vec![(message::COMMAND_RESPONSE, reply.clone())];
        if self.duplicate_command_response {
            out.push((message::COMMAND_RESPONSE, reply));
        }
        out
    }

    fn on_info(&mut self, frame: &Frame) -> Vec<(u8, Bytes)> {
        match ComponentInfo::decode_request(&frame.payload) {
            ComponentInfo::Request(None) => self
                .components
                .iter()
                .map(|c| {
                    (
                        message::COMPONENT_INFO,
                        ComponentInfo::Header(c.header.clone()).encode(),
                    )
                })
                .collect(),
            ComponentInfo::Request(Some(address)) => {
                self.describe_requests += 1;
                let Some(component) = self.components.iter().find(|c| c.header.address == address)
                else {
                    return Vec::new();
                };
                let fields = component.fields.iter().map(|f| {
                    (
                        message::COMPONENT_INFO,
                        ComponentInfo::Field(f.descriptor.clone()).encode(),
                    )
                });
                let streams = component
                    .streams
                    .iter()
                    .map(|s| (message::COMPONENT_INFO, ComponentInfo::File(*s).encode()));
                fields.chain(streams).collect()
            }
            _ => Vec::new(),
        }
    }

    fn report(&self, address: u8, indices: &[u8]) -> Vec<(u8, Bytes)> {
        let Some(component) = self.components.iter().find(|c| c.header.address == address) else {
            return Vec::new();
        };
        let values: Vec<(u8, &[u8])> = component
            .fields
            .iter()
            .filter(|f| indices.is_empty() || indices.contains(&f.descriptor.index))
            .map(|f| (f.descriptor.index, f.raw.as_slice()))
            .collect();
        vec![(
            message::COMPONENT_MESSAGE,
            encode_field_report(address, &values),
        )]
    }

    fn on_field_request(&mut self, frame: &Frame) -> Vec<(u8, Bytes)> {
        match FieldRequest::decode(&frame.payload).expect("field request payload") {
            FieldRequest::ReadAll { address } => self.report(address, &[]),
            FieldRequest::Write {
                address,
                index,
                value,
            } => {
                let field = self
                    .components
                    .iter_mut()
                    .find(|c| c.header.address == address)
                    .and_then(|c| c.fields.iter_mut().find(|f| f.descriptor.index == index));
                match field {
                    Some(field) if value.len() == usize::from(field.descriptor.size) => {
                        field.raw = value.to_vec();
                        self.report(address, &[index])
                    }
                    _ => Vec::new(),
                }
            }
        }
    }

    fn param_value(&self, subtype: u8, result: ResultCode, number: u16) -> Bytes {
        let (name, raw) = self
            .params
            .get(usize::from(number))
            .cloned()
            .unwrap_or_default();
        ParamResponse::Value {
            subtype,
            result,
            number,
            raw,
            name,
        }
        .encode()
    }

    fn on_param(&mut self, frame: &Frame) -> Vec<(u8, Bytes)> {
        let reply = match ParamRequest::decode(&frame.payload).expect("parameter payload") {
            ParamRequest::Count => ParamResponse::Count {
                result: ResultCode::Success,
                count: self.params.len() as u16,
            }
            .encode(),
            ParamRequest::Get { number } => {
                let result = if usize::from(number) < self.params.len() {
                    ResultCode::Success
                } else {
                    ResultCode::NotFound
                };
                self.param_value(param::GET, result, number)
            }
            ParamRequest::SetByName { raw, name } => {
                match self.params.iter().position(|(n, _)| *n == name) {
                    Some(pos) => {
                        self.params[pos].1 = raw;
                        self.param_sets.push(name);
                        self.param_value(param::SET_BY_NAME, ResultCode::Success, pos as u16)
                    }
                    None => ParamResponse::Value {
                        subtype: param::SET_BY_NAME,
                        result: ResultCode::NotFound,
                        number: 0,
                        raw,
                        name,
                    }
                    .encode(),
                }
            }
            ParamRequest::SetByNumber { number, raw } => {
                match self.params.get_mut(usize::from(number)) {
                    Some(entry) => {
                        entry.1 = raw;
                        self.param_sets.push(entry.0.clone());
                        self.param_value(param::SET_BY_NUMBER, ResultCode::Success, number)
                    }
                    None => self.param_value(param::SET_BY_NUMBER, ResultCode::NotFound, number),
                }
            }
        };
        vec![(message::PARAMETER, reply)]
    }

    fn on_file(&mut self, frame: &Frame) -> Vec<(u8, Bytes)> {
        let reply = match FileRequest::decode(&frame.payload).expect("file payload") {
            FileRequest::Read {
                address,
                index,
                flags,
                offset,
                length,
            } => {
                *self.read_counts.entry(offset).or_default() += 1;
                let verify = flags & file::FLAG_VERIFY != 0;
                let Some(stream) = self.files.get(&(address, index)) else {
                    return vec![(
                        message::FILE,
                        FileReadResponse {
                            address,
                            index,
                            result: ResultCode::NotFound,
                            flags: 0,
                            offset,
                            total: 0,
                            checksum: None,
                            data: Bytes::new(),
                        }
                        .encode(),
                    )];
                };
                let start = (offset as usize).min(stream.len());
                let end = (start + usize::from(length)).min(stream.len());
                let mut data = stream[start..end].to_vec();
                let checksum = verify.then(|| Checksum::of(&data));
                if self.corrupt_read_once == Some(offset) {
                    self.corrupt_read_once = None;
                    if let Some(byte) = data.first_mut() {
                        *byte ^= 0xFF;
                    }
                }
                let mut out_flags = if verify { file::FLAG_VERIFY } else { 0 };
                if end >= stream.len() {
                    out_flags |= file::FLAG_END_OF_FILE;
                }
                FileReadResponse {
                    address,
                    index,
                    result: ResultCode::Success,
                    flags: out_flags,
                    offset,
                    total: stream.len() as u32,
                    checksum,
                    data: Bytes::from(data),
                }
                .encode()
            }
            FileRequest::Write {
                address,
                index,
                flags,
                offset,
                checksum,
                data,
            } => {
                *self.write_counts.entry(offset).or_default() += 1;
                let mut result = ResultCode::Success;
                if checksum.is_some_and(|sum| sum != Checksum::of(&data)) {
                    result = ResultCode::ChecksumMismatch;
                } else {
                    let stream = self.files.entry((address, index)).or_default();
                    let end = offset as usize + data.len();
                    if stream.len() < end {
                        stream.resize(end, 0);
                    }
                    stream[offset as usize..end].copy_from_slice(&data);
                    if flags & file::FLAG_END_OF_FILE != 0 {
                        stream.truncate(end);
                    }
                }
                if self.drop_write_ack_once == Some(offset) {
                    self.drop_write_ack_once = None;
                    return Vec::new();
                }
                FileWriteResponse {
                    address,
                    index,
                    result,
                    offset,
                }
                .encode()
            }
        };
        vec![(message::FILE, reply)]
    }
}

/// The device end of a socket pair, served on its own thread.
pub struct SimDevice {
    state: Arc<Mutex<DeviceState>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimDevice {
    pub fn spawn(stream: UnixStream, state: DeviceState) -> Self {
        stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .expect("device read timeout");
        let state = Arc::new(Mutex::new(state));
        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            thread::spawn(move || serve(stream, state, stop))
        };
        Self {
            state,
            stop,
            thread: Some(thread),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().expect("device state lock")
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn serve(stream: UnixStream, state: Arc<Mutex<DeviceState>>, stop: Arc<AtomicBool>) {
    let mut writer = FrameWriter::new(stream.try_clone().expect("clone device stream"));
    let mut reader = FrameReader::new(stream);
    while !stop.load(Ordering::Acquire) {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(err) if err.is_timeout() => continue,
            Err(_) => return,
        };
        let replies = state.lock().expect("device state lock").handle(&frame);
        for (id, payload) in replies {
            if writer.send(id, &payload).is_err() {
                return;
            }
        }
    }
}

pub fn test_config() -> HubConfig {
    HubConfig {
        frame: FrameConfig {
            read_timeout: Some(Duration::from_millis(20)),
            write_timeout: Some(Duration::from_secs(1)),
        },
        transfer: TransferConfig {
            chunk_timeout: Duration::from_millis(150),
            max_attempts: 3,
        },
        ..HubConfig::default()
    }
}

/// A session connected to a fresh simulated device.
pub fn connect(state: DeviceState, config: HubConfig) -> (Session, SimDevice) {
    let (host, device) = UnixStream::pair().expect("socket pair");
    let device = SimDevice::spawn(device, state);
    let session = Session::connect(LinkStream::from(host), config).expect("session should start");
    (session, device)
}

/// Enumerate and wait until every component is described.
pub fn connect_described(state: DeviceState, config: HubConfig) -> (Session, SimDevice) {
    let (session, device) = connect(state, config);
    session.hub().enumerate().expect("enumerate");
    session
        .hub()
        .wait_described(Duration::from_secs(5))
        .expect("components should be described");
    (session, device)
}

pub fn recv<T>(rx: &mpsc::Receiver<T>) -> T {
    rx.recv_timeout(Duration::from_secs(5))
        .expect("callback should run")
}

pub fn scratch_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "groundlink-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ))
}
