use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Sync bytes: "pl" (0x70 0x6C).
pub const SYNC: [u8; 2] = [b'p', b'l'];

/// Frame header: sync (2) + id (1) + length (1) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Frame trailer: checksum A + checksum B.
pub const TRAILER_SIZE: usize = 2;

/// Largest payload the one-byte length field can describe.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Running sum-of-sums checksum used by the device firmware.
///
/// `a` is the byte sum and `b` the sum of the intermediate `a` values, both
/// modulo 256, seeded at zero. Wire compatibility depends on this being
/// reproduced bit for bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum {
    a: u8,
    b: u8,
}

impl Checksum {
    pub const fn new() -> Self {
        Self { a: 0, b: 0 }
    }

    /// Fold one byte into the accumulator.
    pub fn update(&mut self, byte: u8) {
        self.a = self.a.wrapping_add(byte);
        self.b = self.b.wrapping_add(self.a);
    }

    /// Fold a slice into the accumulator.
    pub fn extend(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Current `(a, b)` pair.
    pub fn value(&self) -> (u8, u8) {
        (self.a, self.b)
    }

    /// Checksum of `data` from a zero seed.
    pub fn of(data: &[u8]) -> (u8, u8) {
        let mut sum = Self::new();
        sum.extend(data);
        sum.value()
    }
}

/// A checksum-verified message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message identifier.
    pub id: u8,
    /// The message payload (0..=255 bytes).
    pub payload: Bytes,
    /// Checksum carried by (or computed for) the frame.
    pub checksum: (u8, u8),
}

impl Frame {
    /// Create a new frame and compute its checksum.
    ///
    /// Payloads longer than [`MAX_PAYLOAD`] are rejected when encoded.
    pub fn new(id: u8, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let mut sum = Checksum::new();
        sum.update(id);
        sum.update(payload.len() as u8);
        sum.extend(&payload);
        Self {
            id,
            payload,
            checksum: sum.value(),
        }
    }

    /// First payload byte, used as a sub-type discriminant by several messages.
    pub fn subtype(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// The total wire size of this frame (header + payload + checksum).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TRAILER_SIZE
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────┬──────┬──────┬──────┬─────────────┬──────┬──────┐
/// │ 0x70 │ 0x6C │  id  │ len  │   payload   │ ckA  │ ckB  │
/// │ 'p'  │ 'l'  │      │      │ (len bytes) │      │      │
/// └──────┴──────┴──────┴──────┴─────────────┴──────┴──────┘
/// ```
/// The checksum covers `id ‖ len ‖ payload`.
pub fn encode_frame(id: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let mut sum = Checksum::new();
    sum.update(id);
    sum.update(payload.len() as u8);
    sum.extend(payload);
    let (a, b) = sum.value();

    dst.reserve(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    dst.put_slice(&SYNC);
    dst.put_u8(id);
    dst.put_u8(payload.len() as u8);
    dst.put_slice(payload);
    dst.put_u8(a);
    dst.put_u8(b);
    Ok(())
}

/// Encode a frame into a fresh buffer.
pub fn encode(id: u8, payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    encode_frame(id, payload, &mut buf)?;
    Ok(buf.freeze())
}

/// Decoder states, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    SyncA,
    SyncB,
    Id,
    Length,
    Payload,
    ChecksumA,
    ChecksumB,
    Done,
    Error,
}

/// Frames accepted and rejected by a codec since it was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecCounters {
    pub received: u64,
    pub errors: u64,
}

/// Byte-at-a-time frame decoder.
///
/// `Done` and `Error` are sticky: [`FrameCodec::push`] consumes nothing until
/// [`FrameCodec::reset`] is called. Resynchronizing after an error is the
/// caller's job.
#[derive(Debug)]
pub struct FrameCodec {
    state: DecodeState,
    id: u8,
    remaining: usize,
    payload: BytesMut,
    checksum: Checksum,
    received_checksum: (u8, u8),
    span: usize,
    counters: CodecCounters,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            state: DecodeState::SyncA,
            id: 0,
            remaining: 0,
            payload: BytesMut::with_capacity(MAX_PAYLOAD),
            checksum: Checksum::new(),
            received_checksum: (0, 0),
            span: 0,
            counters: CodecCounters::default(),
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// True once the codec reached `Done` or `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, DecodeState::Done | DecodeState::Error)
    }

    /// Number of bytes consumed since the first sync byte of the current candidate frame.
    pub fn span(&self) -> usize {
        self.span
    }

    pub fn counters(&self) -> CodecCounters {
        self.counters
    }

    /// Feed bytes until a terminal state is reached.
    ///
    /// Returns how many bytes of `data` were consumed; the remainder belongs
    /// to the next frame.
    pub fn push(&mut self, data: &[u8]) -> usize {
        for (consumed, &byte) in data.iter().enumerate() {
            if self.is_terminal() {
                return consumed;
            }
            self.step(byte);
        }
        data.len()
    }

    fn step(&mut self, byte: u8) {
        match self.state {
            DecodeState::SyncA => {
                if byte == SYNC[0] {
                    self.span = 1;
                    self.state = DecodeState::SyncB;
                }
            }
            DecodeState::SyncB => {
                if byte == SYNC[1] {
                    self.span += 1;
                    self.checksum = Checksum::new();
                    self.state = DecodeState::Id;
                } else {
                    // A stray 'p' is dropped together with this byte.
                    self.span = 0;
                    self.state = DecodeState::SyncA;
                }
            }
            DecodeState::Id => {
                self.span += 1;
                self.checksum.update(byte);
                self.payload.clear();
                self.id = byte;
                self.state = DecodeState::Length;
            }
            DecodeState::Length => {
                self.span += 1;
                self.checksum.update(byte);
                self.remaining = byte as usize;
                self.state = if self.remaining > 0 {
                    DecodeState::Payload
                } else {
                    DecodeState::ChecksumA
                };
            }
            DecodeState::Payload => {
                self.span += 1;
                self.checksum.update(byte);
                self.payload.put_u8(byte);
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.state = DecodeState::ChecksumA;
                }
            }
            DecodeState::ChecksumA => {
                self.span += 1;
                self.received_checksum.0 = byte;
                if byte == self.checksum.value().0 {
                    self.state = DecodeState::ChecksumB;
                } else {
                    self.state = DecodeState::Error;
                    self.counters.errors += 1;
                }
            }
            DecodeState::ChecksumB => {
                self.span += 1;
                self.received_checksum.1 = byte;
                if byte == self.checksum.value().1 {
                    self.state = DecodeState::Done;
                    self.counters.received += 1;
                } else {
                    self.state = DecodeState::Error;
                    self.counters.errors += 1;
                }
            }
            DecodeState::Done | DecodeState::Error => {}
        }
    }

    /// The completed frame, if the codec is in `Done`.
    pub fn frame(&self) -> Option<Frame> {
        if self.state != DecodeState::Done {
            return None;
        }
        Some(Frame {
            id: self.id,
            payload: Bytes::copy_from_slice(&self.payload),
            checksum: self.received_checksum,
        })
    }

    /// Take the completed frame and reset for the next one.
    pub fn take_frame(&mut self) -> Option<Frame> {
        if self.state != DecodeState::Done {
            return None;
        }
        let frame = Frame {
            id: self.id,
            payload: self.payload.split().freeze(),
            checksum: self.received_checksum,
        };
        self.reset();
        Some(frame)
    }

    /// Return to `SyncA`, dropping any partial payload and checksum state.
    pub fn reset(&mut self) {
        self.state = DecodeState::SyncA;
        self.id = 0;
        self.remaining = 0;
        self.payload.clear();
        self.checksum = Checksum::new();
        self.received_checksum = (0, 0);
        self.span = 0;
    }
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Read timeout applied to the link; bounds each blocking read.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout applied to the link.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            read_timeout: Some(std::time::Duration::from_millis(250)),
            write_timeout: Some(std::time::Duration::from_secs(1)),
        }
    }
}
