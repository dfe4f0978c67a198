use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, Frame, FrameConfig, HEADER_SIZE, MAX_PAYLOAD, TRAILER_SIZE};
use crate::error::{FrameError, Result};

/// Encodes frames onto a byte stream.
///
/// One frame is written per call and the stream is flushed afterwards, so a
/// serial adapter never holds half a frame in its buffer. A write that times
/// out is reported as [`FrameError::Io`] ([`FrameError::is_timeout`] is
/// true); whatever part of the frame already left is discarded by the far
/// end's resynchronization.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    frames_sent: u64,
    bytes_sent: u64,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// The write timeout in `config` is informational here; apply it to the
    /// link before handing it over.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(HEADER_SIZE + MAX_PAYLOAD + TRAILER_SIZE),
            frames_sent: 0,
            bytes_sent: 0,
            config,
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.id, frame.payload.as_ref())
    }

    /// Encode and transmit one message.
    pub fn send(&mut self, id: u8, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_frame(id, payload, &mut self.buf)?;

        let mut written = 0usize;
        while written < self.buf.len() {
            match self.inner.write(&self.buf[written..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        loop {
            match self.inner.flush() {
                Ok(()) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.frames_sent += 1;
        self.bytes_sent += written as u64;
        Ok(())
    }

    /// Frames fully written and flushed.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Wire bytes of the frames counted by [`frames_sent`](Self::frames_sent).
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}
