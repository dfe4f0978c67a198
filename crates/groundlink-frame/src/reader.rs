use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};
use tracing::debug;

use crate::codec::{CodecCounters, DecodeState, Frame, FrameCodec, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 512;

/// Reads complete, checksum-verified frames from any `Read` stream.
///
/// Partial reads are buffered internally; callers only see complete frames.
/// A frame that fails its checksum is dropped and decoding restarts one byte
/// after that frame's first sync byte, so a sync pair hidden inside a bogus
/// candidate is never lost.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    scan: usize,
    codec: FrameCodec,
    bytes_read: u64,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// The read timeout in `config` is informational here; apply it to the
    /// link before handing it over.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            scan: 0,
            codec: FrameCodec::new(),
            bytes_read: 0,
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached and
    /// `Err(FrameError::Io)` when the read timeout expires; see
    /// [`FrameError::is_timeout`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decode_buffered() {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.bytes_read += read as u64;
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn decode_buffered(&mut self) -> Option<Frame> {
        while self.scan < self.buf.len() {
            self.scan += self.codec.push(&self.buf[self.scan..]);

            match self.codec.state() {
                DecodeState::Done => {
                    let frame = self.codec.take_frame();
                    self.buf.advance(self.scan);
                    self.scan = 0;
                    return frame;
                }
                DecodeState::Error => {
                    let restart = self.scan - self.codec.span() + 1;
                    debug!(
                        errors = self.codec.counters().errors,
                        skipped = restart,
                        "frame checksum mismatch, resynchronizing"
                    );
                    self.codec.reset();
                    self.buf.advance(restart);
                    self.scan = 0;
                }
                DecodeState::SyncA => {
                    // Nothing in progress: everything scanned so far is noise.
                    self.buf.advance(self.scan);
                    self.scan = 0;
                }
                _ => {}
            }
        }
        None
    }

    /// Frames accepted and rejected so far.
    pub fn counters(&self) -> CodecCounters {
        self.codec.counters()
    }

    /// Total raw bytes pulled from the stream.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::{self, Cursor};

    use super::*;
    use crate::codec::{encode, MAX_PAYLOAD};
    use crate::message;
    use crate::writer::FrameWriter;

    enum Step {
        Data(Vec<u8>),
        Fail(ErrorKind),
    }

    /// Plays back a fixed script of reads, then reports EOF.
    struct Script(VecDeque<Step>);

    impl Script {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self(steps.into_iter().collect())
        }

        /// One byte per read call.
        fn trickle(wire: &[u8]) -> Self {
            Self::new(wire.iter().map(|&b| Step::Data(vec![b])))
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Step::Fail(kind)) => Err(io::Error::from(kind)),
                Some(Step::Data(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.0.push_front(Step::Data(data.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    fn wire(frames: &[(u8, &[u8])]) -> Vec<u8> {
        frames
            .iter()
            .flat_map(|(id, payload)| encode(*id, payload).unwrap().to_vec())
            .collect()
    }

    #[test]
    fn reads_command_response() {
        let bytes = wire(&[(message::COMMAND_RESPONSE, [18, 1].as_slice())]);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.id, message::COMMAND_RESPONSE);
        assert_eq!(frame.payload.as_ref(), &[18, 1]);
        assert_eq!(reader.counters().received, 1);
        assert_eq!(reader.bytes_read(), 8);
    }

    #[test]
    fn back_to_back_frames_in_one_read() {
        let chunk = vec![0xAB; MAX_PAYLOAD];
        let bytes = wire(&[
            (message::STATUS, b"ok".as_slice()),
            (message::FILE, chunk.as_slice()),
            (message::COPY_FINISHED, [].as_slice()),
        ]);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"ok");
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), chunk.as_slice());
        assert_eq!(reader.read_frame().unwrap().id, message::COPY_FINISHED);
        assert!(matches!(reader.read_frame(), Err(FrameError::ConnectionClosed)));
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let bytes = wire(&[
            (message::DEBUG_TEXT, b"gyro ok".as_slice()),
            (message::ERROR_TEXT, b"baro".as_slice()),
        ]);
        let mut reader = FrameReader::new(Script::trickle(&bytes));

        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"gyro ok");
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"baro");
        assert_eq!(reader.bytes_read(), bytes.len() as u64);
    }

    #[test]
    fn eof_mid_frame_is_connection_closed() {
        let bytes = encode(message::COMPONENT_MESSAGE, b"only-part").unwrap();
        let mut reader = FrameReader::new(Cursor::new(bytes[..7].to_vec()));

        assert!(matches!(reader.read_frame(), Err(FrameError::ConnectionClosed)));
    }

    #[test]
    fn corrupted_frame_is_counted_and_skipped() {
        let mut bytes = encode(message::COMMAND_RESPONSE, &[18, 0]).unwrap().to_vec();
        bytes[5] ^= 0x01;
        bytes.extend_from_slice(&encode(message::COMMAND_RESPONSE, &[19, 0]).unwrap());

        let mut reader = FrameReader::new(Cursor::new(bytes));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.payload.as_ref(), &[19, 0]);
        assert_eq!(reader.counters().errors, 1);
        assert_eq!(reader.counters().received, 1);
    }

    #[test]
    fn sync_inside_bogus_candidate_is_recovered() {
        // "pl" immediately followed by a real frame: the real sync pair is
        // first swallowed as id/length of a bogus candidate.
        let mut bytes = b"pl".to_vec();
        bytes.extend_from_slice(&encode(message::STATUS, &[1, 2, 3]).unwrap());
        bytes.extend_from_slice(&[0u8; 300]);

        let mut reader = FrameReader::new(Script::trickle(&bytes));
        let frame = reader.read_frame().unwrap();

        assert_eq!(frame.id, message::STATUS);
        assert_eq!(frame.payload.as_ref(), &[1, 2, 3]);
        assert_eq!(reader.counters().errors, 1);
    }

    #[test]
    fn double_sync_pair_before_frame() {
        let mut bytes = b"plpl".to_vec();
        bytes.extend_from_slice(&encode(message::COMMAND_RESPONSE, &[18, 1]).unwrap());
        bytes.extend_from_slice(&[0u8; 300]);

        let mut reader = FrameReader::new(Cursor::new(bytes));
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.id, message::COMMAND_RESPONSE);
        assert_eq!(frame.payload.as_ref(), &[18, 1]);
    }

    #[test]
    fn leading_noise_is_discarded() {
        let mut bytes = vec![0x00, 0x13, b'x', b'p', b'q', 0xFF];
        bytes.extend_from_slice(&encode(message::DEBUG_TEXT, b"boot").unwrap());

        let mut reader = FrameReader::new(Cursor::new(bytes));
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), b"boot");
        assert_eq!(reader.counters().errors, 0);
    }

    #[test]
    fn timeout_mid_frame_keeps_partial_frame() {
        let bytes = encode(message::PARAMETER, &[0x00, 0x00, 0x03, 0x00]).unwrap().to_vec();
        let mut reader = FrameReader::new(Script::new([
            Step::Data(bytes[..5].to_vec()),
            Step::Fail(ErrorKind::TimedOut),
            Step::Data(bytes[5..].to_vec()),
        ]));

        assert!(reader.read_frame().unwrap_err().is_timeout());
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), &[0x00, 0x00, 0x03, 0x00]);
        assert_eq!(reader.counters().errors, 0);
    }

    #[test]
    fn interrupted_read_retries() {
        let bytes = encode(8, b"ok").unwrap().to_vec();
        let mut reader = FrameReader::new(Script::new([
            Step::Fail(ErrorKind::Interrupted),
            Step::Data(bytes),
        ]));

        let frame = reader.read_frame().unwrap();
        assert_eq!((frame.id, frame.payload.as_ref()), (8, b"ok".as_ref()));
    }

    #[test]
    #[cfg(unix)]
    fn socket_read_timeout_then_frame() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        right
            .set_read_timeout(Some(std::time::Duration::from_millis(10)))
            .unwrap();
        let mut reader = FrameReader::new(right);
        let mut writer = FrameWriter::new(left);

        assert!(reader.read_frame().unwrap_err().is_timeout());

        writer.send(message::SYSTEM_COMMAND, &[18]).unwrap();
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.id, message::SYSTEM_COMMAND);
        assert_eq!(frame.payload.as_ref(), &[18]);
    }

    #[test]
    #[cfg(unix)]
    fn writer_thread_to_reader_thread() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut reader = FrameReader::new(right);

        let sender = std::thread::spawn(move || {
            let mut writer = FrameWriter::new(left);
            for i in 0..64u8 {
                writer.send(i % 5, format!("msg-{i}").as_bytes()).unwrap();
            }
        });

        for i in 0..64u8 {
            let frame = reader.read_frame().unwrap();
            assert_eq!(frame.id, i % 5);
            assert_eq!(frame.payload.as_ref(), format!("msg-{i}").as_bytes());
        }
        sender.join().unwrap();
    }
}
