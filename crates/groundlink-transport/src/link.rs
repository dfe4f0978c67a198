use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::error::Result;

/// Longest wait applied to serial ports when no timeout is requested.
#[cfg(feature = "serial")]
const SERIAL_BLOCKING_TIMEOUT: Duration = Duration::from_secs(3600);

/// A connected device link implementing `Read + Write`.
///
/// This is the fundamental I/O type returned by the open/connect helpers.
/// Reads honor the configured read timeout so a reader loop can observe a
/// shutdown flag between reads.
pub struct LinkStream {
    inner: LinkInner,
}

enum LinkInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    #[cfg(feature = "serial")]
    Serial(Box<dyn serialport::SerialPort>),
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            LinkInner::Unix(stream) => stream.read(buf),
            #[cfg(feature = "serial")]
            LinkInner::Serial(port) => port.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            LinkInner::Unix(stream) => stream.write(buf),
            #[cfg(feature = "serial")]
            LinkInner::Serial(port) => port.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            LinkInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            LinkInner::Unix(stream) => stream.flush(),
            #[cfg(feature = "serial")]
            LinkInner::Serial(port) => port.flush(),
        }
    }
}

impl From<TcpStream> for LinkStream {
    fn from(stream: TcpStream) -> Self {
        Self {
            inner: LinkInner::Tcp(stream),
        }
    }
}

#[cfg(unix)]
impl From<std::os::unix::net::UnixStream> for LinkStream {
    fn from(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: LinkInner::Unix(stream),
        }
    }
}

#[cfg(feature = "serial")]
impl From<Box<dyn serialport::SerialPort>> for LinkStream {
    fn from(port: Box<dyn serialport::SerialPort>) -> Self {
        Self {
            inner: LinkInner::Serial(port),
        }
    }
}

impl LinkStream {
    /// Set read timeout on the underlying link.
    ///
    /// Serial ports share one timeout for reads and writes; `None` maps to a
    /// very long wait there.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            LinkInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            LinkInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(feature = "serial")]
            LinkInner::Serial(port) => port
                .set_timeout(timeout.unwrap_or(SERIAL_BLOCKING_TIMEOUT))
                .map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying link (no-op for serial ports).
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            LinkInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            LinkInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(feature = "serial")]
            LinkInner::Serial(_) => Ok(()),
        }
    }

    /// Try to clone this link so reads and writes can live on different threads.
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            LinkInner::Tcp(stream) => LinkInner::Tcp(stream.try_clone()?),
            #[cfg(unix)]
            LinkInner::Unix(stream) => LinkInner::Unix(stream.try_clone()?),
            #[cfg(feature = "serial")]
            LinkInner::Serial(port) => LinkInner::Serial(port.try_clone()?),
        };
        Ok(Self { inner })
    }

    /// Short transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            LinkInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            LinkInner::Unix(_) => "unix-stream",
            #[cfg(feature = "serial")]
            LinkInner::Serial(_) => "serial",
        }
    }

    /// Human-readable description of the far end, if known.
    pub fn peer_description(&self) -> String {
        match &self.inner {
            LinkInner::Tcp(stream) => stream
                .peer_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            #[cfg(unix)]
            LinkInner::Unix(_) => "local".to_string(),
            #[cfg(feature = "serial")]
            LinkInner::Serial(port) => port.name().unwrap_or_else(|| "serial".to_string()),
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStream")
            .field("type", &self.transport_name())
            .finish()
    }
}

/// Returns true when an I/O error only means "no data within the read timeout".
///
/// Sockets report `WouldBlock` on Unix and `TimedOut` on Windows; serial
/// ports report `TimedOut`.
pub fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    #[test]
    fn unix_pair_roundtrip() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut left = LinkStream::from(left);
        let mut right = LinkStream::from(right);

        left.write_all(b"pl").unwrap();
        let mut buf = [0u8; 2];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pl");
        assert_eq!(left.transport_name(), "unix-stream");
    }

    #[test]
    fn read_timeout_reports_timeout_kind() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut link = LinkStream::from(left);
        link.set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        let mut buf = [0u8; 8];
        let err = link.read(&mut buf).unwrap_err();
        assert!(is_timeout(&err));
    }

    #[test]
    fn cloned_halves_share_the_connection() {
        let (left, right) = UnixStream::pair().unwrap();
        let writer = LinkStream::from(left);
        let mut reader_half = writer.try_clone().unwrap();
        let mut writer = writer;
        let mut far = LinkStream::from(right);

        writer.write_all(b"x").unwrap();
        far.write_all(b"y").unwrap();

        let mut buf = [0u8; 1];
        far.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");
        reader_half.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"y");
    }

    #[test]
    fn timeout_classification() {
        assert!(is_timeout(&std::io::Error::from(ErrorKind::WouldBlock)));
        assert!(is_timeout(&std::io::Error::from(ErrorKind::TimedOut)));
        assert!(!is_timeout(&std::io::Error::from(ErrorKind::BrokenPipe)));
    }
}
