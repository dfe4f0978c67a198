use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::link::LinkStream;

/// Default port of the network telemetry bridge.
pub const DEFAULT_PORT: u16 = 5500;

/// Network stream settings.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Modem socket selector sent as `"<address>:<port>\n"` right after connecting.
    pub modem: Option<(u8, u8)>,
    /// Connect timeout; `None` uses the OS default.
    pub connect_timeout: Option<Duration>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            modem: None,
            connect_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl TcpConfig {
    /// Parse `host[:port]`, falling back to [`DEFAULT_PORT`].
    pub fn parse(address: &str) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(TransportError::InvalidAddress(address.to_string()));
        }

        if let Ok(sock) = address.parse::<SocketAddr>() {
            return Ok(Self {
                host: sock.ip().to_string(),
                port: sock.port(),
                ..Self::default()
            });
        }

        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;
                (host, port)
            }
            None => (address, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(TransportError::InvalidAddress(address.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            ..Self::default()
        })
    }

    /// Select a modem socket on the bridge.
    pub fn with_modem(mut self, modem: Option<(u8, u8)>) -> Self {
        self.modem = modem;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse a modem selector of the form `<address>:<port>`.
pub fn parse_modem(selector: &str) -> Result<(u8, u8)> {
    let invalid = || TransportError::InvalidModem(selector.to_string());
    let (address, port) = selector.trim().split_once(':').ok_or_else(invalid)?;
    let address = address.parse::<u8>().map_err(|_| invalid())?;
    let port = port.parse::<u8>().map_err(|_| invalid())?;
    Ok((address, port))
}

/// Connect to a network bridge and send the modem preamble if configured.
pub fn connect_tcp(config: &TcpConfig) -> Result<LinkStream> {
    let endpoint = config.endpoint();
    let connect_err = |source| TransportError::Connect {
        address: endpoint.clone(),
        source,
    };

    let mut stream = match config.connect_timeout {
        Some(timeout) => {
            let addr = endpoint
                .to_socket_addrs()
                .map_err(connect_err)?
                .next()
                .ok_or_else(|| TransportError::InvalidAddress(endpoint.clone()))?;
            TcpStream::connect_timeout(&addr, timeout).map_err(connect_err)?
        }
        None => TcpStream::connect(&endpoint).map_err(connect_err)?,
    };
    stream.set_nodelay(true)?;

    if let Some((address, port)) = config.modem {
        debug!(address, port, "selecting modem socket");
        stream.write_all(format!("{address}:{port}\n").as_bytes())?;
    }

    info!(endpoint = %endpoint, "connected to network link");
    Ok(LinkStream::from(stream))
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn parse_host_and_port() {
        let cfg = TcpConfig::parse("192.168.4.1:6000").unwrap();
        assert_eq!(cfg.host, "192.168.4.1");
        assert_eq!(cfg.port, 6000);

        let cfg = TcpConfig::parse("bridge.local").unwrap();
        assert_eq!(cfg.host, "bridge.local");
        assert_eq!(cfg.port, DEFAULT_PORT);
    }

    #[test]
    fn parse_rejects_bad_addresses() {
        assert!(TcpConfig::parse("").is_err());
        assert!(TcpConfig::parse(":5500").is_err());
        assert!(TcpConfig::parse("host:notaport").is_err());
    }

    #[test]
    fn parse_modem_selector() {
        assert_eq!(parse_modem("1:2").unwrap(), (1, 2));
        assert!(parse_modem("1").is_err());
        assert!(parse_modem("a:2").is_err());
        assert!(parse_modem("300:2").is_err());
    }

    #[test]
    fn connect_sends_modem_preamble() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).unwrap();
            buf
        });

        let cfg = TcpConfig {
            host: "127.0.0.1".to_string(),
            port,
            ..TcpConfig::default()
        }
        .with_modem(Some((1, 6)));
        let link = connect_tcp(&cfg).unwrap();
        assert_eq!(link.transport_name(), "tcp");

        assert_eq!(&server.join().unwrap(), b"1:6\n");
    }
}
