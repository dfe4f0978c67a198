use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use clap::{Args, Subcommand};
use groundlink_hub::{HubConfig, Session};
use groundlink_transport::{
    connect_tcp, open_serial, parse_modem, LinkStream, SerialConfig, TcpConfig, DEFAULT_BAUD_RATE,
};
use tracing::debug;

use crate::exit::{
    hub_error, transport_error, CliError, CliResult, TIMEOUT, TRANSPORT_ERROR, USAGE,
};
use crate::output::OutputFormat;

pub mod command;
pub mod components;
pub mod file;
pub mod monitor;
pub mod params;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Enumerate components and print their fields.
    Components(ComponentsArgs),
    /// Send a system command and wait for its result.
    #[command(name = "command")]
    SystemCommand(CommandArgs),
    /// List, set, save or load parameters.
    Params(ParamsArgs),
    /// Read or write a component file stream.
    File(FileArgs),
    /// Print field updates and device messages until interrupted.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Components(args) => components::run(args, link, format),
        Command::SystemCommand(args) => command::run(args, link, format),
        Command::Params(args) => params::run(args, link, format),
        Command::File(args) => file::run(args, link, format),
        Command::Monitor(args) => monitor::run(args, link, format),
        Command::Version(args) => version::run(args),
    }
}

/// How to reach the flight controller.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Serial device path (e.g. /dev/ttyUSB0).
    #[arg(long, env = "GROUNDLINK_SERIAL", global = true)]
    pub serial: Option<String>,
    /// Serial line speed.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE, global = true)]
    pub baudrate: u32,
    /// Network bridge as host[:port].
    #[arg(long, env = "GROUNDLINK_ADDRESS", global = true)]
    pub address: Option<String>,
    /// Modem socket on the bridge as <address>:<port>.
    #[arg(long, value_name = "A:B", global = true)]
    pub modem: Option<String>,
    /// Directory for cached component descriptions.
    #[arg(long, value_name = "DIR", env = "GROUNDLINK_CACHE", global = true)]
    pub cache: Option<PathBuf>,
    /// How long to wait for each answer (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s", global = true)]
    pub timeout: String,
}

#[derive(Debug)]
pub enum LinkTarget {
    Serial(SerialConfig),
    Tcp(TcpConfig),
}

impl LinkArgs {
    /// Resolve the link options without opening anything.
    pub fn target(&self) -> CliResult<LinkTarget> {
        match (&self.serial, &self.address) {
            (Some(_), Some(_)) => Err(CliError::new(
                USAGE,
                "--serial and --address are mutually exclusive",
            )),
            (Some(path), None) => {
                if self.modem.is_some() {
                    return Err(CliError::new(USAGE, "--modem requires --address"));
                }
                Ok(LinkTarget::Serial(SerialConfig {
                    baud_rate: self.baudrate,
                    ..SerialConfig::new(path.as_str())
                }))
            }
            (None, Some(address)) => {
                let modem = self
                    .modem
                    .as_deref()
                    .map(parse_modem)
                    .transpose()
                    .map_err(|err| transport_error("invalid link", err))?;
                let config = TcpConfig::parse(address)
                    .map_err(|err| transport_error("invalid link", err))?
                    .with_modem(modem);
                Ok(LinkTarget::Tcp(config))
            }
            (None, None) => Err(CliError::new(
                USAGE,
                "no link given: use --serial PATH or --address HOST[:PORT]",
            )),
        }
    }

    pub fn wait(&self) -> CliResult<Duration> {
        parse_duration(&self.timeout)
    }

    fn open(&self) -> CliResult<LinkStream> {
        match self.target()? {
            LinkTarget::Serial(config) => {
                open_serial(&config).map_err(|err| transport_error("open serial link", err))
            }
            LinkTarget::Tcp(config) => {
                connect_tcp(&config).map_err(|err| transport_error("connect", err))
            }
        }
    }

    /// Open the link and start a session on it.
    pub fn connect(&self) -> CliResult<Session> {
        let link = self.open()?;
        let config = HubConfig {
            cache_dir: self.cache.clone(),
            ..HubConfig::default()
        };
        debug!(cache = ?config.cache_dir, "starting session");
        Session::connect(link, config).map_err(|err| hub_error("session start failed", err))
    }

    /// Connect, enumerate and wait until every component is described.
    pub fn connect_described(&self) -> CliResult<Session> {
        let wait = self.wait()?;
        let session = self.connect()?;
        session
            .hub()
            .enumerate()
            .map_err(|err| hub_error("enumerate failed", err))?;
        session
            .hub()
            .wait_described(wait)
            .map_err(|err| hub_error("component description", err))?;
        Ok(session)
    }
}

/// Wait for one callback result.
pub fn wait_for<T>(rx: &Receiver<T>, timeout: Duration, what: &str) -> CliResult<T> {
    rx.recv_timeout(timeout).map_err(|err| match err {
        RecvTimeoutError::Timeout => {
            CliError::new(TIMEOUT, format!("{what} timed out after {timeout:?}"))
        }
        RecvTimeoutError::Disconnected => {
            CliError::new(TRANSPORT_ERROR, format!("{what}: session stopped"))
        }
    })
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[derive(Args, Debug)]
pub struct ComponentsArgs {
    /// Only print the component list; skip reading field values.
    #[arg(long)]
    pub no_values: bool,
}

#[derive(Args, Debug)]
pub struct CommandArgs {
    /// Command code.
    pub code: u8,
}

#[derive(Args, Debug)]
pub struct ParamsArgs {
    #[command(subcommand)]
    pub action: ParamsAction,
}

#[derive(Subcommand, Debug)]
pub enum ParamsAction {
    /// Enumerate and print every parameter.
    List,
    /// Set one parameter by name or number.
    Set {
        /// Parameter name, or its number with --number.
        target: String,
        /// New value in engineering units.
        #[arg(allow_negative_numbers = true)]
        value: f64,
        /// Treat TARGET as the parameter number.
        #[arg(long)]
        number: bool,
    },
    /// Write every parameter to a name=value file.
    Save {
        /// Output file.
        path: PathBuf,
    },
    /// Load a name=value file and write the values that differ.
    Load {
        /// Input file.
        path: PathBuf,
        /// Write every entry, even unchanged ones.
        #[arg(long)]
        all: bool,
        /// Show what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args, Debug)]
pub struct FileArgs {
    #[command(subcommand)]
    pub action: FileAction,
}

#[derive(Args, Debug, Clone)]
pub struct TransferArgs {
    /// Component address.
    #[arg(value_name = "ADDRESS")]
    pub component: u8,
    /// Stream index on the component.
    pub index: u8,
    /// Bytes per chunk.
    #[arg(long, default_value_t = 48)]
    pub chunk_size: usize,
    /// Chunks in flight at once.
    #[arg(long, default_value_t = 4)]
    pub burst: usize,
    /// Checksum every chunk.
    #[arg(long)]
    pub verify: bool,
}

#[derive(Subcommand, Debug)]
pub enum FileAction {
    /// Read a stream to a file or stdout.
    Read {
        #[command(flatten)]
        transfer: TransferArgs,
        /// Output file; stdout when omitted.
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
    /// Write a file to a stream.
    Write {
        #[command(flatten)]
        transfer: TransferArgs,
        /// Input file.
        #[arg(long, short = 'i')]
        input: PathBuf,
        /// Append to the device's current contents instead of replacing them.
        #[arg(long)]
        append: bool,
    },
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// How often to poll field values (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub interval: String,
    /// Exit after printing N field updates.
    #[arg(long)]
    pub count: Option<usize>,
    /// Only poll these component addresses (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub components: Option<Vec<u8>>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
