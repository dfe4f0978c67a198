use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use groundlink_frame::{FrameConfig, FrameReader, FrameWriter};
use groundlink_transport::LinkStream;
use tracing::{info, warn};

use crate::cache::ComponentCache;
use crate::error::Result;
use crate::hub::{Hub, Shared};
use crate::router::Router;
use crate::{dispatcher, transfer};

/// Timing policy for file transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// How long an in-flight chunk may stay unacknowledged before it is re-sent.
    pub chunk_timeout: Duration,
    /// Sends per chunk, including the first, before the transfer fails.
    pub max_attempts: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_timeout: Duration::from_secs(1),
            max_attempts: 4,
        }
    }
}

/// Configuration for a [`Session`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Link timeouts. The read timeout must be set: it bounds how long
    /// [`Session::stop`] waits for the dispatcher.
    pub frame: FrameConfig,
    /// Complete requests older than this with `ResultCode::Timeout`.
    ///
    /// `None` leaves them outstanding until cancelled or the session stops.
    pub request_timeout: Option<Duration>,
    pub transfer: TransferConfig,
    /// Directory for cached component descriptions.
    pub cache_dir: Option<PathBuf>,
    /// Device text messages kept for front ends.
    pub message_log_capacity: usize,
    /// Seconds of byte-rate history.
    pub rate_window: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            request_timeout: None,
            transfer: TransferConfig::default(),
            cache_dir: None,
            message_log_capacity: 64,
            rate_window: 10,
        }
    }
}

/// A running connection to one device: the dispatcher thread plus a [`Hub`].
///
/// Dropping the session stops it.
pub struct Session {
    hub: Hub,
    dispatcher: Option<JoinHandle<()>>,
}

impl Session {
    /// Start a session over an open link.
    pub fn connect(mut link: LinkStream, config: HubConfig) -> Result<Self> {
        link.set_read_timeout(config.frame.read_timeout)?;
        let mut writer = link.try_clone()?;
        writer.set_write_timeout(config.frame.write_timeout)?;
        info!(
            transport = link.transport_name(),
            peer = %link.peer_description(),
            "connecting to device"
        );
        Self::from_parts(link, writer, config)
    }

    /// Start a session over separate reader and writer halves.
    ///
    /// The reader must return a timeout error periodically; see
    /// [`HubConfig::frame`].
    pub fn from_parts<R, W>(reader: R, writer: W, config: HubConfig) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let cache = match &config.cache_dir {
            Some(dir) => Some(ComponentCache::open(dir)?),
            None => None,
        };
        let frame_config = config.frame.clone();
        let writer = FrameWriter::with_config(
            Box::new(writer) as Box<dyn Write + Send>,
            frame_config.clone(),
        );
        let shared = Arc::new(Shared::new(config, writer, cache, Instant::now()));

        let reader = FrameReader::with_config(reader, frame_config);
        let thread_shared = Arc::clone(&shared);
        let dispatcher = thread::Builder::new()
            .name("groundlink-dispatch".into())
            .spawn(move || dispatcher::run(thread_shared, reader, Router::standard()))?;

        Ok(Self {
            hub: Hub::new(shared),
            dispatcher: Some(dispatcher),
        })
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// False once stopped or after the link failed.
    pub fn is_running(&self) -> bool {
        self.hub.is_running()
    }

    /// Stop the dispatcher and abandon outstanding work.
    ///
    /// Pending requests and active transfers are dropped without their
    /// callbacks being called. Idempotent.
    pub fn stop(&mut self) {
        let Some(handle) = self.dispatcher.take() else {
            return;
        };
        let shared = &self.hub.shared;
        shared.terminate.store(true, Ordering::Release);
        shared.signal.notify();

        // A callback may stop the session from the dispatcher thread itself.
        if handle.thread().id() != thread::current().id() && handle.join().is_err() {
            warn!("dispatcher thread panicked");
        }

        let requests = self.hub.cancel_pending();
        let transfers = transfer::abandon_all(shared);
        shared.signal.notify();
        info!(requests, transfers, "session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
