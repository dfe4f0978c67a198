use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use groundlink_frame::{message_name, FrameWriter};
use tracing::{debug, trace, warn};

use crate::cache::ComponentCache;
use crate::device::DeviceMessage;
use crate::error::{HubError, Result};
use crate::pending::{Completion, Job, MatchKey, PendingTable};
use crate::progress::Progress;
use crate::registry::{Component, DeviceText, Registry};
use crate::session::HubConfig;
use crate::signal::{lock, StateSignal};
use crate::stats::MessageCounters;
use crate::transfer::TransferTable;

pub(crate) type LinkWriter = FrameWriter<Box<dyn Write + Send>>;

type FieldsChangedFn = dyn Fn(u8) + Send + Sync;
type DeviceMessageFn = dyn Fn(&DeviceMessage) + Send + Sync;

#[derive(Default)]
pub(crate) struct Observers {
    fields_changed: Vec<Arc<FieldsChangedFn>>,
    device_message: Vec<Arc<DeviceMessageFn>>,
}

/// State shared by the dispatcher thread and every [`Hub`] handle.
pub(crate) struct Shared {
    pub(crate) config: HubConfig,
    pub(crate) registry: Mutex<Registry>,
    pub(crate) tx: Mutex<LinkWriter>,
    pub(crate) pending: Mutex<PendingTable>,
    pub(crate) transfers: Mutex<TransferTable>,
    pub(crate) progress: Progress,
    pub(crate) signal: StateSignal,
    pub(crate) terminate: AtomicBool,
    pub(crate) observers: Mutex<Observers>,
    pub(crate) cache: Option<ComponentCache>,
}

impl Shared {
    pub(crate) fn new(
        config: HubConfig,
        writer: LinkWriter,
        cache: Option<ComponentCache>,
        started: Instant,
    ) -> Self {
        let registry = Registry::new(config.message_log_capacity, config.rate_window, started);
        Self {
            config,
            registry: Mutex::new(registry),
            tx: Mutex::new(writer),
            pending: Mutex::new(PendingTable::default()),
            transfers: Mutex::new(TransferTable::default()),
            progress: Progress::new(),
            signal: StateSignal::new(),
            terminate: AtomicBool::new(false),
            observers: Mutex::new(Observers::default()),
            cache,
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    /// Write one frame under the transmit lock.
    pub(crate) fn send(&self, id: u8, payload: &[u8]) -> Result<()> {
        let bytes = {
            let mut tx = lock(&self.tx);
            let before = tx.bytes_sent();
            tx.send(id, payload)?;
            tx.bytes_sent() - before
        };
        trace!(id, name = message_name(id), len = payload.len(), "frame sent");
        lock(&self.registry)
            .stats_mut()
            .record_tx(bytes, Instant::now());
        Ok(())
    }

    /// Remove the request matching `key` and record its latency.
    pub(crate) fn complete(&self, key: &MatchKey) -> Option<Completion> {
        let pending = lock(&self.pending).take(key)?;
        lock(&self.registry)
            .stats_mut()
            .record_latency(pending.issued_at.elapsed());
        Some(pending.completion)
    }

    pub(crate) fn note_unmatched(&self, id: u8, what: &str) {
        debug!(id, name = message_name(id), what, "response matched no request");
        lock(&self.registry).stats_mut().record_unmatched();
    }

    pub(crate) fn fields_changed_jobs(&self, address: u8) -> Vec<Job> {
        lock(&self.observers)
            .fields_changed
            .iter()
            .map(|observer| {
                let observer = Arc::clone(observer);
                Box::new(move || observer(address)) as Job
            })
            .collect()
    }

    pub(crate) fn device_message_jobs(&self, message: &DeviceMessage) -> Vec<Job> {
        lock(&self.observers)
            .device_message
            .iter()
            .map(|observer| {
                let observer = Arc::clone(observer);
                let message = message.clone();
                Box::new(move || observer(&message)) as Job
            })
            .collect()
    }
}

/// Work produced by a frame handler, run after every lock is released.
#[derive(Default)]
pub(crate) struct Deferred {
    sends: Vec<(u8, Bytes)>,
    jobs: Vec<Job>,
    changed: bool,
}

impl Deferred {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn send(&mut self, id: u8, payload: Bytes) {
        self.sends.push((id, payload));
    }

    pub(crate) fn call(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub(crate) fn call_all(&mut self, jobs: impl IntoIterator<Item = Job>) {
        self.jobs.extend(jobs);
    }

    pub(crate) fn merge(&mut self, other: Deferred) {
        self.sends.extend(other.sends);
        self.jobs.extend(other.jobs);
        self.changed |= other.changed;
    }

    /// Wake state-change waiters after the jobs ran.
    pub(crate) fn changed(&mut self) {
        self.changed = true;
    }

    pub(crate) fn run(self, shared: &Shared) {
        for (id, payload) in self.sends {
            if let Err(err) = shared.send(id, &payload) {
                warn!(id, error = %err, "deferred send failed");
            }
        }
        for job in self.jobs {
            job();
        }
        if self.changed {
            shared.signal.notify();
        }
    }
}

/// Handle to a running session's device model and request engine.
///
/// Cheap to clone; every clone talks to the same dispatcher.
#[derive(Clone)]
pub struct Hub {
    pub(crate) shared: Arc<Shared>,
}

impl Hub {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    /// Lock the registry for reading.
    ///
    /// Keep the guard short-lived: the dispatcher blocks on it.
    pub fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.shared.registry)
    }

    /// Snapshot of every known component.
    pub fn components(&self) -> Vec<Component> {
        self.registry().components().values().cloned().collect()
    }

    pub fn message_stats(&self) -> BTreeMap<u8, u64> {
        self.registry().stats().message_stats().clone()
    }

    pub fn message_counters(&self) -> MessageCounters {
        self.registry().stats().counters()
    }

    /// `(rx_bytes, tx_bytes)` per second over the configured window.
    pub fn message_rates(&self) -> Vec<(u64, u64)> {
        self.registry().stats().rates(Instant::now())
    }

    /// Mean request-to-response latency in seconds.
    pub fn message_latency(&self) -> Option<f64> {
        self.registry().stats().latency()
    }

    /// Latest device text messages, oldest first.
    pub fn messages(&self) -> Vec<DeviceText> {
        self.registry().messages().cloned().collect()
    }

    /// `(fraction, completed, total)` of the current bulk operation.
    pub fn progress(&self) -> (f64, u64, u64) {
        let snapshot = self.shared.progress.snapshot();
        (snapshot.fraction(), snapshot.completed, snapshot.total)
    }

    pub fn reset_progress(&self) {
        self.shared.progress.reset();
    }

    /// Call `observer` with the component address after every applied field report.
    ///
    /// Runs on the dispatcher thread; keep it short.
    pub fn on_fields_changed(&self, observer: impl Fn(u8) + Send + Sync + 'static) {
        lock(&self.shared.observers)
            .fields_changed
            .push(Arc::new(observer));
    }

    /// Call `observer` for device text, status, calibration and copy notices.
    pub fn on_device_message(&self, observer: impl Fn(&DeviceMessage) + Send + Sync + 'static) {
        lock(&self.shared.observers)
            .device_message
            .push(Arc::new(observer));
    }

    /// Current state-change generation.
    pub fn generation(&self) -> u64 {
        self.shared.signal.generation()
    }

    /// Block until the state changes after `seen` or `timeout` elapses.
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> u64 {
        self.shared.signal.wait(seen, timeout)
    }

    /// Block until `ready` holds for the registry.
    ///
    /// Fails with `Disconnected` once the session stops, `Timeout` otherwise.
    pub fn wait_until(
        &self,
        timeout: Duration,
        mut ready: impl FnMut(&Registry) -> bool,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let seen = self.generation();
            let done = {
                let registry = self.registry();
                ready(&*registry)
            };
            if done {
                return Ok(());
            }
            if self.shared.is_terminated() {
                return Err(HubError::Disconnected);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HubError::Timeout(timeout));
            }
            self.wait_for_change(seen, remaining);
        }
    }

    /// False once the session stopped or the link was lost.
    pub fn is_running(&self) -> bool {
        !self.shared.is_terminated()
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    pub fn is_pending(&self, key: &MatchKey) -> bool {
        lock(&self.shared.pending).contains(key)
    }

    /// Abandon every outstanding request without calling its callback.
    pub fn cancel_pending(&self) -> usize {
        let count = lock(&self.shared.pending).clear();
        if count > 0 {
            debug!(count, "pending requests cancelled");
        }
        count
    }

    /// Register `completion` under `key`, then transmit.
    ///
    /// The entry exists before the frame leaves so a fast answer always
    /// finds it; a failed send removes it again.
    pub(crate) fn request(
        &self,
        key: MatchKey,
        completion: Completion,
        id: u8,
        payload: &[u8],
    ) -> Result<()> {
        if self.shared.is_terminated() {
            return Err(HubError::Disconnected);
        }
        lock(&self.shared.pending).insert(key.clone(), completion, Instant::now())?;
        if let Err(err) = self.shared.send(id, payload) {
            lock(&self.shared.pending).take(&key);
            return Err(err);
        }
        trace!(%key, "request sent");
        Ok(())
    }
}
