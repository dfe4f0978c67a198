//! Chunked, burst-windowed file stream transfers.
//!
//! A transfer splits a stream into fixed-size chunks numbered from zero and
//! keeps at most `burst_size` of them unacknowledged. The window starts at
//! the lowest chunk not yet accepted; accepting it slides the window and
//! frees slots for the next requests. Chunks may be accepted out of order,
//! but the window only moves past a contiguous prefix.
//!
//! Every in-flight chunk has a bounded wait. When it expires, or the chunk
//! fails verification, only that chunk is re-sent. A chunk that has used up
//! its send budget fails the whole transfer.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use bytes::Bytes;
use groundlink_frame::message::{file, FILE};
use groundlink_frame::{Checksum, Frame};
use tracing::{debug, info, trace, warn};

use crate::error::{HubError, Result};
use crate::hub::{Deferred, Hub, Shared};
use crate::pending::Job;
use crate::progress::Progress;
use crate::registry::FileStream;
use crate::result::ResultCode;
use crate::router::HandlerResult;
use crate::signal::lock;
use crate::wire::{FileReadResponse, FileRequest, FileWriteResponse};

/// Per-transfer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Bytes per chunk, `1..=240`.
    pub chunk_size: usize,
    /// Chunks allowed in flight before waiting for acknowledgement.
    pub burst_size: usize,
    /// Carry a checksum with every chunk.
    pub verify: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: 48,
            burst_size: 4,
            verify: false,
        }
    }
}

impl TransferOptions {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > file::MAX_CHUNK {
            return Err(HubError::InvalidArgument(format!(
                "chunk size {} outside 1..={}",
                self.chunk_size,
                file::MAX_CHUNK
            )));
        }
        if self.burst_size == 0 {
            return Err(HubError::InvalidArgument(
                "burst size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn chunk(&self) -> u32 {
        self.chunk_size as u32
    }

    fn burst(&self) -> u32 {
        u32::try_from(self.burst_size).unwrap_or(u32::MAX)
    }

    fn flags(&self) -> u8 {
        if self.verify {
            file::FLAG_VERIFY
        } else {
            0
        }
    }
}

type TransferCallback = Box<dyn FnOnce(ResultCode) + Send>;

enum Mode {
    Read {
        /// Accepted chunk data by sequence number.
        chunks: BTreeMap<u32, Bytes>,
        /// Stream length declared by the device, once known.
        total: Option<u32>,
    },
    Write {
        data: Bytes,
        /// Device-side offset of chunk zero.
        base: u32,
        /// Buffer the written data is appended to.
        previous: Option<Vec<u8>>,
    },
}

struct Flight {
    sent_at: Instant,
    /// Sends so far, including the first.
    attempts: u32,
}

/// What a device answer did to a transfer.
#[derive(Debug, PartialEq)]
enum Reply {
    /// Stale, duplicate or not for this transfer.
    Ignored,
    /// Accepted or rejected; these requests go out next.
    Sent(Vec<Bytes>),
    Failed(ResultCode),
}

pub(crate) struct Transfer {
    address: u8,
    index: u8,
    options: TransferOptions,
    mode: Mode,
    chunk_count: Option<u32>,
    window_base: u32,
    accepted: BTreeSet<u32>,
    in_flight: BTreeMap<u32, Flight>,
    callback: TransferCallback,
}

impl Transfer {
    fn read(
        address: u8,
        index: u8,
        options: TransferOptions,
        callback: TransferCallback,
    ) -> Self {
        Self {
            address,
            index,
            options,
            mode: Mode::Read {
                chunks: BTreeMap::new(),
                total: None,
            },
            chunk_count: None,
            window_base: 0,
            accepted: BTreeSet::new(),
            in_flight: BTreeMap::new(),
            callback,
        }
    }

    fn write(
        address: u8,
        index: u8,
        options: TransferOptions,
        data: Bytes,
        previous: Option<Vec<u8>>,
        callback: TransferCallback,
    ) -> Result<Self> {
        let base = previous.as_ref().map_or(0, Vec::len);
        let fits = base
            .checked_add(data.len())
            .is_some_and(|end| u32::try_from(end).is_ok());
        if !fits {
            return Err(HubError::InvalidArgument(format!(
                "{} bytes at offset {base} exceed the stream size limit",
                data.len()
            )));
        }
        let chunks = data.len().div_ceil(options.chunk_size).max(1) as u32;
        Ok(Self {
            address,
            index,
            options,
            mode: Mode::Write {
                data,
                base: base as u32,
                previous,
            },
            chunk_count: Some(chunks),
            window_base: 0,
            accepted: BTreeSet::new(),
            in_flight: BTreeMap::new(),
            callback,
        })
    }

    fn is_write(&self) -> bool {
        matches!(self.mode, Mode::Write { .. })
    }

    fn base(&self) -> u32 {
        match self.mode {
            Mode::Read { .. } => 0,
            Mode::Write { base, .. } => base,
        }
    }

    fn offset_of(&self, seq: u32) -> u32 {
        self.base() + seq * self.options.chunk()
    }

    fn sequence_of(&self, offset: u32) -> Option<u32> {
        let relative = offset.checked_sub(self.base())?;
        let chunk = self.options.chunk();
        (relative % chunk == 0).then_some(relative / chunk)
    }

    fn is_complete(&self) -> bool {
        self.chunk_count.is_some_and(|count| self.window_base >= count)
    }

    /// The request payload for chunk `seq`.
    fn request(&self, seq: u32) -> Bytes {
        let offset = self.offset_of(seq);
        match &self.mode {
            Mode::Read { .. } => FileRequest::Read {
                address: self.address,
                index: self.index,
                flags: self.options.flags(),
                offset,
                length: self.options.chunk_size as u8,
            }
            .encode(),
            Mode::Write { data, .. } => {
                let start = seq as usize * self.options.chunk_size;
                let end = (start + self.options.chunk_size).min(data.len());
                let chunk = data.slice(start.min(end)..end);
                let mut flags = self.options.flags();
                if self.chunk_count == Some(seq + 1) {
                    flags |= file::FLAG_END_OF_FILE;
                }
                FileRequest::Write {
                    address: self.address,
                    index: self.index,
                    flags,
                    offset,
                    checksum: self.options.verify.then(|| Checksum::of(&chunk)),
                    data: chunk,
                }
                .encode()
            }
        }
    }

    /// Issue every chunk the window allows that is not yet in flight.
    ///
    /// Until a read learns the stream length only chunk zero is requested.
    fn fill_window(&mut self, now: Instant) -> Vec<Bytes> {
        let limit = self.chunk_count.unwrap_or(1);
        let end = self
            .window_base
            .saturating_add(self.options.burst())
            .min(limit);
        let mut sends = Vec::new();
        for seq in self.window_base..end {
            if self.accepted.contains(&seq) || self.in_flight.contains_key(&seq) {
                continue;
            }
            self.in_flight.insert(
                seq,
                Flight {
                    sent_at: now,
                    attempts: 1,
                },
            );
            sends.push(self.request(seq));
        }
        sends
    }

    /// Re-send one in-flight chunk, or fail with `reason` once its budget is spent.
    fn retry(
        &mut self,
        seq: u32,
        now: Instant,
        reason: ResultCode,
        max_attempts: u32,
    ) -> std::result::Result<Bytes, ResultCode> {
        let offset = self.offset_of(seq);
        let (address, index) = (self.address, self.index);
        let Some(flight) = self.in_flight.get_mut(&seq) else {
            return Err(reason);
        };
        if flight.attempts >= max_attempts {
            warn!(
                address,
                index,
                offset,
                attempts = flight.attempts,
                %reason,
                "chunk retries exhausted"
            );
            return Err(reason);
        }
        flight.attempts += 1;
        flight.sent_at = now;
        let attempt = flight.attempts;
        debug!(
            address,
            index,
            offset,
            attempt,
            %reason,
            "re-sending chunk"
        );
        Ok(self.request(seq))
    }

    fn accept(&mut self, seq: u32, progress: &Progress) {
        self.in_flight.remove(&seq);
        self.accepted.insert(seq);
        progress.advance(1);
        while self.accepted.contains(&self.window_base) {
            self.window_base += 1;
        }
    }

    fn on_chunk(
        &mut self,
        response: &FileReadResponse,
        now: Instant,
        max_attempts: u32,
        progress: &Progress,
    ) -> Reply {
        if self.is_write() {
            return Reply::Ignored;
        }
        let Some(seq) = self.sequence_of(response.offset) else {
            return Reply::Ignored;
        };
        if !self.in_flight.contains_key(&seq) {
            return Reply::Ignored;
        }
        if !response.result.is_success() {
            return Reply::Failed(response.result);
        }

        let chunk = self.options.chunk();
        let total = match &mut self.mode {
            Mode::Read { total, .. } => *total.get_or_insert(response.total),
            Mode::Write { .. } => return Reply::Ignored,
        };
        if self.chunk_count.is_none() {
            let count = total.div_ceil(chunk).max(1);
            self.chunk_count = Some(count);
            progress.add_total(u64::from(count));
        }
        if response.is_end_of_file() {
            self.cap_chunks(seq + 1, progress);
        }

        let expected = chunk.min(total.saturating_sub(response.offset)) as usize;
        let length_ok = response.is_end_of_file() || response.data.len() == expected;
        let checksum_ok =
            !self.options.verify || response.checksum == Some(Checksum::of(&response.data));
        if !(length_ok && checksum_ok) {
            return match self.retry(seq, now, ResultCode::ChecksumMismatch, max_attempts) {
                Ok(payload) => Reply::Sent(vec![payload]),
                Err(code) => Reply::Failed(code),
            };
        }

        if let Mode::Read { chunks, .. } = &mut self.mode {
            chunks.insert(seq, response.data.clone());
        }
        self.accept(seq, progress);
        Reply::Sent(self.fill_window(now))
    }

    /// An end-of-file marker shortens the stream to `count` chunks.
    fn cap_chunks(&mut self, count: u32, progress: &Progress) {
        let Some(current) = self.chunk_count else {
            return;
        };
        if count < current {
            self.chunk_count = Some(count);
            // Chunks past the end that already arrived were counted on arrival.
            let dropped = (count..current)
                .filter(|seq| !self.accepted.contains(seq))
                .count();
            progress.advance(dropped as u64);
            self.in_flight.retain(|&seq, _| seq < count);
            self.accepted.retain(|&seq| seq < count);
            if let Mode::Read { chunks, .. } = &mut self.mode {
                chunks.retain(|&seq, _| seq < count);
            }
        }
    }

    fn on_ack(
        &mut self,
        ack: &FileWriteResponse,
        now: Instant,
        max_attempts: u32,
        progress: &Progress,
    ) -> Reply {
        if !self.is_write() {
            return Reply::Ignored;
        }
        let Some(seq) = self.sequence_of(ack.offset) else {
            return Reply::Ignored;
        };
        if !self.in_flight.contains_key(&seq) {
            return Reply::Ignored;
        }
        match ack.result {
            ResultCode::Success => {
                self.accept(seq, progress);
                Reply::Sent(self.fill_window(now))
            }
            ResultCode::ChecksumMismatch => {
                match self.retry(seq, now, ResultCode::ChecksumMismatch, max_attempts) {
                    Ok(payload) => Reply::Sent(vec![payload]),
                    Err(code) => Reply::Failed(code),
                }
            }
            other => Reply::Failed(other),
        }
    }

    /// Re-send every chunk whose wait expired.
    fn on_tick(&mut self, now: Instant, timeout: Duration, max_attempts: u32) -> Reply {
        let expired: Vec<u32> = self
            .in_flight
            .iter()
            .filter(|(_, flight)| now.saturating_duration_since(flight.sent_at) >= timeout)
            .map(|(&seq, _)| seq)
            .collect();
        if expired.is_empty() {
            return Reply::Ignored;
        }
        let mut sends = Vec::with_capacity(expired.len());
        for seq in expired {
            match self.retry(seq, now, ResultCode::Timeout, max_attempts) {
                Ok(payload) => sends.push(payload),
                Err(code) => return Reply::Failed(code),
            }
        }
        Reply::Sent(sends)
    }

    fn finish(self, result: ResultCode) -> Finished {
        let write = self.is_write();
        let data = if result.is_success() {
            Some(match self.mode {
                Mode::Read { chunks, .. } => {
                    let count = self.chunk_count.unwrap_or(0);
                    chunks
                        .range(..count)
                        .flat_map(|(_, chunk)| chunk.iter().copied())
                        .collect()
                }
                Mode::Write { data, previous, .. } => {
                    let mut buffer = previous.unwrap_or_default();
                    buffer.extend_from_slice(&data);
                    buffer
                }
            })
        } else {
            None
        };
        Finished {
            address: self.address,
            index: self.index,
            write,
            result,
            data,
            callback: self.callback,
        }
    }
}

struct Finished {
    address: u8,
    index: u8,
    write: bool,
    result: ResultCode,
    data: Option<Vec<u8>>,
    callback: TransferCallback,
}

/// Active transfers, one per stream.
#[derive(Default)]
pub(crate) struct TransferTable {
    active: HashMap<(u8, u8), Transfer>,
}

impl TransferTable {
    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }

    pub(crate) fn contains(&self, address: u8, index: u8) -> bool {
        self.active.contains_key(&(address, index))
    }
}

/// Publish a finished transfer to the registry and package its callback.
///
/// A failed write leaves the stream without data; a failed read keeps the
/// previous buffer.
fn settle(shared: &Shared, finished: Finished) -> Job {
    let Finished {
        address,
        index,
        write,
        result,
        data,
        callback,
    } = finished;
    let bytes = data.as_ref().map_or(0, Vec::len);
    {
        let mut registry = lock(&shared.registry);
        if let Some(stream) = registry
            .component_mut(address)
            .and_then(|c| c.files.get_mut(&index))
        {
            if data.is_some() || write {
                stream.data = data;
            }
        }
    }
    if result.is_success() {
        info!(address, index, bytes, write, "transfer complete");
    } else {
        warn!(address, index, write, %result, "transfer failed");
    }
    Box::new(move || callback(result))
}

/// Apply `step` to the transfer on `key` and turn the reply into deferred work.
///
/// Returns `None` when no transfer is active on the stream.
fn advance(
    shared: &Shared,
    key: (u8, u8),
    step: impl FnOnce(&mut Transfer) -> Reply,
) -> Option<Deferred> {
    let (sends, finished) = {
        let mut transfers = lock(&shared.transfers);
        let transfer = transfers.active.get_mut(&key)?;
        let outcome = match step(transfer) {
            Reply::Ignored => {
                trace!(address = key.0, index = key.1, "stale transfer reply");
                return Some(Deferred::new());
            }
            Reply::Sent(_) if transfer.is_complete() => (Vec::new(), Some(ResultCode::Success)),
            Reply::Sent(sends) => (sends, None),
            Reply::Failed(code) => (Vec::new(), Some(code)),
        };
        match outcome {
            (sends, Some(result)) => (
                sends,
                transfers.active.remove(&key).map(|t| t.finish(result)),
            ),
            (sends, None) => (sends, None),
        }
    };

    let mut deferred = Deferred::new();
    for payload in sends {
        deferred.send(FILE, payload);
    }
    if let Some(finished) = finished {
        deferred.call(settle(shared, finished));
        deferred.changed();
    }
    Some(deferred)
}

pub(crate) fn on_read_chunk(shared: &Shared, frame: &Frame) -> HandlerResult {
    let response = FileReadResponse::decode(&frame.payload)?;
    let max_attempts = shared.config.transfer.max_attempts;
    let now = Instant::now();
    let deferred = advance(shared, (response.address, response.index), |transfer| {
        transfer.on_chunk(&response, now, max_attempts, &shared.progress)
    });
    Ok(deferred.unwrap_or_else(|| {
        shared.note_unmatched(frame.id, "file chunk");
        Deferred::new()
    }))
}

pub(crate) fn on_write_ack(shared: &Shared, frame: &Frame) -> HandlerResult {
    let ack = FileWriteResponse::decode(&frame.payload)?;
    let max_attempts = shared.config.transfer.max_attempts;
    let now = Instant::now();
    let deferred = advance(shared, (ack.address, ack.index), |transfer| {
        transfer.on_ack(&ack, now, max_attempts, &shared.progress)
    });
    Ok(deferred.unwrap_or_else(|| {
        shared.note_unmatched(frame.id, "file ack");
        Deferred::new()
    }))
}

/// Re-send expired chunks and fail transfers that ran out of attempts.
pub(crate) fn poll(shared: &Shared, now: Instant) -> Deferred {
    let timeout = shared.config.transfer.chunk_timeout;
    let max_attempts = shared.config.transfer.max_attempts;
    let keys: Vec<(u8, u8)> = lock(&shared.transfers).active.keys().copied().collect();

    let mut deferred = Deferred::new();
    for key in keys {
        if let Some(step) = advance(shared, key, |t| t.on_tick(now, timeout, max_attempts)) {
            deferred.merge(step);
        }
    }
    deferred
}

/// Fail every active transfer with `result`; returns the callbacks to run.
pub(crate) fn fail_all(shared: &Shared, result: ResultCode) -> Vec<Job> {
    let drained: Vec<Transfer> = lock(&shared.transfers)
        .active
        .drain()
        .map(|(_, t)| t)
        .collect();
    drained
        .into_iter()
        .map(|t| settle(shared, t.finish(result)))
        .collect()
}

/// Drop every active transfer without calling back.
///
/// Streams being written lose their data: the device contents are unknown.
pub(crate) fn abandon_all(shared: &Shared) -> usize {
    let drained: Vec<Transfer> = lock(&shared.transfers)
        .active
        .drain()
        .map(|(_, t)| t)
        .collect();
    let count = drained.len();
    let mut registry = lock(&shared.registry);
    for transfer in drained.into_iter().filter(Transfer::is_write) {
        if let Some(stream) = registry
            .component_mut(transfer.address)
            .and_then(|c| c.files.get_mut(&transfer.index))
        {
            stream.data = None;
        }
    }
    count
}

/// Handle to one file stream of a component.
#[derive(Clone)]
pub struct StreamHandle {
    hub: Hub,
    address: u8,
    index: u8,
}

impl Hub {
    /// Handle to a file stream the component has described.
    pub fn stream(&self, address: u8, index: u8) -> Result<StreamHandle> {
        let known = self
            .registry()
            .component(address)
            .ok_or(HubError::UnknownComponent(address))?
            .stream(index)
            .is_some();
        if !known {
            return Err(HubError::UnknownStream { address, index });
        }
        Ok(StreamHandle {
            hub: self.clone(),
            address,
            index,
        })
    }

    pub fn active_transfers(&self) -> usize {
        lock(&self.shared.transfers).len()
    }
}

impl StreamHandle {
    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn snapshot(&self) -> Option<FileStream> {
        self.hub
            .registry()
            .component(self.address)
            .and_then(|c| c.stream(self.index))
            .cloned()
    }

    /// Buffer of the last completed transfer.
    pub fn data(&self) -> Option<Vec<u8>> {
        self.snapshot().and_then(|s| s.data)
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.hub.shared.transfers).contains(self.address, self.index)
    }

    /// Read the whole stream from the device.
    ///
    /// `callback` runs once with the outcome; on success [`StreamHandle::data`]
    /// holds the new buffer.
    pub fn read(
        &self,
        options: TransferOptions,
        callback: impl FnOnce(ResultCode) + Send + 'static,
    ) -> Result<()> {
        options.validate()?;
        debug!(address = self.address, index = self.index, ?options, "starting read");
        self.start(Transfer::read(
            self.address,
            self.index,
            options,
            Box::new(callback),
        ))
    }

    /// Write `data` to the stream, replacing it or appending to the current buffer.
    ///
    /// When appending, the device-side offset starts at the length of the
    /// buffer this handle currently holds.
    pub fn write(
        &self,
        data: impl Into<Bytes>,
        options: TransferOptions,
        append: bool,
        callback: impl FnOnce(ResultCode) + Send + 'static,
    ) -> Result<()> {
        options.validate()?;
        let previous = if append {
            Some(self.data().unwrap_or_default())
        } else {
            None
        };
        let data = data.into();
        debug!(
            address = self.address,
            index = self.index,
            len = data.len(),
            append,
            ?options,
            "starting write"
        );
        let transfer = Transfer::write(
            self.address,
            self.index,
            options,
            data,
            previous,
            Box::new(callback),
        )?;
        self.start(transfer)
    }

    fn start(&self, mut transfer: Transfer) -> Result<()> {
        let shared = &self.hub.shared;
        if shared.is_terminated() {
            return Err(HubError::Disconnected);
        }
        if self.snapshot().is_none() {
            return Err(HubError::UnknownStream {
                address: self.address,
                index: self.index,
            });
        }
        let key = (self.address, self.index);
        let sends = {
            let mut transfers = lock(&shared.transfers);
            if transfers.active.contains_key(&key) {
                return Err(HubError::TransferActive {
                    address: self.address,
                    index: self.index,
                });
            }
            // Reads learn their size from the first answer.
            if let (true, Some(count)) = (transfer.is_write(), transfer.chunk_count) {
                shared.progress.add_total(u64::from(count));
            }
            let sends = transfer.fill_window(Instant::now());
            transfers.active.insert(key, transfer);
            sends
        };
        for payload in sends {
            if let Err(err) = shared.send(FILE, &payload) {
                lock(&shared.transfers).active.remove(&key);
                return Err(err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn noop() -> TransferCallback {
        Box::new(|_| {})
    }

    fn options(chunk_size: usize, burst_size: usize, verify: bool) -> TransferOptions {
        TransferOptions {
            chunk_size,
            burst_size,
            verify,
        }
    }

    fn offsets(sends: &[Bytes]) -> Vec<u32> {
        sends
            .iter()
            .map(|p| match FileRequest::decode(p).unwrap() {
                FileRequest::Read { offset, .. } | FileRequest::Write { offset, .. } => offset,
            })
            .collect()
    }

    fn chunk(offset: u32, total: u32, data: &[u8], flags: u8) -> FileReadResponse {
        FileReadResponse {
            address: 1,
            index: 0,
            result: ResultCode::Success,
            flags,
            offset,
            total,
            checksum: (flags & file::FLAG_VERIFY != 0).then(|| Checksum::of(data)),
            data: Bytes::copy_from_slice(data),
        }
    }

    fn ack(offset: u32, result: ResultCode) -> FileWriteResponse {
        FileWriteResponse {
            address: 1,
            index: 0,
            result,
            offset,
        }
    }

    #[test]
    fn options_validation() {
        assert!(TransferOptions::default().validate().is_ok());
        assert!(options(0, 4, false).validate().is_err());
        assert!(options(241, 4, false).validate().is_err());
        assert!(options(240, 1, true).validate().is_ok());
        assert!(options(48, 0, false).validate().is_err());
    }

    #[test]
    fn write_window_never_exceeds_burst() {
        let progress = Progress::new();
        let data = Bytes::from(vec![7u8; 10 * 48 + 5]);
        let mut t = Transfer::write(1, 0, options(48, 4, false), data, None, noop()).unwrap();
        assert_eq!(t.chunk_count, Some(11));

        let now = Instant::now();
        let first = t.fill_window(now);
        assert_eq!(offsets(&first), vec![0, 48, 96, 144]);
        assert!(t.fill_window(now).is_empty());

        // Out-of-order ack does not move the window.
        let reply = t.on_ack(&ack(96, ResultCode::Success), now, 4, &progress);
        assert_eq!(reply, Reply::Sent(Vec::new()));
        assert_eq!(t.in_flight.len(), 3);

        let Reply::Sent(next) = t.on_ack(&ack(0, ResultCode::Success), now, 4, &progress) else {
            panic!("expected sends");
        };
        assert_eq!(offsets(&next), vec![192]);
        assert!(t.in_flight.len() <= 4);
        assert_eq!(t.window_base, 1);

        let Reply::Sent(next) = t.on_ack(&ack(48, ResultCode::Success), now, 4, &progress) else {
            panic!("expected sends");
        };
        assert_eq!(offsets(&next), vec![240, 288]);
        assert_eq!(t.in_flight.len(), 4);
        assert_eq!(progress.snapshot().completed, 3);
    }

    #[test]
    fn last_write_chunk_carries_end_of_file() {
        let data = Bytes::from_static(b"0123456789");
        let mut t = Transfer::write(1, 0, options(4, 8, true), data, None, noop()).unwrap();
        let sends = t.fill_window(Instant::now());
        let decoded: Vec<_> = sends
            .iter()
            .map(|p| FileRequest::decode(p).unwrap())
            .collect();
        assert_eq!(decoded.len(), 3);
        let FileRequest::Write {
            flags,
            checksum,
            data,
            ..
        } = &decoded[2]
        else {
            panic!("expected write");
        };
        assert_eq!(*flags, file::FLAG_VERIFY | file::FLAG_END_OF_FILE);
        assert_eq!(data.as_ref(), b"89");
        assert_eq!(*checksum, Some(Checksum::of(b"89")));
        let FileRequest::Write { flags, .. } = &decoded[0] else {
            panic!("expected write");
        };
        assert_eq!(*flags, file::FLAG_VERIFY);
    }

    #[test]
    fn append_offsets_start_at_existing_length() {
        let progress = Progress::new();
        let previous = Some(vec![1u8; 100]);
        let data = Bytes::from_static(&[2u8; 20]);
        let mut t = Transfer::write(1, 0, options(16, 2, false), data, previous, noop()).unwrap();
        let sends = t.fill_window(Instant::now());
        assert_eq!(offsets(&sends), vec![100, 116]);

        // Misaligned and pre-base offsets are stale.
        let now = Instant::now();
        assert_eq!(
            t.on_ack(&ack(108, ResultCode::Success), now, 4, &progress),
            Reply::Ignored
        );
        assert_eq!(
            t.on_ack(&ack(84, ResultCode::Success), now, 4, &progress),
            Reply::Ignored
        );

        t.on_ack(&ack(100, ResultCode::Success), now, 4, &progress);
        t.on_ack(&ack(116, ResultCode::Success), now, 4, &progress);
        assert!(t.is_complete());
        let finished = t.finish(ResultCode::Success);
        let data = finished.data.unwrap();
        assert_eq!(data.len(), 120);
        assert_eq!(&data[..100], &[1u8; 100][..]);
        assert_eq!(&data[100..], &[2u8; 20][..]);
    }

    #[test]
    fn read_waits_for_total_before_bursting() {
        let progress = Progress::new();
        let mut t = Transfer::read(1, 0, options(4, 3, false), noop());
        let now = Instant::now();
        assert_eq!(offsets(&t.fill_window(now)), vec![0]);

        let Reply::Sent(next) = t.on_chunk(&chunk(0, 10, b"abcd", 0), now, 4, &progress) else {
            panic!("expected sends");
        };
        assert_eq!(t.chunk_count, Some(3));
        assert_eq!(offsets(&next), vec![4, 8]);
        assert_eq!(progress.snapshot().total, 3);

        // Out of order, short last chunk.
        t.on_chunk(&chunk(8, 10, b"ij", 0), now, 4, &progress);
        assert!(!t.is_complete());
        t.on_chunk(&chunk(4, 10, b"efgh", 0), now, 4, &progress);
        assert!(t.is_complete());
        assert_eq!(
            t.finish(ResultCode::Success).data.unwrap(),
            b"abcdefghij".to_vec()
        );
    }

    #[test]
    fn bad_checksum_rerequests_only_that_chunk() {
        let progress = Progress::new();
        let mut t = Transfer::read(1, 0, options(4, 4, true), noop());
        let now = Instant::now();
        t.fill_window(now);
        t.on_chunk(&chunk(0, 12, b"abcd", file::FLAG_VERIFY), now, 4, &progress);

        let mut corrupt = chunk(4, 12, b"efgh", file::FLAG_VERIFY);
        corrupt.data = Bytes::from_static(b"efgX");
        let Reply::Sent(resend) = t.on_chunk(&corrupt, now, 4, &progress) else {
            panic!("expected a re-request");
        };
        assert_eq!(offsets(&resend), vec![4]);
        assert_eq!(t.in_flight.get(&1).unwrap().attempts, 2);
        assert!(!t.accepted.contains(&1));
    }

    #[test]
    fn end_of_file_caps_read() {
        let progress = Progress::new();
        let mut t = Transfer::read(1, 0, options(4, 4, false), noop());
        let now = Instant::now();
        t.fill_window(now);
        // Device declares 16 bytes but ends after the second chunk.
        t.on_chunk(&chunk(0, 16, b"abcd", 0), now, 4, &progress);
        t.on_chunk(&chunk(4, 16, b"ef", file::FLAG_END_OF_FILE), now, 4, &progress);
        assert!(t.is_complete());
        assert!(t.in_flight.is_empty());
        assert_eq!(progress.snapshot().completed, progress.snapshot().total);
        assert_eq!(t.finish(ResultCode::Success).data.unwrap(), b"abcdef".to_vec());
    }

    #[test]
    fn end_of_file_after_later_chunk_keeps_progress_bounded() {
        let progress = Progress::new();
        let mut t = Transfer::read(1, 0, options(4, 4, false), noop());
        let now = Instant::now();
        t.fill_window(now);
        t.on_chunk(&chunk(0, 16, b"abcd", 0), now, 4, &progress);
        // Chunk 2 lands before chunk 1, which turns out to be the last one.
        t.on_chunk(&chunk(8, 16, b"ijkl", 0), now, 4, &progress);
        t.on_chunk(&chunk(4, 16, b"ef", file::FLAG_END_OF_FILE), now, 4, &progress);

        assert!(t.is_complete());
        let snapshot = progress.snapshot();
        assert_eq!((snapshot.completed, snapshot.total), (4, 4));
        assert!(snapshot.fraction() <= 1.0);
        assert!(!t.accepted.contains(&2));
        assert_eq!(t.finish(ResultCode::Success).data.unwrap(), b"abcdef".to_vec());
    }

    #[test]
    fn expired_chunks_retry_until_budget_spent() {
        let progress = Progress::new();
        let data = Bytes::from_static(&[0u8; 8]);
        let mut t = Transfer::write(1, 0, options(4, 2, false), data, None, noop()).unwrap();
        let t0 = Instant::now();
        let timeout = Duration::from_millis(100);
        t.fill_window(t0);
        t.on_ack(&ack(0, ResultCode::Success), t0, 3, &progress);

        assert_eq!(t.on_tick(t0 + Duration::from_millis(50), timeout, 3), Reply::Ignored);
        let Reply::Sent(resend) = t.on_tick(t0 + timeout, timeout, 3) else {
            panic!("expected a resend");
        };
        assert_eq!(offsets(&resend), vec![4]);
        let Reply::Sent(_) = t.on_tick(t0 + timeout * 2, timeout, 3) else {
            panic!("expected a resend");
        };
        assert_eq!(
            t.on_tick(t0 + timeout * 3, timeout, 3),
            Reply::Failed(ResultCode::Timeout)
        );
    }

    #[test]
    fn device_rejection_fails_write() {
        let progress = Progress::new();
        let data = Bytes::from_static(&[0u8; 8]);
        let mut t = Transfer::write(1, 0, options(4, 2, true), data, None, noop()).unwrap();
        let now = Instant::now();
        t.fill_window(now);
        let Reply::Sent(resend) = t.on_ack(&ack(4, ResultCode::ChecksumMismatch), now, 4, &progress)
        else {
            panic!("expected a resend");
        };
        assert_eq!(offsets(&resend), vec![4]);
        assert_eq!(
            t.on_ack(&ack(0, ResultCode::Busy), now, 4, &progress),
            Reply::Failed(ResultCode::Busy)
        );
    }

    #[test]
    fn failed_transfer_calls_back_with_result() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let t = Transfer::read(
            1,
            0,
            TransferOptions::default(),
            Box::new(move |r| *sink.lock().unwrap() = Some(r)),
        );
        let finished = t.finish(ResultCode::Disconnected);
        assert!(finished.data.is_none());
        (finished.callback)(finished.result);
        assert_eq!(*seen.lock().unwrap(), Some(ResultCode::Disconnected));
    }
}
