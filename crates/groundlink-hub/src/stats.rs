use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Frame totals since the session started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageCounters {
    /// Frames that passed the checksum.
    pub received: u64,
    /// Frames written to the link.
    pub sent: u64,
    /// Frames dropped on checksum mismatch.
    pub errors: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct RateBucket {
    second: u64,
    rx_bytes: u64,
    tx_bytes: u64,
}

/// Link statistics kept alongside the device registry.
#[derive(Debug)]
pub struct Stats {
    started: Instant,
    window: usize,
    per_id: BTreeMap<u8, u64>,
    counters: MessageCounters,
    unmatched: u64,
    data_errors: u64,
    buckets: VecDeque<RateBucket>,
    latency_total: Duration,
    latency_count: u64,
}

impl Stats {
    /// `window` is the number of one-second rate buckets kept.
    pub fn new(window: usize, started: Instant) -> Self {
        Self {
            started,
            window: window.max(1),
            per_id: BTreeMap::new(),
            counters: MessageCounters::default(),
            unmatched: 0,
            data_errors: 0,
            buckets: VecDeque::new(),
            latency_total: Duration::ZERO,
            latency_count: 0,
        }
    }

    pub(crate) fn record_frame(&mut self, id: u8) {
        *self.per_id.entry(id).or_default() += 1;
        self.counters.received += 1;
    }

    pub(crate) fn record_rx_bytes(&mut self, bytes: u64, now: Instant) {
        if bytes > 0 {
            self.bucket(now).rx_bytes += bytes;
        }
    }

    pub(crate) fn record_tx(&mut self, bytes: u64, now: Instant) {
        self.counters.sent += 1;
        self.bucket(now).tx_bytes += bytes;
    }

    pub(crate) fn set_frame_errors(&mut self, errors: u64) {
        self.counters.errors = errors;
    }

    pub(crate) fn record_unmatched(&mut self) {
        self.unmatched += 1;
    }

    pub(crate) fn record_data_error(&mut self) {
        self.data_errors += 1;
    }

    pub(crate) fn record_latency(&mut self, latency: Duration) {
        self.latency_total += latency;
        self.latency_count += 1;
    }

    fn second(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.started).as_secs()
    }

    fn bucket(&mut self, now: Instant) -> &mut RateBucket {
        let second = self.second(now);
        let keep_from = (second + 1).saturating_sub(self.window as u64);
        while self.buckets.front().is_some_and(|b| b.second < keep_from) {
            self.buckets.pop_front();
        }
        if self.buckets.back().is_none_or(|b| b.second < second) {
            self.buckets.push_back(RateBucket {
                second,
                ..RateBucket::default()
            });
        }
        let last = self.buckets.len() - 1;
        &mut self.buckets[last]
    }

    /// Receive counts per message id.
    pub fn message_stats(&self) -> &BTreeMap<u8, u64> {
        &self.per_id
    }

    pub fn counters(&self) -> MessageCounters {
        self.counters
    }

    /// Responses that matched no outstanding request or transfer.
    pub fn unmatched(&self) -> u64 {
        self.unmatched
    }

    /// Payloads dropped as malformed.
    pub fn data_errors(&self) -> u64 {
        self.data_errors
    }

    /// `(rx_bytes, tx_bytes)` per second, oldest first, ending with the current second.
    pub fn rates(&self, now: Instant) -> Vec<(u64, u64)> {
        let current = self.second(now);
        let first = (current + 1).saturating_sub(self.window as u64);
        (first..=current)
            .map(|second| {
                self.buckets
                    .iter()
                    .find(|b| b.second == second)
                    .map_or((0, 0), |b| (b.rx_bytes, b.tx_bytes))
            })
            .collect()
    }

    /// Mean request-to-response latency in seconds.
    pub fn latency(&self) -> Option<f64> {
        if self.latency_count == 0 {
            return None;
        }
        Some(self.latency_total.as_secs_f64() / self.latency_count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_frames_per_id() {
        let mut stats = Stats::new(10, Instant::now());
        stats.record_frame(0x38);
        stats.record_frame(0x38);
        stats.record_frame(0x37);
        stats.set_frame_errors(2);

        assert_eq!(stats.message_stats().get(&0x38), Some(&2));
        assert_eq!(stats.counters().received, 3);
        assert_eq!(stats.counters().errors, 2);
    }

    #[test]
    fn rates_are_bucketed_per_second() {
        let t0 = Instant::now();
        let mut stats = Stats::new(3, t0);
        stats.record_rx_bytes(10, t0);
        stats.record_rx_bytes(5, t0 + Duration::from_millis(1500));
        stats.record_tx(7, t0 + Duration::from_millis(1600));

        assert_eq!(stats.rates(t0 + Duration::from_millis(1900)), vec![(10, 0), (5, 7)]);
        assert_eq!(stats.counters().sent, 1);

        // Three seconds later the window only holds empty buckets.
        assert_eq!(
            stats.rates(t0 + Duration::from_millis(4200)),
            vec![(0, 0), (0, 0), (0, 0)]
        );
    }

    #[test]
    fn old_buckets_are_pruned() {
        let t0 = Instant::now();
        let mut stats = Stats::new(2, t0);
        for second in 0..6u64 {
            stats.record_rx_bytes(second + 1, t0 + Duration::from_secs(second));
        }
        assert_eq!(stats.buckets.len(), 2);
        assert_eq!(stats.rates(t0 + Duration::from_secs(5)), vec![(5, 0), (6, 0)]);
    }

    #[test]
    fn mean_latency() {
        let mut stats = Stats::new(10, Instant::now());
        assert_eq!(stats.latency(), None);
        stats.record_latency(Duration::from_millis(100));
        stats.record_latency(Duration::from_millis(300));
        let mean = stats.latency().unwrap();
        assert!((mean - 0.2).abs() < 1e-9);
    }
}
