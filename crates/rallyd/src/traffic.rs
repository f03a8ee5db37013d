//! Process-global byte metering with a bounded trailing per-second window.

use crate::clock;
use dashmap::DashMap;
use rally_common::types::MIN_TRAFFIC_WINDOW_SECS;
use std::sync::atomic::{AtomicU64, Ordering};

/// Direction of a metered frame, relative to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Frame received from a peer.
    In,
    /// Frame sent to a peer.
    Out,
}

/// Byte counts for one unix second.
#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    in_bytes: u64,
    out_bytes: u64,
}

/// Cumulative and optionally windowed byte totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSummary {
    /// Total inbound bytes since server start.
    pub total_in: u64,
    /// Total outbound bytes since server start.
    pub total_out: u64,
    /// Windowed totals, when a window was requested.
    pub window: Option<WindowTotals>,
}

/// Byte totals over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTotals {
    /// Effective window length in seconds (capped at the meter's window).
    pub seconds: u64,
    /// Inbound bytes within the window.
    pub in_bytes: u64,
    /// Outbound bytes within the window.
    pub out_bytes: u64,
}

/// Byte meter shared by every connection of the process.
///
/// Totals grow monotonically; per-second buckets older than the configured
/// window are evicted on every write.
#[derive(Debug)]
pub struct TrafficMeter {
    total_in: AtomicU64,
    total_out: AtomicU64,
    window_secs: u64,
    buckets: DashMap<u64, Bucket>,
}

impl TrafficMeter {
    /// Create a meter keeping `window_secs` of per-second buckets
    /// (floored at [`MIN_TRAFFIC_WINDOW_SECS`]).
    #[must_use]
    pub fn new(window_secs: u64) -> Self {
        Self {
            total_in: AtomicU64::new(0),
            total_out: AtomicU64::new(0),
            window_secs: window_secs.max(MIN_TRAFFIC_WINDOW_SECS),
            buckets: DashMap::new(),
        }
    }

    /// Record a frame's serialized size.
    pub fn record(&self, direction: Direction, bytes: u64) {
        self.record_at(direction, bytes, clock::now_secs());
    }

    fn record_at(&self, direction: Direction, bytes: u64, now: u64) {
        match direction {
            Direction::In => self.total_in.fetch_add(bytes, Ordering::Relaxed),
            Direction::Out => self.total_out.fetch_add(bytes, Ordering::Relaxed),
        };

        {
            let mut bucket = self.buckets.entry(now).or_default();
            match direction {
                Direction::In => bucket.in_bytes = bucket.in_bytes.saturating_add(bytes),
                Direction::Out => bucket.out_bytes = bucket.out_bytes.saturating_add(bytes),
            }
        }

        let cutoff = now.saturating_sub(self.window_secs);
        self.buckets.retain(|&second, _| second >= cutoff);
    }

    /// Summarize traffic. With no window, totals only; with a window,
    /// totals plus the sum of buckets inside `min(window, meter window)`.
    #[must_use]
    pub fn summarize(&self, window_secs: Option<u64>) -> TrafficSummary {
        self.summarize_at(window_secs, clock::now_secs())
    }

    fn summarize_at(&self, window_secs: Option<u64>, now: u64) -> TrafficSummary {
        let window = window_secs.map(|requested| {
            let seconds = requested.min(self.window_secs);
            let from = now.saturating_sub(seconds);
            let (mut in_bytes, mut out_bytes) = (0u64, 0u64);
            for entry in &self.buckets {
                if *entry.key() >= from {
                    in_bytes = in_bytes.saturating_add(entry.in_bytes);
                    out_bytes = out_bytes.saturating_add(entry.out_bytes);
                }
            }
            WindowTotals {
                seconds,
                in_bytes,
                out_bytes,
            }
        });

        TrafficSummary {
            total_in: self.total_in.load(Ordering::Relaxed),
            total_out: self.total_out.load(Ordering::Relaxed),
            window,
        }
    }
}
