//! Backpressure configuration and metrics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Backpressure configuration
///
/// Acquisitions that do not fit into the raw queue are dropped; the feed
/// later sees the counter gap and inserts `Missing` markers.
#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    /// Raw acquisition queue capacity (async-channel)
    pub channel_capacity: usize,

    /// Frame channel capacity towards the verifier
    pub frame_capacity: usize,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 100,
            frame_capacity: 100,
        }
    }
}

impl BackpressureConfig {
    pub fn new(channel_capacity: usize, frame_capacity: usize) -> Self {
        Self {
            channel_capacity,
            frame_capacity,
        }
    }
}

/// Ingestion metrics
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Total acquisitions received from sources
    pub acquisitions_received: AtomicU64,

    /// Acquisitions dropped because the queue was full
    pub acquisitions_dropped: AtomicU64,

    /// Current queue length
    pub queue_len: AtomicUsize,

    /// Decode error count
    pub decode_errors: AtomicU64,

    /// Missing markers inserted for counter gaps
    pub missing_inserted: AtomicU64,

    /// Frames forwarded to the verifier
    pub frames_emitted: AtomicU64,
}

impl IngestionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.acquisitions_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.acquisitions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missing(&self, count: u64) {
        self.missing_inserted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.frames_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            acquisitions_received: self.acquisitions_received.load(Ordering::Relaxed),
            acquisitions_dropped: self.acquisitions_dropped.load(Ordering::Relaxed),
            queue_len: self.queue_len.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            missing_inserted: self.missing_inserted.load(Ordering::Relaxed),
            frames_emitted: self.frames_emitted.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub acquisitions_received: u64,
    pub acquisitions_dropped: u64,
    pub queue_len: usize,
    pub decode_errors: u64,
    pub missing_inserted: u64,
    pub frames_emitted: u64,
}
