//! Per-data-type reorder buffer restoring strict index order.
//!
//! Uses index-based separation like a packet buffer:
//! - HeapRb stores lightweight metadata (index + slab key)
//! - Slab stores the actual Delivery (frame payload is an `Arc`)
//!
//! Release rules, per data type:
//! - `index == expected` releases, advances, then rescans pending entries
//! - `index > expected` is held until the gap closes
//! - late `Missing` is released immediately, late data is dropped
//! - `End` is parked until every lower index was released

use std::collections::BTreeMap;
use std::fmt;

use contracts::{Delivery, DeliveryEvent};
use observability::{record_reorder_forced, record_reorder_pending};
use ringbuf::{traits::*, HeapRb};
use slab::Slab;
use tracing::{debug, warn};

/// Lightweight metadata stored in ring buffer
#[derive(Debug, Clone, Copy)]
struct PendingMeta {
    index: u64,
    slab_key: usize,
}

/// Counters exposed for summaries and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneStats {
    pub released: u64,
    pub late_dropped: u64,
    pub forced: u64,
    pub duplicates: u64,
    pub after_end: u64,
    /// 观测到的最大乱序距离 (index - expected)
    pub max_skew: u64,
}

/// Reorder state of one data type
struct ReorderLane {
    data_type: String,
    expected: u64,
    index: HeapRb<PendingMeta>,
    storage: Slab<Delivery>,
    max_pending: usize,
    parked_end: Option<Delivery>,
    /// Position of the End marker once admitted
    end_at: Option<u64>,
    end_released: bool,
    stats: LaneStats,
}

impl fmt::Debug for ReorderLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReorderLane")
            .field("data_type", &self.data_type)
            .field("expected", &self.expected)
            .field("pending", &self.index.occupied_len())
            .field("end_at", &self.end_at)
            .finish()
    }
}

impl ReorderLane {
    fn new(data_type: &str, max_pending: usize) -> Self {
        Self {
            data_type: data_type.to_string(),
            expected: 0,
            index: HeapRb::new(max_pending),
            storage: Slab::with_capacity(max_pending),
            max_pending,
            parked_end: None,
            end_at: None,
            end_released: false,
            stats: LaneStats::default(),
        }
    }

    fn pending(&self) -> usize {
        self.index.occupied_len()
    }

    fn admit(&mut self, delivery: Delivery, out: &mut Vec<Delivery>) {
        if self.end_released {
            self.stats.after_end += 1;
            warn!(
                data_type = %self.data_type,
                index = delivery.index,
                "Delivery after End dropped"
            );
            return;
        }

        if delivery.is_end() {
            self.admit_end(delivery, out);
            return;
        }

        if let Some(end_at) = self.end_at {
            if delivery.index >= end_at {
                self.stats.after_end += 1;
                warn!(
                    data_type = %self.data_type,
                    index = delivery.index,
                    end_at,
                    "Delivery beyond End dropped"
                );
                return;
            }
        }

        let index = delivery.index;
        if index < self.expected {
            self.admit_late(delivery, out);
            return;
        }

        if index == self.expected {
            self.release(delivery, out);
            self.drain_ready(out);
        } else {
            self.hold(delivery, out);
        }
        self.try_release_end(out);
        record_reorder_pending(&self.data_type, self.pending());
    }

    fn admit_end(&mut self, end: Delivery, out: &mut Vec<Delivery>) {
        if self.end_at.is_some() {
            self.stats.duplicates += 1;
            warn!(data_type = %self.data_type, index = end.index, "Duplicate End dropped");
            return;
        }

        let end_at = end.index;
        self.end_at = Some(end_at);
        // pending 中超出结束位置的条目不会再被释放
        let beyond: Vec<PendingMeta> = self.index.iter().filter(|m| m.index >= end_at).copied().collect();
        if !beyond.is_empty() {
            self.rebuild_index(|m| m.index < end_at);
            for meta in beyond {
                self.storage.remove(meta.slab_key);
                self.stats.after_end += 1;
            }
            warn!(
                data_type = %self.data_type,
                end_at,
                "Pending deliveries beyond End dropped"
            );
        }
        self.parked_end = Some(end);
        self.try_release_end(out);
    }

    fn admit_late(&mut self, delivery: Delivery, out: &mut Vec<Delivery>) {
        match delivery.event {
            DeliveryEvent::Missing => {
                debug!(
                    data_type = %self.data_type,
                    index = delivery.index,
                    expected = self.expected,
                    "Late Missing released"
                );
                self.stats.released += 1;
                out.push(delivery);
            }
            _ => {
                self.stats.late_dropped += 1;
                warn!(
                    data_type = %self.data_type,
                    index = delivery.index,
                    expected = self.expected,
                    "Late delivery dropped"
                );
            }
        }
    }

    fn hold(&mut self, delivery: Delivery, out: &mut Vec<Delivery>) {
        let index = delivery.index;
        if self.index.iter().any(|m| m.index == index) {
            self.stats.duplicates += 1;
            warn!(data_type = %self.data_type, index, "Duplicate delivery dropped");
            return;
        }

        self.stats.max_skew = self.stats.max_skew.max(index - self.expected);

        if self.index.is_full() {
            self.force_release_lowest(out);
            // 跳过空洞后，新条目可能已经就绪
            if index < self.expected {
                self.admit_late(delivery, out);
                return;
            }
            if index == self.expected {
                self.release(delivery, out);
                self.drain_ready(out);
                return;
            }
        }

        let slab_key = self.storage.insert(delivery);
        let _ = self.index.try_push(PendingMeta { index, slab_key });
    }

    /// Skip the gap up to the lowest pending index and release from there
    fn force_release_lowest(&mut self, out: &mut Vec<Delivery>) {
        let Some(lowest) = self.index.iter().map(|m| m.index).min() else {
            return;
        };
        self.stats.forced += 1;
        record_reorder_forced(&self.data_type);
        warn!(
            data_type = %self.data_type,
            expected = self.expected,
            released = lowest,
            max_pending = self.max_pending,
            "Reorder buffer full, skipping gap"
        );
        self.expected = lowest;
        self.drain_ready(out);
    }

    fn release(&mut self, delivery: Delivery, out: &mut Vec<Delivery>) {
        self.expected = delivery.index + 1;
        self.stats.released += 1;
        out.push(delivery);
    }

    /// Release pending entries while the expected index is present
    fn drain_ready(&mut self, out: &mut Vec<Delivery>) {
        while let Some(meta) = self.index.iter().find(|m| m.index == self.expected).copied() {
            self.rebuild_index(|m| m.slab_key != meta.slab_key);
            let delivery = self.storage.remove(meta.slab_key);
            self.release(delivery, out);
        }
    }

    fn try_release_end(&mut self, out: &mut Vec<Delivery>) {
        let Some(end_at) = self.end_at else {
            return;
        };
        if self.expected < end_at || !self.index.is_empty() {
            return;
        }
        if let Some(end) = self.parked_end.take() {
            self.end_released = true;
            self.stats.released += 1;
            out.push(end);
        }
    }

    /// Release everything held (ascending), then the parked End
    fn finish(&mut self, out: &mut Vec<Delivery>) {
        if !self.index.is_empty() {
            let mut metas: Vec<PendingMeta> = self.index.pop_iter().collect();
            metas.sort_by_key(|m| m.index);
            warn!(
                data_type = %self.data_type,
                expected = self.expected,
                pending = metas.len(),
                "Force draining reorder buffer"
            );
            for meta in metas {
                let delivery = self.storage.remove(meta.slab_key);
                self.release(delivery, out);
            }
        }
        if let Some(end) = self.parked_end.take() {
            self.end_released = true;
            self.stats.released += 1;
            out.push(end);
        }
        record_reorder_pending(&self.data_type, 0);
    }

    /// Keep only the metadata matching `keep` (only moves small metadata, not payloads)
    fn rebuild_index(&mut self, keep: impl Fn(&PendingMeta) -> bool) {
        let metas: Vec<PendingMeta> = self.index.pop_iter().filter(|m| keep(m)).collect();
        for m in metas {
            let _ = self.index.try_push(m);
        }
    }
}

/// Reorder buffer over all data types
pub struct ReorderBuffer {
    lanes: BTreeMap<String, ReorderLane>,
    max_pending: usize,
}

impl fmt::Debug for ReorderBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReorderBuffer")
            .field("lanes", &self.lanes.values().collect::<Vec<_>>())
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

impl ReorderBuffer {
    /// Create a buffer holding at most `max_pending` out-of-order deliveries per data type
    pub fn new(max_pending: usize) -> Self {
        Self {
            lanes: BTreeMap::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// Admit one delivery, returning everything it releases in order
    pub fn admit(&mut self, delivery: Delivery) -> Vec<Delivery> {
        let mut out = Vec::new();
        let max_pending = self.max_pending;
        let lane = self
            .lanes
            .entry(delivery.data_type.clone())
            .or_insert_with_key(|data_type| ReorderLane::new(data_type, max_pending));
        lane.admit(delivery, &mut out);
        out
    }

    /// Force-release everything still held, data types in name order
    pub fn finish(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        for lane in self.lanes.values_mut() {
            lane.finish(&mut out);
        }
        out
    }

    /// Number of held deliveries for a data type
    pub fn pending(&self, data_type: &str) -> usize {
        self.lanes.get(data_type).map_or(0, ReorderLane::pending)
    }

    /// Next index a data type is waiting for
    pub fn expected(&self, data_type: &str) -> Option<u64> {
        self.lanes.get(data_type).map(|lane| lane.expected)
    }

    pub fn stats(&self, data_type: &str) -> Option<LaneStats> {
        self.lanes.get(data_type).map(|lane| lane.stats)
    }

    /// Whether every known data type released its End
    pub fn is_complete(&self) -> bool {
        !self.lanes.is_empty() && self.lanes.values().all(|lane| lane.end_released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{FrameData, Slice};
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn verified(index: u64) -> Delivery {
        let frame = Arc::new(FrameData::new(Slice::filled(2, 2, 1.0)));
        Delivery::verified("data", index, frame, false)
    }

    fn indexes(out: &[Delivery]) -> Vec<u64> {
        out.iter().map(|d| d.index).collect()
    }

    #[test]
    fn in_order_passes_through() {
        let mut buffer = ReorderBuffer::new(16);
        for i in 0..3 {
            assert_eq!(indexes(&buffer.admit(verified(i))), vec![i]);
        }
        let out = buffer.admit(Delivery::end("data", 3));
        assert!(out[0].is_end());
        assert!(buffer.is_complete());
    }

    #[test]
    fn gap_is_held_until_filled() {
        let mut buffer = ReorderBuffer::new(16);
        assert!(buffer.admit(verified(2)).is_empty());
        assert!(buffer.admit(verified(1)).is_empty());
        assert_eq!(buffer.pending("data"), 2);

        let out = buffer.admit(verified(0));
        assert_eq!(indexes(&out), vec![0, 1, 2]);
        assert_eq!(buffer.pending("data"), 0);
        assert_eq!(buffer.stats("data").unwrap().max_skew, 2);
    }

    #[test]
    fn missing_marker_keeps_position() {
        let mut buffer = ReorderBuffer::new(16);
        let mut out = buffer.admit(verified(0));
        out.extend(buffer.admit(verified(2)));
        out.extend(buffer.admit(Delivery::missing("data", 1)));
        out.extend(buffer.admit(Delivery::end("data", 3)));

        assert_eq!(indexes(&out), vec![0, 1, 2, 3]);
        assert!(out[1].is_missing());
        assert!(out[3].is_end());
    }

    #[test]
    fn end_waits_for_lower_indexes() {
        let mut buffer = ReorderBuffer::new(16);
        assert!(buffer.admit(Delivery::end("data", 2)).is_empty());
        assert!(buffer.admit(verified(1)).is_empty());
        let out = buffer.admit(verified(0));
        assert_eq!(indexes(&out), vec![0, 1, 2]);
        assert!(out[2].is_end());
    }

    #[test]
    fn deliveries_after_end_are_dropped() {
        let mut buffer = ReorderBuffer::new(16);
        buffer.admit(verified(0));
        buffer.admit(Delivery::end("data", 1));
        assert!(buffer.admit(verified(1)).is_empty());
        assert!(buffer.admit(Delivery::end("data", 1)).is_empty());
        assert_eq!(buffer.stats("data").unwrap().after_end, 2);
    }

    #[test]
    fn late_data_dropped_late_missing_released() {
        let mut buffer = ReorderBuffer::new(1);
        buffer.admit(verified(0));
        // 容量 1：index 3 进入后 index 4 触发强制释放，跳过 1 和 2
        assert!(buffer.admit(verified(3)).is_empty());
        let out = buffer.admit(verified(4));
        assert_eq!(indexes(&out), vec![3, 4]);
        assert_eq!(buffer.stats("data").unwrap().forced, 1);

        assert!(buffer.admit(verified(1)).is_empty());
        let out = buffer.admit(Delivery::missing("data", 2));
        assert_eq!(indexes(&out), vec![2]);

        let stats = buffer.stats("data").unwrap();
        assert_eq!(stats.late_dropped, 1);
    }

    #[test]
    fn finish_drains_ascending_then_end() {
        let mut buffer = ReorderBuffer::new(16);
        buffer.admit(verified(5));
        buffer.admit(verified(3));
        buffer.admit(Delivery::end("data", 6));

        let out = buffer.finish();
        assert_eq!(indexes(&out), vec![3, 5, 6]);
        assert!(out[2].is_end());
        assert!(buffer.is_complete());
    }

    #[test]
    fn data_types_are_independent() {
        let mut buffer = ReorderBuffer::new(16);
        let frame = Arc::new(FrameData::new(Slice::filled(1, 1, 0.0)));
        assert!(buffer.admit(verified(1)).is_empty());
        let out = buffer.admit(Delivery::verified("data_dark", 0, frame, true));
        assert_eq!(out.len(), 1);
        assert_eq!(buffer.expected("data_dark"), Some(1));
        assert_eq!(buffer.expected("data"), Some(0));
    }

    #[test]
    fn any_permutation_yields_strict_order_with_single_end() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let mut admissions: Vec<Delivery> = (0..20)
                .map(|i| {
                    if i % 7 == 3 {
                        Delivery::missing("data", i)
                    } else {
                        verified(i)
                    }
                })
                .collect();
            admissions.push(Delivery::end("data", 20));
            admissions.shuffle(&mut rng);

            let mut buffer = ReorderBuffer::new(64);
            let mut out = Vec::new();
            for delivery in admissions {
                out.extend(buffer.admit(delivery));
            }
            out.extend(buffer.finish());

            assert_eq!(indexes(&out), (0..=20).collect::<Vec<_>>());
            assert_eq!(out.iter().filter(|d| d.is_end()).count(), 1);
            assert!(out.last().unwrap().is_end());
        }
    }
}
