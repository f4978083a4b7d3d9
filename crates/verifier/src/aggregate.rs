//! Per-data-type aggregate of verification results.
//!
//! 一个数据类型一把锁：
//! - `bad_indexes` / `good_indexes` 互斥，每个已结算索引恰好在其一
//! - `history` 只保存通过帧中被统计检查依赖的基础检查结果
//!
//! 失败通知在锁外以非阻塞方式发送，通道满则丢弃并计数。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use contracts::{
    AggregateMode, AggregateSnapshot, CheckId, FailureNotice, FeedbackEvent, FrameResults,
    HistoryEntry, IndexedResults,
};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[derive(Debug, Default)]
struct AggregateState {
    bad_indexes: IndexedResults,
    good_indexes: IndexedResults,
    /// Sorted by index
    history: BTreeMap<CheckId, Vec<HistoryEntry>>,
}

/// Concurrency-safe accumulator for one data type
pub struct Aggregate {
    data_type: String,
    mode: AggregateMode,
    tracked: BTreeSet<CheckId>,
    history_window: Option<usize>,
    feedback: Option<mpsc::Sender<FeedbackEvent>>,
    state: Mutex<AggregateState>,
    feedback_dropped: AtomicU64,
}

impl fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregate")
            .field("data_type", &self.data_type)
            .field("mode", &self.mode)
            .field("tracked", &self.tracked)
            .field("feedback_dropped", &self.feedback_dropped())
            .finish()
    }
}

impl Aggregate {
    /// Create an aggregate keeping history for `tracked` checks
    pub fn new(data_type: impl Into<String>, mode: AggregateMode, tracked: &[CheckId]) -> Self {
        Self {
            data_type: data_type.into(),
            mode,
            tracked: tracked.iter().copied().collect(),
            history_window: None,
            feedback: None,
            state: Mutex::new(AggregateState::default()),
            feedback_dropped: AtomicU64::new(0),
        }
    }

    /// Forward failures to the feedback channel
    pub fn with_feedback(mut self, feedback: mpsc::Sender<FeedbackEvent>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Cap every history list to the newest `window` entries
    pub fn with_history_window(mut self, window: Option<usize>) -> Self {
        self.history_window = window.filter(|w| *w > 0);
        self
    }

    pub fn data_type(&self) -> &str {
        &self.data_type
    }

    pub fn mode(&self) -> AggregateMode {
        self.mode
    }

    fn lock(&self) -> MutexGuard<'_, AggregateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify a settled frame, extend history and forward failures
    pub fn handle(&self, results: &FrameResults) {
        {
            let mut state = self.lock();
            let by_check: BTreeMap<CheckId, _> =
                results.results.iter().map(|r| (r.check, *r)).collect();

            if results.failed {
                if self.mode == AggregateMode::Full {
                    state.bad_indexes.insert(results.index, by_check);
                }
            } else {
                for result in results.results.iter().filter(|r| self.tracked.contains(&r.check)) {
                    let entries = state.history.entry(result.check).or_default();
                    let pos = entries.partition_point(|e| e.index < results.index);
                    entries.insert(
                        pos,
                        HistoryEntry {
                            index: results.index,
                            result: *result,
                        },
                    );
                    if let Some(window) = self.history_window {
                        if entries.len() > window {
                            let excess = entries.len() - window;
                            entries.drain(..excess);
                        }
                    }
                }
                if self.mode == AggregateMode::Full {
                    state.good_indexes.insert(results.index, by_check);
                }
            }
        }

        self.forward_failures(results);
    }

    fn forward_failures(&self, results: &FrameResults) {
        let Some(feedback) = &self.feedback else {
            return;
        };
        for result in results.violations() {
            let notice = FailureNotice {
                data_type: self.data_type.clone(),
                index: results.index,
                result: *result,
            };
            match feedback.try_send(FeedbackEvent::Failure(notice)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.feedback_dropped.fetch_add(1, Ordering::Relaxed);
                    observability::record_feedback_dropped(&self.data_type);
                    tracing::warn!(
                        data_type = %self.data_type,
                        index = results.index,
                        check = %result.check,
                        "feedback channel full, dropping failure notice"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(
                        data_type = %self.data_type,
                        "feedback channel closed"
                    );
                }
            }
        }
    }

    /// History snapshot of one check
    pub fn history(&self, check: CheckId) -> Vec<HistoryEntry> {
        self.lock().history.get(&check).cloned().unwrap_or_default()
    }

    /// History entries of frames with an index lower than `index`
    pub fn history_before(&self, check: CheckId, index: u64) -> Vec<HistoryEntry> {
        let state = self.lock();
        match state.history.get(&check) {
            Some(entries) => {
                let end = entries.partition_point(|e| e.index < index);
                entries[..end].to_vec()
            }
            None => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        let state = self.lock();
        state.bad_indexes.is_empty() && state.good_indexes.is_empty()
    }

    /// Consistent copy of all three structures
    pub fn snapshot(&self) -> AggregateSnapshot {
        let state = self.lock();
        AggregateSnapshot {
            data_type: self.data_type.clone(),
            bad_indexes: state.bad_indexes.clone(),
            good_indexes: state.good_indexes.clone(),
            history: state.history.clone(),
        }
    }

    /// Failure notices dropped because the feedback channel was full
    pub fn feedback_dropped(&self) -> u64 {
        self.feedback_dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CheckResult, QualityError};
    use std::sync::Arc;

    fn mean_result(value: f64, error: QualityError) -> CheckResult {
        CheckResult::new(value, CheckId::Mean, error)
    }

    fn good(index: u64, mean: f64) -> FrameResults {
        FrameResults::new(
            "data",
            index,
            vec![
                mean_result(mean, QualityError::None),
                CheckResult::new(1.0, CheckId::StdDev, QualityError::None),
            ],
        )
    }

    fn bad(index: u64) -> FrameResults {
        FrameResults::new("data", index, vec![mean_result(15.0, QualityError::High)])
    }

    #[test]
    fn classifies_into_disjoint_maps() {
        let aggregate = Aggregate::new("data", AggregateMode::Full, &[CheckId::Mean]);
        aggregate.handle(&good(0, 5.0));
        aggregate.handle(&bad(1));
        aggregate.handle(&good(2, 6.0));

        let snapshot = aggregate.snapshot();
        assert_eq!(snapshot.good_indexes.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(snapshot.bad_index_list(), vec![1]);
        assert_eq!(
            snapshot.bad_indexes[&1][&CheckId::Mean],
            mean_result(15.0, QualityError::High)
        );
        // 只有被依赖的检查进入历史
        assert_eq!(snapshot.history_len(CheckId::Mean), 2);
        assert_eq!(snapshot.history_len(CheckId::StdDev), 0);
    }

    #[test]
    fn history_before_filters_by_index() {
        let aggregate = Aggregate::new("data", AggregateMode::Full, &[CheckId::Mean]);
        aggregate.handle(&good(3, 3.0));
        aggregate.handle(&good(0, 0.0));
        aggregate.handle(&good(1, 1.0));

        let prior: Vec<u64> = aggregate
            .history_before(CheckId::Mean, 3)
            .iter()
            .map(|e| e.index)
            .collect();
        assert_eq!(prior, vec![0, 1]);
        assert_eq!(aggregate.history(CheckId::Mean).len(), 3);
    }

    #[test]
    fn feedback_only_mode_keeps_history() {
        let aggregate = Aggregate::new("data", AggregateMode::FeedbackOnly, &[CheckId::Mean]);
        aggregate.handle(&good(0, 5.0));
        aggregate.handle(&bad(1));

        assert!(aggregate.is_empty());
        assert_eq!(aggregate.history(CheckId::Mean).len(), 1);
    }

    #[test]
    fn history_window_drops_oldest() {
        let aggregate = Aggregate::new("data", AggregateMode::Full, &[CheckId::Mean])
            .with_history_window(Some(2));
        for index in 0..5 {
            aggregate.handle(&good(index, index as f64));
        }
        let indexes: Vec<u64> = aggregate
            .history(CheckId::Mean)
            .iter()
            .map(|e| e.index)
            .collect();
        assert_eq!(indexes, vec![3, 4]);
    }

    #[tokio::test]
    async fn failures_are_forwarded() {
        let (tx, mut rx) = mpsc::channel(8);
        let aggregate =
            Aggregate::new("data", AggregateMode::Full, &[CheckId::Mean]).with_feedback(tx);
        aggregate.handle(&good(0, 5.0));
        aggregate.handle(&bad(1));

        match rx.recv().await {
            Some(FeedbackEvent::Failure(notice)) => {
                assert_eq!(notice.index, 1);
                assert_eq!(notice.pv_name(), "data_mean");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_feedback_channel_drops_and_counts() {
        let (tx, _rx) = mpsc::channel(1);
        let aggregate =
            Aggregate::new("data", AggregateMode::Full, &[CheckId::Mean]).with_feedback(tx);
        aggregate.handle(&bad(0));
        aggregate.handle(&bad(1));
        aggregate.handle(&bad(2));

        assert_eq!(aggregate.feedback_dropped(), 2);
        assert_eq!(aggregate.snapshot().bad_indexes.len(), 3);
    }

    #[test]
    fn concurrent_handles_keep_every_index() {
        let aggregate = Arc::new(Aggregate::new("data", AggregateMode::Full, &[CheckId::Mean]));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let aggregate = Arc::clone(&aggregate);
                std::thread::spawn(move || {
                    for i in 0..50u64 {
                        let index = t * 50 + i;
                        if index % 7 == 0 {
                            aggregate.handle(&bad(index));
                        } else {
                            aggregate.handle(&good(index, 5.0));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = aggregate.snapshot();
        assert_eq!(snapshot.good_indexes.len() + snapshot.bad_indexes.len(), 200);
        assert!(snapshot
            .bad_indexes
            .keys()
            .all(|index| !snapshot.good_indexes.contains_key(index)));
        assert_eq!(snapshot.history_len(CheckId::Mean), snapshot.good_indexes.len());
    }
}
