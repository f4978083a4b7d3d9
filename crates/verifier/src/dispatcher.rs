//! FrameDispatcher - turns a per-data-type frame stream into check tasks.
//!
//! 每个数据帧：
//! 1. 每个基础检查一个评估任务（信号量限流 + blocking 线程池）
//! 2. 基础检查全部返回后，任一越限即判定失败，失败帧不跑统计检查
//! 3. 通过的帧在所有更小索引的帧结算后才调度统计检查，保证历史快照一致
//! 4. 全部任务返回后结算：`Aggregate::handle` + 转发给重排序缓冲
//!
//! 索引跳号（含首帧索引大于 0）时为跳过的索引补发 `Missing`，下游重排序不会卡在空洞上。
//! 未结算帧数达到 `max_pending_frames` 时暂停接收，输入通道恢复背压。
//!
//! `End` 到达后继续处理未完成任务，直到全部结算，再发出 `End` 与 `Done`。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{
    CheckId, CheckResult, ContractError, Delivery, FeedbackEvent, Frame, FrameData, FrameResults,
    FrameStatus, VerificationConfig,
};
use observability::VerificationMetricsAggregator;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::instrument;

use crate::aggregate::Aggregate;
use crate::registry::CheckRegistry;

/// Largest index gap filled with synthesized `Missing` markers
const MAX_GAP_FILL: u64 = 4096;

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on how long the loop waits without checking for progress
    pub poll_interval: Duration,
    /// Evaluation tasks allowed to run at once
    pub max_concurrent_checks: usize,
    /// Unsettled data frames held before intake pauses
    pub max_pending_frames: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            max_concurrent_checks: 8,
            max_pending_frames: 64,
        }
    }
}

impl From<&VerificationConfig> for DispatcherConfig {
    fn from(config: &VerificationConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            max_concurrent_checks: config.max_concurrent_checks.max(1),
            max_pending_frames: config.max_pending_frames.max(1),
        }
    }
}

/// Per-data-type run statistics
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub data_type: String,
    /// Accepted data frames and missing markers
    pub frames_received: u64,
    /// Data frames settled into the aggregate
    pub frames_verified: u64,
    pub bad_frames: u64,
    pub missing_frames: u64,
    /// `Missing` markers synthesized for skipped indexes (included in `missing_frames`)
    pub gap_filled: u64,
    /// Gaps wider than the fill limit, left to the reorder buffer
    pub unfilled_gaps: u64,
    /// Most unsettled data frames held at once
    pub peak_pending: usize,
    /// Frames whose index did not increase
    pub rejected_frames: u64,
    pub evaluation_errors: u64,
    pub statistical_invocations: u64,
    /// Index carried by the forwarded `End`
    pub end_index: u64,
    /// Input closed without an explicit `End`
    pub implicit_end: bool,
    pub metrics: VerificationMetricsAggregator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Basic,
    Statistical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Basic checks outstanding
    Basic,
    /// Basic checks passed, waiting for every lower index to settle
    AwaitingStats,
    /// Statistical checks outstanding
    Stats,
    /// Ready to settle
    Done,
}

#[derive(Debug)]
struct PendingFrame {
    frame: Arc<FrameData>,
    phase: Phase,
    outstanding: usize,
    results: Vec<CheckResult>,
    evaluation_failed: bool,
}

impl PendingFrame {
    fn violated(&self) -> bool {
        self.evaluation_failed || self.results.iter().any(|r| !r.passed())
    }
}

#[derive(Debug, Clone, Copy)]
struct TaskMeta {
    index: u64,
    check: CheckId,
    tier: Tier,
}

struct TaskOutput {
    outcome: Result<CheckResult, ContractError>,
    elapsed_ms: f64,
}

/// Frame dispatcher for one data type
pub struct FrameDispatcher {
    data_type: String,
    registry: Arc<CheckRegistry>,
    aggregate: Arc<Aggregate>,
    config: DispatcherConfig,
    basic_checks: Vec<CheckId>,
    statistical_checks: Vec<CheckId>,
    deliveries: Option<mpsc::UnboundedSender<Delivery>>,
    feedback: Option<mpsc::Sender<FeedbackEvent>>,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<TaskOutput>,
    task_meta: HashMap<tokio::task::Id, TaskMeta>,
    pending: BTreeMap<u64, PendingFrame>,
    last_index: Option<u64>,
    summary: DispatchSummary,
}

impl FrameDispatcher {
    pub fn new(
        data_type: impl Into<String>,
        registry: Arc<CheckRegistry>,
        aggregate: Arc<Aggregate>,
        config: DispatcherConfig,
    ) -> Self {
        let data_type = data_type.into();
        let basic_checks = registry.basic_checks(&data_type).to_vec();
        let statistical_checks = registry.statistical_checks(&data_type);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_checks.max(1)));
        Self {
            summary: DispatchSummary {
                data_type: data_type.clone(),
                ..Default::default()
            },
            data_type,
            registry,
            aggregate,
            config,
            basic_checks,
            statistical_checks,
            deliveries: None,
            feedback: None,
            semaphore,
            tasks: JoinSet::new(),
            task_meta: HashMap::new(),
            pending: BTreeMap::new(),
            last_index: None,
        }
    }

    /// Forward settled frames and markers to downstream consumers
    pub fn with_deliveries(mut self, deliveries: mpsc::UnboundedSender<Delivery>) -> Self {
        self.deliveries = Some(deliveries);
        self
    }

    /// Send the terminal `Done` token to the feedback dispatcher
    pub fn with_feedback(mut self, feedback: mpsc::Sender<FeedbackEvent>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Run until `End` (or input close) and every task has settled
    #[instrument(name = "frame_dispatcher_run", skip_all, fields(data_type = %self.data_type))]
    pub async fn run(mut self, mut frames: mpsc::Receiver<Frame>) -> DispatchSummary {
        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut end_index: Option<u64> = None;

        tracing::info!(
            basic = self.basic_checks.len(),
            statistical = self.statistical_checks.len(),
            "dispatcher started"
        );

        loop {
            if let Some(end) = end_index {
                if self.is_idle() {
                    self.finish(end).await;
                    break;
                }
            }

            tokio::select! {
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.on_task_complete(joined);
                }
                received = frames.recv(), if end_index.is_none() && self.has_capacity() => match received {
                    Some(frame) => {
                        if let FrameStatus::End = frame.status {
                            end_index = Some(self.end_position(frame.index));
                        } else {
                            self.on_frame(frame);
                        }
                    }
                    None => {
                        tracing::warn!("frame source closed without End, treating as End");
                        self.summary.implicit_end = true;
                        end_index = Some(self.end_position(0));
                    }
                },
                _ = tick.tick() => {
                    observability::record_outstanding_tasks(&self.data_type, self.tasks.len());
                }
            }

            self.advance();
        }

        self.summary
    }

    /// `End` sits after every accepted index
    fn end_position(&self, index: u64) -> u64 {
        match self.last_index {
            Some(last) => index.max(last + 1),
            None => index,
        }
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.tasks.is_empty()
    }

    fn has_capacity(&self) -> bool {
        self.pending.len() < self.config.max_pending_frames.max(1)
    }

    /// First index not yet accepted
    fn next_index(&self) -> u64 {
        self.last_index.map_or(0, |last| last + 1)
    }

    /// Forward `Missing` for every index in `from..to`
    fn fill_gap(&mut self, from: u64, to: u64) {
        if to <= from {
            return;
        }
        let count = to - from;
        if count > MAX_GAP_FILL {
            tracing::warn!(from, to, "index gap too wide to fill, left to the reorder buffer");
            self.summary.unfilled_gaps += 1;
            return;
        }
        tracing::debug!(from, count, "index gap, forwarding missing markers");
        for index in from..to {
            self.summary.missing_frames += 1;
            self.summary.gap_filled += 1;
            self.summary.metrics.record_missing();
            observability::record_missing_frame(&self.data_type);
            self.deliver(Delivery::missing(&self.data_type, index));
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        if let Some(last) = self.last_index {
            if frame.index <= last {
                tracing::warn!(
                    index = frame.index,
                    last_index = last,
                    "frame index did not increase, rejecting"
                );
                self.summary.rejected_frames += 1;
                self.summary.metrics.record_rejected();
                observability::record_frame_rejected(&self.data_type);
                return;
            }
        }
        self.fill_gap(self.next_index(), frame.index);
        self.last_index = Some(frame.index);
        self.summary.frames_received += 1;

        match frame.status {
            FrameStatus::Data(data) => self.schedule_basic(frame.index, data),
            FrameStatus::Missing => {
                self.summary.missing_frames += 1;
                self.summary.metrics.record_missing();
                observability::record_missing_frame(&self.data_type);
                tracing::debug!(index = frame.index, "frame missing");
                self.deliver(Delivery::missing(&self.data_type, frame.index));
            }
            FrameStatus::End => {}
        }
    }

    fn schedule_basic(&mut self, index: u64, frame: Arc<FrameData>) {
        self.pending.insert(
            index,
            PendingFrame {
                frame: Arc::clone(&frame),
                phase: Phase::Basic,
                outstanding: self.basic_checks.len(),
                results: Vec::with_capacity(self.basic_checks.len()),
                evaluation_failed: false,
            },
        );
        self.summary.peak_pending = self.summary.peak_pending.max(self.pending.len());

        for check in self.basic_checks.clone() {
            let registry = Arc::clone(&self.registry);
            let data_type = self.data_type.clone();
            let frame = Arc::clone(&frame);
            self.spawn_check(index, check, Tier::Basic, move || {
                registry.evaluate(check, &data_type, &frame)
            });
        }
    }

    fn schedule_statistical(&mut self, index: u64) {
        let Some(pending) = self.pending.get_mut(&index) else {
            return;
        };
        pending.phase = Phase::Stats;
        pending.outstanding = self.statistical_checks.len();
        let basic_results: Arc<[CheckResult]> = pending.results.clone().into();

        for check in self.statistical_checks.clone() {
            let registry = Arc::clone(&self.registry);
            let aggregate = Arc::clone(&self.aggregate);
            let data_type = self.data_type.clone();
            let basic_results = Arc::clone(&basic_results);
            self.summary.statistical_invocations += 1;
            self.summary.metrics.record_statistical_invocation();
            observability::record_statistical_invocation(&self.data_type, check);
            self.spawn_check(index, check, Tier::Statistical, move || {
                registry.evaluate_statistical(check, &data_type, &aggregate, &basic_results, index)
            });
        }
    }

    fn spawn_check<F>(&mut self, index: u64, check: CheckId, tier: Tier, job: F)
    where
        F: FnOnce() -> Result<CheckResult, ContractError> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let handle = self.tasks.spawn(async move {
            let started = Instant::now();
            let outcome = match semaphore.acquire_owned().await {
                Ok(permit) => {
                    let evaluated = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        job()
                    })
                    .await;
                    match evaluated {
                        Ok(outcome) => outcome,
                        Err(e) => Err(ContractError::evaluation(
                            check.name(),
                            format!("evaluation task failed: {e}"),
                        )),
                    }
                }
                Err(_) => Err(ContractError::evaluation(check.name(), "worker pool closed")),
            };
            TaskOutput {
                outcome,
                elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
            }
        });
        self.task_meta
            .insert(handle.id(), TaskMeta { index, check, tier });
    }

    fn on_task_complete(&mut self, joined: Result<(tokio::task::Id, TaskOutput), JoinError>) {
        let (id, output) = match joined {
            Ok((id, output)) => (id, Ok(output)),
            Err(e) => (e.id(), Err(e)),
        };
        let Some(meta) = self.task_meta.remove(&id) else {
            tracing::warn!(task_id = %id, "completion for unknown task");
            return;
        };

        let outcome = match output {
            Ok(output) => {
                self.summary.metrics.record_latency_ms(output.elapsed_ms);
                observability::record_check_latency_ms(meta.check, output.elapsed_ms);
                output.outcome
            }
            Err(e) => Err(ContractError::evaluation(
                meta.check.name(),
                format!("task panicked: {e}"),
            )),
        };

        let Some(pending) = self.pending.get_mut(&meta.index) else {
            tracing::warn!(index = meta.index, check = %meta.check, "result for settled frame");
            return;
        };
        pending.outstanding = pending.outstanding.saturating_sub(1);
        match outcome {
            Ok(result) => pending.results.push(result),
            Err(e) => {
                tracing::warn!(
                    index = meta.index,
                    check = %meta.check,
                    error = %e,
                    "check evaluation failed, marking frame failed"
                );
                pending.evaluation_failed = true;
                self.summary.evaluation_errors += 1;
                self.summary.metrics.record_evaluation_error();
                observability::record_evaluation_error(&self.data_type, meta.check);
            }
        }

        if pending.outstanding == 0 {
            pending.phase = match meta.tier {
                Tier::Basic if !pending.violated() && !self.statistical_checks.is_empty() => {
                    Phase::AwaitingStats
                }
                _ => Phase::Done,
            };
        }
    }

    /// Settle finished frames and release statistical work in index order
    fn advance(&mut self) {
        let mut lower_unsettled = false;
        let indexes: Vec<u64> = self.pending.keys().copied().collect();
        for index in indexes {
            let Some(phase) = self.pending.get(&index).map(|p| p.phase) else {
                continue;
            };
            match phase {
                Phase::Done => self.settle(index),
                Phase::AwaitingStats => {
                    if !lower_unsettled {
                        self.schedule_statistical(index);
                    }
                    lower_unsettled = true;
                }
                Phase::Basic | Phase::Stats => lower_unsettled = true,
            }
        }
    }

    fn settle(&mut self, index: u64) {
        let Some(pending) = self.pending.remove(&index) else {
            return;
        };
        let mut results = FrameResults::new(&self.data_type, index, pending.results);
        if pending.evaluation_failed {
            results.mark_failed();
        }

        self.aggregate.handle(&results);

        self.summary.frames_verified += 1;
        if results.failed {
            self.summary.bad_frames += 1;
            tracing::debug!(index, violations = results.violations().count(), "frame failed");
        }
        self.summary.metrics.update(&results);
        observability::record_frame_verified(&results);

        self.deliver(Delivery::verified(
            &self.data_type,
            index,
            pending.frame,
            results.failed,
        ));
    }

    fn deliver(&self, delivery: Delivery) {
        if let Some(deliveries) = &self.deliveries {
            if deliveries.send(delivery).is_err() {
                tracing::debug!("delivery channel closed");
            }
        }
    }

    async fn finish(&mut self, end: u64) {
        self.summary.end_index = end;
        self.fill_gap(self.next_index(), end);
        self.deliver(Delivery::end(&self.data_type, end));
        if let Some(feedback) = &self.feedback {
            let done = FeedbackEvent::Done {
                data_type: self.data_type.clone(),
            };
            if feedback.send(done).await.is_err() {
                tracing::debug!("feedback channel closed before Done");
            }
        }
        tracing::info!(
            frames = self.summary.frames_received,
            bad = self.summary.bad_frames,
            missing = self.summary.missing_frames,
            end,
            "dispatcher finished"
        );
    }
}
