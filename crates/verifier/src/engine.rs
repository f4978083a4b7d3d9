//! VerificationEngine - one dispatcher + aggregate per data type.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use contracts::{
    AggregateMode, ContractError, Delivery, FeedbackEvent, Frame, VerificationConfig,
    VerificationReport,
};
use observability::VerificationMetricsAggregator;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::instrument;

use crate::aggregate::Aggregate;
use crate::dispatcher::{DispatchSummary, DispatcherConfig, FrameDispatcher};
use crate::registry::CheckRegistry;

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub dispatcher: DispatcherConfig,
    pub mode: AggregateMode,
    pub history_window: Option<usize>,
}

impl From<&VerificationConfig> for EngineConfig {
    fn from(config: &VerificationConfig) -> Self {
        Self {
            dispatcher: DispatcherConfig::from(config),
            mode: config.aggregate_mode(),
            history_window: config.history_window,
        }
    }
}

/// Result of a full run
#[derive(Debug, Clone, Default)]
pub struct VerificationOutcome {
    /// Snapshots of every data type that received at least one frame
    pub report: VerificationReport,
    pub summaries: BTreeMap<String, DispatchSummary>,
}

impl VerificationOutcome {
    /// Metrics of all data types merged
    pub fn metrics(&self) -> VerificationMetricsAggregator {
        let mut merged = VerificationMetricsAggregator::new();
        for summary in self.summaries.values() {
            merged.merge(&summary.metrics);
        }
        merged
    }

    pub fn bad_frames(&self) -> u64 {
        self.summaries.values().map(|s| s.bad_frames).sum()
    }
}

/// Live view of the aggregates of a running engine
#[derive(Debug, Clone, Default)]
pub struct EngineProgress {
    aggregates: Arc<Mutex<BTreeMap<String, Arc<Aggregate>>>>,
}

impl EngineProgress {
    fn register(&self, aggregate: Arc<Aggregate>) {
        self.aggregates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(aggregate.data_type().to_string(), aggregate);
    }

    /// Snapshots of every data type that settled at least one frame so far
    pub fn partial_report(&self) -> VerificationReport {
        let aggregates = self
            .aggregates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let data_types = aggregates
            .iter()
            .filter(|(_, aggregate)| !aggregate.is_empty())
            .map(|(data_type, aggregate)| (data_type.clone(), aggregate.snapshot()))
            .collect();
        VerificationReport { data_types }
    }
}

/// Runs per-data-type dispatchers in parallel
pub struct VerificationEngine {
    registry: Arc<CheckRegistry>,
    config: EngineConfig,
    progress: EngineProgress,
    feedback: Option<mpsc::Sender<FeedbackEvent>>,
    deliveries: Option<mpsc::UnboundedSender<Delivery>>,
}

impl VerificationEngine {
    pub fn new(registry: Arc<CheckRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            progress: EngineProgress::default(),
            feedback: None,
            deliveries: None,
        }
    }

    /// Handle for reading aggregates while `run` is in flight
    pub fn progress(&self) -> EngineProgress {
        self.progress.clone()
    }

    /// Failure notices and `Done` tokens go to this channel
    pub fn with_feedback(mut self, feedback: mpsc::Sender<FeedbackEvent>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Settled frames and markers go to this channel (consumers registered)
    pub fn with_deliveries(mut self, deliveries: mpsc::UnboundedSender<Delivery>) -> Self {
        self.deliveries = Some(deliveries);
        self
    }

    /// Verify every source until it ends.
    ///
    /// # Errors
    /// A source whose data type has no registered checks (before any frame is read),
    /// or a dispatcher task that could not be joined.
    #[instrument(name = "verification_engine_run", skip_all, fields(sources = sources.len()))]
    pub async fn run(
        self,
        sources: BTreeMap<String, mpsc::Receiver<Frame>>,
    ) -> Result<VerificationOutcome, ContractError> {
        if let Some(unknown) = sources.keys().find(|dt| !self.registry.contains(dt)) {
            return Err(ContractError::config_validation(
                format!("sources[{unknown}]"),
                format!("data type '{unknown}' has no quality checks configured"),
            ));
        }

        let mut dispatchers = JoinSet::new();
        for (data_type, frames) in sources {
            let mut aggregate = Aggregate::new(
                data_type.as_str(),
                self.config.mode,
                &self.registry.tracked_checks(&data_type),
            )
            .with_history_window(self.config.history_window);
            if let Some(feedback) = &self.feedback {
                aggregate = aggregate.with_feedback(feedback.clone());
            }
            let aggregate = Arc::new(aggregate);
            self.progress.register(Arc::clone(&aggregate));

            let mut dispatcher = FrameDispatcher::new(
                data_type.as_str(),
                Arc::clone(&self.registry),
                Arc::clone(&aggregate),
                self.config.dispatcher.clone(),
            );
            if let Some(deliveries) = &self.deliveries {
                dispatcher = dispatcher.with_deliveries(deliveries.clone());
            }
            if let Some(feedback) = &self.feedback {
                dispatcher = dispatcher.with_feedback(feedback.clone());
            }

            dispatchers.spawn(async move {
                let summary = dispatcher.run(frames).await;
                (summary, aggregate)
            });
        }
        // 释放引擎持有的发送端，下游在所有 dispatcher 结束后即可关闭
        drop(self.feedback);
        drop(self.deliveries);

        let mut outcome = VerificationOutcome::default();
        while let Some(joined) = dispatchers.join_next().await {
            let (summary, aggregate) = joined
                .map_err(|e| ContractError::Other(format!("dispatcher task failed: {e}")))?;
            if summary.frames_received > 0 {
                outcome
                    .report
                    .data_types
                    .insert(summary.data_type.clone(), aggregate.snapshot());
            }
            tracing::info!(
                data_type = %summary.data_type,
                verified = summary.frames_verified,
                bad = summary.bad_frames,
                missing = summary.missing_frames,
                feedback_dropped = aggregate.feedback_dropped(),
                "data type drained"
            );
            outcome.summaries.insert(summary.data_type.clone(), summary);
        }

        Ok(outcome)
    }
}
