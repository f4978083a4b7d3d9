//! FeedbackDispatcher - real-time rendering of failed checks.
//!
//! Drains the combined failure channel of every data type and renders each
//! notice through the configured targets (console / log / PV write-back).
//! Stops after one `Done` per expected data type or once all senders close.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use chrono::Local;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    ContractError, FailureNotice, FeedbackConfig, FeedbackEvent, FeedbackSink, FeedbackType,
    PvWriter,
};
use observability::record_feedback_delivered;

/// Prints one line per failure on stdout
pub struct ConsoleFeedback {
    out: Box<dyn Write + Send>,
}

impl ConsoleFeedback {
    pub fn stdout() -> Self {
        Self {
            out: Box::new(std::io::stdout()),
        }
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }

    fn render(notice: &FailureNotice) -> String {
        format!(
            "[{}] {} frame {} failed {}: value {:.3} ({:?})",
            Local::now().format("%H:%M:%S%.3f"),
            notice.data_type,
            notice.index,
            notice.result.check,
            notice.result.value,
            notice.result.error,
        )
    }
}

impl FeedbackSink for ConsoleFeedback {
    fn name(&self) -> &str {
        "console"
    }

    async fn notify(&mut self, notice: &FailureNotice) -> Result<(), ContractError> {
        writeln!(self.out, "{}", Self::render(notice))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Emits a tracing warning per failure
#[derive(Debug, Default)]
pub struct LogFeedback;

impl FeedbackSink for LogFeedback {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&mut self, notice: &FailureNotice) -> Result<(), ContractError> {
        warn!(
            data_type = %notice.data_type,
            index = notice.index,
            check = %notice.result.check,
            value = notice.result.value,
            error = ?notice.result.error,
            "Quality check failed"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}

/// Writes the failed frame index to `<data_type>_<check>` through a PV writer
pub struct PvFeedback {
    writer: Arc<dyn PvWriter>,
}

impl PvFeedback {
    pub fn new(writer: Arc<dyn PvWriter>) -> Self {
        Self { writer }
    }
}

impl FeedbackSink for PvFeedback {
    fn name(&self) -> &str {
        "pv"
    }

    async fn notify(&mut self, notice: &FailureNotice) -> Result<(), ContractError> {
        self.writer.write(&notice.pv_name(), notice.index)
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}

/// Feedback target selected by configuration
pub enum FeedbackTarget {
    Console(ConsoleFeedback),
    Log(LogFeedback),
    Pv(PvFeedback),
}

impl FeedbackTarget {
    /// Build the targets for `config`; `pv` is required when PV feedback is enabled
    pub fn from_config(
        config: &FeedbackConfig,
        pv: Option<Arc<dyn PvWriter>>,
    ) -> Result<Vec<Self>, ContractError> {
        let mut targets = Vec::with_capacity(config.types.len());
        for feedback_type in &config.types {
            let target = match feedback_type {
                FeedbackType::Console => FeedbackTarget::Console(ConsoleFeedback::stdout()),
                FeedbackType::Log => FeedbackTarget::Log(LogFeedback),
                FeedbackType::Pv => {
                    let writer = pv.clone().ok_or_else(|| {
                        ContractError::config_validation("feedback.types", "pv feedback needs a PV writer")
                    })?;
                    FeedbackTarget::Pv(PvFeedback::new(writer))
                }
            };
            targets.push(target);
        }
        Ok(targets)
    }
}

impl FeedbackSink for FeedbackTarget {
    fn name(&self) -> &str {
        match self {
            FeedbackTarget::Console(sink) => sink.name(),
            FeedbackTarget::Log(sink) => sink.name(),
            FeedbackTarget::Pv(sink) => sink.name(),
        }
    }

    async fn notify(&mut self, notice: &FailureNotice) -> Result<(), ContractError> {
        match self {
            FeedbackTarget::Console(sink) => sink.notify(notice).await,
            FeedbackTarget::Log(sink) => sink.notify(notice).await,
            FeedbackTarget::Pv(sink) => sink.notify(notice).await,
        }
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        match self {
            FeedbackTarget::Console(sink) => sink.close().await,
            FeedbackTarget::Log(sink) => sink.close().await,
            FeedbackTarget::Pv(sink) => sink.close().await,
        }
    }
}

/// Counters reported when the feedback loop ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackSummary {
    pub notices: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Data types that reported `Done`
    pub completed: Vec<String>,
}

/// Consumer of the feedback channel
pub struct FeedbackDispatcher<S: FeedbackSink = FeedbackTarget> {
    sinks: Vec<S>,
    expected: usize,
    rx: mpsc::Receiver<FeedbackEvent>,
}

impl<S: FeedbackSink + 'static> FeedbackDispatcher<S> {
    /// `expected` is the number of data types that will each send one `Done`
    pub fn new(sinks: Vec<S>, expected: usize, rx: mpsc::Receiver<FeedbackEvent>) -> Self {
        Self { sinks, expected, rx }
    }

    #[instrument(name = "feedback_dispatcher_run", skip(self), fields(sinks = self.sinks.len(), expected = self.expected))]
    pub async fn run(mut self) -> FeedbackSummary {
        info!("Feedback dispatcher started");
        let mut summary = FeedbackSummary::default();
        let mut done: HashSet<String> = HashSet::new();

        while let Some(event) = self.rx.recv().await {
            match event {
                FeedbackEvent::Failure(notice) => {
                    summary.notices += 1;
                    self.render(&notice, &mut summary).await;
                }
                FeedbackEvent::Done { data_type } => {
                    debug!(data_type = %data_type, "Data type finished");
                    if done.insert(data_type.clone()) {
                        summary.completed.push(data_type);
                    }
                    if self.expected > 0 && done.len() >= self.expected {
                        break;
                    }
                }
            }
        }

        for sink in &mut self.sinks {
            if let Err(e) = sink.close().await {
                error!(sink = sink.name(), error = %e, "Feedback sink close failed");
            }
        }

        info!(
            notices = summary.notices,
            delivered = summary.delivered,
            failed = summary.failed,
            "Feedback dispatcher stopped"
        );
        summary
    }

    pub fn spawn(self) -> JoinHandle<FeedbackSummary>
    where
        S: Send,
    {
        tokio::spawn(self.run())
    }

    async fn render(&mut self, notice: &FailureNotice, summary: &mut FeedbackSummary) {
        for sink in &mut self.sinks {
            match sink.notify(notice).await {
                Ok(()) => {
                    summary.delivered += 1;
                    record_feedback_delivered(sink.name(), true);
                }
                Err(e) => {
                    summary.failed += 1;
                    record_feedback_delivered(sink.name(), false);
                    error!(
                        sink = sink.name(),
                        data_type = %notice.data_type,
                        index = notice.index,
                        error = %e,
                        "Feedback delivery failed"
                    );
                }
            }
        }
    }
}
