//! Pipeline orchestrator - coordinates all components.
//!
//! 数据流：sources → `IngestionPipeline` → `VerificationEngine`
//! → (`ConsumerDispatcher`, `FeedbackDispatcher`) → report.
//! 超时或关闭信号只停止数据源，已接收的帧照常结算后再输出报告。
//! 宽限期内仍未结算完时，用已有的聚合快照输出报告。

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{ContractError, Delivery, FeedbackEvent, FeedbackType, PvWriter};
use dispatcher::{
    create_consumer_dispatcher, ConsumerDispatcherConfig, DeliverySummary, FeedbackDispatcher,
    FeedbackSummary, FeedbackTarget, PvFeedbackDriver,
};
use ingestion::{BackpressureConfig, IngestionPipeline};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use verifier::{EngineConfig, EngineProgress, VerificationEngine, VerificationOutcome};

use super::report::ReportDocument;
use super::{PipelineStats, VerificationInputs};
use crate::error::CliError;

/// How long to wait for in-flight work once sources are stopped
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Validated configuration, limits and check selection
    pub inputs: VerificationInputs,

    /// Run timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Capacity of the acquisition and frame queues
    pub buffer_size: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Report path override (None = use `verification.report_path`)
    pub report_path: Option<PathBuf>,
}

struct FeedbackWiring {
    tx: mpsc::Sender<FeedbackEvent>,
    handle: JoinHandle<FeedbackSummary>,
    pv: Option<Arc<PvFeedbackDriver>>,
}

struct ConsumerWiring {
    tx: mpsc::UnboundedSender<Delivery>,
    handle: JoinHandle<DeliverySummary>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run until every source ended, the timeout elapsed or `shutdown` resolved
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let inputs = &self.config.inputs;
        let blueprint = &inputs.blueprint;

        if let Some(port) = self.config.metrics_port {
            let addr = observability::init_metrics(port)?;
            info!(%addr, "Metrics endpoint available");
        }

        // Setup Ingestion Pipeline
        let sources = inputs.active_sources();
        if sources.is_empty() {
            warn!("No sources configured for the selected data types - nothing to verify");
        }
        for data_type in inputs.unsourced_data_types() {
            warn!(data_type = %data_type, "Selected data type has no source");
        }
        let backpressure = BackpressureConfig::new(self.config.buffer_size, self.config.buffer_size);
        let mut ingestion = IngestionPipeline::from_sources(&sources, backpressure)
            .context("Failed to set up frame sources")?;
        let active_sources = ingestion.source_count();
        info!(active_sources, "Ingestion pipeline configured");

        let feedback = self.start_feedback(active_sources)?;
        let consumers = self.start_consumers().await?;

        // Setup Verification Engine
        let mut engine = VerificationEngine::new(
            Arc::clone(&inputs.registry),
            EngineConfig::from(&blueprint.verification),
        );
        if let Some(ref wiring) = feedback {
            engine = engine.with_feedback(wiring.tx.clone());
        }
        if let Some(ref wiring) = consumers {
            engine = engine.with_deliveries(wiring.tx.clone());
        }
        info!(
            data_types = ?inputs.data_types,
            mode = ?blueprint.verification.aggregate_mode(),
            "Verification engine configured"
        );

        // 引擎持有唯一的发送端，结束时下游随之关闭
        let (feedback_handle, pv) = match feedback {
            Some(wiring) => (Some(wiring.handle), wiring.pv),
            None => (None, None),
        };
        let consumer_handle = consumers.map(|wiring| wiring.handle);

        info!("Starting frame ingestion...");
        let progress = engine.progress();
        let receivers = ingestion.start_all();
        let (outcome, interrupted) = self
            .drive(engine.run(receivers), &progress, &ingestion, shutdown)
            .await?;

        info!("Shutting down pipeline...");
        ingestion.stop_all();
        let feeds = ingestion.join().await;

        let delivery = match consumer_handle {
            Some(handle) => join_with_grace(handle, "consumer dispatcher").await,
            None => None,
        };
        let feedback = match feedback_handle {
            Some(handle) => join_with_grace(handle, "feedback dispatcher").await,
            None => None,
        };

        self.write_report(&outcome, &ingestion)?;

        let stats = PipelineStats {
            duration: start_time.elapsed(),
            interrupted,
            active_sources,
            data_types: outcome.summaries.clone(),
            feeds,
            acquisitions_dropped: ingestion.metrics().snapshot().acquisitions_dropped,
            delivery,
            feedback,
            pv_values: pv.map(|driver| driver.values()).unwrap_or_default(),
            metrics: outcome.metrics(),
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            fps = format!("{:.2}", stats.fps()),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }

    /// Await the engine; on timeout or signal stop the sources and let it drain
    async fn drive<E>(
        &self,
        engine: E,
        progress: &EngineProgress,
        ingestion: &IngestionPipeline,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(VerificationOutcome, bool)>
    where
        E: Future<Output = std::result::Result<VerificationOutcome, ContractError>>,
    {
        let timeout = self.config.timeout;
        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(engine);
        tokio::pin!(deadline);
        tokio::pin!(shutdown);

        tokio::select! {
            result = &mut engine => {
                let outcome = result.map_err(CliError::from)?;
                return Ok((outcome, false));
            }
            _ = &mut deadline => {
                warn!(
                    timeout_secs = timeout.map_or(0, |t| t.as_secs()),
                    "Verification timed out, stopping sources"
                );
            }
            _ = &mut shutdown => {
                warn!("Received shutdown signal, stopping sources");
            }
        }

        ingestion.stop_all();
        let outcome = drain_engine(engine, progress, SHUTDOWN_GRACE).await?;
        Ok((outcome, true))
    }

    fn start_feedback(&self, expected: usize) -> Result<Option<FeedbackWiring>> {
        let inputs = &self.config.inputs;
        let config = &inputs.blueprint.feedback;
        if !config.is_enabled() {
            info!("Real-time feedback disabled");
            return Ok(None);
        }

        let pv = config
            .types
            .contains(&FeedbackType::Pv)
            .then(|| Arc::new(PvFeedbackDriver::new(config.pv_prefix.clone(), inputs.pv_names())));
        let writer = pv.clone().map(|driver| driver as Arc<dyn PvWriter>);
        let targets = FeedbackTarget::from_config(config, writer).map_err(CliError::from)?;

        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let handle = FeedbackDispatcher::new(targets, expected, rx).spawn();
        info!(types = ?config.types, capacity = config.channel_capacity, "Feedback dispatcher started");

        Ok(Some(FeedbackWiring { tx, handle, pv }))
    }

    async fn start_consumers(&self) -> Result<Option<ConsumerWiring>> {
        let blueprint = &self.config.inputs.blueprint;
        if blueprint.consumers.is_empty() {
            warn!("No consumers configured - verified frames will not be delivered");
            return Ok(None);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let config = ConsumerDispatcherConfig {
            consumers: blueprint.consumers.clone(),
            reorder: blueprint.reorder.clone(),
        };
        let dispatcher = create_consumer_dispatcher(config, rx)
            .await
            .context("Failed to create consumer dispatcher")?;
        info!(consumers = blueprint.consumers.len(), "Consumer dispatcher started");

        Ok(Some(ConsumerWiring {
            tx,
            handle: dispatcher.spawn(),
        }))
    }

    fn write_report(&self, outcome: &VerificationOutcome, ingestion: &IngestionPipeline) -> Result<()> {
        let verification = &self.config.inputs.blueprint.verification;
        let offsets = verification.report_by_file.then(|| ingestion.file_offsets());
        let Some(document) =
            ReportDocument::build(verification.report_type, &outcome.report, offsets.as_ref())
        else {
            info!("Report disabled");
            return Ok(());
        };

        let path = self
            .config
            .report_path
            .as_deref()
            .or(verification.report_path.as_deref());
        document.write(path)?;
        Ok(())
    }
}

/// Give a stopped engine `grace` to settle; past that, report from the partial snapshots
async fn drain_engine<E>(
    engine: E,
    progress: &EngineProgress,
    grace: Duration,
) -> Result<VerificationOutcome>
where
    E: Future<Output = std::result::Result<VerificationOutcome, ContractError>>,
{
    match tokio::time::timeout(grace, engine).await {
        Ok(result) => Ok(result.map_err(CliError::from)?),
        Err(_) => {
            let report = progress.partial_report();
            warn!(
                grace_secs = grace.as_secs_f64(),
                data_types = report.data_types.len(),
                "Verification did not drain after sources stopped, reporting partial results"
            );
            Ok(VerificationOutcome {
                report,
                summaries: BTreeMap::new(),
            })
        }
    }
}

/// Wait for a downstream task; a stuck or failed task is logged, not fatal
async fn join_with_grace<T>(handle: JoinHandle<T>, what: &str) -> Option<T> {
    match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(task = what, error = %e, "Task failed");
            None
        }
        Err(_) => {
            warn!(task = what, "Task did not finish in time");
            None
        }
    }
}
