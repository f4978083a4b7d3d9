//! Ingestion Pipeline main entry

use std::collections::BTreeMap;
use std::sync::Arc;

use async_channel::bounded;
use contracts::{FileOffset, Frame, SourceConfig, SourceKind};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument};

use crate::adapter::DetectorAdapter;
use crate::config::{BackpressureConfig, IngestionMetrics};
use crate::error::{IngestionError, Result};
use crate::feed::{FeedSettings, FeedStats, FrameFeed};
use crate::mock::MockDetector;
use crate::raw::RawStackReader;
use crate::source::AcquisitionSource;

struct Registration {
    adapter: DetectorAdapter,
    settings: FeedSettings,
}

/// Ingestion Pipeline
///
/// Owns one acquisition source per data type and turns each into an
/// indexed frame channel for the verifier.
pub struct IngestionPipeline {
    sources: BTreeMap<String, Registration>,
    metrics: Arc<IngestionMetrics>,
    config: BackpressureConfig,
    feeds: JoinSet<(String, Result<FeedStats>)>,
}

impl IngestionPipeline {
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            sources: BTreeMap::new(),
            metrics: Arc::new(IngestionMetrics::new()),
            config,
            feeds: JoinSet::new(),
        }
    }

    /// Build a pipeline from `[[sources]]` configuration
    #[instrument(name = "ingestion_from_sources", skip_all, fields(count = sources.len()))]
    pub fn from_sources(sources: &[SourceConfig], config: BackpressureConfig) -> Result<Self> {
        let mut pipeline = Self::new(config);
        for source in sources {
            let (boxed, acquire_time): (Box<dyn AcquisitionSource>, Option<f64>) = match &source.kind {
                SourceKind::Synthetic(synthetic) => (
                    Box::new(MockDetector::new(&source.data_type, synthetic.clone())),
                    synthetic.acquire_time,
                ),
                SourceKind::Raw(raw) => (
                    Box::new(RawStackReader::open(&source.data_type, raw.clone())?),
                    raw.acquire_time,
                ),
            };
            pipeline.register_source(boxed, acquire_time)?;
        }
        Ok(pipeline)
    }

    /// Register a source; the feed ends after the source's expected frame count
    #[instrument(
        name = "ingestion_register_source",
        skip(self, source),
        fields(data_type = %source.data_type())
    )]
    pub fn register_source(
        &mut self,
        source: Box<dyn AcquisitionSource>,
        acquire_time: Option<f64>,
    ) -> Result<()> {
        let data_type = source.data_type().to_string();
        if self.sources.contains_key(&data_type) {
            return Err(IngestionError::DuplicateSource { data_type });
        }
        let settings = FeedSettings {
            no_frames: source.expected_frames(),
            acquire_time,
        };
        debug!(data_type = %data_type, ?settings, "registered acquisition source");
        self.sources.insert(
            data_type,
            Registration {
                adapter: DetectorAdapter::new(source),
                settings,
            },
        );
        Ok(())
    }

    /// Start every source and return one frame channel per data type
    ///
    /// Must be called inside a tokio runtime.
    #[instrument(name = "ingestion_start_all", skip(self))]
    pub fn start_all(&mut self) -> BTreeMap<String, mpsc::Receiver<Frame>> {
        info!(count = self.sources.len(), "starting acquisition sources");
        let mut receivers = BTreeMap::new();
        for (data_type, registration) in &self.sources {
            if registration.adapter.is_listening() {
                continue;
            }
            let (acq_tx, acq_rx) = bounded(self.config.channel_capacity.max(1));
            let (frame_tx, frame_rx) = mpsc::channel(self.config.frame_capacity.max(1));

            let feed = FrameFeed::new(
                data_type.clone(),
                registration.settings.clone(),
                Arc::clone(&self.metrics),
            );
            let name = data_type.clone();
            self.feeds
                .spawn(async move { (name, feed.run(acq_rx, frame_tx).await) });

            registration.adapter.start(acq_tx, Arc::clone(&self.metrics));
            receivers.insert(data_type.clone(), frame_rx);
        }
        receivers
    }

    #[instrument(name = "ingestion_stop_all", skip(self))]
    pub fn stop_all(&self) {
        info!(count = self.sources.len(), "stopping acquisition sources");
        for registration in self.sources.values() {
            registration.adapter.stop();
        }
    }

    /// Wait for every feed task and collect its statistics
    pub async fn join(&mut self) -> BTreeMap<String, FeedStats> {
        let mut stats = BTreeMap::new();
        while let Some(joined) = self.feeds.join_next().await {
            match joined {
                Ok((data_type, Ok(feed_stats))) => {
                    stats.insert(data_type, feed_stats);
                }
                Ok((data_type, Err(e))) => {
                    error!(data_type = %data_type, error = %e, "frame feed failed");
                }
                Err(e) => error!(error = %e, "frame feed task panicked"),
            }
        }
        stats
    }

    /// Start offsets of the backing files, per data type
    pub fn file_offsets(&self) -> BTreeMap<String, Vec<FileOffset>> {
        self.sources
            .iter()
            .map(|(data_type, r)| (data_type.clone(), r.adapter.source().file_offsets()))
            .filter(|(_, offsets)| !offsets.is_empty())
            .collect()
    }

    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn data_types(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

impl Drop for IngestionPipeline {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{FrameStatus, SyntheticSourceConfig};

    fn synthetic(data_type: &str, frames: u64, drop_every: Option<u64>) -> SourceConfig {
        SourceConfig {
            data_type: data_type.to_string(),
            kind: SourceKind::Synthetic(SyntheticSourceConfig {
                frames,
                width: 4,
                height: 4,
                mean: 50.0,
                noise: 0.0,
                saturated_pixels: 0,
                acquire_time: Some(1.0),
                drop_every,
                interval_ms: 0,
                seed: Some(1),
            }),
        }
    }

    #[test]
    fn duplicate_data_type_is_rejected() {
        let sources = vec![synthetic("data", 2, None), synthetic("data", 3, None)];
        let err = IngestionPipeline::from_sources(&sources, BackpressureConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, IngestionError::DuplicateSource { .. }));
    }

    #[tokio::test]
    async fn synthetic_sources_end_with_missing_markers() {
        let sources = vec![synthetic("data", 6, Some(3)), synthetic("data_dark", 2, None)];
        let mut pipeline =
            IngestionPipeline::from_sources(&sources, BackpressureConfig::new(64, 64)).unwrap();
        assert_eq!(pipeline.source_count(), 2);

        let mut receivers = pipeline.start_all();
        let mut data = receivers.remove("data").unwrap();
        let mut kinds = Vec::new();
        while let Some(frame) = data.recv().await {
            kinds.push(match frame.status {
                FrameStatus::Data(ref d) => {
                    assert_eq!(d.acquire_time, Some(1.0));
                    "data"
                }
                FrameStatus::Missing => "missing",
                FrameStatus::End => "end",
            });
        }
        // 计数器 3 和 6 被跳过；6 在尾部，由关闭时补齐
        assert_eq!(kinds, vec!["data", "data", "missing", "data", "data", "missing", "end"]);

        let mut dark = receivers.remove("data_dark").unwrap();
        while dark.recv().await.is_some() {}

        let stats = pipeline.join().await;
        assert_eq!(stats["data"].end_index, 6);
        assert_eq!(stats["data_dark"].frames, 2);
        assert!(pipeline.file_offsets().is_empty());
    }
}
