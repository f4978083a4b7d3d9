//! # Ingestion Pipeline
//!
//! Detector frame ingestion module.
//!
//! Responsibilities:
//! - Register acquisition sources (synthetic `MockDetector`, `RawStackReader`)
//! - Decode raw 16-bit acquisitions into slices
//! - Backpressure: bounded async-channel, newest acquisition dropped when full
//! - Turn detector counters into an indexed `Frame` stream with `Missing` / `End`
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{BackpressureConfig, IngestionPipeline};
//!
//! let mut pipeline = IngestionPipeline::from_sources(&blueprint.sources, BackpressureConfig::default())?;
//! let receivers = pipeline.start_all();
//! let outcome = engine.run(receivers).await?;
//! let feed_stats = pipeline.join().await;
//! ```

mod adapter;
mod config;
mod error;
mod feed;
mod mock;
mod pipeline;
mod raw;
mod source;

// Re-exports
pub use adapter::{send_acquisition, DetectorAdapter};
pub use config::{BackpressureConfig, IngestionMetrics, MetricsSnapshot};
pub use error::{IngestionError, Result};
pub use feed::{FeedSettings, FeedState, FeedStats, FrameFeed};
pub use mock::MockDetector;
pub use pipeline::IngestionPipeline;
pub use raw::RawStackReader;
pub use source::{Acquisition, AcquisitionCallback, AcquisitionSource};
