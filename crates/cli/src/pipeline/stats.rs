//! Pipeline statistics and metrics.

use std::collections::BTreeMap;
use std::time::Duration;

use dispatcher::{DeliverySummary, FeedbackSummary};
use ingestion::FeedStats;
use observability::VerificationMetricsAggregator;
use verifier::DispatchSummary;

/// Statistics from a verification run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Total duration of the run
    pub duration: Duration,

    /// Stopped by timeout or shutdown signal before the sources finished
    pub interrupted: bool,

    /// Number of sources that were started
    pub active_sources: usize,

    /// Per data type verification summaries
    pub data_types: BTreeMap<String, DispatchSummary>,

    /// Per data type frame feed statistics
    pub feeds: BTreeMap<String, FeedStats>,

    /// Acquisitions dropped on a full ingestion queue
    pub acquisitions_dropped: u64,

    /// Consumer delivery results (None = no consumers)
    pub delivery: Option<DeliverySummary>,

    /// Feedback results (None = feedback disabled)
    pub feedback: Option<FeedbackSummary>,

    /// PV table after the run (`<prefix>:<pv>_ind` / `_ctr`)
    pub pv_values: BTreeMap<String, u64>,

    /// Merged verification metrics
    pub metrics: VerificationMetricsAggregator,
}

impl PipelineStats {
    pub fn frames_verified(&self) -> u64 {
        self.data_types.values().map(|s| s.frames_verified).sum()
    }

    pub fn bad_frames(&self) -> u64 {
        self.data_types.values().map(|s| s.bad_frames).sum()
    }

    pub fn missing_frames(&self) -> u64 {
        self.data_types.values().map(|s| s.missing_frames).sum()
    }

    /// Verified frames per second
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.frames_verified() as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                  Verification Statistics                     ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Frames verified: {}", self.frames_verified());
        println!("   ├─ Bad frames: {}", self.bad_frames());
        println!("   ├─ Missing frames: {}", self.missing_frames());
        println!("   ├─ Dropped acquisitions: {}", self.acquisitions_dropped);
        println!("   ├─ FPS: {:.2}", self.fps());
        println!("   ├─ Active sources: {}", self.active_sources);
        println!("   └─ Interrupted: {}", self.interrupted);

        if !self.data_types.is_empty() {
            println!("\n🔍 Data Types");
            let last = self.data_types.len() - 1;
            for (i, (data_type, summary)) in self.data_types.iter().enumerate() {
                let prefix = if i == last { "└─" } else { "├─" };
                let feed = self.feeds.get(data_type);
                println!(
                    "   {} {}: verified={} bad={} missing={} rejected={} end={} decode_errors={}",
                    prefix,
                    data_type,
                    summary.frames_verified,
                    summary.bad_frames,
                    summary.missing_frames,
                    summary.rejected_frames,
                    summary.end_index,
                    feed.map_or(0, |f| f.decode_errors),
                );
            }
        }

        if let Some(ref delivery) = self.delivery {
            println!("\n📤 Consumers (released {})", delivery.released);
            let count = delivery.consumers.len();
            for (i, (name, snapshot)) in delivery.consumers.iter().enumerate() {
                let prefix = if i + 1 == count { "└─" } else { "├─" };
                println!("   {} {}: {}", prefix, name, snapshot);
            }
        }

        if let Some(ref feedback) = self.feedback {
            println!("\n🔔 Feedback");
            println!("   ├─ Notices: {}", feedback.notices);
            println!("   ├─ Delivered: {}", feedback.delivered);
            println!("   └─ Failed: {}", feedback.failed);
        }

        let triggered: Vec<_> = self.pv_values.iter().filter(|(_, v)| **v > 0).collect();
        if !triggered.is_empty() {
            println!("\n📟 PV Table");
            for (name, value) in triggered {
                println!("   ├─ {} = {}", name, value);
            }
        }

        println!("\n{}", self.metrics.summary());
    }
}
