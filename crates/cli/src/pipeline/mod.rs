//! Pipeline orchestration module.

mod inputs;
mod orchestrator;
mod report;
mod stats;

pub use inputs::VerificationInputs;
pub use orchestrator::{Pipeline, PipelineConfig};
pub use stats::PipelineStats;
