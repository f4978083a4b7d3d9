//! # Verifier
//!
//! 帧质量校验引擎。
//!
//! 负责：
//! - 基础检查（均值、标准差、饱和、总和、单帧饱和、计数率饱和）
//! - 统计检查（均值漂移、累计饱和），依赖已通过帧的历史
//! - 每数据类型一个 `Aggregate`，区分好/坏帧索引并转发失败
//! - 输出 `VerificationReport`
//!
//! ## 使用示例
//!
//! ```ignore
//! use verifier::{CheckRegistry, EngineConfig, VerificationEngine};
//!
//! let registry = Arc::new(CheckRegistry::new(&limits, &selection)?);
//! let outcome = VerificationEngine::new(registry, EngineConfig::from(&blueprint.verification))
//!     .with_feedback(feedback_tx)
//!     .run(sources)
//!     .await?;
//!
//! println!("{:?}", outcome.report.bad_indexes());
//! ```

mod aggregate;
mod checks;
mod dispatcher;
mod engine;
mod registry;

pub use aggregate::Aggregate;
pub use dispatcher::{DispatchSummary, DispatcherConfig, FrameDispatcher};
pub use engine::{EngineConfig, EngineProgress, VerificationEngine, VerificationOutcome};
pub use registry::CheckRegistry;

// Re-export contracts types
pub use contracts::{AggregateMode, CheckId, CheckResult, FrameResults, VerificationReport};
