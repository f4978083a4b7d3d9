//! # Dispatcher
//!
//! 下游分发模块。
//!
//! 负责：
//! - 按数据类型重排序已校验的帧 (`ReorderBuffer`)
//! - Fan-out 到多个 consumer，隔离慢 consumer，不阻塞校验链路
//! - 实时失败反馈：console / log / PV 回写 (`FeedbackDispatcher`)

pub mod dispatcher;
pub mod error;
pub mod feedback;
pub mod handle;
pub mod metrics;
pub mod pv;
pub mod reorder;
pub mod sinks;

pub use contracts::{ConsumerSink, Delivery, FeedbackSink, PvWriter};
pub use dispatcher::{
    ConsumerDispatcher, ConsumerDispatcherBuilder, ConsumerDispatcherConfig, DeliverySummary,
    create_consumer_dispatcher,
};
pub use error::DispatcherError;
pub use feedback::{
    ConsoleFeedback, FeedbackDispatcher, FeedbackSummary, FeedbackTarget, LogFeedback, PvFeedback,
};
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use pv::PvFeedbackDriver;
pub use reorder::{LaneStats, ReorderBuffer};
pub use sinks::{FileSink, LogSink, NetworkSink};
