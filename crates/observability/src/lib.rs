//! # Observability
//!
//! 可观测性模块：Tracing + Prometheus 指标。
//!
//! ## 功能
//!
//! - Tracing 初始化 (JSON/Pretty/Compact)，日志固定写到 stderr
//! - Prometheus 指标导出
//! - 校验结果指标收集与统计
//!
//! ## 使用示例
//!
//! ```ignore
//! use observability::{LogFormat, LoggingConfig};
//!
//! observability::init_logging(&LoggingConfig::from_verbosity(LogFormat::Pretty, false, 1))?;
//! observability::init_metrics(9000)?;
//!
//! observability::record_frame_verified(&results);
//! ```

pub mod metrics;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// Re-exports
pub use crate::metrics::{
    record_check_latency_ms, record_check_result, record_evaluation_error,
    record_feedback_delivered, record_feedback_dropped, record_frame_rejected,
    record_frame_verified, record_missing_frame, record_outstanding_tasks, record_reorder_forced,
    record_reorder_pending, record_statistical_invocation, MetricsSummary, RunningStats,
    StatsSummary, VerificationMetricsAggregator,
};

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志
    Json,
    /// 人类可读格式
    #[default]
    Pretty,
    /// 紧凑单行格式
    Compact,
}

/// 日志设置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// 默认过滤级别
    pub level: String,
    /// 为 true 时 `RUST_LOG` 优先于 `level`
    pub respect_env: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
            respect_env: true,
        }
    }
}

impl LoggingConfig {
    /// Map `-q` / `-v` counts to a filter level.
    ///
    /// `quiet` wins and ignores `RUST_LOG`.
    pub fn from_verbosity(format: LogFormat, quiet: bool, verbose: u8) -> Self {
        let (level, respect_env) = match (quiet, verbose) {
            (true, _) => ("warn", false),
            (false, 0) => ("info", true),
            (false, 1) => ("debug", true),
            (false, _) => ("trace", true),
        };
        Self {
            format,
            level: level.to_string(),
            respect_env,
        }
    }

    fn filter(&self) -> EnvFilter {
        if self.respect_env {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
        } else {
            EnvFilter::new(&self.level)
        }
    }
}

/// Install the global tracing subscriber.
///
/// stdout 留给报告与 console 反馈，日志一律写到 stderr。
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let fmt_layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_writer(std::io::stderr).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_writer(std::io::stderr).boxed(),
    };

    tracing_subscriber::registry()
        .with(config.filter())
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    tracing::debug!(format = ?config.format, level = %config.level, "Logging initialized");
    Ok(())
}

/// Install the Prometheus recorder with an HTTP listener on `port`
pub fn init_metrics(port: u16) -> Result<SocketAddr> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("Failed to install Prometheus recorder on {addr}"))?;

    tracing::info!(%addr, "Prometheus metrics endpoint initialized");
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        let config = LoggingConfig::from_verbosity(LogFormat::Json, false, 0);
        assert_eq!(config.level, "info");
        assert!(config.respect_env);

        assert_eq!(LoggingConfig::from_verbosity(LogFormat::Pretty, false, 1).level, "debug");
        assert_eq!(LoggingConfig::from_verbosity(LogFormat::Pretty, false, 5).level, "trace");
    }

    #[test]
    fn test_quiet_ignores_env() {
        let config = LoggingConfig::from_verbosity(LogFormat::Compact, true, 2);
        assert_eq!(config.level, "warn");
        assert!(!config.respect_env);
        assert_eq!(config.format, LogFormat::Compact);
    }

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.level, "info");
    }
}
