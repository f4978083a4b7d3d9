//! VerifierBlueprint - Config Loader 输出
//!
//! 描述一次校验运行：限值与检查选择文件、聚合模式、反馈、数据源、下游消费者。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use validator::Validate;

use crate::ReportType;

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的校验配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VerifierBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 校验设置
    #[validate(nested)]
    pub verification: VerificationConfig,

    /// 实时反馈设置
    #[serde(default)]
    #[validate(nested)]
    pub feedback: FeedbackConfig,

    /// 重排序缓冲设置
    #[serde(default)]
    #[validate(nested)]
    pub reorder: ReorderConfig,

    /// 数据源（每个数据类型一个）
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// 下游消费者
    #[serde(default)]
    #[validate(nested)]
    pub consumers: Vec<ConsumerConfig>,
}

/// 校验设置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VerificationConfig {
    /// 限值文件 (JSON)，相对路径基于配置文件目录
    pub limits: PathBuf,

    /// 检查选择文件 (JSON)
    pub quality_checks: PathBuf,

    /// 参与校验的数据类型；为空时使用检查选择文件中的全部类型
    #[serde(default)]
    pub data_types: Vec<String>,

    /// -1 表示仅反馈模式（不记录好/坏帧索引）
    #[serde(default)]
    #[validate(range(min = -1))]
    pub aggregate_limit: Option<i64>,

    /// 每个检查保留的历史条数上限
    #[serde(default)]
    #[validate(range(min = 1))]
    pub history_window: Option<usize>,

    /// 调度循环的轮询间隔 (毫秒)
    #[serde(default = "default_poll_interval_ms")]
    #[validate(range(min = 1, max = 10_000))]
    pub poll_interval_ms: u64,

    /// 并发检查任务上限
    #[serde(default = "default_max_concurrent_checks")]
    #[validate(range(min = 1))]
    pub max_concurrent_checks: usize,

    /// 每个数据类型未结算帧上限，达到后暂停读取输入
    #[serde(default = "default_max_pending_frames")]
    #[validate(range(min = 1))]
    pub max_pending_frames: usize,

    /// 报告级别
    #[serde(default)]
    pub report_type: ReportType,

    /// 报告输出路径（未设置时输出到 stdout）
    #[serde(default)]
    pub report_path: Option<PathBuf>,

    /// 按源文件列出失败帧
    #[serde(default)]
    pub report_by_file: bool,
}

fn default_poll_interval_ms() -> u64 {
    5
}

fn default_max_concurrent_checks() -> usize {
    8
}

fn default_max_pending_frames() -> usize {
    64
}

impl VerificationConfig {
    /// Aggregate mode derived from `aggregate_limit`
    pub fn aggregate_mode(&self) -> AggregateMode {
        AggregateMode::from_limit(self.aggregate_limit)
    }
}

/// 聚合模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateMode {
    /// 记录好/坏帧索引与历史
    #[default]
    Full,
    /// 只转发失败（长时间实时监控）
    FeedbackOnly,
}

impl AggregateMode {
    pub fn from_limit(limit: Option<i64>) -> Self {
        match limit {
            Some(-1) => AggregateMode::FeedbackOnly,
            _ => AggregateMode::Full,
        }
    }
}

/// 反馈设置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FeedbackConfig {
    /// 启用的反馈类型
    #[serde(default)]
    pub types: Vec<FeedbackType>,

    /// PV 前缀
    #[serde(default = "default_pv_prefix")]
    #[validate(length(min = 1))]
    pub pv_prefix: String,

    /// 反馈通道容量，满时丢弃
    #[serde(default = "default_feedback_capacity")]
    #[validate(range(min = 1))]
    pub channel_capacity: usize,
}

fn default_pv_prefix() -> String {
    "verifier".to_string()
}

fn default_feedback_capacity() -> usize {
    1000
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            types: Vec::new(),
            pv_prefix: default_pv_prefix(),
            channel_capacity: default_feedback_capacity(),
        }
    }
}

impl FeedbackConfig {
    pub fn is_enabled(&self) -> bool {
        !self.types.is_empty()
    }
}

/// 反馈类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    /// 控制台输出
    Console,
    /// 日志输出
    Log,
    /// PV 回写
    Pv,
}

/// 重排序缓冲设置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReorderConfig {
    /// 每个数据类型旁路缓冲的最大条数
    #[serde(default = "default_max_pending")]
    #[validate(range(min = 1))]
    pub max_pending: usize,
}

fn default_max_pending() -> usize {
    1024
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            max_pending: default_max_pending(),
        }
    }
}

/// 数据源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// 数据类型
    pub data_type: String,

    /// 源类型及参数
    #[serde(flatten)]
    pub kind: SourceKind,
}

/// 数据源类型
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// 合成探测器帧
    Synthetic(SyntheticSourceConfig),
    /// 16 位原始帧堆栈文件
    Raw(RawSourceConfig),
}

/// 合成源参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticSourceConfig {
    /// 采集帧数
    pub frames: u64,
    pub width: usize,
    pub height: usize,
    /// 像素均值
    pub mean: f64,
    /// 均匀噪声幅度
    #[serde(default)]
    pub noise: f64,
    /// 每帧饱和像素数
    #[serde(default)]
    pub saturated_pixels: usize,
    /// 采集时间 (秒)
    #[serde(default)]
    pub acquire_time: Option<f64>,
    /// 每 N 次采集丢一次计数器（模拟丢帧）
    #[serde(default)]
    pub drop_every: Option<u64>,
    /// 帧间隔 (毫秒)
    #[serde(default)]
    pub interval_ms: u64,
    /// 随机种子
    #[serde(default)]
    pub seed: Option<u64>,
}

/// 原始帧堆栈参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSourceConfig {
    /// 按顺序读取的文件
    pub files: Vec<PathBuf>,
    pub width: usize,
    pub height: usize,
    /// 文件头字节数
    #[serde(default = "default_header_bytes")]
    pub header_bytes: usize,
    /// 采集时间 (秒)
    #[serde(default)]
    pub acquire_time: Option<f64>,
}

fn default_header_bytes() -> usize {
    8192
}

/// 下游消费者配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConsumerConfig {
    /// 消费者名称
    #[validate(length(min = 1))]
    pub name: String,

    /// 消费者类型
    pub sink_type: ConsumerType,

    /// 队列容量
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// 类型特定参数
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// 消费者类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerType {
    /// 日志输出
    Log,
    /// 文件输出
    File,
    /// 网络输出 (UDP)
    Network,
}

impl VerifierBlueprint {
    /// Data types to verify, given those available in the check selection
    pub fn selected_data_types<'a>(&'a self, available: impl Iterator<Item = &'a str>) -> Vec<String> {
        if self.verification.data_types.is_empty() {
            available.map(str::to_string).collect()
        } else {
            self.verification.data_types.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blueprint() -> VerifierBlueprint {
        VerifierBlueprint {
            version: ConfigVersion::V1,
            verification: VerificationConfig {
                limits: "limits.json".into(),
                quality_checks: "qc.json".into(),
                data_types: vec![],
                aggregate_limit: None,
                history_window: None,
                poll_interval_ms: 5,
                max_concurrent_checks: 4,
                max_pending_frames: 64,
                report_type: ReportType::Full,
                report_path: None,
                report_by_file: false,
            },
            feedback: FeedbackConfig::default(),
            reorder: ReorderConfig::default(),
            sources: vec![],
            consumers: vec![],
        }
    }

    #[test]
    fn aggregate_mode_from_limit() {
        assert_eq!(AggregateMode::from_limit(Some(-1)), AggregateMode::FeedbackOnly);
        assert_eq!(AggregateMode::from_limit(Some(500)), AggregateMode::Full);
        assert_eq!(AggregateMode::from_limit(None), AggregateMode::Full);
    }

    #[test]
    fn selected_data_types_default_to_available() {
        let mut bp = sample_blueprint();
        let available = ["data", "data_dark"];
        assert_eq!(
            bp.selected_data_types(available.iter().copied()),
            vec!["data".to_string(), "data_dark".to_string()]
        );

        bp.verification.data_types = vec!["data_white".into()];
        assert_eq!(
            bp.selected_data_types(available.iter().copied()),
            vec!["data_white".to_string()]
        );
    }

    #[test]
    fn field_validation() {
        let mut bp = sample_blueprint();
        assert!(bp.validate().is_ok());

        bp.verification.poll_interval_ms = 0;
        assert!(bp.validate().is_err());

        let mut bp = sample_blueprint();
        bp.verification.aggregate_limit = Some(-2);
        assert!(bp.validate().is_err());
    }
}
