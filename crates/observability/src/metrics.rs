//! 校验引擎指标收集模块
//!
//! 基于 FrameResults 收集和统计校验引擎的运行指标。

use std::collections::BTreeMap;

use contracts::{CheckId, FrameResults, QualityError};
use metrics::{counter, gauge, histogram};

/// 从 FrameResults 记录指标
///
/// 每个帧结算 (交给 Aggregate) 时调用。
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_frame_verified;
///
/// aggregate.handle(&results);
/// record_frame_verified(&results);
/// ```
pub fn record_frame_verified(results: &FrameResults) {
    let verdict = if results.failed { "bad" } else { "good" };
    counter!(
        "frame_verifier_frames_total",
        "data_type" => results.data_type.clone(),
        "verdict" => verdict
    )
    .increment(1);

    // 最新结算帧索引
    gauge!(
        "frame_verifier_last_index",
        "data_type" => results.data_type.clone()
    )
    .set(results.index as f64);

    for result in &results.results {
        record_check_result(&results.data_type, result.check, result.error);
    }
}

/// 记录单个检查结果
pub fn record_check_result(data_type: &str, check: CheckId, error: QualityError) {
    let outcome = match error {
        QualityError::None => "none",
        QualityError::Low => "low",
        QualityError::High => "high",
    };
    counter!(
        "frame_verifier_checks_total",
        "data_type" => data_type.to_string(),
        "check" => check.name(),
        "error" => outcome
    )
    .increment(1);
}

/// 记录检查评估错误
pub fn record_evaluation_error(data_type: &str, check: CheckId) {
    counter!(
        "frame_verifier_evaluation_errors_total",
        "data_type" => data_type.to_string(),
        "check" => check.name()
    )
    .increment(1);
}

/// 记录统计检查调用
pub fn record_statistical_invocation(data_type: &str, check: CheckId) {
    counter!(
        "frame_verifier_statistical_invocations_total",
        "data_type" => data_type.to_string(),
        "check" => check.name()
    )
    .increment(1);
}

/// 记录丢帧占位
pub fn record_missing_frame(data_type: &str) {
    counter!(
        "frame_verifier_missing_frames_total",
        "data_type" => data_type.to_string()
    )
    .increment(1);
}

/// 记录被拒绝的乱序帧 (索引未递增)
pub fn record_frame_rejected(data_type: &str) {
    counter!(
        "frame_verifier_frames_rejected_total",
        "data_type" => data_type.to_string()
    )
    .increment(1);
}

/// 记录未完成的检查任务数
pub fn record_outstanding_tasks(data_type: &str, outstanding: usize) {
    gauge!(
        "frame_verifier_outstanding_tasks",
        "data_type" => data_type.to_string()
    )
    .set(outstanding as f64);
}

/// 记录检查耗时
pub fn record_check_latency_ms(check: CheckId, latency_ms: f64) {
    histogram!(
        "frame_verifier_check_latency_ms",
        "check" => check.name()
    )
    .record(latency_ms);
}

/// 记录重排序缓冲深度
pub fn record_reorder_pending(data_type: &str, pending: usize) {
    gauge!(
        "frame_verifier_reorder_pending",
        "data_type" => data_type.to_string()
    )
    .set(pending as f64);
}

/// 记录重排序缓冲溢出时的强制释放
pub fn record_reorder_forced(data_type: &str) {
    counter!(
        "frame_verifier_reorder_forced_total",
        "data_type" => data_type.to_string()
    )
    .increment(1);
}

/// 记录反馈投递
pub fn record_feedback_delivered(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "frame_verifier_feedback_delivered_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录反馈通道满导致的丢弃
pub fn record_feedback_dropped(data_type: &str) {
    counter!(
        "frame_verifier_feedback_dropped_total",
        "data_type" => data_type.to_string()
    )
    .increment(1);
}

/// 校验指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct VerificationMetricsAggregator {
    /// 已结算帧数
    pub total_frames: u64,

    /// 失败帧数
    pub bad_frames: u64,

    /// 丢帧占位数
    pub missing_frames: u64,

    /// 被拒绝的帧数
    pub rejected_frames: u64,

    /// 评估错误数
    pub evaluation_errors: u64,

    /// 统计检查调用数
    pub statistical_invocations: u64,

    /// 各检查的数值统计
    pub value_stats: BTreeMap<CheckId, RunningStats>,

    /// 各检查的越限次数
    pub violation_counts: BTreeMap<CheckId, u64>,

    /// 检查耗时统计 (毫秒)
    pub latency_stats: RunningStats,
}

impl VerificationMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, results: &FrameResults) {
        self.total_frames += 1;
        if results.failed {
            self.bad_frames += 1;
        }

        for result in &results.results {
            if result.value.is_finite() {
                self.value_stats
                    .entry(result.check)
                    .or_default()
                    .push(result.value);
            }
            if !result.passed() {
                *self.violation_counts.entry(result.check).or_insert(0) += 1;
            }
        }
    }

    pub fn record_missing(&mut self) {
        self.missing_frames += 1;
    }

    pub fn record_rejected(&mut self) {
        self.rejected_frames += 1;
    }

    pub fn record_evaluation_error(&mut self) {
        self.evaluation_errors += 1;
    }

    pub fn record_statistical_invocation(&mut self) {
        self.statistical_invocations += 1;
    }

    pub fn record_latency_ms(&mut self, latency_ms: f64) {
        self.latency_stats.push(latency_ms);
    }

    /// 合并另一个聚合器 (多数据类型汇总)
    ///
    /// 数值统计按检查合并样本摘要，耗时统计合并为总体。
    pub fn merge(&mut self, other: &Self) {
        self.total_frames += other.total_frames;
        self.bad_frames += other.bad_frames;
        self.missing_frames += other.missing_frames;
        self.rejected_frames += other.rejected_frames;
        self.evaluation_errors += other.evaluation_errors;
        self.statistical_invocations += other.statistical_invocations;
        for (check, stats) in &other.value_stats {
            self.value_stats.entry(*check).or_default().merge(stats);
        }
        for (check, count) in &other.violation_counts {
            *self.violation_counts.entry(*check).or_insert(0) += count;
        }
        self.latency_stats.merge(&other.latency_stats);
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames,
            bad_frames: self.bad_frames,
            missing_frames: self.missing_frames,
            rejected_frames: self.rejected_frames,
            evaluation_errors: self.evaluation_errors,
            statistical_invocations: self.statistical_invocations,
            bad_rate: if self.total_frames > 0 {
                self.bad_frames as f64 / self.total_frames as f64 * 100.0
            } else {
                0.0
            },
            check_values: self
                .value_stats
                .iter()
                .map(|(check, stats)| (*check, StatsSummary::from(stats)))
                .collect(),
            violation_counts: self.violation_counts.clone(),
            check_latency_ms: StatsSummary::from(&self.latency_stats),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub bad_frames: u64,
    pub missing_frames: u64,
    pub rejected_frames: u64,
    pub evaluation_errors: u64,
    pub statistical_invocations: u64,
    pub bad_rate: f64,
    pub check_values: BTreeMap<CheckId, StatsSummary>,
    pub violation_counts: BTreeMap<CheckId, u64>,
    pub check_latency_ms: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Verification Metrics Summary ===")?;
        writeln!(f, "Total frames: {}", self.total_frames)?;
        writeln!(
            f,
            "Bad frames: {} ({:.2}%)",
            self.bad_frames, self.bad_rate
        )?;
        writeln!(f, "Missing frames: {}", self.missing_frames)?;
        writeln!(f, "Rejected frames: {}", self.rejected_frames)?;
        writeln!(f, "Evaluation errors: {}", self.evaluation_errors)?;
        writeln!(
            f,
            "Statistical invocations: {}",
            self.statistical_invocations
        )?;
        writeln!(f, "Check latency (ms): {}", self.check_latency_ms)?;

        if !self.check_values.is_empty() {
            writeln!(f, "Check values:")?;
            for (check, stats) in &self.check_values {
                let violations = self.violation_counts.get(check).copied().unwrap_or(0);
                writeln!(f, "  {}: {} [violations={}]", check, stats, violations)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 合并两组统计 (Chan 并行算法)
    pub fn merge(&mut self, other: &RunningStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }

        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        self.m2 += other.m2
            + delta * delta * (self.count as f64 * other.count as f64) / total as f64;
        self.mean += delta * other.count as f64 / total as f64;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count = total;
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 最小值
    pub fn min(&self) -> f64 {
        self.min
    }

    /// 最大值
    pub fn max(&self) -> f64 {
        self.max
    }
}
