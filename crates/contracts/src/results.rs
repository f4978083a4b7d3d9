//! Per-frame verification results and feedback notifications.

use serde::{Deserialize, Serialize};

use crate::{CheckId, CheckResult};

/// All check results scheduled for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResults {
    pub data_type: String,
    pub index: u64,
    /// 任一检查越限（或评估出错）即为 true
    pub failed: bool,
    pub results: Vec<CheckResult>,
}

impl FrameResults {
    /// Build results; `failed` is derived from the constituent errors
    pub fn new(data_type: impl Into<String>, index: u64, mut results: Vec<CheckResult>) -> Self {
        results.sort_by_key(|r| r.check);
        let failed = results.iter().any(|r| !r.passed());
        Self {
            data_type: data_type.into(),
            index,
            failed,
            results,
        }
    }

    /// Force the frame to failed (evaluation errors)
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    pub fn get(&self, check: CheckId) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.check == check)
    }

    /// Results violating their limits
    pub fn violations(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| !r.passed())
    }

    pub fn has_statistical(&self) -> bool {
        self.results.iter().any(|r| r.check.is_statistical())
    }
}

/// A failed check forwarded to feedback sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub data_type: String,
    pub index: u64,
    pub result: CheckResult,
}

impl FailureNotice {
    /// Process-variable name: `<data_type>_<check name>`
    pub fn pv_name(&self) -> String {
        pv_name(&self.data_type, self.result.check)
    }
}

/// PV name for a data type / check pair
pub fn pv_name(data_type: &str, check: CheckId) -> String {
    format!("{}_{}", data_type, check.name())
}

/// Events on the feedback channel
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackEvent {
    /// 检查失败通知
    Failure(FailureNotice),
    /// 某数据类型处理完毕（每个数据类型恰好一个）
    Done { data_type: String },
}
