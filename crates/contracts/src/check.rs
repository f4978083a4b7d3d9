//! Quality check identifiers and per-check outcomes.
//!
//! 数值编码保持稳定（基础检查 1..=6，统计检查从 `STAT_START` 开始），
//! 名称表只在报告 / 反馈边界使用。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ContractError;

/// 统计检查编码起点
pub const STAT_START: u16 = 100;

/// Quality check identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CheckId {
    /// 平均强度
    Mean,
    /// 总体标准差
    StdDev,
    /// 饱和像素数（永不判定失败）
    Saturation,
    /// 强度总和
    Sum,
    /// 单帧饱和像素数（按 frame_sat 限值判定）
    FrameSaturation,
    /// 计数率饱和：总和 / 采集时间
    RateSaturation,
    /// 当前均值相对历史均值的偏移
    StatMean,
    /// 累计饱和像素数
    AccumulatedSaturation,
}

impl CheckId {
    /// All checks, ordered by code
    pub const ALL: [CheckId; 8] = [
        CheckId::Mean,
        CheckId::StdDev,
        CheckId::Saturation,
        CheckId::Sum,
        CheckId::FrameSaturation,
        CheckId::RateSaturation,
        CheckId::StatMean,
        CheckId::AccumulatedSaturation,
    ];

    /// Stable numeric code
    pub fn code(self) -> u16 {
        match self {
            CheckId::Mean => 1,
            CheckId::StdDev => 2,
            CheckId::Saturation => 3,
            CheckId::Sum => 4,
            CheckId::FrameSaturation => 5,
            CheckId::RateSaturation => 6,
            CheckId::StatMean => STAT_START,
            CheckId::AccumulatedSaturation => STAT_START + 1,
        }
    }

    /// Look up a check by numeric code
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|check| check.code() == code)
    }

    /// Statistical checks run against accumulated history
    pub fn is_statistical(self) -> bool {
        self.code() >= STAT_START
    }

    /// Human-readable name used in reports and PV names
    pub fn name(self) -> &'static str {
        match self {
            CheckId::Mean => "mean",
            CheckId::StdDev => "st_dev",
            CheckId::Saturation => "saturation",
            CheckId::Sum => "sum",
            CheckId::FrameSaturation => "frame_sat",
            CheckId::RateSaturation => "rate_sat",
            CheckId::StatMean => "stat_mean",
            CheckId::AccumulatedSaturation => "acc_sat",
        }
    }

    /// Key of the limits entry this check is evaluated against
    pub fn limit_key(self) -> &'static str {
        match self {
            CheckId::Mean => "mean",
            CheckId::StdDev => "st_dev",
            CheckId::Saturation => "sat",
            CheckId::Sum => "sum",
            CheckId::FrameSaturation => "frame_sat",
            CheckId::RateSaturation => "rate_sat",
            CheckId::StatMean => "stat_mean",
            CheckId::AccumulatedSaturation => "sat_points",
        }
    }

    /// All limit keys a check needs to evaluate.
    ///
    /// `FrameSaturation` counts pixels above the `sat` threshold and then judges the count
    /// against its own `frame_sat` limits.
    pub fn required_limit_keys(self) -> &'static [&'static str] {
        match self {
            CheckId::FrameSaturation => &["sat", "frame_sat"],
            CheckId::Mean => &["mean"],
            CheckId::StdDev => &["st_dev"],
            CheckId::Saturation => &["sat"],
            CheckId::Sum => &["sum"],
            CheckId::RateSaturation => &["rate_sat"],
            CheckId::StatMean => &["stat_mean"],
            CheckId::AccumulatedSaturation => &["sat_points"],
        }
    }

    /// Basic check whose history a statistical check consumes
    pub fn source(self) -> Option<CheckId> {
        match self {
            CheckId::StatMean => Some(CheckId::Mean),
            CheckId::AccumulatedSaturation => Some(CheckId::Saturation),
            _ => None,
        }
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CheckId {
    type Err = ContractError;

    /// Accepts report names (`mean`) and selection-file identifiers
    /// (`QUALITYCHECK_MEAN`, `STAT_MEAN`, ...), case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let check = match s.trim().to_ascii_lowercase().as_str() {
            "mean" | "qualitycheck_mean" => CheckId::Mean,
            "st_dev" | "std" | "qualitycheck_std" => CheckId::StdDev,
            "saturation" | "sat" | "qualitycheck_sat" => CheckId::Saturation,
            "sum" | "qualitycheck_sum" => CheckId::Sum,
            "frame_sat" | "qualitycheck_frame_sat" => CheckId::FrameSaturation,
            "rate_sat" | "qualitycheck_rate_sat" => CheckId::RateSaturation,
            "stat_mean" => CheckId::StatMean,
            "acc_sat" => CheckId::AccumulatedSaturation,
            _ => {
                return Err(ContractError::UnknownCheck {
                    name: s.to_string(),
                })
            }
        };
        Ok(check)
    }
}

impl TryFrom<String> for CheckId {
    type Error = ContractError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CheckId> for String {
    fn from(check: CheckId) -> Self {
        check.name().to_string()
    }
}

/// Outcome classification of a single check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityError {
    /// 在限值之内
    #[default]
    None,
    /// 低于 low_limit
    Low,
    /// 高于 high_limit
    High,
}

impl QualityError {
    /// Numeric error code (0 / -1 / -2)
    pub fn code(self) -> i8 {
        match self {
            QualityError::None => 0,
            QualityError::Low => -1,
            QualityError::High => -2,
        }
    }

    /// Whether this outcome is a limit violation
    pub fn is_violation(self) -> bool {
        self != QualityError::None
    }
}

/// Result of one check on one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// 计算值
    pub value: f64,
    /// 检查类型
    pub check: CheckId,
    /// 判定结果
    pub error: QualityError,
}

impl CheckResult {
    pub fn new(value: f64, check: CheckId, error: QualityError) -> Self {
        Self {
            value,
            check,
            error,
        }
    }

    /// Result within limits
    pub fn passed(&self) -> bool {
        !self.error.is_violation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_partition_basic_and_statistical() {
        for check in CheckId::ALL {
            assert_eq!(check.is_statistical(), check.code() >= STAT_START);
            assert_eq!(CheckId::from_code(check.code()), Some(check));
        }
        assert!(!CheckId::Saturation.is_statistical());
        assert!(CheckId::AccumulatedSaturation.is_statistical());
    }

    #[test]
    fn parse_selection_identifiers() {
        assert_eq!("QUALITYCHECK_MEAN".parse::<CheckId>().unwrap(), CheckId::Mean);
        assert_eq!("QUALITYCHECK_STD".parse::<CheckId>().unwrap(), CheckId::StdDev);
        assert_eq!("STAT_MEAN".parse::<CheckId>().unwrap(), CheckId::StatMean);
        assert_eq!(
            "ACC_SAT".parse::<CheckId>().unwrap(),
            CheckId::AccumulatedSaturation
        );
        assert_eq!("frame_sat".parse::<CheckId>().unwrap(), CheckId::FrameSaturation);
        assert!("QUALITYCHECK_SNR".parse::<CheckId>().is_err());
    }

    #[test]
    fn statistical_sources() {
        assert_eq!(CheckId::StatMean.source(), Some(CheckId::Mean));
        assert_eq!(
            CheckId::AccumulatedSaturation.source(),
            Some(CheckId::Saturation)
        );
        assert_eq!(CheckId::Sum.source(), None);
    }

    #[test]
    fn serde_uses_names() {
        let result = CheckResult::new(15.0, CheckId::Mean, QualityError::High);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"check\":\"mean\""), "got: {json}");
        assert!(json.contains("\"error\":\"high\""), "got: {json}");

        let back: CheckResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn error_codes() {
        assert_eq!(QualityError::None.code(), 0);
        assert_eq!(QualityError::Low.code(), -1);
        assert_eq!(QualityError::High.code(), -2);
    }
}
