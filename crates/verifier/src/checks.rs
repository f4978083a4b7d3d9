//! Check kernels: pure numeric functions over a slice or a history.

use contracts::{CheckId, ContractError, HistoryEntry};

pub(crate) fn mean(pixels: &[f64]) -> f64 {
    sum(pixels) / pixels.len() as f64
}

/// Population standard deviation
pub(crate) fn std_dev(pixels: &[f64]) -> f64 {
    let mean = mean(pixels);
    let variance = pixels
        .iter()
        .map(|&v| {
            let d = v - mean;
            d * d
        })
        .sum::<f64>()
        / pixels.len() as f64;
    variance.sqrt()
}

pub(crate) fn sum(pixels: &[f64]) -> f64 {
    pixels.iter().sum()
}

/// Pixels strictly above `threshold`
pub(crate) fn saturated_count(pixels: &[f64], threshold: f64) -> f64 {
    pixels.iter().filter(|&&v| v > threshold).count() as f64
}

/// Counts per second; the acquisition time must be known and positive
pub(crate) fn count_rate(pixels: &[f64], acquire_time: Option<f64>) -> Result<f64, ContractError> {
    match acquire_time {
        Some(t) if t.is_finite() && t > 0.0 => Ok(sum(pixels) / t),
        Some(t) => Err(ContractError::evaluation(
            CheckId::RateSaturation.name(),
            format!("acquisition time must be positive, got {t}"),
        )),
        None => Err(ContractError::evaluation(
            CheckId::RateSaturation.name(),
            "frame carries no acquisition time",
        )),
    }
}

/// Current mean minus the mean of earlier accepted means (0 without history)
pub(crate) fn mean_delta(current: f64, prior: &[HistoryEntry]) -> f64 {
    if prior.is_empty() {
        return 0.0;
    }
    let baseline = prior.iter().map(|e| e.result.value).sum::<f64>() / prior.len() as f64;
    current - baseline
}

/// Saturated points accumulated over earlier accepted frames plus the current one
pub(crate) fn accumulated(current: f64, prior: &[HistoryEntry]) -> f64 {
    prior.iter().map(|e| e.result.value).sum::<f64>() + current
}

/// Reject NaN / infinite values before classification
pub(crate) fn finite(check: CheckId, value: f64) -> Result<f64, ContractError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ContractError::evaluation(
            check.name(),
            format!("computed non-finite value {value}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CheckResult, QualityError};

    fn entry(index: u64, value: f64) -> HistoryEntry {
        HistoryEntry {
            index,
            result: CheckResult::new(value, CheckId::Mean, QualityError::None),
        }
    }

    #[test]
    fn basic_statistics() {
        let pixels = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&pixels) - 5.0).abs() < 1e-12);
        assert!((std_dev(&pixels) - 2.0).abs() < 1e-12);
        assert!((sum(&pixels) - 40.0).abs() < 1e-12);
        assert_eq!(saturated_count(&pixels, 5.0), 2.0);
    }

    #[test]
    fn saturation_threshold_is_strict() {
        assert_eq!(saturated_count(&[10.0, 10.0, 11.0], 10.0), 1.0);
    }

    #[test]
    fn count_rate_requires_positive_time() {
        assert_eq!(count_rate(&[1.0, 3.0], Some(2.0)).unwrap(), 2.0);
        assert!(count_rate(&[1.0], None).is_err());
        assert!(count_rate(&[1.0], Some(0.0)).is_err());
        assert!(count_rate(&[1.0], Some(-1.0)).is_err());
    }

    #[test]
    fn mean_delta_baseline() {
        assert_eq!(mean_delta(7.0, &[]), 0.0);
        assert_eq!(mean_delta(7.0, &[entry(0, 5.0)]), 2.0);
        assert_eq!(mean_delta(7.0, &[entry(0, 4.0), entry(1, 6.0), entry(2, 8.0)]), 1.0);
    }

    #[test]
    fn accumulated_includes_current() {
        assert_eq!(accumulated(3.0, &[]), 3.0);
        assert_eq!(accumulated(3.0, &[entry(0, 1.0), entry(1, 2.0)]), 6.0);
    }

    #[test]
    fn non_finite_is_error() {
        assert!(finite(CheckId::Mean, f64::NAN).is_err());
        assert!(finite(CheckId::Mean, f64::INFINITY).is_err());
        assert_eq!(finite(CheckId::Mean, 1.5).unwrap(), 1.5);
    }
}
